//! End-to-end extraction entry points.
//!
//! ```text
//! PDF ─▶ render + upload pages ─▶ per page: regions ─▶ crops ─▶ questions
//!                                    │
//!                  consolidate ◀─────┘
//!                      │
//!        [rerun: wait, run again into {paper}/rerun, merge by question_number]
//!                      │
//!              [label topics] ─▶ persist
//! ```
//!
//! One paper is one task; its pages are processed sequentially and the two
//! model calls of a page run in order. Any page failure aborts the paper:
//! nothing is persisted for a paper whose extraction did not complete.

use crate::config::PipelineConfig;
use crate::db::Database;
use crate::error::ExamError;
use crate::model::{Embedder, PageImage, VisionModel};
use crate::pipeline::consolidate::{consolidate, ConsolidationReport};
use crate::pipeline::encode::encode_png;
use crate::pipeline::input::{resolve_bytes, resolve_input};
use crate::pipeline::labeller::{label_questions, LabelReport};
use crate::pipeline::merge::{apply_merge, merge_runs, MergeInconsistency, PRIMARY_FILE, RERUN_FILE};
use crate::pipeline::questions::extract_page_questions;
use crate::pipeline::regions::extract_regions;
use crate::pipeline::render::render_pages;
use crate::progress::RunKind;
use crate::retry::RetryPolicy;
use crate::storage::{join_key, put_json, BlobStore};
use crate::types::{ExtractedQuestion, PaperInfo, Question};
use image::DynamicImage;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Long-lived handles the pipeline works against.
///
/// Created once at process start; cheap to clone.
#[derive(Clone)]
pub struct PipelineDeps {
    pub model: Arc<dyn VisionModel>,
    /// Topic labelling is skipped when no embedder is configured.
    pub embedder: Option<Arc<dyn Embedder>>,
    pub store: Arc<dyn BlobStore>,
    pub db: Database,
}

/// A rendered page: model input, crop source, public URL.
#[derive(Debug, Clone)]
pub struct PreparedPage {
    pub page: PageImage,
    pub image: DynamicImage,
    pub url: String,
}

/// A paper whose pages have been rendered and uploaded.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedPaper {
    pub paper_key: String,
    pub page_urls: Vec<String>,
    #[serde(skip)]
    pub pages: Vec<PreparedPage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionStats {
    pub pages: usize,
    /// Questions returned by the model before consolidation.
    pub raw_questions: usize,
    /// Questions after consolidation (and merge, when re-run).
    pub questions: usize,
    pub crops: usize,
    /// Rows inserted into the question bank.
    pub stored: usize,
    /// Questions skipped because the bank already had them.
    pub already_present: usize,
    pub labelled: usize,
    pub label_skipped: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeSummary {
    pub deleted_crops: usize,
    pub inconsistencies: Vec<MergeInconsistency>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOutput {
    pub paper_key: String,
    pub page_urls: Vec<String>,
    pub questions: Vec<ExtractedQuestion>,
    pub consolidation: ConsolidationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<LabelReport>,
    pub stats: ExtractionStats,
}

struct RunResult {
    questions: Vec<ExtractedQuestion>,
    report: ConsolidationReport,
    crops: usize,
}

fn require_paper_fields(paper: &PaperInfo) -> Result<(), ExamError> {
    let missing = paper.missing_fields();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ExamError::MissingFields(missing))
    }
}

// ── Step 1: rasterise ────────────────────────────────────────────────────

/// Render every page of a PDF (path or URL) and upload the page images to
/// `{paperKey}/page_{n}.png`.
pub async fn render_paper(
    input: &str,
    paper: &PaperInfo,
    config: &PipelineConfig,
    store: &dyn BlobStore,
) -> Result<RenderedPaper, ExamError> {
    require_paper_fields(paper)?;
    let resolved = resolve_input(input, config.download_timeout_secs).await?;
    render_from_path(resolved.path(), paper, config, store).await
}

/// Like [`render_paper`] for PDF bytes received over HTTP.
pub async fn render_paper_from_bytes(
    bytes: &[u8],
    paper: &PaperInfo,
    config: &PipelineConfig,
    store: &dyn BlobStore,
) -> Result<RenderedPaper, ExamError> {
    require_paper_fields(paper)?;
    let resolved = resolve_bytes(bytes)?;
    render_from_path(resolved.path(), paper, config, store).await
}

async fn render_from_path(
    pdf_path: &Path,
    paper: &PaperInfo,
    config: &PipelineConfig,
    store: &dyn BlobStore,
) -> Result<RenderedPaper, ExamError> {
    let paper_key = paper.paper_key();
    let rendered = render_pages(
        pdf_path,
        config.dpi,
        config.max_rendered_pixels,
        config.password.as_deref(),
    )
    .await?;
    info!("Rendered {} pages for {}", rendered.len(), paper_key);

    if store.ensure_folder(&paper_key).await? {
        debug!("Created folder {}", paper_key);
    }

    let mut pages = Vec::with_capacity(rendered.len());
    for page in rendered {
        let png = encode_png(&page.image).map_err(|e| ExamError::RasterisationFailed {
            page: page.page_num,
            detail: format!("PNG encoding failed: {e}"),
        })?;
        let key = join_key(&[&paper_key, &format!("page_{}.png", page.page_num)]);
        let url = store.put(&key, png.clone(), "image/png").await?;
        pages.push(PreparedPage {
            page: PageImage {
                page_num: page.page_num,
                png,
                width: page.image.width(),
                height: page.image.height(),
            },
            image: page.image,
            url,
        });
    }

    Ok(RenderedPaper {
        page_urls: pages.iter().map(|p| p.url.clone()).collect(),
        paper_key,
        pages,
    })
}

/// Rebuild a [`RenderedPaper`] from the page images a previous
/// [`render_paper`] call uploaded. Pages are read from `page_1.png` upward
/// until the first gap.
pub async fn load_rendered(store: &dyn BlobStore, paper_key: &str) -> Result<RenderedPaper, ExamError> {
    let mut pages = Vec::new();
    for page_num in 1.. {
        let key = join_key(&[paper_key, &format!("page_{page_num}.png")]);
        let Some(png) = store.get(&key).await? else {
            break;
        };
        let image = image::load_from_memory(&png).map_err(|e| ExamError::RasterisationFailed {
            page: page_num,
            detail: format!("stored page image is unreadable: {e}"),
        })?;
        pages.push(PreparedPage {
            page: PageImage {
                page_num,
                png,
                width: image.width(),
                height: image.height(),
            },
            image,
            url: store.url_for(&key),
        });
    }
    if pages.is_empty() {
        return Err(ExamError::NotFound {
            entity: "paper",
            id: paper_key.to_string(),
        });
    }
    debug!("Loaded {} stored pages for {}", pages.len(), paper_key);
    Ok(RenderedPaper {
        paper_key: paper_key.to_string(),
        page_urls: pages.iter().map(|p| p.url.clone()).collect(),
        pages,
    })
}

// ── Steps 2–5: extract, consolidate, merge, label, persist ───────────────

/// Extract, consolidate, optionally re-run and label, then persist a paper.
pub async fn extract_paper(
    input: &str,
    paper: &PaperInfo,
    config: &PipelineConfig,
    deps: &PipelineDeps,
) -> Result<ExtractionOutput, ExamError> {
    let rendered = render_paper(input, paper, config, deps.store.as_ref()).await?;
    extract_rendered(rendered, paper, config, deps).await
}

/// Like [`extract_paper`] for PDF bytes received over HTTP.
pub async fn extract_paper_from_bytes(
    bytes: &[u8],
    paper: &PaperInfo,
    config: &PipelineConfig,
    deps: &PipelineDeps,
) -> Result<ExtractionOutput, ExamError> {
    let rendered = render_paper_from_bytes(bytes, paper, config, deps.store.as_ref()).await?;
    extract_rendered(rendered, paper, config, deps).await
}

/// [`extract_paper`] with the re-run pass forced on.
pub async fn extract_with_rerun(
    input: &str,
    paper: &PaperInfo,
    config: &PipelineConfig,
    deps: &PipelineDeps,
) -> Result<ExtractionOutput, ExamError> {
    let mut config = config.clone();
    config.rerun = true;
    extract_paper(input, paper, &config, deps).await
}

/// Run the pipeline over pages that are already rendered and uploaded.
pub async fn extract_rendered(
    rendered: RenderedPaper,
    paper: &PaperInfo,
    config: &PipelineConfig,
    deps: &PipelineDeps,
) -> Result<ExtractionOutput, ExamError> {
    require_paper_fields(paper)?;
    let start = Instant::now();
    let store = deps.store.as_ref();
    let paper_key = rendered.paper_key.clone();
    let mut stats = ExtractionStats {
        pages: rendered.pages.len(),
        ..Default::default()
    };

    // Primary run.
    let primary = run_once(RunKind::Primary, &rendered.pages, &paper_key, config, deps).await?;
    stats.raw_questions = primary.report.input_count;
    stats.crops = primary.crops;
    put_json(store, &join_key(&[&paper_key, PRIMARY_FILE]), &primary.questions).await?;
    let consolidation = primary.report;
    let mut questions = primary.questions;

    // Optional re-run and merge.
    let mut merge = None;
    if config.rerun {
        if let Some(ref cb) = config.progress_callback {
            cb.on_rerun_wait(config.rerun_delay_secs);
        }
        info!(
            "Waiting {}s before re-running {}",
            config.rerun_delay_secs, paper_key
        );
        tokio::time::sleep(config.rerun_delay()).await;

        let rerun_folder = join_key(&[&paper_key, "rerun"]);
        let secondary =
            run_once(RunKind::Rerun, &rendered.pages, &rerun_folder, config, deps).await?;
        stats.crops += secondary.crops;
        put_json(store, &join_key(&[&paper_key, RERUN_FILE]), &secondary.questions).await?;

        let outcome = merge_runs(questions, secondary.questions);
        let deleted_crops = apply_merge(store, &paper_key, &outcome).await?;
        merge = Some(MergeSummary {
            deleted_crops,
            inconsistencies: outcome.inconsistencies,
        });
        questions = outcome.questions;
    }
    stats.questions = questions.len();

    // Topic labels.
    let mut bank: Vec<Question> = questions
        .iter()
        .cloned()
        .map(|q| Question::from_extracted(paper, q))
        .collect();
    let labels = if config.label_topics {
        label_for_subject(deps, &paper.subject, &mut bank, &config.label_retry).await?
    } else {
        None
    };
    if let Some(ref report) = labels {
        stats.labelled = report.assigned.len();
        stats.label_skipped = report.skipped.len();
    }

    // Persist.
    let total = bank.len();
    stats.stored = deps.db.insert_questions(bank).await?;
    stats.already_present = total - stats.stored;
    stats.duration_ms = start.elapsed().as_millis() as u64;

    info!(
        "{}: {} questions from {} pages ({} stored, {} already present) in {}ms",
        paper_key, stats.questions, stats.pages, stats.stored, stats.already_present, stats.duration_ms
    );

    Ok(ExtractionOutput {
        paper_key,
        page_urls: rendered.page_urls,
        questions,
        consolidation,
        merge,
        labels,
        stats,
    })
}

async fn run_once(
    run: RunKind,
    pages: &[PreparedPage],
    folder: &str,
    config: &PipelineConfig,
    deps: &PipelineDeps,
) -> Result<RunResult, ExamError> {
    let total = pages.len();
    let cb = config.progress_callback.as_ref();
    if let Some(cb) = cb {
        cb.on_run_start(run, total);
    }
    info!("Starting {} extraction of {} pages into {}", run, total, folder);

    let mut all = Vec::new();
    let mut crops = 0;
    for prepared in pages {
        let page_num = prepared.page.page_num;
        if let Some(cb) = cb {
            cb.on_page_start(page_num, total);
        }

        let result = async {
            let regions = extract_regions(
                deps.model.as_ref(),
                deps.store.as_ref(),
                &prepared.page,
                &prepared.image,
                folder,
                config.bounding_box_instructions(),
            )
            .await?;
            let questions = extract_page_questions(
                deps.model.as_ref(),
                &prepared.page,
                &regions,
                config.question_instructions(),
            )
            .await?;
            let page_crops: usize = regions.crops.values().map(Vec::len).sum();
            Ok::<_, ExamError>((questions, page_crops))
        }
        .await;

        match result {
            Ok((questions, page_crops)) => {
                if let Some(cb) = cb {
                    cb.on_page_complete(page_num, total, questions.len());
                }
                crops += page_crops;
                all.extend(questions);
            }
            Err(e) => {
                if let Some(cb) = cb {
                    cb.on_page_error(page_num, total, &e.to_string());
                }
                return Err(e);
            }
        }
    }

    let (questions, report) = consolidate(all);
    if let Some(cb) = cb {
        cb.on_run_complete(run, questions.len());
    }
    Ok(RunResult {
        questions,
        report,
        crops,
    })
}

async fn label_for_subject(
    deps: &PipelineDeps,
    subject: &str,
    questions: &mut [Question],
    policy: &RetryPolicy,
) -> Result<Option<LabelReport>, ExamError> {
    let Some(ref embedder) = deps.embedder else {
        debug!("No embedder configured; skipping topic labels");
        return Ok(None);
    };
    let catalog = deps.db.list_topics(Some(subject.trim())).await?;
    if catalog.is_empty() {
        info!("No topic catalog for subject '{}'; skipping labels", subject);
        return Ok(None);
    }
    let report = label_questions(embedder.as_ref(), &catalog, questions, policy).await?;
    Ok(Some(report))
}

/// Label stored questions of `subject` that have no topic yet.
pub async fn label_stored_questions(
    db: &Database,
    embedder: &dyn Embedder,
    subject: &str,
    policy: &RetryPolicy,
) -> Result<LabelReport, ExamError> {
    let catalog = db.list_topics(Some(subject.trim())).await?;
    let mut questions = db.unlabelled_questions(subject.trim()).await?;
    let report = label_questions(embedder, &catalog, &mut questions, policy).await?;

    let updates: Vec<(i64, String)> = questions
        .into_iter()
        .filter_map(|q| Some((q.id?, q.topic_label?)))
        .collect();
    let updated = db.set_topics(updates).await?;
    info!("Stored topics for {} '{}' questions", updated, subject);
    Ok(report)
}
