//! Whole-pipeline tests without pdfium or a live model.
//!
//! Pages are synthetic images; the vision model and the embedder are
//! scripted in-memory fakes. Everything else (cropping, blob storage,
//! consolidation, re-run merge, labelling, SQLite) is the real thing.

use async_trait::async_trait;
use edgequake_exam2quiz::extract::PreparedPage;
use edgequake_exam2quiz::pipeline::encode::encode_png;
use edgequake_exam2quiz::storage::get_json;
use edgequake_exam2quiz::{
    extract_rendered, label_stored_questions, load_rendered, AnswerKey, AnswerOption, BlobStore,
    Database, Embedder, ExamError, ExtractedQuestion, ExtractionProgressCallback, LocalBlobStore,
    ModelStage, PageImage, PaperInfo, PipelineConfig, PipelineDeps, QuestionFilter, Region,
    RegionLabel, RenderedPaper, RetryPolicy, RunKind, TopicLabel, VisionModel,
};
use image::DynamicImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Two-page paper. Page 1 has questions 1 and 2 (question 1 with a diagram);
/// page 2 repeats question 2 with its answer key and adds question 3.
/// Calls past the first run return a fuller option text for question 1.
struct ScriptedModel {
    pages: usize,
    question_calls: AtomicUsize,
    fail_on_page: Option<usize>,
}

impl ScriptedModel {
    fn new(pages: usize) -> Self {
        Self {
            pages,
            question_calls: AtomicUsize::new(0),
            fail_on_page: None,
        }
    }
}

fn question(n: u32, text: &str, options: &[(&str, &str)], key: Option<&str>) -> ExtractedQuestion {
    ExtractedQuestion {
        question_number: n,
        question_text: text.into(),
        answer_options: options
            .iter()
            .map(|(o, t)| AnswerOption::new(*o, *t))
            .collect(),
        answer_key: key.map(|k| AnswerKey::new(n, k)),
        ..Default::default()
    }
}

#[async_trait]
impl VisionModel for ScriptedModel {
    async fn bounding_boxes(&self, page: &PageImage, _: &str) -> Result<Vec<Region>, ExamError> {
        if page.page_num != 1 {
            return Ok(Vec::new());
        }
        Ok(vec![
            Region {
                label: RegionLabel::Question,
                box_2d: [0, 0, 200, 1000],
                question_number: 1,
            },
            Region {
                label: RegionLabel::Diagram,
                box_2d: [200, 100, 600, 900],
                question_number: 1,
            },
        ])
    }

    async fn extract_questions(
        &self,
        page: &PageImage,
        _: &[Region],
        _: &str,
    ) -> Result<Vec<ExtractedQuestion>, ExamError> {
        if self.fail_on_page == Some(page.page_num) {
            return Err(ExamError::MalformedResponse {
                page: page.page_num,
                stage: ModelStage::Questions,
                detail: "expected value at line 1 column 1".into(),
            });
        }
        let call = self.question_calls.fetch_add(1, Ordering::SeqCst);
        let rerun = call >= self.pages;
        Ok(match page.page_num {
            1 => vec![
                question(
                    1,
                    "Which end of the magnet points north?",
                    &[("A", if rerun { "North pole" } else { "N" }), ("B", "S")],
                    Some("A"),
                ),
                question(2, "Which part of the plant makes food?", &[("A", "Root"), ("B", "Leaf")], None),
            ],
            _ => vec![
                question(2, "Which part of the plant makes food?", &[], Some("B")),
                question(3, "Which planet is closest to the Sun?", &[("A", "Mercury")], Some("A")),
            ],
        })
    }

    async fn complete(&self, _: &str, _: &str) -> Result<String, ExamError> {
        Ok(String::new())
    }
}

/// One dimension per keyword.
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ExamError> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                ["magnet", "plant", "planet"]
                    .iter()
                    .map(|k| if t.contains(k) { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect())
    }
}

#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl ExtractionProgressCallback for EventLog {
    fn on_run_start(&self, run: RunKind, total_pages: usize) {
        self.0.lock().unwrap().push(format!("start {run} {total_pages}"));
    }
    fn on_page_complete(&self, page_num: usize, _total: usize, questions: usize) {
        self.0.lock().unwrap().push(format!("page {page_num}: {questions}"));
    }
    fn on_page_error(&self, page_num: usize, _total: usize, _error: &str) {
        self.0.lock().unwrap().push(format!("error {page_num}"));
    }
    fn on_run_complete(&self, run: RunKind, questions: usize) {
        self.0.lock().unwrap().push(format!("done {run} {questions}"));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn paper() -> PaperInfo {
    PaperInfo::new("Prelim 2023", "Science", "Standard", "P6")
}

struct Harness {
    _dir: TempDir,
    store: Arc<LocalBlobStore>,
    deps: PipelineDeps,
}

fn harness(model: ScriptedModel, with_embedder: bool) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalBlobStore::new(
        dir.path().join("blobs"),
        "http://localhost/files",
    ));
    let deps = PipelineDeps {
        model: Arc::new(model),
        embedder: if with_embedder {
            Some(Arc::new(KeywordEmbedder) as Arc<dyn Embedder>)
        } else {
            None
        },
        store: store.clone(),
        db: Database::open(&dir.path().join("bank.db")).unwrap(),
    };
    Harness {
        _dir: dir,
        store,
        deps,
    }
}

/// Upload `pages` blank pages the way `render_paper` would.
async fn rendered(store: &LocalBlobStore, pages: usize) -> RenderedPaper {
    let paper_key = paper().paper_key();
    let mut prepared = Vec::new();
    for page_num in 1..=pages {
        let image = DynamicImage::new_rgb8(200, 300);
        let png = encode_png(&image).unwrap();
        let url = store
            .put(&format!("{paper_key}/page_{page_num}.png"), png.clone(), "image/png")
            .await
            .unwrap();
        prepared.push(PreparedPage {
            page: PageImage {
                page_num,
                png,
                width: 200,
                height: 300,
            },
            image,
            url,
        });
    }
    RenderedPaper {
        page_urls: prepared.iter().map(|p| p.url.clone()).collect(),
        paper_key,
        pages: prepared,
    }
}

fn config() -> PipelineConfig {
    PipelineConfig::builder()
        .rerun_delay_secs(0)
        .label_retry(RetryPolicy::immediate(1))
        .build()
        .unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_run_consolidates_crops_and_persists() {
    let h = harness(ScriptedModel::new(2), false);
    let events = Arc::new(EventLog::default());
    let mut config = config();
    config.progress_callback = Some(events.clone() as Arc<dyn ExtractionProgressCallback>);

    let paper_doc = rendered(&h.store, 2).await;
    let output = extract_rendered(paper_doc, &paper(), &config, &h.deps)
        .await
        .unwrap();

    assert_eq!(output.paper_key, "Prelim_2023_Science_Standard_P6");
    assert_eq!(output.stats.pages, 2);
    assert_eq!(output.stats.raw_questions, 4);
    assert_eq!(output.stats.questions, 3);
    assert_eq!(output.consolidation.duplicates, 1);
    assert_eq!(output.stats.crops, 1);
    assert_eq!(output.stats.stored, 3);
    assert!(output.merge.is_none());

    // Question 2 keeps its page-1 text and gains the page-2 answer key.
    let q2 = &output.questions[1];
    assert_eq!(q2.page_number, 1);
    assert_eq!(q2.answer_letter(), Some("B"));
    assert_eq!(q2.answer_options.len(), 2);

    // The diagram crop is uploaded and attached to question 1.
    let crop = &output.questions[0].image_path[0];
    assert_eq!(crop.original_path, "1_diagram_1.png");
    assert!(h
        .store
        .exists("Prelim_2023_Science_Standard_P6/1_diagram_1.png")
        .await
        .unwrap());

    let saved: Vec<ExtractedQuestion> = get_json(
        h.store.as_ref(),
        "Prelim_2023_Science_Standard_P6/questions.json",
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(saved, output.questions);

    let bank = h
        .deps
        .db
        .list_questions(QuestionFilter {
            subject: Some("Science".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(bank.len(), 3);
    assert_eq!(bank[0].paper_name, "Prelim_2023_Science_Standard_P6");

    let log = events.0.lock().unwrap().clone();
    assert_eq!(
        log,
        vec!["start primary 2", "page 1: 2", "page 2: 2", "done primary 3"]
    );
}

#[tokio::test]
async fn rerun_merges_fuller_options_and_cleans_up() {
    let h = harness(ScriptedModel::new(2), false);
    let mut config = config();
    config.rerun = true;

    let paper_doc = rendered(&h.store, 2).await;
    let output = extract_rendered(paper_doc, &paper(), &config, &h.deps)
        .await
        .unwrap();

    let merge = output.merge.expect("merge summary");
    assert!(merge.inconsistencies.is_empty());
    assert_eq!(merge.deleted_crops, 1);

    let q1 = &output.questions[0];
    assert_eq!(q1.answer_options[0].text.render(), "North pole");
    assert_eq!(q1.image_path.len(), 1);
    assert!(q1.image_path[0].url.ends_with("Standard_P6/1_diagram_1.png"));

    let key = "Prelim_2023_Science_Standard_P6";
    assert!(!h
        .store
        .exists(&format!("{key}/rerun/1_diagram_1.png"))
        .await
        .unwrap());
    assert!(!h
        .store
        .exists(&format!("{key}/questions_rerun.json"))
        .await
        .unwrap());
    let saved: Vec<ExtractedQuestion> =
        get_json(h.store.as_ref(), &format!("{key}/questions.json"))
            .await
            .unwrap()
            .unwrap();
    assert_eq!(saved[0].answer_options[0].text.render(), "North pole");
}

#[tokio::test]
async fn labels_against_subject_catalog() {
    let h = harness(ScriptedModel::new(2), true);
    for (topic, description) in [
        ("Magnets", "magnet poles"),
        ("Plants", "plant parts and their functions"),
        ("Solar System", "planet orbits"),
    ] {
        h.deps
            .db
            .upsert_topic(TopicLabel {
                id: None,
                subject: "Science".into(),
                topic: topic.into(),
                sub_topic: String::new(),
                description: description.into(),
            })
            .await
            .unwrap();
    }

    let paper_doc = rendered(&h.store, 2).await;
    let output = extract_rendered(paper_doc, &paper(), &config(), &h.deps)
        .await
        .unwrap();
    assert_eq!(output.stats.labelled, 3);

    let topics: Vec<Option<String>> = h
        .deps
        .db
        .list_questions(QuestionFilter::default())
        .await
        .unwrap()
        .into_iter()
        .map(|q| q.topic_label)
        .collect();
    assert_eq!(
        topics,
        vec![
            Some("Magnets".to_string()),
            Some("Plants".to_string()),
            Some("Solar System".to_string())
        ]
    );

    // Everything is labelled, so a later pass has nothing to do.
    let report = label_stored_questions(
        &h.deps.db,
        &KeywordEmbedder,
        "Science",
        &RetryPolicy::immediate(1),
    )
    .await
    .unwrap();
    assert!(report.assigned.is_empty());
}

#[tokio::test]
async fn page_failure_persists_nothing() {
    let mut model = ScriptedModel::new(2);
    model.fail_on_page = Some(2);
    let h = harness(model, false);
    let events = Arc::new(EventLog::default());
    let mut config = config();
    config.progress_callback = Some(events.clone() as Arc<dyn ExtractionProgressCallback>);

    let paper_doc = rendered(&h.store, 2).await;
    let err = extract_rendered(paper_doc, &paper(), &config, &h.deps)
        .await
        .unwrap_err();
    assert!(matches!(err, ExamError::MalformedResponse { page: 2, .. }));

    assert!(h
        .deps
        .db
        .list_questions(QuestionFilter::default())
        .await
        .unwrap()
        .is_empty());
    assert!(!h
        .store
        .exists("Prelim_2023_Science_Standard_P6/questions.json")
        .await
        .unwrap());
    assert!(events.0.lock().unwrap().contains(&"error 2".to_string()));
}

#[tokio::test]
async fn extracting_stored_pages_twice_keeps_one_copy() {
    let h = harness(ScriptedModel::new(2), false);
    rendered(&h.store, 2).await;

    let first = load_rendered(h.store.as_ref(), "Prelim_2023_Science_Standard_P6")
        .await
        .unwrap();
    assert_eq!(first.pages.len(), 2);
    let out = extract_rendered(first, &paper(), &config(), &h.deps)
        .await
        .unwrap();
    assert_eq!(out.stats.stored, 3);

    let second = load_rendered(h.store.as_ref(), "Prelim_2023_Science_Standard_P6")
        .await
        .unwrap();
    let again = extract_rendered(second, &paper(), &config(), &h.deps)
        .await
        .unwrap();
    assert_eq!(again.stats.stored, 0);
    assert_eq!(again.stats.already_present, 3);
}

#[tokio::test]
async fn missing_paper_fields_are_rejected_before_any_model_call() {
    let h = harness(ScriptedModel::new(1), false);
    let paper_doc = rendered(&h.store, 1).await;
    let err = extract_rendered(
        paper_doc,
        &PaperInfo::new("Prelim", "", "Standard", " "),
        &config(),
        &h.deps,
    )
    .await
    .unwrap_err();
    match err {
        ExamError::MissingFields(fields) => assert_eq!(fields, vec!["subject", "level"]),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn unknown_paper_has_no_stored_pages() {
    let h = harness(ScriptedModel::new(1), false);
    assert!(matches!(
        load_rendered(h.store.as_ref(), "Nope_Science_Standard_P6")
            .await
            .unwrap_err(),
        ExamError::NotFound { entity: "paper", .. }
    ));
}
