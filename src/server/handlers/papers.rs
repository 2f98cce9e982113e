//! Paper upload and extraction.
//!
//! Both endpoints take the same multipart form: a `file` part with the PDF
//! and text parts `subject`, `banding`, `level` and optionally `paper_name`
//! (defaults to the uploaded file's stem). Extraction also accepts `rerun`,
//! and may omit `file` to reuse stored pages, in which case `paper_name` is
//! required.

use std::collections::HashMap;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use super::super::error::{ApiError, ApiResult};
use super::super::AppState;
use crate::error::ExamError;
use crate::extract::{self, ExtractionOutput, RenderedPaper};
use crate::pipeline::input::paper_name_from_input;
use crate::types::PaperInfo;

#[derive(Debug, Default)]
struct PaperForm {
    file: Option<Vec<u8>>,
    file_name: Option<String>,
    fields: HashMap<String, String>,
}

impl PaperForm {
    async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = PaperForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                form.file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("could not read file: {e}")))?;
                if !bytes.is_empty() {
                    form.file = Some(bytes.to_vec());
                }
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("could not read '{name}': {e}")))?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    fn field(&self, name: &str) -> String {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }

    fn paper_info(&self) -> PaperInfo {
        let mut paper_name = self.field("paper_name");
        if paper_name.is_empty() {
            if let Some(ref file_name) = self.file_name {
                paper_name = paper_name_from_input(file_name);
            }
        }
        PaperInfo::new(
            paper_name,
            self.field("subject"),
            self.field("banding"),
            self.field("level"),
        )
    }

    fn flag(&self, name: &str) -> bool {
        matches!(
            self.field(name).to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    }
}

/// `POST /api/papers`: render the PDF and upload its pages.
pub async fn upload_paper(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<RenderedPaper>)> {
    let form = PaperForm::read(multipart).await?;
    let paper = form.paper_info();

    let mut missing = paper.missing_fields();
    let Some(bytes) = form.file.as_deref() else {
        missing.insert(0, "file".to_string());
        return Err(ExamError::MissingFields(missing).into());
    };
    if !missing.is_empty() {
        return Err(ExamError::MissingFields(missing).into());
    }

    let rendered =
        extract::render_paper_from_bytes(bytes, &paper, &state.config, state.deps.store.as_ref())
            .await?;
    info!(
        "Uploaded {} ({} pages)",
        rendered.paper_key,
        rendered.page_urls.len()
    );
    Ok((StatusCode::CREATED, Json(rendered)))
}

/// `POST /api/papers/:paper_key/extract`: run the full pipeline.
///
/// With a `file` part the PDF is rendered afresh; without one the pages
/// stored by a previous upload are reused. There is no file stem to fall
/// back on then, so a missing `paper_name` is reported in `missing_fields`.
pub async fn extract_paper(
    State(state): State<AppState>,
    Path(paper_key): Path<String>,
    multipart: Multipart,
) -> ApiResult<Json<ExtractionOutput>> {
    let form = PaperForm::read(multipart).await?;
    let paper = form.paper_info();

    let missing = paper.missing_fields();
    if !missing.is_empty() {
        return Err(ExamError::MissingFields(missing).into());
    }
    if paper.paper_key() != paper_key {
        return Err(ApiError::BadRequest(format!(
            "form fields describe paper '{}', not '{}'",
            paper.paper_key(),
            paper_key
        )));
    }

    let mut config = (*state.config).clone();
    if form.flag("rerun") {
        config.rerun = true;
    }

    let output = match form.file {
        Some(ref bytes) => {
            extract::extract_paper_from_bytes(bytes, &paper, &config, &state.deps).await?
        }
        None => {
            let rendered = extract::load_rendered(state.deps.store.as_ref(), &paper_key).await?;
            extract::extract_rendered(rendered, &paper, &config, &state.deps).await?
        }
    };
    Ok(Json(output))
}
