//! Domain types shared by the pipeline, the store and the HTTP API.
//!
//! Two question shapes exist on purpose:
//!
//! * [`ExtractedQuestion`] is the wire contract with the extraction model and
//!   the format of `{paper}/questions.json`. Field names follow the JSON the
//!   model is prompted to produce, so it round-trips that file unchanged.
//! * [`Question`] is the stored entity. It carries the paper identity, the
//!   assigned topic and the quiz counters that only exist after persistence.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

// ── Paper identity ───────────────────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// The four form fields that identify an uploaded paper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperInfo {
    pub paper_name: String,
    pub subject: String,
    pub banding: String,
    pub level: String,
}

impl PaperInfo {
    pub fn new(
        paper_name: impl Into<String>,
        subject: impl Into<String>,
        banding: impl Into<String>,
        level: impl Into<String>,
    ) -> Self {
        Self {
            paper_name: paper_name.into(),
            subject: subject.into(),
            banding: banding.into(),
            level: level.into(),
        }
    }

    /// Normalised paper identifier, also used as the blob-storage folder.
    ///
    /// `{paperName}_{subject}_{banding}_{level}` with every whitespace run
    /// collapsed to a single underscore.
    pub fn paper_key(&self) -> String {
        let raw = format!(
            "{}_{}_{}_{}",
            self.paper_name.trim(),
            self.subject.trim(),
            self.banding.trim(),
            self.level.trim()
        );
        RE_WHITESPACE.replace_all(&raw, "_").into_owned()
    }

    /// Names of required fields that are blank.
    pub fn missing_fields(&self) -> Vec<String> {
        [
            ("paper_name", &self.paper_name),
            ("subject", &self.subject),
            ("banding", &self.banding),
            ("level", &self.level),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k.to_string())
        .collect()
    }
}

// ── Regions ──────────────────────────────────────────────────────────────

/// What a bounding box returned by the model encloses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionLabel {
    Diagram,
    Graph,
    Question,
    AnswerOptions,
    AnswerKey,
}

impl RegionLabel {
    /// Only figures are cropped and uploaded; text regions are prompt hints.
    pub fn is_croppable(self) -> bool {
        matches!(self, RegionLabel::Diagram | RegionLabel::Graph)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RegionLabel::Diagram => "diagram",
            RegionLabel::Graph => "graph",
            RegionLabel::Question => "question",
            RegionLabel::AnswerOptions => "answer_options",
            RegionLabel::AnswerKey => "answer_key",
        }
    }
}

/// One labelled bounding box on a page.
///
/// `box_2d` is `[ymin, xmin, ymax, xmax]` on the model's 0–1000 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub label: RegionLabel,
    pub box_2d: [u32; 4],
    #[serde(deserialize_with = "question_number_de")]
    pub question_number: u32,
}

/// A cropped figure uploaded to blob storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub label: String,
    /// File name of the crop inside the paper folder, e.g. `3_diagram_5.png`.
    /// Stable across re-runs, so it keys image merges.
    pub original_path: String,
    pub url: String,
    #[serde(default)]
    pub box_2d: [u32; 4],
}

// ── Questions ────────────────────────────────────────────────────────────

/// Option text as the model returns it: usually a string, sometimes a
/// nested structure when the option is a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionText {
    Text(String),
    Structured(serde_json::Value),
}

impl OptionText {
    /// Size used to decide which of two extractions is fuller.
    pub fn weight(&self) -> usize {
        match self {
            OptionText::Text(s) => s.chars().count(),
            OptionText::Structured(v) => match v {
                serde_json::Value::Null => 0,
                other => other.to_string().chars().count(),
            },
        }
    }

    /// Plain-text rendering for prompts and embeddings.
    pub fn render(&self) -> String {
        match self {
            OptionText::Text(s) => s.clone(),
            OptionText::Structured(serde_json::Value::Null) => String::new(),
            OptionText::Structured(v) => v.to_string(),
        }
    }
}

impl Default for OptionText {
    fn default() -> Self {
        OptionText::Text(String::new())
    }
}

impl From<&str> for OptionText {
    fn from(s: &str) -> Self {
        OptionText::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub option: String,
    #[serde(default)]
    pub text: OptionText,
}

impl AnswerOption {
    pub fn new(option: impl Into<String>, text: impl Into<OptionText>) -> Self {
        Self {
            option: option.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerKey {
    #[serde(default, deserialize_with = "lenient_number_de")]
    pub question_number: u32,
    #[serde(default)]
    pub correct_answer: String,
}

impl AnswerKey {
    pub fn new(question_number: u32, correct_answer: impl Into<String>) -> Self {
        Self {
            question_number,
            correct_answer: correct_answer.into(),
        }
    }

    pub fn is_present(&self) -> bool {
        !self.correct_answer.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QuestionBox {
    pub top_left_x: f64,
    pub top_left_y: f64,
    pub width: f64,
    pub height: f64,
}

/// One question as produced by the extraction model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractedQuestion {
    #[serde(default, deserialize_with = "lenient_number_de")]
    pub page_number: u32,
    #[serde(deserialize_with = "question_number_de")]
    pub question_number: u32,
    #[serde(default)]
    pub question_text: String,
    #[serde(default)]
    pub answer_options: Vec<AnswerOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<QuestionBox>,
    #[serde(default)]
    pub image_path: Vec<ImageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_key: Option<AnswerKey>,
}

impl ExtractedQuestion {
    /// The answer key's letter when one is present and non-blank.
    pub fn answer_letter(&self) -> Option<&str> {
        self.answer_key
            .as_ref()
            .filter(|k| k.is_present())
            .map(|k| k.correct_answer.trim())
    }
}

/// A question as stored in the question bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(default)]
    pub id: Option<i64>,
    pub paper_name: String,
    pub subject: String,
    pub banding: String,
    pub level: String,
    pub page_number: u32,
    pub question_number: u32,
    pub question_text: String,
    pub answer_options: Vec<AnswerOption>,
    pub image_paths: Vec<ImageRef>,
    pub topic_label: Option<String>,
    pub answer_key: Option<String>,
    pub wrong_count: u32,
    pub attempt_count: u32,
    pub difficulty: Option<f64>,
}

impl Question {
    /// Attach paper identity to an extracted question.
    ///
    /// `paper_name` is the normalised paper key, so two uploads of the same
    /// paper collide on the `(paper_name, question_number)` unique index.
    pub fn from_extracted(paper: &PaperInfo, q: ExtractedQuestion) -> Self {
        let answer_key = q.answer_letter().map(str::to_string);
        Self {
            id: None,
            paper_name: paper.paper_key(),
            subject: paper.subject.trim().to_string(),
            banding: paper.banding.trim().to_string(),
            level: paper.level.trim().to_string(),
            page_number: q.page_number,
            question_number: q.question_number,
            question_text: q.question_text,
            answer_options: q.answer_options,
            image_paths: q.image_path,
            topic_label: None,
            answer_key,
            wrong_count: 0,
            attempt_count: 0,
            difficulty: None,
        }
    }
}

// ── Topic catalog ────────────────────────────────────────────────────────

/// Curriculum topic reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicLabel {
    #[serde(default)]
    pub id: Option<i64>,
    pub subject: String,
    pub topic: String,
    #[serde(default)]
    pub sub_topic: String,
    pub description: String,
}

// ── Quizzes ──────────────────────────────────────────────────────────────

/// A named set of saved questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizFolder {
    pub id: i64,
    pub name: String,
    pub subject: String,
    pub question_ids: Vec<i64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// One student answer to one quiz question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub student: String,
    pub question_id: i64,
    pub selected_option: String,
}

/// Result of recording an [`AnswerSubmission`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub question_id: i64,
    pub correct: bool,
    pub correct_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Aggregates over all recorded attempts of one quiz.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuizAnalytics {
    pub quiz_id: i64,
    pub question_count: usize,
    pub students: usize,
    /// Share of students who answered every question, 0.0–1.0.
    pub completion_rate: f64,
    pub mean_score: f64,
    pub min_score: Option<u32>,
    pub max_score: Option<u32>,
    pub hardest_topic: Option<HardestItem>,
    pub hardest_question: Option<HardestItem>,
    pub student_scores: Vec<StudentScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardestItem {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<i64>,
    pub wrong: u32,
    pub attempts: u32,
    pub wrong_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentScore {
    pub student: String,
    pub answered: u32,
    pub correct: u32,
}

// ── Serde helpers ────────────────────────────────────────────────────────

/// Parse `"7"`, `"Q7"`, `"Question 7."`. Sub-parts such as `"12a"` are
/// rejected so that they never collapse onto question 12.
fn parse_number_str(s: &str) -> Result<u32, String> {
    let body = s
        .trim()
        .trim_start_matches(|c: char| !c.is_ascii_digit());
    let digits: String = body.chars().take_while(|c| c.is_ascii_digit()).collect();
    let rest = body[digits.len()..].trim();
    if !rest.chars().all(|c| matches!(c, '.' | ')' | ':')) {
        return Err(format!("sub-part question number {s:?} is not supported"));
    }
    digits
        .parse()
        .map_err(|_| format!("invalid question number {s:?}"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Num(u64),
    Float(f64),
    Str(String),
    Null,
}

impl RawNumber {
    fn into_number(self) -> Result<Option<u32>, String> {
        match self {
            RawNumber::Num(n) => u32::try_from(n).map(Some).map_err(|e| e.to_string()),
            RawNumber::Float(f) if f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 => {
                Ok(Some(f as u32))
            }
            RawNumber::Float(f) => Err(format!("invalid question number {f}")),
            RawNumber::Str(s) => parse_number_str(&s).map(Some),
            RawNumber::Null => Ok(None),
        }
    }
}

/// Accept `7`, `"7"` or `"Q7"`; models are inconsistent about this field.
/// `null` is an error: an entry without a number is not a question.
fn question_number_de<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    RawNumber::deserialize(deserializer)?
        .into_number()
        .map_err(D::Error::custom)?
        .ok_or_else(|| D::Error::custom("question number is null"))
}

/// Same as [`question_number_de`] but `null` means unknown (0).
fn lenient_number_de<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    RawNumber::deserialize(deserializer)?
        .into_number()
        .map(|n| n.unwrap_or(0))
        .map_err(D::Error::custom)
}
