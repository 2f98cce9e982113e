//! Response parsing: turn raw model text into typed JSON.
//!
//! Models are told to answer with a bare JSON array and mostly do, but
//! they still wrap it in ```` ```json ```` fences or prefix a sentence of
//! prose often enough that a strict `serde_json::from_str` would fail whole
//! papers. Cleanup is narrow: strip fences, read the first JSON value, unwrap
//! a known wrapper object and drop unnumbered entries. Anything still
//! invalid is a hard error.

use crate::error::{ExamError, ModelStage};
use crate::types::{ExtractedQuestion, Region};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::warn;

const NUMBER_FIELD: &str = "question_number";

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[a-zA-Z]*\s*\n?(.*?)\n?\s*```").unwrap());

/// Remove Markdown code-fence markers around a model response.
pub fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_FENCED.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

/// Parse the first JSON value in a response, ignoring whatever follows it.
///
/// Leading prose is skipped up to the first `[` or `{`; trailing prose may
/// contain brackets of its own and is never read.
fn first_json_value(s: &str) -> Result<serde_json::Value, String> {
    let start = s.find(&['[', '{'][..]).unwrap_or(0);
    let mut values =
        serde_json::Deserializer::from_str(&s[start..]).into_iter::<serde_json::Value>();
    match values.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(e.to_string()),
        None => Err("empty response".into()),
    }
}

/// Wrapper keys a model may put its array under, in order of preference.
fn wrapper_keys(stage: ModelStage) -> &'static [&'static str] {
    match stage {
        ModelStage::BoundingBoxes => &["regions", "boxes", "bounding_boxes"],
        _ => &["questions"],
    }
}

/// Pull the record array out of a wrapper object.
///
/// A known wrapper key wins. Otherwise the object must hold exactly one
/// array; a bare record (it has `question_number`) becomes a one-element
/// array.
fn unwrap_object(
    mut map: serde_json::Map<String, serde_json::Value>,
    stage: ModelStage,
) -> Result<Vec<serde_json::Value>, String> {
    if map.contains_key(NUMBER_FIELD) {
        return Ok(vec![serde_json::Value::Object(map)]);
    }
    for key in wrapper_keys(stage) {
        if let Some(value) = map.remove(*key) {
            return match value {
                serde_json::Value::Array(items) => Ok(items),
                other => Err(format!("field \"{key}\" is not an array: {other}")),
            };
        }
    }

    let mut arrays: Vec<(String, Vec<serde_json::Value>)> = map
        .into_iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::Array(items) => Some((k, items)),
            _ => None,
        })
        .collect();
    match arrays.len() {
        0 => Err("expected a JSON array".into()),
        1 => Ok(arrays.remove(0).1),
        _ => {
            let names: Vec<&str> = arrays.iter().map(|(k, _)| k.as_str()).collect();
            Err(format!("ambiguous wrapper object, arrays under {names:?}"))
        }
    }
}

/// Drop entries without a question number (instructions, section headers).
fn drop_unnumbered(
    items: Vec<serde_json::Value>,
    page: usize,
    stage: ModelStage,
) -> Vec<serde_json::Value> {
    items
        .into_iter()
        .filter(|item| {
            let numbered = match item {
                serde_json::Value::Object(map) => {
                    !matches!(map.get(NUMBER_FIELD), None | Some(serde_json::Value::Null))
                }
                _ => true,
            };
            if !numbered {
                warn!("Page {}: skipping unnumbered {} entry: {}", page, stage, item);
            }
            numbered
        })
        .collect()
}

/// Parse a JSON array of `T`, accepting `{"questions": [...]}` style wrappers.
fn parse_array<T: DeserializeOwned>(
    raw: &str,
    page: usize,
    stage: ModelStage,
) -> Result<Vec<T>, ExamError> {
    let cleaned = strip_code_fences(raw);
    let malformed = |detail: String| ExamError::MalformedResponse {
        page,
        stage,
        detail,
    };

    let items = match first_json_value(&cleaned).map_err(malformed)? {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => unwrap_object(map, stage).map_err(malformed)?,
        other => return Err(malformed(format!("expected a JSON array, got {other}"))),
    };

    let items = drop_unnumbered(items, page, stage);
    serde_json::from_value(serde_json::Value::Array(items)).map_err(|e| malformed(e.to_string()))
}

/// Parse the bounding-box pass response.
pub fn parse_regions(raw: &str, page: usize) -> Result<Vec<Region>, ExamError> {
    parse_array(raw, page, ModelStage::BoundingBoxes)
}

/// Parse the question pass response.
pub fn parse_questions(raw: &str, page: usize) -> Result<Vec<ExtractedQuestion>, ExamError> {
    parse_array(raw, page, ModelStage::Questions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegionLabel;

    #[test]
    fn strips_json_fence() {
        let input = "```json\n[{\"a\": 1}]\n```";
        assert_eq!(strip_code_fences(input), "[{\"a\": 1}]");
    }

    #[test]
    fn strips_bare_fence() {
        assert_eq!(strip_code_fences("```\n[]\n```"), "[]");
    }

    #[test]
    fn no_fence_passthrough() {
        assert_eq!(strip_code_fences("  [1, 2]  "), "[1, 2]");
    }

    #[test]
    fn parses_regions_inside_fence_with_prose() {
        let raw = "Here are the boxes:\n```json\n[\n  {\"label\": \"graph\", \"box_2d\": [100, 50, 400, 900], \"question_number\": \"2\"}\n]\n```";
        let regions = parse_regions(raw, 1).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].label, RegionLabel::Graph);
        assert_eq!(regions[0].question_number, 2);
    }

    #[test]
    fn parses_wrapped_object() {
        let raw = r#"{"questions": [{"question_number": 1, "question_text": "What is H2O?"}]}"#;
        let qs = parse_questions(raw, 4).unwrap();
        assert_eq!(qs.len(), 1);
        assert_eq!(qs[0].question_text, "What is H2O?");
    }

    #[test]
    fn empty_array_is_fine() {
        assert!(parse_regions("[]", 1).unwrap().is_empty());
    }

    #[test]
    fn unparseable_is_a_hard_error() {
        let err = parse_questions("I cannot read this page, sorry.", 5).unwrap_err();
        match err {
            ExamError::MalformedResponse { page, stage, .. } => {
                assert_eq!(page, 5);
                assert_eq!(stage, ModelStage::Questions);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_label_is_a_hard_error() {
        let raw = r#"[{"label": "footer", "box_2d": [0, 0, 1, 1], "question_number": 1}]"#;
        assert!(parse_regions(raw, 1).is_err());
    }

    #[test]
    fn named_wrapper_key_wins_over_other_arrays() {
        let raw = r#"{"notes": [], "questions": [{"question_number": 1, "question_text": "Name the pole."}]}"#;
        let qs = parse_questions(raw, 1).unwrap();
        assert_eq!(qs.len(), 1);
        assert_eq!(qs[0].question_number, 1);
    }

    #[test]
    fn ambiguous_wrapper_is_a_hard_error() {
        let raw = r#"{"notes": [], "items": [{"question_number": 1}]}"#;
        assert!(matches!(
            parse_questions(raw, 2),
            Err(ExamError::MalformedResponse { page: 2, .. })
        ));
    }

    #[test]
    fn single_question_object_is_wrapped() {
        let raw = r#"{"question_number": 3, "question_text": "Which is a magnet?",
            "answer_options": [{"option": "A", "text": "Iron"}]}"#;
        let qs = parse_questions(raw, 1).unwrap();
        assert_eq!(qs.len(), 1);
        assert_eq!(qs[0].question_number, 3);
        assert_eq!(qs[0].answer_options.len(), 1);
    }

    #[test]
    fn region_wrapper_keys() {
        let raw = r#"{"boxes": [{"label": "diagram", "box_2d": [0, 0, 10, 10], "question_number": 4}]}"#;
        assert_eq!(parse_regions(raw, 1).unwrap()[0].question_number, 4);
    }

    #[test]
    fn unnumbered_entries_are_dropped() {
        let raw = r#"[
            {"question_number": null, "question_text": "Instructions: answer all"},
            {"question_text": "Section B"},
            {"question_number": 7, "question_text": "Real question"}
        ]"#;
        let qs = parse_questions(raw, 1).unwrap();
        assert_eq!(qs.len(), 1);
        assert_eq!(qs[0].question_number, 7);
    }

    #[test]
    fn sub_part_numbers_are_a_hard_error() {
        let raw = r#"[{"question_number": "12a", "question_text": "Part a"},
                      {"question_number": "12b", "question_text": "Part b"}]"#;
        assert!(matches!(
            parse_questions(raw, 6),
            Err(ExamError::MalformedResponse { page: 6, .. })
        ));
    }

    #[test]
    fn trailing_prose_with_brackets_is_ignored() {
        let raw = r#"[{"question_number": 1, "question_text": "Q"}] Note: see [figure 2] {ok}"#;
        assert_eq!(parse_questions(raw, 1).unwrap().len(), 1);
    }
}
