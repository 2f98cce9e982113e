//! Consolidation: collapse per-page duplicates to one entry per question.
//!
//! The question pass can emit the same question number several times (once
//! per region that mentions it, or once on the question's page and again on
//! an answer-key page at the back of the paper). The first occurrence is
//! canonical. A later occurrence contributes only its answer key, and only
//! when that key is non-blank.

use crate::types::{AnswerKey, ExtractedQuestion};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Two different non-blank answer keys seen for one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerKeyConflict {
    pub question_number: u32,
    pub replaced: String,
    pub kept: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsolidationReport {
    /// Entries seen before consolidation.
    pub input_count: usize,
    /// Entries dropped as duplicates.
    pub duplicates: usize,
    pub conflicts: Vec<AnswerKeyConflict>,
}

/// Collapse duplicates; output is sorted ascending by question number.
///
/// When two occurrences carry different answer keys the later one wins and
/// the conflict is logged and reported.
pub fn consolidate(
    questions: Vec<ExtractedQuestion>,
) -> (Vec<ExtractedQuestion>, ConsolidationReport) {
    let mut report = ConsolidationReport {
        input_count: questions.len(),
        ..Default::default()
    };
    let mut canonical: BTreeMap<u32, ExtractedQuestion> = BTreeMap::new();

    for q in questions {
        let Some(existing) = canonical.get_mut(&q.question_number) else {
            canonical.insert(q.question_number, q);
            continue;
        };
        report.duplicates += 1;

        let Some(key) = q.answer_key.filter(AnswerKey::is_present) else {
            continue;
        };
        if let Some(previous) = existing.answer_letter() {
            if previous != key.correct_answer.trim() {
                warn!(
                    "Question {}: answer key '{}' replaced by later '{}'",
                    existing.question_number,
                    previous,
                    key.correct_answer.trim()
                );
                report.conflicts.push(AnswerKeyConflict {
                    question_number: existing.question_number,
                    replaced: previous.to_string(),
                    kept: key.correct_answer.trim().to_string(),
                });
            }
        }
        existing.answer_key = Some(key);
    }

    (canonical.into_values().collect(), report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(n: u32, text: &str, key: Option<&str>) -> ExtractedQuestion {
        ExtractedQuestion {
            question_number: n,
            question_text: text.to_string(),
            answer_key: key.map(|k| AnswerKey::new(n, k)),
            ..Default::default()
        }
    }

    #[test]
    fn duplicate_contributes_only_its_answer_key() {
        let (out, report) = consolidate(vec![
            q(1, "A", None),
            q(1, "ignored", Some("B")),
            q(2, "C", None),
        ]);
        assert_eq!(out, vec![q(1, "A", Some("B")), q(2, "C", None)]);
        assert_eq!(report.duplicates, 1);
        assert!(report.conflicts.is_empty());
    }

    #[test]
    fn one_entry_per_question_sorted() {
        let (out, report) = consolidate(vec![
            q(5, "e", None),
            q(2, "b", None),
            q(5, "e2", None),
            q(1, "a", None),
            q(2, "b2", None),
        ]);
        let numbers: Vec<u32> = out.iter().map(|q| q.question_number).collect();
        assert_eq!(numbers, vec![1, 2, 5]);
        assert_eq!(report.input_count, 5);
        assert_eq!(report.duplicates, 2);
    }

    #[test]
    fn single_key_survives_regardless_of_position() {
        let (first, _) = consolidate(vec![q(3, "x", Some("D")), q(3, "y", None)]);
        let (last, _) = consolidate(vec![q(3, "x", None), q(3, "y", Some("D"))]);
        assert_eq!(first[0].answer_letter(), Some("D"));
        assert_eq!(last[0].answer_letter(), Some("D"));
    }

    #[test]
    fn blank_key_does_not_overwrite() {
        let (out, _) = consolidate(vec![q(4, "x", Some("A")), q(4, "y", Some("  "))]);
        assert_eq!(out[0].answer_letter(), Some("A"));
    }

    #[test]
    fn later_conflicting_key_wins_and_is_reported() {
        let (out, report) = consolidate(vec![
            q(7, "x", Some("A")),
            q(7, "y", Some("C")),
            q(7, "z", Some("B")),
        ]);
        assert_eq!(out[0].answer_letter(), Some("B"));
        assert_eq!(out[0].question_text, "x");
        assert_eq!(report.conflicts.len(), 2);
        assert_eq!(report.conflicts[1].replaced, "C");
        assert_eq!(report.conflicts[1].kept, "B");
    }

    #[test]
    fn empty_input() {
        let (out, report) = consolidate(Vec::new());
        assert!(out.is_empty());
        assert_eq!(report, ConsolidationReport::default());
    }
}
