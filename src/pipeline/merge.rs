//! Re-run merge: combine two independent extractions of the same paper.
//!
//! The second run exists because a single pass sometimes truncates option
//! text or misses a figure. Runs are matched by `question_number`, never by
//! position: two runs that disagree on how many questions a page has would
//! otherwise silently pair question 7 with question 8.
//!
//! Per matched question:
//!
//! * options: per option letter the longer text wins; letters only the
//!   secondary run found are appended;
//! * answer key: the primary run's, filled from the secondary when missing;
//! * images: union by `original_path`; when both runs cropped the same
//!   figure, the primary URL is kept and the secondary object is scheduled
//!   for deletion.
//!
//! A question present in only one run is kept as-is and reported.

use crate::error::ExamError;
use crate::storage::{delete_urls_best_effort, join_key, put_json, BlobStore};
use crate::types::ExtractedQuestion;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// File name of the consolidated primary run inside the paper folder.
pub const PRIMARY_FILE: &str = "questions.json";
/// File name of the secondary run inside the paper folder.
pub const RERUN_FILE: &str = "questions_rerun.json";

/// A disagreement between the two runs that the merge resolved by rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeInconsistency {
    /// Only the primary run returned this question.
    MissingInSecondary { question_number: u32 },
    /// Only the secondary run returned this question.
    MissingInPrimary { question_number: u32 },
    /// Both runs found a different answer key; the primary's was kept.
    AnswerKeyMismatch {
        question_number: u32,
        primary: String,
        secondary: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeOutcome {
    /// Merged questions sorted by question number.
    pub questions: Vec<ExtractedQuestion>,
    /// Secondary-run image URLs superseded by the primary run.
    pub deletions: Vec<String>,
    pub inconsistencies: Vec<MergeInconsistency>,
}

/// Merge two consolidated runs keyed by question number.
pub fn merge_runs(
    primary: Vec<ExtractedQuestion>,
    secondary: Vec<ExtractedQuestion>,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let mut secondary: BTreeMap<u32, ExtractedQuestion> = secondary
        .into_iter()
        .map(|q| (q.question_number, q))
        .collect();
    let mut merged: BTreeMap<u32, ExtractedQuestion> = BTreeMap::new();

    for mut q in primary {
        match secondary.remove(&q.question_number) {
            Some(other) => merge_question(&mut q, other, &mut outcome),
            None => outcome
                .inconsistencies
                .push(MergeInconsistency::MissingInSecondary {
                    question_number: q.question_number,
                }),
        }
        merged.insert(q.question_number, q);
    }

    for (n, q) in secondary {
        outcome
            .inconsistencies
            .push(MergeInconsistency::MissingInPrimary { question_number: n });
        merged.entry(n).or_insert(q);
    }

    outcome.questions = merged.into_values().collect();
    outcome
}

fn merge_question(
    primary: &mut ExtractedQuestion,
    secondary: ExtractedQuestion,
    outcome: &mut MergeOutcome,
) {
    let n = primary.question_number;

    if primary.question_text.trim().is_empty() {
        primary.question_text = secondary.question_text;
    }
    if primary.diagram_reference.is_none() {
        primary.diagram_reference = secondary.diagram_reference;
    }
    if primary.bounding_box.is_none() {
        primary.bounding_box = secondary.bounding_box;
    }

    for option in secondary.answer_options {
        match primary
            .answer_options
            .iter_mut()
            .find(|o| o.option.trim().eq_ignore_ascii_case(option.option.trim()))
        {
            Some(existing) if option.text.weight() > existing.text.weight() => {
                existing.text = option.text;
            }
            Some(_) => {}
            None => primary.answer_options.push(option),
        }
    }

    match (primary.answer_letter(), secondary.answer_key.as_ref().filter(|k| k.is_present())) {
        (None, Some(key)) => primary.answer_key = Some(key.clone()),
        (Some(p), Some(s)) if !p.eq_ignore_ascii_case(s.correct_answer.trim()) => {
            outcome
                .inconsistencies
                .push(MergeInconsistency::AnswerKeyMismatch {
                    question_number: n,
                    primary: p.to_string(),
                    secondary: s.correct_answer.trim().to_string(),
                });
        }
        _ => {}
    }

    for image in secondary.image_path {
        match primary
            .image_path
            .iter()
            .find(|i| i.original_path == image.original_path)
        {
            Some(kept) => {
                if kept.url != image.url {
                    outcome.deletions.push(image.url);
                }
            }
            None => primary.image_path.push(image),
        }
    }
}

/// Persist a merge: delete superseded crops, overwrite the primary file,
/// remove the secondary file.
///
/// Deletions are best-effort; only the write of the merged file can fail.
/// Returns the number of crops actually deleted.
pub async fn apply_merge(
    store: &dyn BlobStore,
    folder: &str,
    outcome: &MergeOutcome,
) -> Result<usize, ExamError> {
    let removed = delete_urls_best_effort(store, &outcome.deletions).await;

    put_json(store, &join_key(&[folder, PRIMARY_FILE]), &outcome.questions).await?;

    let rerun_key = join_key(&[folder, RERUN_FILE]);
    match store.delete(&rerun_key).await {
        Ok(true) => {}
        Ok(false) => warn!("{} was already gone", rerun_key),
        Err(e) => warn!("Failed to delete {}: {}", rerun_key, e),
    }

    for issue in &outcome.inconsistencies {
        warn!("Merge of {}: {:?}", folder, issue);
    }
    info!(
        "Merged {} questions for {} ({} superseded crops removed)",
        outcome.questions.len(),
        folder,
        removed
    );
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{get_json, LocalBlobStore};
    use crate::types::{AnswerKey, AnswerOption, ImageRef};

    fn q(n: u32, options: &[(&str, &str)]) -> ExtractedQuestion {
        ExtractedQuestion {
            question_number: n,
            question_text: format!("Q{n}"),
            answer_options: options
                .iter()
                .map(|(o, t)| AnswerOption::new(*o, *t))
                .collect(),
            ..Default::default()
        }
    }

    fn image(path: &str, url: &str) -> ImageRef {
        ImageRef {
            label: "diagram".into(),
            original_path: path.into(),
            url: url.into(),
            box_2d: [0, 0, 1, 1],
        }
    }

    #[test]
    fn longer_option_text_wins() {
        let out = merge_runs(vec![q(1, &[("A", "H")])], vec![q(1, &[("A", "Hydrogen")])]);
        assert_eq!(out.questions[0].answer_options[0].text.render(), "Hydrogen");
        assert!(out.inconsistencies.is_empty());
    }

    #[test]
    fn shorter_secondary_text_does_not_replace() {
        let out = merge_runs(vec![q(1, &[("A", "Helium")])], vec![q(1, &[("A", "He")])]);
        assert_eq!(out.questions[0].answer_options[0].text.render(), "Helium");
    }

    #[test]
    fn secondary_only_options_are_appended() {
        let out = merge_runs(
            vec![q(1, &[("A", "x"), ("B", "y")])],
            vec![q(1, &[("A", "x"), ("B", "y"), ("C", "z")])],
        );
        let letters: Vec<_> = out.questions[0]
            .answer_options
            .iter()
            .map(|o| o.option.as_str())
            .collect();
        assert_eq!(letters, vec!["A", "B", "C"]);
    }

    #[test]
    fn merges_by_question_number_not_position() {
        let out = merge_runs(
            vec![q(1, &[("A", "one")]), q(2, &[("A", "two")])],
            vec![q(2, &[("A", "two, longer")]), q(3, &[("A", "three")])],
        );
        let numbers: Vec<u32> = out.questions.iter().map(|q| q.question_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(out.questions[0].answer_options[0].text.render(), "one");
        assert_eq!(out.questions[1].answer_options[0].text.render(), "two, longer");
        assert_eq!(
            out.inconsistencies,
            vec![
                MergeInconsistency::MissingInSecondary { question_number: 1 },
                MergeInconsistency::MissingInPrimary { question_number: 3 },
            ]
        );
    }

    #[test]
    fn answer_key_primary_wins_secondary_fills() {
        let mut p1 = q(1, &[]);
        p1.answer_key = Some(AnswerKey::new(1, "A"));
        let mut s1 = q(1, &[]);
        s1.answer_key = Some(AnswerKey::new(1, "C"));
        let p2 = q(2, &[]);
        let mut s2 = q(2, &[]);
        s2.answer_key = Some(AnswerKey::new(2, "D"));

        let out = merge_runs(vec![p1, p2], vec![s1, s2]);
        assert_eq!(out.questions[0].answer_letter(), Some("A"));
        assert_eq!(out.questions[1].answer_letter(), Some("D"));
        assert_eq!(out.inconsistencies.len(), 1);
    }

    #[test]
    fn images_union_and_duplicates_scheduled_for_deletion() {
        let mut p = q(1, &[]);
        p.image_path = vec![image("1_diagram_1.png", "http://f/P/1_diagram_1.png")];
        let mut s = q(1, &[]);
        s.image_path = vec![
            image("1_diagram_1.png", "http://f/P/rerun/1_diagram_1.png"),
            image("1_graph_1.png", "http://f/P/rerun/1_graph_1.png"),
        ];

        let out = merge_runs(vec![p], vec![s]);
        let urls: Vec<_> = out.questions[0].image_path.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["http://f/P/1_diagram_1.png", "http://f/P/rerun/1_graph_1.png"]
        );
        assert_eq!(out.deletions, vec!["http://f/P/rerun/1_diagram_1.png".to_string()]);
    }

    #[tokio::test]
    async fn apply_writes_primary_and_removes_rerun_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path(), "http://f");
        let stale = store
            .put("P/rerun/1_diagram_1.png", vec![1], "image/png")
            .await
            .unwrap();
        put_json(&store, "P/questions_rerun.json", &Vec::<u32>::new())
            .await
            .unwrap();

        let outcome = MergeOutcome {
            questions: vec![q(1, &[("A", "x")])],
            deletions: vec![stale, "http://f/P/rerun/missing.png".to_string()],
            inconsistencies: Vec::new(),
        };
        let removed = apply_merge(&store, "P", &outcome).await.unwrap();

        assert_eq!(removed, 1);
        assert!(!store.exists("P/questions_rerun.json").await.unwrap());
        let written: Option<Vec<ExtractedQuestion>> =
            get_json(&store, "P/questions.json").await.unwrap();
        assert_eq!(written.unwrap(), outcome.questions);
    }
}
