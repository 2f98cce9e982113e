//! Prompts for the two-pass page extraction and for answer explanations.
//!
//! Centralising every prompt here keeps prompt edits out of the retry and
//! parsing code, and lets unit tests inspect the exact text the model sees.
//!
//! Each page goes through the model twice: once for geometry
//! ([`BOUNDING_BOX_PROMPT`]) and once for content ([`QUESTION_PROMPT`], with
//! the first pass's boxes embedded via [`question_user_message`]). A single
//! call did not reliably return both.

use crate::types::Region;

/// System prompt for the bounding-box pass.
pub const BOUNDING_BOX_PROMPT: &str = r#"You are analysing one page of a scanned school exam paper.

Detect every region of the following kinds and return their bounding boxes:
- "question": the stem of a question
- "answer_options": the block of multiple-choice options (A, B, C, D …)
- "answer_key": a printed answer or answer table
- "diagram": a drawing, photo or illustration that belongs to a question
- "graph": a chart, plot or table of data that belongs to a question

Return ONLY a JSON array, no commentary, in exactly this shape:
[
  {"label": "diagram", "box_2d": [ymin, xmin, ymax, xmax], "question_number": 3}
]

Rules:
- Coordinates are integers normalised to 0-1000 relative to the page height (y) and width (x).
- "question_number" is the number printed next to the question the region belongs to.
- If the page has no questions, return []."#;

/// System prompt for the question-extraction pass.
pub const QUESTION_PROMPT: &str = r#"You are digitising one page of a school exam paper into structured JSON.

Return ONLY a JSON array, no commentary, where every element has this shape:
{
  "page_number": 1,
  "question_number": 1,
  "question_text": "full question stem, verbatim",
  "answer_options": [{"option": "A", "text": "option text"}],
  "diagram_reference": "short description of the figure, or null",
  "bounding_box": {"top_left_x": 0, "top_left_y": 0, "width": 0, "height": 0},
  "answer_key": {"question_number": 1, "correct_answer": "B"}
}

Rules:
- Copy text exactly as printed; do not solve or paraphrase the question.
- If an option is a table, "text" may be a nested JSON object or array.
- Use "answer_key": null unless the page itself prints the correct answer.
- Use the region hints below to find every question; emit one element per question."#;

/// System prompt for explaining a wrong answer to a student.
pub const EXPLANATION_PROMPT: &str = r#"You are a patient science tutor for primary and secondary school students.
A student answered a multiple-choice question incorrectly.
Explain in at most 120 words why their choice is wrong and why the correct option is right.
Use simple language. Do not repeat the whole question."#;

/// User message for the question pass: the region hints from the first pass.
pub fn question_user_message(page_num: usize, regions: &[Region]) -> String {
    let hints = serde_json::to_string(regions).unwrap_or_else(|_| "[]".to_string());
    format!(
        "This is page {page_num}. Bounding boxes detected on this page \
         (box_2d = [ymin, xmin, ymax, xmax], 0-1000):\n{hints}"
    )
}

/// User message for the explanation prompt.
pub fn explanation_user_message(
    question_text: &str,
    options: &[(String, String)],
    selected: &str,
    correct: &str,
) -> String {
    let mut msg = format!("Question: {question_text}\n\nOptions:\n");
    for (letter, text) in options {
        msg.push_str(&format!("({letter}) {text}\n"));
    }
    msg.push_str(&format!(
        "\nThe student chose ({selected}). The correct answer is ({correct})."
    ));
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegionLabel;

    #[test]
    fn question_message_embeds_regions() {
        let regions = vec![Region {
            label: RegionLabel::Diagram,
            box_2d: [10, 20, 300, 400],
            question_number: 7,
        }];
        let msg = question_user_message(2, &regions);
        assert!(msg.contains("page 2"));
        assert!(msg.contains(r#""label":"diagram""#), "got: {msg}");
        assert!(msg.contains(r#""question_number":7"#));
    }

    #[test]
    fn explanation_message_lists_options() {
        let msg = explanation_user_message(
            "Which gas do plants take in?",
            &[("A".into(), "Oxygen".into()), ("B".into(), "Carbon dioxide".into())],
            "A",
            "B",
        );
        assert!(msg.contains("(A) Oxygen"));
        assert!(msg.contains("chose (A)"));
        assert!(msg.contains("correct answer is (B)"));
    }

    #[test]
    fn prompts_ask_for_json_only() {
        assert!(BOUNDING_BOX_PROMPT.contains("ONLY a JSON array"));
        assert!(QUESTION_PROMPT.contains("ONLY a JSON array"));
    }
}
