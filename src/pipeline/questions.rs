//! Text extraction: structured questions for one page.

use crate::error::ExamError;
use crate::model::{PageImage, VisionModel};
use crate::pipeline::regions::PageRegions;
use crate::types::ExtractedQuestion;
use tracing::debug;

/// Run the question pass for a page and stamp its results.
///
/// Every returned question gets the page number and the figure crops that
/// were uploaded for its question number on this page. Crops for question
/// numbers the model did not return are dropped from the page's output but
/// stay in storage.
pub async fn extract_page_questions(
    model: &dyn VisionModel,
    page: &PageImage,
    regions: &PageRegions,
    instructions: &str,
) -> Result<Vec<ExtractedQuestion>, ExamError> {
    let mut questions = model
        .extract_questions(page, &regions.regions, instructions)
        .await?;

    for q in &mut questions {
        stamp(q, page.page_num, regions);
    }

    debug!("Page {}: {} questions", page.page_num, questions.len());
    Ok(questions)
}

fn stamp(q: &mut ExtractedQuestion, page_num: usize, regions: &PageRegions) {
    q.page_number = page_num as u32;
    if let Some(crops) = regions.crops.get(&q.question_number) {
        for crop in crops {
            if !q
                .image_path
                .iter()
                .any(|i| i.original_path == crop.original_path)
            {
                q.image_path.push(crop.clone());
            }
        }
    }
}
