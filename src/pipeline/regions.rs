//! Region extraction: bounding boxes per page, figures cropped and uploaded.
//!
//! The model labels every block on the page. Only `diagram` and `graph`
//! regions become image files; `question`, `answer_options` and `answer_key`
//! boxes are passed on to the text extractor as layout hints.
//!
//! ## Coordinate space
//!
//! Boxes come back as `[ymin, xmin, ymax, xmax]` on a 0–1000 grid,
//! independent of the page's pixel size. [`crop_rect`] rescales them to the
//! rendered image and clamps to its bounds; models routinely overshoot the
//! page edge by a few units on full-width figures.

use crate::error::ExamError;
use crate::model::{PageImage, VisionModel};
use crate::pipeline::encode::encode_png;
use crate::storage::{join_key, BlobStore};
use crate::types::{ImageRef, Region};
use image::DynamicImage;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Upper bound of the model's normalised coordinate space.
pub const NORMALISED_MAX: u32 = 1000;

/// Output of [`extract_regions`] for one page.
#[derive(Debug, Clone, Default)]
pub struct PageRegions {
    /// Every region the model returned, croppable or not.
    pub regions: Vec<Region>,
    /// Uploaded figure crops, keyed by question number.
    pub crops: BTreeMap<u32, Vec<ImageRef>>,
}

/// Pixel rectangle `(x, y, width, height)` for a normalised box.
///
/// Returns `None` when the clamped rectangle is empty.
pub fn crop_rect(box_2d: [u32; 4], width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let [ymin, xmin, ymax, xmax] = box_2d.map(|v| v.min(NORMALISED_MAX) as u64);
    let (w, h) = (width as u64, height as u64);
    let max = NORMALISED_MAX as u64;

    let x0 = xmin * w / max;
    let y0 = ymin * h / max;
    // Round the far edge up so thin figures keep their last pixel row.
    let x1 = ((xmax * w).div_ceil(max)).min(w);
    let y1 = ((ymax * h).div_ceil(max)).min(h);

    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

/// Crop a normalised box out of a page image.
pub fn crop_region(image: &DynamicImage, box_2d: [u32; 4]) -> Option<DynamicImage> {
    let (x, y, w, h) = crop_rect(box_2d, image.width(), image.height())?;
    Some(image.crop_imm(x, y, w, h))
}

/// `{page}_{label}_{qn}.png`, with `_{n}` appended for the n-th repeat.
pub fn crop_file_name(page: usize, region: &Region, occurrence: usize) -> String {
    if occurrence <= 1 {
        format!("{}_{}_{}.png", page, region.label.as_str(), region.question_number)
    } else {
        format!(
            "{}_{}_{}_{}.png",
            page,
            region.label.as_str(),
            region.question_number,
            occurrence
        )
    }
}

/// Ask the model for bounding boxes, then crop and upload every figure.
///
/// `folder` is the storage prefix for crops: the paper key for the primary
/// run, `{paper}/rerun` for the second one. Unparseable model output and
/// failed uploads abort the page.
pub async fn extract_regions(
    model: &dyn VisionModel,
    store: &dyn BlobStore,
    page: &PageImage,
    image: &DynamicImage,
    folder: &str,
    instructions: &str,
) -> Result<PageRegions, ExamError> {
    let regions = model.bounding_boxes(page, instructions).await?;
    debug!("Page {}: {} regions", page.page_num, regions.len());

    let mut crops: BTreeMap<u32, Vec<ImageRef>> = BTreeMap::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for region in regions.iter().filter(|r| r.label.is_croppable()) {
        let Some(cropped) = crop_region(image, region.box_2d) else {
            warn!(
                "Page {}: skipping empty {} box {:?} for question {}",
                page.page_num,
                region.label.as_str(),
                region.box_2d,
                region.question_number
            );
            continue;
        };

        let base = crop_file_name(page.page_num, region, 1);
        let occurrence = seen
            .entry(base)
            .and_modify(|n| *n += 1)
            .or_insert(1);
        let file_name = crop_file_name(page.page_num, region, *occurrence);

        let png = encode_png(&cropped)
            .map_err(|e| ExamError::Internal(format!("encode crop {file_name}: {e}")))?;
        let key = join_key(&[folder, &file_name]);
        let url = store.put(&key, png, "image/png").await?;

        crops.entry(region.question_number).or_default().push(ImageRef {
            label: region.label.as_str().to_string(),
            original_path: file_name,
            url,
            box_2d: region.box_2d,
        });
    }

    let uploaded: usize = crops.values().map(Vec::len).sum();
    if uploaded > 0 {
        info!("Page {}: uploaded {} figure crops", page.page_num, uploaded);
    }

    Ok(PageRegions { regions, crops })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalBlobStore;
    use crate::types::{ExtractedQuestion, RegionLabel};
    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};

    struct BoxesOnly(Vec<Region>);

    #[async_trait]
    impl VisionModel for BoxesOnly {
        async fn bounding_boxes(&self, _: &PageImage, _: &str) -> Result<Vec<Region>, ExamError> {
            Ok(self.0.clone())
        }
        async fn extract_questions(
            &self,
            _: &PageImage,
            _: &[Region],
            _: &str,
        ) -> Result<Vec<ExtractedQuestion>, ExamError> {
            Ok(Vec::new())
        }
        async fn complete(&self, _: &str, _: &str) -> Result<String, ExamError> {
            Ok(String::new())
        }
    }

    fn region(label: RegionLabel, box_2d: [u32; 4], qn: u32) -> Region {
        Region {
            label,
            box_2d,
            question_number: qn,
        }
    }

    #[test]
    fn rect_rescales_from_normalised_space() {
        assert_eq!(crop_rect([100, 200, 500, 600], 1000, 2000), Some((200, 200, 400, 800)));
        assert_eq!(crop_rect([0, 0, 1000, 1000], 850, 1100), Some((0, 0, 850, 1100)));
    }

    #[test]
    fn rect_clamps_to_image_bounds() {
        assert_eq!(crop_rect([900, 900, 1200, 1500], 100, 100), Some((90, 90, 10, 10)));
    }

    #[test]
    fn empty_or_inverted_rect_is_rejected() {
        assert_eq!(crop_rect([500, 500, 500, 600], 100, 100), None);
        assert_eq!(crop_rect([600, 100, 400, 200], 100, 100), None);
        assert_eq!(crop_rect([1000, 1000, 1200, 1200], 100, 100), None);
    }

    #[test]
    fn crop_has_expected_size() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(200, 100, Rgba([0, 0, 0, 255])));
        let out = crop_region(&img, [0, 0, 500, 500]).unwrap();
        assert_eq!((out.width(), out.height()), (100, 50));
    }

    #[tokio::test]
    async fn only_figures_are_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path(), "http://files");
        let model = BoxesOnly(vec![
            region(RegionLabel::Question, [0, 0, 100, 1000], 3),
            region(RegionLabel::Diagram, [100, 0, 400, 500], 3),
            region(RegionLabel::Diagram, [400, 0, 700, 500], 3),
            region(RegionLabel::Graph, [100, 500, 400, 1000], 4),
            region(RegionLabel::AnswerKey, [900, 0, 1000, 1000], 4),
            region(RegionLabel::Diagram, [10, 10, 10, 10], 5),
        ]);
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(100, 100, Rgba([9, 9, 9, 255])));
        let page = PageImage {
            page_num: 2,
            png: Vec::new(),
            width: 100,
            height: 100,
        };

        let out = extract_regions(&model, &store, &page, &img, "AES_2019", "boxes")
            .await
            .unwrap();

        assert_eq!(out.regions.len(), 6);
        let q3: Vec<_> = out.crops[&3].iter().map(|r| r.original_path.as_str()).collect();
        assert_eq!(q3, vec!["2_diagram_3.png", "2_diagram_3_2.png"]);
        assert_eq!(out.crops[&4][0].url, "http://files/AES_2019/2_graph_4.png");
        assert!(!out.crops.contains_key(&5));
        assert!(dir.path().join("AES_2019/2_graph_4.png").is_file());
    }
}
