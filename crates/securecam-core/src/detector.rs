//! YOLO face detector via ONNX Runtime.
//!
//! Decodes raw per-anchor output rows `[x, y, w, h, confidence, ...]` into
//! candidate boxes, then applies greedy NMS to keep the best non-overlapping
//! set. Decode and NMS are free functions so they can be tested without a
//! model file.

use crate::types::BoundingBox;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const YOLO_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_IOU_THRESHOLD: f32 = 0.4;
/// Minimum row width: [x, y, w, h, confidence]. Trailing values are ignored.
const MIN_ROW_LEN: usize = 5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — place the detection ONNX model under the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Construction-time detector configuration.
///
/// Thresholds are fixed per detector instance, not per call.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Square network input resolution.
    pub input_size: u32,
    /// Minimum confidence for a raw row to become a candidate; also the
    /// score floor re-applied during NMS.
    pub confidence_threshold: f32,
    /// IoU above which a lower-confidence box is suppressed.
    pub iou_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_size: YOLO_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

/// YOLO-based single-class face detector.
pub struct FaceDetector {
    session: Session,
    config: DetectorConfig,
}

impl FaceDetector {
    /// Load the face detection ONNX model with default thresholds.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        Self::load_with_config(model_path, DetectorConfig::default())
    }

    /// Load the face detection ONNX model with explicit thresholds.
    pub fn load_with_config(
        model_path: &str,
        config: DetectorConfig,
    ) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name().to_string()).collect::<Vec<_>>(),
            "loaded face detection model"
        );

        if session.outputs().is_empty() {
            return Err(DetectorError::InferenceFailed(
                "detection model exports no output tensors".to_string(),
            ));
        }

        Ok(Self { session, config })
    }

    /// Detect faces in an RGB image.
    ///
    /// Returns boxes in original-image pixel coordinates, sorted by
    /// confidence descending. Zero detections is `Ok(vec![])`, never an
    /// error; only backend failures propagate.
    pub fn detect(&mut self, img: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (img_w, img_h) = img.dimensions();
        let input = self.preprocess(img);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("raw output: {e}")))?;

        let row_len = shape.iter().last().copied().unwrap_or(0) as usize;
        if data.is_empty() || row_len < MIN_ROW_LEN {
            tracing::debug!(?shape, "detector produced an empty or malformed output tensor");
            return Ok(Vec::new());
        }
        let rows = data.len() / row_len;

        let candidates = decode(
            data,
            rows,
            row_len,
            img_w as f32,
            img_h as f32,
            self.config.confidence_threshold,
        );
        let keep = nms(
            &candidates,
            self.config.confidence_threshold,
            self.config.iou_threshold,
        );

        Ok(keep.into_iter().map(|i| candidates[i].clone()).collect())
    }

    /// Preprocess an RGB image into a NCHW float tensor.
    ///
    /// Stretch-resize to the square network input (no letterbox — the model
    /// was exported for plain resize), scale by 1/255. Frames decoded by the
    /// `image` crate are already in the RGB channel order the model expects.
    fn preprocess(&self, img: &RgbImage) -> Array4<f32> {
        let size = self.config.input_size;
        let resized = image::imageops::resize(img, size, size, FilterType::Triangle);

        let size = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }

        tensor
    }
}

/// Decode raw output rows into candidate boxes.
///
/// Each row is `[x, y, w, h, confidence, ...]` where x/y/w/h are the box
/// center and size as fractions of the original image (the stretch-resize in
/// preprocessing makes input fractions and original-image fractions
/// identical). Rows below `confidence_threshold` are discarded; trailing row
/// values beyond the first five are ignored (single-class face model, no
/// class scores to filter). Candidates are returned in row order, unfiltered
/// for overlap.
pub fn decode(
    data: &[f32],
    rows: usize,
    row_len: usize,
    img_w: f32,
    img_h: f32,
    confidence_threshold: f32,
) -> Vec<BoundingBox> {
    debug_assert!(row_len >= MIN_ROW_LEN);

    let mut candidates = Vec::new();

    for i in 0..rows {
        let off = i * row_len;
        if off + MIN_ROW_LEN > data.len() {
            break;
        }

        let confidence = data[off + 4];
        if confidence < confidence_threshold {
            continue;
        }

        candidates.push(BoundingBox {
            x: data[off] * img_w,
            y: data[off + 1] * img_h,
            width: data[off + 2] * img_w,
            height: data[off + 3] * img_h,
            confidence,
        });
    }

    candidates
}

/// Greedy Non-Maximum Suppression over candidate boxes.
///
/// Returns indices into `boxes` for the kept subset, in confidence-descending
/// order. The sort is stable, so equal-confidence boxes resolve to whichever
/// came first in the input. `score_floor` re-applies the confidence cutoff;
/// callers that already pre-filtered lose nothing.
pub fn nms(boxes: &[BoundingBox], score_floor: f32, iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len())
        .filter(|&i| boxes[i].confidence >= score_floor)
        .collect();
    order.sort_by(|&a, &b| {
        boxes[b]
            .confidence
            .partial_cmp(&boxes[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<usize> = Vec::new();
    for &idx in &order {
        let suppressed = keep
            .iter()
            .any(|&kept| iou(&boxes[kept], &boxes[idx]) > iou_threshold);
        if !suppressed {
            keep.push(idx);
        }
    }

    keep
}

/// Intersection-over-Union between two center-form boxes.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.left().max(b.left());
    let y1 = a.top().max(b.top());
    let x2 = a.right().min(b.right());
    let y2 = a.bottom().min(b.bottom());

    let inter_w = (x2 - x1).max(0.0);
    let inter_h = (y2 - y1).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = a.width * a.height;
    let area_b = b.width * b.height;
    let union_area = area_a + area_b - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
        }
    }

    /// One raw output row in the model's 6-wide layout (trailing landmark
    /// slot unused).
    fn row(x: f32, y: f32, w: f32, h: f32, conf: f32) -> [f32; 6] {
        [x, y, w, h, conf, 0.0]
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(50.0, 50.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_bbox(5.0, 5.0, 10.0, 10.0, 1.0);
        let b = make_bbox(25.0, 25.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(5.0, 5.0, 10.0, 10.0, 1.0);
        let b = make_bbox(10.0, 5.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        let expected = 50.0 / 150.0;
        assert!((iou(&a, &b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_iou_zero_area_boxes() {
        let a = make_bbox(5.0, 5.0, 0.0, 0.0, 1.0);
        let b = make_bbox(5.0, 5.0, 0.0, 0.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_decode_filters_below_threshold() {
        let data: Vec<f32> = [
            row(0.5, 0.5, 0.2, 0.2, 0.9),
            row(0.3, 0.3, 0.2, 0.2, 0.3),
        ]
        .concat();
        let boxes = decode(&data, 2, 6, 640.0, 480.0, 0.5);
        assert_eq!(boxes.len(), 1);
        assert!((boxes[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_scales_fractions_to_pixels() {
        let data = row(0.5, 0.5, 0.25, 0.5, 0.9);
        let boxes = decode(&data, 1, 6, 640.0, 480.0, 0.5);
        assert_eq!(boxes.len(), 1);
        assert!((boxes[0].x - 320.0).abs() < 1e-3);
        assert!((boxes[0].y - 240.0).abs() < 1e-3);
        assert!((boxes[0].width - 160.0).abs() < 1e-3);
        assert!((boxes[0].height - 240.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_empty_output() {
        let boxes = decode(&[], 0, 6, 640.0, 480.0, 0.5);
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_decode_ignores_trailing_row_values() {
        // 16-wide rows (box + score + landmarks) decode the same as 6-wide.
        let mut wide = vec![0.0f32; 16];
        wide[0] = 0.5;
        wide[1] = 0.5;
        wide[2] = 0.2;
        wide[3] = 0.2;
        wide[4] = 0.8;
        let boxes = decode(&wide, 1, 16, 100.0, 100.0, 0.5);
        assert_eq!(boxes.len(), 1);
        assert!((boxes[0].x - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_threshold_straddle_randomized() {
        // Property: every row strictly below the threshold is excluded, every
        // row at or above it is kept.
        let mut rng = rand::thread_rng();
        let threshold = 0.5f32;

        for _ in 0..100 {
            let n = 32usize;
            let mut data = Vec::with_capacity(n * 6);
            let mut expected = 0usize;
            for _ in 0..n {
                let conf: f32 = rng.gen_range(0.0..1.0);
                if conf >= threshold {
                    expected += 1;
                }
                data.extend_from_slice(&row(0.5, 0.5, 0.1, 0.1, conf));
            }
            let boxes = decode(&data, n, 6, 640.0, 480.0, threshold);
            assert_eq!(boxes.len(), expected);
            assert!(boxes.iter().all(|b| b.confidence >= threshold));
        }
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let boxes = vec![
            make_bbox(50.0, 50.0, 100.0, 100.0, 0.9),
            make_bbox(55.0, 55.0, 100.0, 100.0, 0.8),
            make_bbox(225.0, 225.0, 50.0, 50.0, 0.7),
        ];
        let keep = nms(&boxes, 0.5, 0.4);
        assert_eq!(keep, vec![0, 2]);
    }

    #[test]
    fn test_nms_no_suppression() {
        let boxes = vec![
            make_bbox(5.0, 5.0, 10.0, 10.0, 0.9),
            make_bbox(55.0, 55.0, 10.0, 10.0, 0.8),
        ];
        let keep = nms(&boxes, 0.5, 0.4);
        assert_eq!(keep.len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(&[], 0.5, 0.4).is_empty());
    }

    #[test]
    fn test_nms_applies_score_floor() {
        let boxes = vec![
            make_bbox(5.0, 5.0, 10.0, 10.0, 0.9),
            make_bbox(55.0, 55.0, 10.0, 10.0, 0.2),
        ];
        let keep = nms(&boxes, 0.5, 0.4);
        assert_eq!(keep, vec![0]);
    }

    #[test]
    fn test_nms_equal_confidence_first_seen_wins() {
        // Two fully overlapping boxes with identical confidence: the stable
        // sort keeps input order, so index 0 survives and index 1 is
        // suppressed.
        let boxes = vec![
            make_bbox(50.0, 50.0, 100.0, 100.0, 0.8),
            make_bbox(50.0, 50.0, 100.0, 100.0, 0.8),
        ];
        let keep = nms(&boxes, 0.5, 0.4);
        assert_eq!(keep, vec![0]);
    }

    #[test]
    fn test_nms_returns_subset_of_input_indices() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let n = rng.gen_range(0..20);
            let boxes: Vec<BoundingBox> = (0..n)
                .map(|_| {
                    make_bbox(
                        rng.gen_range(0.0..600.0),
                        rng.gen_range(0.0..400.0),
                        rng.gen_range(1.0..100.0),
                        rng.gen_range(1.0..100.0),
                        rng.gen_range(0.0..1.0),
                    )
                })
                .collect();
            let keep = nms(&boxes, 0.5, 0.4);
            assert!(keep.len() <= boxes.len());
            assert!(keep.iter().all(|&i| i < boxes.len()));
            // No index returned twice.
            let mut sorted = keep.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), keep.len());
        }
    }

    #[test]
    fn test_nms_output_sorted_by_confidence() {
        let boxes = vec![
            make_bbox(5.0, 5.0, 10.0, 10.0, 0.6),
            make_bbox(105.0, 105.0, 10.0, 10.0, 0.9),
            make_bbox(205.0, 205.0, 10.0, 10.0, 0.7),
        ];
        let keep = nms(&boxes, 0.5, 0.4);
        assert_eq!(keep, vec![1, 2, 0]);
    }

    #[test]
    fn test_decode_then_nms_overlapping_rows() {
        // Two nearly coincident raw rows above the confidence cutoff; only
        // the higher-confidence one survives the pipeline.
        let data: Vec<f32> = [
            row(0.50, 0.50, 0.40, 0.40, 0.7),
            row(0.51, 0.50, 0.40, 0.40, 0.9),
        ]
        .concat();
        let candidates = decode(&data, 2, 6, 640.0, 480.0, 0.5);
        assert_eq!(candidates.len(), 2);
        assert!(iou(&candidates[0], &candidates[1]) > 0.4);

        let keep = nms(&candidates, 0.5, 0.4);
        assert_eq!(keep.len(), 1);
        assert!((candidates[keep[0]].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_default_config_thresholds() {
        let config = DetectorConfig::default();
        assert_eq!(config.input_size, 640);
        assert!((config.confidence_threshold - 0.5).abs() < 1e-6);
        assert!((config.iou_threshold - 0.4).abs() < 1e-6);
    }
}
