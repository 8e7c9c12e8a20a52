//! Face embedding extractor via ONNX Runtime.
//!
//! Crops a detected face out of the source frame, resizes it to the
//! recognition input size and runs the embedding model, producing an
//! L2-normalised 128-dimensional vector.

use crate::types::{BoundingBox, Embedding};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMBED_INPUT_SIZE: u32 = 112;
/// Fixed embedding dimension produced by the recognition model.
pub const EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — place the embedding ONNX model under the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box does not intersect the frame")]
    FaceOutsideFrame,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Face embedding extractor.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the face embedding ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name().to_string()).collect::<Vec<_>>(),
            "loaded face embedding model"
        );

        ensure_model_outputs(session.outputs().len())?;

        Ok(Self { session })
    }

    /// Extract an embedding for one detected face.
    ///
    /// The box is clamped to the frame before cropping, so detections that
    /// hang off a frame edge still embed from the visible part. A box that
    /// misses the frame entirely is an error.
    pub fn extract(
        &mut self,
        img: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let (frame_w, frame_h) = img.dimensions();
        let (x, y, w, h) = face
            .pixel_rect(frame_w, frame_h)
            .ok_or(RecognizerError::FaceOutsideFrame)?;

        let crop = image::imageops::crop_imm(img, x, y, w, h).to_image();
        let face_img = image::imageops::resize(
            &crop,
            EMBED_INPUT_SIZE,
            EMBED_INPUT_SIZE,
            FilterType::Triangle,
        );

        let input = Self::preprocess(&face_img);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalise so downstream distances are scale-free.
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values: Vec<f32> = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw.to_vec()
        };

        Ok(Embedding { values })
    }

    /// Cosine similarity between two embeddings, exposed for diagnostics.
    /// The embedding store matches on squared Euclidean distance instead.
    pub fn compare(a: &Embedding, b: &Embedding) -> f32 {
        a.similarity(b)
    }

    /// Preprocess a 112x112 RGB face crop into a NCHW float tensor (1/255).
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let size = EMBED_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in face.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }

        tensor
    }
}

/// A model exporting no output tensors cannot produce an embedding; reject
/// it at load time instead of at the first `extract`.
fn ensure_model_outputs(output_count: usize) -> Result<(), RecognizerError> {
    if output_count == 0 {
        return Err(RecognizerError::InferenceFailed(
            "embedding model exports no output tensors".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_face(value: u8) -> RgbImage {
        RgbImage::from_pixel(EMBED_INPUT_SIZE, EMBED_INPUT_SIZE, image::Rgb([value; 3]))
    }

    #[test]
    fn test_preprocess_output_shape() {
        let tensor = FaceRecognizer::preprocess(&gray_face(128));
        assert_eq!(
            tensor.shape(),
            &[1, 3, EMBED_INPUT_SIZE as usize, EMBED_INPUT_SIZE as usize]
        );
    }

    #[test]
    fn test_preprocess_normalization() {
        let tensor = FaceRecognizer::preprocess(&gray_face(255));
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);

        let tensor = FaceRecognizer::preprocess(&gray_face(0));
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
    }

    #[test]
    fn test_preprocess_channel_layout() {
        let mut img = gray_face(0);
        img.put_pixel(3, 7, image::Rgb([255, 128, 0]));
        let tensor = FaceRecognizer::preprocess(&img);
        assert!((tensor[[0, 0, 7, 3]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 7, 3]] - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(tensor[[0, 2, 7, 3]], 0.0);
    }

    #[test]
    fn test_degenerate_model_rejected_at_load() {
        assert!(matches!(
            ensure_model_outputs(0),
            Err(RecognizerError::InferenceFailed(_))
        ));
        assert!(ensure_model_outputs(1).is_ok());
    }

    #[test]
    fn test_compare_is_cosine() {
        let a = Embedding { values: vec![1.0, 0.0] };
        let b = Embedding { values: vec![0.0, 1.0] };
        assert!(FaceRecognizer::compare(&a, &b).abs() < 1e-6);
        assert!((FaceRecognizer::compare(&a, &a) - 1.0).abs() < 1e-6);
    }
}
