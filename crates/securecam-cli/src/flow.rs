//! Enrollment and recognition orchestration.
//!
//! Thin composition over the core pipeline: detect, crop, embed, then either
//! enroll into or search the embedding store. Per-image input errors are
//! reported and skipped; backend errors propagate.

use crate::annotate;
use securecam_core::{detector, recognizer, store};
use securecam_core::{EmbeddingStore, FaceDetector, FaceRecognizer};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("detector error: {0}")]
    Detector(#[from] detector::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] recognizer::RecognizerError),
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
    #[error("cannot read image {path}: {source}")]
    UnreadableImage {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("no face detected in {0}")]
    NoFaceDetected(PathBuf),
    #[error("frame source unavailable: {0}")]
    FrameSource(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Enroll one identity from one image: detect, take the highest-confidence
/// face, embed, insert.
pub fn enroll_image(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    store: &mut EmbeddingStore,
    id: i64,
    name: &str,
    path: &Path,
) -> Result<(), FlowError> {
    let img = image::open(path)
        .map_err(|source| FlowError::UnreadableImage {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();

    let faces = detector.detect(&img)?;
    // detect() orders by confidence descending, so the first box is the best.
    let face = faces
        .first()
        .ok_or_else(|| FlowError::NoFaceDetected(path.to_path_buf()))?;

    let embedding = recognizer.extract(&img, face)?;
    store.add_user(id, name, &embedding)?;

    tracing::info!(
        id,
        name,
        path = %path.display(),
        confidence = face.confidence,
        "enrolled"
    );
    Ok(())
}

/// Enroll one identity from a batch of images. A failure on one image is
/// reported and does not stop the batch. Returns the number of successful
/// enrollments.
pub fn enroll_images(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    store: &mut EmbeddingStore,
    id: i64,
    name: &str,
    images: &[PathBuf],
) -> usize {
    let mut enrolled = 0usize;
    for path in images {
        match enroll_image(detector, recognizer, store, id, name, path) {
            Ok(()) => enrolled += 1,
            Err(e) => tracing::error!(path = %path.display(), error = %e, "enrollment failed"),
        }
    }
    enrolled
}

/// Frame source: image files of a directory in sorted order. A missing or
/// empty directory is a resource acquisition failure, fatal to recognition.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, FlowError> {
    if !dir.is_dir() {
        return Err(FlowError::FrameSource(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("jpg" | "jpeg" | "png" | "bmp")
            )
        })
        .collect();
    frames.sort();

    if frames.is_empty() {
        return Err(FlowError::FrameSource(format!(
            "no image frames in {}",
            dir.display()
        )));
    }
    Ok(frames)
}

/// Run recognition over every frame in `frames_dir`: detect, embed and look
/// up each face, annotate the frame, and (optionally) write it to `out_dir`.
///
/// Unreadable frames are reported and skipped; a per-face embedding failure
/// leaves that face annotated as unknown. Detector backend failures abort
/// the run — a broken pipeline is not a "no face" outcome.
pub fn recognize_frames(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    store: &EmbeddingStore,
    frames_dir: &Path,
    out_dir: Option<&Path>,
    match_threshold: f32,
) -> Result<(), FlowError> {
    let frames = list_frames(frames_dir)?;
    if let Some(out) = out_dir {
        std::fs::create_dir_all(out)?;
    }
    let annotator = annotate::Annotator::default();
    tracing::info!(frames = frames.len(), dir = %frames_dir.display(), "recognition started");

    for path in &frames {
        let mut frame = match image::open(path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "skipping unreadable frame");
                continue;
            }
        };

        let faces = detector.detect(&frame)?;
        for face in &faces {
            let matched = match recognizer.extract(&frame, face) {
                Ok(embedding) => store.search_user(&embedding, match_threshold),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "embedding failed for face");
                    None
                }
            };

            let identity = matched.map(|id| {
                let name = store
                    .users()
                    .iter()
                    .find(|u| u.id == id)
                    .map(|u| u.name.clone())
                    .unwrap_or_else(|| "?".to_string());
                (id, name)
            });
            match &identity {
                Some((id, name)) => {
                    tracing::info!(path = %path.display(), id = *id, name = %name, "recognised");
                }
                None => {
                    tracing::info!(path = %path.display(), "unknown face");
                }
            }
            annotator.draw_detection(
                &mut frame,
                face,
                identity.as_ref().map(|(id, name)| (*id, name.as_str())),
            );
        }

        if let Some(out) = out_dir {
            let target = out.join(path.file_name().unwrap_or_default());
            if let Err(e) = frame.save(&target) {
                tracing::error!(path = %target.display(), error = %e, "failed to write annotated frame");
            }
        }
    }

    Ok(())
}
