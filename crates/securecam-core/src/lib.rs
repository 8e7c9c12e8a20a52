//! securecam-core — Face detection and recognition engine.
//!
//! YOLO-style face detection (raw-row decode + NMS), 128-dimensional face
//! embeddings via ONNX Runtime, and a flat nearest-neighbour store of
//! enrolled identities.

pub mod detector;
pub mod recognizer;
pub mod store;
pub mod types;

pub use detector::{DetectorConfig, FaceDetector};
pub use recognizer::{FaceRecognizer, EMBEDDING_DIM};
pub use store::{EmbeddingStore, UserRecord, DEFAULT_MATCH_THRESHOLD};
pub use types::{BoundingBox, Embedding};
