use securecam_core::DetectorConfig;
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Directory holding the persisted store (index.bin + users.json).
    pub data_dir: PathBuf,
    /// Minimum detection confidence for a candidate box.
    pub confidence_threshold: f32,
    /// NMS IoU threshold.
    pub iou_threshold: f32,
    /// Squared-distance threshold for a positive identity match.
    pub match_threshold: f32,
}

impl Config {
    /// Load configuration from `SECURECAM_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("SECURECAM_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("models"));

        let data_dir = std::env::var("SECURECAM_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("securecam")
            });

        Self {
            model_dir,
            data_dir,
            confidence_threshold: env_f32("SECURECAM_CONFIDENCE_THRESHOLD", 0.5),
            iou_threshold: env_f32("SECURECAM_IOU_THRESHOLD", 0.4),
            match_threshold: env_f32(
                "SECURECAM_MATCH_THRESHOLD",
                securecam_core::DEFAULT_MATCH_THRESHOLD,
            ),
        }
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("yolov5s-face.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the face embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join("face_recognition_sface_2021dec.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Detector configuration assembled from the configured thresholds.
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
            ..DetectorConfig::default()
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
