use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in center form.
///
/// `x`/`y` are the box center in pixel coordinates of the source image;
/// `width`/`height` are the full box extent. Corners are derived on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Left edge (top-left corner x).
    pub fn left(&self) -> f32 {
        self.x - self.width / 2.0
    }

    /// Top edge (top-left corner y).
    pub fn top(&self) -> f32 {
        self.y - self.height / 2.0
    }

    /// Right edge (bottom-right corner x).
    pub fn right(&self) -> f32 {
        self.x + self.width / 2.0
    }

    /// Bottom edge (bottom-right corner y).
    pub fn bottom(&self) -> f32 {
        self.y + self.height / 2.0
    }

    /// Integer pixel rectangle `(x, y, w, h)` clamped to a `frame_w` × `frame_h`
    /// image, for cropping. Returns `None` when the box does not intersect the
    /// frame at all.
    pub fn pixel_rect(&self, frame_w: u32, frame_h: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.left().max(0.0) as u32;
        let y0 = self.top().max(0.0) as u32;
        let x1 = (self.right().min(frame_w as f32)).max(0.0) as u32;
        let y1 = (self.bottom().min(frame_h as f32)).max(0.0) as u32;

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Face embedding vector (128-dimensional in this system).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity between two embeddings, in [-1, 1]. Higher = more
    /// similar. Diagnostic only: the embedding store matches on squared
    /// Euclidean distance, not on this.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}
