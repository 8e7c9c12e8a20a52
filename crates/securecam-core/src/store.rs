//! Enrolled-identity store: a flat nearest-neighbour index over face
//! embeddings plus the parallel list of user records.
//!
//! Row *i* of the index always corresponds to record *i*; `add_user` is the
//! only writer and appends to both. `&mut self` makes a torn update
//! unrepresentable without external aliasing, so no internal locking is
//! needed for the single-threaded pipeline.

use crate::recognizer::EMBEDDING_DIM;
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

const INDEX_FILE: &str = "index.bin";
const USERS_FILE: &str = "users.json";
const INDEX_MAGIC: &[u8; 4] = b"SCIX";
const INDEX_FORMAT_VERSION: u32 = 1;
/// Magic + version + dim + row count.
const INDEX_HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Default squared-distance threshold for a positive identity match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("embedding dimension mismatch: store expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("store file corrupt: {0}")]
    Corrupt(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("user metadata: {0}")]
    Json(#[from] serde_json::Error),
}

/// An enrolled identity. Ids are caller-assigned and not required to be
/// unique; lookups resolve duplicates as first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
}

/// Exact (non-approximate) nearest-neighbour index: contiguous row storage,
/// squared Euclidean distance, insertion order preserved.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dim: usize) -> Self {
        Self { dim, data: Vec::new() }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append one row. The caller has already validated the dimension.
    fn add(&mut self, vector: &[f32]) {
        debug_assert_eq!(vector.len(), self.dim);
        self.data.extend_from_slice(vector);
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// 1-NN search: the row with the smallest squared Euclidean distance to
    /// `query`, with its distance. Ties resolve to the earliest row. `None`
    /// on an empty index.
    pub fn search(&self, query: &[f32]) -> Option<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;

        for i in 0..self.len() {
            let dist: f32 = self
                .row(i)
                .iter()
                .zip(query.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            match best {
                Some((_, best_dist)) if dist >= best_dist => {}
                _ => best = Some((i, dist)),
            }
        }

        best
    }
}

/// Store of enrolled identities with threshold-gated nearest-neighbour
/// lookup and file persistence.
#[derive(Debug)]
pub struct EmbeddingStore {
    index: FlatIndex,
    users: Vec<UserRecord>,
}

impl Default for EmbeddingStore {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

impl EmbeddingStore {
    pub fn new(dim: usize) -> Self {
        Self {
            index: FlatIndex::new(dim),
            users: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.index.dim()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn users(&self) -> &[UserRecord] {
        &self.users
    }

    /// Enroll an identity: append the record and its index row together.
    ///
    /// No duplicate-id check — re-enrolling an id adds another row, and
    /// lookups return the first (nearest) match. Uniqueness is the caller's
    /// policy.
    pub fn add_user(
        &mut self,
        id: i64,
        name: &str,
        embedding: &Embedding,
    ) -> Result<(), StoreError> {
        if embedding.dim() != self.index.dim() {
            return Err(StoreError::DimensionMismatch {
                expected: self.index.dim(),
                got: embedding.dim(),
            });
        }

        self.index.add(&embedding.values);
        self.users.push(UserRecord {
            id,
            name: name.to_string(),
        });

        tracing::debug!(id, name, enrolled = self.users.len(), "user enrolled");
        Ok(())
    }

    /// Nearest enrolled row for a query embedding, with its squared distance.
    /// `None` on an empty store or a wrong-dimension query.
    pub fn nearest(&self, embedding: &Embedding) -> Option<(usize, f32)> {
        if self.users.is_empty() {
            return None;
        }
        if embedding.dim() != self.index.dim() {
            tracing::warn!(
                expected = self.index.dim(),
                got = embedding.dim(),
                "query embedding has wrong dimension; treating as no match"
            );
            return None;
        }
        self.index.search(&embedding.values)
    }

    /// Identity lookup: the nearest neighbour's id iff its squared distance
    /// is strictly below `threshold`. Only k=1 is ever considered. An empty
    /// store answers `None` without searching the index.
    pub fn search_user(&self, embedding: &Embedding, threshold: f32) -> Option<i64> {
        let (row, dist) = self.nearest(embedding)?;
        if dist < threshold {
            Some(self.users[row].id)
        } else {
            None
        }
    }

    /// Whether a persisted store exists under `dir`.
    pub fn exists_at(dir: &Path) -> bool {
        dir.join(INDEX_FILE).exists()
    }

    /// Persist the store into `dir` as `index.bin` (raw vector rows) plus
    /// `users.json` (id/name metadata).
    pub fn save(&self, dir: &Path) -> Result<(), StoreError> {
        std::fs::create_dir_all(dir)?;

        let mut w = BufWriter::new(File::create(dir.join(INDEX_FILE))?);
        w.write_all(INDEX_MAGIC)?;
        w.write_all(&INDEX_FORMAT_VERSION.to_le_bytes())?;
        w.write_all(&(self.index.dim() as u32).to_le_bytes())?;
        w.write_all(&(self.index.len() as u64).to_le_bytes())?;
        for value in &self.index.data {
            w.write_all(&value.to_le_bytes())?;
        }
        w.flush()?;

        let users_file = BufWriter::new(File::create(dir.join(USERS_FILE))?);
        serde_json::to_writer_pretty(users_file, &self.users)?;

        tracing::info!(path = %dir.display(), users = self.users.len(), "store saved");
        Ok(())
    }

    /// Load a store persisted by [`save`](Self::save). Both files are
    /// required and their counts must agree; vector data round-trips
    /// bit-for-bit, so reloaded distances match pre-save distances exactly.
    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let mut r = BufReader::new(File::open(dir.join(INDEX_FILE))?);

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != INDEX_MAGIC {
            return Err(StoreError::Corrupt("bad index magic".to_string()));
        }

        let mut buf4 = [0u8; 4];
        r.read_exact(&mut buf4)?;
        let version = u32::from_le_bytes(buf4);
        if version != INDEX_FORMAT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported index format version {version}"
            )));
        }

        r.read_exact(&mut buf4)?;
        let dim = u32::from_le_bytes(buf4) as usize;
        if dim == 0 {
            return Err(StoreError::Corrupt("index dimension is zero".to_string()));
        }

        let mut buf8 = [0u8; 8];
        r.read_exact(&mut buf8)?;
        let count = u64::from_le_bytes(buf8) as usize;

        // Validate the declared payload against the actual file size before
        // trusting it with an allocation.
        let payload_len = count
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(std::mem::size_of::<f32>()))
            .ok_or_else(|| StoreError::Corrupt("index row count overflows".to_string()))?;
        let file_len = std::fs::metadata(dir.join(INDEX_FILE))?.len();
        if file_len != (INDEX_HEADER_LEN + payload_len) as u64 {
            return Err(StoreError::Corrupt(format!(
                "index header declares {count} rows of dim {dim} but the file holds {file_len} bytes"
            )));
        }

        let mut data = Vec::with_capacity(count * dim);
        for _ in 0..count * dim {
            r.read_exact(&mut buf4)?;
            data.push(f32::from_le_bytes(buf4));
        }

        let users_file = BufReader::new(File::open(dir.join(USERS_FILE))?);
        let users: Vec<UserRecord> = serde_json::from_reader(users_file)?;

        if users.len() != count {
            return Err(StoreError::Corrupt(format!(
                "index has {count} rows but metadata has {} users",
                users.len()
            )));
        }

        tracing::info!(path = %dir.display(), users = users.len(), "store loaded");
        Ok(Self {
            index: FlatIndex { dim, data },
            users,
        })
    }
}
