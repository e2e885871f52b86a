//! Slot-addressed flat vector index with exact nearest-neighbor search.
//!
//! Vectors live in dense, zero-based slots assigned monotonically on insert
//! and never reused within a process lifetime. Search is brute-force squared
//! Euclidean distance, which is exact and fast enough at the target corpus
//! scale (tens of thousands of advisors). The index persists to a pair of
//! files: an opaque vector-data file and a JSON mapping of slot positions to
//! advisor identifiers.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use mentor_core::error::MentorError;

/// A single hit returned from a vector search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Identifier of the matching advisor.
    pub advisor_id: String,
    /// Similarity score in (0, 1], derived from squared Euclidean distance
    /// as `1 / (1 + dist)`. Distance zero yields exactly 1.0.
    pub score: f32,
}

/// On-disk representation of the vector file.
#[derive(Serialize, Deserialize)]
struct VectorFileData {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
    retired: Vec<bool>,
}

#[derive(Debug)]
struct IndexState {
    dimension: usize,
    /// Slot position -> vector.
    vectors: Vec<Vec<f32>>,
    /// Slot position -> advisor identifier.
    slots: Vec<String>,
    /// Slots superseded by a later `add` for the same identifier. Retired
    /// slots stay allocated (slot numbering is never compacted in-process)
    /// but are skipped by `search`.
    retired: Vec<bool>,
    /// Latest live slot per advisor identifier.
    by_id: HashMap<String, usize>,
}

impl IndexState {
    fn empty(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            slots: Vec::new(),
            retired: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    fn push(&mut self, advisor_id: String, vector: Vec<f32>) {
        let slot = self.vectors.len();
        if let Some(previous) = self.by_id.insert(advisor_id.clone(), slot) {
            self.retired[previous] = true;
        }
        self.vectors.push(vector);
        self.slots.push(advisor_id);
        self.retired.push(false);
    }
}

/// In-memory vector index over advisor embeddings.
///
/// Thread-safe via an interior RwLock: searches run concurrently, while
/// `add`/`rebuild` take the write lock and `persist` snapshots under the
/// read lock, so a persisted pair of files is never half-mutated. Cloning
/// produces another handle to the same index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    state: Arc<RwLock<IndexState>>,
}

impl VectorIndex {
    /// Create a new empty index for vectors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(IndexState::empty(dimension))),
        }
    }

    /// The vector dimensionality this index accepts.
    pub fn dimension(&self) -> usize {
        self.state.read().map(|s| s.dimension).unwrap_or(0)
    }

    /// Append a vector for the given advisor at the next free slot.
    ///
    /// If the advisor already has a live slot, that slot is retired so that
    /// search reflects the latest embedding; the retired slot remains
    /// allocated until the next `rebuild` compacts the index.
    pub fn add(&self, advisor_id: &str, vector: Vec<f32>) -> Result<(), MentorError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| MentorError::Storage(format!("Index lock poisoned: {}", e)))?;

        if vector.len() != state.dimension {
            return Err(MentorError::Validation(format!(
                "Vector dimension {} does not match index dimension {}",
                vector.len(),
                state.dimension
            )));
        }

        state.push(advisor_id.to_string(), vector);
        Ok(())
    }

    /// Search for the `top_k` nearest live vectors to the query.
    ///
    /// Returns hits ordered by descending similarity. An empty index yields
    /// an empty result, and `top_k` is clamped to the number of live slots.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>, MentorError> {
        let state = self
            .state
            .read()
            .map_err(|e| MentorError::Storage(format!("Index lock poisoned: {}", e)))?;

        if query.len() != state.dimension {
            return Err(MentorError::Validation(format!(
                "Query dimension {} does not match index dimension {}",
                query.len(),
                state.dimension
            )));
        }

        let mut hits: Vec<SearchHit> = state
            .vectors
            .iter()
            .zip(state.slots.iter())
            .zip(state.retired.iter())
            .filter(|(_, &retired)| !retired)
            .map(|((vector, advisor_id), _)| {
                let dist: f32 = vector
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                SearchHit {
                    advisor_id: advisor_id.clone(),
                    score: 1.0 / (1.0 + dist),
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);

        Ok(hits)
    }

    /// Discard all existing slots and reconstruct from the supplied ordered
    /// sequence; entry *i* lands in slot *i*. A duplicate identifier later
    /// in the sequence retires the earlier slot.
    pub fn rebuild(&self, entries: Vec<(String, Vec<f32>)>) -> Result<(), MentorError> {
        let dimension = self.dimension();
        for (advisor_id, vector) in &entries {
            if vector.len() != dimension {
                return Err(MentorError::Validation(format!(
                    "Vector dimension {} for {} does not match index dimension {}",
                    vector.len(),
                    advisor_id,
                    dimension
                )));
            }
        }

        let mut fresh = IndexState::empty(dimension);
        for (advisor_id, vector) in entries {
            fresh.push(advisor_id, vector);
        }
        let count = fresh.vectors.len();

        let mut state = self
            .state
            .write()
            .map_err(|e| MentorError::Storage(format!("Index lock poisoned: {}", e)))?;
        *state = fresh;

        info!(vectors = count, "Rebuilt vector index");
        Ok(())
    }

    /// Serialize the index to its paired files: the opaque vector-data file
    /// and the JSON slot-to-identifier mapping. Both are written under one
    /// lock hold so the pair is snapshot-consistent.
    pub fn persist(&self, vectors_path: &Path, mapping_path: &Path) -> Result<(), MentorError> {
        let state = self
            .state
            .read()
            .map_err(|e| MentorError::Storage(format!("Index lock poisoned: {}", e)))?;

        for path in [vectors_path, mapping_path] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let data = VectorFileData {
            dimension: state.dimension,
            vectors: state.vectors.clone(),
            retired: state.retired.clone(),
        };
        let encoded = bincode::serialize(&data)
            .map_err(|e| MentorError::Serialization(e.to_string()))?;
        std::fs::write(vectors_path, encoded)?;

        let mapping: BTreeMap<String, String> = state
            .slots
            .iter()
            .enumerate()
            .map(|(slot, advisor_id)| (slot.to_string(), advisor_id.clone()))
            .collect();
        std::fs::write(mapping_path, serde_json::to_string(&mapping)?)?;

        info!(
            vectors = state.vectors.len(),
            path = %vectors_path.display(),
            "Persisted vector index"
        );
        Ok(())
    }

    /// Load an index from its paired files.
    ///
    /// Fails with `IndexCorruption` when either file cannot be decoded or
    /// the mapping's key count disagrees with the vector count.
    pub fn load(vectors_path: &Path, mapping_path: &Path) -> Result<Self, MentorError> {
        let encoded = std::fs::read(vectors_path)?;
        let data: VectorFileData = bincode::deserialize(&encoded)
            .map_err(|e| MentorError::IndexCorruption(format!("vector file: {}", e)))?;

        let mapping_raw = std::fs::read_to_string(mapping_path)?;
        let mapping: HashMap<String, String> = serde_json::from_str(&mapping_raw)
            .map_err(|e| MentorError::IndexCorruption(format!("mapping file: {}", e)))?;

        if mapping.len() != data.vectors.len() {
            return Err(MentorError::IndexCorruption(format!(
                "Mapping has {} entries but index holds {} vectors",
                mapping.len(),
                data.vectors.len()
            )));
        }
        if data.retired.len() != data.vectors.len() {
            return Err(MentorError::IndexCorruption(format!(
                "Retired flags cover {} of {} slots",
                data.retired.len(),
                data.vectors.len()
            )));
        }

        let mut slots = Vec::with_capacity(data.vectors.len());
        for slot in 0..data.vectors.len() {
            let advisor_id = mapping.get(&slot.to_string()).ok_or_else(|| {
                MentorError::IndexCorruption(format!("Mapping is missing slot {}", slot))
            })?;
            slots.push(advisor_id.clone());
        }

        let mut retired = data.retired;
        let mut by_id = HashMap::new();
        for (slot, advisor_id) in slots.iter().enumerate() {
            if retired[slot] {
                continue;
            }
            // At most one live slot per advisor; the later slot wins.
            if let Some(previous) = by_id.insert(advisor_id.clone(), slot) {
                retired[previous] = true;
            }
        }

        let count = data.vectors.len();
        let index = Self {
            state: Arc::new(RwLock::new(IndexState {
                dimension: data.dimension,
                vectors: data.vectors,
                slots,
                retired,
                by_id,
            })),
        };

        info!(vectors = count, "Loaded vector index");
        Ok(index)
    }

    /// Load an index, falling back to an empty one when the files are
    /// missing or unreadable. Callers that require non-empty state must
    /// verify the index size afterwards.
    pub fn load_or_empty(vectors_path: &Path, mapping_path: &Path, dimension: usize) -> Self {
        if !vectors_path.exists() {
            warn!(
                path = %vectors_path.display(),
                "Vector index file not found, starting with an empty index"
            );
            return Self::new(dimension);
        }

        match Self::load(vectors_path, mapping_path) {
            Ok(index) => index,
            Err(e) => {
                error!(error = %e, "Failed to load vector index, starting empty");
                Self::new(dimension)
            }
        }
    }

    /// Total number of slots, including retired ones. Equals the key count
    /// of a persisted mapping file.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.vectors.len()).unwrap_or(0)
    }

    /// Number of live (non-retired) slots.
    pub fn live_len(&self) -> usize {
        self.state
            .read()
            .map(|s| s.retired.iter().filter(|&&r| !r).count())
            .unwrap_or(0)
    }

    /// Return true if the index contains no vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
