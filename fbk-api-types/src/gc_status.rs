use serde::{Deserialize, Serialize};

/// Accounting produced by one garbage-collection pass (C12).
///
/// `removed_chunks`/`removed_bytes` describe what was actually deleted from
/// the pool; `missing_chunks` is the corruption signal from §4.12 step 6 —
/// digests that a surviving backup's hashset referenced but that were not
/// found anywhere in the pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GarbageCollectionStatus {
    pub upid: Option<String>,
    pub removed_chunks: u64,
    pub removed_bytes: u64,
    pub disk_chunks: u64,
    pub disk_bytes: u64,
    pub missing_chunks: u64,
}

impl GarbageCollectionStatus {
    pub fn new() -> Self {
        Self::default()
    }
}
