use serde::{Deserialize, Serialize};

/// Deduplication savings, derived from live handles and objects
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DedupStats {
    /// Bytes actually stored across distinct live objects
    pub total_deduped_bytes: i64,
    /// Bytes that would be stored if every upload kept its own copy
    pub original_bytes: i64,
    pub saved_bytes: i64,
    pub saved_percent: f64,
}

impl DedupStats {
    pub fn from_totals(original_bytes: i64, deduped_bytes: i64) -> Self {
        let saved_bytes = original_bytes - deduped_bytes;
        let saved_percent = if original_bytes > 0 {
            (saved_bytes as f64 / original_bytes as f64 * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };

        Self {
            total_deduped_bytes: deduped_bytes,
            original_bytes,
            saved_bytes,
            saved_percent,
        }
    }
}
