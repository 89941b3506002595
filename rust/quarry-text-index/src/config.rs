use quarry_block_pool::CHAR_BLOCK_SIZE;
use quarry_common::{Result, error::Error, verify_arg};
use serde::{Deserialize, Serialize};

/// Longest term (in UTF-16 code units) that fits into a char block together with
/// its terminator. Longer terms are skipped.
pub const MAX_TERM_LENGTH: usize = CHAR_BLOCK_SIZE - 1;

pub const DEFAULT_RAM_BUFFER_SIZE_MB: f64 = 16.0;

pub const DEFAULT_MAX_THREAD_STATES: usize = 8;

/// Settings of a [`DocumentWriter`](crate::DocumentWriter).
///
/// Every field has a default, so a JSON document only needs to mention the
/// settings it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Maximum number of indexing contexts used concurrently. Callers beyond this
    /// number wait for a context to become idle.
    pub max_thread_states: usize,
    /// RAM used by buffered postings before a flush is requested. `None` disables
    /// flushing by RAM usage.
    pub ram_buffer_size_mb: Option<f64>,
    /// Number of buffered documents that triggers a flush request.
    pub max_buffered_docs: Option<usize>,
    /// Number of buffered delete terms that triggers a flush request.
    pub max_buffered_delete_terms: Option<usize>,
    /// Longest indexed term in UTF-16 code units.
    pub max_term_length: usize,
    /// Maximum number of tokens indexed per field of one document.
    pub max_field_length: Option<usize>,
    /// Hard cap on pooled memory. Allocations beyond it fail and abort all
    /// buffered documents.
    pub hard_ram_limit_mb: Option<f64>,
    /// Added to the position between instances of a multi-valued field.
    pub position_increment_gap: u32,
    /// Added to the offset between instances of a multi-valued field.
    pub offset_gap: u32,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig {
            max_thread_states: DEFAULT_MAX_THREAD_STATES,
            ram_buffer_size_mb: Some(DEFAULT_RAM_BUFFER_SIZE_MB),
            max_buffered_docs: None,
            max_buffered_delete_terms: None,
            max_term_length: MAX_TERM_LENGTH,
            max_field_length: None,
            hard_ram_limit_mb: None,
            position_increment_gap: 0,
            offset_gap: 1,
        }
    }
}

impl IndexerConfig {
    pub fn from_json(json: &str) -> Result<IndexerConfig> {
        let config: IndexerConfig = serde_json::from_str(json)
            .map_err(|e| Error::invalid_arg("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::invalid_arg("config", e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        verify_arg!(max_thread_states, self.max_thread_states > 0);
        verify_arg!(
            ram_buffer_size_mb,
            self.ram_buffer_size_mb.is_none_or(|mb| mb > 0.0)
        );
        verify_arg!(max_buffered_docs, self.max_buffered_docs != Some(0));
        verify_arg!(
            max_buffered_delete_terms,
            self.max_buffered_delete_terms != Some(0)
        );
        verify_arg!(
            max_term_length,
            self.max_term_length > 0 && self.max_term_length <= MAX_TERM_LENGTH
        );
        verify_arg!(max_field_length, self.max_field_length != Some(0));
        verify_arg!(
            hard_ram_limit_mb,
            self.hard_ram_limit_mb.is_none_or(|mb| mb > 0.0)
        );
        Ok(())
    }

    pub fn ram_buffer_bytes(&self) -> Option<u64> {
        self.ram_buffer_size_mb.map(mb_to_bytes)
    }

    pub fn hard_ram_limit_bytes(&self) -> Option<u64> {
        self.hard_ram_limit_mb.map(mb_to_bytes)
    }
}

fn mb_to_bytes(mb: f64) -> u64 {
    (mb * 1024.0 * 1024.0) as u64
}
