//! # Compaction Module
//!
//! Implements **leveled compaction** for the LSM storage engine.
//!
//! L0 accumulates newly flushed, possibly key-overlapping SSTables. Once L0
//! grows past [`EngineConfig::l0_compaction_trigger`], every L0 file is
//! merged into L1. From L1 onward, each level holds disjoint, `min_key`-sorted
//! files; once a level's total size exceeds its budget (or one of its files
//! exhausts its seek allowance) a file from that level is merged into the
//! next, picking up every overlapping file already there.
//!
//! See [`leveled`] for the selection and merge algorithm.

pub mod leveled;

use crate::engine::{EngineConfig, LevelFile};
use crate::manifest::{FileMetaData, Manifest, ManifestError};
use crate::sstable::SSTableError;

// ------------------------------------------------------------------------------------------------
// CompactionStrategy trait
// ------------------------------------------------------------------------------------------------

/// A uniform interface for compaction strategies.
///
/// Each strategy receives the current per-level SSTable catalog, a mutable
/// manifest for atomic metadata updates, the data directory, and the engine
/// configuration. It returns:
///
/// - `Ok(Some(result))` — compaction was performed; the caller should
///   update in-memory state using [`CompactionResult`].
/// - `Ok(None)` — nothing to compact (thresholds not met, etc.).
pub trait CompactionStrategy {
    /// Execute one round of compaction, if the strategy's preconditions
    /// are met. Implementations must be idempotent — calling when there
    /// is nothing to do should simply return `Ok(None)`.
    fn compact(
        &self,
        levels: &[Vec<LevelFile>],
        manifest: &mut Manifest,
        data_dir: &str,
        config: &EngineConfig,
    ) -> Result<Option<CompactionResult>, CompactionError>;
}

// ------------------------------------------------------------------------------------------------
// CompactionStrategyType — config-level strategy selector
// ------------------------------------------------------------------------------------------------

/// Selects which compaction strategy family the engine should use.
///
/// Stored in [`EngineConfig`] and used by the engine to obtain the concrete
/// strategy implementation for [`Engine::maybe_compact`](crate::engine::Engine::maybe_compact).
///
/// # Example
///
/// ```rust
/// use aeternusdb::compaction::CompactionStrategyType;
///
/// let strategy = CompactionStrategyType::Leveled;
/// let _ = strategy.strategy();
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategyType {
    /// Leveled Compaction Strategy (LCS).
    ///
    /// Keeps write amplification and space amplification in check by
    /// maintaining exponentially-sized, disjoint levels above L0.
    Leveled,
}

impl CompactionStrategyType {
    /// Returns the concrete compaction strategy for this family.
    pub fn strategy(&self) -> Box<dyn CompactionStrategy> {
        match self {
            Self::Leveled => Box::new(leveled::LeveledCompaction),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Shared types
// ------------------------------------------------------------------------------------------------

/// Result of a compaction execution — enough information to update the
/// manifest and in-memory level catalog.
pub struct CompactionResult {
    /// SSTable IDs that were consumed (already removed from the manifest).
    pub removed_ids: Vec<u64>,

    /// SSTables produced by the compaction, each carrying its destination
    /// level. Empty when every input record was eliminated (e.g. a
    /// tombstone-only merge with `clear_beyond`).
    pub added: Vec<FileMetaData>,
}

// ------------------------------------------------------------------------------------------------
// Shared error type
// ------------------------------------------------------------------------------------------------

/// Unified error type for all compaction strategies.
#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
