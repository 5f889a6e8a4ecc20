//! Leveled compaction strategy.
//!
//! Selection priority, re-evaluated on every call to [`LeveledCompaction::compact`]:
//!
//! 1. L0 file count exceeds [`EngineConfig::l0_compaction_trigger`] → compact
//!    all of L0 into L1.
//! 2. The lowest level ℓ≥1 whose total size exceeds its budget
//!    ([`level_max_bytes`]) → compact its largest file into ℓ+1.
//! 3. Any file whose `allowed_seeks` has reached zero → seek-triggered
//!    compaction of that file into the next level.
//!
//! None of the above → `Ok(None)`.
//!
//! Once inputs are chosen, they're expanded with every overlapping file in
//! the destination level (and, for L0, every L0 file overlapping the
//! primary set, since L0 files may overlap each other). A single source
//! file with no destination overlap is a trivial version-edit-only move —
//! no rewrite. Otherwise the inputs are merged (newest first) and streamed
//! into one or more output files at the destination level, rolling at
//! `target_file_size`.


use std::fs;

use tracing::{info, warn};

use super::{CompactionError, CompactionResult, CompactionStrategy};
use crate::engine::utils::{MergeIterator, PointEntry, RangeTombstone, Record};
use crate::engine::{EngineConfig, LevelFile, SSTABLE_DIR};
use crate::manifest::{FileMetaData, Manifest, initial_allowed_seeks};
use crate::sstable;

/// Size budget for level `level`, given the base `target_file_size` (L1's
/// budget). Each level beyond L1 grows by 10x. L0 has no size budget — it's
/// governed purely by file count.
fn level_max_bytes(level: u32, target_file_size: u64) -> u64 {
    if level == 0 {
        return u64::MAX;
    }
    let mut bytes = target_file_size.max(1);
    for _ in 1..level {
        bytes = bytes.saturating_mul(10);
    }
    bytes
}

/// Bytewise range overlap test under the `[min, max]` inclusive convention
/// used by [`FileMetaData`].
fn overlaps(a_min: &[u8], a_max: &[u8], b_min: &[u8], b_max: &[u8]) -> bool {
    !(a_max < b_min || a_min > b_max)
}

fn key_range(files: &[&LevelFile]) -> (Vec<u8>, Vec<u8>) {
    let min_key = files
        .iter()
        .map(|f| &f.meta.min_key)
        .min()
        .cloned()
        .unwrap_or_default();
    let max_key = files
        .iter()
        .map(|f| &f.meta.max_key)
        .max()
        .cloned()
        .unwrap_or_default();
    (min_key, max_key)
}

/// Leveled compaction: merges L0 into L1 on file-count pressure, and
/// compacts overlapping file pairs between ℓ and ℓ+1 on size or seek
/// pressure for ℓ≥1.
pub struct LeveledCompaction;

impl CompactionStrategy for LeveledCompaction {
    fn compact(
        &self,
        levels: &[Vec<LevelFile>],
        manifest: &mut Manifest,
        data_dir: &str,
        config: &EngineConfig,
    ) -> Result<Option<CompactionResult>, CompactionError> {
        let max_level = config.max_levels.clamp(2, levels.len());

        if levels[0].len() >= config.l0_compaction_trigger {
            return self.compact_level(levels, 0, None, manifest, data_dir, config);
        }

        for level in 1..max_level.saturating_sub(1) {
            let total: u64 = levels[level].iter().map(|f| f.meta.file_size).sum();
            if total >= level_max_bytes(level as u32, config.target_file_size)
                && let Some(primary) = levels[level].iter().max_by_key(|f| f.meta.file_size)
            {
                return self.compact_level(
                    levels,
                    level,
                    Some(primary.meta.id),
                    manifest,
                    data_dir,
                    config,
                );
            }
        }

        for level in 0..max_level.saturating_sub(1) {
            if let Some(f) = levels[level].iter().find(|f| f.meta.allowed_seeks <= 0) {
                let seed = if level == 0 { None } else { Some(f.meta.id) };
                return self.compact_level(levels, level, seed, manifest, data_dir, config);
            }
        }

        Ok(None)
    }
}

impl LeveledCompaction {
    /// Compacts `source_level` into `source_level + 1`.
    ///
    /// `seed_id` names the single primary input file for levels ≥ 1; for L0
    /// (where files may overlap arbitrarily) `None` means "all of L0".
    fn compact_level(
        &self,
        levels: &[Vec<LevelFile>],
        source_level: usize,
        seed_id: Option<u64>,
        manifest: &mut Manifest,
        data_dir: &str,
        config: &EngineConfig,
    ) -> Result<Option<CompactionResult>, CompactionError> {
        let src_files = &levels[source_level];
        if src_files.is_empty() {
            return Ok(None);
        }

        let primary: Vec<&LevelFile> = if source_level == 0 {
            src_files.iter().collect()
        } else {
            match seed_id.and_then(|id| src_files.iter().find(|f| f.meta.id == id)) {
                Some(f) => vec![f],
                None => return Ok(None),
            }
        };

        let dest_level = (source_level + 1) as u32;
        let (min_key, max_key) = key_range(&primary);

        let next_files: Vec<&LevelFile> = levels
            .get(dest_level as usize)
            .map(|files| {
                files
                    .iter()
                    .filter(|f| overlaps(&f.meta.min_key, &f.meta.max_key, &min_key, &max_key))
                    .collect()
            })
            .unwrap_or_default();

        // Trivial move: single source file cleanly slots into the next
        // level without overlapping anything there.
        if source_level != 0 && primary.len() == 1 && next_files.is_empty() {
            let moved = FileMetaData {
                level: dest_level,
                ..primary[0].meta.clone()
            };
            let removed_ids = vec![moved.id];
            manifest.apply_compaction(vec![moved.clone()], removed_ids.clone())?;
            manifest.checkpoint()?;
            info!(
                id = moved.id,
                from = source_level,
                to = dest_level,
                "trivial level move"
            );
            return Ok(Some(CompactionResult {
                removed_ids,
                added: vec![moved],
            }));
        }

        // A file beyond the destination level that still overlaps this key
        // range means some shadowed data could still resurrect if we drop a
        // tombstone here — keep tombstones unless nothing deeper overlaps.
        let clear_beyond = ((dest_level as usize + 1)..levels.len())
            .all(|lvl| {
                levels[lvl]
                    .iter()
                    .all(|f| !overlaps(&f.meta.min_key, &f.meta.max_key, &min_key, &max_key))
            });

        let mut ordered: Vec<&LevelFile> = Vec::new();
        if source_level == 0 {
            let mut l0_sorted = primary;
            l0_sorted.sort_by(|a, b| b.meta.id.cmp(&a.meta.id));
            ordered.extend(l0_sorted);
        } else {
            ordered.extend(primary);
        }
        ordered.extend(next_files);

        let removed_ids: Vec<u64> = ordered.iter().map(|f| f.meta.id).collect();

        let mut iters: Vec<Box<dyn Iterator<Item = Record> + '_>> = Vec::new();
        for file in &ordered {
            let mut scan_end = file.meta.max_key.clone();
            scan_end.push(0xFF);
            iters.push(Box::new(file.sst.scan(&file.meta.min_key, &scan_end)?));
        }
        let merged = MergeIterator::new(iters);

        let added = Self::rewrite(merged, clear_beyond, dest_level, manifest, data_dir, config)?;

        if added.is_empty() {
            manifest.apply_compaction(Vec::new(), removed_ids.clone())?;
        } else {
            manifest.apply_compaction(added.clone(), removed_ids.clone())?;
        }
        manifest.checkpoint()?;

        for id in &removed_ids {
            let path = format!("{data_dir}/{SSTABLE_DIR}/sstable-{id}.sst");
            if let Err(e) = fs::remove_file(&path) {
                warn!(id, %e, "failed to remove old SSTable file during compaction");
            }
        }

        info!(
            source_level,
            dest_level,
            inputs = removed_ids.len(),
            outputs = added.len(),
            "leveled compaction applied"
        );

        Ok(Some(CompactionResult { removed_ids, added }))
    }

    /// Streams the merged input into one or more output SSTables at
    /// `dest_level`, deduplicating by key (keeping the first — i.e.
    /// newest — version seen) and rolling a new output once the current
    /// one reaches `target_file_size`.
    ///
    /// When `clear_beyond` holds, point and range tombstones are dropped
    /// since no deeper level can still hold data they would otherwise need
    /// to keep shadowed.
    fn rewrite(
        merged: MergeIterator<'_>,
        clear_beyond: bool,
        dest_level: u32,
        manifest: &mut Manifest,
        data_dir: &str,
        config: &EngineConfig,
    ) -> Result<Vec<FileMetaData>, CompactionError> {
        let mut added = Vec::new();
        let mut last_key: Option<Vec<u8>> = None;
        let mut out_points: Vec<PointEntry> = Vec::new();
        let mut out_ranges: Vec<RangeTombstone> = Vec::new();
        let mut out_bytes: u64 = 0;

        for record in merged {
            match record {
                Record::RangeDelete {
                    start,
                    end,
                    lsn,
                    timestamp,
                } => {
                    if !clear_beyond {
                        out_bytes += start.len() as u64 + end.len() as u64;
                        out_ranges.push(RangeTombstone {
                            start,
                            end,
                            lsn,
                            timestamp,
                        });
                    }
                }
                Record::Put {
                    key,
                    value,
                    lsn,
                    timestamp,
                } => {
                    if last_key.as_ref() == Some(&key) {
                        continue;
                    }
                    last_key = Some(key.clone());
                    out_bytes += key.len() as u64 + value.len() as u64;
                    out_points.push(PointEntry {
                        key,
                        value: Some(value),
                        lsn,
                        timestamp,
                    });
                }
                Record::Delete { key, lsn, timestamp } => {
                    if last_key.as_ref() == Some(&key) {
                        continue;
                    }
                    last_key = Some(key.clone());
                    if !clear_beyond {
                        out_bytes += key.len() as u64;
                        out_points.push(PointEntry {
                            key,
                            value: None,
                            lsn,
                            timestamp,
                        });
                    }
                }
            }

            if out_bytes >= config.target_file_size && !out_points.is_empty() {
                added.push(Self::flush_output(
                    &mut out_points,
                    &mut out_ranges,
                    dest_level,
                    manifest,
                    data_dir,
                )?);
                out_bytes = 0;
            }
        }

        if !out_points.is_empty() || !out_ranges.is_empty() {
            added.push(Self::flush_output(
                &mut out_points,
                &mut out_ranges,
                dest_level,
                manifest,
                data_dir,
            )?);
        }

        Ok(added)
    }

    fn flush_output(
        points: &mut Vec<PointEntry>,
        ranges: &mut Vec<RangeTombstone>,
        dest_level: u32,
        manifest: &mut Manifest,
        data_dir: &str,
    ) -> Result<FileMetaData, CompactionError> {
        let points = std::mem::take(points);
        let ranges = std::mem::take(ranges);

        let min_key = points
            .first()
            .map(|p| p.key.clone())
            .or_else(|| ranges.first().map(|r| r.start.clone()))
            .unwrap_or_default();
        let max_key = points
            .last()
            .map(|p| p.key.clone())
            .or_else(|| ranges.last().map(|r| r.end.clone()))
            .unwrap_or_default();
        let min_lsn = points
            .iter()
            .map(|p| p.lsn)
            .chain(ranges.iter().map(|r| r.lsn))
            .min()
            .unwrap_or(0);
        let max_lsn = points
            .iter()
            .map(|p| p.lsn)
            .chain(ranges.iter().map(|r| r.lsn))
            .max()
            .unwrap_or(0);

        let id = manifest.allocate_sst_id()?;
        let path = format!("{data_dir}/{SSTABLE_DIR}/sstable-{id}.sst");

        let pt_count = points.len();
        let rt_count = ranges.len();
        sstable::SstWriter::new(&path).build(
            points.into_iter(),
            pt_count,
            ranges.into_iter(),
            rt_count,
        )?;

        let file_size = fs::metadata(&path)?.len();

        Ok(FileMetaData {
            id,
            level: dest_level,
            path: path.into(),
            file_size,
            min_key,
            max_key,
            min_lsn,
            max_lsn,
            allowed_seeks: initial_allowed_seeks(file_size),
        })
    }
}
