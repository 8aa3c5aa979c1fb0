use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{Config, IndexType};
use crate::error::{Error, Result};
use crate::fio::IoType;
use crate::index::INDEX_FILE_NAME;
use crate::segment::{
    encode_key_with_seq, segment_file_name, split_key_seq, LogRecord, RecordKind, Segment,
    MERGE_FINISHED_FILE_NAME, NON_TXN_SEQ, SEQ_NO_FILE_NAME,
};
use crate::store::{Store, LOCK_FILE_NAME};
use crate::util;

/// Key of the single record inside the merge-finished file; its value is
/// the first segment id the merge did not cover, in decimal.
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

/// The staging directory for merge output, a sibling of the store
/// directory.
pub(crate) fn merge_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!("{name}-merge"))
}

struct MergeFlagGuard<'a>(&'a AtomicBool);

impl Drop for MergeFlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Store {
    /// Rewrites every live record into a staging directory, dropping
    /// superseded versions and tombstones, and writes a hint file so the
    /// next open can skip replaying the merged portion. The output is
    /// adopted atomically at the next [`Store::open`]; a crash before the
    /// finished marker lands simply discards the staging directory.
    ///
    /// Writes keep flowing to the store while the merge runs. Fails with
    /// `MergeRatioUnreached` when reclaimable space is below the
    /// configured ratio and with `MergeInProgress` when a merge is
    /// already running.
    pub fn merge(&self) -> Result<()> {
        if self.merging.swap(true, Ordering::SeqCst) {
            return Err(Error::MergeInProgress);
        }
        let _guard = MergeFlagGuard(&self.merging);

        let total = util::dir_size(&self.config.dir)?;
        let reclaimable = self.state.read().unwrap().reclaimable;
        if total > 0 {
            let ratio = reclaimable as f32 / total as f32;
            if ratio < self.config.merge_ratio {
                tracing::debug!(ratio, threshold = self.config.merge_ratio, "merge skipped");
                return Err(Error::MergeRatioUnreached);
            }
            let live = total - reclaimable.min(total);
            if util::available_disk_size(&self.config.dir)? < live {
                return Err(Error::InsufficientDiskSpace);
            }
        }

        // Seal the active segment so the set of segments to merge is
        // fixed; writes resume into a fresh segment at or past the
        // boundary.
        let (boundary, to_merge) = {
            let mut state = self.state.write().unwrap();
            state.active.sync()?;
            let filled = Arc::clone(&state.active);
            let boundary = filled.id() + 1;
            state.sealed.insert(filled.id(), filled);
            state.active =
                Arc::new(Segment::open(&self.config.dir, boundary, IoType::Standard)?);
            let mut segments: Vec<Arc<Segment>> = state.sealed.values().cloned().collect();
            segments.sort_by_key(|s| s.id());
            (boundary, segments)
        };

        let merge_dir = merge_path(&self.config.dir);
        if merge_dir.exists() {
            fs::remove_dir_all(&merge_dir)?;
        }
        fs::create_dir_all(&merge_dir)?;

        // The staging store never needs a replay-free index or durability
        // per append; the finished marker below is the commit point.
        let merge_store = Store::open(
            Config::new(&merge_dir)
                .segment_size(self.config.segment_size)
                .sync_writes(false)
                .index_type(IndexType::BTree),
        )?;
        let hint = Segment::open_hint(&merge_dir)?;

        let mut rewritten = 0usize;
        for segment in &to_merge {
            let mut offset = 0u64;
            loop {
                let (record, size) = match segment.read_record(offset) {
                    Ok(v) => v,
                    Err(Error::EndOfSegment) => break,
                    Err(e) => return Err(e),
                };
                let (_, real_key) = split_key_seq(&record.key).ok_or_else(|| {
                    Error::DirectoryCorrupted(format!(
                        "record key without sequence prefix in segment {}",
                        segment.id()
                    ))
                })?;

                // Only the record the index still points at is live.
                let live = self.index.get(&real_key)?.is_some_and(|pos| {
                    pos.segment_id == segment.id() && pos.offset == offset
                });
                if live {
                    let clean = LogRecord {
                        key: encode_key_with_seq(&real_key, NON_TXN_SEQ),
                        value: record.value,
                        kind: RecordKind::Normal,
                    };
                    let pos = {
                        let mut merge_state = merge_store.state.write().unwrap();
                        merge_store.append_record(&mut merge_state, &clean)?
                    };
                    hint.write_hint_record(&real_key, &pos)?;
                    rewritten += 1;
                }
                offset += size as u64;
            }
        }

        hint.sync()?;
        merge_store.sync()?;
        drop(merge_store);

        // Written last: its presence is what makes the output adoptable.
        let finished = Segment::open_merge_finished(&merge_dir)?;
        finished.append(&crate::segment::encode_record(&LogRecord {
            key: MERGE_FINISHED_KEY.to_vec(),
            value: boundary.to_string().into_bytes(),
            kind: RecordKind::Normal,
        }))?;
        finished.sync()?;

        tracing::info!(
            boundary,
            segments = to_merge.len(),
            live_records = rewritten,
            "merge finished"
        );
        Ok(())
    }
}

/// Moves completed merge output into `dir`, or discards it when the
/// finished marker never landed. Called before any segment is opened.
pub(crate) fn adopt_merge_dir(dir: &Path) -> Result<()> {
    let merge_dir = merge_path(dir);
    if !merge_dir.is_dir() {
        return Ok(());
    }
    if !merge_dir.join(MERGE_FINISHED_FILE_NAME).exists() {
        tracing::warn!(dir = %merge_dir.display(), "discarding unfinished merge output");
        fs::remove_dir_all(&merge_dir)?;
        return Ok(());
    }

    let boundary = read_merge_boundary(&merge_dir)?;
    for id in 0..boundary {
        let path = segment_file_name(dir, id);
        if path.exists() {
            fs::remove_file(path)?;
        }
    }
    for entry in fs::read_dir(&merge_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        // The staging store's own bookkeeping files stay behind.
        if name == SEQ_NO_FILE_NAME || name == LOCK_FILE_NAME || name == INDEX_FILE_NAME {
            continue;
        }
        fs::rename(entry.path(), dir.join(name))?;
    }
    fs::remove_dir_all(&merge_dir)?;

    tracing::info!(boundary, "adopted merge output");
    Ok(())
}

/// The merge boundary recorded in `dir`'s finished marker, if one exists.
pub(crate) fn stored_merge_boundary(dir: &Path) -> Result<Option<u32>> {
    if !dir.join(MERGE_FINISHED_FILE_NAME).exists() {
        return Ok(None);
    }
    read_merge_boundary(dir).map(Some)
}

fn read_merge_boundary(dir: &Path) -> Result<u32> {
    let file = Segment::open_merge_finished(dir)?;
    let (record, _) = file.read_record(0)?;
    let text = std::str::from_utf8(&record.value)
        .map_err(|_| Error::DirectoryCorrupted("merge boundary is not UTF-8".into()))?;
    text.parse()
        .map_err(|_| Error::DirectoryCorrupted(format!("merge boundary holds '{text}'")))
}
