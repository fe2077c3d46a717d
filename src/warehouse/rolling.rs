// In: src/warehouse/rolling.rs

//! A sink that spreads whole groups over a sequence of warehouses.
//!
//! The threshold is only checked after a complete group has been appended, so a
//! warehouse may exceed it by at most one group, and a group never straddles two
//! warehouses.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};

use crate::block::{Block, Metadata};
use crate::config::{Threshold, WarehouseOptions};
use crate::error::BloarkError;
use crate::warehouse::format::{WarehouseSummary, WAREHOUSE_EXTENSION};
use crate::warehouse::writer::{partial_path_for, WarehouseWriter};

/// How the files produced by one unit are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Naming {
    /// `{stem}-0000.blrk`, `{stem}-0001.blrk`, ...
    Sequenced { stem: String },
    /// `{stem}.blrk` for the first file, `{stem}-r001.blrk`, ... for rollovers.
    Preserving { stem: String },
}

impl Naming {
    pub fn file_name(&self, seq: u32) -> String {
        match self {
            Naming::Sequenced { stem } => format!("{}-{:04}.{}", stem, seq, WAREHOUSE_EXTENSION),
            Naming::Preserving { stem } if seq == 0 => format!("{}.{}", stem, WAREHOUSE_EXTENSION),
            Naming::Preserving { stem } => {
                format!("{}-r{:03}.{}", stem, seq, WAREHOUSE_EXTENSION)
            }
        }
    }
}

/// Makes per-unit stems collision-free: stems shared by several units get the
/// unit's queue index appended.
pub fn unique_stems(bases: Vec<String>) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for base in &bases {
        *counts.entry(base.clone()).or_default() += 1;
    }
    bases
        .into_iter()
        .enumerate()
        .map(|(idx, base)| match counts.get(&base) {
            Some(n) if *n > 1 => format!("{}-{:05}", base, idx),
            _ => base,
        })
        .collect()
}

/// Writes groups into threshold-bounded warehouses inside one directory.
///
/// Output is all-or-nothing: unless `finish` succeeds, dropping the writer (on an
/// early return or while unwinding from a panic) removes every file it produced.
#[derive(Debug)]
pub struct RollingWriter {
    dir: PathBuf,
    naming: Naming,
    threshold: Threshold,
    options: WarehouseOptions,
    current: Option<WarehouseWriter>,
    next_seq: u32,
    finished: Vec<WarehouseSummary>,
    committed: bool,
}

impl RollingWriter {
    pub fn new(
        dir: impl Into<PathBuf>,
        naming: Naming,
        threshold: Threshold,
        options: WarehouseOptions,
    ) -> Self {
        Self {
            dir: dir.into(),
            naming,
            threshold,
            options,
            current: None,
            next_seq: 0,
            finished: Vec::new(),
            committed: false,
        }
    }

    /// Appends a complete group. Empty groups produce nothing.
    pub fn write_group(
        &mut self,
        key: &str,
        blocks: &[Block],
        group_metadata: Metadata,
    ) -> Result<(), BloarkError> {
        if blocks.is_empty() {
            return Ok(());
        }
        for block in blocks {
            self.append(block)?;
        }
        self.end_group(key, group_metadata)
    }

    /// Streams one block of the group currently being written.
    ///
    /// Never rolls over; callers must close the group with `end_group`.
    pub fn append(&mut self, block: &Block) -> Result<(), BloarkError> {
        let writer = match self.current.take() {
            Some(w) => w,
            None => self.open_next()?,
        };
        self.current.insert(writer).append(block)
    }

    /// Closes the group just streamed and rolls over if the threshold is met.
    pub fn end_group(&mut self, key: &str, group_metadata: Metadata) -> Result<(), BloarkError> {
        let Some(writer) = self.current.as_mut() else {
            return Ok(());
        };
        if !group_metadata.is_empty() {
            writer.set_group_metadata(key, group_metadata);
        }
        if self.threshold.is_met(writer.block_count(), writer.raw_bytes()) {
            self.roll()?;
        }
        Ok(())
    }

    fn open_next(&mut self) -> Result<WarehouseWriter, BloarkError> {
        let path = self.dir.join(self.naming.file_name(self.next_seq));
        self.next_seq += 1;
        WarehouseWriter::create(path, self.options)
    }

    fn roll(&mut self) -> Result<(), BloarkError> {
        if let Some(writer) = self.current.take() {
            let partial = partial_path_for(writer.path());
            let summary = match writer.finalize() {
                Ok(summary) => summary,
                Err(e) => {
                    remove_if_present(&partial)?;
                    return Err(e);
                }
            };
            log::debug!(
                "Rolled over {} after {} blocks",
                summary.path.display(),
                summary.block_count
            );
            self.finished.push(summary);
        }
        Ok(())
    }

    /// Finalizes the open warehouse, if any, and returns every file produced.
    ///
    /// If the last finalize fails, the earlier warehouses are removed as well.
    pub fn finish(mut self) -> Result<Vec<WarehouseSummary>, BloarkError> {
        self.roll()?;
        self.committed = true;
        Ok(mem::take(&mut self.finished))
    }

    /// Removes everything this writer produced, finalized or not.
    pub fn abort(mut self) -> Result<(), BloarkError> {
        self.committed = true;
        self.remove_outputs()
    }

    fn remove_outputs(&mut self) -> Result<(), BloarkError> {
        if let Some(writer) = self.current.take() {
            writer.discard()?;
        }
        for summary in self.finished.drain(..) {
            remove_if_present(&summary.path)?;
        }
        Ok(())
    }
}

impl Drop for RollingWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let produced = self.finished.len() + usize::from(self.current.is_some());
        if produced == 0 {
            return;
        }
        match self.remove_outputs() {
            Ok(()) => log::debug!(
                "Removed {} unfinished warehouses from {}",
                produced,
                self.dir.display()
            ),
            Err(e) => log::warn!(
                "Could not remove unfinished warehouses from {}: {}",
                self.dir.display(),
                e
            ),
        }
    }
}

fn remove_if_present(path: &Path) -> Result<(), BloarkError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
