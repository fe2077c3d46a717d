// In: src/warehouse/writer.rs

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};

use crate::block::{Block, Metadata};
use crate::codec::frame;
use crate::config::WarehouseOptions;
use crate::error::BloarkError;
use crate::warehouse::format::{
    BlockIndexEntry, GroupEntry, WarehouseFooter, WarehouseSummary, END_MAGIC, FORMAT_VERSION,
    HEADER_LEN, PARTIAL_EXTENSION, TRAILER_LEN, WAREHOUSE_MAGIC,
};

/// Append-only writer for a single warehouse.
///
/// Bytes go to `<path>.partial`; `finalize` writes the trailer and renames the file
/// into place, so readers only ever see complete warehouses under the final name.
/// Consuming `self` in `finalize` makes the writer unusable afterwards.
#[derive(Debug)]
pub struct WarehouseWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    partial_path: PathBuf,
    options: WarehouseOptions,
    blocks: Vec<BlockIndexEntry>,
    groups: Vec<GroupEntry>,
    /// Manually tracks the number of bytes written to the underlying file.
    bytes_written: u64,
    raw_bytes: u64,
    finalized: bool,
}

/// The in-progress path for a warehouse that will eventually live at `path`.
pub fn partial_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(PARTIAL_EXTENSION);
    PathBuf::from(name)
}

impl WarehouseWriter {
    /// Opens a new warehouse for append-only writing.
    ///
    /// Fails with `WarehouseExists` if `path` already holds a non-empty file and
    /// `options.overwrite` is not set.
    pub fn create(path: impl AsRef<Path>, options: WarehouseOptions) -> Result<Self, BloarkError> {
        let path = path.as_ref().to_path_buf();
        if let Ok(meta) = fs::metadata(&path) {
            if meta.len() > 0 && !options.overwrite {
                return Err(BloarkError::WarehouseExists(path));
            }
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let partial_path = partial_path_for(&path);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&partial_path)?;
        let mut writer = BufWriter::new(file);

        // Immediately write the header so our byte counter is accurate from the start.
        writer.write_all(WAREHOUSE_MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;

        log::debug!("Warehouse opened: {}", path.display());

        Ok(Self {
            writer,
            path,
            partial_path,
            options,
            blocks: Vec::new(),
            groups: Vec::new(),
            bytes_written: HEADER_LEN,
            raw_bytes: 0,
            finalized: false,
        })
    }

    /// Serializes and frames `block`, appends it and records it in the index.
    pub fn append(&mut self, block: &Block) -> Result<(), BloarkError> {
        let record = block.to_record_bytes()?;
        let framed = frame::encode(&record, self.options.compression, self.options.zstd_level)?;

        let entry = BlockIndexEntry {
            offset: self.bytes_written,
            frame_size: framed.len() as u64,
            raw_size: record.len() as u64,
        };
        self.writer.write_all(&framed)?;
        self.bytes_written += entry.frame_size;
        self.raw_bytes += entry.raw_size;

        let block_idx = self.blocks.len() as u64;
        self.blocks.push(entry);

        match self.groups.last_mut() {
            Some(run) if run.key == block.group => run.block_count += 1,
            _ => self.groups.push(GroupEntry {
                key: block.group.clone(),
                first_block: block_idx,
                block_count: 1,
                metadata: Metadata::new(),
            }),
        }
        Ok(())
    }

    /// Attaches group-level metadata to the most recent run of `key`.
    pub fn set_group_metadata(&mut self, key: &str, metadata: Metadata) {
        if let Some(run) = self.groups.iter_mut().rev().find(|g| g.key == key) {
            run.metadata = metadata;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_count(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// Uncompressed record bytes appended so far; what size thresholds look at.
    pub fn raw_bytes(&self) -> u64 {
        self.raw_bytes
    }

    /// Writes the index trailer, syncs, and atomically moves the file into place.
    pub fn finalize(mut self) -> Result<WarehouseSummary, BloarkError> {
        let footer = WarehouseFooter {
            writer_version: env!("CARGO_PKG_VERSION").to_string(),
            compression: self.options.compression,
            block_count: self.blocks.len() as u64,
            raw_bytes: self.raw_bytes,
            // Use `mem::take` for efficiency instead of `clone`.
            blocks: mem::take(&mut self.blocks),
            groups: mem::take(&mut self.groups),
        };
        let group_keys = footer.group_keys();

        let footer_bytes = serde_json::to_vec(&footer)?;
        let footer_len = footer_bytes.len() as u64;

        self.writer.write_all(&footer_bytes)?;
        self.writer.write_all(&footer_len.to_le_bytes())?;
        self.writer.write_all(END_MAGIC)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.bytes_written += footer_len + TRAILER_LEN;

        fs::rename(&self.partial_path, &self.path)?;
        self.finalized = true;

        log::debug!(
            "Warehouse finalized: {} ({} blocks, {} groups)",
            self.path.display(),
            footer.block_count,
            group_keys.len()
        );

        Ok(WarehouseSummary {
            path: self.path.clone(),
            block_count: footer.block_count,
            raw_bytes: footer.raw_bytes,
            file_bytes: self.bytes_written,
            group_keys,
        })
    }

    /// Abandons the warehouse and removes the partial file.
    pub fn discard(mut self) -> Result<(), BloarkError> {
        self.finalized = true;
        match fs::remove_file(&self.partial_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for WarehouseWriter {
    fn drop(&mut self) {
        if !self.finalized {
            // A crash leaves the same state behind; readers reject it.
            let _ = self.writer.flush();
            log::warn!(
                "Warehouse dropped before finalize, left unfinalized: {}",
                self.partial_path.display()
            );
        }
    }
}
