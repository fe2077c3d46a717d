// In: src/warehouse/reader.rs

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::block::Block;
use crate::codec::frame;
use crate::error::BloarkError;
use crate::warehouse::format::{
    GroupEntry, WarehouseFooter, END_MAGIC, FORMAT_VERSION, HEADER_LEN, MAX_FOOTER_LEN,
    TRAILER_LEN, WAREHOUSE_MAGIC,
};

/// Reader over a finalized warehouse.
///
/// `open` validates the header, the trailer and every index entry before returning,
/// so all later failures are about damaged frames, never about the layout.
#[derive(Debug)]
pub struct WarehouseReader<R: Read + Seek = BufReader<File>> {
    source: R,
    path: PathBuf,
    footer: WarehouseFooter,
}

impl WarehouseReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BloarkError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::from_reader(path, BufReader::new(file))
    }
}

impl<R: Read + Seek> WarehouseReader<R> {
    /// Wraps any seekable source; `path` is only used for error reporting.
    pub fn from_reader(path: impl Into<PathBuf>, mut source: R) -> Result<Self, BloarkError> {
        let path = path.into();
        let file_len = source.seek(SeekFrom::End(0))?;
        if file_len < HEADER_LEN + TRAILER_LEN {
            return Err(BloarkError::corrupt(
                &path,
                format!("file too short ({} bytes) to be a warehouse", file_len),
            ));
        }

        // --- Header ---
        let mut header = [0u8; HEADER_LEN as usize];
        source.seek(SeekFrom::Start(0))?;
        source.read_exact(&mut header)?;
        if &header[0..4] != WAREHOUSE_MAGIC {
            return Err(BloarkError::corrupt(&path, "invalid magic number"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != FORMAT_VERSION {
            return Err(BloarkError::corrupt(
                &path,
                format!("unsupported format version {}", version),
            ));
        }

        // --- Trailer ---
        let mut trailer = [0u8; TRAILER_LEN as usize];
        source.seek(SeekFrom::End(-(TRAILER_LEN as i64)))?;
        source.read_exact(&mut trailer)?;
        if &trailer[8..16] != END_MAGIC {
            return Err(BloarkError::corrupt(
                &path,
                "missing end marker (unfinalized or truncated)",
            ));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&trailer[0..8]);
        let footer_len = u64::from_le_bytes(len_bytes);
        let max_footer = file_len - HEADER_LEN - TRAILER_LEN;
        if footer_len > max_footer || footer_len > MAX_FOOTER_LEN {
            return Err(BloarkError::corrupt(
                &path,
                format!("footer length {} out of bounds", footer_len),
            ));
        }
        let footer_start = file_len - TRAILER_LEN - footer_len;

        // --- Footer ---
        let mut footer_bytes = vec![0u8; footer_len as usize];
        source.seek(SeekFrom::Start(footer_start))?;
        source.read_exact(&mut footer_bytes)?;
        let footer: WarehouseFooter = serde_json::from_slice(&footer_bytes)
            .map_err(|e| BloarkError::corrupt(&path, format!("unreadable footer: {}", e)))?;

        validate_index(&path, &footer, footer_start)?;

        Ok(Self {
            source,
            path,
            footer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn footer(&self) -> &WarehouseFooter {
        &self.footer
    }

    pub fn groups(&self) -> &[GroupEntry] {
        &self.footer.groups
    }

    pub fn len(&self) -> usize {
        self.footer.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.footer.blocks.is_empty()
    }

    /// Random access to one block using only its index entry.
    pub fn read_block(&mut self, index: usize) -> Result<Block, BloarkError> {
        let entry = self.footer.blocks.get(index).cloned().ok_or_else(|| {
            BloarkError::corrupt(
                &self.path,
                format!("block {} out of range ({} blocks)", index, self.len()),
            )
        })?;
        self.source.seek(SeekFrom::Start(entry.offset))?;
        self.decode_next(index, entry.frame_size, entry.raw_size)
    }

    /// Forward-only, single-pass iteration over every block in storage order.
    pub fn blocks(self) -> BlockIter<R> {
        BlockIter {
            reader: self,
            next: 0,
            positioned: false,
            failed: false,
        }
    }

    fn decode_next(
        &mut self,
        index: usize,
        frame_size: u64,
        raw_size: u64,
    ) -> Result<Block, BloarkError> {
        let mut framed = vec![0u8; frame_size as usize];
        self.source.read_exact(&mut framed)?;
        let record = frame::decode(&framed, self.footer.compression, raw_size).map_err(|e| {
            BloarkError::corrupt(&self.path, format!("block {}: {}", index, e))
        })?;
        Block::from_record_bytes(&record).map_err(|e| {
            BloarkError::corrupt(&self.path, format!("block {} record: {}", index, e))
        })
    }
}

/// Checks every index entry against the physical layout before any block is read.
fn validate_index(path: &Path, footer: &WarehouseFooter, data_end: u64) -> Result<(), BloarkError> {
    if footer.block_count != footer.blocks.len() as u64 {
        return Err(BloarkError::corrupt(
            path,
            format!(
                "footer declares {} blocks but indexes {}",
                footer.block_count,
                footer.blocks.len()
            ),
        ));
    }

    let raw_total = footer
        .blocks
        .iter()
        .try_fold(0u64, |acc, entry| acc.checked_add(entry.raw_size));
    if raw_total != Some(footer.raw_bytes) {
        return Err(BloarkError::corrupt(
            path,
            format!("block sizes do not add up to {} raw bytes", footer.raw_bytes),
        ));
    }

    let mut expected_offset = HEADER_LEN;
    for (i, entry) in footer.blocks.iter().enumerate() {
        if entry.offset != expected_offset {
            return Err(BloarkError::corrupt(
                path,
                format!("block {} starts at {}, expected {}", i, entry.offset, expected_offset),
            ));
        }
        expected_offset = entry
            .offset
            .checked_add(entry.frame_size)
            .filter(|end| *end <= data_end)
            .ok_or_else(|| {
                BloarkError::corrupt(path, format!("block {} extends past the data region", i))
            })?;
    }
    if expected_offset != data_end {
        return Err(BloarkError::corrupt(
            path,
            "data region does not match the block index",
        ));
    }

    let mut covered = 0u64;
    for group in &footer.groups {
        if group.first_block != covered || group.block_count == 0 {
            return Err(BloarkError::corrupt(
                path,
                format!("group '{}' does not tile the block index", group.key),
            ));
        }
        covered += group.block_count;
    }
    if covered != footer.block_count {
        return Err(BloarkError::corrupt(
            path,
            format!("groups cover {} of {} blocks", covered, footer.block_count),
        ));
    }
    Ok(())
}

/// Lazily decodes blocks in storage order. Stops after the first error.
pub struct BlockIter<R: Read + Seek = BufReader<File>> {
    reader: WarehouseReader<R>,
    next: usize,
    positioned: bool,
    failed: bool,
}

impl<R: Read + Seek> BlockIter<R> {
    pub fn footer(&self) -> &WarehouseFooter {
        self.reader.footer()
    }
}

impl<R: Read + Seek> Iterator for BlockIter<R> {
    type Item = Result<Block, BloarkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.reader.len() {
            return None;
        }
        // Frames are contiguous, so one seek to the first frame is enough.
        if !self.positioned {
            if let Err(e) = self.reader.source.seek(SeekFrom::Start(HEADER_LEN)) {
                self.failed = true;
                return Some(Err(e.into()));
            }
            self.positioned = true;
        }
        let index = self.next;
        let entry = &self.reader.footer.blocks[index];
        let (frame_size, raw_size) = (entry.frame_size, entry.raw_size);
        self.next += 1;

        let result = self.reader.decode_next(index, frame_size, raw_size);
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.reader.len().saturating_sub(self.next);
        (0, Some(remaining))
    }
}
