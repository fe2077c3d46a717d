// In: src/warehouse/format.rs

//! Defines all on-disk structures and constants for the warehouse format.
//! This is the single source of truth for the container layout shared by the
//! writer and the reader.
//!
//! ```text
//! +-------------+---------+----------------------------+--------------+------------+-----------+
//! | "BLRK" (4)  | ver (2) | block frame 0 .. frame N-1 | footer JSON  | len u64 LE | END (8)   |
//! +-------------+---------+----------------------------+--------------+------------+-----------+
//! ```
//!
//! The trailer (footer + length + end magic) is written last, so a file whose writer
//! crashed before finalization has no end magic and is rejected on open.

use serde::{Deserialize, Serialize};

use crate::block::Metadata;
use crate::config::WarehouseCompression;

//==================================================================================
// I. Constants
//==================================================================================

/// The magic number to identify the start of a warehouse file.
pub const WAREHOUSE_MAGIC: &[u8; 4] = b"BLRK";
/// The current version of the warehouse file format.
pub const FORMAT_VERSION: u16 = 1;
/// Magic closing every finalized warehouse.
pub const END_MAGIC: &[u8; 8] = b"BLRKEND\0";

/// magic(4) + version(2)
pub const HEADER_LEN: u64 = 6;
/// footer_len(8) + end magic(8)
pub const TRAILER_LEN: u64 = 16;
/// Upper bound on a footer we are willing to allocate for. (256MB)
pub const MAX_FOOTER_LEN: u64 = 256 * 1024 * 1024;

/// Extension of finalized warehouse files.
pub const WAREHOUSE_EXTENSION: &str = "blrk";
/// Extension appended to a warehouse while it is still being written.
pub const PARTIAL_EXTENSION: &str = "partial";

//==================================================================================
// II. Index Structures
//==================================================================================

/// Physical location of one block frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockIndexEntry {
    pub offset: u64,
    pub frame_size: u64,
    /// Size of the serialized record before framing/compression.
    pub raw_size: u64,
}

/// A contiguous run of blocks sharing one grouping key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GroupEntry {
    pub key: String,
    pub first_block: u64,
    pub block_count: u64,
    /// Group-level metadata (title, categories, ...). Carried across Modifier passes.
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

/// The warehouse footer: the index plus aggregate metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WarehouseFooter {
    pub writer_version: String,
    pub compression: WarehouseCompression,
    pub block_count: u64,
    pub raw_bytes: u64,
    pub blocks: Vec<BlockIndexEntry>,
    pub groups: Vec<GroupEntry>,
}

impl WarehouseFooter {
    /// Distinct grouping keys in storage order.
    pub fn group_keys(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.groups
            .iter()
            .filter(|g| seen.insert(g.key.as_str()))
            .map(|g| g.key.clone())
            .collect()
    }
}

//==================================================================================
// III. Summaries handed back to the pipelines
//==================================================================================

/// What a finalized warehouse looks like from the outside.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WarehouseSummary {
    pub path: std::path::PathBuf,
    pub block_count: u64,
    pub raw_bytes: u64,
    pub file_bytes: u64,
    pub group_keys: Vec<String>,
}
