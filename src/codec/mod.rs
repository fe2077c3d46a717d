// In: src/codec/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: The Codec Layer
// ====================================================================================
//
// Two very different jobs live here:
//
//   1. [Frame kernels (frame.rs)] -> encode/decode ONE block record into a
//                                    self-contained frame. Used by the warehouse
//                                    store so any block can be decoded from its
//                                    index entry alone.
//
//   2. [Streams (stream.rs)]      -> open_read/open_write over whole files. Used by
//                                    the Builder to stream raw dumps (bz2/gz/zst/xml)
//                                    without ever extracting them to disk.
//
// ====================================================================================
pub mod stream;
pub mod frame;

pub use stream::{open_read, open_write, ByteSink, SinkFormat, SourceFormat, SourceStream};
