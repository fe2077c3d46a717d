//! This file is the root of the `bloark` Rust crate.
//!
//! Its responsibilities are strictly limited to:
//! 1.  Declaring all the top-level modules of our library (`warehouse`, `builder`,
//!     `modifier`, etc.) so the Rust compiler knows they exist.
//! 2.  Re-exporting the handful of types an embedding application needs to drive a
//!     Builder or Modifier run.

//==================================================================================
// 0. Constants
//==================================================================================
/// The crate version, automatically set from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
//==================================================================================
// 1. Module Declarations
//==================================================================================
pub mod block;
pub mod builder;
pub mod codec;
pub mod config;
pub mod error;
pub mod inspect;
pub mod logging;
pub mod modifier;
pub mod pool;
pub mod preload;
pub mod report;
pub mod warehouse;

//==================================================================================
// 2. Public API
//==================================================================================
pub use block::{Block, Content, MetaValue, Metadata};
pub use builder::Builder;
pub use config::{
    BuilderConfig, CompressionProfile, ModifierConfig, Threshold, Verbosity, WarehouseCompression,
    WarehouseOptions,
};
pub use error::{BloarkError, CodecError, ErrorScope};
pub use logging::{init_logging, LogProgressSink, ProgressSink, RecordingProgressSink};
pub use modifier::{FnProfile, IdentityProfile, Modifier, Profile, Transformed};
pub use pool::{CancelHandle, UnitOutcome, WorkerPool};
pub use inspect::{export, ExportReport, ExportedFile};
pub use preload::{preload, PreloadKind};
pub use report::{DefaultReducer, FailedUnit, ReportReducer, RunReport, UnitReport};
pub use warehouse::{WarehouseReader, WarehouseSummary, WarehouseWriter};
