// In: src/warehouse/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: The Warehouse Store
// ====================================================================================
//
// A warehouse is a self-describing container of independently framed blocks plus a
// trailing index. The store knows nothing about articles or profiles:
//
//   1. [format.rs]  -> constants and the serde structs of the footer.
//   2. [writer.rs]  -> WarehouseWriter: append-only, `.partial` until finalized.
//   3. [reader.rs]  -> WarehouseReader: validated open, forward iteration, random access.
//   4. [rolling.rs] -> RollingWriter: threshold rollover at group boundaries.
//
// ====================================================================================
pub mod format;
pub mod reader;
pub mod rolling;
pub mod writer;

pub use format::{GroupEntry, WarehouseFooter, WarehouseSummary};
pub use reader::{BlockIter, WarehouseReader};
pub use rolling::{Naming, RollingWriter};
pub use writer::WarehouseWriter;
