//! Persistence for iscas, anzols and their image revisions.
//!
//! [`SqliteStore`] is what `pescar serve` runs on. [`MemoryStore`] keeps the same semantics in
//! process and backs tests and dry runs.

mod memory;
mod sqlite;
mod traits;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The id of the anzol every store starts with.
pub const DEFAULT_ANZOL_ID: i64 = 1;

/// The name of the anzol every store starts with.
pub const DEFAULT_ANZOL_NAME: &str = "default";

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use memory::*;
pub use sqlite::*;
pub use traits::*;

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
