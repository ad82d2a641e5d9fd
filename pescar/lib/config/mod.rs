//! Configuration types and helpers.

mod defaults;
mod pescar;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use pescar::*;
