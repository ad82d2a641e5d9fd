//! Docker Registry HTTP API v2 client used to discover new images.

mod auth;
mod client;
mod strategy;
mod traits;
mod types;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use auth::*;
pub use client::*;
pub use strategy::*;
pub use traits::*;
pub use types::*;
