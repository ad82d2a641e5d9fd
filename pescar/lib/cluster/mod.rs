//! Kubernetes access: watching tracked Deployments, updating images and checking health.

mod events;
mod kubernetes;
mod retry;
mod traits;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use events::*;
pub use kubernetes::*;
pub use retry::*;
pub use traits::*;
