use std::sync::Arc;

use crate::engine::Pescar;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// State shared by every admin request handler.
#[derive(Clone)]
pub struct ServerState {
    pescar: Arc<Pescar>,
}

impl ServerState {
    /// Creates the state around a running instance.
    pub fn new(pescar: Arc<Pescar>) -> Self {
        Self { pescar }
    }

    /// The instance the API operates on.
    pub fn pescar(&self) -> &Arc<Pescar> {
        &self.pescar
    }
}
