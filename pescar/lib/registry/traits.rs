use async_trait::async_trait;

use crate::{
    models::{PullingStrategy, RegistryCoordinates, RegistryCredentials},
    PescarResult,
};

use super::ResolvedImage;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Obtains the bearer token a registry wants for pulling from a repository.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Returns a token for `repository` on the registry at `registry_url`.
    ///
    /// `None` means the registry accepts anonymous requests.
    async fn get_token(
        &self,
        registry_url: &str,
        repository: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> PescarResult<Option<String>>;
}

/// Finds the newest image of a repository.
#[async_trait]
pub trait ImageResolver: Send + Sync {
    /// Resolves the newest image of `registry` according to `strategy`.
    async fn resolve_latest_image(
        &self,
        registry: &RegistryCoordinates,
        strategy: PullingStrategy,
        credentials: Option<&RegistryCredentials>,
    ) -> PescarResult<ResolvedImage>;
}
