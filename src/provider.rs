//! The [`Provider`] trait implemented by every DNS backend.

use async_trait::async_trait;

use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::plan::Changes;

/// A DNS backend the controller reads current state from and applies
/// change sets to.
///
/// Both the single-zone RFC2136 provider and the multi-zone router
/// implement this; the controller never distinguishes the two.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The current set of DNS endpoints in the managed zone(s).
    async fn records(&self) -> Result<Vec<Endpoint>, Error>;

    /// Apply the given set of create, update, and delete operations.
    async fn apply(&self, changes: &Changes) -> Result<(), Error>;

    /// Validate connectivity and credentials at startup. Providers without
    /// a meaningful check succeed by default.
    async fn preflight(&self) -> Result<(), Error> {
        Ok(())
    }
}
