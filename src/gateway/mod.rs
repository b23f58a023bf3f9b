//! Gateway implementations

mod builder;
mod embedded;

pub use builder::{Manifold, ManifoldBuilder};
pub use embedded::EmbeddedGateway;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::traits::RepoGateway;
use crate::types::InvalidationSignal;

/// Apply invalidation signals from a channel until every sender is dropped.
///
/// Hook repository webhooks, credential rotation and keyring watchers up to
/// the sending side.
pub fn spawn_invalidation_listener<G>(
    gateway: Arc<G>,
    mut signals: mpsc::Receiver<InvalidationSignal>,
) -> JoinHandle<()>
where
    G: RepoGateway + ?Sized + 'static,
{
    tokio::spawn(async move {
        while let Some(signal) = signals.recv().await {
            match gateway.invalidate(signal.clone()).await {
                Ok(removed) => info!(?signal, removed, "cache invalidated"),
                Err(e) => warn!(?signal, error = %e, "failed to apply invalidation signal"),
            }
        }
        info!("invalidation channel closed");
    })
}
