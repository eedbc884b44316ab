pub mod access;
pub mod broker;
pub mod grid;
pub mod squares;

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    config::AppConfig,
    dao::store::Store,
    services::{
        credentials::CredentialValidator, identity_directory::IdentityDirectory,
        token_signer::TokenSigner,
    },
};

pub use self::broker::{PoolBroker, PoolEvent};

/// Handle passed to every router and task.
pub type SharedState = Arc<AppState>;

/// Process-wide handles shared by every request, stream and background task.
pub struct AppState {
    store: Arc<dyn Store>,
    broker: PoolBroker,
    credentials: CredentialValidator,
    signer: TokenSigner,
    directory: Arc<dyn IdentityDirectory>,
    config: AppConfig,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(
        store: Arc<dyn Store>,
        credentials: CredentialValidator,
        signer: TokenSigner,
        directory: Arc<dyn IdentityDirectory>,
        config: AppConfig,
    ) -> SharedState {
        let (shutdown, _rx) = watch::channel(false);
        Arc::new(Self {
            store,
            broker: PoolBroker::new(),
            credentials,
            signer,
            directory,
            config,
            shutdown,
        })
    }

    /// Persistence backend.
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn broker(&self) -> &PoolBroker {
        &self.broker
    }

    pub fn credentials(&self) -> &CredentialValidator {
        &self.credentials
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub fn directory(&self) -> &dyn IdentityDirectory {
        self.directory.as_ref()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Publish a change notification to everyone watching `pool_token`.
    pub fn publish(&self, pool_token: &str, event: PoolEvent) {
        self.broker.publish(pool_token, event);
    }

    /// Subscribe to the shutdown flag; it flips to `true` once.
    pub fn shutdown_watcher(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Signal background tasks and open streams to stop.
    pub fn trigger_shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}
