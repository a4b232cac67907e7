//! Session pool: one upstream session per managed character.

use std::collections::HashMap;
use std::sync::Arc;

use crate::session::{DEFAULT_CHANNEL_SIZE, spawn_session};
use crate::{
    MessageLogger, SessionConfig, SessionHandle, TicketProvider,
    UpstreamConnector, UpstreamError,
};

/// Most characters one bouncer will manage.
pub const MAX_IDENTITIES: usize = 3;

/// Maps each managed character to its running session.
///
/// Built once at startup and never changed afterwards: every identity
/// keeps exactly one session for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct SessionPool {
    sessions: HashMap<String, SessionHandle>,
}

impl SessionPool {
    /// Spawns one session per identity. Sessions start connecting right
    /// away.
    ///
    /// # Errors
    /// `UpstreamError::TooManyIdentities` if more than
    /// [`MAX_IDENTITIES`] distinct identities are given.
    pub fn start<C, T>(
        identities: &[String],
        config: &SessionConfig,
        connector: Arc<C>,
        tickets: Arc<T>,
        logger: Arc<dyn MessageLogger>,
    ) -> Result<Self, UpstreamError>
    where
        C: UpstreamConnector,
        T: TicketProvider,
    {
        let mut sessions = HashMap::with_capacity(identities.len());
        for identity in identities {
            if sessions.contains_key(identity) {
                continue;
            }
            if sessions.len() == MAX_IDENTITIES {
                return Err(UpstreamError::TooManyIdentities(identities.len()));
            }
            let handle = spawn_session(
                identity.as_str(),
                config.clone(),
                Arc::clone(&connector),
                Arc::clone(&tickets),
                Arc::clone(&logger),
                DEFAULT_CHANNEL_SIZE,
            );
            tracing::info!(%identity, "session started");
            sessions.insert(identity.clone(), handle);
        }
        Ok(Self { sessions })
    }

    /// The session for `identity`.
    pub fn get(&self, identity: &str) -> Option<&SessionHandle> {
        self.sessions.get(identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.sessions.contains_key(identity)
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stops every session.
    pub async fn shutdown(&self) {
        for handle in self.sessions.values() {
            let _ = handle.shutdown().await;
        }
    }
}
