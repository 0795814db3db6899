//! Listener setup and accept loop.

use crate::config::ServerConfig;
use crate::connection::{ServerState, handle_connection};
use crate::coordinator::{ClaimStore, Coordinator, RedisClaimStore};
use crate::error::ServerError;
use crate::rooms::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// A bound signaling/relay server.
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    /// Bind to `addr`, opening the Redis claim store when
    /// `config.redis_url` is set.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` when the Redis URL is malformed or the
    /// address cannot be bound.
    pub async fn bind(addr: SocketAddr, config: ServerConfig) -> Result<Self, ServerError> {
        let store: Option<Arc<dyn ClaimStore>> = match &config.redis_url {
            Some(url) => Some(Arc::new(RedisClaimStore::open(url)?)),
            None => None,
        };
        Self::bind_with_store(addr, config, store).await
    }

    /// Bind with an explicit claim store. Tests use this with a
    /// [`MemoryClaimStore`](crate::coordinator::MemoryClaimStore) shared
    /// between instances.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Io` when the address cannot be bound.
    pub async fn bind_with_store(
        addr: SocketAddr,
        config: ServerConfig,
        store: Option<Arc<dyn ClaimStore>>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        info!(
            addr = %listener.local_addr()?,
            instance_id = config.instance_id,
            coordinated = store.is_some(),
            "server listening"
        );
        let state = Arc::new(ServerState {
            registry: Registry::new(),
            coordinator: Coordinator::new(config.instance_id, store),
        });
        Ok(Self { listener, state })
    }

    /// Address the listener is bound to. Useful when binding port 0.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Io` if the socket is gone.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, spawning one task per connection.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Io` when the listener itself fails; individual
    /// connection errors are handled inside their tasks.
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            debug!(%addr, "connection accepted");
            let state = Arc::clone(&self.state);
            tokio::spawn(handle_connection(state, stream));
        }
    }
}
