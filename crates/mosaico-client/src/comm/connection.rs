use crate::ClientError;
use arrow_flight::FlightClient;
use log::{debug, error};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// Hard per-batch byte ceiling of the Flight transport. Batches beyond this
/// size are rejected by the wire layer, not merely suboptimal.
pub const MAX_FLIGHT_BATCH_BYTES: usize = 16 * 1024 * 1024;

/// Default byte threshold at which a buffered topic batch is flushed.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 10 * 1024 * 1024;

/// Default record-count threshold for count-batched topics.
pub const DEFAULT_MAX_BATCH_SIZE_RECORDS: usize = 5_000;

/// One gRPC channel to the server, minting Flight handles on demand.
///
/// Cloning shares the underlying multiplexed channel, so the same
/// `Connection` can serve several concurrent streams.
#[derive(Clone)]
pub struct Connection {
    channel: Channel,
    addr: String,
}

impl Connection {
    /// Opens a channel to `host:port`, waiting at most `timeout` for the
    /// transport to become available.
    pub async fn open(host: &str, port: u16, timeout: Duration) -> Result<Self, ClientError> {
        let addr = format!("http://{host}:{port}");

        let endpoint = Endpoint::from_shared(addr.clone())
            .map_err(|e| ClientError::Connect {
                addr: addr.clone(),
                reason: e.to_string(),
            })?
            .connect_timeout(timeout);

        let channel = endpoint.connect().await.map_err(|e| ClientError::Connect {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self { channel, addr })
    }

    /// A fresh Flight handle over this connection.
    pub fn flight(&self) -> FlightClient {
        FlightClient::new(self.channel.clone())
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[connection|{}]", self.addr)
    }
}

/// A fixed set of connections cycled through with a round-robin cursor.
///
/// Distributing the data streams over several sockets keeps one
/// high-bandwidth topic from starving the others.
#[derive(Debug)]
pub struct ConnectionPool {
    connections: Vec<Connection>,
    cursor: AtomicUsize,
}

impl ConnectionPool {
    /// Opens all `pool_size` connections eagerly. If any of them fails the
    /// previously opened ones are closed and the error is surfaced.
    pub async fn open(
        host: &str,
        port: u16,
        pool_size: usize,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        if pool_size < 1 {
            return Err(ClientError::PoolSize("connection"));
        }

        debug!("initializing connection pool with {pool_size} connections...");

        let mut connections = Vec::with_capacity(pool_size);
        for i in 0..pool_size {
            match Connection::open(host, port, timeout).await {
                Ok(connection) => connections.push(connection),
                Err(e) => {
                    error!(
                        "failed to create connection {}/{} for pool: {}",
                        i + 1,
                        pool_size,
                        e
                    );
                    // Dropping the vector closes the channels opened so far
                    return Err(e);
                }
            }
        }

        Ok(Self {
            connections,
            cursor: AtomicUsize::new(0),
        })
    }

    /// The next connection in the rotation. The cursor advances atomically,
    /// concurrent callers get distinct slots.
    pub fn next(&self) -> Result<Connection, ClientError> {
        if self.connections.is_empty() {
            return Err(ClientError::PoolClosed("connection"));
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        Ok(self.connections[idx].clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Closes every connection and resets the pool state.
    pub fn close(&mut self) {
        self.connections.clear();
    }

    /// Heuristic pool size: the number of available CPU cores, clamped to
    /// at least two so one stream cannot monopolize the pool.
    pub fn default_pool_size() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .max(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_sized_pool_is_rejected() {
        let err = ConnectionPool::open("localhost", 50051, 0, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::PoolSize("connection")));
    }

    #[test]
    fn default_size_is_at_least_two() {
        assert!(ConnectionPool::default_pool_size() >= 2);
    }
}
