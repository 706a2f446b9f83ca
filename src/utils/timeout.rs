//! Async timeout helpers shared by clients and the server.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default bound for connect and single request/response waits
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval of the datagram loop's housekeeping tick
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// Time given to open connections during a graceful shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Await `future`, mapping an elapsed deadline to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
