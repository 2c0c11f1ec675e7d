//! Timeout defaults and async timeout helpers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Default outbound connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for an awaitable response
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay before retrying after a failed `accept`
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Run `fut` with a deadline, mapping expiry to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expiry_maps_to_timeout() {
        let result: Result<()> = with_timeout_error(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_millis(10),
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));

        let value = with_timeout_error(async { Ok(3) }, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(value, 3);
    }
}
