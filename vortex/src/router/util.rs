//! Request-deadline helper shared by the snapshot composer (C9) and the
//! client gateway's HTTP handlers (C8): wrap a future with a timeout and
//! map expiry to the gateway's own timeout error variant instead of
//! letting it escape as a panic or an unhandled future.

use std::time::Duration;

use vortex_types::GatewayError;

/// Run `fut` with a deadline. On expiry returns `GatewayError::RequestTimeout`
/// rather than propagating a raw `Elapsed`, a standardized timeout error
/// mapping applied at every call-with-deadline seam.
pub async fn with_deadline<T, Fut>(label: &str, deadline: Duration, fut: Fut) -> Result<T, GatewayError>
where
    Fut: std::future::Future<Output = T>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_elapsed| GatewayError::RequestTimeout(label.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_future_completes_before_its_deadline() {
        let out = with_deadline("test", Duration::from_millis(50), async { 42 }).await;
        assert_eq!(out.unwrap(), 42);
    }

    #[tokio::test]
    async fn slow_future_times_out() {
        let out = with_deadline("test", Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            42
        })
        .await;
        assert!(matches!(out.unwrap_err(), GatewayError::RequestTimeout(_)));
    }
}
