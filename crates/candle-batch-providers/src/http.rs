use reqwest::{Response, StatusCode};

use crate::error::FetchError;

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Turn throttling and non-success statuses into typed errors, passing
/// successful responses through.
pub(crate) async fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return Err(FetchError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::from_status(status.as_u16(), body));
    }

    Ok(response)
}
