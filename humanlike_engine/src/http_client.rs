use std::time::Duration;

use crate::error::Result;

/// Build the shared HTTP client. Every request made through it, including
/// reading a streamed body, is bounded by `timeout`.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("humanlike/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout.max(Duration::from_millis(1)))
        .build()?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_still_builds() {
        assert!(build_http_client(Duration::ZERO).is_ok());
        assert!(build_http_client(Duration::from_secs(30)).is_ok());
    }
}
