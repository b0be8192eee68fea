//! Sticker acceptance: allow-listed source hosts plus a bounded remote
//! check of the actual resource. Verification fails closed — an
//! unreachable or slow host rejects the sticker.

use std::time::Duration;

use url::Url;

pub const STICKER_HOSTS: &[&str] = &["giphy.com", "media.giphy.com"];

pub const MAX_STICKER_BYTES: u64 = 5 * 1024 * 1024;

pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(4);

/// Exact host or subdomain of an allow-listed domain.
pub fn host_allowed(host: &str) -> bool {
    STICKER_HOSTS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)))
}

/// Local shape checks: parseable URL on an allowed host. Returns the
/// rejection reason on failure.
pub fn check_shape(sticker_url: &str) -> Result<(), String> {
    let parsed = Url::parse(sticker_url).map_err(|_| "malformed url".to_string())?;
    let host = parsed.host_str().ok_or_else(|| "missing host".to_string())?;
    if !host_allowed(host) {
        return Err("domain not allowed".to_string());
    }
    Ok(())
}

/// Full validation: shape checks, then a HEAD request verifying the remote
/// resource is a reachable GIF under the size ceiling.
pub async fn validate_sticker(client: &reqwest::Client, sticker_url: &str) -> Result<(), String> {
    check_shape(sticker_url)?;

    let response = client
        .head(sticker_url)
        .timeout(VERIFY_TIMEOUT)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                "verification timed out".to_string()
            } else {
                "unreachable".to_string()
            }
        })?;

    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status().as_u16()));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.starts_with("image/gif") {
        return Err("not a GIF".to_string());
    }

    let size = response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    if size > MAX_STICKER_BYTES {
        return Err("file too large".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_hosts() {
        assert!(host_allowed("giphy.com"));
        assert!(host_allowed("media.giphy.com"));
        assert!(host_allowed("media2.giphy.com"));
    }

    #[test]
    fn lookalike_hosts_are_rejected() {
        assert!(!host_allowed("evilgiphy.com"));
        assert!(!host_allowed("giphy.com.attacker.net"));
        assert!(!host_allowed("example.com"));
    }

    #[test]
    fn shape_checks() {
        assert!(check_shape("https://media.giphy.com/media/abc/giphy.gif").is_ok());
        assert_eq!(
            check_shape("not a url").unwrap_err(),
            "malformed url".to_string()
        );
        assert_eq!(
            check_shape("https://example.com/x.gif").unwrap_err(),
            "domain not allowed".to_string()
        );
    }
}
