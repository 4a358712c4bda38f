//! Shared HTTP error translation for the live adapters.
//!
//! Raw broker payloads never cross the adapter boundary; failures are
//! summarized into the core taxonomy here.

use reqwest::StatusCode;
use tradedesk_core::error::BrokerError;

/// Translate a reqwest transport failure.
pub(crate) fn transport_error(err: reqwest::Error) -> BrokerError {
    if err.is_timeout() {
        BrokerError::Network("request timed out".to_string())
    } else if err.is_connect() {
        BrokerError::Network("connection failed".to_string())
    } else {
        BrokerError::Network(err.to_string())
    }
}

/// Translate a non-success HTTP status plus a short server-supplied reason.
pub(crate) fn status_error(status: StatusCode, reason: &str) -> BrokerError {
    let reason = summarize(reason);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BrokerError::Authentication(reason),
        StatusCode::TOO_MANY_REQUESTS => BrokerError::Api("rate limited by broker".to_string()),
        _ => BrokerError::Api(format!("HTTP {}: {}", status.as_u16(), reason)),
    }
}

/// Pull the human-readable `message` field out of a broker error body,
/// falling back to a truncated copy of the body itself.
pub(crate) fn extract_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error", "emsg"] {
            if let Some(msg) = value.get(key).and_then(|m| m.as_str()) {
                return msg.to_string();
            }
        }
    }
    summarize(body)
}

fn summarize(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return "no detail".to_string();
    }
    let mut out: String = text.chars().take(160).collect();
    if out.len() < text.len() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "bad token"),
            BrokerError::Authentication(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "oops"),
            BrokerError::Api(_)
        ));
    }

    #[test]
    fn test_extract_message() {
        assert_eq!(
            extract_message(r#"{"status":"error","message":"Invalid checksum"}"#),
            "Invalid checksum"
        );
        assert_eq!(extract_message("plain text"), "plain text");
        assert_eq!(extract_message(""), "no detail");
    }
}
