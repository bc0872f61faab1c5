//! Classification of transport-level failures for the retry policy.

/// Error message fragments that indicate a transient connection failure.
/// These show up in proxied and load-balanced deployments where the
/// reqwest predicates alone miss the cause.
const RETRYABLE_MESSAGE_MARKERS: &[&str] = &[
    "econnreset",
    "etimedout",
    "econnaborted",
    "stream has been aborted",
    "socket hang up",
    "connection reset",
    "broken pipe",
];

/// True when the message text alone marks the failure as retryable.
pub(crate) fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_MESSAGE_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Transient network failures are retried with the same exponential
/// backoff as 429/5xx responses.
pub fn is_retryable_network_error(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() {
        return true;
    }
    // Include the source chain: reqwest wraps hyper/io errors whose
    // Display carries the interesting part.
    let mut text = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        text.push(' ');
        text.push_str(&inner.to_string());
        source = std::error::Error::source(inner);
    }
    is_retryable_message(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    // reqwest::Error cannot be constructed directly, so the message
    // predicate is exercised on its own.

    #[test]
    fn test_connection_reset_is_retryable() {
        assert!(is_retryable_message("error: ECONNRESET while reading body"));
        assert!(is_retryable_message("Connection reset by peer"));
    }

    #[test]
    fn test_timeout_markers_are_retryable() {
        assert!(is_retryable_message("connect ETIMEDOUT 1.2.3.4:443"));
        assert!(is_retryable_message("request ECONNABORTED"));
    }

    #[test]
    fn test_stream_abort_markers_are_retryable() {
        assert!(is_retryable_message("the stream has been aborted"));
        assert!(is_retryable_message("socket hang up"));
    }

    #[test]
    fn test_ordinary_errors_are_not_retryable() {
        assert!(!is_retryable_message("invalid header value"));
        assert!(!is_retryable_message("builder error"));
        assert!(!is_retryable_message(""));
    }
}
