//! Candidate endpoint list and rotation
//!
//! The connector walks the list round-robin. Which URL an attempt uses is a
//! pure function of the list length and the attempt number, so rotation can
//! be reasoned about (and tested) without a socket.

use hdpool_core::{Error, Result};

/// Index of the endpoint used by attempt `attempt` (0-based)
///
/// `len` must be non-zero; [`EndpointList`] guarantees that.
pub fn endpoint_index(len: usize, attempt: u64) -> usize {
    (attempt % len as u64) as usize
}

/// Ordered, non-empty list of WebSocket URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointList {
    urls: Vec<String>,
}

impl EndpointList {
    /// Build a list, rejecting an empty list and non-WebSocket URLs
    pub fn new<I, S>(urls: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        if urls.is_empty() {
            return Err(Error::InvalidArgument(
                "endpoint list must not be empty".to_string(),
            ));
        }
        if let Some(bad) = urls
            .iter()
            .find(|url| !(url.starts_with("ws://") || url.starts_with("wss://")))
        {
            return Err(Error::InvalidArgument(format!(
                "not a WebSocket URL: {:?}",
                bad
            )));
        }
        Ok(Self { urls })
    }

    /// Single-endpoint list
    pub fn single(url: impl Into<String>) -> Result<Self> {
        Self::new([url.into()])
    }

    /// URL for the given attempt
    pub fn for_attempt(&self, attempt: u64) -> &str {
        &self.urls[endpoint_index(self.urls.len(), attempt)]
    }

    /// Number of endpoints
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Endpoints in rotation order
    pub fn as_slice(&self) -> &[String] {
        &self.urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_index_wraps() {
        assert_eq!(endpoint_index(3, 0), 0);
        assert_eq!(endpoint_index(3, 1), 1);
        assert_eq!(endpoint_index(3, 2), 2);
        assert_eq!(endpoint_index(3, 3), 0);
        assert_eq!(endpoint_index(3, 7), 1);
        assert_eq!(endpoint_index(1, 42), 0);
    }

    #[test]
    fn test_rotation_order() {
        let list = EndpointList::new([
            "wss://hdpool.com",
            "wss://ali3.hdpool.com",
            "wss://ali4.hdpool.com",
        ])
        .unwrap();

        let visited: Vec<&str> = (0..5).map(|n| list.for_attempt(n)).collect();
        assert_eq!(
            visited,
            vec![
                "wss://hdpool.com",
                "wss://ali3.hdpool.com",
                "wss://ali4.hdpool.com",
                "wss://hdpool.com",
                "wss://ali3.hdpool.com",
            ]
        );
    }

    #[test]
    fn test_empty_list_rejected() {
        let result = EndpointList::new(Vec::<String>::new());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_non_websocket_url_rejected() {
        let result = EndpointList::new(["wss://hdpool.com", "https://hdpool.com"]);
        match result {
            Err(Error::InvalidArgument(msg)) => assert!(msg.contains("https://hdpool.com")),
            other => panic!("Expected InvalidArgument, got {:?}", other),
        }
    }

    #[test]
    fn test_single() {
        let list = EndpointList::single("ws://127.0.0.1:9000").unwrap();
        assert_eq!(list.len(), 1);
        assert!(!list.is_empty());
        assert_eq!(list.for_attempt(10), "ws://127.0.0.1:9000");
    }
}
