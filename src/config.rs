//! Session configuration
//!
//! All tunables are passed explicitly into the session at construction.
//! There is deliberately no global settings object: two sessions with
//! different configurations can coexist in one process.

use std::time::Duration;

/// Configuration for a chat session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the backend, e.g. "https://demo.chatline.example"
    pub base_url: String,
    /// Account name on the backend
    pub account: String,
    /// Location (department/entry point) the visitor connects through
    pub location: String,
    /// Visitor display name sent on session open, if known
    pub visitor_name: Option<String>,
    /// How long a send (text or file) may stay in flight before the
    /// pending message is retracted and the failure surfaced
    pub send_timeout: Duration,
    /// How many messages a single history page may carry
    pub history_page_limit: usize,
    /// Delay before a reconnection attempt after a transport drop
    pub reconnect_delay: Duration,
}

impl SessionConfig {
    /// Create a configuration with default timeouts
    pub fn new(
        base_url: impl Into<String>,
        account: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            account: account.into(),
            location: location.into(),
            visitor_name: None,
            send_timeout: Duration::from_secs(30),
            history_page_limit: 100,
            reconnect_delay: Duration::from_secs(2),
        }
    }

    /// Set the visitor display name
    pub fn with_visitor_name(mut self, name: impl Into<String>) -> Self {
        self.visitor_name = Some(name.into());
        self
    }

    /// Override the send timeout
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Override the reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::new("https://chat.example.com", "acme", "support");
        assert_eq!(config.base_url, "https://chat.example.com");
        assert_eq!(config.account, "acme");
        assert_eq!(config.location, "support");
        assert!(config.visitor_name.is_none());
        assert_eq!(config.send_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_builders() {
        let config = SessionConfig::new("https://chat.example.com", "acme", "support")
            .with_visitor_name("Alice")
            .with_send_timeout(Duration::from_secs(5))
            .with_reconnect_delay(Duration::from_millis(100));
        assert_eq!(config.visitor_name.as_deref(), Some("Alice"));
        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect_delay, Duration::from_millis(100));
    }
}
