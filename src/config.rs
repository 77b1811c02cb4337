//! Client configuration for the setup handshake.
//!
//! [`SetupConfig`] carries the four fields exchanged in the `Setup` frame:
//! keepalive interval, lifetime, and the data and metadata MIME type tags.

use std::time::Duration;

/// Default keepalive heartbeat period (60 seconds).
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(60_000);
/// Default lifetime before the peer is declared unreachable (180 seconds).
pub const DEFAULT_LIFETIME: Duration = Duration::from_millis(180_000);
/// Default MIME type tag for both the data and metadata regions.
pub const DEFAULT_MIME_TYPE: &str = "application/json";

/// Parameters negotiated in the setup handshake.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use rsock::SetupConfig;
///
/// let setup = SetupConfig::default().lifetime(Duration::from_secs(30));
/// assert_eq!(setup.lifetime_value(), Duration::from_secs(30));
/// assert_eq!(setup.data_mime_type_value(), "application/json");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetupConfig {
    keep_alive_interval: Duration,
    lifetime: Duration,
    data_mime_type: String,
    metadata_mime_type: String,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            lifetime: DEFAULT_LIFETIME,
            data_mime_type: DEFAULT_MIME_TYPE.to_owned(),
            metadata_mime_type: DEFAULT_MIME_TYPE.to_owned(),
        }
    }
}

impl SetupConfig {
    /// Create a config with explicit values for every field.
    #[must_use]
    pub fn new(
        keep_alive_interval: Duration,
        lifetime: Duration,
        data_mime_type: impl Into<String>,
        metadata_mime_type: impl Into<String>,
    ) -> Self {
        Self {
            keep_alive_interval,
            lifetime,
            data_mime_type: data_mime_type.into(),
            metadata_mime_type: metadata_mime_type.into(),
        }
    }

    /// Set the keepalive heartbeat period.
    #[must_use]
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set the timeout before the peer is declared unreachable.
    #[must_use]
    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the content-type tag echoed in setup for the data region.
    #[must_use]
    pub fn data_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.data_mime_type = mime_type.into();
        self
    }

    /// Set the content-type tag for the metadata region.
    #[must_use]
    pub fn metadata_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.metadata_mime_type = mime_type.into();
        self
    }

    /// The configured keepalive heartbeat period.
    #[must_use]
    pub const fn keep_alive_interval_value(&self) -> Duration { self.keep_alive_interval }

    /// The configured lifetime.
    #[must_use]
    pub const fn lifetime_value(&self) -> Duration { self.lifetime }

    /// The configured data MIME type tag.
    #[must_use]
    pub fn data_mime_type_value(&self) -> &str { &self.data_mime_type }

    /// The configured metadata MIME type tag.
    #[must_use]
    pub fn metadata_mime_type_value(&self) -> &str { &self.metadata_mime_type }

    /// Keepalive interval in whole milliseconds, saturating at `u32::MAX` as
    /// the wire field does.
    #[must_use]
    pub fn keep_alive_interval_ms(&self) -> u32 {
        u32::try_from(self.keep_alive_interval.as_millis()).unwrap_or(u32::MAX)
    }

    /// Lifetime in whole milliseconds, saturating at `u32::MAX` as the wire
    /// field does.
    #[must_use]
    pub fn lifetime_ms(&self) -> u32 {
        u32::try_from(self.lifetime.as_millis()).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol_demo_values() {
        let setup = SetupConfig::default();
        assert_eq!(setup.keep_alive_interval_ms(), 60_000);
        assert_eq!(setup.lifetime_ms(), 180_000);
        assert_eq!(setup.data_mime_type_value(), "application/json");
        assert_eq!(setup.metadata_mime_type_value(), "application/json");
    }

    #[test]
    fn millisecond_fields_saturate() {
        let setup = SetupConfig::default().lifetime(Duration::from_secs(u64::MAX / 2));
        assert_eq!(setup.lifetime_ms(), u32::MAX);
    }
}
