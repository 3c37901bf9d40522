//! Client configuration and address resolution.
//!
//! # Example
//!
//! ```no_run
//! use plugin_ws_relay::ClientConfig;
//! use url::Url;
//!
//! # fn example() -> plugin_ws_relay::Result<()> {
//! let site = Url::parse("https://chat.example.com/team")?;
//!
//! let config = ClientConfig::builder()
//!     .site_url(&site)
//!     .plugin_id("com.example.calls")
//!     .build()?;
//!
//! assert_eq!(config.url.as_str(), "wss://chat.example.com/team/api/v4/websocket");
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Namespace;

// ============================================================================
// Constants
// ============================================================================

/// Handshake event name used by the server.
pub const DEFAULT_HANDSHAKE_EVENT: &str = "hello";

/// Path of the WebSocket endpoint below the site root.
const WEBSOCKET_PATH: &str = "api/v4/websocket";

// ============================================================================
// Address Resolution
// ============================================================================

/// Derives the WebSocket endpoint from the host's site URL.
///
/// `http` becomes `ws` and `https` becomes `wss`. When the host configured a
/// dedicated WebSocket URL, its origin replaces the site's.
///
/// # Errors
///
/// Returns [`Error::Config`] for schemes other than `http`, `https`, `ws`
/// and `wss`, or for URLs that cannot carry a path.
pub fn resolve_ws_url(site_url: &Url, websocket_url: Option<&Url>) -> Result<Url> {
    let base = websocket_url.unwrap_or(site_url);

    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::config(format!(
                "Unsupported URL scheme '{other}', expected http(s) or ws(s)"
            )));
        }
    };

    if base.cannot_be_a_base() {
        return Err(Error::config(format!("URL cannot carry a path: {base}")));
    }

    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| Error::config(format!("Cannot switch {base} to {scheme}")))?;

    let path = format!("{}/{WEBSOCKET_PATH}", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

// ============================================================================
// ClientConfig
// ============================================================================

/// Validated multiplexer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket endpoint.
    pub url: Url,

    /// Plugin id used to namespace actions and events.
    pub plugin_id: String,

    /// Name of the handshake event.
    pub handshake_event: String,
}

impl ClientConfig {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Returns the namespace derived from the plugin id.
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> Namespace {
        Namespace::new(&self.plugin_id)
    }
}

// ============================================================================
// ClientConfigBuilder
// ============================================================================

/// Endpoint as handed to the builder.
#[derive(Debug, Clone)]
enum Endpoint {
    /// Parsed or resolved URL.
    Url(Url),
    /// `.url()` input that failed to parse.
    Unparsable(url::ParseError),
    /// `.site_url()` input that could not be turned into a WebSocket URL.
    Unresolvable(String),
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default, Clone)]
pub struct ClientConfigBuilder {
    /// Endpoint, if one was set.
    url: Option<Endpoint>,
    /// Plugin id.
    plugin_id: Option<String>,
    /// Handshake event override.
    handshake_event: Option<String>,
}

impl ClientConfigBuilder {
    /// Creates an empty builder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the WebSocket endpoint directly.
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl AsRef<str>) -> Self {
        self.url = Some(match Url::parse(url.as_ref()) {
            Ok(url) => Endpoint::Url(url),
            Err(e) => Endpoint::Unparsable(e),
        });
        self
    }

    /// Derives the endpoint from the host's site URL.
    ///
    /// See [`resolve_ws_url`].
    #[inline]
    #[must_use]
    pub fn site_url(mut self, site_url: &Url) -> Self {
        self.url = Some(match resolve_ws_url(site_url, None) {
            Ok(url) => Endpoint::Url(url),
            Err(e) => Endpoint::Unresolvable(e.to_string()),
        });
        self
    }

    /// Sets the plugin id.
    #[inline]
    #[must_use]
    pub fn plugin_id(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin_id = Some(plugin_id.into());
        self
    }

    /// Overrides the handshake event name.
    #[inline]
    #[must_use]
    pub fn handshake_event(mut self, event: impl Into<String>) -> Self {
        self.handshake_event = Some(event.into());
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] if the `.url()` input does not parse
    /// - [`Error::Config`] if the URL or plugin id is missing or invalid
    /// - [`Error::Config`] if the handshake event is empty
    pub fn build(self) -> Result<ClientConfig> {
        let url = self.validate_url()?;
        let plugin_id = self.validate_plugin_id()?;

        let handshake_event = self
            .handshake_event
            .unwrap_or_else(|| DEFAULT_HANDSHAKE_EVENT.to_string());
        if handshake_event.is_empty() {
            return Err(Error::config("Handshake event must not be empty"));
        }

        Ok(ClientConfig {
            url,
            plugin_id,
            handshake_event,
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientConfigBuilder {
    /// Validates the endpoint configuration.
    fn validate_url(&self) -> Result<Url> {
        let url = match &self.url {
            None => {
                return Err(Error::config(
                    "WebSocket URL is required. Use .url() or .site_url() to set it.",
                ));
            }
            Some(Endpoint::Unparsable(e)) => return Err(Error::InvalidUrl(*e)),
            Some(Endpoint::Unresolvable(message)) => return Err(Error::config(message.clone())),
            Some(Endpoint::Url(url)) => url.clone(),
        };

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(Error::config(format!(
                "WebSocket URL must use ws or wss, got '{other}'"
            ))),
        }
    }

    /// Validates the plugin id configuration.
    fn validate_plugin_id(&self) -> Result<String> {
        let plugin_id = self
            .plugin_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::config("Plugin id is required. Use .plugin_id() to set it."))?;

        let valid = plugin_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(Error::config(format!(
                "Plugin id '{plugin_id}' may only contain letters, digits, '.', '_' and '-'"
            )));
        }

        Ok(plugin_id)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("valid url")
    }

    #[test]
    fn test_resolve_https_site() {
        let resolved = resolve_ws_url(&url("https://chat.example.com"), None).expect("resolve");
        assert_eq!(resolved.as_str(), "wss://chat.example.com/api/v4/websocket");
    }

    #[test]
    fn test_resolve_http_subpath() {
        let resolved =
            resolve_ws_url(&url("http://localhost:8065/mm/?x=1#top"), None).expect("resolve");
        assert_eq!(resolved.as_str(), "ws://localhost:8065/mm/api/v4/websocket");
    }

    #[test]
    fn test_resolve_with_websocket_override() {
        let resolved = resolve_ws_url(
            &url("https://chat.example.com"),
            Some(&url("wss://ws.example.com")),
        )
        .expect("resolve");
        assert_eq!(resolved.as_str(), "wss://ws.example.com/api/v4/websocket");
    }

    #[test]
    fn test_resolve_rejects_other_schemes() {
        let err = resolve_ws_url(&url("ftp://example.com"), None).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_build_defaults() {
        let config = ClientConfig::builder()
            .url("ws://127.0.0.1:8065/api/v4/websocket")
            .plugin_id("com.example.calls")
            .build()
            .expect("valid config");

        assert_eq!(config.handshake_event, DEFAULT_HANDSHAKE_EVENT);
        assert_eq!(config.namespace().prefix(), "custom_com.example.calls");
    }

    #[test]
    fn test_build_from_site_url() {
        let config = ClientConfig::builder()
            .site_url(&url("https://chat.example.com/"))
            .plugin_id("calls")
            .handshake_event("welcome")
            .build()
            .expect("valid config");

        assert_eq!(config.url.scheme(), "wss");
        assert_eq!(config.handshake_event, "welcome");
    }

    #[test]
    fn test_build_missing_url() {
        let err = ClientConfig::builder().plugin_id("calls").build().unwrap_err();
        assert!(err.to_string().contains("WebSocket URL is required"));
    }

    #[test]
    fn test_build_unparsable_url() {
        let err = ClientConfig::builder()
            .url("not a url")
            .plugin_id("calls")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(url::ParseError::RelativeUrlWithoutBase)));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_build_unresolvable_site_url() {
        let err = ClientConfig::builder()
            .site_url(&url("ftp://example.com"))
            .plugin_id("calls")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("ftp"));
    }

    #[test]
    fn test_build_rejects_http_url() {
        let err = ClientConfig::builder()
            .url("http://example.com")
            .plugin_id("calls")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("ws or wss"));
    }

    #[test]
    fn test_build_missing_plugin_id() {
        let err = ClientConfig::builder()
            .url("ws://example.com")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Plugin id is required"));

        let err = ClientConfig::builder()
            .url("ws://example.com")
            .plugin_id("")
            .build()
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_build_rejects_bad_plugin_id() {
        let err = ClientConfig::builder()
            .url("ws://example.com")
            .plugin_id("calls plugin")
            .build()
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_build_rejects_empty_handshake() {
        let err = ClientConfig::builder()
            .url("ws://example.com")
            .plugin_id("calls")
            .handshake_event("")
            .build()
            .unwrap_err();
        assert!(err.is_config_error());
    }
}
