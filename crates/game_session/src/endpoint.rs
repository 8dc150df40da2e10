//! Broker address resolution.
//!
//! The broker listens on the same host that served the client, on a fixed
//! port. The address is derived from the page origin by dropping the scheme
//! and swapping whatever follows the last colon for the broker port.

/// Port the broker's WebSocket listener uses unless configured otherwise.
pub const DEFAULT_BROKER_PORT: u16 = 9222;

/// Derives broker addresses from origins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointResolver {
    port: u16,
}

impl Default for EndpointResolver {
    fn default() -> Self {
        Self::new(DEFAULT_BROKER_PORT)
    }
}

impl EndpointResolver {
    /// # Arguments
    ///
    /// * `port` - Broker WebSocket port substituted into every origin
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves `origin` to `host:port`.
    ///
    /// * absent or empty origin → empty string
    /// * no colon after the scheme is stripped → host returned unchanged
    ///
    /// ```
    /// use game_session::EndpointResolver;
    ///
    /// let resolver = EndpointResolver::default();
    /// assert_eq!(resolver.resolve(Some("https://host:1234")), "host:9222");
    /// assert_eq!(resolver.resolve(Some("host")), "host");
    /// assert_eq!(resolver.resolve(None), "");
    /// ```
    pub fn resolve(&self, origin: Option<&str>) -> String {
        let origin = match origin {
            Some(origin) if !origin.is_empty() => origin,
            _ => return String::new(),
        };
        let host = strip_scheme(origin);
        match host.rfind(':') {
            Some(idx) => format!("{}{}", &host[..=idx], self.port),
            None => host.to_string(),
        }
    }
}

/// Drops a leading `scheme://`, where scheme follows RFC 3986 characters.
fn strip_scheme(origin: &str) -> &str {
    match origin.find("://") {
        Some(idx)
            if idx > 0
                && origin[..idx]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) =>
        {
            &origin[idx + 3..]
        }
        _ => origin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_replaces_port() {
        let resolver = EndpointResolver::default();
        assert_eq!(resolver.resolve(Some("https://host:1234")), "host:9222");
        assert_eq!(resolver.resolve(Some("http://10.0.0.4:3000")), "10.0.0.4:9222");
        assert_eq!(resolver.resolve(Some("host:80")), "host:9222");
    }

    #[test]
    fn test_resolve_without_colon_is_unchanged() {
        let resolver = EndpointResolver::default();
        assert_eq!(resolver.resolve(Some("host")), "host");
        assert_eq!(resolver.resolve(Some("https://jaysgame.example")), "jaysgame.example");
    }

    #[test]
    fn test_resolve_empty_or_absent() {
        let resolver = EndpointResolver::default();
        assert_eq!(resolver.resolve(Some("")), "");
        assert_eq!(resolver.resolve(None), "");
    }

    #[test]
    fn test_resolve_uses_configured_port() {
        let resolver = EndpointResolver::new(4223);
        assert_eq!(resolver.port(), 4223);
        assert_eq!(resolver.resolve(Some("https://host:1234")), "host:4223");
    }

    #[test]
    fn test_resolve_ipv6_keeps_brackets() {
        let resolver = EndpointResolver::default();
        assert_eq!(resolver.resolve(Some("http://[::1]:3000")), "[::1]:9222");
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let resolver = EndpointResolver::default();
        let once = resolver.resolve(Some("https://host:1234"));
        assert_eq!(resolver.resolve(Some(&once)), once);
    }
}
