//! Protocol versions and version negotiation.

/// Version stamped on every outgoing envelope
pub const PROTOCOL_VERSION: &str = "2.0.0";

/// Versions understood locally, newest first
pub const SUPPORTED_VERSIONS: &[&str] = &["2.0.0", "1.0.0"];

/// Session timeout advertised in HELLO_ACK when not configured (5 minutes)
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 300_000;

/// Heartbeat interval advertised in HELLO_ACK when not configured (30 seconds)
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Negotiate against the built-in version list
pub fn negotiate_version<S: AsRef<str>>(peer_versions: &[S]) -> String {
    negotiate_version_from(SUPPORTED_VERSIONS, PROTOCOL_VERSION, peer_versions)
}

/// Pick the newest local version the peer also supports.
///
/// `local` must be ordered newest first. Negotiation never fails: when the
/// lists are disjoint the local `current` version is returned and the peer is
/// left to decide whether it can talk to us.
pub fn negotiate_version_from<L, P>(local: &[L], current: &str, peer_versions: &[P]) -> String
where
    L: AsRef<str>,
    P: AsRef<str>,
{
    local
        .iter()
        .map(AsRef::as_ref)
        .find(|v| peer_versions.iter().any(|p| p.as_ref() == *v))
        .unwrap_or(current)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_picks_newest_common() {
        let local = ["2.0.0", "1.0.0"];
        let peer = ["3.0.0", "2.0.0", "1.0.0"];
        assert_eq!(negotiate_version_from(&local, "2.0.0", &peer), "2.0.0");
    }

    #[test]
    fn test_negotiate_prefers_local_order() {
        let local = ["2.0.0", "1.0.0"];
        let peer = ["1.0.0", "2.0.0"];
        assert_eq!(negotiate_version_from(&local, "2.0.0", &peer), "2.0.0");
    }

    #[test]
    fn test_negotiate_falls_back_to_current() {
        let peer = vec!["99.0.0".to_string()];
        assert_eq!(negotiate_version(&peer), PROTOCOL_VERSION);
    }

    #[test]
    fn test_negotiate_older_peer() {
        let peer = ["1.0.0"];
        assert_eq!(negotiate_version(&peer), "1.0.0");
    }
}
