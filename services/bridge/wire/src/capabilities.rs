//! Capability names advertised during the handshake.

/// In-order delivery on the data plane
pub const ORDERED_DELIVERY: &str = "ordered-delivery";
/// PING/PONG liveness probing
pub const HEARTBEAT: &str = "heartbeat";
/// Session suspension and resumption
pub const SESSION_RESUME: &str = "session-resume";
/// Payload encryption (reserved, not implemented)
pub const ENCRYPTION: &str = "encryption";
/// Payload compression (reserved, not implemented)
pub const COMPRESSION: &str = "compression";

const SUPPORTED: &[&str] = &[ORDERED_DELIVERY, HEARTBEAT, SESSION_RESUME];

/// Capabilities this implementation advertises by default
pub fn default_capabilities() -> Vec<String> {
    SUPPORTED.iter().map(|c| (*c).to_string()).collect()
}

/// Whether a capability is implemented locally
pub fn is_supported_capability(name: &str) -> bool {
    SUPPORTED.contains(&name)
}
