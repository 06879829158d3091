//! Handshake payload construction and session id allocation.
//!
//! The handshake is HELLO (client) -> HELLO_ACK (server) -> READY (client).
//! The server allocates the session id while answering HELLO; the client
//! adopts it from HELLO_ACK and echoes it verbatim in READY.

use crate::connection::ConnectionConfig;
use bridge_wire::{
    millis, negotiate_version_from, HelloAckPayload, HelloPayload, ReadyPayload, ReadyStatus,
    PROTOCOL_VERSION,
};
use rand::Rng;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of the random suffix of a session id
pub const SESSION_ID_RANDOM_LEN: usize = 9;

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        let idx = usize::try_from(value % 36).unwrap_or_default();
        digits.push(BASE36[idx]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Allocate a session id of the form `{prefix}_{base36 time}_{9 random chars}`.
///
/// The random part comes from the thread-local CSPRNG, but nine base36
/// characters are still only ~46 bits; ids are unique handles, not secrets.
pub fn generate_session_id(prefix: &str, now_ms: u64) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SESSION_ID_RANDOM_LEN)
        .map(|_| char::from(BASE36[rng.gen_range(0..BASE36.len())]))
        .collect();
    format!("{}_{}_{}", prefix, to_base36(now_ms), suffix)
}

/// Build the client's HELLO from its configuration
pub fn build_hello(config: &ConnectionConfig) -> HelloPayload {
    HelloPayload {
        origin: config.origin.clone(),
        capabilities: config.capabilities.clone(),
        protocol_versions: config.protocol_versions.clone(),
        preferred_version: config
            .protocol_versions
            .first()
            .cloned()
            .unwrap_or_else(|| PROTOCOL_VERSION.to_string()),
        client_id: config.client_id.clone(),
        metadata: config.metadata.clone(),
    }
}

/// Build the server's HELLO_ACK answering `hello`.
///
/// Enabled capabilities are those both sides list.
pub fn build_hello_ack(
    config: &ConnectionConfig,
    hello: &HelloPayload,
    session_id: String,
) -> HelloAckPayload {
    let negotiated_version = negotiate_version_from(
        &config.protocol_versions,
        PROTOCOL_VERSION,
        &hello.protocol_versions,
    );
    let capabilities = config
        .capabilities
        .iter()
        .filter(|c| hello.capabilities.contains(*c))
        .cloned()
        .collect();

    HelloAckPayload {
        origin: config.origin.clone(),
        negotiated_version,
        capabilities,
        session_timeout: millis(config.session_timeout),
        heartbeat_interval: millis(config.heartbeat_interval),
        session_id,
        server_id: config.server_id.clone(),
    }
}

/// Build the client's READY for an adopted session id
pub fn build_ready(session_id: &str) -> ReadyPayload {
    ReadyPayload {
        status: ReadyStatus::Connected,
        session_id: session_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Role;

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_700_000_000_000), "loyw3v28");
    }

    #[test]
    fn test_session_id_shape() {
        let id = generate_session_id("server", 1_700_000_000_000);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "server");
        assert_eq!(parts[1], "loyw3v28");
        assert_eq!(parts[2].len(), SESSION_ID_RANDOM_LEN);
        assert!(parts[2].bytes().all(|b| BASE36.contains(&b)));
    }

    #[test]
    fn test_session_ids_differ() {
        let a = generate_session_id("server", 1);
        let b = generate_session_id("server", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hello_ack_negotiates_and_intersects() {
        let server = ConnectionConfig::server("https://wallet.example");
        let mut client = ConnectionConfig::client("https://dapp.example");
        client.protocol_versions = vec!["3.0.0".into(), "2.0.0".into(), "1.0.0".into()];
        client.capabilities = vec!["heartbeat".into(), "encryption".into()];
        assert_eq!(client.role, Role::Client);

        let hello = build_hello(&client);
        assert_eq!(hello.preferred_version, "3.0.0");

        let ack = build_hello_ack(&server, &hello, "server_x_y".into());
        assert_eq!(ack.negotiated_version, "2.0.0");
        assert_eq!(ack.capabilities, vec!["heartbeat".to_string()]);
        assert_eq!(ack.session_timeout, 300_000);
        assert_eq!(ack.heartbeat_interval, 30_000);
        assert_eq!(ack.session_id, "server_x_y");
    }
}
