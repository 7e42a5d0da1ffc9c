//! Per-client attribute records (`pivpn -c`)
//!
//! A record is one whitespace-separated row:
//!
//! ```text
//! name  remote  address  received  sent  <connectivity...>
//! ```
//!
//! The connectivity column is normally a five-token timestamp
//! (`Jan 12 2024 - 10:00:01`). WireGuard prints `(not yet)` instead for a peer
//! that never completed a handshake, and OpenVPN prints no row at all for a
//! client that is not connected.

use super::{
    Backend, ClientId, Layout, ParseError, CONNECTIVITY_FIELD, MARKER_TOKENS, TIMESTAMP_TOKENS,
};
use serde::ser::{Serialize, SerializeMap, Serializer};

const UNATTACHED_STATE: &str = "Not Connected";

/// Connectivity column of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connectivity {
    /// Composed timestamp of the last handshake / session start
    Since(String),
    /// The backend's own "not connected" phrase, e.g. `(not yet)`
    NotConnected(String),
    /// No record was returned for the client
    Unattached,
}

/// Attributes of one client, fetched fresh every cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAttributes {
    pub backend: Backend,
    pub client: String,
    pub remote_address: String,
    pub local_address: String,
    pub bytes_received: String,
    pub bytes_sent: String,
    pub connectivity: Connectivity,
}

impl ClientAttributes {
    /// Attribute set for a client the backend has no row for
    pub fn unattached(backend: Backend, client: &ClientId) -> Self {
        Self {
            backend,
            client: client.to_string(),
            remote_address: String::new(),
            local_address: String::new(),
            bytes_received: String::new(),
            bytes_sent: String::new(),
            connectivity: Connectivity::Unattached,
        }
    }

    /// Short state string for the client's state topic
    pub fn state(&self) -> &str {
        match &self.connectivity {
            Connectivity::Since(stamp) => stamp,
            Connectivity::NotConnected(phrase) => phrase,
            Connectivity::Unattached => UNATTACHED_STATE,
        }
    }

    fn connectivity_value(&self) -> &str {
        match &self.connectivity {
            Connectivity::Since(value) | Connectivity::NotConnected(value) => value,
            Connectivity::Unattached => "",
        }
    }
}

impl Serialize for ClientAttributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let layout = self.backend.layout();
        let mut map = serializer.serialize_map(Some(6))?;
        map.serialize_entry("client", &self.client)?;
        map.serialize_entry("remote_ip", &self.remote_address)?;
        map.serialize_entry(layout.address_key, &self.local_address)?;
        map.serialize_entry("received", &self.bytes_received)?;
        map.serialize_entry("sent", &self.bytes_sent)?;
        map.serialize_entry(layout.connectivity_key, self.connectivity_value())?;
        map.end()
    }
}

/// Pick the record for `client` out of the filtered query output
///
/// The query matches by substring, so `bob` also returns `bobby`'s row. Only
/// a row whose first column is exactly the client name belongs to it.
fn select_record<'a>(output: &'a str, client: &ClientId) -> Option<&'a str> {
    output
        .lines()
        .find(|line| line.split_whitespace().next() == Some(client.as_str()))
}

/// Parse the query output for one client
pub fn parse_record(
    layout: &Layout,
    client: &ClientId,
    output: &str,
) -> Result<ClientAttributes, ParseError> {
    let Some(record) = select_record(output, client) else {
        return Ok(ClientAttributes::unattached(layout.backend, client));
    };
    let tokens: Vec<&str> = record.split_whitespace().collect();

    let truncated = |expected: usize| ParseError::Truncated {
        client: client.to_string(),
        expected,
        found: tokens.len(),
    };
    let span = |width: usize| {
        tokens
            .get(CONNECTIVITY_FIELD..CONNECTIVITY_FIELD + width)
            .map(|words| words.join(" "))
            .ok_or_else(|| truncated(CONNECTIVITY_FIELD + width))
    };

    let connectivity = match (layout.not_connected_marker, tokens.get(CONNECTIVITY_FIELD)) {
        (_, None) => return Err(truncated(CONNECTIVITY_FIELD + 1)),
        (Some(marker), Some(first)) if *first == marker => {
            Connectivity::NotConnected(span(MARKER_TOKENS)?)
        }
        _ => Connectivity::Since(span(TIMESTAMP_TOKENS)?),
    };

    Ok(ClientAttributes {
        backend: layout.backend,
        client: tokens[0].to_string(),
        remote_address: tokens[1].to_string(),
        local_address: tokens[2].to_string(),
        bytes_received: tokens[3].to_string(),
        bytes_sent: tokens[4].to_string(),
        connectivity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WG_CONNECTED: &str =
        "alice   203.0.113.7:51820   10.6.0.2   1.2MiB   340KiB   Jan 12 2024 - 10:00:01\n";
    const WG_NEVER: &str = "bob   (none)   10.6.0.3   0B   0B   (not yet)\n";
    const OVPN_CONNECTED: &str =
        "laptop   198.51.100.4:1194   10.8.0.2   5.1MiB   1.0MiB   Mon Jan 15 09:12:44 2024\n";

    fn parse(backend: Backend, client: &str, output: &str) -> Result<ClientAttributes, ParseError> {
        parse_record(backend.layout(), &ClientId::from(client), output)
    }

    #[test]
    fn test_wireguard_connected() {
        let attrs = parse(Backend::WireGuard, "alice", WG_CONNECTED).unwrap();
        assert_eq!(attrs.remote_address, "203.0.113.7:51820");
        assert_eq!(attrs.local_address, "10.6.0.2");
        assert_eq!(attrs.bytes_received, "1.2MiB");
        assert_eq!(attrs.bytes_sent, "340KiB");
        assert_eq!(attrs.state(), "Jan 12 2024 - 10:00:01");
    }

    #[test]
    fn test_wireguard_not_connected_marker() {
        let attrs = parse(Backend::WireGuard, "bob", WG_NEVER).unwrap();
        assert_eq!(
            attrs.connectivity,
            Connectivity::NotConnected("(not yet)".to_string())
        );
        assert_eq!(attrs.state(), "(not yet)");
    }

    #[test]
    fn test_openvpn_connected() {
        let attrs = parse(Backend::OpenVpn, "laptop", OVPN_CONNECTED).unwrap();
        assert_eq!(attrs.local_address, "10.8.0.2");
        assert_eq!(attrs.state(), "Mon Jan 15 09:12:44 2024");
    }

    #[test]
    fn test_no_record_is_unattached() {
        let attrs = parse(Backend::OpenVpn, "tablet", "").unwrap();
        assert_eq!(attrs.connectivity, Connectivity::Unattached);
        assert_eq!(attrs.client, "tablet");
        assert_eq!(attrs.state(), "Not Connected");

        let attrs = parse(Backend::WireGuard, "tablet", "\n  \n").unwrap();
        assert_eq!(attrs.connectivity, Connectivity::Unattached);
    }

    #[test]
    fn test_truncated_record() {
        let result = parse(Backend::WireGuard, "alice", "alice 203.0.113.7:51820 10.6.0.2");
        assert_eq!(
            result,
            Err(ParseError::Truncated {
                client: "alice".to_string(),
                expected: 6,
                found: 3,
            })
        );

        // Timestamp cut short
        let result = parse(Backend::OpenVpn, "laptop", "laptop 1.2.3.4 10.8.0.2 1B 2B Mon Jan");
        assert!(matches!(
            result,
            Err(ParseError::Truncated { expected: 10, found: 7, .. })
        ));

        // Marker without its second word
        let result = parse(Backend::WireGuard, "bob", "bob (none) 10.6.0.3 0B 0B (not");
        assert!(matches!(result, Err(ParseError::Truncated { expected: 7, .. })));
    }

    #[test]
    fn test_substring_match_picks_exact_name() {
        let output = "bobby  (none)  10.6.0.9  0B  0B  (not yet)\n\
                      bob  203.0.113.9:4500  10.6.0.3  1KiB  2KiB  Feb 01 2024 - 08:30:00\n";
        let attrs = parse(Backend::WireGuard, "bob", output).unwrap();
        assert_eq!(attrs.client, "bob");
        assert_eq!(attrs.local_address, "10.6.0.3");
    }

    #[test]
    fn test_substring_match_of_other_client_is_unattached() {
        let output = "bobby 1.2.3.4:1194 10.8.0.9 5MiB 1MiB Mon Jan 15 09:12:44 2024\n";
        let attrs = parse(Backend::OpenVpn, "bob", output).unwrap();
        assert_eq!(attrs.connectivity, Connectivity::Unattached);
        assert_eq!(attrs.client, "bob");
        assert_eq!(attrs.state(), "Not Connected");
        assert!(attrs.bytes_received.is_empty());
    }

    #[test]
    fn test_marker_ignored_for_openvpn() {
        let output = "laptop 1.2.3.4 10.8.0.2 1B 2B (not yet) seen at noon";
        let attrs = parse(Backend::OpenVpn, "laptop", output).unwrap();
        assert_eq!(attrs.state(), "(not yet) seen at noon");
    }

    #[test]
    fn test_wireguard_json_keys() {
        let attrs = parse(Backend::WireGuard, "alice", WG_CONNECTED).unwrap();
        assert_eq!(
            serde_json::to_value(&attrs).unwrap(),
            json!({
                "client": "alice",
                "remote_ip": "203.0.113.7:51820",
                "local_ip": "10.6.0.2",
                "received": "1.2MiB",
                "sent": "340KiB",
                "seen": "Jan 12 2024 - 10:00:01",
            })
        );
    }

    #[test]
    fn test_openvpn_json_keys() {
        let attrs = parse(Backend::OpenVpn, "laptop", OVPN_CONNECTED).unwrap();
        let value = serde_json::to_value(&attrs).unwrap();
        assert_eq!(value["virtual_ip"], "10.8.0.2");
        assert_eq!(value["connected_since"], "Mon Jan 15 09:12:44 2024");
        assert!(value.get("local_ip").is_none());

        let unattached = ClientAttributes::unattached(Backend::OpenVpn, &"tablet".into());
        let value = serde_json::to_value(&unattached).unwrap();
        assert_eq!(value["client"], "tablet");
        assert_eq!(value["connected_since"], "");
    }
}
