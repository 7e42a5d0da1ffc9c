//! Client listing (`pivpn -l`) parsing
//!
//! The listing is split on whitespace and client names are read at a fixed
//! stride after the header. Output shorter than the header (PiVPN prints
//! `::: There are no clients to list` once the last client is removed) is an
//! empty listing. Any other token count that is not the header plus a whole
//! number of rows means the table shape changed under us.

use super::{Layout, ParseError};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Client name as printed by PiVPN (case and whitespace sensitive)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Ordered, duplicate-free list of clients at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot(Vec<ClientId>);

impl Snapshot {
    /// Build a snapshot, rejecting repeated names
    pub fn new(clients: Vec<ClientId>) -> Result<Self, ParseError> {
        let mut seen = HashSet::with_capacity(clients.len());
        for client in &clients {
            if !seen.insert(client) {
                return Err(ParseError::DuplicateClient(client.to_string()));
            }
        }
        Ok(Self(clients))
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, client: &ClientId) -> bool {
        self.0.contains(client)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClientId> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[ClientId] {
        &self.0
    }

    /// Same snapshot with `excluded` clients left out, order kept
    pub fn without(&self, excluded: &[ClientId]) -> Snapshot {
        Self(
            self.0
                .iter()
                .filter(|client| !excluded.contains(*client))
                .cloned()
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a ClientId;
    type IntoIter = std::slice::Iter<'a, ClientId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Extract client names from listing output
pub fn parse_listing(layout: &Layout, output: &str) -> Result<Snapshot, ParseError> {
    let tokens: Vec<&str> = output.split_whitespace().collect();
    debug!("Listing has {} tokens", tokens.len());

    let shape_error = || ParseError::Layout {
        tokens: tokens.len(),
        overhead: layout.overhead,
        stride: layout.stride,
    };

    let Some(body) = tokens.len().checked_sub(layout.overhead) else {
        debug!("Listing shorter than the table header, no clients");
        return Ok(Snapshot::empty());
    };
    if body % layout.stride != 0 {
        return Err(shape_error());
    }
    let rows = body / layout.stride;

    let mut clients = Vec::with_capacity(rows);
    for row in 0..rows {
        let name = tokens
            .get(layout.first_name + row * layout.stride)
            .ok_or_else(shape_error)?;
        debug!("Collecting client {} for client list", name);
        clients.push(ClientId::new(*name));
    }

    Snapshot::new(clients)
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// `pivpn -l` output on a WireGuard install
    pub fn wireguard_listing(rows: &[&str]) -> String {
        let mut out = String::from(
            "::: Clients Summary :::\nClient     Public key     Creation date\n",
        );
        for name in rows {
            out.push_str(&format!(
                "{:<10} bWFkZS11cC1wdWJsaWMta2V5LWZvci10ZXN0aW5nLQ= 12 Jan 2024, 10:00, CET\n",
                name
            ));
        }
        out.push_str("::: Disabled clients :::\n");
        out
    }

    /// `pivpn -l` output on an OpenVPN install
    pub fn openvpn_listing(rows: &[&str]) -> String {
        let mut out = String::from(
            ": NOTE: The first entry should always be your valid server!\n\n\
             ::: Certificate Status List :::\n \
             ::  Status  ::  Name  ::  Expiration  ::  Serial  ::  Revoked  ::\n",
        );
        for name in rows {
            out.push_str(&format!("  Valid    {:<10} Jan 12 2034\n", name));
        }
        out
    }
}
