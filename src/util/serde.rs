use std::net::{SocketAddr, ToSocketAddrs};

use serde::de::{Error, Unexpected};
use serde::{Deserialize, Deserializer};

/// Deserialize a socket address from a string, resolving hostnames if needed.
pub fn to_socket_addrs<'de, D>(d: D) -> Result<SocketAddr, D::Error>
where
    D: Deserializer<'de>,
{
    let addr = String::deserialize(d)?;

    if let Ok(mut resolved) = addr.to_socket_addrs() {
        if let Some(addr) = resolved.next() {
            return Ok(addr);
        }
    }

    addr.parse().map_err(|_| {
        Error::invalid_value(Unexpected::Str(&addr), &"IP or resolvable host and port")
    })
}
