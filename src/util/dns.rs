//! DNS helpers
// (c) 2025 Ross Younger

use std::net::IpAddr;

use super::AddressFamily;
use crate::error::{Error, Result};

/// DNS lookup helper
///
/// Results can be restricted to a given address family.
/// Only the first matching result is returned.
/// If there are no matching records of the required type, returns an error.
pub(crate) fn lookup_host_by_family(host: &str, desired: AddressFamily) -> Result<IpAddr> {
    let candidates = dns_lookup::lookup_host(host).map_err(Error::Io)?;
    let mut it = candidates.iter();

    let found = match desired {
        AddressFamily::Any => it.next(),
        AddressFamily::Inet => it.find(|addr| addr.is_ipv4()),
        AddressFamily::Inet6 => it.find(|addr| addr.is_ipv6()),
    };
    found.copied().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("host {host} found, but not as {desired}"),
        ))
    })
}
