//! Address family selection
// (c) 2025 Ross Younger

/// Restricts hostname resolution to a given address family.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AddressFamily {
    /// Both IPv4 and IPv6 are acceptable; the first result wins
    #[default]
    Any,
    /// IPv4 only
    Inet,
    /// IPv6 only
    Inet6,
}
