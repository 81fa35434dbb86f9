//! General utility code that didn't fit anywhere else
// (c) 2025 Ross Younger

mod address_family;
pub use address_family::AddressFamily;

mod dns;
pub(crate) use dns::lookup_host_by_family;

pub(crate) mod time;

pub mod tracing;
pub use tracing::{LogLevel, setup as setup_tracing};
