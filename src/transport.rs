//! QUIC transport configuration and endpoint construction
// (c) 2025 Ross Younger

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{Endpoint, IdleTimeout, TransportConfig, VarInt};
use tracing::debug;

use crate::error::{Error, Result};

/// The ALPN protocol identifier spoken by every peer.
pub const ALPN: &[u8] = b"quics-protocol";

/// Connections with no traffic at all for this long are torn down.
pub const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Keep-alive ping interval. Prevents a connected-but-quiet peer pair from
/// tripping the idle timeout.
pub const KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(15);

/// Transport parameters shared by both sides.
fn create_config() -> Arc<TransportConfig> {
    let mut config = TransportConfig::default();
    #[allow(clippy::cast_possible_truncation)] // 30s of millis
    let idle = IdleTimeout::from(VarInt::from_u32(MAX_IDLE_TIMEOUT.as_millis() as u32));
    let _ = config
        .max_idle_timeout(Some(idle))
        .keep_alive_interval(Some(KEEP_ALIVE_PERIOD));
    Arc::new(config)
}

/// Inserts our ALPN identifier unless the caller chose their own.
fn apply_alpn(alpn: &mut Vec<Vec<u8>>) {
    if alpn.is_empty() {
        alpn.push(ALPN.to_vec());
    }
}

/// Creates a client endpoint bound to `bind`, ready to dial out with the
/// given TLS configuration.
pub fn client_endpoint(bind: SocketAddr, mut tls: rustls::ClientConfig) -> Result<Endpoint> {
    apply_alpn(&mut tls.alpn_protocols);
    let crypto = QuicClientConfig::try_from(tls).map_err(|e| Error::TlsConfig(e.to_string()))?;
    let mut config = quinn::ClientConfig::new(Arc::new(crypto));
    let _ = config.transport_config(create_config());

    let mut endpoint = Endpoint::client(bind).map_err(Error::Transport)?;
    endpoint.set_default_client_config(config);
    debug!("client endpoint bound to {:?}", endpoint.local_addr());
    Ok(endpoint)
}

/// Creates a listening endpoint on `bind` with the given TLS configuration.
pub fn server_endpoint(bind: SocketAddr, mut tls: rustls::ServerConfig) -> Result<Endpoint> {
    apply_alpn(&mut tls.alpn_protocols);
    tls.max_early_data_size = u32::MAX;
    let crypto = QuicServerConfig::try_from(tls).map_err(|e| Error::TlsConfig(e.to_string()))?;
    let mut config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
    let _ = config.transport_config(create_config());

    Endpoint::server(config, bind).map_err(Error::Transport)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::{ALPN, apply_alpn};
    use crate::tls;

    use pretty_assertions::assert_eq;

    #[test]
    fn alpn_defaulted_but_not_forced() {
        let mut empty = vec![];
        apply_alpn(&mut empty);
        assert_eq!(empty, vec![ALPN.to_vec()]);

        let mut custom = vec![b"h3".to_vec()];
        apply_alpn(&mut custom);
        assert_eq!(custom, vec![b"h3".to_vec()]);
    }

    #[tokio::test]
    async fn endpoints_construct() {
        let creds = tls::certificate(None, None).unwrap();
        let server = super::server_endpoint(
            "127.0.0.1:0".parse().unwrap(),
            tls::server_config(creds).unwrap(),
        )
        .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);

        let client = super::client_endpoint(
            "0.0.0.0:0".parse().unwrap(),
            tls::client_config_insecure().unwrap(),
        )
        .unwrap();
        assert_ne!(client.local_addr().unwrap().port(), 0);
    }
}
