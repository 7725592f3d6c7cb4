// HTTP client construction. reqwest is compiled with the
// `rustls-tls-webpki-roots-no-provider` backend, so the process-wide rustls
// CryptoProvider must be installed before the first TLS handshake; building a
// client without one panics at request time.

use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use crate::error::EngineError;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(existing) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate in the process may have installed one first.
            debug!(?existing, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the shared HTTP client used for bandwidth probes and delivery
/// lookups. Installs the rustls provider on first use.
pub fn build_client() -> Result<reqwest::Client, EngineError> {
    install_rustls_provider();
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    Ok(client)
}
