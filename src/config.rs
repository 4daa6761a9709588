//! Endpoint configuration.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::Error;
use crate::message::{CertificateType, CipherSuite, NamedGroup};

/// Client certificate authentication policy for servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// Never request a client certificate.
    None,
    /// Request one; an empty Certificate message is accepted.
    Wanted,
    /// Request one; the handshake fails without it.
    Required,
}

/// How this endpoint assigns Connection IDs for its inbound records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CidGenerator {
    /// CID support is not negotiated.
    Disabled,
    /// Advertise support with a zero-length CID: we may send CIDs to the
    /// peer, but inbound records stay address-routed.
    SupportedButEmpty,
    /// Hand out random CIDs of this length (1–255 bytes).
    Length(usize),
}

impl CidGenerator {
    pub fn cid_length(&self) -> usize {
        match self {
            CidGenerator::Length(n) => *n,
            _ => 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, CidGenerator::Disabled)
    }
}

/// DTLS endpoint configuration. Create via [`Config::builder`].
#[derive(Debug, Clone)]
pub struct Config {
    mtu: usize,
    retransmission_timeout: Duration,
    max_retransmissions: usize,
    handshake_timeout: Duration,
    max_connections: usize,
    stale_session_timeout: Duration,
    connection_id_generator: CidGenerator,
    max_fragment_length: Option<usize>,
    max_deferred_fragment_bytes: usize,
    client_authentication: ClientAuth,
    cipher_suites: Vec<CipherSuite>,
    supported_groups: Vec<NamedGroup>,
    trust_certificate_types: Vec<CertificateType>,
    identity_certificate_types: Vec<CertificateType>,
    sni_enabled: bool,
    use_no_server_session_id: bool,
    psk_identity_hint: Option<Vec<u8>>,
    rng_seed: Option<u64>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            // 1280 (IPv6 minimum MTU) minus IP/UDP overhead.
            mtu: 1232,
            retransmission_timeout: Duration::from_millis(400),
            max_retransmissions: 2,
            handshake_timeout: Duration::from_secs(30),
            max_connections: 1024,
            stale_session_timeout: Duration::from_secs(36 * 60 * 60),
            connection_id_generator: CidGenerator::Disabled,
            max_fragment_length: None,
            max_deferred_fragment_bytes: 8192,
            client_authentication: ClientAuth::None,
            cipher_suites: CipherSuite::all().to_vec(),
            supported_groups: NamedGroup::all().to_vec(),
            trust_certificate_types: vec![CertificateType::X509],
            identity_certificate_types: vec![CertificateType::X509],
            sni_enabled: false,
            use_no_server_session_id: false,
            psk_identity_hint: None,
            rng_seed: None,
        }
    }

    /// Largest UDP datagram this endpoint will produce.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Base retransmission timeout; doubled on every expiry.
    #[inline(always)]
    pub fn retransmission_timeout(&self) -> Duration {
        self.retransmission_timeout
    }

    /// Retransmissions per flight before the handshake fails.
    #[inline(always)]
    pub fn max_retransmissions(&self) -> usize {
        self.max_retransmissions
    }

    /// Overall deadline for a handshake, regardless of flights.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Hard capacity bound of the connection store.
    #[inline(always)]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Inactivity threshold after which a connection may be evicted.
    #[inline(always)]
    pub fn stale_session_timeout(&self) -> Duration {
        self.stale_session_timeout
    }

    #[inline(always)]
    pub fn connection_id_generator(&self) -> CidGenerator {
        self.connection_id_generator
    }

    /// Local cap on handshake fragment bodies; also offered to the peer as
    /// the max_fragment_length extension when set (RFC 6066 sizes).
    #[inline(always)]
    pub fn max_fragment_length(&self) -> Option<usize> {
        self.max_fragment_length
    }

    /// Byte cap for buffered out-of-order handshake fragments.
    #[inline(always)]
    pub fn max_deferred_fragment_bytes(&self) -> usize {
        self.max_deferred_fragment_bytes
    }

    #[inline(always)]
    pub fn client_authentication(&self) -> ClientAuth {
        self.client_authentication
    }

    /// Enabled cipher suites in preference order.
    #[inline(always)]
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// Supported named groups in preference order.
    #[inline(always)]
    pub fn supported_groups(&self) -> &[NamedGroup] {
        &self.supported_groups
    }

    /// Acceptable peer certificate representations, preferred first.
    #[inline(always)]
    pub fn trust_certificate_types(&self) -> &[CertificateType] {
        &self.trust_certificate_types
    }

    /// Representations we can present our own identity in, preferred first.
    #[inline(always)]
    pub fn identity_certificate_types(&self) -> &[CertificateType] {
        &self.identity_certificate_types
    }

    /// Whether server name indication is processed and stored.
    #[inline(always)]
    pub fn sni_enabled(&self) -> bool {
        self.sni_enabled
    }

    /// Suppress server session ids (disables resumption towards us).
    #[inline(always)]
    pub fn use_no_server_session_id(&self) -> bool {
        self.use_no_server_session_id
    }

    /// PSK identity hint carried in ServerKeyExchange for plain-PSK suites.
    #[inline(always)]
    pub fn psk_identity_hint(&self) -> Option<&[u8]> {
        self.psk_identity_hint.as_deref()
    }

    /// Seed for deterministic randomness in tests.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }

    /// The RNG backing an engine or endpoint: a fixed-seed generator when
    /// `rng_seed` is set (deterministic tests), OS-seeded otherwise.
    pub(crate) fn new_rng(&self) -> StdRng {
        match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build().expect("default config validates")
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    mtu: usize,
    retransmission_timeout: Duration,
    max_retransmissions: usize,
    handshake_timeout: Duration,
    max_connections: usize,
    stale_session_timeout: Duration,
    connection_id_generator: CidGenerator,
    max_fragment_length: Option<usize>,
    max_deferred_fragment_bytes: usize,
    client_authentication: ClientAuth,
    cipher_suites: Vec<CipherSuite>,
    supported_groups: Vec<NamedGroup>,
    trust_certificate_types: Vec<CertificateType>,
    identity_certificate_types: Vec<CertificateType>,
    sni_enabled: bool,
    use_no_server_session_id: bool,
    psk_identity_hint: Option<Vec<u8>>,
    rng_seed: Option<u64>,
}

impl ConfigBuilder {
    /// Largest UDP datagram to produce. Defaults to 1232.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Base retransmission timeout. Defaults to 400 ms.
    pub fn retransmission_timeout(mut self, timeout: Duration) -> Self {
        self.retransmission_timeout = timeout;
        self
    }

    /// Retransmissions per flight. Defaults to 2.
    pub fn max_retransmissions(mut self, retries: usize) -> Self {
        self.max_retransmissions = retries;
        self
    }

    /// Overall handshake deadline. Defaults to 30 s.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Connection store capacity. Defaults to 1024.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Inactivity threshold for LRU eviction. Defaults to 36 h.
    pub fn stale_session_timeout(mut self, timeout: Duration) -> Self {
        self.stale_session_timeout = timeout;
        self
    }

    /// Connection-ID policy for inbound records. Defaults to disabled.
    pub fn connection_id_generator(mut self, generator: CidGenerator) -> Self {
        self.connection_id_generator = generator;
        self
    }

    /// Cap on handshake fragments; also offered via RFC 6066 when set.
    pub fn max_fragment_length(mut self, len: usize) -> Self {
        self.max_fragment_length = Some(len);
        self
    }

    /// Byte cap for out-of-order fragment buffering. Defaults to 8 KiB.
    pub fn max_deferred_fragment_bytes(mut self, cap: usize) -> Self {
        self.max_deferred_fragment_bytes = cap;
        self
    }

    /// Client certificate policy. Defaults to `None`.
    pub fn client_authentication(mut self, auth: ClientAuth) -> Self {
        self.client_authentication = auth;
        self
    }

    /// Enabled cipher suites in preference order.
    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = suites.to_vec();
        self
    }

    /// Supported named groups in preference order.
    pub fn supported_groups(mut self, groups: &[NamedGroup]) -> Self {
        self.supported_groups = groups.to_vec();
        self
    }

    /// Acceptable peer certificate representations.
    pub fn trust_certificate_types(mut self, types: &[CertificateType]) -> Self {
        self.trust_certificate_types = types.to_vec();
        self
    }

    /// Own identity representations.
    pub fn identity_certificate_types(mut self, types: &[CertificateType]) -> Self {
        self.identity_certificate_types = types.to_vec();
        self
    }

    /// Process and store server name indication. Defaults to false.
    pub fn sni_enabled(mut self, enabled: bool) -> Self {
        self.sni_enabled = enabled;
        self
    }

    /// Suppress server session ids. Defaults to false.
    pub fn use_no_server_session_id(mut self, suppress: bool) -> Self {
        self.use_no_server_session_id = suppress;
        self
    }

    /// PSK identity hint for plain-PSK ServerKeyExchange.
    pub fn psk_identity_hint(mut self, hint: &[u8]) -> Self {
        self.psk_identity_hint = Some(hint.to_vec());
        self
    }

    /// Seed all non-cryptographic randomness for deterministic tests.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<Config, Error> {
        if self.cipher_suites.is_empty() {
            return Err(Error::ConfigError("no cipher suites enabled".to_string()));
        }
        if self
            .cipher_suites
            .iter()
            .any(|s| !s.is_supported())
        {
            return Err(Error::ConfigError(
                "unknown cipher suite in configuration".to_string(),
            ));
        }
        if let CidGenerator::Length(n) = self.connection_id_generator {
            if n == 0 || n > 255 {
                return Err(Error::ConfigError(
                    "connection id length must be 1..=255".to_string(),
                ));
            }
        }
        if self.mtu < 256 {
            return Err(Error::ConfigError("mtu too small".to_string()));
        }
        if let Some(len) = self.max_fragment_length {
            if len < 512 {
                return Err(Error::ConfigError(
                    "max fragment length below 512".to_string(),
                ));
            }
        }

        Ok(Config {
            mtu: self.mtu,
            retransmission_timeout: self.retransmission_timeout,
            max_retransmissions: self.max_retransmissions,
            handshake_timeout: self.handshake_timeout,
            max_connections: self.max_connections,
            stale_session_timeout: self.stale_session_timeout,
            connection_id_generator: self.connection_id_generator,
            max_fragment_length: self.max_fragment_length,
            max_deferred_fragment_bytes: self.max_deferred_fragment_bytes,
            client_authentication: self.client_authentication,
            cipher_suites: self.cipher_suites,
            supported_groups: self.supported_groups,
            trust_certificate_types: self.trust_certificate_types,
            identity_certificate_types: self.identity_certificate_types,
            sni_enabled: self.sni_enabled,
            use_no_server_session_id: self.use_no_server_session_id,
            psk_identity_hint: self.psk_identity_hint,
            rng_seed: self.rng_seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert_eq!(config.retransmission_timeout(), Duration::from_millis(400));
        assert_eq!(config.max_retransmissions(), 2);
        assert!(!config.connection_id_generator().is_enabled());
    }

    #[test]
    fn rejects_empty_cipher_suites() {
        assert!(Config::builder().cipher_suites(&[]).build().is_err());
    }

    #[test]
    fn rejects_zero_length_cid() {
        assert!(Config::builder()
            .connection_id_generator(CidGenerator::Length(0))
            .build()
            .is_err());
        assert!(Config::builder()
            .connection_id_generator(CidGenerator::Length(6))
            .build()
            .is_ok());
    }
}
