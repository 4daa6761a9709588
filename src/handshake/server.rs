//! Server handshake state machine (full and abbreviated).

use rand::Rng;
use zeroize::Zeroizing;

use super::Services;
use crate::config::{CidGenerator, ClientAuth};
use crate::crypto::{
    calculate_master_secret, psk_premaster_secret, spki_from_certificate, verify_with_spki,
    EcdheKeyExchange, SessionKeys, MASTER_SECRET_LEN,
};
use crate::engine::Engine;
use crate::error::Error;
use crate::message::{
    find_extension, Body, CertTypeListExtension, CertificateMessage, CertificateRequest,
    CertificateType, CipherSuite, ClientHello, ClientKeyExchange, ConnectionId,
    ConnectionIdExtension, DigitallySigned, EcdheParams, Extension, ExtensionType, Finished,
    MaxFragmentLengthExtension, MessageType, NamedGroup, ParseContext, ProtocolVersion, Random,
    ServerHello, ServerKeyExchange, ServerNameExtension, SessionId,
};
use crate::reassembly::CompleteMessage;
use crate::session::{PeerIdentity, Session, SessionTicket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    ExpectClientHello,
    ExpectCertificate,
    ExpectClientKeyExchange,
    ExpectCertificateVerify,
    ExpectFinished { resumed: bool },
    Established,
}

pub struct ServerHandshaker {
    state: ServerState,
    services: Services,

    random: Random,
    client_random: Option<Random>,
    session_id: SessionId,

    /// Negotiated certificate representations.
    client_cert_type: CertificateType,
    server_cert_type: CertificateType,
    negotiated_group: Option<NamedGroup>,

    /// Our ephemeral key exchange, created for ServerKeyExchange.
    kx: Option<EcdheKeyExchange>,

    client_cert_requested: bool,
    /// A non-empty client Certificate obliges a CertificateVerify.
    expect_certificate_verify: bool,

    /// Client identity material.
    peer_chain: Vec<Vec<u8>>,
    peer_spki: Vec<u8>,
    psk_identity: Option<Vec<u8>>,

    server_name: Option<String>,
    negotiated_max_fragment: Option<usize>,
    /// Whether the hello carried the connection_id extension at all.
    client_offered_cid: bool,
    /// CID the client asked us to write on outbound records.
    peer_cid: ConnectionId,

    master_secret: Option<Zeroizing<[u8; MASTER_SECRET_LEN]>>,
    resume_ticket: Option<SessionTicket>,
}

impl ServerHandshaker {
    /// Created only after the stateless cookie exchange verified the
    /// ClientHello; `initial_seq` is that hello's message_seq. Both sides
    /// continue their counters from there (RFC 6347 §4.2.2).
    pub fn new(services: Services, initial_seq: u16, engine: &mut Engine) -> Self {
        let mut random_bytes = [0u8; 32];
        engine.rng.fill(&mut random_bytes);

        engine.reset_for_hello_verify(initial_seq);
        engine.set_next_send_seq(initial_seq);

        ServerHandshaker {
            state: ServerState::ExpectClientHello,
            services,
            random: Random::new(random_bytes),
            client_random: None,
            session_id: SessionId::empty(),
            client_cert_type: CertificateType::X509,
            server_cert_type: CertificateType::X509,
            negotiated_group: None,
            kx: None,
            client_cert_requested: false,
            expect_certificate_verify: false,
            peer_chain: Vec::new(),
            peer_spki: Vec::new(),
            psk_identity: None,
            server_name: None,
            negotiated_max_fragment: None,
            client_offered_cid: false,
            peer_cid: ConnectionId::empty(),
            master_secret: None,
            resume_ticket: None,
        }
    }

    pub fn process(&mut self, engine: &mut Engine) -> Result<Option<Session>, Error> {
        loop {
            let Some(msg_type) = engine.peek_message_type() else {
                return Ok(None);
            };

            match (self.state, msg_type) {
                (ServerState::ExpectClientHello, MessageType::ClientHello) => {
                    let msg = engine.next_message().expect("peeked");
                    engine.transcript_append_incoming(&msg);
                    let (_, hello) = ClientHello::parse(&msg.body).map_err(Error::from)?;
                    self.process_client_hello(engine, hello)?;
                }
                (ServerState::ExpectCertificate, MessageType::Certificate) => {
                    let msg = engine.next_message().expect("peeked");
                    engine.transcript_append_incoming(&msg);
                    self.process_client_certificate(engine, &msg)?;
                }
                (ServerState::ExpectClientKeyExchange, MessageType::ClientKeyExchange) => {
                    let msg = engine.next_message().expect("peeked");
                    engine.transcript_append_incoming(&msg);
                    self.process_client_key_exchange(engine, &msg)?;
                }
                (ServerState::ExpectCertificateVerify, MessageType::CertificateVerify) => {
                    // The signature covers the transcript up to and
                    // excluding this message.
                    let msg = engine.next_message().expect("peeked");
                    self.process_certificate_verify(engine, &msg)?;
                    engine.transcript_append_incoming(&msg);
                    self.state = ServerState::ExpectFinished { resumed: false };
                }
                (ServerState::ExpectFinished { resumed }, MessageType::Finished) => {
                    let session = self.process_client_finished(engine, resumed)?;
                    return Ok(Some(session));
                }
                (ServerState::Established, _) => {
                    return Err(Error::UnexpectedMessage(
                        "handshake message after establishment".to_string(),
                    ));
                }
                (state, other) => {
                    return Err(Error::UnexpectedMessage(format!(
                        "{:?} in state {:?}",
                        other, state
                    )));
                }
            }
        }
    }

    // --- ClientHello -----------------------------------------------------

    fn process_client_hello(&mut self, engine: &mut Engine, hello: ClientHello) -> Result<(), Error> {
        if !hello.client_version.is_at_least_dtls12() {
            return Err(Error::ProtocolVersion(format!(
                "client offered {:?}",
                hello.client_version
            )));
        }
        if !hello.offers_null_compression() {
            return Err(Error::HandshakeFailure(
                "client does not offer null compression".to_string(),
            ));
        }

        self.client_random = Some(hello.random);
        self.process_hello_extensions(engine, &hello)?;

        // Abbreviated handshake when the offered session id is cached and
        // the client still offers its suite.
        if !hello.session_id.is_empty() {
            if let Some(cache) = &self.services.session_cache {
                if let Some(ticket) = cache.get(&hello.session_id) {
                    if hello.cipher_suites.contains(&ticket.cipher_suite) {
                        return self.start_abbreviated(engine, ticket);
                    }
                }
            }
        }

        self.start_full(engine, &hello)
    }

    fn process_hello_extensions(
        &mut self,
        engine: &mut Engine,
        hello: &ClientHello,
    ) -> Result<(), Error> {
        if let Some(ext) = find_extension(&hello.extensions, ExtensionType::MaxFragmentLength) {
            let (_, mfl) = MaxFragmentLengthExtension::parse(&ext.data).map_err(Error::from)?;
            let len = mfl.fragment_length().ok_or_else(|| {
                // RFC 6066 §4: an illegal code is fatal.
                Error::DecodeError("illegal max_fragment_length code".to_string())
            })?;
            self.negotiated_max_fragment = Some(len);
            engine.set_negotiated_max_fragment(len);
        }

        if let Some(ext) = find_extension(&hello.extensions, ExtensionType::ConnectionId) {
            let (_, cid_ext) = ConnectionIdExtension::parse(&ext.data).map_err(Error::from)?;
            self.client_offered_cid = true;
            self.peer_cid = cid_ext.cid;
        }

        if engine.config().sni_enabled() {
            if let Some(ext) = find_extension(&hello.extensions, ExtensionType::ServerName) {
                let (_, sni) = ServerNameExtension::parse(&ext.data).map_err(Error::from)?;
                if let Some(name) = sni.host_name {
                    debug!("Client indicated server name {}", name);
                    self.server_name = Some(name);
                }
            }
        }

        Ok(())
    }

    /// Extensions echoed in the ServerHello.
    fn server_hello_extensions(
        &self,
        engine: &Engine,
        hello: &ClientHello,
        suite: Option<CipherSuite>,
    ) -> Vec<Extension> {
        let mut extensions = Vec::new();

        if let Some(len) = self.negotiated_max_fragment {
            if let Some(mfl) = MaxFragmentLengthExtension::from_length(len) {
                extensions.push(mfl.to_extension());
            }
        }

        // Reply with a CID iff the client offered the extension and we are
        // configured to use (or at least support) CIDs.
        let client_offered_cid =
            find_extension(&hello.extensions, ExtensionType::ConnectionId).is_some();
        if client_offered_cid && engine.config().connection_id_generator().is_enabled() {
            let cid = match engine.config().connection_id_generator() {
                CidGenerator::Length(_) => *engine.local_cid(),
                _ => ConnectionId::empty(),
            };
            extensions.push(ConnectionIdExtension::new(cid).to_extension());
        }

        if self.server_name.is_some() {
            // RFC 6066 §3: acknowledge SNI with an empty extension.
            extensions.push(ServerNameExtension::empty().to_extension());
        }

        if let Some(suite) = suite {
            if suite.requires_server_certificate() {
                if find_extension(&hello.extensions, ExtensionType::ClientCertificateType)
                    .is_some()
                {
                    extensions.push(CertTypeListExtension::to_single_extension(
                        self.client_cert_type,
                        ExtensionType::ClientCertificateType,
                    ));
                }
                if find_extension(&hello.extensions, ExtensionType::ServerCertificateType)
                    .is_some()
                {
                    extensions.push(CertTypeListExtension::to_single_extension(
                        self.server_cert_type,
                        ExtensionType::ServerCertificateType,
                    ));
                }
            }
        }

        extensions
    }

    // --- abbreviated handshake -------------------------------------------

    fn start_abbreviated(&mut self, engine: &mut Engine, ticket: SessionTicket) -> Result<(), Error> {
        debug!("Resuming session {:?}", ticket.session_id);

        let suite = ticket.cipher_suite;
        engine.set_cipher_suite(suite);
        self.session_id = ticket.session_id;
        self.master_secret = Some(ticket.master_secret.clone());

        engine.flight_begin(2);

        // The extension echo set is rebuilt from the stored hello state.
        let mut server_hello = ServerHello::new(
            ProtocolVersion::DTLS1_2,
            self.random,
            self.session_id,
            suite,
        );
        if let Some(len) = self.negotiated_max_fragment {
            if let Some(mfl) = MaxFragmentLengthExtension::from_length(len) {
                server_hello.extensions.push(mfl.to_extension());
            }
        }
        if self.client_offered_cid && engine.config().connection_id_generator().is_enabled() {
            let cid = match engine.config().connection_id_generator() {
                CidGenerator::Length(_) => *engine.local_cid(),
                _ => ConnectionId::empty(),
            };
            server_hello
                .extensions
                .push(ConnectionIdExtension::new(cid).to_extension());
        }
        if self.server_name.is_some() {
            server_hello
                .extensions
                .push(ServerNameExtension::empty().to_extension());
        }

        engine.create_handshake(MessageType::ServerHello, |body, _| {
            server_hello.serialize(body);
            Ok(())
        })?;

        self.install_keys(engine)?;
        engine.send_ccs()?;
        self.send_finished(engine)?;

        self.resume_ticket = Some(ticket);
        self.state = ServerState::ExpectFinished { resumed: true };
        Ok(())
    }

    // --- full handshake --------------------------------------------------

    fn start_full(&mut self, engine: &mut Engine, hello: &ClientHello) -> Result<(), Error> {
        let config = engine.config();

        // Certificate-type and group negotiation feed suite eligibility.
        let client_cert_type = negotiate_cert_type(
            find_extension(&hello.extensions, ExtensionType::ClientCertificateType),
            config.trust_certificate_types(),
        )?;
        let server_cert_type = negotiate_cert_type(
            find_extension(&hello.extensions, ExtensionType::ServerCertificateType),
            config.identity_certificate_types(),
        )?;
        let group = negotiate_group(
            find_extension(&hello.extensions, ExtensionType::SupportedGroups),
            config.supported_groups(),
        )?;

        let client_auth = config.client_authentication();

        let mut selected = None;
        for suite in &hello.cipher_suites {
            if !config.cipher_suites().contains(suite) {
                continue;
            }
            if !self.is_eligible(*suite, client_cert_type, server_cert_type, group, client_auth) {
                continue;
            }
            selected = Some(*suite);
            break;
        }

        let Some(suite) = selected else {
            return Err(Error::HandshakeFailure(
                "no mutually acceptable cipher suite".to_string(),
            ));
        };
        debug!("Negotiated {:?}", suite);

        engine.set_cipher_suite(suite);
        self.negotiated_group = group;
        if let Some(t) = client_cert_type {
            self.client_cert_type = t;
        }
        if let Some(t) = server_cert_type {
            self.server_cert_type = t;
        }

        self.session_id = if engine.config().use_no_server_session_id() {
            SessionId::empty()
        } else {
            let mut id = [0u8; 32];
            engine.rng.fill(&mut id);
            SessionId::try_new(&id).expect("32 bytes is a legal session id")
        };

        self.client_cert_requested =
            suite.requires_server_certificate() && client_auth != ClientAuth::None;

        self.send_server_flight(engine, hello, suite)?;

        self.state = if self.client_cert_requested {
            ServerState::ExpectCertificate
        } else {
            ServerState::ExpectClientKeyExchange
        };

        Ok(())
    }

    /// Suite eligibility (never TLS_NULL_WITH_NULL_NULL, which the parser
    /// already drops as unknown).
    fn is_eligible(
        &self,
        suite: CipherSuite,
        client_cert_type: Option<CertificateType>,
        server_cert_type: Option<CertificateType>,
        group: Option<NamedGroup>,
        client_auth: ClientAuth,
    ) -> bool {
        if !self.services.supports_suite(suite, false) {
            return false;
        }
        if suite.is_ecc() && group.is_none() {
            return false;
        }
        if suite.requires_server_certificate() {
            if server_cert_type.is_none() {
                return false;
            }
            if client_auth != ClientAuth::None && client_cert_type.is_none() {
                return false;
            }
        }
        true
    }

    /// Flight 4: ServerHello, [Certificate], [ServerKeyExchange],
    /// [CertificateRequest], ServerHelloDone.
    fn send_server_flight(
        &mut self,
        engine: &mut Engine,
        hello: &ClientHello,
        suite: CipherSuite,
    ) -> Result<(), Error> {
        engine.flight_begin(4);

        let mut server_hello = ServerHello::new(
            ProtocolVersion::DTLS1_2,
            self.random,
            self.session_id,
            suite,
        );
        for ext in self.server_hello_extensions(engine, hello, Some(suite)) {
            server_hello.extensions.push(ext);
        }
        engine.create_handshake(MessageType::ServerHello, |body, _| {
            server_hello.serialize(body);
            Ok(())
        })?;

        if suite.requires_server_certificate() {
            let credentials = self
                .services
                .credentials
                .clone()
                .ok_or_else(|| Error::HandshakeFailure("no server credentials".to_string()))?;
            let message = match self.server_cert_type {
                CertificateType::RawPublicKey => {
                    CertificateMessage::raw_public_key(credentials.spki.clone())
                }
                _ => CertificateMessage::x509(credentials.certificate_chain.clone()),
            };
            engine.create_handshake(MessageType::Certificate, |body, _| {
                message.serialize(body);
                Ok(())
            })?;
        }

        self.send_server_key_exchange(engine, suite)?;

        if self.client_cert_requested {
            let request = CertificateRequest::new();
            engine.create_handshake(MessageType::CertificateRequest, |body, _| {
                request.serialize(body);
                Ok(())
            })?;
        }

        engine.create_handshake(MessageType::ServerHelloDone, |_, _| Ok(()))?;

        Ok(())
    }

    fn send_server_key_exchange(
        &mut self,
        engine: &mut Engine,
        suite: CipherSuite,
    ) -> Result<(), Error> {
        use crate::message::KeyExchangeAlgorithm::*;

        match suite.key_exchange_algorithm() {
            EcdheEcdsa => {
                let group = self
                    .negotiated_group
                    .ok_or_else(|| Error::HandshakeFailure("no common group".to_string()))?;
                let kx = EcdheKeyExchange::new(group)?;
                let params = EcdheParams::new(group, kx.public_key().to_vec());

                let client_random = self
                    .client_random
                    .ok_or_else(|| Error::UnexpectedMessage("no client random".to_string()))?;
                let mut signed_data = Vec::new();
                signed_data.extend_from_slice(&client_random);
                signed_data.extend_from_slice(&self.random);
                params.serialize(&mut signed_data);

                let credentials = self
                    .services
                    .credentials
                    .clone()
                    .ok_or_else(|| Error::HandshakeFailure("no server credentials".to_string()))?;
                let signature = credentials.key.sign(&signed_data)?;
                let signed = DigitallySigned::new(credentials.key.algorithm(), signature);

                let ske = ServerKeyExchange::Ecdhe { params, signed };
                self.kx = Some(kx);
                engine.create_handshake(MessageType::ServerKeyExchange, |body, _| {
                    ske.serialize(body);
                    Ok(())
                })
            }
            Psk => {
                // Without a configured hint the message is omitted entirely
                // (RFC 4279 §2).
                let Some(hint) = engine.config().psk_identity_hint().map(|h| h.to_vec()) else {
                    return Ok(());
                };
                let ske = ServerKeyExchange::Psk {
                    identity_hint: hint,
                };
                engine.create_handshake(MessageType::ServerKeyExchange, |body, _| {
                    ske.serialize(body);
                    Ok(())
                })
            }
            EcdhePsk => {
                let group = self
                    .negotiated_group
                    .ok_or_else(|| Error::HandshakeFailure("no common group".to_string()))?;
                let kx = EcdheKeyExchange::new(group)?;
                let params = EcdheParams::new(group, kx.public_key().to_vec());
                let hint = engine
                    .config()
                    .psk_identity_hint()
                    .map(|h| h.to_vec())
                    .unwrap_or_default();

                let ske = ServerKeyExchange::EcdhePsk {
                    identity_hint: hint,
                    params,
                };
                self.kx = Some(kx);
                engine.create_handshake(MessageType::ServerKeyExchange, |body, _| {
                    ske.serialize(body);
                    Ok(())
                })
            }
            Unknown => Err(Error::HandshakeFailure("unknown key exchange".to_string())),
        }
    }

    // --- client flight ---------------------------------------------------

    fn process_client_certificate(
        &mut self,
        engine: &mut Engine,
        msg: &CompleteMessage,
    ) -> Result<(), Error> {
        let (_, cert) =
            CertificateMessage::parse(&msg.body, self.client_cert_type).map_err(Error::from)?;

        if cert.is_empty() {
            if engine.config().client_authentication() == ClientAuth::Required {
                return Err(Error::HandshakeFailure(
                    "client certificate required but not provided".to_string(),
                ));
            }
            debug!("Client declined to send a certificate");
            self.expect_certificate_verify = false;
        } else {
            match &cert {
                CertificateMessage::X509 { chain } => {
                    self.peer_chain = chain.clone();
                    self.peer_spki = spki_from_certificate(&chain[0])?;
                }
                CertificateMessage::RawPublicKey { spki } => {
                    self.peer_spki = spki.clone();
                }
            }
            self.services.verify_peer_certificate(
                self.client_cert_type,
                &self.peer_chain,
                &self.peer_spki,
            )?;
            self.expect_certificate_verify = true;
        }

        self.state = ServerState::ExpectClientKeyExchange;
        Ok(())
    }

    fn process_client_key_exchange(
        &mut self,
        engine: &mut Engine,
        msg: &CompleteMessage,
    ) -> Result<(), Error> {
        let suite = engine
            .cipher_suite()
            .ok_or_else(|| Error::UnexpectedMessage("no cipher suite".to_string()))?;
        let ctx = ParseContext {
            cipher_suite: Some(suite),
            peer_cert_type: self.client_cert_type,
        };
        let (_, body) = Body::parse(&msg.body, MessageType::ClientKeyExchange, &ctx)
            .map_err(Error::from)?;
        let Body::ClientKeyExchange(cke) = body else {
            return Err(Error::DecodeError("bad ClientKeyExchange".to_string()));
        };

        let premaster = match cke {
            ClientKeyExchange::Ecdhe { public_key } => {
                let kx = self
                    .kx
                    .take()
                    .ok_or_else(|| Error::UnexpectedMessage("no pending key exchange".to_string()))?;
                kx.complete(&public_key)?
            }
            ClientKeyExchange::Psk { identity } => {
                let key = self.lookup_psk(&identity)?;
                self.psk_identity = Some(identity.to_vec());
                psk_premaster_secret(None, &key)
            }
            ClientKeyExchange::EcdhePsk {
                identity,
                public_key,
            } => {
                let kx = self
                    .kx
                    .take()
                    .ok_or_else(|| Error::UnexpectedMessage("no pending key exchange".to_string()))?;
                let other = kx.complete(&public_key)?;
                let key = self.lookup_psk(&identity)?;
                self.psk_identity = Some(identity.to_vec());
                psk_premaster_secret(Some(&other), &key)
            }
        };

        let client_random = self
            .client_random
            .ok_or_else(|| Error::UnexpectedMessage("no client random".to_string()))?;
        let master = calculate_master_secret(
            &premaster,
            &client_random,
            &self.random,
            suite.hash_algorithm(),
        )?;
        let mut secret = [0u8; MASTER_SECRET_LEN];
        secret.copy_from_slice(&master);
        self.master_secret = Some(Zeroizing::new(secret));

        // Keys are needed now to decrypt the client's Finished.
        self.install_keys(engine)?;

        self.state = if self.expect_certificate_verify {
            ServerState::ExpectCertificateVerify
        } else {
            ServerState::ExpectFinished { resumed: false }
        };
        Ok(())
    }

    fn lookup_psk(&self, identity: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
        let store = self
            .services
            .psk_store
            .as_ref()
            .ok_or_else(|| Error::UnknownPskIdentity("no PSK store".to_string()))?;
        store
            .key(self.server_name.as_deref(), identity)
            .ok_or_else(|| {
                Error::UnknownPskIdentity(format!(
                    "identity {:02x?} unknown{}",
                    identity,
                    match &self.server_name {
                        Some(name) => format!(" for server {}", name),
                        None => String::new(),
                    }
                ))
            })
    }

    fn process_certificate_verify(
        &mut self,
        engine: &mut Engine,
        msg: &CompleteMessage,
    ) -> Result<(), Error> {
        let (_, cv) = crate::message::CertificateVerify::parse(&msg.body).map_err(Error::from)?;

        if self.peer_spki.is_empty() {
            return Err(Error::UnexpectedMessage(
                "CertificateVerify without a client certificate".to_string(),
            ));
        }

        verify_with_spki(
            &self.peer_spki,
            engine.transcript(),
            &cv.signed.signature,
            cv.signed.algorithm,
        )
    }

    fn process_client_finished(
        &mut self,
        engine: &mut Engine,
        resumed: bool,
    ) -> Result<Session, Error> {
        let master = self
            .master_secret
            .as_ref()
            .ok_or_else(|| Error::CryptoError("master secret not derived".to_string()))?
            .clone();
        let expected = engine.verify_data(true, &master[..])?;

        let msg = engine.next_message().expect("peeked");
        if msg.epoch != 1 {
            // A Finished outside epoch 1 means the client skipped
            // CHANGE_CIPHER_SPEC; never establish on it.
            return Err(Error::UnexpectedMessage(
                "Finished outside epoch 1".to_string(),
            ));
        }
        let (_, finished) = Finished::parse(&msg.body).map_err(Error::from)?;
        if finished.verify_data != expected {
            return Err(Error::DecryptError(
                "client Finished verify_data mismatch".to_string(),
            ));
        }
        engine.transcript_append_incoming(&msg);

        if !resumed {
            // Flight 6: CHANGE_CIPHER_SPEC + Finished. Terminal: it has no
            // successor, so it is kept for peer retransmissions.
            engine.flight_begin(6);
            engine.send_ccs()?;
            self.send_finished(engine)?;
            engine.flight_mark_terminal();
        }

        engine.set_peer_cid(self.peer_cid);
        engine.handshake_complete();
        self.state = ServerState::Established;

        let session = self.build_session(engine)?;

        if session.is_resumable() {
            if let Some(cache) = &self.services.session_cache {
                cache.put(session.ticket());
            }
        }

        debug!("Server handshake established (resumed: {})", resumed);
        Ok(session)
    }

    fn send_finished(&mut self, engine: &mut Engine) -> Result<(), Error> {
        let master = self
            .master_secret
            .as_ref()
            .ok_or_else(|| Error::CryptoError("master secret not derived".to_string()))?
            .clone();
        engine.create_handshake(MessageType::Finished, move |body, engine| {
            let verify_data = engine.verify_data(false, &master[..])?;
            Finished::new(verify_data).serialize(body);
            Ok(())
        })
    }

    fn install_keys(&mut self, engine: &mut Engine) -> Result<(), Error> {
        let suite = engine
            .cipher_suite()
            .ok_or_else(|| Error::UnexpectedMessage("no cipher suite".to_string()))?;
        let master = self
            .master_secret
            .as_ref()
            .ok_or_else(|| Error::CryptoError("master secret not derived".to_string()))?;
        let client_random = self
            .client_random
            .ok_or_else(|| Error::UnexpectedMessage("no client random".to_string()))?;

        let keys = SessionKeys::derive(suite, &master[..], &client_random, &self.random)?;
        engine.install_keys(keys)
    }

    fn build_session(&mut self, engine: &Engine) -> Result<Session, Error> {
        let suite = engine
            .cipher_suite()
            .ok_or_else(|| Error::UnexpectedMessage("no cipher suite".to_string()))?;
        let master = self
            .master_secret
            .as_ref()
            .ok_or_else(|| Error::CryptoError("master secret not derived".to_string()))?;

        let peer_identity = if let Some(ticket) = &self.resume_ticket {
            ticket.peer_identity.clone()
        } else if let Some(identity) = &self.psk_identity {
            PeerIdentity::PskIdentity {
                identity: identity.clone(),
                virtual_host: self.server_name.clone(),
            }
        } else if !self.peer_chain.is_empty() {
            PeerIdentity::Certificate {
                chain: self.peer_chain.clone(),
            }
        } else if !self.peer_spki.is_empty() {
            PeerIdentity::RawPublicKey {
                spki: self.peer_spki.clone(),
            }
        } else {
            // Certificate suite without client auth: the peer is anonymous
            // at this layer; record the empty chain.
            PeerIdentity::Certificate { chain: Vec::new() }
        };

        Ok(Session {
            session_id: self.session_id,
            master_secret: master.clone(),
            cipher_suite: suite,
            peer_identity,
            server_name: self.server_name.clone(),
            max_fragment_length: self.negotiated_max_fragment,
            peer_cid: self.peer_cid,
        })
    }
}

impl std::fmt::Debug for ServerHandshaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandshaker")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Rule (e): with the extension present, the first client-listed type that
/// we also support wins; with it absent, X.509 if supported.
fn negotiate_cert_type(
    extension: Option<&Extension>,
    supported: &[CertificateType],
) -> Result<Option<CertificateType>, Error> {
    match extension {
        Some(ext) => {
            let (_, list) = CertTypeListExtension::parse_list(&ext.data).map_err(Error::from)?;
            Ok(list.types.iter().find(|t| supported.contains(t)).copied())
        }
        None => Ok(supported
            .contains(&CertificateType::X509)
            .then_some(CertificateType::X509)),
    }
}

/// Rule (d): first client-offered group that we support; without the
/// extension, our top preference.
fn negotiate_group(
    extension: Option<&Extension>,
    supported: &[NamedGroup],
) -> Result<Option<NamedGroup>, Error> {
    match extension {
        Some(ext) => {
            let (_, parsed) =
                crate::message::SupportedGroupsExtension::parse(&ext.data).map_err(Error::from)?;
            Ok(parsed.groups.iter().find(|g| supported.contains(g)).copied())
        }
        None => Ok(supported.first().copied()),
    }
}
