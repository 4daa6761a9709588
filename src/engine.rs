//! Per-connection record engine.
//!
//! Owns everything below the handshake state machine: record framing and
//! protection, per-epoch sequence numbers, the replay window, CID handling,
//! datagram packing under the MTU, handshake fragmentation, the transcript,
//! and flight retention with exponential-backoff retransmission.
//!
//! Buffers are plain byte vectors; the ones that carry plaintext or key
//! material (retained flight records, decrypt scratch) are zeroized when
//! they are released.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::Rng;
use zeroize::{Zeroize, Zeroizing};

use crate::config::Config;
use crate::crypto::{
    generate_verify_data, Aad, Nonce, SessionKeys, DTLS_AEAD_OVERHEAD, DTLS_EXPLICIT_NONCE_LEN,
};
use crate::error::{AlertDescription, Error};
use crate::message::{
    Alert, AlertLevel, CipherSuite, ConnectionId, ContentType, DtlsRecord, HandshakeHeader,
    MessageType, ProtocolVersion, Sequence, VERIFY_DATA_LEN,
};
use crate::reassembly::{Accept, CompleteMessage, Reassembler};
use crate::timer::RetransmitBackoff;
use crate::window::ReplayWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timeout {
    Disabled,
    Unarmed,
    Armed(Instant),
}

/// One retained record of the current flight, pre-encryption. The plaintext
/// is scrubbed when the flight is dropped.
#[derive(Debug)]
struct Entry {
    content_type: ContentType,
    epoch: u16,
    fragment: Zeroizing<Vec<u8>>,
}

pub struct Engine {
    config: Arc<Config>,
    pub(crate) rng: StdRng,
    is_client: bool,

    /// Epoch-0 sequence counter, kept separate: resends of epoch-0 records
    /// continue here even after the write epoch has advanced.
    sequence_epoch_0: Sequence,
    /// Epoch-1 sequence counter.
    sequence_epoch_n: Sequence,
    /// Current write epoch; bumps when CHANGE_CIPHER_SPEC is sent.
    write_epoch: u16,

    /// Current read epoch; bumps when CHANGE_CIPHER_SPEC is received.
    read_epoch: u16,
    replay: ReplayWindow,
    /// CCS seen before the key exchange finished (reordered flight);
    /// applied when the keys install.
    ccs_pending: bool,
    /// Raw epoch-1 records that arrived before we could decrypt them. A
    /// whole flight can show up in one datagram with its CCS mid-way, so
    /// the tail is parked here and replayed after the epoch advances.
    pending_encrypted: Vec<Vec<u8>>,

    /// CID carried on inbound records addressed to us (out-of-band
    /// agreement; empty disables CID routing to this connection).
    local_cid: ConnectionId,
    /// CID to attach on outbound records once the session is established.
    peer_cid: ConnectionId,

    cipher_suite: Option<CipherSuite>,
    keys: Option<SessionKeys>,

    /// Next handshake message_seq for sending.
    next_handshake_seq_no: u16,
    /// Running transcript of handshake-layer bytes in send/receive order.
    transcript: Vec<u8>,

    reassembly: Reassembler,

    /// Negotiated RFC 6066 fragment cap, if any.
    negotiated_max_fragment: Option<usize>,

    flight_saved_records: Vec<Entry>,
    flight_number: u8,
    flight_is_terminal: bool,
    flight_backoff: RetransmitBackoff,
    flight_timeout: Timeout,
    connect_timeout: Timeout,
    handshake_complete: bool,
    /// At most one flight resend per inbound datagram.
    resend_triggered: bool,

    queue_tx: VecDeque<Vec<u8>>,
    queue_app_rx: VecDeque<Vec<u8>>,
}

impl Engine {
    pub fn new(config: Arc<Config>, is_client: bool, local_cid: ConnectionId) -> Self {
        let mut rng = config.new_rng();
        let flight_backoff = RetransmitBackoff::new(
            config.retransmission_timeout(),
            config.max_retransmissions(),
            &mut rng,
        );
        let reassembly = Reassembler::new(config.max_deferred_fragment_bytes());

        Self {
            config,
            rng,
            is_client,
            sequence_epoch_0: Sequence::new(0),
            sequence_epoch_n: Sequence::new(1),
            write_epoch: 0,
            read_epoch: 0,
            replay: ReplayWindow::new(),
            ccs_pending: false,
            pending_encrypted: Vec::new(),
            local_cid,
            peer_cid: ConnectionId::empty(),
            cipher_suite: None,
            keys: None,
            next_handshake_seq_no: 0,
            transcript: Vec::new(),
            reassembly,
            negotiated_max_fragment: None,
            flight_saved_records: Vec::new(),
            flight_number: 0,
            flight_is_terminal: false,
            flight_backoff,
            flight_timeout: Timeout::Unarmed,
            connect_timeout: Timeout::Unarmed,
            handshake_complete: false,
            resend_triggered: false,
            queue_tx: VecDeque::new(),
            queue_app_rx: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.cipher_suite
    }

    pub fn set_cipher_suite(&mut self, cipher_suite: CipherSuite) {
        self.cipher_suite = Some(cipher_suite);
    }

    pub fn local_cid(&self) -> &ConnectionId {
        &self.local_cid
    }

    pub fn set_peer_cid(&mut self, cid: ConnectionId) {
        self.peer_cid = cid;
    }

    pub fn set_negotiated_max_fragment(&mut self, len: usize) {
        self.negotiated_max_fragment = Some(len);
    }

    /// Install the epoch-1 keys. Gates all epoch ≥ 1 record production.
    /// A CCS that arrived ahead of the key exchange is applied now, which
    /// also replays any parked epoch-1 records.
    pub fn install_keys(&mut self, keys: SessionKeys) -> Result<(), Error> {
        self.keys = Some(keys);
        if self.ccs_pending {
            self.ccs_pending = false;
            self.apply_ccs()?;
        }
        Ok(())
    }

    pub fn read_epoch(&self) -> u16 {
        self.read_epoch
    }

    // --- inbound ---------------------------------------------------------

    /// Feed one UDP datagram. Handshake fragments land in the reassembler;
    /// application data is queued. Returns fatal protocol errors.
    pub fn parse_datagram(&mut self, datagram: &[u8]) -> Result<(), Error> {
        self.resend_triggered = false;

        let mut rest = datagram;
        while !rest.is_empty() {
            let record_len = DtlsRecord::peek_record_len(rest, self.local_cid.len())
                .ok_or(Error::ParseIncomplete)?;
            if rest.len() < record_len {
                return Err(Error::ParseIncomplete);
            }
            let record_bytes = &rest[..record_len];
            self.handle_record(record_bytes)?;
            rest = &rest[record_len..];
        }

        Ok(())
    }

    fn handle_record(&mut self, record_bytes: &[u8]) -> Result<(), Error> {
        let (_, record) = DtlsRecord::parse(record_bytes, 0, self.local_cid.len())?;
        let epoch = record.sequence.epoch;

        if epoch > self.read_epoch {
            // Epoch-1 records often share a datagram with the CCS that
            // unlocks them; park a bounded number for replay. Anything
            // beyond that the peer will retransmit.
            const MAX_PENDING_ENCRYPTED: usize = 8;
            if epoch == 1 && self.pending_encrypted.len() < MAX_PENDING_ENCRYPTED {
                self.pending_encrypted.push(record_bytes.to_vec());
            } else {
                trace!("Discarding record from future epoch {}", epoch);
            }
            return Ok(());
        }

        if epoch < self.read_epoch {
            // Old-epoch records are normally noise from retransmission, but
            // plaintext handshake records after we rolled forward mean the
            // peer never saw our terminal flight.
            if record.content_type == ContentType::Handshake {
                self.trigger_flight_resend("old-epoch handshake record")?;
            }
            return Ok(());
        }

        if epoch == 0 {
            let fragment = record.fragment(record_bytes);
            return self.dispatch_plaintext(record.content_type, fragment, epoch);
        }

        // Encrypted record under the current read epoch.
        if !self.replay.is_fresh(record.sequence.sequence_number) {
            trace!(
                "Replayed record (epoch {}, seq {})",
                epoch,
                record.sequence.sequence_number
            );
            return Ok(());
        }

        let Some(keys) = &self.keys else {
            trace!("Encrypted record before keys are ready; discarding");
            return Ok(());
        };

        let fragment = record.fragment(record_bytes);
        if fragment.len() < DTLS_AEAD_OVERHEAD {
            return Err(Error::DecodeError("record below AEAD overhead".to_string()));
        }

        let plaintext_len = (record.length as usize - DTLS_AEAD_OVERHEAD) as u16;
        let aad = Aad::new(
            record.content_type,
            ProtocolVersion::DTLS1_2,
            record.sequence,
            plaintext_len,
            &record.cid,
        );
        let nonce = Nonce::new(keys.read_iv(self.is_client), record.nonce(record_bytes));

        let mut scratch = fragment[DTLS_EXPLICIT_NONCE_LEN..].to_vec();
        keys.read_cipher(self.is_client)
            .decrypt(&mut scratch, &aad, &nonce)?;

        // Only an authenticated record slides the replay window.
        self.replay.check_and_update(record.sequence.sequence_number);

        // CID records carry the true content type as the last plaintext byte.
        let content_type = if record.content_type == ContentType::Tls12Cid {
            let inner = scratch
                .pop()
                .ok_or_else(|| Error::DecodeError("empty CID record".to_string()))?;
            ContentType::from_u8(inner)
        } else {
            record.content_type
        };

        let result = self.dispatch_plaintext(content_type, &scratch, epoch);
        // The scratch held decrypted plaintext.
        scratch.zeroize();
        result
    }

    fn dispatch_plaintext(
        &mut self,
        content_type: ContentType,
        fragment: &[u8],
        epoch: u16,
    ) -> Result<(), Error> {
        match content_type {
            ContentType::Handshake => self.handle_handshake_fragmentset(fragment, epoch),
            ContentType::ChangeCipherSpec => self.handle_ccs(fragment),
            ContentType::Alert => self.handle_alert(fragment),
            ContentType::ApplicationData => {
                if self.handshake_complete && epoch >= 1 {
                    self.queue_app_rx.push_back(fragment.to_vec());
                } else {
                    trace!("Dropping application data outside an established session");
                }
                Ok(())
            }
            ContentType::Tls12Cid => Err(Error::DecodeError("nested CID record".to_string())),
            ContentType::Unknown(v) => {
                Err(Error::DecodeError(format!("unknown content type {}", v)))
            }
        }
    }

    fn handle_handshake_fragmentset(&mut self, mut input: &[u8], epoch: u16) -> Result<(), Error> {
        while !input.is_empty() {
            let (rest, header) = HandshakeHeader::parse(input)?;
            if rest.len() < header.fragment_length as usize {
                return Err(Error::ParseIncomplete);
            }
            let (fragment, rest) = rest.split_at(header.fragment_length as usize);

            // The implicit acknowledgement of our flight is the peer's
            // *complete* next flight: the handshaker then begins the next
            // own flight, which discards the retained one. Partial receipt
            // keeps the retransmission timer running.
            match self.reassembly.accept(&header, fragment, epoch)? {
                Accept::Absorbed => {}
                Accept::Retransmission => {
                    if header.fragment_offset == 0 {
                        self.trigger_flight_resend("duplicate handshake message")?;
                    }
                }
                Accept::DroppedOverCap => {}
            }

            input = rest;
        }
        Ok(())
    }

    fn handle_ccs(&mut self, fragment: &[u8]) -> Result<(), Error> {
        if fragment != [1] {
            return Err(Error::DecodeError("malformed ChangeCipherSpec".to_string()));
        }
        if self.read_epoch != 0 {
            // Duplicate CCS from a retransmitted flight.
            return Ok(());
        }
        if self.keys.is_none() {
            // The whole flight may have arrived in one datagram; the key
            // exchange message has not been consumed yet. Defer.
            debug!("ChangeCipherSpec ahead of the key exchange; deferring");
            self.ccs_pending = true;
            return Ok(());
        }

        self.apply_ccs()
    }

    fn apply_ccs(&mut self) -> Result<(), Error> {
        debug!("Peer switched to epoch 1");
        self.read_epoch = 1;
        self.replay.reset();

        // Replay records that were waiting for this epoch.
        for bytes in std::mem::take(&mut self.pending_encrypted) {
            self.handle_record(&bytes)?;
        }
        Ok(())
    }

    fn handle_alert(&mut self, fragment: &[u8]) -> Result<(), Error> {
        let (_, alert) = Alert::parse(fragment)?;
        match (alert.level, alert.description) {
            (_, AlertDescription::CloseNotify) => Err(Error::Closed),
            (AlertLevel::Fatal, description) => Err(Error::PeerAlert(description)),
            (level, description) => {
                debug!("Ignoring {:?} alert {:?}", level, description);
                Ok(())
            }
        }
    }

    // --- reassembled message access --------------------------------------

    /// Type of the next complete in-order handshake message, if any.
    pub fn peek_message_type(&self) -> Option<MessageType> {
        self.reassembly.peek_complete_type()
    }

    /// Pop the next complete in-order handshake message. The caller decides
    /// when it enters the transcript (the peer's Finished is verified
    /// against the transcript *without* itself).
    pub fn next_message(&mut self) -> Option<CompleteMessage> {
        self.reassembly.pop_complete()
    }

    /// Append a consumed inbound message to the transcript, re-serialized
    /// as an unfragmented handshake message.
    pub fn transcript_append_incoming(&mut self, message: &CompleteMessage) {
        let header = HandshakeHeader {
            msg_type: message.msg_type,
            length: message.body.len() as u32,
            message_seq: message.message_seq,
            fragment_offset: 0,
            fragment_length: message.body.len() as u32,
        };
        header.serialize(&mut self.transcript);
        self.transcript.extend_from_slice(&message.body);
    }

    pub fn transcript(&self) -> &[u8] {
        &self.transcript
    }

    /// Compute Finished verify_data over the current transcript.
    pub fn verify_data(
        &self,
        for_client: bool,
        master_secret: &[u8],
    ) -> Result<[u8; VERIFY_DATA_LEN], Error> {
        let suite = self
            .cipher_suite
            .ok_or_else(|| Error::UnexpectedMessage("no cipher suite selected".to_string()))?;
        generate_verify_data(
            master_secret,
            &self.transcript,
            for_client,
            suite.hash_algorithm(),
        )
    }

    /// Reset handshake state for the cookie exchange. The initial
    /// ClientHello and the HelloVerifyRequest are not part of the
    /// transcript, and buffered fragments from before the reset are stale.
    pub fn reset_for_hello_verify(&mut self, next_receive_seq: u16) {
        self.transcript.clear();
        self.reassembly.reset(next_receive_seq);
    }

    /// Align our outbound message_seq with the cookie exchange (the
    /// cookie-bearing ClientHello and the ServerHello both use seq 1).
    pub fn set_next_send_seq(&mut self, seq: u16) {
        self.next_handshake_seq_no = seq;
    }

    // --- outbound --------------------------------------------------------

    /// Create one record, packing it into the last queued datagram when it
    /// fits the MTU budget. `save_fragment` retains the plaintext for flight
    /// retransmission.
    pub fn create_record<F>(
        &mut self,
        content_type: ContentType,
        epoch: u16,
        save_fragment: bool,
        f: F,
    ) -> Result<(), Error>
    where
        F: FnOnce(&mut Vec<u8>),
    {
        let mut fragment = Vec::new();
        f(&mut fragment);

        if save_fragment {
            self.flight_saved_records.push(Entry {
                content_type,
                epoch,
                fragment: Zeroizing::new(fragment.clone()),
            });
        }

        let result = self.write_record(content_type, epoch, &mut fragment);

        // The working copy may hold plaintext even after encryption shifted
        // it around.
        fragment.zeroize();
        result
    }

    /// Serialize (and under epoch ≥ 1, protect) one record into the
    /// datagram queue. The fragment buffer is consumed.
    fn write_record(
        &mut self,
        content_type: ContentType,
        epoch: u16,
        fragment: &mut Vec<u8>,
    ) -> Result<(), Error> {
        // Established sessions write CID records when the peer asked for
        // one. Handshake and CCS records keep their plain types so that a
        // retransmitted flight record is byte-compatible with the original.
        let use_cid = epoch >= 1
            && self.handshake_complete
            && !self.peer_cid.is_empty()
            && matches!(
                content_type,
                ContentType::ApplicationData | ContentType::Alert
            );
        let (wire_type, cid) = if use_cid {
            (ContentType::Tls12Cid, self.peer_cid)
        } else {
            (content_type, ConnectionId::empty())
        };

        let overhead = if epoch >= 1 { DTLS_AEAD_OVERHEAD } else { 0 };
        let record_wire_len =
            DtlsRecord::HEADER_LEN + cid.len() + fragment.len() + usize::from(use_cid) + overhead;

        let can_append = self
            .queue_tx
            .back()
            .map(|b| b.len() + record_wire_len <= self.config.mtu())
            .unwrap_or(false);

        let sequence = if epoch == 0 {
            self.sequence_epoch_0
        } else {
            self.sequence_epoch_n
        };

        if epoch >= 1 {
            let keys = self
                .keys
                .as_ref()
                .ok_or_else(|| Error::CryptoError("write keys not available".to_string()))?;

            if use_cid {
                // RFC 9146: the true content type rides inside the plaintext.
                fragment.push(content_type.as_u8());
            }

            let explicit_nonce: [u8; DTLS_EXPLICIT_NONCE_LEN] = self.rng.random();
            let nonce = Nonce::new(keys.write_iv(self.is_client), &explicit_nonce);
            let aad = Aad::new(
                wire_type,
                ProtocolVersion::DTLS1_2,
                sequence,
                fragment.len() as u16,
                &cid,
            );

            keys.write_cipher(self.is_client)
                .encrypt(fragment, &aad, &nonce)?;

            // Prepend the explicit nonce.
            let ctext_len = fragment.len();
            fragment.resize(DTLS_EXPLICIT_NONCE_LEN + ctext_len, 0);
            fragment.copy_within(0..ctext_len, DTLS_EXPLICIT_NONCE_LEN);
            fragment[..DTLS_EXPLICIT_NONCE_LEN].copy_from_slice(&explicit_nonce);
        }

        let record = DtlsRecord {
            content_type: wire_type,
            version: ProtocolVersion::DTLS1_2,
            sequence,
            cid,
            length: fragment.len() as u16,
            fragment_range: 0..fragment.len(),
        };

        if epoch == 0 {
            self.sequence_epoch_0.sequence_number += 1;
        } else {
            self.sequence_epoch_n.sequence_number += 1;
        }

        if can_append {
            let last = self.queue_tx.back_mut().expect("checked in can_append");
            record.serialize(fragment, last);
        } else {
            let mut buffer = Vec::with_capacity(record_wire_len);
            record.serialize(fragment, &mut buffer);
            self.queue_tx.push_back(buffer);
        }

        Ok(())
    }

    /// Create a handshake message, fragment it to fit the MTU and any
    /// negotiated fragment cap, and retain it for retransmission.
    pub fn create_handshake<F>(&mut self, msg_type: MessageType, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Vec<u8>, &mut Self) -> Result<(), Error>,
    {
        let mut body_buffer = Vec::new();
        f(&mut body_buffer, self)?;

        let message_seq = self.next_handshake_seq_no;
        self.next_handshake_seq_no += 1;

        // The transcript records the unfragmented form.
        let full_header = HandshakeHeader {
            msg_type,
            length: body_buffer.len() as u32,
            message_seq,
            fragment_offset: 0,
            fragment_length: body_buffer.len() as u32,
        };
        full_header.serialize(&mut self.transcript);
        self.transcript.extend_from_slice(&body_buffer);

        let epoch = msg_type.epoch();
        let total_len = body_buffer.len();
        let aead_overhead = if epoch >= 1 { DTLS_AEAD_OVERHEAD } else { 0 };
        let mut offset = 0usize;

        // At least one record even for empty bodies (ServerHelloDone).
        while offset < total_len || (total_len == 0 && offset == 0) {
            let already_used = self.queue_tx.back().map(|b| b.len()).unwrap_or(0);
            let available_in_current = self.config.mtu().saturating_sub(already_used);

            let fixed_overhead = DtlsRecord::HEADER_LEN + HandshakeHeader::LEN + aead_overhead;

            let mut available_for_body = if available_in_current > fixed_overhead {
                available_in_current - fixed_overhead
            } else {
                self.config.mtu().saturating_sub(fixed_overhead)
            };

            // The RFC 6066 cap binds the handshake fragment body, and a
            // local cap applies even before negotiation.
            if let Some(cap) = self.fragment_cap() {
                available_for_body = available_for_body.min(cap);
            }

            let remaining = total_len - offset;
            let chunk_len = if total_len == 0 {
                0
            } else {
                remaining.min(available_for_body.max(1))
            };

            let frag_header = HandshakeHeader {
                msg_type,
                length: total_len as u32,
                message_seq,
                fragment_offset: offset as u32,
                fragment_length: chunk_len as u32,
            };

            let chunk = &body_buffer[offset..offset + chunk_len];
            self.create_record(ContentType::Handshake, epoch, true, |fragment| {
                frag_header.serialize(fragment);
                fragment.extend_from_slice(chunk);
            })?;

            if total_len == 0 {
                break;
            }
            offset += chunk_len;
        }

        body_buffer.zeroize();

        Ok(())
    }

    fn fragment_cap(&self) -> Option<usize> {
        match (
            self.negotiated_max_fragment,
            self.config.max_fragment_length(),
        ) {
            (Some(n), Some(c)) => Some(n.min(c)),
            (Some(n), None) => Some(n),
            (None, Some(c)) => Some(c),
            (None, None) => None,
        }
    }

    /// Send CHANGE_CIPHER_SPEC and advance the write epoch.
    pub fn send_ccs(&mut self) -> Result<(), Error> {
        self.create_record(ContentType::ChangeCipherSpec, 0, true, |body| {
            body.push(1);
        })?;
        self.write_epoch = 1;
        Ok(())
    }

    /// Queue an alert at the current write epoch. Best effort; alerts are
    /// never retransmitted.
    pub fn send_alert(&mut self, alert: Alert) -> Result<(), Error> {
        let epoch = self.write_epoch;
        self.create_record(ContentType::Alert, epoch, false, |body| {
            alert.serialize(body);
        })
    }

    /// Queue application data on the established session. Application
    /// records are never fragmented; oversized payloads are refused.
    pub fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if !self.handshake_complete {
            return Err(Error::NotConnected);
        }
        let overhead = DtlsRecord::HEADER_LEN + self.peer_cid.len() + 1 + DTLS_AEAD_OVERHEAD;
        if data.len() + overhead > self.config.mtu() {
            return Err(Error::ResourceExhausted("application record over MTU"));
        }
        // A negotiated max_fragment_length binds application records too.
        if let Some(cap) = self.fragment_cap() {
            if data.len() > cap {
                return Err(Error::ResourceExhausted(
                    "application record over the negotiated fragment length",
                ));
            }
        }
        let epoch = self.write_epoch;
        self.create_record(ContentType::ApplicationData, epoch, false, |body| {
            body.extend_from_slice(data);
        })
    }

    // --- flights ---------------------------------------------------------

    /// Start a new flight: clear retained records and reset the backoff.
    pub fn flight_begin(&mut self, flight_number: u8) {
        debug!("Begin flight {}", flight_number);
        self.flight_number = flight_number;
        self.flight_is_terminal = false;
        self.flight_backoff.reset(&mut self.rng);
        self.flight_saved_records.clear();
        self.flight_timeout = Timeout::Unarmed;
    }

    /// Mark the current flight terminal: it has no successor, so it is
    /// retained past establishment and re-sent when the peer retransmits.
    pub fn flight_mark_terminal(&mut self) {
        debug!("Flight {} is terminal", self.flight_number);
        self.flight_is_terminal = true;
    }

    /// The handshake is done: stop the timers, keep the terminal flight.
    pub fn handshake_complete(&mut self) {
        self.handshake_complete = true;
        self.flight_timeout = Timeout::Disabled;
        self.connect_timeout = Timeout::Disabled;
        if !self.flight_is_terminal {
            self.flight_saved_records.clear();
        }
    }

    fn trigger_flight_resend(&mut self, reason: &str) -> Result<(), Error> {
        if self.resend_triggered || self.flight_saved_records.is_empty() {
            return Ok(());
        }
        self.resend_triggered = true;
        self.flight_resend(reason)
    }

    /// Re-send the retained flight: same handshake message_seq and epochs,
    /// fresh record sequence numbers.
    fn flight_resend(&mut self, reason: &str) -> Result<(), Error> {
        debug!("Resending flight {} ({})", self.flight_number, reason);
        let records = std::mem::take(&mut self.flight_saved_records);

        for entry in &records {
            self.create_record(entry.content_type, entry.epoch, false, |fragment| {
                fragment.extend_from_slice(&entry.fragment);
            })?;
        }

        self.flight_saved_records = records;
        Ok(())
    }

    // --- timers ----------------------------------------------------------

    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        if self.handshake_complete {
            return Ok(());
        }

        if self.connect_timeout == Timeout::Unarmed {
            self.connect_timeout = Timeout::Armed(now + self.config.handshake_timeout());
        }
        if self.flight_timeout == Timeout::Unarmed && !self.flight_saved_records.is_empty() {
            self.flight_timeout = Timeout::Armed(now + self.flight_backoff.delay());
        }

        if let Timeout::Armed(connect_timeout) = self.connect_timeout {
            if now >= connect_timeout {
                return Err(Error::Timeout("handshake deadline"));
            }
        }

        let Timeout::Armed(flight_timeout) = self.flight_timeout else {
            return Ok(());
        };

        if now >= flight_timeout {
            // The expiry after the last permitted retransmission fails the
            // handshake (tries = max_retransmissions + 1 expiries total).
            if self.flight_backoff.exhausted() {
                return Err(Error::Timeout("retransmissions exhausted"));
            }
            self.flight_backoff.record_expiry(&mut self.rng);
            let delay = self.flight_backoff.delay();
            debug!("Flight timer fired; next attempt in {:?}", delay);
            self.flight_timeout = Timeout::Armed(now + delay);
            self.flight_resend("retransmission timer")?;
        }

        Ok(())
    }

    /// The next instant this connection wants a timeout callback.
    pub fn next_timeout(&self) -> Option<Instant> {
        match (self.connect_timeout, self.flight_timeout) {
            (Timeout::Armed(c), Timeout::Armed(f)) => Some(c.min(f)),
            (Timeout::Armed(c), _) => Some(c),
            (_, Timeout::Armed(f)) => Some(f),
            // Unarmed timers need a handle_timeout call to arm; make the
            // driver call back immediately.
            (Timeout::Unarmed, _) | (_, Timeout::Unarmed) => None,
            (Timeout::Disabled, Timeout::Disabled) => None,
        }
    }

    /// Whether any timer still needs arming.
    pub fn wants_timeout_arm(&self) -> bool {
        !self.handshake_complete
            && (self.connect_timeout == Timeout::Unarmed
                || (self.flight_timeout == Timeout::Unarmed
                    && !self.flight_saved_records.is_empty()))
    }

    // --- output ----------------------------------------------------------

    pub fn pop_datagram(&mut self) -> Option<Vec<u8>> {
        self.queue_tx.pop_front()
    }

    pub fn pop_app_data(&mut self) -> Option<Vec<u8>> {
        self.queue_app_rx.pop_front()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("is_client", &self.is_client)
            .field("write_epoch", &self.write_epoch)
            .field("read_epoch", &self.read_epoch)
            .field("flight_number", &self.flight_number)
            .field("handshake_complete", &self.handshake_complete)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn engine(is_client: bool) -> Engine {
        let config = Arc::new(Config::default());
        Engine::new(config, is_client, ConnectionId::empty())
    }

    fn drain(e: &mut Engine) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(datagram) = e.pop_datagram() {
            out.push(datagram);
        }
        out
    }

    #[test]
    fn handshake_records_pack_into_one_datagram() {
        let mut e = engine(true);
        e.create_handshake(MessageType::ClientHello, |body, _| {
            body.extend_from_slice(&[1; 100]);
            Ok(())
        })
        .unwrap();
        e.create_handshake(MessageType::ClientKeyExchange, |body, _| {
            body.extend_from_slice(&[2; 100]);
            Ok(())
        })
        .unwrap();

        let datagrams = drain(&mut e);
        assert_eq!(datagrams.len(), 1);
    }

    #[test]
    fn oversized_message_fragments_across_datagrams() {
        let mut e = engine(false);
        e.create_handshake(MessageType::Certificate, |body, _| {
            body.extend_from_slice(&vec![7; 3000]);
            Ok(())
        })
        .unwrap();

        let datagrams = drain(&mut e);
        assert!(datagrams.len() >= 3);
        for d in &datagrams {
            assert!(d.len() <= 1232);
        }
    }

    #[test]
    fn record_sequence_increases_across_resends() {
        let mut e = engine(true);
        e.flight_begin(1);
        e.create_handshake(MessageType::ClientHello, |body, _| {
            body.extend_from_slice(&[0; 40]);
            Ok(())
        })
        .unwrap();
        let first = drain(&mut e);

        let now = Instant::now();
        e.handle_timeout(now).unwrap();
        e.handle_timeout(now + Duration::from_secs(1)).unwrap();
        let resent = drain(&mut e);

        assert_eq!(first.len(), resent.len());
        // Record sequence number lives at bytes 5..11 of the header.
        let seq_of = |d: &Vec<u8>| u64::from_be_bytes([0, 0, d[5], d[6], d[7], d[8], d[9], d[10]]);
        assert!(seq_of(&resent[0]) > seq_of(&first[0]));
        // message_seq (bytes 17..19) must be identical.
        assert_eq!(&first[0][17..19], &resent[0][17..19]);
    }

    #[test]
    fn retransmissions_exhaust_into_timeout() {
        let mut e = engine(true);
        e.flight_begin(1);
        e.create_handshake(MessageType::ClientHello, |body, _| {
            body.extend_from_slice(&[0; 10]);
            Ok(())
        })
        .unwrap();

        let mut now = Instant::now();
        e.handle_timeout(now).unwrap();

        // Expiries: resend, resend, then exhausted.
        let mut failed = false;
        for _ in 0..5 {
            now += Duration::from_secs(4);
            match e.handle_timeout(now) {
                Ok(()) => {}
                Err(Error::Timeout(_)) => {
                    failed = true;
                    break;
                }
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert!(failed);
    }

    #[test]
    fn plaintext_client_hello_reaches_reassembly() {
        let mut client = engine(true);
        let mut server = engine(false);

        client
            .create_handshake(MessageType::ClientHello, |body, _| {
                body.extend_from_slice(&[9; 20]);
                Ok(())
            })
            .unwrap();

        for d in drain(&mut client) {
            server.parse_datagram(&d).unwrap();
        }

        assert_eq!(server.peek_message_type(), Some(MessageType::ClientHello));
        let msg = server.next_message().unwrap();
        assert_eq!(msg.message_seq, 0);
        assert_eq!(msg.body, vec![9; 20]);
    }

    #[test]
    fn malformed_ccs_is_a_decode_error() {
        let mut e = engine(false);
        // type 20, DTLS 1.2, epoch 0, seq 0, len 2, body [1, 1]
        let mut record = vec![20, 0xFE, 0xFD, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 1, 1];
        assert!(matches!(
            e.parse_datagram(&record),
            Err(Error::DecodeError(_))
        ));
        // A proper CCS ahead of the key exchange is deferred, not fatal.
        record[12] = 1;
        record.truncate(14);
        e.parse_datagram(&record).unwrap();
        assert_eq!(e.read_epoch(), 0);
    }
}
