//! fefd — Sans-IO DTLS 1.2 endpoint
//!
//! fefd (named for the DTLS 1.2 wire version `0xFE 0xFD`) implements the
//! core of a DTLS 1.2 endpoint: both handshake roles (full and abbreviated
//! handshakes), the record layer with retransmission and reordering
//! tolerance, the stateless HelloVerifyRequest cookie exchange, and
//! connection multiplexing with RFC 9146 Connection IDs for NAT rebinding
//! tolerance.
//!
//! # Goals
//! - **DTLS 1.2** endpoint semantics per RFC 6347, with RFC 9146 CIDs.
//! - **Sans-IO**: no sockets, threads or clocks; you drive the endpoint
//!   from your own event loop and pass `Instant`s in.
//! - **Safety**: `forbid(unsafe_code)`; key material is zeroized.
//! - **Pluggable trust**: certificate chains, raw public keys and
//!   pre-shared keys resolve through application callbacks.
//!
//! ## Non-goals
//! - TLS over TCP, DTLS 1.0, DTLS 1.3
//! - Renegotiation, session-ticket issuance (RFC 5077)
//! - HTTP/ALPN surfaces
//!
//! # Driving model
//!
//! Everything happens through three calls on [`Endpoint`]:
//! [`Endpoint::handle_datagram`] for every received UDP datagram,
//! [`Endpoint::poll_output`] to drain datagrams/events/timer requests, and
//! [`Endpoint::handle_timeout`] when the scheduled instant arrives. Within
//! one connection all processing is strictly serial; distinct endpoints (or
//! shards of connections) may run on different threads.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use fefd::{Config, Endpoint, Event, Output, SingleKeyPskStore};
//!
//! enum Io { Udp(std::net::SocketAddr, Vec<u8>), Timer(Instant) }
//! fn wait_io(_wake: Instant) -> Io { unimplemented!() }
//! fn send_udp(_to: std::net::SocketAddr, _bytes: &[u8]) {}
//!
//! fn run() -> Result<(), fefd::Error> {
//!     let config = Arc::new(Config::default());
//!     let mut endpoint = Endpoint::new(config);
//!     endpoint.set_psk_store(Arc::new(SingleKeyPskStore::new(b"device-1", b"secret")));
//!
//!     let server = "198.51.100.7:5684".parse().unwrap();
//!     endpoint.connect(Instant::now(), server, None)?;
//!
//!     loop {
//!         let wake = loop {
//!             match endpoint.poll_output(Instant::now()) {
//!                 Output::Transmit(t) => send_udp(t.destination, t.datagram),
//!                 Output::Event(Event::SessionEstablished { .. }) => {
//!                     // ready for application data
//!                 }
//!                 Output::Event(_) => {}
//!                 Output::Timeout(instant) => break instant,
//!             }
//!         };
//!         match wait_io(wake) {
//!             Io::Udp(from, datagram) => {
//!                 endpoint.handle_datagram(Instant::now(), from, &datagram)?
//!             }
//!             Io::Timer(now) => endpoint.handle_timeout(now)?,
//!         }
//!     }
//! }
//! ```
#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::len_without_is_empty)]

// This is the full DTLS 1.2 handshake flow
//
// Client                                               Server
//
// 1     ClientHello                  -------->
//
// 2                                  <--------   HelloVerifyRequest
//                                                 (contains cookie)
//
// 3     ClientHello                  -------->
//       (with cookie)
// 4                                                     ServerHello
//                                                      Certificate*
//                                                ServerKeyExchange*
//                                               CertificateRequest*
//                                    <--------      ServerHelloDone
// 5     Certificate*
//       ClientKeyExchange
//       CertificateVerify*
//       [ChangeCipherSpec]
//       Finished                     -------->
// 6                                              [ChangeCipherSpec]
//                                    <--------             Finished
//       Application Data             <------->     Application Data
//
// The abbreviated (resumption) handshake is three flights: ClientHello with
// the cached session id; ServerHello + CCS + Finished; CCS + Finished.

#[macro_use]
extern crate log;

mod config;
mod endpoint;
mod engine;
mod error;
mod handshake;
mod message;
mod reassembly;
mod service;
mod session;
mod store;
mod timer;
mod window;

pub mod crypto;

#[cfg(feature = "rcgen")]
pub mod certificate;

pub use config::{CidGenerator, ClientAuth, Config, ConfigBuilder};
pub use endpoint::{Endpoint, Event, Output, Transmit};
pub use error::{AlertDescription, Error};
pub use handshake::Credentials;
pub use message::{CertificateType, CipherSuite, ConnectionId, NamedGroup, SessionId};
pub use service::{
    CertificateVerifier, InMemorySessionCache, InsecureAcceptAll, PskStore, RawKeyVerifier,
    SessionCache, SingleKeyPskStore,
};
pub use session::{PeerIdentity, Session, SessionTicket};

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    fn new_endpoint() -> Endpoint {
        let config = Arc::new(Config::default());
        let mut endpoint = Endpoint::new(config);
        endpoint.set_psk_store(Arc::new(SingleKeyPskStore::new(b"id", b"key")));
        endpoint
    }

    #[test]
    fn is_send_and_sync() {
        fn is_send<T: Send>(_t: &T) {}
        let e = new_endpoint();
        is_send(&e);
    }

    #[test]
    fn full_capacity_is_available_at_start() {
        let e = new_endpoint();
        assert_eq!(e.remaining_capacity(), 1024);
    }
}
