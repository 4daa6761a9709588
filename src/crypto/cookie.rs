//! Stateless HelloVerifyRequest cookies (RFC 6347 §4.2.1).
//!
//! cookie = HMAC-SHA256(server_secret,
//!                      client_ip ‖ client_port ‖ version ‖ random ‖
//!                      session_id ‖ cipher_suites)
//!
//! The cookie field itself is excluded from the MAC input, so the first
//! ClientHello (cookie-less) and the echo (cookie-bearing) authenticate the
//! same bytes.

use std::net::SocketAddr;

use hmac::{Hmac, Mac};
use rand::rngs::StdRng;
use rand::Rng;
use sha2::Sha256;

use crate::message::{ClientHello, Cookie};

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_LEN: usize = 32;

pub struct CookieGenerator {
    secret: [u8; 32],
}

impl CookieGenerator {
    pub fn new(rng: &mut StdRng) -> Self {
        let mut secret = [0u8; 32];
        rng.fill(&mut secret);
        CookieGenerator { secret }
    }

    pub fn generate(&self, peer: &SocketAddr, hello: &ClientHello) -> Cookie {
        // new_from_slice on a 32-byte key cannot fail.
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac key");

        match peer.ip() {
            std::net::IpAddr::V4(ip) => mac.update(&ip.octets()),
            std::net::IpAddr::V6(ip) => mac.update(&ip.octets()),
        }
        mac.update(&peer.port().to_be_bytes());
        mac.update(&hello.client_version.as_u16().to_be_bytes());
        mac.update(&hello.random);
        mac.update(&hello.session_id);
        for suite in &hello.cipher_suites {
            mac.update(&suite.as_u16().to_be_bytes());
        }

        let tag = mac.finalize().into_bytes();
        Cookie::try_new(&tag[..COOKIE_LEN]).expect("cookie within bounds")
    }

    pub fn verify(&self, peer: &SocketAddr, hello: &ClientHello) -> bool {
        if hello.cookie.len() != COOKIE_LEN {
            return false;
        }
        let expected = self.generate(peer, hello);
        // Cookies are not secrets; a mismatch only costs the peer an HVR.
        *expected == *hello.cookie
    }
}

impl std::fmt::Debug for CookieGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieGenerator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use crate::message::{CipherSuite, ProtocolVersion, Random, SessionId};
    use arrayvec::ArrayVec;

    fn hello(cookie: Cookie) -> ClientHello {
        let mut suites = ArrayVec::new();
        suites.push(CipherSuite::PSK_AES128_GCM_SHA256);
        ClientHello::new(
            ProtocolVersion::DTLS1_2,
            Random::new([9; 32]),
            SessionId::empty(),
            cookie,
            suites,
        )
    }

    #[test]
    fn echoed_cookie_verifies() {
        let mut rng = StdRng::seed_from_u64(3);
        let gen = CookieGenerator::new(&mut rng);
        let addr: SocketAddr = "10.0.0.1:5684".parse().unwrap();

        let first = hello(Cookie::empty());
        assert!(!gen.verify(&addr, &first));

        let cookie = gen.generate(&addr, &first);
        let second = hello(cookie);
        assert!(gen.verify(&addr, &second));
    }

    #[test]
    fn cookie_is_bound_to_the_source_address() {
        let mut rng = StdRng::seed_from_u64(3);
        let gen = CookieGenerator::new(&mut rng);
        let addr: SocketAddr = "10.0.0.1:5684".parse().unwrap();
        let other: SocketAddr = "10.0.0.1:5685".parse().unwrap();

        let cookie = gen.generate(&addr, &hello(Cookie::empty()));
        let echoed = hello(cookie);
        assert!(gen.verify(&addr, &echoed));
        assert!(!gen.verify(&other, &echoed));
    }

    #[test]
    fn forged_cookie_fails() {
        let mut rng = StdRng::seed_from_u64(3);
        let gen = CookieGenerator::new(&mut rng);
        let addr: SocketAddr = "10.0.0.1:5684".parse().unwrap();

        let forged = hello(Cookie::try_new(&[0xAB; COOKIE_LEN]).unwrap());
        assert!(!gen.verify(&addr, &forged));
    }
}
