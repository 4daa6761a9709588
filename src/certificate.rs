//! Self-signed certificate generation (feature `rcgen`).
//!
//! Convenience for tests and deployments that pin identity at the
//! application layer rather than through a PKI.

use rcgen::{
    Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    PKCS_ECDSA_P256_SHA256,
};

use crate::error::Error;

/// Certificate and private key pair, both DER encoded.
#[derive(Clone)]
pub struct DtlsCertificate {
    /// X.509 certificate (DER).
    pub certificate: Vec<u8>,
    /// PKCS#8 private key (DER).
    pub private_key: Vec<u8>,
}

/// Generate a self-signed ECDSA P-256 certificate.
pub fn generate_self_signed_certificate(common_name: &str) -> Result<DtlsCertificate, Error> {
    let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| Error::CertificateError(format!("key generation failed: {}", e)))?;

    let mut params = CertificateParams::new(vec![common_name.to_string()]);

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, common_name.to_string());
    params.distinguished_name = distinguished_name;
    params.is_ca = IsCa::NoCa;
    params.key_pair = Some(key_pair);

    let not_before = time::OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + time::Duration::days(365);

    let cert = RcgenCertificate::from_params(params)
        .map_err(|e| Error::CertificateError(format!("certificate build failed: {}", e)))?;

    let certificate = cert
        .serialize_der()
        .map_err(|e| Error::CertificateError(format!("DER serialization failed: {}", e)))?;
    let private_key = cert.serialize_private_key_der();

    Ok(DtlsCertificate {
        certificate,
        private_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::Credentials;

    #[test]
    fn generated_certificate_loads_as_credentials() {
        let cert = generate_self_signed_certificate("dtls test").unwrap();
        let credentials =
            Credentials::new(vec![cert.certificate.clone()], &cert.private_key).unwrap();
        assert_eq!(credentials.certificate_chain.len(), 1);
    }

    #[test]
    fn spki_extraction_works_on_generated_cert() {
        let cert = generate_self_signed_certificate("dtls test").unwrap();
        let spki = crate::crypto::spki_from_certificate(&cert.certificate).unwrap();
        assert!(!spki.is_empty());
    }
}
