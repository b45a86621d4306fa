//! Signing keys and digests.
//!
//! Keys are elliptic-curve P-256. Public keys travel as PKIX
//! SubjectPublicKeyInfo DER; signatures are ASN.1-DER ECDSA. An account
//! address is the last 20 bytes of Keccak-256 over the compressed public
//! key with its tag byte stripped.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use thiserror::Error;

use crate::types::{Address, Signature, ADDRESS_LEN};

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid private key encoding")]
    InvalidPrivateKey,
    #[error("invalid public key encoding")]
    InvalidPublicKey,
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("signature verification failed")]
    VerifyFailed,
}

pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(bytes);
    h.finalize().into()
}

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut h = Keccak256::new();
    h.update(bytes);
    h.finalize().into()
}

/// A node or account keypair.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let signing = SigningKey::random(&mut rand::rngs::OsRng);
        let verifying = *signing.verifying_key();
        Self { signing, verifying }
    }

    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CryptoError> {
        let signing =
            SigningKey::from_pkcs8_der(der).map_err(|_| CryptoError::InvalidPrivateKey)?;
        let verifying = *signing.verifying_key();
        Ok(Self { signing, verifying })
    }

    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>, CryptoError> {
        let doc = self
            .signing
            .to_pkcs8_der()
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(doc.as_bytes().to_vec())
    }

    /// PKIX SubjectPublicKeyInfo DER encoding of the public key.
    pub fn public_key_der(&self) -> Vec<u8> {
        // Encoding a valid P-256 point cannot fail.
        self.verifying
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .unwrap_or_default()
    }

    pub fn address(&self) -> Address {
        address_of_verifying_key(&self.verifying)
    }

    /// ASN.1-DER ECDSA signature over `msg`.
    pub fn sign(&self, msg: &[u8]) -> Signature {
        let sig: EcdsaSignature = self.signing.sign(msg);
        let der = sig.to_der();
        // A P-256 DER signature is at most 72 bytes.
        Signature::from_der(der.as_bytes().to_vec()).unwrap_or_else(Signature::empty)
    }
}

fn address_of_verifying_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(true);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut out = [0u8; ADDRESS_LEN];
    out.copy_from_slice(&digest[32 - ADDRESS_LEN..]);
    Address(out)
}

/// Derives the account address from a PKIX-encoded public key.
pub fn address_of_public_key(public_key_der: &[u8]) -> Result<Address, CryptoError> {
    let key = VerifyingKey::from_public_key_der(public_key_der)
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    Ok(address_of_verifying_key(&key))
}

/// Verifies a DER signature over `msg` against a PKIX-encoded public key.
pub fn verify(public_key_der: &[u8], msg: &[u8], sig: &Signature) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_public_key_der(public_key_der)
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = EcdsaSignature::from_der(sig.as_bytes()).map_err(|_| CryptoError::InvalidSignature)?;
    key.verify(msg, &sig).map_err(|_| CryptoError::VerifyFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let kp = KeyPair::generate();
        let msg = b"round trip";
        let sig = kp.sign(msg);
        assert!(verify(&kp.public_key_der(), msg, &sig).is_ok());
    }

    #[test]
    fn verify_rejects_wrong_message() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"signed");
        assert!(matches!(
            verify(&kp.public_key_der(), b"other", &sig),
            Err(CryptoError::VerifyFailed)
        ));
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let kp = KeyPair::generate();
        let other = KeyPair::generate();
        let sig = kp.sign(b"msg");
        assert!(verify(&other.public_key_der(), b"msg", &sig).is_err());
    }

    #[test]
    fn address_matches_public_key_derivation() {
        let kp = KeyPair::generate();
        let derived = address_of_public_key(&kp.public_key_der()).unwrap();
        assert_eq!(derived, kp.address());
        assert!(!derived.is_zero());
    }

    #[test]
    fn pkcs8_round_trip_preserves_address() {
        let kp = KeyPair::generate();
        let der = kp.to_pkcs8_der().unwrap();
        let restored = KeyPair::from_pkcs8_der(&der).unwrap();
        assert_eq!(restored.address(), kp.address());
    }

    #[test]
    fn der_signature_fits_padded_buffer() {
        let kp = KeyPair::generate();
        for i in 0..16u8 {
            let sig = kp.sign(&[i]);
            assert!(sig.len() <= crate::types::MAX_SIG_LEN);
            assert_eq!(sig.as_bytes()[0], 0x30);
        }
    }
}
