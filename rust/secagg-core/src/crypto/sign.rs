//! Optional `Ed25519` signatures over public key broadcasts.
//!
//! A client holding a [`BroadcastSigningKey`] signs the concatenation of its cipher and sharing
//! public keys. Anyone who obtained the matching [`VerificationKey`] out of band can then check
//! that the broadcast was not altered on its way.

use std::convert::TryInto;

use derive_more::{AsRef, From};
use sodiumoxide::crypto::sign;

use super::{ByteObject, PublicAgreementKey};

#[derive(AsRef, From, Eq, PartialEq, Clone, Debug)]
/// The secret `Ed25519` key of a client for signing its public broadcast.
///
/// When this goes out of scope, its contents will be zeroed out.
pub struct BroadcastSigningKey(sign::SecretKey);

impl BroadcastSigningKey {
    /// Generates a new random signing key.
    pub fn generate() -> Self {
        let (_, secret) = sign::gen_keypair();
        Self(secret)
    }

    /// Gets the key which verifies the signatures of this key.
    pub fn verification_key(&self) -> VerificationKey {
        VerificationKey(self.0.public_key())
    }

    /// Signs the public keys of a broadcast.
    pub fn sign(&self, cipher: &PublicAgreementKey, sharing: &PublicAgreementKey) -> Signature {
        Signature(sign::sign_detached(&signed_keys(cipher, sharing), &self.0))
    }
}

impl ByteObject for BroadcastSigningKey {
    const LENGTH: usize = sign::SECRETKEYBYTES;

    fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        sign::SecretKey::from_slice(bytes).map(Self)
    }
}

impl_hex_serde!(BroadcastSigningKey);

#[derive(AsRef, From, Hash, Eq, PartialEq, Copy, Clone, Debug)]
/// The public `Ed25519` key matching a [`BroadcastSigningKey`].
pub struct VerificationKey(sign::PublicKey);

impl VerificationKey {
    /// Checks a signature over the public keys of a broadcast.
    pub fn verify(
        &self,
        signature: &Signature,
        cipher: &PublicAgreementKey,
        sharing: &PublicAgreementKey,
    ) -> bool {
        sign::verify_detached(&signature.0, &signed_keys(cipher, sharing), &self.0)
    }
}

impl ByteObject for VerificationKey {
    const LENGTH: usize = sign::PUBLICKEYBYTES;

    fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        sign::PublicKey::from_slice(bytes).map(Self)
    }
}

impl_hex_serde!(VerificationKey);

#[derive(AsRef, From, Eq, PartialEq, Copy, Clone, Debug)]
/// The signature of a public key broadcast.
pub struct Signature(sign::Signature);

impl ByteObject for Signature {
    const LENGTH: usize = sign::SIGNATUREBYTES;

    fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }
}

impl_hex_serde!(Signature);

fn signed_keys(cipher: &PublicAgreementKey, sharing: &PublicAgreementKey) -> Vec<u8> {
    [cipher.as_slice(), sharing.as_slice()].concat()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AgreementKeyPair;

    #[test]
    fn test_sign_verify() {
        let key = BroadcastSigningKey::generate();
        let cipher = AgreementKeyPair::generate().public;
        let sharing = AgreementKeyPair::generate().public;
        let signature = key.sign(&cipher, &sharing);

        assert!(key.verification_key().verify(&signature, &cipher, &sharing));
        // the order of the keys is part of the signed message
        assert!(!key.verification_key().verify(&signature, &sharing, &cipher));
        let other = BroadcastSigningKey::generate().verification_key();
        assert!(!other.verify(&signature, &cipher, &sharing));
    }

    #[test]
    fn test_signature_hex() {
        let key = BroadcastSigningKey::generate();
        let keys = AgreementKeyPair::generate();
        let signature = key.sign(&keys.public, &keys.public);
        assert_eq!(Signature::from_hex(&signature.to_hex()).unwrap(), signature);
        assert!(Signature::from_hex(&"ab".repeat(Signature::LENGTH - 1)).is_none());
        assert_eq!(
            BroadcastSigningKey::from_hex(&key.to_hex()).unwrap().verification_key(),
            key.verification_key()
        );
    }
}
