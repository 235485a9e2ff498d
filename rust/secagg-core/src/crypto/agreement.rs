//! `X25519` key agreement followed by `HKDF-SHA256`.
//!
//! See the [crypto module] documentation since this is a private module anyways.
//!
//! [crypto module]: crate::crypto

use derive_more::{AsMut, AsRef, From};
use hkdf::Hkdf;
use sha2::Sha256;
use sodiumoxide::crypto::{
    box_,
    scalarmult::curve25519::{scalarmult, GroupElement, Scalar},
};
use thiserror::Error;

use super::ByteObject;

/// Maximal number of bytes which can be derived from one shared secret.
pub const MAX_DERIVED_LENGTH: usize = 255 * 32;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
/// Errors related to the key agreement.
pub enum AgreementError {
    #[error("the public key is not a valid curve point")]
    InvalidKey,
    #[error("cannot derive {0} bytes from a shared secret")]
    InvalidLength(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// An `X25519` key pair for key agreement.
pub struct AgreementKeyPair {
    /// The `X25519` public key.
    pub public: PublicAgreementKey,
    /// The `X25519` secret key.
    pub secret: SecretAgreementKey,
}

impl AgreementKeyPair {
    /// Generates a new random `X25519` key pair.
    pub fn generate() -> Self {
        let (pk, sk) = box_::gen_keypair();
        Self {
            public: PublicAgreementKey(pk),
            secret: SecretAgreementKey(sk),
        }
    }

    /// Restores a key pair from its secret half.
    pub fn from_secret(secret: SecretAgreementKey) -> Self {
        Self {
            public: secret.public_key(),
            secret,
        }
    }
}

#[derive(AsRef, AsMut, From, Hash, Eq, Ord, PartialEq, Copy, Clone, PartialOrd, Debug)]
/// An `X25519` public key.
pub struct PublicAgreementKey(box_::PublicKey);

impl ByteObject for PublicAgreementKey {
    const LENGTH: usize = box_::PUBLICKEYBYTES;


    fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        box_::PublicKey::from_slice(bytes).map(Self)
    }
}

impl_hex_serde!(PublicAgreementKey);

#[derive(AsRef, AsMut, From, Eq, PartialEq, Clone, Debug)]
/// An `X25519` secret key.
///
/// When this goes out of scope, its contents will be zeroed out.
pub struct SecretAgreementKey(box_::SecretKey);

impl SecretAgreementKey {
    /// Computes the corresponding public key for this secret key.
    pub fn public_key(&self) -> PublicAgreementKey {
        PublicAgreementKey(self.0.public_key())
    }
}

impl ByteObject for SecretAgreementKey {
    const LENGTH: usize = box_::SECRETKEYBYTES;


    fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        box_::SecretKey::from_slice(bytes).map(Self)
    }
}

impl_hex_serde!(SecretAgreementKey);

/// Derives `length` bytes of shared secret from a secret key and a peer's public key.
///
/// Runs the `X25519` function on both keys and expands the result with `HKDF-SHA256` without salt
/// and info. The derivation is deterministic and symmetric: `derive(a, B) == derive(b, A)`.
///
/// # Errors
/// Fails if the public key is a low order point or if `length` exceeds [`MAX_DERIVED_LENGTH`].
pub fn derive_shared_key(
    secret: &SecretAgreementKey,
    public: &PublicAgreementKey,
    length: usize,
) -> Result<Vec<u8>, AgreementError> {
    if length > MAX_DERIVED_LENGTH {
        return Err(AgreementError::InvalidLength(length));
    }
    let scalar = Scalar::from_slice(secret.as_slice()).ok_or(AgreementError::InvalidKey)?;
    let point = GroupElement::from_slice(public.as_slice()).ok_or(AgreementError::InvalidKey)?;
    let shared = scalarmult(&scalar, &point).map_err(|_| AgreementError::InvalidKey)?;

    let hkdf = Hkdf::<Sha256>::new(None, shared.as_ref());
    let mut okm = vec![0_u8; length];
    hkdf.expand(&[], &mut okm)
        .map_err(|_| AgreementError::InvalidLength(length))?;
    Ok(okm)
}
