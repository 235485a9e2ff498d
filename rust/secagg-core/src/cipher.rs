//! The encrypted payload one client addresses to one peer.
//!
//! During key sharing every client hands each peer one share of its mask seed and one share of its
//! secret sharing key. Both travel through the aggregator inside a [`Cipher`], sealed with a
//! symmetric key which sender and recipient derive from their cipher key pairs. The aggregator
//! can route ciphers but learns nothing about the shares.

use thiserror::Error;

use crate::{
    crypto::{
        derive_shared_key,
        AgreementError,
        ByteObject,
        PublicAgreementKey,
        SecretAgreementKey,
        SymmetricKey,
    },
    sharing::{KeyShare, SeedShare},
    ClientId,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Errors related to sealing and opening ciphers.
pub enum CipherError {
    #[error("cipher decryption failed")]
    DecryptionFailed,
    #[error("cipher addressed from {sender} to {recipient} does not match the expected parties")]
    CipherMismatch {
        sender: ClientId,
        recipient: ClientId,
    },
    #[error("decrypted cipher is malformed: {0}")]
    MalformedCipher(String),
    #[error("key agreement failed: {0}")]
    Agreement(#[from] AgreementError),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// The plaintext of a cipher.
pub struct Cipher {
    pub sender: ClientId,
    pub recipient: ClientId,
    pub seed_share: SeedShare,
    pub key_share: KeyShare,
}

fn symmetric_key(
    secret: &SecretAgreementKey,
    public: &PublicAgreementKey,
) -> Result<SymmetricKey, CipherError> {
    let bytes = derive_shared_key(secret, public, SymmetricKey::LENGTH)?;
    // safe unwrap: length of slice is guaranteed by constants
    Ok(SymmetricKey::from_slice_unchecked(&bytes))
}

/// Seals the shares for `recipient` and returns the hex encoded ciphertext.
///
/// # Errors
/// Fails if the key agreement with the recipient's public cipher key fails.
pub fn seal(
    sender: &ClientId,
    sender_secret: &SecretAgreementKey,
    recipient: &ClientId,
    recipient_public: &PublicAgreementKey,
    key_share: KeyShare,
    seed_share: SeedShare,
) -> Result<String, CipherError> {
    let key = symmetric_key(sender_secret, recipient_public)?;
    let cipher = Cipher {
        sender: sender.clone(),
        recipient: recipient.clone(),
        seed_share,
        key_share,
    };
    let plaintext =
        serde_json::to_vec(&cipher).map_err(|err| CipherError::MalformedCipher(err.to_string()))?;
    Ok(hex::encode(key.seal(&plaintext)))
}

/// Opens a cipher which `sender` addressed to `recipient`.
///
/// # Errors
/// Fails with [`CipherError::DecryptionFailed`] if the ciphertext is not valid hex or doesn't
/// authenticate, with [`CipherError::MalformedCipher`] if the plaintext is not a cipher and with
/// [`CipherError::CipherMismatch`] if the cipher names other parties than expected.
pub fn open(
    recipient: &ClientId,
    recipient_secret: &SecretAgreementKey,
    sender: &ClientId,
    sender_public: &PublicAgreementKey,
    ciphertext: &str,
) -> Result<Cipher, CipherError> {
    let key = symmetric_key(recipient_secret, sender_public)?;
    let sealed = hex::decode(ciphertext).map_err(|_| CipherError::DecryptionFailed)?;
    let plaintext = key
        .open(&sealed)
        .map_err(|_| CipherError::DecryptionFailed)?;
    let cipher: Cipher = serde_json::from_slice(&plaintext)
        .map_err(|err| CipherError::MalformedCipher(err.to_string()))?;

    if &cipher.recipient != recipient || &cipher.sender != sender {
        return Err(CipherError::CipherMismatch {
            sender: cipher.sender,
            recipient: cipher.recipient,
        });
    }
    Ok(cipher)
}
