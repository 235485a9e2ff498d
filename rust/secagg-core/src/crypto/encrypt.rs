//! Wrappers around the [sodiumoxide] symmetric encryption primitives.
//!
//! See the [crypto module] documentation since this is a private module anyways.
//!
//! [sodiumoxide]: https://docs.rs/sodiumoxide/
//! [crypto module]: crate::crypto

use derive_more::{AsMut, AsRef, From};
use sodiumoxide::crypto::secretbox;

use super::ByteObject;

/// Number of additional bytes in a sealed message compared to the corresponding plaintext.
pub const SEALBYTES: usize = secretbox::NONCEBYTES + secretbox::MACBYTES;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("decryption of a message failed")]
/// An error related to the decryption of a message.
pub struct DecryptionError;

#[derive(AsRef, AsMut, From, Eq, PartialEq, Clone, Debug)]
/// A `XSalsa20Poly1305` key for symmetric authenticated encryption.
///
/// When this goes out of scope, its contents will be zeroed out.
pub struct SymmetricKey(secretbox::Key);

impl ByteObject for SymmetricKey {
    const LENGTH: usize = secretbox::KEYBYTES;


    fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        secretbox::Key::from_slice(bytes).map(Self)
    }
}

impl SymmetricKey {
    /// Encrypts and authenticates a message `m` with this key.
    ///
    /// A fresh random nonce is generated for every message and prepended to the ciphertext. The
    /// resulting length is [`SEALBYTES`]` + m.len()`.
    pub fn seal(&self, m: &[u8]) -> Vec<u8> {
        let nonce = secretbox::gen_nonce();
        let mut sealed = nonce.as_ref().to_vec();
        sealed.extend(secretbox::seal(m, &nonce, &self.0));
        sealed
    }

    /// Verifies and decrypts a message sealed with this key.
    ///
    /// # Errors
    /// Returns `Err(DecryptionError)` if the message is too short or fails authentication.
    pub fn open(&self, c: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        if c.len() < SEALBYTES {
            return Err(DecryptionError);
        }
        let (nonce, ciphertext) = c.split_at(secretbox::NONCEBYTES);
        let nonce = secretbox::Nonce::from_slice(nonce).ok_or(DecryptionError)?;
        secretbox::open(ciphertext, &nonce, &self.0).map_err(|_| DecryptionError)
    }
}
