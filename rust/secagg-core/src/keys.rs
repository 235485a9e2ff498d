//! A client's key material.
//!
//! Every client generates fresh keys for each protocol iteration and discards them afterwards:
//! a cipher key pair for the pairwise cipher exchange, a sharing key pair for the pairwise masks
//! and, optionally, a signing key to sign its public broadcast.

use thiserror::Error;

use crate::{
    crypto::{
        AgreementKeyPair,
        BroadcastSigningKey,
        ByteObject,
        SecretAgreementKey,
        VerificationKey,
    },
    message::PublicKeyBroadcast,
};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
/// Errors related to loading serialized keys.
pub enum KeyError {
    #[error("invalid cipher key")]
    InvalidCipherKey,
    #[error("invalid sharing key")]
    InvalidSharingKey,
    #[error("invalid signing key")]
    InvalidSigningKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The key pairs of a client.
pub struct ClientKeys {
    pub cipher: AgreementKeyPair,
    pub sharing: AgreementKeyPair,
    pub signing: Option<BroadcastSigningKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// The hex encoded secret keys of a client.
pub struct SerializedKeys {
    pub cipher_key: String,
    pub sharing_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
}

impl ClientKeys {
    /// Generates fresh cipher and sharing key pairs.
    pub fn generate() -> Self {
        Self {
            cipher: AgreementKeyPair::generate(),
            sharing: AgreementKeyPair::generate(),
            signing: None,
        }
    }

    /// Generates fresh cipher and sharing key pairs and a signing key.
    pub fn generate_with_signing() -> Self {
        Self {
            signing: Some(BroadcastSigningKey::generate()),
            ..Self::generate()
        }
    }

    /// Builds the public key broadcast, signed if a signing key is present.
    pub fn public_broadcast(&self) -> PublicKeyBroadcast {
        let cipher_public_key = self.cipher.public;
        let sharing_public_key = self.sharing.public;
        let signature = self
            .signing
            .as_ref()
            .map(|signing| signing.sign(&cipher_public_key, &sharing_public_key));
        PublicKeyBroadcast {
            cipher_public_key,
            sharing_public_key,
            signature,
        }
    }

    /// Serializes the secret keys as hex strings.
    pub fn serialize(&self) -> SerializedKeys {
        SerializedKeys {
            cipher_key: self.cipher.secret.to_hex(),
            sharing_key: self.sharing.secret.to_hex(),
            signing_key: self.signing.as_ref().map(|signing| signing.to_hex()),
        }
    }

    /// Restores the keys from their serialized secret halves.
    ///
    /// # Errors
    /// Fails if any of the keys is not valid hex of the right length.
    pub fn load(serialized: &SerializedKeys) -> Result<Self, KeyError> {
        let cipher = SecretAgreementKey::from_hex(&serialized.cipher_key)
            .ok_or(KeyError::InvalidCipherKey)?;
        let sharing = SecretAgreementKey::from_hex(&serialized.sharing_key)
            .ok_or(KeyError::InvalidSharingKey)?;
        let signing = serialized
            .signing_key
            .as_deref()
            .map(|hex| {
                BroadcastSigningKey::from_hex(hex).ok_or(KeyError::InvalidSigningKey)
            })
            .transpose()?;
        Ok(Self {
            cipher: AgreementKeyPair::from_secret(cipher),
            sharing: AgreementKeyPair::from_secret(sharing),
            signing,
        })
    }
}

impl PublicKeyBroadcast {
    /// Verifies the broadcast signature against a verification key.
    ///
    /// Returns `false` if the broadcast is unsigned.
    pub fn verify(&self, verification_key: &VerificationKey) -> bool {
        self.signature.as_ref().map_or(false, |signature| {
            verification_key.verify(signature, &self.cipher_public_key, &self.sharing_public_key)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_distinct() {
        let keys = ClientKeys::generate();
        assert_ne!(keys.cipher.public, keys.sharing.public);
        assert!(keys.signing.is_none());
        assert!(keys.public_broadcast().signature.is_none());
    }

    #[test]
    fn test_serialize_load() {
        let keys = ClientKeys::generate();
        let serialized = keys.serialize();
        assert!(serialized.signing_key.is_none());
        assert_eq!(ClientKeys::load(&serialized).unwrap(), keys);

        let json = serde_json::to_string(&serialized).unwrap();
        let restored: SerializedKeys = serde_json::from_str(&json).unwrap();
        assert_eq!(ClientKeys::load(&restored).unwrap(), keys);
    }

    #[test]
    fn test_serialize_load_with_signing() {
        let keys = ClientKeys::generate_with_signing();
        assert_eq!(ClientKeys::load(&keys.serialize()).unwrap(), keys);
    }

    #[test]
    fn test_load_invalid() {
        let mut serialized = ClientKeys::generate().serialize();
        serialized.sharing_key.truncate(10);
        assert_eq!(ClientKeys::load(&serialized), Err(KeyError::InvalidSharingKey));
        serialized.cipher_key = "xyz".to_string();
        assert_eq!(ClientKeys::load(&serialized), Err(KeyError::InvalidCipherKey));
    }

    #[test]
    fn test_signed_broadcast() {
        let keys = ClientKeys::generate_with_signing();
        let verification_key = keys.signing.as_ref().unwrap().verification_key();
        let broadcast = keys.public_broadcast();
        assert!(broadcast.verify(&verification_key));

        let mut forged = broadcast.clone();
        forged.sharing_public_key = ClientKeys::generate().sharing.public;
        assert!(!forged.verify(&verification_key));
        assert!(!ClientKeys::generate().public_broadcast().verify(&verification_key));
    }
}
