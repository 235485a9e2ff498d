//! Wrappers around the [sodiumoxide] primitives used by the protocol.
//!
//! Each client holds two `X25519` key pairs: the cipher key pair, from which the symmetric keys
//! of the pairwise cipher exchange are derived, and the sharing key pair, from which the pairwise
//! masks are derived and whose secret half is Shamir-shared with the peers. Optionally a client
//! also holds an `Ed25519` signing key to sign its public broadcast.
//!
//! # Examples
//! ## Key agreement
//! ```
//! # use secagg_core::crypto::{AgreementKeyPair, derive_shared_key};
//! let alice = AgreementKeyPair::generate();
//! let bob = AgreementKeyPair::generate();
//! assert_eq!(
//!     derive_shared_key(&alice.secret, &bob.public, 32).unwrap(),
//!     derive_shared_key(&bob.secret, &alice.public, 32).unwrap(),
//! );
//! ```
//!
//! ## Symmetric encryption
//! ```
//! # use secagg_core::crypto::{ByteObject, SymmetricKey};
//! let key = SymmetricKey::generate();
//! let sealed = key.seal(b"Hello world!");
//! assert_eq!(key.open(&sealed).unwrap(), b"Hello world!".to_vec());
//! ```
//!
//! [sodiumoxide]: https://docs.rs/sodiumoxide/

/// Implements `Serialize` and `Deserialize` for a [`ByteObject`] as a hex string.
macro_rules! impl_hex_serde {
    ($ty:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                $crate::crypto::hex_serde::serialize(self, serializer)
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                $crate::crypto::hex_serde::deserialize(deserializer)
            }
        }
    };
}

pub(crate) mod agreement;
pub(crate) mod encrypt;
pub(crate) mod sign;

use sodiumoxide::randombytes::randombytes;

pub use self::{
    agreement::{
        derive_shared_key,
        AgreementError,
        AgreementKeyPair,
        PublicAgreementKey,
        SecretAgreementKey,
    },
    encrypt::{DecryptionError, SymmetricKey},
    sign::{BroadcastSigningKey, Signature, VerificationKey},
};

/// An interface for slicing into cryptographic byte objects.
pub trait ByteObject: Sized {
    /// Length in bytes of this object
    const LENGTH: usize;

    /// Creates a new object with all the bytes initialized to `0`.
    fn zeroed() -> Self {
        Self::from_slice_unchecked(&vec![0_u8; Self::LENGTH])
    }

    /// Gets the object byte representation.
    fn as_slice(&self) -> &[u8];

    /// Creates an object from the given buffer.
    ///
    /// # Errors
    /// Returns `None` if the length of the byte-slice isn't equal to the length of the object.
    fn from_slice(bytes: &[u8]) -> Option<Self>;

    /// Creates an object from the given buffer.
    ///
    /// # Panics
    /// Panics if the length of the byte-slice isn't equal to the length of the object.
    fn from_slice_unchecked(bytes: &[u8]) -> Self {
        Self::from_slice(bytes).unwrap()
    }

    /// Generates an object with random bytes
    fn generate() -> Self {
        // safe unwrap: length of slice is guaranteed by constants
        Self::from_slice_unchecked(randombytes(Self::LENGTH).as_slice())
    }

    /// Encodes the object as a lowercase hex string.
    fn to_hex(&self) -> String {
        hex::encode(self.as_slice())
    }

    /// Decodes an object from a hex string.
    ///
    /// # Errors
    /// Returns `None` if the string isn't valid hex or doesn't have the length of the object.
    fn from_hex(s: &str) -> Option<Self> {
        hex::decode(s).ok().and_then(|bytes| Self::from_slice(&bytes))
    }
}

/// Serde helpers to (de)serialize byte objects as hex strings.
pub mod hex_serde {
    use std::fmt;

    use serde::{
        de::{self, Deserializer, Visitor},
        Serializer,
    };

    use super::ByteObject;

    pub fn serialize<T, S>(object: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: ByteObject,
        S: Serializer,
    {
        serializer.serialize_str(&object.to_hex())
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: ByteObject,
        D: Deserializer<'de>,
    {
        struct HexVisitor<T>(std::marker::PhantomData<T>);

        impl<'de, T: ByteObject> Visitor<'de> for HexVisitor<T> {
            type Value = T;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a hex string of {} bytes", T::LENGTH)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                T::from_hex(value)
                    .ok_or_else(|| de::Error::invalid_value(de::Unexpected::Str(value), &self))
            }
        }

        deserializer.deserialize_str(HexVisitor(std::marker::PhantomData))
    }
}
