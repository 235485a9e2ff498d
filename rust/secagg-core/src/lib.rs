#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Secure aggregation for federated learning
//!
//! Many mutually distrusting clients submit numeric vectors to an aggregator which must learn
//! only their sum. Every client hides its vector behind an additive mask made of a private part
//! (expanded from a random seed) and pairwise parts (expanded from Diffie-Hellman secrets shared
//! with every other client) which cancel out over the whole group. Both the seed and the key that
//! produces the pairwise parts are split into Shamir shares and distributed to the peers, so the
//! aggregator can still unmask the sum if some clients drop out after sharing their keys.
//!
//! This crate contains the building blocks which are shared between clients and the aggregator:
//!
//! - [`crypto`]: key types, `X25519` key agreement followed by `HKDF-SHA256`, symmetric
//!   authenticated encryption and optional `Ed25519` signatures.
//! - [`sharing`]: Shamir `(k, n)` threshold sharing of 16-byte blocks, the seed and the chunked
//!   sharing key.
//! - [`cipher`]: the encrypted, authenticated payload one client addresses to one peer.
//! - [`mask`]: mask expansion and application.
//! - [`keys`]: a client's key material and its public broadcast.
//! - [`message`]: the protocol messages exchanged between clients and aggregator.
#[macro_use]
extern crate serde;

#[macro_use]
pub mod crypto;
pub mod cipher;
pub mod keys;
pub mod mask;
pub mod message;
pub mod sharing;
#[cfg(any(test, feature = "testutils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testutils")))]
pub mod testutils;

use thiserror::Error;

#[derive(Error, Debug)]
#[error("initialization failed: insufficient system entropy to generate secrets")]
/// An error related to insufficient system entropy for secrets at program startup.
pub struct InitError;

/// Initializes the cryptographic backend.
///
/// Must be called once before any keys or seeds are generated. Calling it more than once is
/// harmless.
///
/// # Errors
/// Fails if the backend could not gather enough entropy.
pub fn init() -> Result<(), InitError> {
    sodiumoxide::init().map_err(|_| InitError)
}

/// The identifier of an aggregation protocol instance.
pub type ProtocolId = u64;

/// The identifier of a round within an aggregation protocol.
pub type RoundId = u64;

/// The 4-byte seed of a client's private mask.
pub type MaskSeed = u32;

pub use self::message::ClientId;
