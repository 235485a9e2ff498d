#![cfg_attr(docsrs, feature(doc_cfg))]
//! Building blocks for clients of the secure aggregation protocol.
//!
//! A client goes through four steps, each triggered by a broadcast of the aggregator:
//!
//! 1. **setup**: generate fresh cipher and sharing keys and register with the public keys;
//! 2. **key sharing**: on the key broadcast, split a fresh mask seed and the secret sharing key
//!    into Shamir shares and seal one cipher per peer;
//! 3. **masking**: on the cipher broadcast, mask the input with the private mask and one pairwise
//!    mask per peer;
//! 4. **unmasking**: on the unmask broadcast, reveal the seed shares of the surviving peers and
//!    the sharing key shares of the dropped ones.
//!
//! The steps are available as free functions in [`protocol`] and as the typestate
//! [`Participant`] which keeps the state between them.
//!
//! ```
//! # use secagg_client::Participant;
//! let (participant, broadcast) = Participant::new("alice".into(), 2);
//! assert_eq!(participant.threshold(), 2);
//! # let _ = broadcast;
//! ```

pub mod participant;
pub mod protocol;

pub use self::{
    participant::{InputMasked, KeysBroadcast, Participant, SharesSubmitted, UnmaskSubmitted},
    protocol::{ClientError, LocalSeed},
};
