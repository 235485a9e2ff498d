#![cfg_attr(docsrs, feature(doc_cfg))]
//! The aggregator side of the secure aggregation protocol.
//!
//! The aggregator drives many clients through the rounds of one or more aggregation protocols.
//! A round goes through four steps:
//!
//! 0. **registration**: clients register with their public keys;
//! 1. **key sharing**: clients fetch the key broadcast and submit one sealed cipher per peer;
//! 2. **masking**: clients fetch the ciphers addressed to them and submit their masked input;
//! 3. **unmasking**: clients fetch the list of survivors and submit the shares needed to remove
//!    the masks. The aggregator then computes the unmasked sum and closes the round.
//!
//! The crate is split into
//! - [`aggregation`]: the server broadcasts of each step and the final unmasking;
//! - [`coordinator`]: the [`RoundCoordinator`] state machine which admits clients, gates step
//!   transitions on participation thresholds and reports the status of a protocol;
//! - [`storage`]: the [`RoundStore`] the coordinator keeps its state in, and an in-memory
//!   implementation;
//! - [`settings`]: loading and validation of the configuration.
//!
//! [`RoundCoordinator`]: coordinator::RoundCoordinator
//! [`RoundStore`]: storage::RoundStore

#[macro_use]
extern crate serde;

#[macro_use]
extern crate tracing;

pub mod aggregation;
pub mod coordinator;
pub mod settings;
pub mod storage;
