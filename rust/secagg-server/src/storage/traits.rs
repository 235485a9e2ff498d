//! Storage API.

use async_trait::async_trait;
use derive_more::Deref;
use displaydoc::Display;
use num_enum::TryFromPrimitive;
use thiserror::Error;

use crate::{
    coordinator::state::{AggregationProtocol, ProtocolRound, RoundStep, SubmissionCounts},
    settings::ProtocolSettings,
};
use secagg_core::{
    message::{MaskedInput, Participant, ShareKeysMessage, UnmaskShares},
    ProtocolId,
    RoundId,
};

/// The error type for storage operations that are not directly related to application domain.
/// These include, for example IO errors like broken pipe, file not found, out-of-memory, etc.
pub type StorageError = anyhow::Error;

/// The result of the storage operation.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
/// An abstract store for protocols, rounds and the submissions of each round.
///
/// All mutations are atomic. Updates of protocol and round records are compare-and-swap
/// operations: they only apply if the stored record is still the one the caller read.
pub trait RoundStore: Send + Sync + 'static {
    /// Creates a protocol in the [`ProtocolState::Initialized`] status.
    ///
    /// [`ProtocolState::Initialized`]: crate::coordinator::state::ProtocolState::Initialized
    async fn create_protocol(&self, settings: ProtocolSettings)
        -> StorageResult<AggregationProtocol>;

    /// Returns a protocol.
    ///
    /// # Behavior
    ///
    /// - If the protocol does not exist, return `StorageResult::Ok(Option::None)`.
    /// - If the protocol exists, return `StorageResult::Ok(Option::Some(AggregationProtocol))`.
    async fn protocol(&self, id: ProtocolId) -> StorageResult<Option<AggregationProtocol>>;

    /// Replaces a protocol record.
    ///
    /// # Behavior
    ///
    /// - If the stored version equals the version of `protocol`, store it with an incremented
    ///   version and return the stored record in a `Cas` containing `Result::Ok`.
    /// - Otherwise return a `Cas` containing `Result::Err(Conflict)`.
    async fn update_protocol(
        &self,
        protocol: &AggregationProtocol,
    ) -> StorageResult<Cas<AggregationProtocol>>;

    /// Creates the next round of a protocol.
    ///
    /// With `activate`, the round becomes the active round, otherwise it is queued as the next
    /// round. The protocol record is updated in the same operation.
    ///
    /// # Behavior
    ///
    /// - If the stored protocol is still the given one and the slot the round goes to is free,
    ///   return the updated protocol and the new round. A round can only be queued if the
    ///   protocol has an active round.
    /// - Otherwise return a `Cas` containing `Result::Err(Conflict)`.
    async fn create_round(
        &self,
        protocol: &AggregationProtocol,
        activate: bool,
    ) -> StorageResult<Cas<(AggregationProtocol, ProtocolRound)>>;

    /// Returns a round.
    async fn round(&self, id: RoundId) -> StorageResult<Option<ProtocolRound>>;

    /// Returns all rounds of a protocol ordered by their round number.
    async fn rounds(&self, protocol_id: ProtocolId) -> StorageResult<Vec<ProtocolRound>>;

    /// Replaces a round record if its stored step is still `expected_step`.
    async fn update_round(
        &self,
        round: &ProtocolRound,
        expected_step: RoundStep,
    ) -> StorageResult<Cas<ProtocolRound>>;

    /// Closes the active round of a protocol and activates the queued round, if any.
    ///
    /// # Behavior
    ///
    /// - If the stored protocol is still the given one and `round_id` is its active round,
    ///   close the round, move the queued round into the active slot (or set the protocol
    ///   inactive if there is none) and return the updated protocol.
    /// - Otherwise return a `Cas` containing `Result::Err(Conflict)`.
    async fn complete_round(
        &self,
        protocol: &AggregationProtocol,
        round_id: RoundId,
    ) -> StorageResult<Cas<AggregationProtocol>>;

    /// Registers a participant to a round.
    ///
    /// # Behavior
    ///
    /// - If the participant has been successfully added, return `StorageResult::Ok(SubmissionAdd)`
    ///   containing the updated submission counts.
    /// - If the round is not at the registration step, or the client or one of its keys is
    ///   already registered, return the corresponding `SubmissionAddError`.
    async fn append_key_broadcast(
        &self,
        round_id: RoundId,
        participant: &Participant,
    ) -> StorageResult<SubmissionAdd>;

    /// Adds the ciphers of a registered participant to a round at the key sharing step.
    async fn append_key_shares(
        &self,
        round_id: RoundId,
        message: &ShareKeysMessage,
    ) -> StorageResult<SubmissionAdd>;

    /// Adds the masked input of a participant which shared its keys to a round at the masking
    /// step.
    async fn append_masked_input(
        &self,
        round_id: RoundId,
        input: &MaskedInput,
    ) -> StorageResult<SubmissionAdd>;

    /// Adds the unmask shares of a participant which submitted a masked input to a round at the
    /// unmasking step.
    async fn append_unmask_shares(
        &self,
        round_id: RoundId,
        shares: &UnmaskShares,
    ) -> StorageResult<SubmissionAdd>;

    /// Returns the registrations of a round in registration order.
    async fn list_key_broadcasts(&self, round_id: RoundId) -> StorageResult<Vec<Participant>>;

    /// Returns the key share messages of a round in submission order.
    async fn list_key_shares(&self, round_id: RoundId) -> StorageResult<Vec<ShareKeysMessage>>;

    /// Returns the masked inputs of a round in submission order.
    async fn list_masked_inputs(&self, round_id: RoundId) -> StorageResult<Vec<MaskedInput>>;

    /// Returns the unmask shares of a round in submission order.
    async fn list_unmask_shares(&self, round_id: RoundId) -> StorageResult<Vec<UnmaskShares>>;

    /// Returns the submission counts of a round.
    ///
    /// # Behavior
    ///
    /// - If the round does not exist, return `StorageResult::Ok(Option::None)`.
    async fn submission_counts(&self, round_id: RoundId)
        -> StorageResult<Option<SubmissionCounts>>;
}

/// A wrapper that contains the result of a compare-and-swap operation.
#[derive(Deref, Debug)]
pub struct Cas<T>(pub(crate) Result<T, Conflict>);

impl<T> Cas<T> {
    /// Unwraps this wrapper, returning the underlying result.
    pub fn into_inner(self) -> Result<T, Conflict> {
        self.0
    }
}

/// the record was modified concurrently
#[derive(Display, Error, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict;

/// A wrapper that contains the result of an "append submission" operation.
#[derive(Deref, Debug)]
pub struct SubmissionAdd(pub(crate) Result<SubmissionCounts, SubmissionAddError>);

impl SubmissionAdd {
    /// Unwraps this wrapper, returning the underlying result.
    pub fn into_inner(self) -> Result<SubmissionCounts, SubmissionAddError> {
        self.0
    }
}

/// Error that can occur when adding a submission to a round.
#[derive(Display, Error, Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(i64)]
pub enum SubmissionAddError {
    /// the round is not at the step of the submission
    StepMismatch = -1,
    /// the client is not eligible for the step
    NotEligible = -2,
    /// the client already submitted during the step
    AlreadySubmitted = -3,
    /// unknown round
    UnknownRound = -4,
    /// the submission is malformed
    Malformed = -5,
    /// the round is closed
    RoundClosed = -6,
}
