//! The round coordinator.
//!
//! The [`RoundCoordinator`] admits clients to the rounds of an aggregation protocol, collects
//! their submissions and moves the rounds through their steps:
//!
//! ```text
//! 0 registration -> 1 key sharing -> 2 masking -> 3 unmasking -> closed
//! ```
//!
//! A protocol has at most one active round, which clients work in, and at most one queued round.
//! Registrations which arrive while the active round is past its registration step go to the
//! queued round, which is created on demand and becomes the active round once the current one
//! is aggregated.
//!
//! All state lives in a [`RoundStore`]. The coordinator reads snapshots, decides with the pure
//! functions in [`rules`] and writes back with compare-and-swap operations, so concurrent calls
//! never create two active rounds or advance a step twice. The loser of a race gets a
//! [`CoordinatorError::Conflict`].

pub mod rules;
pub mod state;

use displaydoc::Display;
use thiserror::Error;
use tracing_futures::Instrument;
use validator::{Validate, ValidationErrors};

use self::state::{
    AggregationProtocol,
    ProtocolRound,
    ProtocolState,
    ProtocolStatus,
    RegistrationResponse,
    RoundStatus,
    RoundStep,
    SubmissionCounts,
    SubmissionResponse,
};
use crate::{
    aggregation::{self, AggregationError},
    settings::ProtocolSettings,
    storage::{Cas, Conflict, RoundStore, StorageError, SubmissionAdd, SubmissionAddError},
};
use secagg_core::{
    message::{
        AggregatedParameters,
        MaskedInput,
        Participant,
        PublicKeyBroadcast,
        ServerCipherBroadcast,
        ServerKeyBroadcast,
        ServerUnmaskBroadcast,
        ShareKeysMessage,
        UnmaskShares,
    },
    ClientId,
    ProtocolId,
    RoundId,
};

/// Errors which can occur while the coordinator handles a request.
#[derive(Debug, Display, Error)]
pub enum CoordinatorError {
    /// Unknown protocol {0}.
    UnknownProtocol(ProtocolId),
    /// Unknown round {0}.
    UnknownRound(RoundId),
    /// The protocol has no active round.
    NoActiveRound,
    /// Protocol {0} is {1}.
    ProtocolClosed(ProtocolId, ProtocolState),
    /// The protocol already has an active round.
    RoundActive,
    /// The protocol already has a queued round.
    RoundQueued,
    /// The requirements of the {step} step are not met: {have} of {need}.
    RequirementsNotMet { step: RoundStep, have: u32, need: u32 },
    /// The round is at its final step.
    FinalStep,
    /// The round is at the {actual} step instead of the {expected} step.
    WrongStep { expected: RoundStep, actual: RoundStep },
    /// The broadcast of the {0} step is not available yet.
    BroadcastUnavailable(RoundStep),
    /// Invalid protocol settings: {0}.
    InvalidSettings(ValidationErrors),
    /// The update lost against a concurrent one: {0}.
    Conflict(#[from] Conflict),
    /// The submission was rejected: {0}.
    Submission(#[from] SubmissionAddError),
    /// The aggregation failed: {0}.
    Aggregation(#[from] AggregationError),
    /// Storage request failed: {0}.
    Storage(#[from] StorageError),
}

/// A submission of a client during one of the steps after registration.
#[derive(Clone, Copy, Debug)]
enum Submission<'a> {
    KeyShares(&'a ShareKeysMessage),
    MaskedInput(&'a MaskedInput),
    UnmaskShares(&'a UnmaskShares),
}

impl<'a> Submission<'a> {
    fn step(&self) -> RoundStep {
        match self {
            Self::KeyShares(_) => RoundStep::KeySharing,
            Self::MaskedInput(_) => RoundStep::Masking,
            Self::UnmaskShares(_) => RoundStep::Unmasking,
        }
    }

    fn user_id(&self) -> &'a ClientId {
        match self {
            Self::KeyShares(message) => &message.user_id,
            Self::MaskedInput(input) => &input.user_id,
            Self::UnmaskShares(shares) => &shares.user_id,
        }
    }
}

/// Drives the rounds of aggregation protocols kept in a [`RoundStore`].
#[derive(Debug, Clone)]
pub struct RoundCoordinator<S> {
    store: S,
}

impl<S> RoundCoordinator<S>
where
    S: RoundStore,
{
    /// Creates a coordinator on top of a store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Gets the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates an aggregation protocol.
    ///
    /// # Errors
    /// Fails with [`CoordinatorError::InvalidSettings`] if the settings don't validate.
    pub async fn create_protocol(
        &self,
        settings: ProtocolSettings,
    ) -> Result<AggregationProtocol, CoordinatorError> {
        settings
            .validate()
            .map_err(CoordinatorError::InvalidSettings)?;
        let protocol = self.store.create_protocol(settings).await?;
        info!(
            protocol_id = protocol.id,
            threshold = settings.threshold,
            min_participants = settings.min_participants,
            "protocol created"
        );
        Ok(protocol)
    }

    /// Starts a new round, either as the active round or as the queued round.
    ///
    /// # Errors
    /// Fails if the protocol is closed or the slot for the round is taken.
    pub async fn start_new_round(
        &self,
        protocol_id: ProtocolId,
        activate: bool,
    ) -> Result<ProtocolRound, CoordinatorError> {
        let span = info_span!("start_new_round", protocol_id = protocol_id, activate = activate);
        async move {
            let protocol = self.load_protocol(protocol_id).await?;
            let activate = rules::check_new_round(&protocol, activate)?;
            let (_, round) = self.create_round(&protocol, activate).await?;
            Ok(round)
        }
        .instrument(span)
        .await
    }

    /// Registers a client with its public keys.
    ///
    /// The client is admitted to the active round if it is still at the registration step, and
    /// to the queued round otherwise. A missing round is created on demand. With auto advance,
    /// the registration may move the active round on to key sharing.
    ///
    /// A registration which loses against a concurrent advance of the round it was admitted to is
    /// retried once against the next round.
    ///
    /// # Errors
    /// Fails if the protocol is closed, if the client or one of its keys is already registered
    /// and with [`CoordinatorError::Conflict`] if a concurrent registration created the round or
    /// the retry lost as well.
    pub async fn process_registration(
        &self,
        protocol_id: ProtocolId,
        client_id: ClientId,
        broadcast: PublicKeyBroadcast,
    ) -> Result<RegistrationResponse, CoordinatorError> {
        let span = info_span!("registration", protocol_id = protocol_id, client_id = %client_id);
        async move {
            let participant = Participant {
                client_id,
                broadcast,
            };
            let mut retried = false;
            let (protocol, round, counts) = loop {
                let protocol = self.load_protocol(protocol_id).await?;
                rules::check_open(&protocol)?;
                let (protocol, round) = self.admitting_round(protocol).await?;
                let add = self
                    .store
                    .append_key_broadcast(round.id, &participant)
                    .await?;
                match add.into_inner() {
                    Ok(counts) => break (protocol, round, counts),
                    // the round left the registration step after it was read
                    Err(SubmissionAddError::StepMismatch) if !retried => {
                        debug!(
                            round_id = round.id,
                            "round closed its registration, retrying"
                        );
                        retried = true;
                    }
                    Err(SubmissionAddError::StepMismatch) => {
                        debug!(
                            round_id = round.id,
                            "registration lost against a concurrent advance"
                        );
                        return Err(CoordinatorError::Conflict(Conflict));
                    }
                    Err(err) => return Err(Self::rejected(err)),
                }
            };
            info!(
                round_id = round.id,
                registered = counts.registered,
                "client registered"
            );

            let round = ProtocolRound {
                step: RoundStep::Registration,
                ..round
            };
            let mut step = round.step;
            if protocol.active_round_id == Some(round.id)
                && rules::should_auto_advance_registration(&protocol.settings, &counts)
            {
                step = self
                    .try_auto_advance(&protocol.settings, &round, &counts)
                    .await?;
            }

            Ok(RegistrationResponse {
                protocol_id,
                round_id: round.id,
                round_number: round.round_number,
                registered: counts.registered,
                step,
            })
        }
        .instrument(span)
        .await
    }

    /// Moves the active round on to its next step.
    ///
    /// # Errors
    /// Fails with [`CoordinatorError::RequirementsNotMet`] if the step can't be left yet, with
    /// [`CoordinatorError::FinalStep`] at the unmasking step and with
    /// [`CoordinatorError::Conflict`] if the round was advanced concurrently.
    pub async fn advance_round(
        &self,
        protocol_id: ProtocolId,
    ) -> Result<ProtocolRound, CoordinatorError> {
        let span = info_span!("advance_round", protocol_id = protocol_id);
        async move {
            let protocol = self.load_protocol(protocol_id).await?;
            rules::check_open(&protocol)?;
            let round = self.active_round(&protocol).await?;
            let counts = self.counts(round.id).await?;
            let next = rules::check_advance(&protocol.settings, &round, &counts)?;
            let advanced = self.store_step(&round, next).await?.into_inner()?;
            info!(round_id = advanced.id, "round advanced to the {} step", advanced.step);
            Ok(advanced)
        }
        .instrument(span)
        .await
    }

    /// Submits the ciphers of a registered client to the active round.
    ///
    /// # Errors
    /// Fails if the round is not at the key sharing step, the client is not registered, has
    /// already submitted or addresses the wrong set of recipients.
    pub async fn submit_key_shares(
        &self,
        protocol_id: ProtocolId,
        message: &ShareKeysMessage,
    ) -> Result<SubmissionResponse, CoordinatorError> {
        self.submit(protocol_id, Submission::KeyShares(message))
            .await
    }

    /// Submits the masked input of a client which shared its keys to the active round.
    ///
    /// # Errors
    /// Fails if the round is not at the masking step, the client did not share its keys, has
    /// already submitted or the input length differs from earlier inputs.
    pub async fn submit_masked_input(
        &self,
        protocol_id: ProtocolId,
        input: &MaskedInput,
    ) -> Result<SubmissionResponse, CoordinatorError> {
        self.submit(protocol_id, Submission::MaskedInput(input))
            .await
    }

    /// Submits the unmask shares of a client which submitted a masked input to the active round.
    ///
    /// # Errors
    /// Fails if the round is not at the unmasking step, the client is not a survivor, has already
    /// submitted or reveals shares it must not reveal.
    pub async fn submit_unmask_shares(
        &self,
        protocol_id: ProtocolId,
        shares: &UnmaskShares,
    ) -> Result<SubmissionResponse, CoordinatorError> {
        self.submit(protocol_id, Submission::UnmaskShares(shares))
            .await
    }

    /// Gets the key broadcast of the active round.
    ///
    /// # Errors
    /// Fails with [`CoordinatorError::BroadcastUnavailable`] during registration.
    pub async fn key_broadcast(
        &self,
        protocol_id: ProtocolId,
    ) -> Result<ServerKeyBroadcast, CoordinatorError> {
        let protocol = self.load_protocol(protocol_id).await?;
        let round = self.active_round(&protocol).await?;
        rules::check_broadcast(&round, RoundStep::KeySharing)?;
        self.round_key_broadcast(&round).await
    }

    /// Gets the ciphers addressed to a client in the active round.
    ///
    /// # Errors
    /// Fails with [`CoordinatorError::BroadcastUnavailable`] before the masking step.
    pub async fn cipher_broadcast(
        &self,
        protocol_id: ProtocolId,
        user_id: &ClientId,
    ) -> Result<ServerCipherBroadcast, CoordinatorError> {
        let protocol = self.load_protocol(protocol_id).await?;
        let round = self.active_round(&protocol).await?;
        rules::check_broadcast(&round, RoundStep::Masking)?;
        let share_messages = self.store.list_key_shares(round.id).await?;
        Ok(aggregation::broadcast_cyphers(&share_messages, user_id))
    }

    /// Gets the survivors of the active round.
    ///
    /// # Errors
    /// Fails with [`CoordinatorError::BroadcastUnavailable`] before the unmasking step.
    pub async fn unmask_broadcast(
        &self,
        protocol_id: ProtocolId,
    ) -> Result<ServerUnmaskBroadcast, CoordinatorError> {
        let protocol = self.load_protocol(protocol_id).await?;
        let round = self.active_round(&protocol).await?;
        rules::check_broadcast(&round, RoundStep::Unmasking)?;
        let masked_inputs = self.store.list_masked_inputs(round.id).await?;
        Ok(aggregation::broadcast_unmask_participants(&masked_inputs))
    }

    /// Unmasks the sum of the masked inputs of the active round and closes the round.
    ///
    /// The queued round, if any, becomes the active round. Otherwise the protocol becomes
    /// inactive until the next registration.
    ///
    /// # Errors
    /// Fails if the round is not at the unmasking step, if fewer than `threshold` clients
    /// submitted unmask shares or if the unmasking fails.
    pub async fn aggregate_round(
        &self,
        protocol_id: ProtocolId,
    ) -> Result<AggregatedParameters, CoordinatorError> {
        let span = info_span!("aggregate_round", protocol_id = protocol_id);
        async move {
            let protocol = self.load_protocol(protocol_id).await?;
            rules::check_open(&protocol)?;
            let round = self.active_round(&protocol).await?;
            if round.step != RoundStep::Unmasking {
                return Err(CoordinatorError::WrongStep {
                    expected: RoundStep::Unmasking,
                    actual: round.step,
                });
            }

            let threshold = protocol.settings.threshold;
            let unmask_shares = self.store.list_unmask_shares(round.id).await?;
            let have = unmask_shares.len() as u32;
            if have < threshold {
                return Err(CoordinatorError::RequirementsNotMet {
                    step: RoundStep::Unmasking,
                    have,
                    need: threshold,
                });
            }
            let key_broadcast = self.round_key_broadcast(&round).await?;
            let masked_inputs = self.store.list_masked_inputs(round.id).await?;
            let aggregated = aggregation::aggregate_masked_inputs(
                &key_broadcast,
                &masked_inputs,
                &unmask_shares,
                threshold,
            )
            .map_err(|err| {
                warn!("unmasking failed: {}", err);
                err
            })?;

            let protocol = self
                .store
                .complete_round(&protocol, round.id)
                .await?
                .into_inner()?;
            info!(
                round_id = round.id,
                survivors = masked_inputs.len(),
                "round aggregated and closed"
            );

            if let Some(next_id) = protocol.active_round_id {
                debug!(round_id = next_id, "queued round activated");
                let next = self.load_round(next_id).await?;
                let counts = self.counts(next_id).await?;
                if rules::should_auto_advance_registration(&protocol.settings, &counts) {
                    self.try_auto_advance(&protocol.settings, &next, &counts)
                        .await?;
                }
            }
            Ok(aggregated)
        }
        .instrument(span)
        .await
    }

    /// Cancels a protocol. Cancelled protocols refuse rounds, registrations and submissions.
    pub async fn cancel_protocol(
        &self,
        protocol_id: ProtocolId,
    ) -> Result<AggregationProtocol, CoordinatorError> {
        self.close_protocol(protocol_id, ProtocolState::Cancelled)
            .await
    }

    /// Marks a protocol as finished. Finished protocols refuse rounds, registrations and
    /// submissions.
    pub async fn finish_protocol(
        &self,
        protocol_id: ProtocolId,
    ) -> Result<AggregationProtocol, CoordinatorError> {
        self.close_protocol(protocol_id, ProtocolState::Finished)
            .await
    }

    /// Reports the status of a protocol and of one of its rounds.
    ///
    /// Without a round id, the active round is reported, if any.
    pub async fn protocol_status(
        &self,
        protocol_id: ProtocolId,
        round_id: Option<RoundId>,
    ) -> Result<ProtocolStatus, CoordinatorError> {
        let protocol = self.load_protocol(protocol_id).await?;
        let round = match round_id.or(protocol.active_round_id) {
            Some(round_id) => {
                let round = self.load_round(round_id).await?;
                if round.protocol_id != protocol.id {
                    return Err(CoordinatorError::UnknownRound(round_id));
                }
                let counts = self.counts(round_id).await?;
                Some(RoundStatus::new(&round, counts))
            }
            None => None,
        };
        Ok(ProtocolStatus {
            protocol_id,
            status: protocol.status,
            num_rounds: protocol.num_rounds,
            threshold: protocol.settings.threshold,
            active_round_id: protocol.active_round_id,
            round,
        })
    }

    async fn submit(
        &self,
        protocol_id: ProtocolId,
        submission: Submission<'_>,
    ) -> Result<SubmissionResponse, CoordinatorError> {
        let step = submission.step();
        let span = info_span!(
            "submission",
            protocol_id = protocol_id,
            step = %step,
            client_id = %submission.user_id()
        );
        async move {
            let protocol = self.load_protocol(protocol_id).await?;
            rules::check_open(&protocol)?;
            let round = self.active_round(&protocol).await?;

            let add = match submission {
                Submission::KeyShares(message) => {
                    self.store.append_key_shares(round.id, message).await?
                }
                Submission::MaskedInput(input) => {
                    self.store.append_masked_input(round.id, input).await?
                }
                Submission::UnmaskShares(shares) => {
                    self.store.append_unmask_shares(round.id, shares).await?
                }
            };
            let counts = Self::accepted(add)?;
            debug!(
                round_id = round.id,
                submitted = counts.of_step(step),
                eligible = counts.eligible_for(step),
                "submission accepted"
            );

            // the append succeeded, so the round was at the submission step
            let round = ProtocolRound { step, ..round };
            let mut current = step;
            if rules::should_auto_advance_submission(&protocol.settings, step, &counts) {
                current = self
                    .try_auto_advance(&protocol.settings, &round, &counts)
                    .await?;
            }
            Ok(SubmissionResponse {
                round_id: round.id,
                step: current,
                counts,
            })
        }
        .instrument(span)
        .await
    }

    /// Finds the round a registration goes to, creating it if needed.
    async fn admitting_round(
        &self,
        protocol: AggregationProtocol,
    ) -> Result<(AggregationProtocol, ProtocolRound), CoordinatorError> {
        let active = match protocol.active_round_id {
            Some(active_id) => self.load_round(active_id).await?,
            None => {
                debug!("no active round");
                return self.create_round(&protocol, true).await;
            }
        };
        if active.step == RoundStep::Registration {
            return Ok((protocol, active));
        }
        match protocol.next_round_id {
            Some(next_id) => {
                let next = self.load_round(next_id).await?;
                Ok((protocol, next))
            }
            None => {
                debug!(
                    "active round at the {} step, queuing a new round",
                    active.step
                );
                self.create_round(&protocol, false).await
            }
        }
    }

    async fn create_round(
        &self,
        protocol: &AggregationProtocol,
        activate: bool,
    ) -> Result<(AggregationProtocol, ProtocolRound), CoordinatorError> {
        let (protocol, round) = self
            .store
            .create_round(protocol, activate)
            .await?
            .into_inner()
            .map_err(|conflict| {
                debug!("round creation lost against a concurrent one");
                conflict
            })?;
        info!(
            round_id = round.id,
            round_number = round.round_number,
            activate = activate,
            "round created"
        );
        Ok((protocol, round))
    }

    /// Advances a round if its step requirement holds.
    ///
    /// Losing against a concurrent advance is not an error. Returns the step of the round.
    async fn try_auto_advance(
        &self,
        settings: &ProtocolSettings,
        round: &ProtocolRound,
        counts: &SubmissionCounts,
    ) -> Result<RoundStep, CoordinatorError> {
        let next = match rules::check_advance(settings, round, counts) {
            Ok(next) => next,
            Err(_) => return Ok(round.step),
        };
        match self.store_step(round, next).await?.into_inner() {
            Ok(advanced) => {
                info!(
                    round_id = advanced.id,
                    "round auto advanced to the {} step", advanced.step
                );
                Ok(advanced.step)
            }
            Err(Conflict) => {
                debug!(round_id = round.id, "round was advanced concurrently");
                Ok(self.load_round(round.id).await?.step)
            }
        }
    }

    async fn store_step(
        &self,
        round: &ProtocolRound,
        step: RoundStep,
    ) -> Result<Cas<ProtocolRound>, StorageError> {
        let advanced = ProtocolRound {
            step,
            ..round.clone()
        };
        self.store.update_round(&advanced, round.step).await
    }

    async fn close_protocol(
        &self,
        protocol_id: ProtocolId,
        status: ProtocolState,
    ) -> Result<AggregationProtocol, CoordinatorError> {
        let protocol = self.load_protocol(protocol_id).await?;
        rules::check_open(&protocol)?;
        let closed = AggregationProtocol {
            status,
            ..protocol
        };
        let protocol = self.store.update_protocol(&closed).await?.into_inner()?;
        info!(protocol_id = protocol_id, "protocol {}", status);
        Ok(protocol)
    }

    async fn round_key_broadcast(
        &self,
        round: &ProtocolRound,
    ) -> Result<ServerKeyBroadcast, CoordinatorError> {
        let participants = self.store.list_key_broadcasts(round.id).await?;
        Ok(aggregation::broadcast_keys(
            round.protocol_id,
            round.id,
            participants,
        ))
    }

    fn accepted(add: SubmissionAdd) -> Result<SubmissionCounts, CoordinatorError> {
        add.into_inner().map_err(Self::rejected)
    }

    fn rejected(err: SubmissionAddError) -> CoordinatorError {
        warn!("submission rejected: {}", err);
        CoordinatorError::Submission(err)
    }

    async fn load_protocol(
        &self,
        protocol_id: ProtocolId,
    ) -> Result<AggregationProtocol, CoordinatorError> {
        self.store
            .protocol(protocol_id)
            .await?
            .ok_or(CoordinatorError::UnknownProtocol(protocol_id))
    }

    async fn load_round(&self, round_id: RoundId) -> Result<ProtocolRound, CoordinatorError> {
        self.store
            .round(round_id)
            .await?
            .ok_or(CoordinatorError::UnknownRound(round_id))
    }

    async fn active_round(
        &self,
        protocol: &AggregationProtocol,
    ) -> Result<ProtocolRound, CoordinatorError> {
        let round_id = protocol
            .active_round_id
            .ok_or(CoordinatorError::NoActiveRound)?;
        self.load_round(round_id).await
    }

    async fn counts(&self, round_id: RoundId) -> Result<SubmissionCounts, CoordinatorError> {
        self.store
            .submission_counts(round_id)
            .await?
            .ok_or(CoordinatorError::UnknownRound(round_id))
    }
}
