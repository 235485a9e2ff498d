//! Protocol and round records and the reports derived from them.

use chrono::{DateTime, Utc};
use derive_more::Display;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::settings::ProtocolSettings;
use secagg_core::{ProtocolId, RoundId};

/// The steps of a round.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    Eq,
    PartialEq,
    PartialOrd,
    Ord,
    Hash,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
#[serde(into = "u8", try_from = "u8")]
pub enum RoundStep {
    #[display(fmt = "Registration")]
    Registration = 0,
    #[display(fmt = "KeySharing")]
    KeySharing = 1,
    #[display(fmt = "Masking")]
    Masking = 2,
    #[display(fmt = "Unmasking")]
    Unmasking = 3,
}

impl RoundStep {
    /// Gets the step after this one, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Registration => Some(Self::KeySharing),
            Self::KeySharing => Some(Self::Masking),
            Self::Masking => Some(Self::Unmasking),
            Self::Unmasking => None,
        }
    }
}

/// The lifecycle status of an aggregation protocol.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolState {
    /// created, no round started yet
    #[display(fmt = "initialized")]
    Initialized,
    /// a round is running
    #[display(fmt = "active")]
    Active,
    /// the last round was completed and no round is running
    #[display(fmt = "inactive")]
    Inactive,
    #[display(fmt = "finished")]
    Finished,
    #[display(fmt = "cancelled")]
    Cancelled,
}

impl ProtocolState {
    /// Checks whether the protocol still accepts rounds, registrations and submissions.
    pub fn is_open(self) -> bool {
        !matches!(self, Self::Finished | Self::Cancelled)
    }
}

/// An aggregation protocol spanning several rounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregationProtocol {
    pub id: ProtocolId,
    pub status: ProtocolState,
    /// The number of rounds created so far.
    pub num_rounds: u32,
    /// The round clients currently work in.
    pub active_round_id: Option<RoundId>,
    /// The queued round which admits registrations while the active round is past registration.
    pub next_round_id: Option<RoundId>,
    pub settings: ProtocolSettings,
    /// Incremented on every update of the record.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A round of an aggregation protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolRound {
    pub id: RoundId,
    pub protocol_id: ProtocolId,
    /// The position of the round within its protocol, starting at 1.
    pub round_number: u32,
    pub step: RoundStep,
    /// Set once the round was aggregated.
    pub closed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The number of accepted submissions of a round, per step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionCounts {
    pub registered: u32,
    pub key_shares: u32,
    pub masked_inputs: u32,
    pub unmask_shares: u32,
}

impl SubmissionCounts {
    /// Gets the number of submissions accepted during a step.
    pub fn of_step(&self, step: RoundStep) -> u32 {
        match step {
            RoundStep::Registration => self.registered,
            RoundStep::KeySharing => self.key_shares,
            RoundStep::Masking => self.masked_inputs,
            RoundStep::Unmasking => self.unmask_shares,
        }
    }

    /// Gets the number of clients allowed to submit during a step.
    pub fn eligible_for(&self, step: RoundStep) -> u32 {
        match step {
            RoundStep::Registration => u32::MAX,
            RoundStep::KeySharing => self.registered,
            RoundStep::Masking => self.key_shares,
            RoundStep::Unmasking => self.masked_inputs,
        }
    }
}

/// The answer to a registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub protocol_id: ProtocolId,
    /// The round the client was admitted to.
    pub round_id: RoundId,
    pub round_number: u32,
    /// The number of registrations of the admitting round, including this one.
    pub registered: u32,
    /// The step of the admitting round after the registration.
    pub step: RoundStep,
}

/// The answer to a submission of key shares, a masked input or unmask shares.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub round_id: RoundId,
    /// The step of the round after the submission.
    pub step: RoundStep,
    pub counts: SubmissionCounts,
}

/// The status of a protocol and optionally one of its rounds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolStatus {
    pub protocol_id: ProtocolId,
    pub status: ProtocolState,
    pub num_rounds: u32,
    pub threshold: u32,
    pub active_round_id: Option<RoundId>,
    pub round: Option<RoundStatus>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStatus {
    pub round_id: RoundId,
    pub round_number: u32,
    pub step: RoundStep,
    pub closed: bool,
    pub registered: u32,
    pub key_shares: u32,
    pub masked_inputs: u32,
    pub unmask_shares: u32,
}

impl RoundStatus {
    pub fn new(round: &ProtocolRound, counts: SubmissionCounts) -> Self {
        let SubmissionCounts {
            registered,
            key_shares,
            masked_inputs,
            unmask_shares,
        } = counts;
        Self {
            round_id: round.id,
            round_number: round.round_number,
            step: round.step,
            closed: round.closed,
            registered,
            key_shares,
            masked_inputs,
            unmask_shares,
        }
    }
}
