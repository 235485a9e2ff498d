//! Pure checks over snapshots of the coordinator state.
//!
//! The coordinator and the stores apply these rules to the records they read, so that every
//! decision about step transitions and eligibility is made in one place.

use crate::{
    coordinator::{
        state::{AggregationProtocol, ProtocolRound, RoundStep, SubmissionCounts},
        CoordinatorError,
    },
    settings::ProtocolSettings,
    storage::SubmissionAddError,
};
use secagg_core::{
    message::{MaskedInput, Participant, ShareKeysMessage, UnmaskShares},
    ClientId,
};

/// Checks that a protocol still accepts rounds, registrations and submissions.
pub fn check_open(protocol: &AggregationProtocol) -> Result<(), CoordinatorError> {
    if protocol.status.is_open() {
        Ok(())
    } else {
        Err(CoordinatorError::ProtocolClosed(protocol.id, protocol.status))
    }
}

/// Checks that a new round can be started in the requested slot and returns whether the round
/// goes to the active slot.
///
/// A round is only queued behind an active round. Without an active round, the new round is
/// activated even if it was requested as the queued round.
pub fn check_new_round(
    protocol: &AggregationProtocol,
    activate: bool,
) -> Result<bool, CoordinatorError> {
    check_open(protocol)?;
    let activate = activate || protocol.active_round_id.is_none();
    if activate && protocol.active_round_id.is_some() {
        return Err(CoordinatorError::RoundActive);
    }
    if !activate && protocol.next_round_id.is_some() {
        return Err(CoordinatorError::RoundQueued);
    }
    Ok(activate)
}

/// Gets the number of submissions a step needs before the round can leave it.
pub fn requirement(settings: &ProtocolSettings, step: RoundStep) -> u32 {
    match step {
        RoundStep::Registration => settings.min_participants.max(settings.threshold),
        RoundStep::KeySharing => settings.min_participants,
        RoundStep::Masking | RoundStep::Unmasking => settings.threshold,
    }
}

/// Checks whether a round can leave its step and returns the next step.
pub fn check_advance(
    settings: &ProtocolSettings,
    round: &ProtocolRound,
    counts: &SubmissionCounts,
) -> Result<RoundStep, CoordinatorError> {
    let next = round.step.next().ok_or(CoordinatorError::FinalStep)?;
    let have = counts.of_step(round.step);
    let need = requirement(settings, round.step);
    if have < need {
        return Err(CoordinatorError::RequirementsNotMet {
            step: round.step,
            have,
            need,
        });
    }
    Ok(next)
}

/// Checks whether every client eligible for a submission step has submitted.
pub fn all_submitted(step: RoundStep, counts: &SubmissionCounts) -> bool {
    match step {
        RoundStep::KeySharing | RoundStep::Masking => {
            let submitted = counts.of_step(step);
            submitted > 0 && submitted >= counts.eligible_for(step)
        }
        RoundStep::Registration | RoundStep::Unmasking => false,
    }
}

/// Checks whether a registration moves the active round on to key sharing.
pub fn should_auto_advance_registration(
    settings: &ProtocolSettings,
    counts: &SubmissionCounts,
) -> bool {
    settings.auto_advance
        && counts.registered >= settings.auto_advance_min
        && counts.registered >= requirement(settings, RoundStep::Registration)
}

/// Checks whether a submission moves the round on to the next step.
pub fn should_auto_advance_submission(
    settings: &ProtocolSettings,
    step: RoundStep,
    counts: &SubmissionCounts,
) -> bool {
    settings.auto_advance
        && all_submitted(step, counts)
        && counts.of_step(step) >= requirement(settings, step)
}

/// Checks that the broadcast of a step is available in a round.
pub fn check_broadcast(round: &ProtocolRound, step: RoundStep) -> Result<(), CoordinatorError> {
    if round.step >= step {
        Ok(())
    } else {
        Err(CoordinatorError::BroadcastUnavailable(step))
    }
}

/// Checks that a round accepts submissions of a step.
pub fn check_submission_step(
    round: &ProtocolRound,
    step: RoundStep,
) -> Result<(), SubmissionAddError> {
    if round.closed {
        Err(SubmissionAddError::RoundClosed)
    } else if round.step != step {
        Err(SubmissionAddError::StepMismatch)
    } else {
        Ok(())
    }
}

/// Checks a registration against the registrations of the round.
///
/// A client registers once, and no two clients may announce the same public key.
pub fn check_registration(
    registered: &[Participant],
    participant: &Participant,
) -> Result<(), SubmissionAddError> {
    if registered
        .iter()
        .any(|other| other.client_id == participant.client_id)
    {
        return Err(SubmissionAddError::AlreadySubmitted);
    }
    let keys = &participant.broadcast;
    let reused = registered.iter().any(|other| {
        let other = &other.broadcast;
        [other.cipher_public_key, other.sharing_public_key].contains(&keys.cipher_public_key)
            || [other.cipher_public_key, other.sharing_public_key]
                .contains(&keys.sharing_public_key)
    });
    if reused {
        return Err(SubmissionAddError::Malformed);
    }
    Ok(())
}

/// Checks key shares against the registrations and the key shares of the round.
///
/// The message must carry exactly one cipher for every other registered client.
pub fn check_key_shares(
    registered: &[Participant],
    submitted: &[ShareKeysMessage],
    message: &ShareKeysMessage,
) -> Result<(), SubmissionAddError> {
    if !is_registered(registered, &message.user_id) {
        return Err(SubmissionAddError::NotEligible);
    }
    if submitted
        .iter()
        .any(|other| other.user_id == message.user_id)
    {
        return Err(SubmissionAddError::AlreadySubmitted);
    }
    let mut recipients = message
        .ciphers
        .iter()
        .map(|cipher| &cipher.recipient)
        .collect::<Vec<_>>();
    recipients.sort();
    recipients.dedup();
    let well_formed = recipients.len() == message.ciphers.len()
        && recipients.len() + 1 == registered.len()
        && recipients
            .iter()
            .all(|recipient| *recipient != &message.user_id && is_registered(registered, recipient));
    if !well_formed {
        return Err(SubmissionAddError::Malformed);
    }
    Ok(())
}

/// Checks a masked input against the key shares and the masked inputs of the round.
///
/// All masked inputs of a round have the same non-zero length.
pub fn check_masked_input(
    key_shares: &[ShareKeysMessage],
    submitted: &[MaskedInput],
    input: &MaskedInput,
) -> Result<(), SubmissionAddError> {
    if !key_shares
        .iter()
        .any(|message| message.user_id == input.user_id)
    {
        return Err(SubmissionAddError::NotEligible);
    }
    if submitted.iter().any(|other| other.user_id == input.user_id) {
        return Err(SubmissionAddError::AlreadySubmitted);
    }
    let expected = submitted.first().map(|first| first.masked_input.len());
    if input.masked_input.is_empty() || expected.map_or(false, |len| len != input.masked_input.len())
    {
        return Err(SubmissionAddError::Malformed);
    }
    Ok(())
}

/// Checks unmask shares against the masked inputs and the unmask shares of the round.
///
/// Seed shares may only concern survivors and key shares only peers which did not submit a
/// masked input, so that no peer gets both its seed and its sharing key revealed.
pub fn check_unmask_shares(
    masked_inputs: &[MaskedInput],
    submitted: &[UnmaskShares],
    shares: &UnmaskShares,
) -> Result<(), SubmissionAddError> {
    let is_survivor = |client_id: &ClientId| {
        masked_inputs
            .iter()
            .any(|input| &input.user_id == client_id)
    };
    if !is_survivor(&shares.user_id) {
        return Err(SubmissionAddError::NotEligible);
    }
    if submitted.iter().any(|other| other.user_id == shares.user_id) {
        return Err(SubmissionAddError::AlreadySubmitted);
    }
    let well_formed = shares
        .seed_shares
        .iter()
        .all(|share| is_survivor(&share.peer))
        && shares
            .key_shares
            .iter()
            .all(|share| !is_survivor(&share.peer));
    if !well_formed {
        return Err(SubmissionAddError::Malformed);
    }
    Ok(())
}

fn is_registered(registered: &[Participant], client_id: &ClientId) -> bool {
    registered
        .iter()
        .any(|participant| &participant.client_id == client_id)
}
