//! Server broadcasts and the final unmasking.
//!
//! The unmasking sums up all masked inputs and then corrects the sum:
//! - for every survivor, its seed is recombined from the revealed seed shares and its private
//!   mask is subtracted;
//! - for every peer which shared its keys but never submitted a masked input, its sharing key is
//!   recombined from the revealed key shares and its own pairwise mask over the survivors is
//!   added, which cancels the pairwise parts the survivors still carry.
//!
//! The masks are regenerated in parallel and applied in a fixed order.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use thiserror::Error;

use secagg_core::{
    crypto::SecretAgreementKey,
    mask::{self, MaskError},
    message::{
        AddressedCipher,
        AggregatedParameters,
        MaskedInput,
        Participant,
        ServerCipherBroadcast,
        ServerKeyBroadcast,
        ServerUnmaskBroadcast,
        ShareKeysMessage,
        UnmaskShares,
    },
    sharing::{self, KeyShare, SeedShare, SharingError},
    ClientId,
    ProtocolId,
    RoundId,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Errors related to the unmasking of the aggregate.
pub enum AggregationError {
    #[error("no masked inputs to aggregate")]
    NoInputs,
    #[error("masked input of {user} has length {actual}, expected {expected}")]
    InputSizeMismatch {
        user: ClientId,
        expected: usize,
        actual: usize,
    },
    #[error("{0} is not a participant of the round")]
    UnknownParticipant(ClientId),
    #[error("not enough shares to unmask {peer}: {required} required, {actual} given")]
    InsufficientShares {
        peer: ClientId,
        required: usize,
        actual: usize,
    },
    #[error("the shares of {peer} can't be recombined: {source}")]
    Sharing { peer: ClientId, source: SharingError },
    #[error("the sharing key recombined for {0} doesn't match its broadcast")]
    ReconstructedKeyMismatch(ClientId),
    #[error("mask regeneration failed: {0}")]
    Mask(#[from] MaskError),
}

/// Builds the key broadcast from the registrations of a round.
pub fn broadcast_keys(
    protocol_id: ProtocolId,
    round_id: RoundId,
    participants: Vec<Participant>,
) -> ServerKeyBroadcast {
    ServerKeyBroadcast {
        protocol_id,
        round_id,
        participants,
    }
}

/// Collects the ciphers addressed to `user_id`, ignoring the user's own message.
pub fn broadcast_cyphers(
    share_messages: &[ShareKeysMessage],
    user_id: &ClientId,
) -> ServerCipherBroadcast {
    let ciphers = share_messages
        .iter()
        .filter(|message| &message.user_id != user_id)
        .flat_map(|message| {
            message
                .ciphers
                .iter()
                .filter(|cipher| &cipher.recipient == user_id)
                .map(move |cipher| AddressedCipher {
                    sender: message.user_id.clone(),
                    cipher: cipher.cipher.clone(),
                })
        })
        .collect();
    ServerCipherBroadcast {
        recipient: user_id.clone(),
        ciphers,
    }
}

/// Announces the clients which submitted a masked input.
pub fn broadcast_unmask_participants(masked_inputs: &[MaskedInput]) -> ServerUnmaskBroadcast {
    ServerUnmaskBroadcast {
        participants: masked_inputs
            .iter()
            .map(|input| input.user_id.clone())
            .collect(),
    }
}

/// A correction to apply to the sum of the masked inputs.
enum Correction {
    Subtract(Vec<f64>),
    Add(Vec<f64>),
}

enum Task<'a> {
    Survivor(&'a ClientId, Vec<SeedShare>),
    Dropout(&'a Participant, Vec<KeyShare>),
}

/// Sums up the masked inputs and removes all masks from the sum.
///
/// Survivor seeds need `threshold` shares. The sharing key of a dropped peer needs `n - 1`
/// shares, where `n` is the number of registered participants. Only survivors reveal key shares,
/// so once a registered client skipped key sharing and another one dropped out afterwards, the
/// dropped key can't be recombined and the round can't be unmasked.
///
/// # Errors
/// Fails if there are no inputs, if the inputs differ in length, if an input or a share concerns
/// an unknown client, if not enough shares were revealed or if they don't recombine.
pub fn aggregate_masked_inputs(
    key_broadcast: &ServerKeyBroadcast,
    masked_inputs: &[MaskedInput],
    unmask_shares: &[UnmaskShares],
    threshold: u32,
) -> Result<AggregatedParameters, AggregationError> {
    let first = masked_inputs.first().ok_or(AggregationError::NoInputs)?;
    let len = first.masked_input.len();
    for input in masked_inputs {
        if key_broadcast.participant(&input.user_id).is_none() {
            return Err(AggregationError::UnknownParticipant(input.user_id.clone()));
        }
        if input.masked_input.len() != len {
            return Err(AggregationError::InputSizeMismatch {
                user: input.user_id.clone(),
                expected: len,
                actual: input.masked_input.len(),
            });
        }
    }

    let survivors = masked_inputs
        .iter()
        .map(|input| &input.user_id)
        .collect::<HashSet<_>>();
    let mut seed_shares = HashMap::<&ClientId, Vec<SeedShare>>::new();
    let mut key_shares = HashMap::<&ClientId, Vec<KeyShare>>::new();
    for shares in unmask_shares {
        for share in &shares.seed_shares {
            seed_shares
                .entry(&share.peer)
                .or_default()
                .push(share.share.clone());
        }
        for share in &shares.key_shares {
            key_shares
                .entry(&share.peer)
                .or_default()
                .push(share.share.clone());
        }
    }
    if let Some(peer) = key_shares
        .keys()
        .find(|peer| key_broadcast.participant(peer).is_none())
    {
        return Err(AggregationError::UnknownParticipant((*peer).clone()));
    }

    let mut tasks = masked_inputs
        .iter()
        .map(|input| {
            let shares = seed_shares.remove(&input.user_id).unwrap_or_default();
            Task::Survivor(&input.user_id, shares)
        })
        .collect::<Vec<_>>();
    // dropouts in broadcast order, survivors never reveal key shares of each other
    for participant in &key_broadcast.participants {
        if survivors.contains(&participant.client_id) {
            continue;
        }
        if let Some(shares) = key_shares.remove(&participant.client_id) {
            tasks.push(Task::Dropout(participant, shares));
        }
    }
    debug!(
        "unmasking {} survivors and {} dropouts",
        survivors.len(),
        tasks.len() - survivors.len()
    );

    let dropout_threshold = key_broadcast.len().saturating_sub(1) as u32;
    let corrections = tasks
        .into_par_iter()
        .map(|task| match task {
            Task::Survivor(user, shares) => {
                let seed = sharing::combine_seed_shares(&shares, threshold)
                    .map_err(|err| sharing_error(user, err))?;
                Ok(Correction::Subtract(mask::expand_seed(seed, len)))
            }
            Task::Dropout(participant, shares) => {
                let key = recombine_sharing_key(participant, &shares, dropout_threshold)?;
                let peers = key_broadcast.restricted_to(
                    survivors
                        .iter()
                        .copied()
                        .chain(std::iter::once(&participant.client_id)),
                );
                let phantom = mask::pairwise_mask(&participant.client_id, &key, &peers, len)?;
                Ok(Correction::Add(phantom))
            }
        })
        .collect::<Result<Vec<_>, AggregationError>>()?;

    let mut params = vec![0_f64; len];
    for input in masked_inputs {
        mask::add_assign(&mut params, &input.masked_input)?;
    }
    for correction in &corrections {
        match correction {
            Correction::Subtract(private) => mask::sub_assign(&mut params, private)?,
            Correction::Add(phantom) => mask::add_assign(&mut params, phantom)?,
        }
    }
    Ok(AggregatedParameters { params })
}

fn recombine_sharing_key(
    participant: &Participant,
    shares: &[KeyShare],
    threshold: u32,
) -> Result<SecretAgreementKey, AggregationError> {
    let key = sharing::combine_key_shares(shares, threshold)
        .map_err(|err| sharing_error(&participant.client_id, err))?;
    if key.public_key() != participant.broadcast.sharing_public_key {
        warn!(
            "recombined sharing key of {} doesn't match its broadcast",
            participant.client_id
        );
        return Err(AggregationError::ReconstructedKeyMismatch(
            participant.client_id.clone(),
        ));
    }
    Ok(key)
}

fn sharing_error(peer: &ClientId, err: SharingError) -> AggregationError {
    match err {
        SharingError::InsufficientShares { required, actual } => {
            AggregationError::InsufficientShares {
                peer: peer.clone(),
                required,
                actual,
            }
        }
        source => AggregationError::Sharing {
            peer: peer.clone(),
            source,
        },
    }
}
