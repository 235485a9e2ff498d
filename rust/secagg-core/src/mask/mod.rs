//! Masking and unmasking of input vectors.
//!
//! A client's mask is the sum of
//! - its private mask, the expansion of its random seed, and
//! - one signed pairwise mask per peer, the expansion of the key agreement between the two
//!   sharing keys. The sign is `+` if the peer precedes the client in the key broadcast and `-`
//!   if it follows, hence the pairwise parts of any group of peers sum up to zero.
//!
//! The aggregator removes the private masks of all clients that submitted an input after their
//! seeds are recombined. For a peer which dropped out after key sharing, the pairwise parts the
//! survivors still carry are cancelled by adding the peer's own pairwise mask over the survivors,
//! which the aggregator computes from the recombined sharing key.
//!
//! Masks are plain `f64` vectors. Cancellation is exact up to floating point rounding because both
//! sides regenerate bit-identical vectors from the same seeds.

pub(crate) mod seed;

use thiserror::Error;

pub use self::seed::{expand_seed, generate_seed, shared_mask, shared_seed};
use crate::{
    crypto::{AgreementError, SecretAgreementKey},
    message::Participant,
    ClientId,
    MaskSeed,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Errors related to masking.
pub enum MaskError {
    #[error("{0} is not among the participants")]
    NotAParticipant(ClientId),
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("key agreement failed: {0}")]
    Agreement(#[from] AgreementError),
}

/// Computes the signed sum of the pairwise masks of `user` with every other participant.
///
/// The participants must be given in key broadcast order and include `user`.
///
/// # Errors
/// Fails if `user` is not a participant or a key agreement fails.
pub fn pairwise_mask(
    user: &ClientId,
    sharing_key: &SecretAgreementKey,
    participants: &[Participant],
    len: usize,
) -> Result<Vec<f64>, MaskError> {
    let position = participants
        .iter()
        .position(|participant| &participant.client_id == user)
        .ok_or_else(|| MaskError::NotAParticipant(user.clone()))?;

    let mut mask = vec![0_f64; len];
    for (index, peer) in participants.iter().enumerate() {
        if index == position {
            continue;
        }
        let shared = shared_mask(sharing_key, &peer.broadcast.sharing_public_key, len)?;
        if index < position {
            add_assign(&mut mask, &shared)?;
        } else {
            sub_assign(&mut mask, &shared)?;
        }
    }
    Ok(mask)
}

/// Computes the full mask of `user`: its private mask plus its signed pairwise masks.
///
/// # Errors
/// Fails if `user` is not a participant or a key agreement fails.
pub fn create_mask(
    user: &ClientId,
    sharing_key: &SecretAgreementKey,
    participants: &[Participant],
    seed: MaskSeed,
    len: usize,
) -> Result<Vec<f64>, MaskError> {
    let mut mask = pairwise_mask(user, sharing_key, participants, len)?;
    add_assign(&mut mask, &expand_seed(seed, len))?;
    Ok(mask)
}

/// Adds `other` onto `values` element-wise.
pub fn add_assign(values: &mut [f64], other: &[f64]) -> Result<(), MaskError> {
    check_length(values.len(), other.len())?;
    values.iter_mut().zip(other).for_each(|(v, o)| *v += o);
    Ok(())
}

/// Subtracts `other` from `values` element-wise.
pub fn sub_assign(values: &mut [f64], other: &[f64]) -> Result<(), MaskError> {
    check_length(values.len(), other.len())?;
    values.iter_mut().zip(other).for_each(|(v, o)| *v -= o);
    Ok(())
}

/// Masks an input vector.
pub fn apply_mask(input: &[f64], mask: &[f64]) -> Result<Vec<f64>, MaskError> {
    let mut masked = input.to_vec();
    add_assign(&mut masked, mask)?;
    Ok(masked)
}

fn check_length(expected: usize, actual: usize) -> Result<(), MaskError> {
    if expected == actual {
        Ok(())
    } else {
        Err(MaskError::LengthMismatch { expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::AgreementKeyPair,
        keys::ClientKeys,
        testutils::{assert_close, client_ids, key_broadcast},
    };

    fn group(size: usize) -> (Vec<ClientKeys>, Vec<Participant>) {
        let (keys, broadcast) = key_broadcast(1, 1, &client_ids(size));
        (keys, broadcast.participants)
    }

    fn sum(vectors: &[Vec<f64>]) -> Vec<f64> {
        let mut total = vec![0_f64; vectors[0].len()];
        for vector in vectors {
            add_assign(&mut total, vector).unwrap();
        }
        total
    }

    #[test]
    fn test_pairwise_masks_cancel() {
        let (keys, participants) = group(4);
        let masks = participants
            .iter()
            .zip(&keys)
            .map(|(participant, keys)| {
                pairwise_mask(
                    &participant.client_id,
                    &keys.sharing.secret,
                    &participants,
                    200,
                )
                .unwrap()
            })
            .collect::<Vec<_>>();
        assert!(masks[0].iter().any(|x| x.abs() > 1e-3));
        assert_close(&sum(&masks), &[0_f64; 200], 1e-9);
    }

    #[test]
    fn test_masked_inputs_sum_to_inputs_plus_private_masks() {
        let (keys, participants) = group(3);
        let seeds = [1_u32, 2, 3];
        let inputs = vec![vec![0.5_f64; 20], vec![1.5; 20], vec![-1.0; 20]];
        let masked = participants
            .iter()
            .zip(&keys)
            .zip(seeds.iter().zip(&inputs))
            .map(|((participant, keys), (seed, input))| {
                let mask = create_mask(
                    &participant.client_id,
                    &keys.sharing.secret,
                    &participants,
                    *seed,
                    20,
                )
                .unwrap();
                apply_mask(input, &mask).unwrap()
            })
            .collect::<Vec<_>>();

        let mut total = sum(&masked);
        for seed in &seeds {
            sub_assign(&mut total, &expand_seed(*seed, 20)).unwrap();
        }
        assert_close(&total, &[1_f64; 20], 1e-9);
    }

    #[test]
    fn test_signs_follow_broadcast_order() {
        let (keys, participants) = group(2);
        let user = &participants[0].client_id;
        let first = pairwise_mask(user, &keys[0].sharing.secret, &participants, 10).unwrap();
        let mut reversed = participants.clone();
        reversed.reverse();
        let flipped = pairwise_mask(user, &keys[0].sharing.secret, &reversed, 10).unwrap();
        // the first participant subtracts the mask it shares with the second one
        assert!(first.iter().all(|x| *x <= 0.0));
        assert!(first.iter().zip(&flipped).all(|(a, b)| (a + b).abs() < 1e-12));
    }

    #[test]
    fn test_unknown_user() {
        let (_, participants) = group(2);
        let stranger = AgreementKeyPair::generate();
        assert_eq!(
            create_mask(&"stranger".into(), &stranger.secret, &participants, 1, 10),
            Err(MaskError::NotAParticipant("stranger".into()))
        );
    }

    #[test]
    fn test_length_mismatch() {
        assert_eq!(
            apply_mask(&[1.0, 2.0], &[1.0]),
            Err(MaskError::LengthMismatch {
                expected: 2,
                actual: 1
            })
        );
    }
}
