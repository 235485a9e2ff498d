//! Shamir threshold sharing of the mask seed and of the sharing key.
//!
//! The primitive splits one 16-byte block into `n` shares, any `k` of which recover it, for up to
//! [`MAX_SHARES`] shares. Larger secrets are cut into 16-byte chunks which are shared
//! independently:
//!
//! - the 4-byte mask seed is zero-padded on the right to a single block;
//! - the serialized secret sharing key is cut into 16-byte segments, the last one zero-padded.
//!
//! Share `i` of every chunk goes to the participant at position `i - 1` of the key broadcast, so
//! a [`KeyShare`] holds one segment per chunk in chunk order.
//!
//! # Examples
//! ```
//! # use secagg_core::sharing::{combine_seed_shares, create_seed_shares};
//! let shares = create_seed_shares(0xdead_beef, 5, 3).unwrap();
//! assert_eq!(combine_seed_shares(&shares[1..4], 3).unwrap(), 0xdead_beef);
//! ```

pub(crate) mod shamir;

pub use self::shamir::MAX_SHARES;

use derive_more::{AsRef, From};
use rand::rngs::OsRng;
use thiserror::Error;

use crate::{
    crypto::{ByteObject, SecretAgreementKey},
    MaskSeed,
};

/// Length in bytes of one shared block.
pub const BLOCK_LENGTH: usize = 16;

/// Length in bytes of the mask seed.
pub const SEED_LENGTH: usize = 4;

pub(crate) type Block = [u8; BLOCK_LENGTH];

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
/// Errors related to the sharing and recombination of secrets.
pub enum SharingError {
    #[error("insufficient shares: {required} required, {actual} given")]
    InsufficientShares { required: usize, actual: usize },
    #[error("invalid threshold: {k} out of {n}")]
    InvalidThreshold { n: u32, k: u32 },
    #[error("duplicate shamir index {0}")]
    DuplicateShareIndex(u32),
    #[error("the shares are malformed or do not belong together")]
    InvalidShares,
    #[error("the shares do not reconstruct a valid secret")]
    InvalidReconstruction,
}

#[derive(AsRef, From, Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// One share of a 16-byte block.
pub struct ShareBlock(Block);

impl ByteObject for ShareBlock {
    const LENGTH: usize = BLOCK_LENGTH;


    fn as_slice(&self) -> &[u8] {
        &self.0
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        let mut block = [0; BLOCK_LENGTH];
        if bytes.len() != BLOCK_LENGTH {
            return None;
        }
        block.copy_from_slice(bytes);
        Some(Self(block))
    }
}

impl_hex_serde!(ShareBlock);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// A share of a mask seed.
pub struct SeedShare {
    /// The evaluation point of this share, `1..=n`.
    pub shamir_index: u32,
    pub seed: ShareBlock,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// A share of a secret sharing key, one segment per 16-byte chunk of the key.
pub struct KeyShare {
    /// The evaluation point of this share, `1..=n`.
    pub shamir_index: u32,
    pub segments: Vec<ShareBlock>,
}

/// Splits a mask seed into `n` shares of which any `k` recover it.
///
/// # Errors
/// Fails with [`SharingError::InvalidThreshold`] unless `1 <= k <= n <= MAX_SHARES`.
pub fn create_seed_shares(seed: MaskSeed, n: u32, k: u32) -> Result<Vec<SeedShare>, SharingError> {
    let mut block = [0_u8; BLOCK_LENGTH];
    block[..SEED_LENGTH].copy_from_slice(&seed.to_be_bytes());
    let shares = shamir::split_block(&block, n, k, &mut OsRng)?
        .into_iter()
        .zip(1..)
        .map(|(share, shamir_index)| SeedShare {
            shamir_index,
            seed: ShareBlock(share),
        })
        .collect();
    Ok(shares)
}

/// Recombines a mask seed from at least `k` of its shares.
///
/// # Errors
/// Fails with [`SharingError::InsufficientShares`] if fewer than `k` shares are given and with
/// [`SharingError::InvalidReconstruction`] if the recovered block is not a padded seed, which is
/// what shares of different seeds or corrupted shares produce.
pub fn combine_seed_shares(shares: &[SeedShare], k: u32) -> Result<MaskSeed, SharingError> {
    check_share_count(shares.len(), k)?;
    let points = shares
        .iter()
        .map(|share| (share.shamir_index, share.seed.0))
        .collect::<Vec<_>>();
    let block = shamir::combine_blocks(&points)?;

    let (seed, padding) = block.split_at(SEED_LENGTH);
    if padding.iter().any(|byte| *byte != 0) {
        return Err(SharingError::InvalidReconstruction);
    }
    let mut bytes = [0_u8; SEED_LENGTH];
    bytes.copy_from_slice(seed);
    Ok(MaskSeed::from_be_bytes(bytes))
}

/// Splits a secret sharing key into `n` shares of which any `k` recover it.
///
/// # Errors
/// Fails with [`SharingError::InvalidThreshold`] unless `1 <= k <= n <= MAX_SHARES`.
pub fn create_key_shares(
    key: &SecretAgreementKey,
    n: u32,
    k: u32,
) -> Result<Vec<KeyShare>, SharingError> {
    shamir::check_threshold(n, k)?;
    let mut shares = (1..=n)
        .map(|shamir_index| KeyShare {
            shamir_index,
            segments: Vec::new(),
        })
        .collect::<Vec<_>>();

    for chunk in key.as_slice().chunks(BLOCK_LENGTH) {
        let mut block = [0_u8; BLOCK_LENGTH];
        block[..chunk.len()].copy_from_slice(chunk);
        let chunk_shares = shamir::split_block(&block, n, k, &mut OsRng)?;
        for (share, segment) in shares.iter_mut().zip(chunk_shares) {
            share.segments.push(ShareBlock(segment));
        }
    }
    Ok(shares)
}

/// Recombines a secret sharing key from at least `k` of its shares.
///
/// # Errors
/// Fails with [`SharingError::InsufficientShares`] if fewer than `k` shares are given, which is
/// checked first, and with [`SharingError::InvalidShares`] if the shares are inconsistent or do
/// not yield a key of the expected length.
pub fn combine_key_shares(shares: &[KeyShare], k: u32) -> Result<SecretAgreementKey, SharingError> {
    check_share_count(shares.len(), k)?;
    let segment_count = shares[0].segments.len();
    if segment_count == 0
        || shares
            .iter()
            .any(|share| share.segments.len() != segment_count)
    {
        return Err(SharingError::InvalidShares);
    }

    let mut bytes = Vec::with_capacity(segment_count * BLOCK_LENGTH);
    for position in 0..segment_count {
        let points = shares
            .iter()
            .map(|share| (share.shamir_index, share.segments[position].0))
            .collect::<Vec<_>>();
        bytes.extend_from_slice(&shamir::combine_blocks(&points)?);
    }
    if bytes.len() < SecretAgreementKey::LENGTH {
        return Err(SharingError::InvalidShares);
    }
    bytes.truncate(SecretAgreementKey::LENGTH);
    SecretAgreementKey::from_slice(&bytes).ok_or(SharingError::InvalidShares)
}

fn check_share_count(actual: usize, k: u32) -> Result<(), SharingError> {
    let required = k as usize;
    if actual < required || actual == 0 {
        Err(SharingError::InsufficientShares { required, actual })
    } else {
        Ok(())
    }
}
