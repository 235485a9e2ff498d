//! Mask expansion from seeds.
//!
//! See the [mask module] documentation since this is a private module anyways.
//!
//! [mask module]: crate::mask

use std::{convert::TryInto, iter};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::{
    crypto::{derive_shared_key, AgreementError, PublicAgreementKey, SecretAgreementKey},
    sharing::SEED_LENGTH,
    MaskSeed,
};

/// Generates a fresh random mask seed.
pub fn generate_seed() -> MaskSeed {
    rand::rngs::OsRng.gen()
}

/// Expands a seed into `len` uniform draws from `[0, 1)`.
///
/// The seed is written big-endian into the first bytes of the `ChaCha20` key, so the same seed
/// always expands into a bit-identical vector.
pub fn expand_seed(seed: MaskSeed, len: usize) -> Vec<f64> {
    let mut key = [0_u8; 32];
    key[..SEED_LENGTH].copy_from_slice(&seed.to_be_bytes());
    let mut prng = ChaCha20Rng::from_seed(key);
    iter::repeat_with(|| prng.gen::<f64>()).take(len).collect()
}

/// Derives the seed of the pairwise mask between two sharing keys.
pub fn shared_seed(
    secret: &SecretAgreementKey,
    peer: &PublicAgreementKey,
) -> Result<MaskSeed, AgreementError> {
    let bytes = derive_shared_key(secret, peer, SEED_LENGTH)?;
    // safe unwrap: the derived length is guaranteed by the constant
    let bytes: [u8; SEED_LENGTH] = bytes.as_slice().try_into().unwrap();
    Ok(MaskSeed::from_be_bytes(bytes))
}

/// Expands the pairwise mask between two sharing keys.
///
/// Both ends of a pair derive the same vector: `shared_mask(a, B) == shared_mask(b, A)`.
pub fn shared_mask(
    secret: &SecretAgreementKey,
    peer: &PublicAgreementKey,
    len: usize,
) -> Result<Vec<f64>, AgreementError> {
    shared_seed(secret, peer).map(|seed| expand_seed(seed, len))
}
