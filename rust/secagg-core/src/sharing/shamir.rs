//! Shamir `(k, n)` threshold sharing of a single 16-byte block.
//!
//! Every byte of the block is shared on its own polynomial over `GF(2^8)`, so a share of a block
//! is again 16 bytes and the share index must fit into a field element. This caps the number of
//! shares at [`MAX_SHARES`].
//!
//! See the [sharing module] documentation since this is a private module anyways.
//!
//! [sharing module]: crate::sharing

use std::{collections::HashSet, convert::TryFrom};

use gf256::gf256;
use rand::{CryptoRng, Rng};

use super::{Block, SharingError, BLOCK_LENGTH};

/// The maximal number of shares of a block.
pub const MAX_SHARES: u32 = 255;

/// Validates the sharing parameters.
pub(crate) fn check_threshold(n: u32, k: u32) -> Result<(), SharingError> {
    if k == 0 || k > n || n > MAX_SHARES {
        Err(SharingError::InvalidThreshold { n, k })
    } else {
        Ok(())
    }
}

/// Splits a block into `n` shares of which any `k` recover it.
///
/// Byte `b` of the block is the constant term of a random polynomial of degree `k - 1`; byte `b`
/// of share `i` (for `i` in `1..=n`) is its evaluation at `x = i`. Share `i` is returned at
/// position `i - 1`.
pub(crate) fn split_block<R>(
    secret: &Block,
    n: u32,
    k: u32,
    rng: &mut R,
) -> Result<Vec<Block>, SharingError>
where
    R: Rng + CryptoRng,
{
    check_threshold(n, k)?;
    let polynomials = secret
        .iter()
        .map(|byte| {
            let mut coefficients = Vec::with_capacity(k as usize);
            coefficients.push(gf256::new(*byte));
            coefficients.extend((1..k).map(|_| gf256::new(rng.gen())));
            coefficients
        })
        .collect::<Vec<_>>();

    let shares = (1..=n)
        .map(|index| {
            // safe cast: the threshold check bounds n
            let x = gf256::new(index as u8);
            let mut share = [0_u8; BLOCK_LENGTH];
            for (byte, coefficients) in share.iter_mut().zip(&polynomials) {
                // horner evaluation from the highest coefficient down
                let y = coefficients
                    .iter()
                    .rev()
                    .fold(gf256::new(0), |acc, coefficient| acc * x + *coefficient);
                *byte = u8::from(y);
            }
            share
        })
        .collect();
    Ok(shares)
}

/// Recovers the block from shares given as `(index, share)` points.
///
/// Interpolates the polynomials through all points at `x = 0`. The caller is responsible for
/// passing at least the threshold number of points.
pub(crate) fn combine_blocks(points: &[(u32, Block)]) -> Result<Block, SharingError> {
    if points.is_empty() {
        return Err(SharingError::InvalidShares);
    }
    let mut seen = HashSet::with_capacity(points.len());
    let mut xs = Vec::with_capacity(points.len());
    for (index, _) in points {
        if !seen.insert(*index) {
            return Err(SharingError::DuplicateShareIndex(*index));
        }
        match u8::try_from(*index) {
            Ok(x) if x != 0 => xs.push(gf256::new(x)),
            _ => return Err(SharingError::InvalidShares),
        }
    }

    // lagrange basis at zero: prod xj / (xj - xi), the indices are distinct and non-zero
    let basis = xs
        .iter()
        .enumerate()
        .map(|(i, xi)| {
            let (numerator, denominator) = xs
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .fold((gf256::new(1), gf256::new(1)), |(num, den), (_, xj)| {
                    (num * *xj, den * (*xj - *xi))
                });
            numerator / denominator
        })
        .collect::<Vec<_>>();

    let mut secret = [0_u8; BLOCK_LENGTH];
    for (position, byte) in secret.iter_mut().enumerate() {
        let y = points
            .iter()
            .zip(&basis)
            .fold(gf256::new(0), |acc, ((_, share), basis)| {
                acc + gf256::new(share[position]) * *basis
            });
        *byte = u8::from(y);
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use rand::{rngs::OsRng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn points(shares: &[Block], indices: &[u32]) -> Vec<(u32, Block)> {
        indices
            .iter()
            .map(|index| (*index, shares[*index as usize - 1]))
            .collect()
    }

    #[test]
    fn test_any_k_shares_recover() {
        let secret = *b"sixteen byte key";
        let shares = split_block(&secret, 5, 3, &mut OsRng).unwrap();
        assert_eq!(shares.len(), 5);
        for subset in &[[1, 2, 3], [1, 3, 5], [2, 4, 5], [5, 4, 1], [3, 4, 5]] {
            assert_eq!(combine_blocks(&points(&shares, subset)).unwrap(), secret);
        }
        // more than k points lie on the same polynomial
        assert_eq!(
            combine_blocks(&points(&shares, &[1, 2, 3, 4, 5])).unwrap(),
            secret
        );
    }

    #[test]
    fn test_fewer_than_k_shares_do_not_recover() {
        let secret = *b"sixteen byte key";
        let mut rng = ChaCha20Rng::from_seed([9; 32]);
        let shares = split_block(&secret, 5, 3, &mut rng).unwrap();
        for subset in &[[1, 2], [3, 5], [4, 2]] {
            assert_ne!(combine_blocks(&points(&shares, subset)).unwrap(), secret);
        }
    }

    #[test]
    fn test_threshold_one_shares_are_the_secret() {
        let secret = [42_u8; 16];
        let shares = split_block(&secret, 3, 1, &mut OsRng).unwrap();
        assert!(shares.iter().all(|share| *share == secret));
    }

    #[test]
    fn test_maximal_number_of_shares() {
        let secret = *b"sixteen byte key";
        let shares = split_block(&secret, MAX_SHARES, 2, &mut OsRng).unwrap();
        assert_eq!(combine_blocks(&points(&shares, &[1, 255])).unwrap(), secret);
    }

    #[test]
    fn test_invalid_threshold() {
        let secret = [0_u8; 16];
        assert_eq!(
            split_block(&secret, 2, 3, &mut OsRng),
            Err(SharingError::InvalidThreshold { n: 2, k: 3 })
        );
        assert_eq!(
            split_block(&secret, 2, 0, &mut OsRng),
            Err(SharingError::InvalidThreshold { n: 2, k: 0 })
        );
        assert_eq!(
            split_block(&secret, 256, 2, &mut OsRng),
            Err(SharingError::InvalidThreshold { n: 256, k: 2 })
        );
    }

    #[test]
    fn test_malformed_points() {
        let share = [1_u8; 16];
        assert_eq!(combine_blocks(&[]), Err(SharingError::InvalidShares));
        assert_eq!(
            combine_blocks(&[(0, share), (1, share)]),
            Err(SharingError::InvalidShares)
        );
        assert_eq!(
            combine_blocks(&[(256, share), (1, share)]),
            Err(SharingError::InvalidShares)
        );
        assert_eq!(
            combine_blocks(&[(2, share), (2, share)]),
            Err(SharingError::DuplicateShareIndex(2))
        );
    }
}
