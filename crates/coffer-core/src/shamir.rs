//! Threshold secret-sharing codec.
//!
//! Splits a byte secret into `n` shares over GF(256) such that any `t` of
//! them reconstruct it and fewer than `t` reveal nothing. Pure algorithm, no
//! I/O. Each call to [`split`] draws fresh randomness, so repeated splits of
//! the same secret yield unrelated share sets.
//!
//! Combining is order-independent: any `t` distinct shares of one split,
//! in any order, produce the same secret. An under-threshold combination is
//! rejected up front ([`ShamirError::InvalidShareCount`]); a combination
//! polluted with a share from a *different* split produces a structurally
//! valid but wrong secret — the barrier's known-plaintext check is what
//! distinguishes that case downstream.

use sharks::{Share, Sharks};

use crate::error::ShamirError;

/// Split `secret` into `shares` parts, any `threshold` of which recover it.
///
/// # Errors
///
/// - [`ShamirError::InvalidThreshold`] if `threshold < 1` or
///   `threshold > shares`.
/// - [`ShamirError::EmptySecret`] if `secret` is empty.
pub fn split(secret: &[u8], shares: u8, threshold: u8) -> Result<Vec<Vec<u8>>, ShamirError> {
    if threshold < 1 || threshold > shares {
        return Err(ShamirError::InvalidThreshold { threshold, shares });
    }
    if secret.is_empty() {
        return Err(ShamirError::EmptySecret);
    }

    let sharks = Sharks(threshold);
    let dealer = sharks.dealer(secret);
    let out: Vec<Vec<u8>> = dealer
        .take(usize::from(shares))
        .map(|share| Vec::from(&share))
        .collect();
    Ok(out)
}

/// Recover the secret from at least `threshold` shares of one split.
///
/// # Errors
///
/// - [`ShamirError::InvalidShareCount`] if fewer than `threshold` shares are
///   supplied.
/// - [`ShamirError::Corrupt`] if a share cannot be parsed or the recovery
///   fails outright.
pub fn combine(shares: &[Vec<u8>], threshold: u8) -> Result<Vec<u8>, ShamirError> {
    if shares.len() < usize::from(threshold) {
        return Err(ShamirError::InvalidShareCount {
            got: shares.len(),
            needed: usize::from(threshold),
        });
    }

    let parsed: Result<Vec<Share>, ShamirError> = shares
        .iter()
        .map(|bytes| {
            Share::try_from(bytes.as_slice()).map_err(|e| ShamirError::Corrupt {
                reason: e.to_string(),
            })
        })
        .collect();
    let parsed = parsed?;

    let sharks = Sharks(threshold);
    sharks.recover(&parsed).map_err(|e| ShamirError::Corrupt {
        reason: e.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"a 32 byte master key 0123456789a";

    /// Every k-subset of `items` by index, small k only.
    fn subsets(items: &[Vec<u8>], k: usize) -> Vec<Vec<Vec<u8>>> {
        let n = items.len();
        let mut out = Vec::new();
        for mask in 0u32..(1 << n) {
            if mask.count_ones() as usize != k {
                continue;
            }
            let subset: Vec<Vec<u8>> = (0..n)
                .filter(|i| mask & (1 << i) != 0)
                .map(|i| items[i].clone())
                .collect();
            out.push(subset);
        }
        out
    }

    #[test]
    fn every_threshold_subset_recovers() {
        for (n, t) in [(5u8, 3u8), (3, 2), (4, 4), (7, 2)] {
            let shares = split(SECRET, n, t).unwrap();
            assert_eq!(shares.len(), usize::from(n));
            for subset in subsets(&shares, usize::from(t)) {
                assert_eq!(combine(&subset, t).unwrap(), SECRET);
            }
        }
    }

    #[test]
    fn more_than_threshold_recovers() {
        let shares = split(SECRET, 5, 3).unwrap();
        assert_eq!(combine(&shares, 3).unwrap(), SECRET);
    }

    #[test]
    fn degenerate_one_of_one() {
        let shares = split(SECRET, 1, 1).unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(combine(&shares, 1).unwrap(), SECRET);
    }

    #[test]
    fn order_independent() {
        let shares = split(SECRET, 5, 3).unwrap();
        let forward = vec![shares[0].clone(), shares[1].clone(), shares[2].clone()];
        let backward = vec![shares[2].clone(), shares[0].clone(), shares[1].clone()];
        assert_eq!(combine(&forward, 3).unwrap(), combine(&backward, 3).unwrap());
    }

    #[test]
    fn repeated_splits_are_independent() {
        let first = split(SECRET, 5, 3).unwrap();
        let second = split(SECRET, 5, 3).unwrap();
        // Same secret, fresh polynomial: share sets must differ.
        assert_ne!(first, second);
        // But each set still recovers on its own.
        assert_eq!(combine(&first[..3].to_vec(), 3).unwrap(), SECRET);
        assert_eq!(combine(&second[2..].to_vec(), 3).unwrap(), SECRET);
    }

    #[test]
    fn below_threshold_rejected() {
        let shares = split(SECRET, 5, 3).unwrap();
        let two = vec![shares[0].clone(), shares[1].clone()];
        let err = combine(&two, 3).unwrap_err();
        assert!(matches!(err, ShamirError::InvalidShareCount { got: 2, needed: 3 }));
    }

    #[test]
    fn threshold_above_shares_rejected() {
        let err = split(SECRET, 3, 4).unwrap_err();
        assert!(matches!(err, ShamirError::InvalidThreshold { .. }));
    }

    #[test]
    fn zero_threshold_rejected() {
        let err = split(SECRET, 3, 0).unwrap_err();
        assert!(matches!(err, ShamirError::InvalidThreshold { .. }));
    }

    #[test]
    fn empty_secret_rejected() {
        let err = split(b"", 3, 2).unwrap_err();
        assert!(matches!(err, ShamirError::EmptySecret));
    }

    #[test]
    fn empty_share_is_corrupt() {
        let shares = vec![Vec::new(), Vec::new()];
        let err = combine(&shares, 2).unwrap_err();
        assert!(matches!(err, ShamirError::Corrupt { .. }));
    }

    #[test]
    fn foreign_share_gives_wrong_secret_not_error() {
        let mut shares = split(SECRET, 5, 3).unwrap();
        let other = split(b"a different secret entirely!!..!", 5, 3).unwrap();
        shares[2] = other[2].clone();
        let recovered = combine(&shares[..3].to_vec(), 3).unwrap();
        // Structurally valid output; the barrier canary is what catches this.
        assert_ne!(recovered, SECRET);
    }
}
