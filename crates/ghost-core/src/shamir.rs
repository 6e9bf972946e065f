//! Shamir secret sharing over GF(2⁸)
//!
//! Every byte of the secret is the constant term of its own random polynomial
//! of degree `threshold - 1`. Share `x` holds the evaluations of all those
//! polynomials at `x`, so a share is exactly as long as the secret.
//! Reconstruction is Lagrange interpolation at zero. All arithmetic, including
//! the basis denominators, stays inside the field: integer arithmetic modulo
//! 256 is not a field and breaks threshold secrecy for degree > 1.

use rand::{rngs::OsRng, CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};
use crate::field;
use crate::types::{fingerprint, Secret};
use crate::{THRESHOLD, TOTAL_SHARES};

/// A single share: the x-coordinate and one evaluation per secret byte
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    index: u8,
    data: Vec<u8>,
}

impl Share {
    /// Create a share, rejecting index 0 (which would be the secret itself)
    pub fn new(index: u8, data: Vec<u8>) -> Result<Self> {
        if index == 0 {
            return Err(Error::InvalidShareIndex(index));
        }
        Ok(Self { index, data })
    }

    /// The x-coordinate of this share (1-based)
    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Truncated digest of the share bytes
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.data)
    }
}

impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Share")
            .field("index", &self.index)
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

/// Threshold parameters for a sharing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharingScheme {
    threshold: u8,
    total: u8,
}

impl SharingScheme {
    /// The vault policy: any 2 of 3 shares
    pub const TWO_OF_THREE: Self = Self {
        threshold: THRESHOLD,
        total: TOTAL_SHARES,
    };

    /// Validate threshold parameters
    ///
    /// A threshold of 1 would hand out the secret verbatim, so at least two
    /// shares are always required.
    pub fn new(threshold: u8, total: u8) -> Result<Self> {
        if threshold < 2 || threshold > total {
            return Err(Error::InvalidParameters { threshold, total });
        }
        Ok(Self { threshold, total })
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn total(&self) -> u8 {
        self.total
    }

    /// Split a secret using the operating system RNG
    pub fn split(&self, secret: &[u8]) -> Vec<Share> {
        self.split_with_rng(secret, &mut OsRng)
    }

    /// Split a secret with a caller-supplied CSPRNG
    pub fn split_with_rng<R: RngCore + CryptoRng>(&self, secret: &[u8], rng: &mut R) -> Vec<Share> {
        let mut shares: Vec<Share> = (1..=self.total)
            .map(|index| Share {
                index,
                data: vec![0u8; secret.len()],
            })
            .collect();

        let mut polynomial = Zeroizing::new(vec![0u8; self.threshold as usize]);
        for (position, &secret_byte) in secret.iter().enumerate() {
            polynomial[0] = secret_byte;
            rng.fill_bytes(&mut polynomial[1..]);

            for share in shares.iter_mut() {
                share.data[position] = field::evaluate(&polynomial, share.index);
            }
        }

        shares
    }

    /// Reconstruct the secret from the first `threshold` shares
    ///
    /// Fails fast on too few shares, mismatched lengths, or repeated indices;
    /// it never returns a partial or approximate secret.
    pub fn reconstruct(&self, shares: &[Share]) -> Result<Secret> {
        let required = self.threshold as usize;
        if shares.len() < required {
            return Err(Error::InsufficientShares {
                required,
                provided: shares.len(),
            });
        }

        let selected = &shares[..required];
        let expected = selected[0].data.len();
        for share in selected {
            if share.index == 0 {
                return Err(Error::InvalidShareIndex(share.index));
            }
            if share.data.len() != expected {
                return Err(Error::ShareLengthMismatch {
                    expected,
                    found: share.data.len(),
                });
            }
        }

        let mut secret = vec![0u8; expected];
        for (i, share_i) in selected.iter().enumerate() {
            let mut basis = 1u8;
            for (j, share_j) in selected.iter().enumerate() {
                if i == j {
                    continue;
                }
                let denominator = field::sub(share_j.index, share_i.index);
                if denominator == 0 {
                    secret.zeroize();
                    return Err(Error::DuplicateShareIndex(share_i.index));
                }
                basis = field::multiply(
                    basis,
                    field::multiply(share_j.index, field::inverse(denominator)),
                );
            }

            for (out, &y) in secret.iter_mut().zip(share_i.data.iter()) {
                *out = field::add(*out, field::multiply(basis, y));
            }
        }

        Ok(Secret::new(secret))
    }
}

/// Split with the fixed 2-of-3 vault policy
pub fn split(secret: &[u8]) -> Vec<Share> {
    SharingScheme::TWO_OF_THREE.split(secret)
}

/// Reconstruct with the fixed 2-of-3 vault policy
pub fn reconstruct(shares: &[Share]) -> Result<Secret> {
    SharingScheme::TWO_OF_THREE.reconstruct(shares)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_produces_three_shares() {
        let secret = [0x42u8; 32];
        let shares = split(&secret);

        assert_eq!(shares.len(), 3);
        let indices: Vec<u8> = shares.iter().map(Share::index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(shares.iter().all(|s| s.len() == secret.len()));
    }

    #[test]
    fn test_every_pair_reconstructs() {
        let secret = Secret::random(32);
        let shares = split(secret.as_bytes());

        for (a, b) in [(0, 1), (0, 2), (1, 2), (1, 0), (2, 0), (2, 1)] {
            let pair = [shares[a].clone(), shares[b].clone()];
            assert_eq!(reconstruct(&pair).unwrap(), secret);
        }
    }

    #[test]
    fn test_single_share_is_rejected() {
        let shares = split(b"one share is never enough");
        let result = reconstruct(&shares[..1]);
        assert_eq!(
            result,
            Err(Error::InsufficientShares {
                required: 2,
                provided: 1
            })
        );
        assert!(reconstruct(&[]).is_err());
    }

    #[test]
    fn test_duplicate_index_is_rejected() {
        let shares = split(b"duplicate");
        let pair = [shares[0].clone(), shares[0].clone()];
        assert_eq!(reconstruct(&pair), Err(Error::DuplicateShareIndex(1)));
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let shares = split(b"length");
        let short = Share::new(2, shares[1].data()[..3].to_vec()).unwrap();
        let result = reconstruct(&[shares[0].clone(), short]);
        assert!(matches!(result, Err(Error::ShareLengthMismatch { .. })));
    }

    #[test]
    fn test_zero_index_share_is_rejected() {
        assert_eq!(Share::new(0, vec![1, 2, 3]), Err(Error::InvalidShareIndex(0)));
    }

    #[test]
    fn test_higher_threshold_uses_field_arithmetic() {
        // Degree-2 polynomials exercise the x² terms that integer arithmetic gets wrong
        let scheme = SharingScheme::new(3, 5).unwrap();
        let secret = Secret::random(48);
        let shares = scheme.split(secret.as_bytes());

        let subset = [shares[4].clone(), shares[1].clone(), shares[3].clone()];
        assert_eq!(scheme.reconstruct(&subset).unwrap(), secret);

        let too_few = [shares[0].clone(), shares[2].clone()];
        assert!(scheme.reconstruct(&too_few).is_err());
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(SharingScheme::new(1, 3).is_err());
        assert!(SharingScheme::new(4, 3).is_err());
        assert!(SharingScheme::new(0, 0).is_err());
        assert_eq!(SharingScheme::new(2, 3).unwrap(), SharingScheme::TWO_OF_THREE);
    }

    #[test]
    fn test_share_debug_hides_data() {
        let shares = split(&[0xEE; 4]);
        let debug = format!("{:?}", shares[0]);
        assert!(debug.contains("index: 1"));
        assert!(!debug.contains("data"));
    }

    #[test]
    fn test_empty_secret_round_trips() {
        let shares = split(&[]);
        assert!(shares.iter().all(Share::is_empty));
        assert!(reconstruct(&shares[1..]).unwrap().is_empty());
    }
}
