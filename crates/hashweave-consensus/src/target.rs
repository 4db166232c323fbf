//! Compact difficulty encoding and target arithmetic.
//!
//! A target is an unsigned 256-bit integer; a header hash read as a
//! big-endian integer satisfies the proof of work when it does not exceed
//! the target. Targets travel in headers as a 32-bit compact value: one
//! size byte followed by a three byte mantissa.

use crate::hash::Hash;
use num_bigint::BigUint;
use num_traits::{One, Zero};

/// Expand a compact value to a full target.
pub fn compact_to_target(compact: u32) -> BigUint {
    let exponent = (compact >> 24) as i64 - 3;
    let mantissa = BigUint::from(compact & 0x00ff_ffff);
    if exponent >= 0 {
        mantissa << (8 * exponent as u64)
    } else {
        mantissa >> (8 * (-exponent) as u64)
    }
}

/// Encode a target in compact form, keeping its three most significant bytes.
pub fn target_to_compact(target: &BigUint) -> u32 {
    let bits = target.bits();
    let mut size = bits.div_ceil(8).max(1);
    if (target >> (8 * (size - 1))) >= BigUint::from(0x80u32) {
        size += 1;
    }

    let mantissa = if size >= 3 {
        target >> (8 * (size - 3))
    } else {
        target << (8 * (3 - size))
    };
    let mantissa = mantissa
        .iter_u32_digits()
        .next()
        .unwrap_or(0)
        & 0x00ff_ffff;

    ((size as u32) << 24) | mantissa
}

/// Round a target down to the precision representable in compact form.
pub fn reduce_precision(target: &BigUint) -> BigUint {
    compact_to_target(target_to_compact(target))
}

/// `ceil(log2(target))`; zero for targets below two.
pub fn target_height(target: &BigUint) -> u32 {
    if target <= &BigUint::one() {
        return 0;
    }
    let bits = target.bits();
    let is_power_of_two = target.trailing_zeros() == Some(bits - 1);
    if is_power_of_two {
        (bits - 1) as u32
    } else {
        bits as u32
    }
}

/// A hash read as a big-endian integer.
pub fn hash_to_target(hash: &Hash) -> BigUint {
    BigUint::from_bytes_be(hash.as_bytes())
}

/// Whether `hash` meets `target`.
pub fn is_proof_of_work(hash: &Hash, target: &BigUint) -> bool {
    &hash_to_target(hash) <= target
}

/// `2^exp` as a target.
pub fn pow2(exp: u32) -> BigUint {
    BigUint::one() << exp
}

/// Integer difficulty `max / target`, zero for a zero target.
pub fn difficulty_for(max_target: &BigUint, target: &BigUint) -> BigUint {
    if target.is_zero() {
        return BigUint::zero();
    }
    max_target / target
}
