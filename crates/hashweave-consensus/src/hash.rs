//! Blake2b-256 digests and merkle roots.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use std::fmt;

type Blake2b256 = Blake2b<U32>;

/// Size of a digest in bytes.
pub const HASH_SIZE: usize = 32;

/// A 32-byte Blake2b-256 digest.
///
/// Ordering is lexicographic over the bytes, which equals numeric ordering
/// of the digest read as a big-endian integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; HASH_SIZE]);

    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Digest arbitrary bytes.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Blake2b256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Parse from a slice; `None` unless it is exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; HASH_SIZE] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_SIZE]
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; HASH_SIZE]> for Hash {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..16])
    }
}

/// Merkle root over the digests of `leaves`.
///
/// The leaf list is split in half (left half rounded up) and the two
/// subtree roots are hashed together; a single leaf is its own digest and
/// an empty list hashes the empty string.
pub fn merkle_root<T: AsRef<[u8]>>(leaves: &[T]) -> Hash {
    match leaves.len() {
        0 => Hash::digest(&[]),
        1 => Hash::digest(leaves[0].as_ref()),
        n => {
            let mid = (n + 1) / 2;
            let left = merkle_root(&leaves[..mid]);
            let right = merkle_root(&leaves[mid..]);
            let mut concat = [0u8; HASH_SIZE * 2];
            concat[..HASH_SIZE].copy_from_slice(left.as_bytes());
            concat[HASH_SIZE..].copy_from_slice(right.as_bytes());
            Hash::digest(&concat)
        }
    }
}
