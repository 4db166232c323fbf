//! Block body: miner, extra data, transactions and pruned accounts.

use super::{ensure_remaining, read_array};
use crate::hash::{merkle_root, Hash};
use crate::{ConsensusError, ConsensusResult};
use bytes::{Buf, BufMut};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::fmt;

pub const ADDRESS_SIZE: usize = 20;

/// Maximum length of the miner's extra data.
pub const MAX_EXTRA_DATA: usize = u8::MAX as usize;

/// Account address: the first 20 bytes of the Blake2b digest of a public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub const ZERO: Address = Address([0u8; ADDRESS_SIZE]);

    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self::from_public_key_bytes(key.as_bytes())
    }

    pub fn from_public_key_bytes(key: &[u8; 32]) -> Self {
        let digest = Hash::digest(key);
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&digest.as_bytes()[..ADDRESS_SIZE]);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Some(Self(bytes.try_into().ok()?))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

/// A value transfer signed by the sender's ed25519 key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub sender_key: [u8; 32],
    pub recipient: Address,
    pub value: u64,
    pub fee: u64,
    pub validity_start_height: u32,
    pub signature: [u8; 64],
}

impl Transaction {
    pub const SERIALIZED_SIZE: usize = 32 + ADDRESS_SIZE + 8 + 8 + 4 + 64;

    /// Build and sign a transfer.
    pub fn new_signed(
        signing_key: &SigningKey,
        recipient: Address,
        value: u64,
        fee: u64,
        validity_start_height: u32,
    ) -> Self {
        let mut tx = Self {
            sender_key: signing_key.verifying_key().to_bytes(),
            recipient,
            value,
            fee,
            validity_start_height,
            signature: [0u8; 64],
        };
        tx.signature = signing_key.sign(&tx.signing_bytes()).to_bytes();
        tx
    }

    pub fn sender(&self) -> Address {
        Address::from_public_key_bytes(&self.sender_key)
    }

    /// Encoding of every field except the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SERIALIZED_SIZE - 64);
        buf.put_slice(&self.sender_key);
        buf.put_slice(self.recipient.as_bytes());
        buf.put_u64(self.value);
        buf.put_u64(self.fee);
        buf.put_u32(self.validity_start_height);
        buf
    }

    pub fn verify_signature(&self) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.sender_key) else {
            return false;
        };
        let signature = Signature::from_bytes(&self.signature);
        key.verify(&self.signing_bytes(), &signature).is_ok()
    }

    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(Self::SERIALIZED_SIZE);
        self.encode(&mut buf);
        Hash::digest(&buf)
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&self.signing_bytes());
        buf.put_slice(&self.signature);
    }

    pub fn decode<B: Buf>(buf: &mut B) -> ConsensusResult<Self> {
        ensure_remaining(buf, Self::SERIALIZED_SIZE, "transaction")?;
        let sender_key = read_array::<32, _>(buf)?;
        let recipient = Address(read_array::<ADDRESS_SIZE, _>(buf)?);
        let value = buf.get_u64();
        let fee = buf.get_u64();
        let validity_start_height = buf.get_u32();
        let signature = read_array::<64, _>(buf)?;
        Ok(Self {
            sender_key,
            recipient,
            value,
            fee,
            validity_start_height,
            signature,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBody {
    pub miner: Address,
    pub extra_data: Vec<u8>,
    pub transactions: Vec<Transaction>,
    /// Accounts emptied by this block that the accounts state must drop.
    pub pruned_accounts: Vec<Address>,
}

impl BlockBody {
    pub fn new(miner: Address, transactions: Vec<Transaction>) -> Self {
        Self {
            miner,
            extra_data: Vec::new(),
            transactions,
            pruned_accounts: Vec::new(),
        }
    }

    pub fn hash(&self) -> Hash {
        let mut leaves: Vec<Vec<u8>> =
            Vec::with_capacity(2 + self.transactions.len() + self.pruned_accounts.len());
        leaves.push(self.miner.as_bytes().to_vec());
        leaves.push(self.extra_data.clone());
        leaves.extend(self.transactions.iter().map(|tx| tx.hash().as_bytes().to_vec()));
        leaves.extend(self.pruned_accounts.iter().map(|a| a.as_bytes().to_vec()));
        merkle_root(&leaves)
    }

    pub fn serialized_size(&self) -> usize {
        ADDRESS_SIZE
            + 1
            + self.extra_data.len()
            + 2
            + self.transactions.len() * Transaction::SERIALIZED_SIZE
            + 2
            + self.pruned_accounts.len() * ADDRESS_SIZE
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> ConsensusResult<()> {
        if self.extra_data.len() > MAX_EXTRA_DATA {
            return Err(ConsensusError::InvalidBlock(format!(
                "extra data of {} bytes, max {}",
                self.extra_data.len(),
                MAX_EXTRA_DATA
            )));
        }
        let tx_count = u16::try_from(self.transactions.len())
            .map_err(|_| ConsensusError::InvalidBlock("too many transactions".to_string()))?;
        let pruned_count = u16::try_from(self.pruned_accounts.len())
            .map_err(|_| ConsensusError::InvalidBlock("too many pruned accounts".to_string()))?;

        buf.put_slice(self.miner.as_bytes());
        buf.put_u8(self.extra_data.len() as u8);
        buf.put_slice(&self.extra_data);
        buf.put_u16(tx_count);
        for tx in &self.transactions {
            tx.encode(buf);
        }
        buf.put_u16(pruned_count);
        for address in &self.pruned_accounts {
            buf.put_slice(address.as_bytes());
        }
        Ok(())
    }

    pub fn decode<B: Buf>(buf: &mut B) -> ConsensusResult<Self> {
        let miner = Address(read_array::<ADDRESS_SIZE, _>(buf)?);

        ensure_remaining(buf, 1, "extra data length")?;
        let extra_len = buf.get_u8() as usize;
        ensure_remaining(buf, extra_len, "extra data")?;
        let mut extra_data = vec![0u8; extra_len];
        buf.copy_to_slice(&mut extra_data);

        ensure_remaining(buf, 2, "transaction count")?;
        let tx_count = buf.get_u16() as usize;
        let mut transactions = Vec::with_capacity(tx_count.min(1024));
        for _ in 0..tx_count {
            transactions.push(Transaction::decode(buf)?);
        }

        ensure_remaining(buf, 2, "pruned account count")?;
        let pruned_count = buf.get_u16() as usize;
        let mut pruned_accounts = Vec::with_capacity(pruned_count.min(1024));
        for _ in 0..pruned_count {
            pruned_accounts.push(Address(read_array::<ADDRESS_SIZE, _>(buf)?));
        }

        Ok(Self {
            miner,
            extra_data,
            transactions,
            pruned_accounts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[test]
    fn test_signed_transaction_verifies() {
        let tx = Transaction::new_signed(&key(1), Address::new([9; 20]), 100, 1, 1);
        assert!(tx.verify_signature());
        assert_eq!(tx.sender(), Address::from_public_key(&key(1).verifying_key()));
    }

    #[test]
    fn test_tampered_transaction_fails_signature() {
        let mut tx = Transaction::new_signed(&key(1), Address::new([9; 20]), 100, 1, 1);
        tx.value = 101;
        assert!(!tx.verify_signature());
    }

    #[test]
    fn test_body_encoding_matches_size_and_decodes() {
        let mut body = BlockBody::new(
            Address::new([1; 20]),
            vec![
                Transaction::new_signed(&key(1), Address::new([2; 20]), 5, 0, 1),
                Transaction::new_signed(&key(2), Address::new([3; 20]), 7, 1, 1),
            ],
        );
        body.extra_data = b"hello".to_vec();
        body.pruned_accounts = vec![Address::new([4; 20])];

        let mut buf = Vec::new();
        body.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), body.serialized_size());
        assert_eq!(BlockBody::decode(&mut buf.as_slice()).unwrap(), body);
    }

    #[test]
    fn test_body_hash_commits_to_transactions() {
        let a = BlockBody::new(Address::new([1; 20]), vec![]);
        let b = BlockBody::new(
            Address::new([1; 20]),
            vec![Transaction::new_signed(&key(1), Address::new([2; 20]), 5, 0, 1)],
        );
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_oversized_extra_data_is_rejected() {
        let mut body = BlockBody::new(Address::ZERO, vec![]);
        body.extra_data = vec![0u8; MAX_EXTRA_DATA + 1];
        assert!(body.encode(&mut Vec::new()).is_err());
    }
}
