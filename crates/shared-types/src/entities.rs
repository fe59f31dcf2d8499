//! # Core Domain Entities
//!
//! The ledger block and its parts.
//!
//! ## Layout
//!
//! - **Header**: number, previous-block hash, digest of the payload
//! - **Data**: the ordered transactions
//! - **Metadata**: signatures over the header hash plus the last config index
//!
//! The canonical byte form is the bincode encoding of [`Block`]. Decoding
//! rejects bytes that do not re-encode identically, so a stored block always
//! round-trips bit for bit.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha2::{Digest, Sha256};

use crate::errors::CodecError;

/// A 32-byte SHA-256 hash.
pub type Hash = [u8; 32];

/// A 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// A 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// The all-zero hash used as the previous hash of the genesis block.
pub const ZERO_HASH: Hash = [0u8; 32];

// =============================================================================
// HEADER
// =============================================================================

/// The header of a block. Only these fields feed the header hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    /// Block number, contiguous from 0.
    pub number: u64,
    /// Header hash of the previous block (`ZERO_HASH` for block 0).
    pub previous_hash: Hash,
    /// Digest over the block payload.
    pub data_hash: Hash,
}

impl BlockHeader {
    /// Compute the header hash.
    ///
    /// `sha256(number_be || previous_hash || data_hash)`
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.number.to_be_bytes());
        hasher.update(self.previous_hash);
        hasher.update(self.data_hash);
        hasher.finalize().into()
    }
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// A transaction as recorded in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier.
    pub tx_id: String,
    /// Opaque transaction envelope.
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn new(tx_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            tx_id: tx_id.into(),
            payload: payload.into(),
        }
    }
}

/// The block payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockData {
    pub transactions: Vec<Transaction>,
}

impl BlockData {
    /// Digest over every transaction id and payload, in order.
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        for tx in &self.transactions {
            hasher.update((tx.tx_id.len() as u64).to_be_bytes());
            hasher.update(tx.tx_id.as_bytes());
            hasher.update((tx.payload.len() as u64).to_be_bytes());
            hasher.update(&tx.payload);
        }
        hasher.finalize().into()
    }
}

// =============================================================================
// METADATA
// =============================================================================

/// A signature over the block header hash by an organization member.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSignature {
    /// Identifier of the membership service provider the signer belongs to.
    pub msp_id: String,
    /// Signer's Ed25519 public key.
    pub signer: PublicKey,
    /// Signature over the header hash.
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

impl MetadataSignature {
    /// Sign `header_hash` with `key` on behalf of `msp_id`.
    pub fn sign(msp_id: impl Into<String>, key: &SigningKey, header_hash: &Hash) -> Self {
        Self {
            msp_id: msp_id.into(),
            signer: key.verifying_key().to_bytes(),
            signature: key.sign(header_hash).to_bytes(),
        }
    }

    /// Check the signature against `header_hash`.
    pub fn verify(&self, header_hash: &Hash) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.signer) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(&self.signature);
        key.verify(header_hash, &sig).is_ok()
    }
}

/// Signed block metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockMetadata {
    /// Signatures over the header hash.
    pub signatures: Vec<MetadataSignature>,
    /// Number of the most recent configuration block.
    pub last_config: u64,
}

// =============================================================================
// BLOCK
// =============================================================================

/// An atomic commit record, linked to its predecessor by `previous_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub data: BlockData,
    pub metadata: BlockMetadata,
}

impl Block {
    /// Build an unsigned block; the data hash is computed from `transactions`.
    pub fn new(number: u64, previous_hash: Hash, transactions: Vec<Transaction>) -> Self {
        let data = BlockData { transactions };
        Self {
            header: BlockHeader {
                number,
                previous_hash,
                data_hash: data.hash(),
            },
            data,
            metadata: BlockMetadata::default(),
        }
    }

    /// Block number.
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Previous-block hash claimed by this block.
    pub fn previous_hash(&self) -> Hash {
        self.header.previous_hash
    }

    /// Header hash of this block.
    pub fn header_hash(&self) -> Hash {
        self.header.hash()
    }

    /// Transaction ids in block order.
    pub fn tx_ids(&self) -> impl Iterator<Item = &str> {
        self.data.transactions.iter().map(|tx| tx.tx_id.as_str())
    }

    /// Append a metadata signature made with `key`.
    pub fn sign(&mut self, msp_id: &str, key: &SigningKey) {
        let header_hash = self.header_hash();
        self.metadata
            .signatures
            .push(MetadataSignature::sign(msp_id, key, &header_hash));
    }

    /// Serialize to the canonical byte form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode canonical bytes.
    ///
    /// Trailing bytes or any other non-canonical form is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let block: Block =
            bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        let canonical_len = bincode::serialized_size(&block)
            .map_err(|e| CodecError::Encode(e.to_string()))? as usize;
        if canonical_len != bytes.len() {
            return Err(CodecError::NonCanonical {
                decoded_len: bytes.len(),
                canonical_len,
            });
        }
        Ok(block)
    }
}
