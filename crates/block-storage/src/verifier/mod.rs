//! # Chain Verifier
//!
//! Read-only audit of a channel: walks blocks `0..height`, checks that each
//! block links to the header hash of its predecessor and that blocks after
//! genesis carry a signature accepted by the channel policy. Archived blocks
//! are read through the store's normal fetch path.

use std::collections::HashSet;

use shared_types::{Block, Hash, PublicKey};
use thiserror::Error;

use crate::domain::errors::StorageError;
use crate::ports::inbound::BlockStoreApi;

/// Trusted signers of one MSP.
#[derive(Debug, Clone)]
pub struct SignaturePolicy {
    msp_id: String,
    trusted: HashSet<PublicKey>,
}

impl SignaturePolicy {
    pub fn new(msp_id: impl Into<String>, trusted: impl IntoIterator<Item = PublicKey>) -> Self {
        Self {
            msp_id: msp_id.into(),
            trusted: trusted.into_iter().collect(),
        }
    }

    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    pub fn trusted_keys(&self) -> usize {
        self.trusted.len()
    }

    /// At least one signature by a trusted key of this MSP verifies over the header hash.
    pub fn accepts(&self, block: &Block) -> bool {
        let header_hash = block.header_hash();
        block.metadata.signatures.iter().any(|sig| {
            sig.msp_id == self.msp_id
                && self.trusted.contains(&sig.signer)
                && sig.verify(&header_hash)
        })
    }
}

/// Why verification stopped.
#[derive(Debug, Error)]
pub enum VerificationFailure {
    #[error(
        "block number [{number}]: hash comparison has failed, expected previous hash {} but block records {}",
        hex::encode(.expected),
        hex::encode(.observed)
    )]
    ChainBreak {
        number: u64,
        /// Header hash of block `number - 1`.
        expected: Hash,
        /// Previous hash recorded in block `number`.
        observed: Hash,
    },

    #[error("block number [{number}]: no valid signature from a trusted member of {msp_id}")]
    Signature { number: u64, msp_id: String },

    #[error("block number [{number}]: read failed: {source}")]
    Read {
        number: u64,
        #[source]
        source: StorageError,
    },
}

impl VerificationFailure {
    /// Block at which verification stopped.
    pub fn block_number(&self) -> u64 {
        match self {
            Self::ChainBreak { number, .. }
            | Self::Signature { number, .. }
            | Self::Read { number, .. } => *number,
        }
    }
}

/// Summary of a successful audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationReport {
    /// Blocks checked, equal to the height observed at start.
    pub verified: u64,
    /// Header hash of the last block checked.
    pub last_hash: Option<Hash>,
}

/// Auditor over any `BlockStoreApi`.
pub struct ChainVerifier<'a, S: BlockStoreApi + ?Sized> {
    store: &'a S,
    policy: Option<SignaturePolicy>,
}

impl<'a, S: BlockStoreApi + ?Sized> ChainVerifier<'a, S> {
    /// Verifier checking linkage only.
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            policy: None,
        }
    }

    /// Also require signatures accepted by `policy` on blocks after genesis.
    pub fn with_policy(mut self, policy: SignaturePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Verify blocks `0..height`, with the height taken when the audit starts.
    pub async fn verify(&self) -> Result<VerificationReport, VerificationFailure> {
        let height = self.store.blockchain_info().height;
        let mut prev_hash: Option<Hash> = None;

        for number in 0..height {
            let block = self
                .store
                .retrieve_block_by_number(number)
                .await
                .map_err(|source| VerificationFailure::Read { number, source })?;

            if let Some(expected) = prev_hash {
                if block.previous_hash() != expected {
                    return Err(VerificationFailure::ChainBreak {
                        number,
                        expected,
                        observed: block.previous_hash(),
                    });
                }
                if let Some(policy) = &self.policy {
                    if !policy.accepts(&block) {
                        return Err(VerificationFailure::Signature {
                            number,
                            msp_id: policy.msp_id().to_string(),
                        });
                    }
                }
            }

            let hash = block.header_hash();
            tracing::debug!(
                block_number = number,
                hash = %hex::encode(hash),
                previous_hash = %hex::encode(block.previous_hash()),
                "[fsck] block verified"
            );
            prev_hash = Some(hash);
        }

        Ok(VerificationReport {
            verified: height,
            last_hash: prev_hash,
        })
    }
}
