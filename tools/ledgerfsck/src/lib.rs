//! # ledgerfsck
//!
//! Offline audit of one channel. Opens the channel's block store read-only
//! (fetching archived files on demand when the configuration enables
//! archiving) and runs the `ChainVerifier` with a signature policy built from
//! an MSP folder. Block files and the index are never repaired by an audit.
//!
//! Trusted identities are ed25519 public keys, hex encoded, one per `*.pub`
//! file in the MSP folder.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use block_storage::{
    BlockStore, ChainVerifier, SignaturePolicy, StoreConfig, VerificationFailure,
    VerificationReport,
};
use clap::Parser;
use ed25519_dalek::VerifyingKey;
use shared_types::PublicKey;
use tracing::info;

/// Verify the block chain of a channel
#[derive(Parser, Debug, Clone)]
#[command(name = "ledgerfsck")]
#[command(about = "Verify hash links and signatures of a channel's blocks")]
pub struct Args {
    /// Channel to verify
    #[arg(long)]
    pub channel: String,

    /// Folder holding the trusted `*.pub` keys
    #[arg(long)]
    pub msp_path: PathBuf,

    /// MSP id the block signatures must carry
    #[arg(long)]
    pub msp_id: String,

    /// Ledger root, overriding LEDGER_ROOT_DIR
    #[arg(long)]
    pub root_dir: Option<PathBuf>,
}

/// Result of an audit that could run.
#[derive(Debug)]
pub enum Outcome {
    Pass(VerificationReport),
    Fail(VerificationFailure),
}

/// Policy trusting every key in `msp_path` for `msp_id`.
pub fn load_policy(msp_path: &Path, msp_id: &str) -> Result<SignaturePolicy> {
    if msp_id.trim().is_empty() {
        bail!("MSP id is required");
    }
    if !msp_path.is_dir() {
        bail!("MSP folder {} does not exist", msp_path.display());
    }

    let mut keys: Vec<PublicKey> = Vec::new();
    let mut entries: Vec<PathBuf> = std::fs::read_dir(msp_path)
        .with_context(|| format!("Failed to list {}", msp_path.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "pub"))
        .collect();
    entries.sort();

    for path in entries {
        keys.push(read_public_key(&path)?);
    }
    if keys.is_empty() {
        bail!("MSP folder {} holds no trusted identities", msp_path.display());
    }

    info!(msp_id, keys = keys.len(), "[fsck] signature policy loaded");
    Ok(SignaturePolicy::new(msp_id, keys))
}

fn read_public_key(path: &Path) -> Result<PublicKey> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let bytes = hex::decode(text.trim())
        .with_context(|| format!("{} is not hex encoded", path.display()))?;
    let key: PublicKey = bytes
        .as_slice()
        .try_into()
        .with_context(|| format!("{} does not hold a 32-byte key", path.display()))?;
    VerifyingKey::from_bytes(&key)
        .with_context(|| format!("{} is not a valid ed25519 key", path.display()))?;
    Ok(key)
}

/// Audit `args.channel` with `config`, after applying `--root-dir`.
pub async fn run(args: &Args, mut config: StoreConfig) -> Result<Outcome> {
    if let Some(root) = &args.root_dir {
        config.root_dir = root.clone();
    }
    let policy = load_policy(&args.msp_path, &args.msp_id)?;

    let chain_dir = config.chain_dir(&args.channel);
    if !chain_dir.is_dir() {
        bail!(
            "no ledger for channel {} under {}",
            args.channel,
            config.root_dir.display()
        );
    }

    let store = BlockStore::open_read_only(&args.channel, config)
        .with_context(|| format!("Failed to open the ledger of channel {}", args.channel))?;

    info!(channel = %args.channel, role = ?store.role(), "[fsck] verifying");
    let outcome = match ChainVerifier::new(&store).with_policy(policy).verify().await {
        Ok(report) => Outcome::Pass(report),
        Err(failure) => Outcome::Fail(failure),
    };
    Ok(outcome)
}
