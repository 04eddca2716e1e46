use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use veil_codec::create_transaction;
use veil_crypto::{InputNote, OutputNote, ShieldedTxBuilder};
use veil_node::{view, ChainNode, NodeConfig, RoundTimer, SchemeKind};
use veil_types::Address;

#[derive(Debug, Parser)]
#[command(author, version, about = "Single-process proof-of-stake chain", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a small chain with scripted transfers and print each block as JSON
    Demo {
        /// JSON config file; built-in demo settings are used when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of blocks to finalize
        #[arg(long, default_value_t = 3)]
        blocks: u64,

        /// Override the round timeout in milliseconds
        #[arg(long)]
        round_timeout_ms: Option<u64>,

        /// Override the signature scheme (ed25519 or keyed-hash)
        #[arg(long)]
        scheme: Option<String>,
    },
}

const ALICE: Address = [0xA1u8; 20];
const BOB: Address = [0xB0u8; 20];
const MAX_ATTEMPTS: u32 = 500;

fn demo_config() -> NodeConfig {
    NodeConfig::default()
        .with_genesis_account(&ALICE, 1_000)
        .with_validator(&[1u8; 32], 1_000)
        .with_validator(&[2u8; 32], 500)
        .with_validator(&[3u8; 32], 250)
}

fn parse_scheme(s: &str) -> Result<SchemeKind> {
    match s {
        "ed25519" => Ok(SchemeKind::Ed25519),
        "keyed-hash" => Ok(SchemeKind::KeyedHash),
        other => bail!("unknown scheme {other:?}, expected ed25519 or keyed-hash"),
    }
}

async fn run_demo(node: ChainNode, blocks: u64) -> Result<()> {
    let mut timer = RoundTimer::spawn(node.clone(), node.round_timeout());

    for i in 0..blocks {
        let nonce = node.nonce(&ALICE);
        node.submit_transaction(create_transaction(ALICE, BOB, 100, nonce).into())
            .context("submit transfer")?;

        if i % 2 == 1 {
            let shielded = ShieldedTxBuilder::construct(
                &[InputNote {
                    note: format!("demo-note-{i}").into_bytes(),
                    value: 10,
                    blinding: [0u8; 32],
                }],
                &[OutputNote {
                    recipient: BOB,
                    value: 10,
                }],
                &[i as u8; 32],
            )?;
            node.submit_transaction(shielded.into())
                .context("submit shielded transaction")?;
        }

        let mut attempts = 0;
        let block = loop {
            if let Some(block) = node.run_round()? {
                break block;
            }
            attempts += 1;
            if attempts >= MAX_ATTEMPTS {
                bail!("no block finalized at height {}", node.position().0);
            }
            // no proposer or not enough stake voted; let the timer move the round
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        println!("{}", serde_json::to_string_pretty(&view::block_json(&block))?);
    }

    timer.cancel();
    info!(
        height = node.height(),
        alice = node.balance(&ALICE),
        bob = node.balance(&BOB),
        "demo finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Demo {
            config,
            blocks,
            round_timeout_ms,
            scheme,
        } => {
            let mut config = match config {
                Some(path) => NodeConfig::from_path(&path)
                    .with_context(|| format!("load config {}", path.display()))?,
                None => demo_config(),
            };
            if let Some(ms) = round_timeout_ms {
                config.consensus.round_timeout_ms = ms;
            }
            if let Some(scheme) = scheme {
                config.scheme = parse_scheme(&scheme)?;
            }
            if config.validators.is_empty() {
                bail!("config lists no validators");
            }

            let node = ChainNode::from_config(&config)?;
            tokio::select! {
                result = run_demo(node, blocks) => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted");
                    Ok(())
                }
            }
        }
    }
}
