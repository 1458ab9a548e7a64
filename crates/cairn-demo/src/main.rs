//! cairn-demo: runs the storage client workflow once against a live chain.
//!
//! Usage: `cairn-demo [FILE]`. Settings come from `$CAIRN_CONFIG` and the
//! environment (`RPC_ADDRS`, `MY_MNEMONIC`, `BOOTSTRAP_NODES`, `MY_ADDR`).

use anyhow::{Context, Result};

use cairn_core::CairnConfig;
use cairn_services::{execute, OrderReceipt, StepOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = CairnConfig::load().context("failed to load configuration")?;
    if let Some(file) = std::env::args().nth(1) {
        config.upload.file = file.into();
    }
    tracing::info!(
        role = %config.chain.role,
        endpoints = config.chain.rpc_addrs.len(),
        policy = ?config.workflow.policy,
        file = %config.upload.file.display(),
        "cairn-demo starting"
    );

    let report = execute(&config).await.context("workflow could not start")?;

    for record in &report.records {
        match &record.outcome {
            StepOutcome::Completed(()) => println!("{:<13} ok", record.step),
            StepOutcome::Recovered(e) => println!("{:<13} recovered: {e}", record.step),
            StepOutcome::Fatal(e) => println!("{:<13} FAILED: {e}", record.step),
        }
    }
    if let Some(chain) = &report.chain {
        println!("chain         {chain}");
    }
    if let Some(processed) = &report.processed {
        println!("root          {}", processed.root);
        println!("segments      {}", processed.segments.len());
    }
    if let Some(owner) = &report.owner {
        println!("owner key     {}", hex::encode(owner.public_key()));
    }
    match &report.order {
        Some(OrderReceipt::Submitted { tx_hash }) => println!("order tx      {tx_hash}"),
        Some(OrderReceipt::AlreadyDeclared { root }) => println!("order         {root} already declared"),
        None => {}
    }

    if let Some(e) = report.fatal() {
        anyhow::bail!("workflow stopped: {e}");
    }
    Ok(())
}
