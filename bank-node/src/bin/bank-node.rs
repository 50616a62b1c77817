use std::sync::Arc;

use anyhow::{Context, Result};
use bank_commons::BankConfig;
use bank_node::cli::Opts;
use bank_node::{logger, Node};
use bank_store::SledBalanceStore;

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::read();
    let data_dir = opts.data_dir().context("resolving data directory")?;

    let _log_guard = logger::init_tracing(&data_dir, opts.json)?;

    tracing::info!(bank_id = %opts.bank_id, "starting bank node");

    let config = BankConfig::load(&opts.bank_id, &data_dir)
        .with_context(|| format!("loading configuration for bank '{}'", opts.bank_id))?;

    let store_path = data_dir.join(format!("{}.sled", opts.bank_id));
    let store = Arc::new(
        SledBalanceStore::open(&store_path)
            .with_context(|| format!("opening balance store at {store_path:?}"))?,
    );

    let mut node = Node::new(opts.bank_id.clone(), &config, store, &data_dir).await?;
    node.run().await
}
