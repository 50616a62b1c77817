use std::path::Path;

use anyhow::Context;
use sled::Db;

use crate::BalanceStore;

const BALANCE_KEY: &[u8] = b"balance";
const DEFAULT_OPENING_BALANCE: u64 = 100_000;

/// A `sled`-backed balance store, one tree per bank id.
pub struct SledBalanceStore {
    db: Db,
}

impl SledBalanceStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let db = sled::open(path).with_context(|| format!("opening balance store at {path:?}"))?;
        if db.get(BALANCE_KEY)?.is_none() {
            tracing::info!(?path, balance = DEFAULT_OPENING_BALANCE, "seeding new balance store");
            db.insert(BALANCE_KEY, &DEFAULT_OPENING_BALANCE.to_be_bytes())?;
        } else {
            tracing::debug!(?path, "opened existing balance store");
        }
        Ok(Self { db })
    }
}

impl BalanceStore for SledBalanceStore {
    fn get_balance(&self) -> anyhow::Result<u64> {
        let raw = self
            .db
            .get(BALANCE_KEY)?
            .context("balance store has no recorded balance")?;
        Ok(u64::from_be_bytes(raw.as_ref().try_into()?))
    }

    fn credit(&self, amount: u64) -> anyhow::Result<()> {
        let updated = self
            .db
            .update_and_fetch(BALANCE_KEY, |old| {
                let balance = decode(old);
                Some((balance + amount).to_be_bytes().to_vec())
            })?
            .context("balance store has no recorded balance")?;
        tracing::debug!(amount, balance = decode(Some(updated.as_ref())), "credited balance store");
        Ok(())
    }

    fn debit(&self, amount: u64) -> anyhow::Result<()> {
        let updated = self
            .db
            .update_and_fetch(BALANCE_KEY, |old| {
                let balance = decode(old);
                Some(balance.saturating_sub(amount).to_be_bytes().to_vec())
            })?
            .context("balance store has no recorded balance")?;
        tracing::debug!(amount, balance = decode(Some(updated.as_ref())), "debited balance store");
        Ok(())
    }
}

fn decode(raw: Option<&[u8]>) -> u64 {
    raw.and_then(|bytes| bytes.try_into().ok())
        .map(u64::from_be_bytes)
        .unwrap_or(DEFAULT_OPENING_BALANCE)
}
