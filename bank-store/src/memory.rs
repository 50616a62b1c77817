use anyhow::bail;
use parking_lot::Mutex;

use crate::BalanceStore;

/// An in-memory balance store used by tests in place of [`SledBalanceStore`]
/// (spec.md §9: "tests substitute an in-memory implementation").
pub struct InMemoryBalanceStore {
    balance: Mutex<u64>,
}

impl InMemoryBalanceStore {
    pub fn new(opening_balance: u64) -> Self {
        Self {
            balance: Mutex::new(opening_balance),
        }
    }
}

impl BalanceStore for InMemoryBalanceStore {
    fn get_balance(&self) -> anyhow::Result<u64> {
        Ok(*self.balance.lock())
    }

    fn credit(&self, amount: u64) -> anyhow::Result<()> {
        *self.balance.lock() += amount;
        Ok(())
    }

    fn debit(&self, amount: u64) -> anyhow::Result<()> {
        let mut balance = self.balance.lock();
        if *balance < amount {
            bail!("insufficient funds: balance {balance} < amount {amount}");
        }
        *balance -= amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_and_debit_update_balance() {
        let store = InMemoryBalanceStore::new(100);
        store.credit(50).unwrap();
        assert_eq!(store.get_balance().unwrap(), 150);
        store.debit(30).unwrap();
        assert_eq!(store.get_balance().unwrap(), 120);
    }

    #[test]
    fn debit_below_zero_is_rejected() {
        let store = InMemoryBalanceStore::new(10);
        assert!(store.debit(20).is_err());
        assert_eq!(store.get_balance().unwrap(), 10);
    }
}
