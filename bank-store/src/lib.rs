//! The persistent account balance store treated as an opaque external
//! resource by the bank node (spec.md §1, §9 "Global state"): a single
//! fixed account, atomic credit/debit/read, no concurrent access from more
//! than one caller.

mod memory;
mod sled_store;

pub use memory::InMemoryBalanceStore;
pub use sled_store::SledBalanceStore;

/// A durable store for one bank's account balance.
///
/// Implementations are never shared across threads in this design (§5
/// "the balance store is accessed only from the node loop"), but are
/// required to be `Send` so they can live inside a single-threaded async
/// task spawned onto a multi-thread runtime.
pub trait BalanceStore: Send {
    fn get_balance(&self) -> anyhow::Result<u64>;
    fn credit(&self, amount: u64) -> anyhow::Result<()>;
    fn debit(&self, amount: u64) -> anyhow::Result<()>;
}
