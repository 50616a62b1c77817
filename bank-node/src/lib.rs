pub mod cli;
pub mod collector;
pub mod logger;
pub mod node;
pub mod peer;
pub mod snapshot;
pub mod trigger;

pub use node::Node;
pub use peer::PeerHandle;
pub use snapshot::{Snapshot, SnapshotRegistry};
