pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod report;

pub use config::{BankConfig, BankTopology};
pub use error::{Error, Result};
pub use message::{MarkerId, Message};
pub use report::CollectorRecord;
