use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::message::{MarkerId, Message};

/// A completed snapshot, as shipped to the state collector. `status` is the
/// recorded balance; `channel_messages` maps an opaque peer-handle string to
/// the in-flight messages recorded for that channel, per spec.md §6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorRecord {
    pub bank_id: String,
    pub marker_id: MarkerId,
    pub status: i64,
    pub channel_messages: HashMap<String, Vec<Message>>,
}
