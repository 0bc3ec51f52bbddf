//! Defensive payload copying
//!
//! The producer hands the transport a fresh structurally-independent copy of
//! the caller's message before every attempt, so delivery metadata stamped on
//! one attempt cannot leak into the next and the caller's message is never
//! mutated by internal retries.

use qg_common::Message;

/// Produces a structurally independent duplicate of a message
pub trait DeepCopy: Send + Sync {
    fn copy(&self, message: &Message) -> Message;
}

/// Default copier: round-trips through `serde_json::Value`.
///
/// The round-trip severs any shared substructure regardless of how the
/// message was assembled.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeDeepCopy;

impl DeepCopy for SerdeDeepCopy {
    fn copy(&self, message: &Message) -> Message {
        match serde_json::to_value(message).and_then(serde_json::from_value) {
            Ok(copy) => copy,
            // Message is a plain owned tree, so the round-trip only fails if
            // that ever changes; Clone is still a full copy for owned data
            Err(_) => message.clone(),
        }
    }
}
