//! Persistence layer
//!
//! Conversation stores (live state plus named snapshots) and the usage
//! ledger. File-backed and in-memory implementations share the same traits
//! so the orchestrator never knows which one it is talking to.

pub mod conversations;
pub mod usage;

pub use conversations::{ConversationStore, FileConversationStore, MemoryConversationStore};
pub use usage::{FileUsageLedger, MemoryUsageLedger, Pricing, UsageDelta, UsageLedger, UsageRecord};

/// Replace path-hostile characters so arbitrary identities and names map to
/// plain file names inside a store's directory
pub(crate) fn sanitize_component(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
