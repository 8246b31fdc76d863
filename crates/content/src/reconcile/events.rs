//! Manifest change notifications
//!
//! Listeners (UI, dependent services) register a callback on the
//! reconciliation service. Delivery is fire-and-forget relative to the
//! reconciliation result: a notification is emitted once per replacement
//! pair after the profiles have been processed, and nothing about the
//! reconciliation outcome depends on who is listening.

use std::sync::Arc;

use crate::manifest::ManifestId;

/// One manifest was replaced by another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChangedEvent {
    pub old_id: ManifestId,
    pub new_id: ManifestId,
}

/// Callback invoked for every manifest replacement
pub type ChangeCallback = Arc<dyn Fn(&ContentChangedEvent) + Send + Sync>;
