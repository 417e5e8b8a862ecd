//! Host environment boundary
//!
//! Everything the engine consumes but does not implement: text broadcasts,
//! match-record persistence, arena world instancing, and player identity.
//! The engine only ever calls these through `Arc<dyn HostServices>`; the
//! driver forwards persistence off the tick path so host I/O can never stall
//! a session tick.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::ArenaTemplate;
use crate::session::MatchRecord;

/// Handle to a live arena world instance created by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaHandle {
    pub instance_id: Uuid,
    pub arena_id: String,
}

/// Failures surfaced by the host when servicing engine requests
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    #[error("arena instance creation failed: {0}")]
    ArenaCreation(String),
}

/// Services supplied by the surrounding host environment
pub trait HostServices: Send + Sync {
    /// Send a chat/status line to everyone in the session
    fn broadcast(&self, session: &str, text: &str);

    /// Persist a finished match record. Called off the tick path.
    fn persist_match_record(&self, record: &MatchRecord);

    /// Instantiate the physical arena world for a session
    fn create_arena_instance(&self, template: &ArenaTemplate) -> Result<ArenaHandle, HostError>;

    /// Discard an arena world instance
    fn destroy_arena_instance(&self, handle: ArenaHandle);

    /// Player identity lookup: is this participant still online?
    fn is_online(&self, participant: Uuid) -> bool;
}

/// Host that does nothing; every participant counts as online
pub struct NullHost;

impl HostServices for NullHost {
    fn broadcast(&self, _session: &str, _text: &str) {}

    fn persist_match_record(&self, _record: &MatchRecord) {}

    fn create_arena_instance(&self, template: &ArenaTemplate) -> Result<ArenaHandle, HostError> {
        Ok(ArenaHandle {
            instance_id: Uuid::new_v4(),
            arena_id: template.id.clone(),
        })
    }

    fn destroy_arena_instance(&self, _handle: ArenaHandle) {}

    fn is_online(&self, _participant: Uuid) -> bool {
        true
    }
}

/// Recording host double: captures every call for assertions and supports
/// failure/offline injection
#[derive(Default)]
pub struct RecordingHost {
    pub broadcasts: Mutex<Vec<(String, String)>>,
    pub persisted: Mutex<Vec<MatchRecord>>,
    pub live_instances: Mutex<HashSet<Uuid>>,
    pub offline: Mutex<HashSet<Uuid>>,
    pub fail_arena_creation: AtomicBool,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, participant: Uuid) {
        self.offline.lock().insert(participant);
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().len()
    }

    pub fn persisted_count(&self) -> usize {
        self.persisted.lock().len()
    }

    pub fn live_instance_count(&self) -> usize {
        self.live_instances.lock().len()
    }
}

impl HostServices for RecordingHost {
    fn broadcast(&self, session: &str, text: &str) {
        self.broadcasts
            .lock()
            .push((session.to_string(), text.to_string()));
    }

    fn persist_match_record(&self, record: &MatchRecord) {
        self.persisted.lock().push(record.clone());
    }

    fn create_arena_instance(&self, template: &ArenaTemplate) -> Result<ArenaHandle, HostError> {
        if self.fail_arena_creation.load(Ordering::SeqCst) {
            return Err(HostError::ArenaCreation(format!(
                "injected failure for '{}'",
                template.id
            )));
        }
        let handle = ArenaHandle {
            instance_id: Uuid::new_v4(),
            arena_id: template.id.clone(),
        };
        self.live_instances.lock().insert(handle.instance_id);
        Ok(handle)
    }

    fn destroy_arena_instance(&self, handle: ArenaHandle) {
        self.live_instances.lock().remove(&handle.instance_id);
    }

    fn is_online(&self, participant: Uuid) -> bool {
        !self.offline.lock().contains(&participant)
    }
}
