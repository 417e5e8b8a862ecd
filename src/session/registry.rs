//! Session registry and driver tasks
//!
//! Maps lobby names (and lobby regions) to live sessions. Each lobby gets
//! one long-lived driver task that owns its session state machine, feeds it
//! commands from an mpsc channel, ticks it once per logical second, and
//! recreates it from scratch whenever a session recycles - sessions are
//! never reused in place.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::arena::SelectionMode;
use crate::config::{ConfigError, LobbyConfig, Position};
use crate::host::HostServices;
use crate::util::time::scheduler_tick;

use super::machine::SessionStateMachine;
use super::team::TeamId;
use super::{MatchOutcome, MatchRecord, SessionError, SessionEvent};

/// Commands accepted by a session driver
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Join {
        id: Uuid,
        display_name: String,
        as_spectator: bool,
    },
    Leave { id: Uuid },
    Switch { id: Uuid, target: TeamId },
    Vote { id: Uuid, arena: String },
    Start,
    Stop { outcome: MatchOutcome },
    /// Force-recycle the current session and build a fresh one
    Restart,
    /// Tear the lobby down for good
    Shutdown,
}

/// Handle to a lobby's driver task. Survives session recycling: the channels
/// stay attached to the lobby, not to any single session generation.
#[derive(Clone)]
pub struct SessionHandle {
    pub lobby: String,
    pub commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

struct RegistryInner {
    sessions: DashMap<String, SessionHandle>,
    lobbies: DashMap<String, Arc<LobbyConfig>>,
    /// Round-robin arena position per lobby, persisted across sessions
    cycle_indices: DashMap<String, usize>,
    match_counter: Arc<AtomicU64>,
    host: Arc<dyn HostServices>,
}

/// Registry of all lobbies and their live sessions
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(host: Arc<dyn HostServices>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                lobbies: DashMap::new(),
                cycle_indices: DashMap::new(),
                match_counter: Arc::new(AtomicU64::new(0)),
                host,
            }),
        }
    }

    /// Register a lobby and spawn its driver. Fatal configuration errors are
    /// rejected here, before anything runs.
    pub fn register_lobby(&self, config: LobbyConfig) -> Result<SessionHandle, ConfigError> {
        config.validate()?;
        if self.inner.sessions.contains_key(&config.name) {
            return Err(ConfigError::DuplicateLobby {
                name: config.name.clone(),
            });
        }

        let config = Arc::new(config);
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, _) = broadcast::channel(256);

        let handle = SessionHandle {
            lobby: config.name.clone(),
            commands: command_tx,
            events: event_tx.clone(),
        };
        self.inner.sessions.insert(config.name.clone(), handle.clone());
        self.inner
            .lobbies
            .insert(config.name.clone(), config.clone());

        let inner = self.inner.clone();
        tokio::spawn(run_lobby(inner, config, command_rx, event_tx));

        Ok(handle)
    }

    pub fn get(&self, lobby: &str) -> Option<SessionHandle> {
        self.inner.sessions.get(lobby).map(|h| h.value().clone())
    }

    /// Locate the session whose lobby region contains the position
    pub fn session_at(&self, position: &Position) -> Option<SessionHandle> {
        for entry in self.inner.lobbies.iter() {
            if entry.value().region.contains(position) {
                return self.get(entry.key());
            }
        }
        None
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Matches completed across all lobbies since startup
    pub fn total_matches(&self) -> u64 {
        self.inner
            .match_counter
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Current round-robin position for a lobby (next session's arena)
    pub fn cycle_index(&self, lobby: &str) -> Option<usize> {
        self.inner.cycle_indices.get(lobby).map(|i| *i.value())
    }

    /// Force-recycle a lobby's current session
    pub async fn restart(&self, lobby: &str) -> bool {
        match self.get(lobby) {
            Some(handle) => handle.commands.send(SessionCommand::Restart).await.is_ok(),
            None => false,
        }
    }

    /// Tear every lobby down
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = self
            .inner
            .sessions
            .iter()
            .map(|e| e.value().clone())
            .collect();
        for handle in handles {
            let _ = handle.commands.send(SessionCommand::Shutdown).await;
        }
    }
}

/// One driver task per lobby: runs session generations back to back
async fn run_lobby(
    inner: Arc<RegistryInner>,
    config: Arc<LobbyConfig>,
    mut commands: mpsc::Receiver<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
) {
    loop {
        let cycle = next_cycle_index(&inner, &config);
        let seed = rand::random::<u64>();
        let mut session = match SessionStateMachine::new(
            config.clone(),
            cycle,
            seed,
            inner.host.clone(),
            inner.match_counter.clone(),
            events.clone(),
        ) {
            Ok(session) => session,
            Err(err) => {
                error!(lobby = %config.name, %err, "refusing to run a broken lobby");
                inner.sessions.remove(&config.name);
                inner.lobbies.remove(&config.name);
                return;
            }
        };

        let mut ticker = interval(scheduler_tick());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut shutdown = false;
        loop {
            tokio::select! {
                maybe_cmd = commands.recv() => {
                    match maybe_cmd {
                        None | Some(SessionCommand::Shutdown) => {
                            shutdown = true;
                            break;
                        }
                        Some(SessionCommand::Restart) => {
                            info!(lobby = %config.name, "forced restart requested");
                            break;
                        }
                        Some(cmd) => apply_command(&mut session, cmd, &inner.host, &events),
                    }
                }
                _ = ticker.tick() => {
                    if let Some(record) = session.on_tick() {
                        persist_off_tick(&inner.host, record);
                    }
                    if session.is_recycle_requested() {
                        break;
                    }
                }
            }
        }

        // Cancellation before teardown: the reset stops every timer and
        // schedule before the arena instance goes away.
        if session.is_restart_pending() {
            info!(lobby = %config.name, "scheduled instance restart reached");
        }
        session.reset();

        if shutdown {
            inner.sessions.remove(&config.name);
            inner.lobbies.remove(&config.name);
            info!(lobby = %config.name, "lobby shut down");
            return;
        }
        info!(lobby = %config.name, "recycling session");
    }
}

fn next_cycle_index(inner: &RegistryInner, config: &LobbyConfig) -> usize {
    let mut entry = inner
        .cycle_indices
        .entry(config.name.clone())
        .or_insert(0);
    let current = *entry;
    if config.selection == SelectionMode::Cycle && !config.arenas.is_empty() {
        *entry = (current + 1) % config.arenas.len();
    }
    current
}

fn apply_command(
    session: &mut SessionStateMachine,
    cmd: SessionCommand,
    host: &Arc<dyn HostServices>,
    events: &broadcast::Sender<SessionEvent>,
) {
    let result: Result<Option<MatchRecord>, (Option<Uuid>, SessionError)> = match cmd {
        SessionCommand::Join {
            id,
            display_name,
            as_spectator,
        } => session
            .join(id, display_name, as_spectator)
            .map(|_| None)
            .map_err(|e| (Some(id), e)),
        SessionCommand::Leave { id } => session.leave(id).map_err(|e| (Some(id), e)),
        SessionCommand::Switch { id, target } => session
            .request_switch(id, target)
            .map(|_| None)
            .map_err(|e| (Some(id), e)),
        SessionCommand::Vote { id, arena } => session
            .cast_vote(id, &arena)
            .map(|_| None)
            .map_err(|e| (Some(id), e)),
        SessionCommand::Start => session.start().map(|_| None).map_err(|e| (None, e)),
        SessionCommand::Stop { outcome } => session.stop(outcome).map_err(|e| (None, e)),
        // Handled by the driver loop before we get here.
        SessionCommand::Restart | SessionCommand::Shutdown => Ok(None),
    };

    match result {
        Ok(Some(record)) => persist_off_tick(host, record),
        Ok(None) => {}
        Err((participant, err)) => {
            warn!(session = session.name(), %err, "command rejected");
            let _ = events.send(SessionEvent::OperationRejected {
                participant,
                reason: err.to_string(),
            });
        }
    }
}

/// Persistence never runs inline with a tick: hand the record to its own task
fn persist_off_tick(host: &Arc<dyn HostServices>, record: MatchRecord) {
    let host = host.clone();
    tokio::spawn(async move {
        host.persist_match_record(&record);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingHost;
    use crate::test_support::{init_tracing, lobby_config};
    use std::time::Duration;

    fn registry() -> (SessionRegistry, Arc<RecordingHost>) {
        init_tracing();
        let host = Arc::new(RecordingHost::new());
        (SessionRegistry::new(host.clone()), host)
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Let the driver task absorb queued commands and pending ticks.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn register_rejects_duplicates_and_broken_configs() {
        let (registry, _host) = registry();
        registry.register_lobby(lobby_config()).unwrap();
        assert!(matches!(
            registry.register_lobby(lobby_config()),
            Err(ConfigError::DuplicateLobby { .. })
        ));

        let mut broken = lobby_config();
        broken.name = "no-arenas".to_string();
        broken.arenas.clear();
        assert!(matches!(
            registry.register_lobby(broken),
            Err(ConfigError::NoArenas { .. })
        ));
        assert_eq!(registry.active_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn command_flow_runs_a_full_match() {
        let (registry, host) = registry();
        let handle = registry.register_lobby(lobby_config()).unwrap();
        let mut rx = handle.subscribe();

        for i in 0..2 {
            handle
                .commands
                .send(SessionCommand::Join {
                    id: Uuid::new_v4(),
                    display_name: format!("player-{i}"),
                    as_spectator: false,
                })
                .await
                .unwrap();
        }
        handle.commands.send(SessionCommand::Start).await.unwrap();
        handle
            .commands
            .send(SessionCommand::Stop {
                outcome: MatchOutcome::draw(),
            })
            .await
            .unwrap();
        settle().await;

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::SessionStarted { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::MatchEnded { .. })));
        assert_eq!(host.persisted_count(), 1);
        assert_eq!(registry.total_matches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_commands_surface_as_events() {
        let (registry, _host) = registry();
        let handle = registry.register_lobby(lobby_config()).unwrap();
        let mut rx = handle.subscribe();

        // Start with nobody in the lobby is not ready.
        handle.commands.send(SessionCommand::Start).await.unwrap();
        settle().await;

        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, SessionEvent::OperationRejected { participant: None, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn recycling_builds_a_fresh_session() {
        let mut config = lobby_config();
        config.timers.end_countdown_secs = 1;
        let (registry, host) = registry();
        let handle = registry.register_lobby(config).unwrap();
        let mut rx = handle.subscribe();

        for i in 0..2 {
            handle
                .commands
                .send(SessionCommand::Join {
                    id: Uuid::new_v4(),
                    display_name: format!("player-{i}"),
                    as_spectator: false,
                })
                .await
                .unwrap();
        }
        handle.commands.send(SessionCommand::Start).await.unwrap();
        handle
            .commands
            .send(SessionCommand::Stop {
                outcome: MatchOutcome::draw(),
            })
            .await
            .unwrap();
        // End countdown expires, the session recycles, the arena instance
        // goes away with it.
        settle().await;
        settle().await;

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::RecycleRequested)));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::SessionReset)));
        assert_eq!(host.live_instance_count(), 0);

        // The lobby handle keeps working against the fresh generation.
        handle
            .commands
            .send(SessionCommand::Join {
                id: Uuid::new_v4(),
                display_name: "returnee".to_string(),
                as_spectator: false,
            })
            .await
            .unwrap();
        settle().await;
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, SessionEvent::ParticipantJoined { .. })));
        assert_eq!(registry.active_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_index_advances_per_generation() {
        let mut config = lobby_config();
        config.selection = SelectionMode::Cycle;
        let (registry, _host) = registry();
        let lobby = config.name.clone();
        let handle = registry.register_lobby(config).unwrap();
        settle().await;
        // Two arenas: the first generation took index 0, the next is 1.
        assert_eq!(registry.cycle_index(&lobby), Some(1));

        assert!(registry.restart(&lobby).await);
        settle().await;
        assert_eq!(registry.cycle_index(&lobby), Some(0));

        drop(handle);
    }

    #[tokio::test(start_paused = true)]
    async fn session_at_matches_the_lobby_region() {
        let (registry, _host) = registry();
        registry.register_lobby(lobby_config()).unwrap();

        let inside = Position {
            x: 0.0,
            y: 50.0,
            z: -20.0,
        };
        let outside = Position {
            x: 500.0,
            y: 0.0,
            z: 0.0,
        };
        assert!(registry.session_at(&inside).is_some());
        assert!(registry.session_at(&outside).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_removes_every_lobby() {
        let (registry, _host) = registry();
        registry.register_lobby(lobby_config()).unwrap();
        assert_eq!(registry.active_sessions(), 1);

        registry.shutdown().await;
        settle().await;
        assert_eq!(registry.active_sessions(), 0);
        assert!(!registry.restart("arena-1").await);
    }
}
