//! The session state machine
//!
//! Owns every participant associated with one match and orchestrates the
//! balancer, arena selector, equipment distributor and phase timers. All
//! mutation runs on a single thread-of-control: the driver task feeds in
//! commands and ticks, nothing here blocks, and every recoverable condition
//! comes back as a `SessionError` instead of unwinding across a tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::arena::{ArenaSelector, SelectionMode, VoteOutcome, VoteState};
use crate::balance::{TeamBalancer, TeamSizes};
use crate::config::{ArenaTemplate, ConfigError, LobbyConfig};
use crate::equipment::EquipmentDistributor;
use crate::host::{ArenaHandle, HostServices};
use crate::timer::{EndTimer, LobbyTimer, MatchTimer, TaskScheduler, TimerTick};

use super::team::{Participant, Team, TeamId, TeamResult};
use super::{MatchOutcome, MatchRecord, Phase, SessionError, SessionEvent, TeamRecord};

/// Countdown checkpoints worth announcing
const ANNOUNCE_AT: [u32; 9] = [60, 30, 15, 10, 5, 4, 3, 2, 1];

/// One playable match from lobby formation through combat to results
pub struct SessionStateMachine {
    name: String,
    config: Arc<LobbyConfig>,
    phase: Phase,

    selector: ArenaSelector,
    arena: Option<ArenaTemplate>,
    arena_instance: Option<ArenaHandle>,

    participants: HashMap<Uuid, Participant>,
    team_a: Team,
    team_b: Team,
    spectators: Team,

    balancer: TeamBalancer,
    distributor: EquipmentDistributor,
    scheduler: TaskScheduler,

    rng: ChaCha8Rng,
    host: Arc<dyn HostServices>,
    events: broadcast::Sender<SessionEvent>,

    /// Global match counter shared across all sessions of the registry
    match_counter: Arc<AtomicU64>,
    match_number: Option<u64>,
    restart_pending: bool,
    recycle_requested: bool,
}

impl SessionStateMachine {
    /// Build a fresh session for one lobby. `cycle_index` is the lobby's
    /// persisted round-robin position (ignored outside `Cycle` mode) and
    /// `seed` drives every random decision the session makes.
    pub fn new(
        config: Arc<LobbyConfig>,
        cycle_index: usize,
        seed: u64,
        host: Arc<dyn HostServices>,
        match_counter: Arc<AtomicU64>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut selector =
            ArenaSelector::new(config.selection, config.arena_ids(), cycle_index);
        // Deterministic modes pin the arena immediately; voting lobbies keep
        // it open until the ballot resolves.
        let arena = match config.selection {
            SelectionMode::First | SelectionMode::Cycle => {
                let id = selector.resolve().to_string();
                config.arena(&id).cloned()
            }
            SelectionMode::Vote => selector
                .chosen()
                .and_then(|id| config.arena(id).cloned()),
        };

        let mut scheduler = TaskScheduler::new();
        scheduler.swap(Box::new(LobbyTimer::new(config.timers.lobby_countdown_secs)));

        let session = Self {
            name: config.name.clone(),
            phase: Phase::Lobby,
            selector,
            arena,
            arena_instance: None,
            participants: HashMap::new(),
            team_a: Team::new(TeamId::A, &config.team_a),
            team_b: Team::new(TeamId::B, &config.team_b),
            spectators: Team::spectators(),
            balancer: TeamBalancer::new(&config.balance),
            distributor: EquipmentDistributor::new(
                &config.equipment,
                config.timers.match_duration_secs,
            ),
            scheduler,
            rng: ChaCha8Rng::seed_from_u64(seed),
            host,
            events,
            match_counter,
            match_number: None,
            restart_pending: false,
            recycle_requested: false,
            config,
        };

        info!(session = %session.name, "session created");
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    /// Admit a participant. Lobby joiners are auto-placed by the balancer
    /// unless they asked to spectate; mid-match joiners always spectate.
    pub fn join(
        &mut self,
        id: Uuid,
        display_name: String,
        as_spectator: bool,
    ) -> Result<TeamId, SessionError> {
        if self.participants.contains_key(&id) {
            return Err(SessionError::AlreadyJoined(id));
        }
        if self.phase == Phase::End {
            return Err(SessionError::WrongPhase {
                op: "join",
                phase: self.phase,
            });
        }
        if !self.host.is_online(id) {
            warn!(session = %self.name, participant = %id, "joiner went offline, aborting join");
            return Err(SessionError::ParticipantOffline(id));
        }

        let team = if as_spectator || self.phase == Phase::InGame {
            TeamId::Spectator
        } else {
            self.balancer
                .next_assignment_team(&self.team_sizes(), &mut self.rng)
        };

        let mut participant = Participant::new(id, display_name.clone());
        participant.team = Some(team);
        self.participants.insert(id, participant);
        self.team_mut(team).add_member(id);
        self.refresh_team_interval(team);

        self.emit(SessionEvent::ParticipantJoined { id, team });
        self.host.broadcast(
            &self.name,
            &format!("{} joined {}", display_name, self.team(team).display_name),
        );
        info!(
            session = %self.name,
            participant = %id,
            team = ?team,
            count = self.participants.len(),
            "participant joined"
        );
        Ok(team)
    }

    /// Remove a participant entirely. If the departure empties a player team
    /// mid-match the match resolves immediately as a loss for that team; the
    /// returned record, when present, must be persisted by the caller.
    pub fn leave(&mut self, id: Uuid) -> Result<Option<MatchRecord>, SessionError> {
        let participant = self
            .participants
            .remove(&id)
            .ok_or(SessionError::UnknownParticipant(id))?;

        self.distributor.cancel(id);
        self.selector.remove_voter(id);
        let former = participant.team;
        if let Some(team) = former {
            self.team_mut(team).remove_member(id);
        }

        self.emit(SessionEvent::ParticipantLeft { id });
        info!(
            session = %self.name,
            participant = %id,
            count = self.participants.len(),
            "participant left"
        );

        if let Some(team) = former.filter(|t| t.is_player()) {
            if self.phase == Phase::InGame && self.team(team).is_empty() {
                // A team emptied by leaving is a game outcome, not an error.
                let enemy = team.enemy().unwrap_or(TeamId::A);
                self.host.broadcast(
                    &self.name,
                    &format!("{} has no players left!", self.team(team).display_name),
                );
                return self.stop(MatchOutcome::win_for(enemy));
            }
            self.refresh_team_interval(team);
        }
        Ok(None)
    }

    /// Explicit team-change request, gated by the balancer
    pub fn request_switch(&mut self, id: Uuid, target: TeamId) -> Result<(), SessionError> {
        if self.phase == Phase::End {
            return Err(SessionError::WrongPhase {
                op: "switch",
                phase: self.phase,
            });
        }
        let current = self
            .participants
            .get(&id)
            .ok_or(SessionError::UnknownParticipant(id))?
            .team;
        if current == Some(target) {
            return Err(SessionError::AlreadyOnTeam(target));
        }

        // An unassigned participant affects no player-team size on departure,
        // exactly like a spectator.
        let effective_current = current.unwrap_or(TeamId::Spectator);
        self.balancer
            .is_valid_switch(effective_current, target, &self.team_sizes())?;

        if let Some(team) = current {
            self.team_mut(team).remove_member(id);
        }
        self.team_mut(target).add_member(id);
        if let Some(p) = self.participants.get_mut(&id) {
            p.team = Some(target);
        }

        if self.phase == Phase::InGame {
            if target.is_player() {
                self.distributor.schedule(id);
            } else {
                self.distributor.cancel(id);
            }
        }
        if let Some(team) = current.filter(|t| t.is_player()) {
            self.refresh_team_interval(team);
        }
        if target.is_player() {
            self.refresh_team_interval(target);
        }

        self.emit(SessionEvent::TeamSwitched {
            id,
            from: current,
            to: target,
        });
        self.host.broadcast(
            &self.name,
            &format!("A player moved to {}", self.team(target).display_name),
        );
        Ok(())
    }

    /// Record an arena ballot for a participant
    pub fn cast_vote(&mut self, id: Uuid, arena: &str) -> Result<VoteOutcome, SessionError> {
        if !self.participants.contains_key(&id) {
            return Err(SessionError::UnknownParticipant(id));
        }
        let outcome = self.selector.cast_vote(id, arena)?;
        match &outcome {
            VoteOutcome::Unchanged => self.host.broadcast(
                &self.name,
                &format!("You already voted for {arena}"),
            ),
            _ => self
                .host
                .broadcast(&self.name, &format!("Vote recorded for {arena}")),
        }
        self.emit(SessionEvent::VoteCast {
            id,
            arena: arena.to_string(),
            outcome: outcome.clone(),
        });
        Ok(outcome)
    }

    /// Close arena selection now. Legal once per session; the arena is
    /// immutable afterwards.
    pub fn resolve_arena(&mut self) -> Result<&ArenaTemplate, SessionError> {
        if self.arena.is_some() {
            return Err(SessionError::ArenaAlreadySet);
        }
        let id = self.selector.resolve().to_string();
        if self.config.selection == SelectionMode::Vote {
            self.emit(SessionEvent::VoteClosed { arena: id.clone() });
            self.host
                .broadcast(&self.name, &format!("Voting closed: {id} wins"));
        }
        self.arena = self.config.arena(&id).cloned();
        self.arena
            .as_ref()
            .ok_or(SessionError::ArenaAlreadySet)
    }

    /// Begin combat. Legal only from the lobby with an arena resolved and
    /// teams ready (or the vote's single-option fallback in play).
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.phase != Phase::Lobby {
            return Err(SessionError::WrongPhase {
                op: "start",
                phase: self.phase,
            });
        }
        if self.arena.is_none() {
            self.resolve_arena()?;
        }

        let sizes = self.team_sizes();
        let ready =
            self.balancer.has_balanced_teams(&sizes) || self.selector.single_option_fallback();
        if !ready {
            return Err(SessionError::TeamsNotReady {
                team_a: sizes.team_a,
                team_b: sizes.team_b,
            });
        }

        // Instance the world before touching any session state so a host
        // failure leaves the lobby intact.
        let template = match self.arena.clone() {
            Some(t) => t,
            None => {
                return Err(SessionError::TeamsNotReady {
                    team_a: sizes.team_a,
                    team_b: sizes.team_b,
                })
            }
        };
        let handle = self.host.create_arena_instance(&template)?;
        self.arena_instance = Some(handle);

        self.assign_unplaced();

        self.scheduler.swap(Box::new(MatchTimer::new(
            self.config.timers.match_duration_secs,
        )));

        // Seed equipment schedules for everyone fighting, and the interval
        // caches silently (cold start: no buff/nerf broadcast).
        self.phase = Phase::InGame;
        for team in [TeamId::A, TeamId::B] {
            for id in self.team(team).members().to_vec() {
                self.distributor.schedule(id);
            }
            let size = self.team(team).len() as u32;
            let interval = self.distributor.interval_for(size, 0);
            self.team_mut(team).current_interval = Some(interval);
        }

        self.emit(SessionEvent::SessionStarted {
            arena: template.id.clone(),
        });
        self.host.broadcast(
            &self.name,
            &format!("Match started on {}", template.display_name),
        );
        info!(
            session = %self.name,
            arena = %template.id,
            team_a = self.team_a.len(),
            team_b = self.team_b.len(),
            "session started"
        );
        Ok(())
    }

    /// End combat with the given per-team outcome. Idempotent from the end
    /// phase: a second stop neither broadcasts nor produces another record.
    pub fn stop(&mut self, outcome: MatchOutcome) -> Result<Option<MatchRecord>, SessionError> {
        match self.phase {
            Phase::Lobby => {
                return Err(SessionError::WrongPhase {
                    op: "stop",
                    phase: self.phase,
                })
            }
            Phase::End => {
                debug!(session = %self.name, "stop on an already-ended session, ignoring");
                return Ok(None);
            }
            Phase::InGame => {}
        }

        let duration = self.elapsed_secs();
        self.distributor.cancel_all();

        self.team_a.result = Some(outcome.team_a);
        self.team_b.result = Some(outcome.team_b);

        let teams = [TeamId::A, TeamId::B]
            .into_iter()
            .map(|team| TeamRecord {
                team,
                result: outcome.for_team(team).unwrap_or(TeamResult::Draw),
                members: self.team(team).members().to_vec(),
            })
            .collect();

        // Everyone watches the results from the bench.
        let ids: Vec<Uuid> = self.participants.keys().copied().collect();
        for id in ids {
            let Some(p) = self.participants.get_mut(&id) else {
                continue;
            };
            let former = p.team;
            if former == Some(TeamId::Spectator) {
                continue;
            }
            p.team = Some(TeamId::Spectator);
            match former {
                Some(TeamId::A) => {
                    self.team_a.remove_member(id);
                }
                Some(TeamId::B) => {
                    self.team_b.remove_member(id);
                }
                _ => {}
            }
            self.spectators.add_member(id);
        }

        self.scheduler
            .swap(Box::new(EndTimer::new(self.config.timers.end_countdown_secs)));
        self.phase = Phase::End;

        let match_number = self.match_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.match_number = Some(match_number);
        if let Some(every) = self.config.restart_after_matches {
            if every > 0 && match_number % every == 0 {
                self.restart_pending = true;
                info!(session = %self.name, match_number, "scheduled restart flagged");
            }
        }

        let record = MatchRecord {
            session: self.name.clone(),
            arena: self
                .arena
                .as_ref()
                .map(|a| a.id.clone())
                .unwrap_or_default(),
            match_number,
            ended_at: Utc::now(),
            duration_secs: duration,
            teams,
        };

        self.emit(SessionEvent::MatchEnded {
            record: record.clone(),
        });
        self.host
            .broadcast(&self.name, &self.outcome_text(&outcome));
        info!(
            session = %self.name,
            match_number,
            duration_secs = duration,
            "session stopped"
        );
        Ok(Some(record))
    }

    /// Tear the session down: cancel every timer and schedule, then discard
    /// the arena instance. Always legal; safe to call repeatedly.
    pub fn reset(&mut self) {
        self.scheduler.stop();
        self.distributor.cancel_all();
        if let Some(handle) = self.arena_instance.take() {
            self.host.destroy_arena_instance(handle);
        }
        self.emit(SessionEvent::SessionReset);
        info!(session = %self.name, "session reset");
    }

    /// Advance the session by one scheduler tick. Phase-dispatched; returns
    /// a match record when this tick ended the match on the time limit.
    pub fn on_tick(&mut self) -> Option<MatchRecord> {
        match self.phase {
            Phase::Lobby => {
                self.tick_lobby();
                None
            }
            Phase::InGame => self.tick_ingame(),
            Phase::End => {
                self.tick_end();
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Tick handlers, one per phase
    // ------------------------------------------------------------------

    fn tick_lobby(&mut self) {
        match self.scheduler.tick() {
            Some(TimerTick::Running { remaining }) if ANNOUNCE_AT.contains(&remaining) => {
                self.emit(SessionEvent::Countdown {
                    phase: Phase::Lobby,
                    remaining,
                });
                self.host
                    .broadcast(&self.name, &format!("Match starts in {remaining}s"));
            }
            Some(TimerTick::Expired) => {
                if let Err(err) = self.start() {
                    warn!(session = %self.name, %err, "automatic start rejected, rewinding lobby");
                    self.emit(SessionEvent::OperationRejected {
                        participant: None,
                        reason: err.to_string(),
                    });
                    self.scheduler.swap(Box::new(LobbyTimer::new(
                        self.config.timers.lobby_countdown_secs,
                    )));
                    self.host
                        .broadcast(&self.name, "Waiting for more players...");
                }
            }
            _ => {}
        }
    }

    fn tick_ingame(&mut self) -> Option<MatchRecord> {
        let tick = self.scheduler.tick();

        if let Some(TimerTick::Running { remaining }) = tick {
            if ANNOUNCE_AT.contains(&remaining) {
                self.emit(SessionEvent::Countdown {
                    phase: Phase::InGame,
                    remaining,
                });
            }
        }

        // Equipment ticks observe the membership as mutated by everything
        // that ran earlier in this logical step.
        let elapsed = self.elapsed_secs();
        let roster: Vec<(Uuid, u32)> = [TeamId::A, TeamId::B]
            .into_iter()
            .flat_map(|team| {
                let size = self.team(team).len() as u32;
                self.team(team)
                    .members()
                    .iter()
                    .map(move |id| (*id, size))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (id, size) in roster {
            let dispatch = self.distributor.tick(id, size, elapsed, &mut self.rng);
            if let Some(dispatch) = dispatch {
                debug!(
                    session = %self.name,
                    participant = %id,
                    item = %dispatch.item_id,
                    "item dispatched"
                );
                self.emit(SessionEvent::ItemGranted {
                    participant: dispatch.participant,
                    item_id: dispatch.item_id,
                    kind: dispatch.kind,
                });
            }
        }

        if tick == Some(TimerTick::Expired) {
            self.host
                .broadcast(&self.name, "Time is up! The match ends in a draw");
            match self.stop(MatchOutcome::draw()) {
                Ok(record) => return record,
                Err(err) => warn!(session = %self.name, %err, "time-limit stop rejected"),
            }
        }
        None
    }

    fn tick_end(&mut self) {
        if self.scheduler.tick() == Some(TimerTick::Expired) {
            self.recycle_requested = true;
            self.emit(SessionEvent::RecycleRequested);
        }
    }

    // ------------------------------------------------------------------
    // Query surface
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn arena_id(&self) -> Option<&str> {
        self.arena.as_ref().map(|a| a.id.as_str())
    }

    pub fn vote_state(&self) -> VoteState {
        self.selector.vote_state()
    }

    pub fn vote_tally(&self) -> BTreeMap<String, usize> {
        self.selector.tally()
    }

    pub fn remaining_secs(&self) -> Option<u32> {
        self.scheduler.remaining_secs()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn participant_team(&self, id: Uuid) -> Option<TeamId> {
        self.participants.get(&id).and_then(|p| p.team)
    }

    pub fn team_members(&self, team: TeamId) -> &[Uuid] {
        self.team(team).members()
    }

    pub fn team_result(&self, team: TeamId) -> Option<TeamResult> {
        self.team(team).result
    }

    pub fn team_interval(&self, team: TeamId) -> Option<u32> {
        self.team(team).current_interval
    }

    pub fn match_number(&self) -> Option<u64> {
        self.match_number
    }

    pub fn is_restart_pending(&self) -> bool {
        self.restart_pending
    }

    pub fn is_recycle_requested(&self) -> bool {
        self.recycle_requested
    }

    /// Live equipment schedules, the post-reset leak check
    pub fn active_equipment_schedules(&self) -> usize {
        self.distributor.active_schedules()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn team(&self, id: TeamId) -> &Team {
        match id {
            TeamId::A => &self.team_a,
            TeamId::B => &self.team_b,
            TeamId::Spectator => &self.spectators,
        }
    }

    fn team_mut(&mut self, id: TeamId) -> &mut Team {
        match id {
            TeamId::A => &mut self.team_a,
            TeamId::B => &mut self.team_b,
            TeamId::Spectator => &mut self.spectators,
        }
    }

    fn team_sizes(&self) -> TeamSizes {
        TeamSizes {
            team_a: self.team_a.len(),
            team_b: self.team_b.len(),
            spectators: self.spectators.len(),
        }
    }

    /// Seconds of combat since the match timer was swapped in
    fn elapsed_secs(&self) -> u32 {
        if self.phase != Phase::InGame {
            return 0;
        }
        let remaining = self.scheduler.remaining_secs().unwrap_or(0);
        self.config.timers.match_duration_secs.saturating_sub(remaining)
    }

    /// Place everyone still unassigned; participants found offline at
    /// placement time get benched instead, aborting just their assignment.
    fn assign_unplaced(&mut self) {
        let unplaced: Vec<Uuid> = self
            .participants
            .values()
            .filter(|p| p.team.is_none())
            .map(|p| p.id)
            .collect();
        for id in unplaced {
            let team = if self.host.is_online(id) {
                self.balancer
                    .next_assignment_team(&self.team_sizes(), &mut self.rng)
            } else {
                warn!(session = %self.name, participant = %id, "offline at placement, benching");
                TeamId::Spectator
            };
            self.team_mut(team).add_member(id);
            if let Some(p) = self.participants.get_mut(&id) {
                p.team = Some(team);
            }
        }
    }

    /// Recompute a player team's equipment interval after a membership
    /// change, broadcasting the buff/nerf transition when the cached value
    /// moves. The very first computation stays silent.
    fn refresh_team_interval(&mut self, team_id: TeamId) {
        if !team_id.is_player() || self.phase != Phase::InGame {
            return;
        }
        let size = self.team(team_id).len();
        if size == 0 {
            self.team_mut(team_id).current_interval = None;
            return;
        }

        let interval = self.distributor.interval_for(size as u32, self.elapsed_secs());
        let previous = self.team(team_id).current_interval;
        self.team_mut(team_id).current_interval = Some(interval);

        match previous {
            Some(old) if interval < old => {
                self.emit(SessionEvent::TeamBuffed {
                    team: team_id,
                    interval_secs: interval,
                });
                self.host.broadcast(
                    &self.name,
                    &format!(
                        "{} equipment buffed: every {interval}s",
                        self.team(team_id).display_name
                    ),
                );
            }
            Some(old) if interval > old => {
                self.emit(SessionEvent::TeamNerfed {
                    team: team_id,
                    interval_secs: interval,
                });
                self.host.broadcast(
                    &self.name,
                    &format!(
                        "{} equipment nerfed: every {interval}s",
                        self.team(team_id).display_name
                    ),
                );
            }
            _ => {}
        }
    }

    fn outcome_text(&self, outcome: &MatchOutcome) -> String {
        match (outcome.team_a, outcome.team_b) {
            (TeamResult::Win, _) => format!("{} wins the match!", self.team_a.display_name),
            (_, TeamResult::Win) => format!("{} wins the match!", self.team_b.display_name),
            _ => "The match ends in a draw".to_string(),
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine; the channel is fan-out only.
        let _ = self.events.send(event);
    }
}
