//! Arena selection - first/cycle/vote procedures
//!
//! Exactly one procedure runs per lobby. `First` and `Cycle` are fully
//! deterministic; `Vote` collects one active ballot per participant and
//! resolves to the highest tally, ties broken by lowest arena id so the
//! outcome never depends on map iteration order.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// How a lobby chooses the arena for each session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Always the first configured arena
    First,
    /// Round-robin through the configured list, index persisted per lobby
    Cycle,
    /// Participant ballot, opened when the lobby is created
    Vote,
}

/// Ballot lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VoteState {
    /// No ballot for this lobby (non-vote modes)
    NotOpen,
    /// Ballots are being accepted
    Open,
    /// Voting resolved; further ballots are rejected
    Finished,
}

/// What happened to a cast ballot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum VoteOutcome {
    /// First ballot from this participant
    Recorded,
    /// Replaced the participant's previous choice
    Changed { previous: String },
    /// Same arena as before; tally untouched
    Unchanged,
}

/// Ballot rejections, each with a distinct caller-visible reason
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoteError {
    #[error("voting is not open in this lobby")]
    NotOpen,

    #[error("voting has already finished")]
    Closed,

    #[error("unknown arena '{0}'")]
    UnknownArena(String),
}

/// Per-session arena selection state
#[derive(Debug, Clone)]
pub struct ArenaSelector {
    mode: SelectionMode,
    arenas: Vec<String>,
    /// Round-robin position, owned by the lobby entry and passed in
    cycle_index: usize,
    ballots: HashMap<Uuid, String>,
    state: VoteState,
    chosen: Option<String>,
}

impl ArenaSelector {
    /// Build the selector for a fresh session. `arenas` is the configured
    /// id list (validated non-empty upstream); `cycle_index` is the lobby's
    /// persisted round-robin position, ignored outside `Cycle` mode.
    pub fn new(mode: SelectionMode, arenas: Vec<String>, cycle_index: usize) -> Self {
        let state = match mode {
            SelectionMode::Vote if arenas.len() > 1 => VoteState::Open,
            SelectionMode::Vote => {
                warn!("only one arena configured, skipping the vote");
                VoteState::Finished
            }
            _ => VoteState::NotOpen,
        };

        let mut selector = Self {
            mode,
            arenas,
            cycle_index,
            ballots: HashMap::new(),
            state,
            chosen: None,
        };
        // A skipped vote resolves immediately to the lone option.
        if selector.mode == SelectionMode::Vote && selector.state == VoteState::Finished {
            selector.chosen = selector.arenas.first().cloned();
        }
        selector
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    pub fn vote_state(&self) -> VoteState {
        self.state
    }

    /// The resolved arena id, if selection has happened
    pub fn chosen(&self) -> Option<&str> {
        self.chosen.as_deref()
    }

    /// True when a `Vote` lobby had only a single configured option and the
    /// ballot was skipped entirely.
    pub fn single_option_fallback(&self) -> bool {
        self.mode == SelectionMode::Vote && self.arenas.len() == 1
    }

    /// Record one participant's ballot. One person holds one active vote;
    /// voting again for a different arena overwrites, re-voting for the same
    /// arena is reported back as a no-op.
    pub fn cast_vote(&mut self, voter: Uuid, arena: &str) -> Result<VoteOutcome, VoteError> {
        match self.state {
            VoteState::NotOpen => return Err(VoteError::NotOpen),
            VoteState::Finished => return Err(VoteError::Closed),
            VoteState::Open => {}
        }
        if !self.arenas.iter().any(|a| a == arena) {
            return Err(VoteError::UnknownArena(arena.to_string()));
        }

        match self.ballots.insert(voter, arena.to_string()) {
            None => Ok(VoteOutcome::Recorded),
            Some(previous) if previous == arena => Ok(VoteOutcome::Unchanged),
            Some(previous) => Ok(VoteOutcome::Changed { previous }),
        }
    }

    /// Retract a leaver's ballot, if any
    pub fn remove_voter(&mut self, voter: Uuid) {
        self.ballots.remove(&voter);
    }

    /// Current tally, keyed ascending by arena id
    pub fn tally(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for arena in self.ballots.values() {
            *counts.entry(arena.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn voter_count(&self) -> usize {
        self.ballots.len()
    }

    /// Resolve the selection. Idempotent: once resolved, the same arena id
    /// comes back on every call.
    pub fn resolve(&mut self) -> &str {
        if self.chosen.is_none() {
            let picked = match self.mode {
                SelectionMode::First => self.arenas[0].clone(),
                SelectionMode::Cycle => self.arenas[self.cycle_index % self.arenas.len()].clone(),
                SelectionMode::Vote => self.resolve_vote(),
            };
            self.chosen = Some(picked);
            // Only an actual ballot closes; non-vote modes never open one,
            // so their state stays NotOpen after resolution.
            if self.mode == SelectionMode::Vote {
                self.state = VoteState::Finished;
            }
            self.ballots.clear();
        }
        self.chosen.as_deref().unwrap_or(&self.arenas[0])
    }

    /// Highest tally wins; the ascending-by-id tally iteration makes ties
    /// fall to the lowest arena id. Zero ballots default to the first
    /// configured arena.
    fn resolve_vote(&self) -> String {
        let tally = self.tally();
        let mut winner: Option<(&str, usize)> = None;
        for (arena, count) in &tally {
            if winner.map_or(true, |(_, best)| *count > best) {
                winner = Some((arena, *count));
            }
        }
        winner
            .map(|(arena, _)| arena.to_string())
            .unwrap_or_else(|| self.arenas[0].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arenas() -> Vec<String> {
        vec!["alpha".to_string(), "bravo".to_string(), "delta".to_string()]
    }

    fn voter() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn first_mode_picks_first_arena() {
        let mut s = ArenaSelector::new(SelectionMode::First, arenas(), 0);
        assert_eq!(s.resolve(), "alpha");
    }

    #[test]
    fn cycle_mode_uses_persisted_index() {
        let mut s = ArenaSelector::new(SelectionMode::Cycle, arenas(), 1);
        assert_eq!(s.resolve(), "bravo");
        let mut wrapped = ArenaSelector::new(SelectionMode::Cycle, arenas(), 5);
        assert_eq!(wrapped.resolve(), "delta");
    }

    #[test]
    fn votes_rejected_outside_vote_mode() {
        let mut s = ArenaSelector::new(SelectionMode::First, arenas(), 0);
        assert_eq!(s.cast_vote(voter(), "alpha"), Err(VoteError::NotOpen));
    }

    #[test]
    fn revote_same_arena_is_reported_noop() {
        let mut s = ArenaSelector::new(SelectionMode::Vote, arenas(), 0);
        let v = voter();
        assert_eq!(s.cast_vote(v, "alpha"), Ok(VoteOutcome::Recorded));
        let before = s.tally();
        assert_eq!(s.cast_vote(v, "alpha"), Ok(VoteOutcome::Unchanged));
        assert_eq!(s.tally(), before);
    }

    #[test]
    fn revote_different_arena_moves_the_ballot() {
        let mut s = ArenaSelector::new(SelectionMode::Vote, arenas(), 0);
        let v = voter();
        let other = voter();
        s.cast_vote(v, "alpha").unwrap();
        s.cast_vote(other, "alpha").unwrap();
        assert_eq!(
            s.cast_vote(v, "bravo"),
            Ok(VoteOutcome::Changed {
                previous: "alpha".to_string()
            })
        );

        let tally = s.tally();
        assert_eq!(tally.get("alpha"), Some(&1));
        assert_eq!(tally.get("bravo"), Some(&1));
        // One active vote per person: tally sum equals distinct voters.
        assert_eq!(tally.values().sum::<usize>(), s.voter_count());
    }

    #[test]
    fn unknown_arena_is_rejected() {
        let mut s = ArenaSelector::new(SelectionMode::Vote, arenas(), 0);
        assert_eq!(
            s.cast_vote(voter(), "nope"),
            Err(VoteError::UnknownArena("nope".to_string()))
        );
    }

    #[test]
    fn majority_wins() {
        let mut s = ArenaSelector::new(SelectionMode::Vote, arenas(), 0);
        s.cast_vote(voter(), "bravo").unwrap();
        s.cast_vote(voter(), "bravo").unwrap();
        s.cast_vote(voter(), "alpha").unwrap();
        assert_eq!(s.resolve(), "bravo");
    }

    #[test]
    fn tie_breaks_to_lowest_arena_id() {
        let mut s = ArenaSelector::new(SelectionMode::Vote, arenas(), 0);
        s.cast_vote(voter(), "delta").unwrap();
        s.cast_vote(voter(), "bravo").unwrap();
        assert_eq!(s.resolve(), "bravo");
    }

    #[test]
    fn zero_ballots_default_to_first_arena() {
        let mut s = ArenaSelector::new(SelectionMode::Vote, arenas(), 0);
        assert_eq!(s.resolve(), "alpha");
    }

    #[test]
    fn votes_after_resolution_get_closed_not_notopen() {
        let mut s = ArenaSelector::new(SelectionMode::Vote, arenas(), 0);
        s.resolve();
        assert_eq!(s.cast_vote(voter(), "alpha"), Err(VoteError::Closed));
    }

    #[test]
    fn single_arena_vote_is_skipped() {
        let s = ArenaSelector::new(SelectionMode::Vote, vec!["only".to_string()], 0);
        assert_eq!(s.vote_state(), VoteState::Finished);
        assert_eq!(s.chosen(), Some("only"));
        assert!(s.single_option_fallback());
    }

    #[test]
    fn non_vote_resolution_never_opens_a_ballot() {
        for mode in [SelectionMode::First, SelectionMode::Cycle] {
            let mut s = ArenaSelector::new(mode, arenas(), 0);
            s.resolve();
            assert_eq!(s.vote_state(), VoteState::NotOpen);
            assert_eq!(s.cast_vote(voter(), "alpha"), Err(VoteError::NotOpen));
        }
    }

    #[test]
    fn resolve_is_idempotent() {
        let mut s = ArenaSelector::new(SelectionMode::Vote, arenas(), 0);
        s.cast_vote(voter(), "delta").unwrap();
        assert_eq!(s.resolve(), "delta");
        assert_eq!(s.resolve(), "delta");
    }
}
