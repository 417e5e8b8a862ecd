//! Session types: phases, outcomes, events, records, errors

pub mod machine;
pub mod registry;
pub mod team;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::arena::{VoteError, VoteOutcome};
use crate::balance::SwitchDenied;
use crate::equipment::ItemKind;
use crate::host::HostError;
use team::{TeamId, TeamResult};

/// Coarse session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lobby,
    InGame,
    End,
}

/// Per-team outcome handed to `stop` by whatever gameplay event ended the
/// match (last team standing, boundary breach, time limit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchOutcome {
    pub team_a: TeamResult,
    pub team_b: TeamResult,
}

impl MatchOutcome {
    pub fn draw() -> Self {
        Self {
            team_a: TeamResult::Draw,
            team_b: TeamResult::Draw,
        }
    }

    /// A win for `winner`, a loss for its enemy
    pub fn win_for(winner: TeamId) -> Self {
        match winner {
            TeamId::A => Self {
                team_a: TeamResult::Win,
                team_b: TeamResult::Lose,
            },
            _ => Self {
                team_a: TeamResult::Lose,
                team_b: TeamResult::Win,
            },
        }
    }

    pub fn for_team(&self, team: TeamId) -> Option<TeamResult> {
        match team {
            TeamId::A => Some(self.team_a),
            TeamId::B => Some(self.team_b),
            TeamId::Spectator => None,
        }
    }
}

/// One team's slice of a persisted match record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRecord {
    pub team: TeamId,
    pub result: TeamResult,
    pub members: Vec<Uuid>,
}

/// Everything the host needs to persist about a finished match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub session: String,
    pub arena: String,
    /// Value of the global match counter after this match
    pub match_number: u64,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: u32,
    pub teams: Vec<TeamRecord>,
}

/// Notifications raised by a session, consumed by the host layers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Countdown checkpoint worth announcing
    Countdown { phase: Phase, remaining: u32 },
    ParticipantJoined { id: Uuid, team: TeamId },
    ParticipantLeft { id: Uuid },
    TeamSwitched {
        id: Uuid,
        from: Option<TeamId>,
        to: TeamId,
    },
    VoteCast {
        id: Uuid,
        arena: String,
        outcome: VoteOutcome,
    },
    /// Voting resolved to this arena
    VoteClosed { arena: String },
    SessionStarted { arena: String },
    ItemGranted {
        participant: Uuid,
        item_id: String,
        kind: ItemKind,
    },
    /// Equipment cadence sped up for this team (interval dropped)
    TeamBuffed { team: TeamId, interval_secs: u32 },
    /// Equipment cadence slowed down for this team (interval rose)
    TeamNerfed { team: TeamId, interval_secs: u32 },
    MatchEnded { record: MatchRecord },
    SessionReset,
    /// The results countdown ran out; the registry should recycle
    RecycleRequested,
    /// A caller-visible rejection, mirrored for observers
    OperationRejected {
        participant: Option<Uuid>,
        reason: String,
    },
}

/// Rejected operations, each with a caller-visible reason
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("operation '{op}' is not legal in phase {phase:?}")]
    WrongPhase { op: &'static str, phase: Phase },

    #[error("the arena for this session is already set")]
    ArenaAlreadySet,

    #[error("participant {0} is already in this session")]
    AlreadyJoined(Uuid),

    #[error("participant {0} is not in this session")]
    UnknownParticipant(Uuid),

    #[error("participant {0} went offline mid-operation")]
    ParticipantOffline(Uuid),

    #[error("already on team {0:?}")]
    AlreadyOnTeam(TeamId),

    #[error("teams are not ready to start ({team_a} vs {team_b})")]
    TeamsNotReady { team_a: usize, team_b: usize },

    #[error(transparent)]
    SwitchDenied(#[from] SwitchDenied),

    #[error(transparent)]
    Vote(#[from] VoteError),

    #[error(transparent)]
    Host(#[from] HostError),
}
