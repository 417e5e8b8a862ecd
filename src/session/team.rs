//! Teams and participant membership records

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TeamStyle;
use crate::util::time::unix_millis;

/// The two competing sides plus the spectator bench
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamId {
    A,
    B,
    Spectator,
}

impl TeamId {
    /// The opposing player team. Total for the two player teams; the
    /// spectator bench has no enemy.
    pub fn enemy(self) -> Option<TeamId> {
        match self {
            TeamId::A => Some(TeamId::B),
            TeamId::B => Some(TeamId::A),
            TeamId::Spectator => None,
        }
    }

    pub fn is_player(self) -> bool {
        !matches!(self, TeamId::Spectator)
    }
}

/// Per-team match result tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamResult {
    Win,
    Lose,
    Draw,
}

/// One side's roster and result state within a session
#[derive(Debug, Clone)]
pub struct Team {
    pub id: TeamId,
    pub display_name: String,
    /// Color tag understood by the host's text renderer
    pub color: String,
    /// Members in join order
    members: Vec<Uuid>,
    pub result: Option<TeamResult>,
    /// Last computed equipment interval, compared on membership changes to
    /// detect buff/nerf transitions. None until the first (silent) compute.
    pub current_interval: Option<u32>,
}

impl Team {
    pub fn new(id: TeamId, style: &TeamStyle) -> Self {
        Self {
            id,
            display_name: style.name.clone(),
            color: style.color.clone(),
            members: Vec::new(),
            result: None,
            current_interval: None,
        }
    }

    pub fn spectators() -> Self {
        Self {
            id: TeamId::Spectator,
            display_name: "Spectators".to_string(),
            color: "gray".to_string(),
            members: Vec::new(),
            result: None,
            current_interval: None,
        }
    }

    pub fn add_member(&mut self, id: Uuid) {
        if !self.members.contains(&id) {
            self.members.push(id);
        }
    }

    pub fn remove_member(&mut self, id: Uuid) -> bool {
        let before = self.members.len();
        self.members.retain(|m| *m != id);
        self.members.len() != before
    }

    pub fn members(&self) -> &[Uuid] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.members.contains(&id)
    }
}

/// A player's membership record inside one session
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: Uuid,
    pub display_name: String,
    /// None until the balancer (or an explicit request) places them
    pub team: Option<TeamId>,
    pub joined_at_millis: u64,
}

impl Participant {
    pub fn new(id: Uuid, display_name: String) -> Self {
        Self {
            id,
            display_name,
            team: None,
            joined_at_millis: unix_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enemy_is_total_for_player_teams() {
        assert_eq!(TeamId::A.enemy(), Some(TeamId::B));
        assert_eq!(TeamId::B.enemy(), Some(TeamId::A));
        assert_eq!(TeamId::Spectator.enemy(), None);
    }

    #[test]
    fn membership_is_deduplicated_and_ordered() {
        let style = TeamStyle {
            name: "Red".to_string(),
            color: "red".to_string(),
        };
        let mut team = Team::new(TeamId::A, &style);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        team.add_member(first);
        team.add_member(second);
        team.add_member(first);
        assert_eq!(team.members(), &[first, second]);

        assert!(team.remove_member(first));
        assert!(!team.remove_member(first));
        assert_eq!(team.len(), 1);
    }
}
