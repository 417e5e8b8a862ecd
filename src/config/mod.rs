//! Lobby configuration - validated, strongly-typed structures
//!
//! The engine never performs string-path lookups into raw configuration.
//! An external loader parses whatever on-disk format it likes into these
//! structs; [`LobbyConfig::validate`] runs once at session construction and
//! rejects fatally broken lobbies before they can run a match.

use serde::{Deserialize, Serialize};

use crate::arena::SelectionMode;
use crate::equipment::ItemTemplate;

/// A point in the host world, used only for area-membership checks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Axis-aligned region enclosing a lobby's play space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub min: Position,
    pub max: Position,
}

impl Region {
    /// Inclusive containment check on all three axes
    pub fn contains(&self, p: &Position) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }
}

/// An arena template a session can be instanced from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaTemplate {
    /// Stable identifier, also the vote ballot key
    pub id: String,
    /// Human-readable name for broadcasts
    pub display_name: String,
}

/// Display styling for one of the two player teams
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamStyle {
    pub name: String,
    /// Color tag understood by the host's text renderer
    pub color: String,
}

impl TeamStyle {
    fn red() -> Self {
        Self {
            name: "Red".to_string(),
            color: "red".to_string(),
        }
    }

    fn blue() -> Self {
        Self {
            name: "Blue".to_string(),
            color: "blue".to_string(),
        }
    }
}

/// Team-balance tolerances
///
/// Switching is judged more leniently than match-start readiness, hence the
/// two distinct constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceConfig {
    /// Tolerance applied to explicit switch requests
    #[serde(default = "BalanceConfig::default_switch_tolerance")]
    pub switch_tolerance: f64,
    /// Tolerance applied to the start-readiness gate
    #[serde(default = "BalanceConfig::default_start_tolerance")]
    pub start_tolerance: f64,
}

impl BalanceConfig {
    fn default_switch_tolerance() -> f64 {
        0.45
    }

    fn default_start_tolerance() -> f64 {
        0.35
    }
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            switch_tolerance: Self::default_switch_tolerance(),
            start_tolerance: Self::default_start_tolerance(),
        }
    }
}

/// Countdown durations for each session phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Lobby countdown before an automatic start attempt
    pub lobby_countdown_secs: u32,
    /// Maximum match duration; expiry ends the match as a draw
    pub match_duration_secs: u32,
    /// Results screen / recycle countdown after the match ends
    pub end_countdown_secs: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            lobby_countdown_secs: 60,
            match_duration_secs: 600,
            end_countdown_secs: 10,
        }
    }
}

/// Equipment distribution tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentConfig {
    /// Seed for the very first countdown after spawn (plus one tick of grace)
    pub start_interval_secs: u32,
    /// Fallback when no team-size key applies
    pub default_interval_secs: u32,
    /// Fallback when no game-time key applies
    pub default_game_time_factor: f64,
    /// Sparse (team size, interval secs) pairs, ascending by size.
    /// Lookup takes the nearest key at or below the current team size.
    pub interval_by_team_size: Vec<(u32, u32)>,
    /// Sparse (elapsed secs, factor) pairs, ascending by elapsed time.
    /// Lookup takes the nearest key at or above the current elapsed time.
    pub factor_by_game_time: Vec<(u32, f64)>,
    /// Offensive item templates (the "primary" draw pool)
    pub offense_items: Vec<ItemTemplate>,
    /// Defensive/utility item templates (the "secondary" draw pool)
    pub utility_items: Vec<ItemTemplate>,
}

/// Full configuration for one lobby
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyConfig {
    /// Lobby name, also the session registry key
    pub name: String,
    /// Session boundary for spatial lookups
    pub region: Region,
    /// Configured arena templates (at least one)
    pub arenas: Vec<ArenaTemplate>,
    /// How the arena for a session is chosen
    pub selection: SelectionMode,
    #[serde(default)]
    pub timers: TimerConfig,
    #[serde(default)]
    pub balance: BalanceConfig,
    pub equipment: EquipmentConfig,
    /// Flag the session for a scheduled instance restart every N matches
    #[serde(default)]
    pub restart_after_matches: Option<u64>,
    #[serde(default = "TeamStyle::red")]
    pub team_a: TeamStyle,
    #[serde(default = "TeamStyle::blue")]
    pub team_b: TeamStyle,
}

impl LobbyConfig {
    /// Validate the lobby once at construction time.
    ///
    /// Any error here is fatal for the lobby: a session built from a broken
    /// configuration must refuse to run rather than silently misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arenas.is_empty() {
            return Err(ConfigError::NoArenas {
                lobby: self.name.clone(),
            });
        }
        for (i, arena) in self.arenas.iter().enumerate() {
            if arena.id.is_empty() {
                return Err(ConfigError::EmptyArenaId { index: i });
            }
            if self.arenas[..i].iter().any(|a| a.id == arena.id) {
                return Err(ConfigError::DuplicateArena {
                    id: arena.id.clone(),
                });
            }
        }

        if self.timers.lobby_countdown_secs == 0
            || self.timers.match_duration_secs == 0
            || self.timers.end_countdown_secs == 0
        {
            return Err(ConfigError::ZeroDuration {
                lobby: self.name.clone(),
            });
        }

        for (label, tolerance) in [
            ("switch_tolerance", self.balance.switch_tolerance),
            ("start_tolerance", self.balance.start_tolerance),
        ] {
            if !(tolerance > 0.0 && tolerance <= 1.0) {
                return Err(ConfigError::InvalidTolerance {
                    field: label,
                    value: tolerance,
                });
            }
        }

        self.validate_equipment()
    }

    fn validate_equipment(&self) -> Result<(), ConfigError> {
        let eq = &self.equipment;

        for (kind, items) in [
            ("offense", &eq.offense_items),
            ("utility", &eq.utility_items),
        ] {
            if items.is_empty() {
                return Err(ConfigError::EmptyItemList {
                    lobby: self.name.clone(),
                    kind,
                });
            }
            if let Some(item) = items.iter().find(|t| t.occurrence == 0) {
                return Err(ConfigError::ZeroOccurrence {
                    item: item.id.clone(),
                });
            }
        }

        if eq.default_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration {
                lobby: self.name.clone(),
            });
        }
        if eq.default_game_time_factor <= 0.0 {
            return Err(ConfigError::InvalidFactor {
                value: eq.default_game_time_factor,
            });
        }

        if !is_strictly_ascending(eq.interval_by_team_size.iter().map(|(k, _)| *k)) {
            return Err(ConfigError::UnsortedTable {
                table: "interval_by_team_size",
            });
        }
        if eq.interval_by_team_size.iter().any(|(_, v)| *v == 0) {
            return Err(ConfigError::ZeroDuration {
                lobby: self.name.clone(),
            });
        }
        if !is_strictly_ascending(eq.factor_by_game_time.iter().map(|(k, _)| *k)) {
            return Err(ConfigError::UnsortedTable {
                table: "factor_by_game_time",
            });
        }
        if let Some((_, f)) = eq.factor_by_game_time.iter().find(|(_, f)| *f <= 0.0) {
            return Err(ConfigError::InvalidFactor { value: *f });
        }

        Ok(())
    }

    /// Look up an arena template by id
    pub fn arena(&self, id: &str) -> Option<&ArenaTemplate> {
        self.arenas.iter().find(|a| a.id == id)
    }

    /// Arena ids in configured order
    pub fn arena_ids(&self) -> Vec<String> {
        self.arenas.iter().map(|a| a.id.clone()).collect()
    }
}

fn is_strictly_ascending(keys: impl Iterator<Item = u32>) -> bool {
    let mut prev: Option<u32> = None;
    for k in keys {
        if let Some(p) = prev {
            if k <= p {
                return false;
            }
        }
        prev = Some(k);
    }
    true
}

/// Configuration errors, all fatal for the lobby they belong to
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("lobby '{lobby}' has no arenas configured")]
    NoArenas { lobby: String },

    #[error("arena at index {index} has an empty id")]
    EmptyArenaId { index: usize },

    #[error("duplicate arena id '{id}'")]
    DuplicateArena { id: String },

    #[error("lobby '{lobby}' configures a zero-length duration or interval")]
    ZeroDuration { lobby: String },

    #[error("{field} must be within (0, 1], got {value}")]
    InvalidTolerance { field: &'static str, value: f64 },

    #[error("lobby '{lobby}' has an empty {kind} item list")]
    EmptyItemList { lobby: String, kind: &'static str },

    #[error("item template '{item}' has zero occurrence weight")]
    ZeroOccurrence { item: String },

    #[error("game-time factor must be positive, got {value}")]
    InvalidFactor { value: f64 },

    #[error("{table} keys must be strictly ascending")]
    UnsortedTable { table: &'static str },

    #[error("a lobby named '{name}' is already registered")]
    DuplicateLobby { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::lobby_config;

    #[test]
    fn valid_config_passes() {
        assert!(lobby_config().validate().is_ok());
    }

    #[test]
    fn zero_arenas_is_fatal() {
        let mut cfg = lobby_config();
        cfg.arenas.clear();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NoArenas { .. })
        ));
    }

    #[test]
    fn duplicate_arena_id_is_fatal() {
        let mut cfg = lobby_config();
        let dup = cfg.arenas[0].clone();
        cfg.arenas.push(dup);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DuplicateArena { .. })
        ));
    }

    #[test]
    fn empty_item_list_is_fatal() {
        let mut cfg = lobby_config();
        cfg.equipment.utility_items.clear();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::EmptyItemList { kind: "utility", .. })
        ));
    }

    #[test]
    fn unsorted_interval_table_is_fatal() {
        let mut cfg = lobby_config();
        cfg.equipment.interval_by_team_size = vec![(4, 20), (2, 30)];
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::UnsortedTable {
                table: "interval_by_team_size"
            })
        ));
    }

    #[test]
    fn region_containment_is_inclusive() {
        let cfg = lobby_config();
        let inside = Position {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        };
        let outside = Position {
            x: 1e6,
            y: 0.0,
            z: 0.0,
        };
        assert!(cfg.region.contains(&inside));
        assert!(!cfg.region.contains(&outside));
    }
}
