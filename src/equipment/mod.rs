//! Weighted equipment distribution
//!
//! Each active participant carries a countdown that ticks once per scheduler
//! tick. When it runs out one item is dispatched and the countdown reseeds
//! from two sparse tables: interval keyed by the participant's current team
//! size (nearest key at or below) and a scaling factor keyed by elapsed match
//! time (nearest key at or above). The asymmetry is deliberate and tested.
//!
//! Weighted draws use the interval-bucket technique: the configured
//! occurrence weights carve `[0, total)` into disjoint integer sub-intervals
//! built once per template set, so a draw is a single uniform integer plus a
//! partition-point lookup.

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EquipmentConfig;

/// Which draw pool an item came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Primary pool: offensive items
    Offense,
    /// Secondary pool: defensive/utility items
    Utility,
}

/// One configured item with its occurrence weight
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemTemplate {
    pub id: String,
    /// Relative draw weight; the share of `[0, total)` this item owns
    pub occurrence: u32,
}

/// Disjoint integer sub-intervals spanning `[0, total)`, one per template
#[derive(Debug, Clone)]
pub struct WeightedBuckets {
    /// Exclusive upper bound of each template's sub-interval, ascending
    bounds: Vec<u32>,
    total: u32,
}

impl WeightedBuckets {
    /// Build buckets from a template list. Callers validate that the list is
    /// non-empty with positive occurrences; an all-zero total would make the
    /// draw range empty.
    pub fn build(templates: &[ItemTemplate]) -> Self {
        let mut bounds = Vec::with_capacity(templates.len());
        let mut total = 0u32;
        for t in templates {
            total += t.occurrence;
            bounds.push(total);
        }
        Self { bounds, total }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Draw one template index: a uniform integer in `[0, total)` selects the
    /// owning sub-interval.
    pub fn draw(&self, rng: &mut impl Rng) -> usize {
        let roll = rng.gen_range(0..self.total);
        self.bounds.partition_point(|&end| end <= roll)
    }
}

/// One dispatched item plus the countdown chosen for the next one
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemDispatch {
    pub participant: Uuid,
    pub item_id: String,
    pub kind: ItemKind,
    pub next_interval_secs: u32,
}

/// Per-participant distribution schedule
#[derive(Debug, Clone)]
struct Schedule {
    countdown: i64,
    /// Primary draws since the last secondary; two primaries earn a secondary
    primary_streak: u8,
}

/// Per-session weighted random item scheduler
#[derive(Debug, Clone)]
pub struct EquipmentDistributor {
    offense_items: Vec<ItemTemplate>,
    offense_buckets: WeightedBuckets,
    utility_items: Vec<ItemTemplate>,
    utility_buckets: WeightedBuckets,

    start_interval_secs: u32,
    default_interval_secs: u32,
    default_game_time_factor: f64,
    interval_by_team_size: Vec<(u32, u32)>,
    factor_by_game_time: Vec<(u32, f64)>,
    /// Upper bound for the game-time walk (the match duration)
    max_game_time_secs: u32,

    schedules: HashMap<Uuid, Schedule>,
}

impl EquipmentDistributor {
    pub fn new(config: &EquipmentConfig, match_duration_secs: u32) -> Self {
        Self {
            offense_items: config.offense_items.clone(),
            offense_buckets: WeightedBuckets::build(&config.offense_items),
            utility_items: config.utility_items.clone(),
            utility_buckets: WeightedBuckets::build(&config.utility_items),
            start_interval_secs: config.start_interval_secs,
            default_interval_secs: config.default_interval_secs,
            default_game_time_factor: config.default_game_time_factor,
            interval_by_team_size: config.interval_by_team_size.clone(),
            factor_by_game_time: config.factor_by_game_time.clone(),
            max_game_time_secs: match_duration_secs,
            schedules: HashMap::new(),
        }
    }

    /// Start (or restart, on respawn) a participant's schedule. The extra
    /// tick of grace keeps spawn and the first decrement from coinciding.
    pub fn schedule(&mut self, participant: Uuid) {
        self.schedules.insert(
            participant,
            Schedule {
                countdown: i64::from(self.start_interval_secs) + 1,
                primary_streak: 0,
            },
        );
    }

    /// Cancel a participant's schedule. Idempotent: cancelling twice, or
    /// cancelling someone never scheduled, is safe.
    pub fn cancel(&mut self, participant: Uuid) {
        self.schedules.remove(&participant);
    }

    /// Cancel every schedule (session end / reset)
    pub fn cancel_all(&mut self) {
        self.schedules.clear();
    }

    /// Live schedule count, the leak-check surface
    pub fn active_schedules(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_scheduled(&self, participant: Uuid) -> bool {
        self.schedules.contains_key(&participant)
    }

    /// The countdown a fresh dispatch would reseed to, given a team size and
    /// elapsed match time. Also used by the buff/nerf comparison on
    /// membership changes.
    pub fn interval_for(&self, team_size: u32, elapsed_secs: u32) -> u32 {
        let base = self.interval_by_team_size(team_size);
        let factor = self.factor_by_game_time(elapsed_secs);
        let scaled = (f64::from(base) * factor).ceil();
        (scaled as u32).max(1)
    }

    /// Nearest configured key at or below the team size; sparse sizes fall
    /// through to the next smaller entry, then the default.
    fn interval_by_team_size(&self, team_size: u32) -> u32 {
        let idx = self
            .interval_by_team_size
            .partition_point(|(size, _)| *size <= team_size);
        if idx == 0 {
            self.default_interval_secs
        } else {
            self.interval_by_team_size[idx - 1].1
        }
    }

    /// Nearest configured key at or above the elapsed time, bounded by the
    /// match duration; past the last checkpoint the default applies.
    fn factor_by_game_time(&self, elapsed_secs: u32) -> f64 {
        self.factor_by_game_time
            .iter()
            .find(|(at, _)| *at >= elapsed_secs && *at <= self.max_game_time_secs)
            .map(|(_, factor)| *factor)
            .unwrap_or(self.default_game_time_factor)
    }

    /// Advance one participant's countdown by one tick, dispatching an item
    /// when it runs out.
    pub fn tick(
        &mut self,
        participant: Uuid,
        team_size: u32,
        elapsed_secs: u32,
        rng: &mut impl Rng,
    ) -> Option<ItemDispatch> {
        // 2:1 cadence: two primary (offense) draws, then one secondary.
        let secondary_due = {
            let schedule = self.schedules.get_mut(&participant)?;
            schedule.countdown -= 1;
            if schedule.countdown > 0 {
                return None;
            }
            if schedule.primary_streak < 2 {
                schedule.primary_streak += 1;
                false
            } else {
                schedule.primary_streak = 0;
                true
            }
        };

        let (kind, item_id) = if secondary_due {
            let idx = self.utility_buckets.draw(rng);
            (ItemKind::Utility, self.utility_items[idx].id.clone())
        } else {
            let idx = self.offense_buckets.draw(rng);
            (ItemKind::Offense, self.offense_items[idx].id.clone())
        };

        let next = self.interval_for(team_size, elapsed_secs);
        if let Some(schedule) = self.schedules.get_mut(&participant) {
            schedule.countdown = i64::from(next);
        }

        Some(ItemDispatch {
            participant,
            item_id,
            kind,
            next_interval_secs: next,
        })
    }
}
