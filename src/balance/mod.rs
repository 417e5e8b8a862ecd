//! Team balancing - pure size arithmetic, no session state
//!
//! Two pipelines share this logic: automatic placement of unassigned joiners
//! and explicit switch requests. Switch requests are judged against the
//! *post-switch* sizes because a single mover changes both rosters at once,
//! which matters a lot on small teams.

use rand::Rng;
use serde::Serialize;

use crate::config::BalanceConfig;
use crate::session::team::TeamId;

/// Current roster sizes, snapshot at decision time
#[derive(Debug, Clone, Copy, Default)]
pub struct TeamSizes {
    pub team_a: usize,
    pub team_b: usize,
    pub spectators: usize,
}

impl TeamSizes {
    pub fn of(&self, team: TeamId) -> usize {
        match team {
            TeamId::A => self.team_a,
            TeamId::B => self.team_b,
            TeamId::Spectator => self.spectators,
        }
    }
}

/// Why a switch request was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum SwitchDenied {
    #[error("leaving would empty your team while the enemy still has players")]
    WouldEmptyOwnTeam,

    #[error("joining that team would leave its enemy empty")]
    WouldLeaveEnemyEmpty,

    #[error("teams would become too uneven (difference {diff}, allowed {max_diff})")]
    Unbalanced { diff: usize, max_diff: usize },
}

/// Evaluates join/switch/start decisions over two opposing team sizes
#[derive(Debug, Clone)]
pub struct TeamBalancer {
    switch_tolerance: f64,
    start_tolerance: f64,
}

impl TeamBalancer {
    pub fn new(config: &BalanceConfig) -> Self {
        Self {
            switch_tolerance: config.switch_tolerance,
            start_tolerance: config.start_tolerance,
        }
    }

    /// Pick the team an unassigned participant should be placed on: the
    /// strictly smaller side, or a fair coin flip when sizes are equal.
    pub fn next_assignment_team(&self, sizes: &TeamSizes, rng: &mut impl Rng) -> TeamId {
        if sizes.team_a < sizes.team_b {
            TeamId::A
        } else if sizes.team_b < sizes.team_a {
            TeamId::B
        } else if rng.gen_bool(0.5) {
            TeamId::A
        } else {
            TeamId::B
        }
    }

    /// Decide whether an explicit switch request keeps the match fair.
    ///
    /// `current` is `TeamId::Spectator` both for spectators and for
    /// participants not yet assigned anywhere; neither affects player-team
    /// sizes when they depart.
    pub fn is_valid_switch(
        &self,
        current: TeamId,
        target: TeamId,
        sizes: &TeamSizes,
    ) -> Result<(), SwitchDenied> {
        // Moving to the bench is always allowed.
        if target == TeamId::Spectator {
            return Ok(());
        }
        let Some(enemy) = target.enemy() else {
            return Ok(());
        };

        // Anti-empty-team: a player team may not be abandoned down to zero
        // while the side being joined already has members.
        if current.is_player() && sizes.of(current) <= 1 && sizes.of(target) >= 1 {
            return Err(SwitchDenied::WouldEmptyOwnTeam);
        }

        // A spectator may not pile onto a team whose enemy has nobody.
        if !current.is_player() && sizes.of(enemy) == 0 {
            return Err(SwitchDenied::WouldLeaveEnemyEmpty);
        }

        // Pre-simulate the post-switch rosters before judging the gap.
        let target_after = sizes.of(target) + 1;
        let enemy_after = if current.is_player() {
            sizes.of(enemy).saturating_sub(1)
        } else {
            sizes.of(enemy)
        };

        let diff = target_after.abs_diff(enemy_after);
        let max_diff = max_allowed_diff(self.switch_tolerance, target_after.max(enemy_after));
        if diff <= max_diff {
            Ok(())
        } else {
            Err(SwitchDenied::Unbalanced { diff, max_diff })
        }
    }

    /// Start-readiness gate: both teams populated and within the (stricter)
    /// start tolerance of each other.
    pub fn has_balanced_teams(&self, sizes: &TeamSizes) -> bool {
        if sizes.team_a == 0 || sizes.team_b == 0 {
            return false;
        }
        let diff = sizes.team_a.abs_diff(sizes.team_b);
        diff <= max_allowed_diff(self.start_tolerance, sizes.team_a.max(sizes.team_b))
    }
}

impl Default for TeamBalancer {
    fn default() -> Self {
        Self::new(&BalanceConfig::default())
    }
}

/// Largest tolerated size difference for the given larger-team size.
/// Never below one: a single-player gap is always acceptable.
fn max_allowed_diff(tolerance: f64, larger: usize) -> usize {
    let scaled = (tolerance * larger as f64).round() as usize;
    scaled.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sizes(a: usize, b: usize) -> TeamSizes {
        TeamSizes {
            team_a: a,
            team_b: b,
            spectators: 0,
        }
    }

    #[test]
    fn assignment_prefers_smaller_team() {
        let balancer = TeamBalancer::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            balancer.next_assignment_team(&sizes(2, 5), &mut rng),
            TeamId::A
        );
        assert_eq!(
            balancer.next_assignment_team(&sizes(7, 3), &mut rng),
            TeamId::B
        );
    }

    #[test]
    fn equal_sizes_split_roughly_fifty_fifty() {
        let balancer = TeamBalancer::default();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let trials = 10_000;
        let a_picks = (0..trials)
            .filter(|_| balancer.next_assignment_team(&sizes(4, 4), &mut rng) == TeamId::A)
            .count();
        // Seeded, so the exact count is stable; assert a tight band around 50%.
        assert!(
            (4800..=5200).contains(&a_picks),
            "A picked {a_picks} of {trials}"
        );
    }

    #[test]
    fn switch_to_spectator_is_always_valid() {
        let balancer = TeamBalancer::default();
        assert!(balancer
            .is_valid_switch(TeamId::A, TeamId::Spectator, &sizes(1, 5))
            .is_ok());
    }

    #[test]
    fn last_member_cannot_abandon_team() {
        let balancer = TeamBalancer::default();
        assert_eq!(
            balancer.is_valid_switch(TeamId::A, TeamId::B, &sizes(1, 3)),
            Err(SwitchDenied::WouldEmptyOwnTeam)
        );
    }

    #[test]
    fn spectator_cannot_join_when_enemy_is_empty() {
        let balancer = TeamBalancer::default();
        assert_eq!(
            balancer.is_valid_switch(TeamId::Spectator, TeamId::A, &sizes(2, 0)),
            Err(SwitchDenied::WouldLeaveEnemyEmpty)
        );
    }

    #[test]
    fn switch_judged_on_post_switch_sizes() {
        let balancer = TeamBalancer::default();
        // 3v3 -> 2v4 after the move: diff 2, allowed round(0.45*4)=2. Accepted.
        assert!(balancer
            .is_valid_switch(TeamId::A, TeamId::B, &sizes(3, 3))
            .is_ok());
        // 4v4 -> 3v5: diff 2, allowed round(0.45*5)=2. Accepted.
        assert!(balancer
            .is_valid_switch(TeamId::A, TeamId::B, &sizes(4, 4))
            .is_ok());
        // 2v4 -> 1v5: diff 4, allowed round(0.45*5)=2. Rejected.
        assert_eq!(
            balancer.is_valid_switch(TeamId::A, TeamId::B, &sizes(2, 4)),
            Err(SwitchDenied::Unbalanced {
                diff: 4,
                max_diff: 2
            })
        );
    }

    #[test]
    fn balanced_requires_both_teams_populated() {
        let balancer = TeamBalancer::default();
        assert!(!balancer.has_balanced_teams(&sizes(0, 3)));
        assert!(!balancer.has_balanced_teams(&sizes(3, 0)));
        assert!(!balancer.has_balanced_teams(&sizes(0, 0)));
    }

    #[test]
    fn balanced_boundary_cases() {
        let balancer = TeamBalancer::default();
        assert!(balancer.has_balanced_teams(&sizes(5, 5)));
        // diff 4 == round(0.35 * 10) -> balanced
        assert!(balancer.has_balanced_teams(&sizes(10, 6)));
        // diff 5 > 4 -> unbalanced
        assert!(!balancer.has_balanced_teams(&sizes(10, 5)));
        // small rosters always tolerate a one-player gap
        assert!(balancer.has_balanced_teams(&sizes(1, 2)));
    }

    proptest! {
        // The anti-empty-team clause must hold for every (a, b, move) triple:
        // no accepted switch may reduce a one-member player team to zero while
        // the opposing side still has players.
        #[test]
        fn anti_empty_team_clause_always_holds(
            a in 0usize..20,
            b in 0usize..20,
            from_a in any::<bool>(),
        ) {
            let balancer = TeamBalancer::default();
            let (current, target) = if from_a {
                (TeamId::A, TeamId::B)
            } else {
                (TeamId::B, TeamId::A)
            };
            let s = sizes(a, b);
            if s.of(current) == 1 && s.of(target) >= 1 {
                prop_assert!(
                    balancer.is_valid_switch(current, target, &s).is_err(),
                    "accepted switch empties {current:?} against a populated enemy"
                );
            }
        }
    }
}
