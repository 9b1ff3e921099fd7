//! Player progression state and the leveling curve.
//!
//! # Leveling
//!
//! Level is a pure function of XP:
//!
//! ```text
//! level = floor(sqrt(xp / 100)) + 1
//! ```
//!
//! so level 2 starts at 100 XP, level 3 at 400 XP, level 4 at 900 XP.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// XP per unit of the level-curve square.
pub const XP_PER_LEVEL_UNIT: i64 = 100;

/// Level reached at `xp` experience points. Non-positive XP is level 1.
#[must_use]
pub fn level_for_xp(xp: i64) -> i32 {
    if xp <= 0 {
        return 1;
    }
    let root = isqrt(xp / XP_PER_LEVEL_UNIT);
    i32::try_from(root).map_or(i32::MAX, |r| r.saturating_add(1))
}

/// Minimum XP for `level`.
#[must_use]
pub fn xp_for_level(level: i32) -> i64 {
    let steps = i64::from(level.max(1) - 1);
    steps.saturating_mul(steps).saturating_mul(XP_PER_LEVEL_UNIT)
}

/// Integer square root (floor).
fn isqrt(n: i64) -> i64 {
    if n < 2 {
        return n.max(0);
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    let mut root = (n as f64).sqrt() as i64;
    // Float sqrt may be off by one near large perfect squares.
    while root.checked_mul(root).map_or(true, |sq| sq > n) {
        root -= 1;
    }
    while (root + 1).checked_mul(root + 1).is_some_and(|sq| sq <= n) {
        root += 1;
    }
    root
}

/// A player's XP, level, stats, skills and achievements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProgress {
    /// Owning player.
    pub user_id: UserId,
    /// Current level, always `level_for_xp(xp)`.
    pub level: i32,
    /// Accumulated XP. Never decreases.
    pub xp: i64,
    /// Open counters (matches played, wins, ...).
    pub stats: BTreeMap<String, i64>,
    /// Open skill levels.
    pub skills: BTreeMap<String, i64>,
    /// Achievement key to unlock time.
    pub achievements: BTreeMap<String, DateTime<Utc>>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl PlayerProgress {
    /// Fresh progress at level 1 with no XP.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            level: 1,
            xp: 0,
            stats: BTreeMap::new(),
            skills: BTreeMap::new(),
            achievements: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add XP and recompute the level. Returns the number of levels gained.
    pub fn add_xp(&mut self, amount: i64) -> i32 {
        let previous = self.level;
        self.xp = self.xp.saturating_add(amount.max(0));
        self.level = level_for_xp(self.xp);
        self.updated_at = Utc::now();
        self.level - previous
    }

    /// XP still needed to reach the next level.
    #[must_use]
    pub fn xp_to_next_level(&self) -> i64 {
        xp_for_level(self.level.saturating_add(1)) - self.xp
    }
}

/// Where an XP grant comes from. Each source has its own reward curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RewardSource {
    /// Quiz completion.
    #[default]
    Quiz,
    /// Multiplayer match session result.
    MatchSession,
    /// LiveOps event grant.
    LiveOps,
    /// Operator grant.
    Admin,
}

impl fmt::Display for RewardSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Quiz => "quiz",
            Self::MatchSession => "match_session",
            Self::LiveOps => "liveops",
            Self::Admin => "admin",
        })
    }
}

/// Currency side effects of an XP grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardCurve {
    /// Coins awarded = `floor(xp_gained / xp_per_coin)`. Zero disables the coin reward.
    pub xp_per_coin: i64,
    /// Gems awarded per level gained.
    pub gems_per_level: i64,
}

impl RewardCurve {
    /// Coins earned for `xp_gained` XP.
    #[must_use]
    pub fn coins_for(&self, xp_gained: i64) -> i64 {
        if self.xp_per_coin <= 0 || xp_gained <= 0 {
            return 0;
        }
        xp_gained / self.xp_per_coin
    }

    /// Gems earned for `levels_gained` levels.
    #[must_use]
    pub fn gems_for(&self, levels_gained: i32) -> i64 {
        if levels_gained <= 0 {
            return 0;
        }
        self.gems_per_level.saturating_mul(i64::from(levels_gained))
    }
}

impl Default for RewardCurve {
    fn default() -> Self {
        Self {
            xp_per_coin: 10,
            gems_per_level: 5,
        }
    }
}

/// Reward curves per [`RewardSource`].
///
/// Quiz and match-session rewards are tuned independently; both default to
/// 1 coin per 10 XP and 5 gems per level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewardCurves {
    /// Curve used for sources without an override.
    #[serde(default)]
    pub default: RewardCurve,
    /// Per-source overrides.
    #[serde(default)]
    pub overrides: BTreeMap<String, RewardCurve>,
}

impl RewardCurves {
    /// Curve for `source`.
    #[must_use]
    pub fn for_source(&self, source: RewardSource) -> RewardCurve {
        self.overrides
            .get(&source.to_string())
            .copied()
            .unwrap_or(self.default)
    }

    /// Override the curve of one source.
    #[must_use]
    pub fn with_override(mut self, source: RewardSource, curve: RewardCurve) -> Self {
        self.overrides.insert(source.to_string(), curve);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_curve_anchor_points() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(399), 2);
        assert_eq!(level_for_xp(400), 3);
        assert_eq!(level_for_xp(900), 4);
    }

    #[test]
    fn level_is_monotonic_in_xp() {
        let mut previous = level_for_xp(0);
        for xp in (0..200_000).step_by(37) {
            let level = level_for_xp(xp);
            assert!(level >= previous, "level dropped at xp={xp}");
            previous = level;
        }
    }

    #[test]
    fn level_threshold_inverts_level() {
        for level in 1..50 {
            assert_eq!(level_for_xp(xp_for_level(level)), level);
            assert_eq!(level_for_xp(xp_for_level(level) - 1), (level - 1).max(1));
        }
    }

    #[test]
    fn isqrt_handles_large_values() {
        assert_eq!(isqrt(i64::MAX), 3_037_000_499);
        assert_eq!(level_for_xp(i64::MAX), 303_700_050);
    }

    #[test]
    fn add_xp_reports_levels_gained() {
        let mut progress = PlayerProgress::new(UserId::generate());
        assert_eq!(progress.add_xp(50), 0);
        assert_eq!(progress.add_xp(350), 2);
        assert_eq!(progress.level, 3);
        assert_eq!(progress.xp_to_next_level(), 500);
    }

    #[test]
    fn default_curve_pays_coins_and_gems() {
        let curve = RewardCurve::default();
        assert_eq!(curve.coins_for(125), 12);
        assert_eq!(curve.gems_for(2), 10);
        assert_eq!(curve.gems_for(0), 0);
    }

    #[test]
    fn curves_fall_back_to_default() {
        let curves = RewardCurves::default().with_override(
            RewardSource::MatchSession,
            RewardCurve {
                xp_per_coin: 5,
                gems_per_level: 8,
            },
        );
        assert_eq!(curves.for_source(RewardSource::Quiz), RewardCurve::default());
        assert_eq!(curves.for_source(RewardSource::MatchSession).gems_per_level, 8);
    }
}
