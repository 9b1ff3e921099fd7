//! XP, levels, stats, skills and achievements.
//!
//! Every write locks the player's progress row. XP grants pay their currency
//! rewards through the [`Ledger`] inside the same transaction, under keys
//! derived from the resulting XP and level so a repeated reward is a no-op.
//!
//! The progress cache is invalidated after an operation's own transaction
//! commits. A caller that passes its [`TxContext`] calls
//! [`Progression::invalidate`] once it has finished the transaction.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gamevault_core::{
    CurrencyChange, CurrencyType, EconomyError, Effect, PlayerProgress, Result, RewardCurves,
    RewardSource, TransactionType, UserId,
};
use gamevault_store::{Database, TxContext};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{Cache, CacheExt};
use crate::ledger::Ledger;

/// An XP award.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct XpGrant {
    /// Receiving player.
    pub user_id: UserId,
    /// Base XP before the multiplier.
    pub amount: i64,
    /// Applied as `floor(amount * multiplier)`.
    pub multiplier: f64,
    /// Selects the reward curve.
    pub source: RewardSource,
}

impl XpGrant {
    /// Grant of `amount` XP at multiplier 1.
    #[must_use]
    pub fn new(user_id: UserId, amount: i64, source: RewardSource) -> Self {
        Self {
            user_id,
            amount,
            multiplier: 1.0,
            source,
        }
    }

    /// Set the multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn final_amount(&self) -> i64 {
        (self.amount as f64 * self.multiplier).floor() as i64
    }
}

/// What an XP grant changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XpGrantOutcome {
    /// Progress after the grant.
    pub progress: PlayerProgress,
    /// XP added after the multiplier.
    pub xp_gained: i64,
    /// Levels crossed.
    pub levels_gained: i32,
    /// Coins paid for the XP.
    pub coins_awarded: i64,
    /// Gems paid for the levels.
    pub gems_awarded: i64,
}

/// Progression engine.
#[derive(Clone)]
pub struct Progression {
    db: Database,
    ledger: Ledger,
    cache: Arc<dyn Cache<PlayerProgress>>,
    curves: Arc<RewardCurves>,
    ttl: Duration,
}

impl std::fmt::Debug for Progression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progression")
            .field("curves", &self.curves)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn cache_key(user_id: UserId) -> String {
    format!("progress:{user_id}")
}

impl Progression {
    /// Engine caching reads in `cache` for `ttl`.
    #[must_use]
    pub fn new(
        db: Database,
        ledger: Ledger,
        cache: Arc<dyn Cache<PlayerProgress>>,
        curves: RewardCurves,
        ttl: Duration,
    ) -> Self {
        Self {
            db,
            ledger,
            cache,
            curves: Arc::new(curves),
            ttl,
        }
    }

    /// A player's progress, created at level 1 on first access.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub async fn get_progress(&self, user_id: UserId) -> Result<PlayerProgress> {
        self.cache
            .get_or_set(&cache_key(user_id), self.ttl, || async {
                Ok::<_, EconomyError>(self.db.store().get_or_create_progress(user_id).await?)
            })
            .await
    }

    /// Add XP and pay the reward curve.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if the amount is not positive.
    /// - `InvalidInput` if the multiplier is not a positive number.
    /// - `LockTimeout` if the progress row or wallet stays locked.
    pub async fn grant_xp(&self, grant: &XpGrant, tx: Option<&mut TxContext>) -> Result<XpGrantOutcome> {
        if grant.amount <= 0 {
            return Err(EconomyError::InvalidAmount(format!(
                "xp amount must be positive, got {}",
                grant.amount
            )));
        }
        if !grant.multiplier.is_finite() || grant.multiplier <= 0.0 {
            return Err(EconomyError::InvalidInput(format!(
                "multiplier must be positive, got {}",
                grant.multiplier
            )));
        }

        let Some(tx) = tx else {
            let mut tx = self.db.begin().await?;
            let result = self.grant_xp_in(&mut tx, grant).await;
            let result = tx.finish(result).await;
            self.invalidate(grant.user_id);
            return result;
        };
        self.grant_xp_in(tx, grant).await
    }

    /// Add `delta` to a stat.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty stat name, `InvalidAmount` on overflow.
    pub async fn modify_stat(
        &self,
        user_id: UserId,
        stat: &str,
        delta: i64,
        tx: Option<&mut TxContext>,
    ) -> Result<PlayerProgress> {
        if stat.trim().is_empty() {
            return Err(EconomyError::InvalidInput("stat name is empty".into()));
        }
        let Some(tx) = tx else {
            let mut tx = self.db.begin().await?;
            let result = Self::adjust_in(&mut tx, user_id, Counter::Stat, stat, delta).await;
            let result = tx.finish(result).await;
            self.invalidate(user_id);
            return result;
        };
        Self::adjust_in(tx, user_id, Counter::Stat, stat, delta).await
    }

    /// Raise a skill by `levels`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty skill name, `InvalidAmount` unless `levels` is positive.
    pub async fn upgrade_skill(
        &self,
        user_id: UserId,
        skill: &str,
        levels: i64,
        tx: Option<&mut TxContext>,
    ) -> Result<PlayerProgress> {
        if skill.trim().is_empty() {
            return Err(EconomyError::InvalidInput("skill name is empty".into()));
        }
        if levels <= 0 {
            return Err(EconomyError::InvalidAmount(format!(
                "skill levels must be positive, got {levels}"
            )));
        }
        let Some(tx) = tx else {
            let mut tx = self.db.begin().await?;
            let result = Self::adjust_in(&mut tx, user_id, Counter::Skill, skill, levels).await;
            let result = tx.finish(result).await;
            self.invalidate(user_id);
            return result;
        };
        Self::adjust_in(tx, user_id, Counter::Skill, skill, levels).await
    }

    /// Unlock an achievement. Returns whether it was newly unlocked.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty key.
    pub async fn unlock_achievement(
        &self,
        user_id: UserId,
        achievement: &str,
        tx: Option<&mut TxContext>,
    ) -> Result<(PlayerProgress, bool)> {
        if achievement.trim().is_empty() {
            return Err(EconomyError::InvalidInput("achievement key is empty".into()));
        }
        let Some(tx) = tx else {
            let mut tx = self.db.begin().await?;
            let result = Self::unlock_in(&mut tx, user_id, achievement).await;
            let result = tx.finish(result).await;
            self.invalidate(user_id);
            return result;
        };
        Self::unlock_in(tx, user_id, achievement).await
    }

    /// Drop the cached progress of a player.
    pub fn invalidate(&self, user_id: UserId) {
        self.cache.invalidate(&cache_key(user_id));
    }

    async fn grant_xp_in(&self, tx: &mut TxContext, grant: &XpGrant) -> Result<XpGrantOutcome> {
        let mut progress = tx.lock_progress(grant.user_id).await?;
        let xp_gained = grant.final_amount();
        if xp_gained <= 0 {
            debug!(user_id = %grant.user_id, amount = grant.amount, "xp rounds to zero");
            return Ok(XpGrantOutcome {
                progress,
                xp_gained: 0,
                levels_gained: 0,
                coins_awarded: 0,
                gems_awarded: 0,
            });
        }

        let levels_gained = progress.add_xp(xp_gained);
        tx.put_progress(&progress).await?;

        let curve = self.curves.for_source(grant.source);
        let coins_awarded = curve.coins_for(xp_gained);
        if coins_awarded > 0 {
            let change = CurrencyChange::new(
                grant.user_id,
                CurrencyType::Coins,
                coins_awarded,
                TransactionType::Reward,
                format!("{} xp reward", grant.source),
            )
            .with_idempotency_key(format!("xp_coins:{}:{}", grant.user_id, progress.xp));
            self.ledger.add_currency(&change, Some(&mut *tx)).await?;
        }

        let gems_awarded = curve.gems_for(levels_gained);
        if gems_awarded > 0 {
            let change = CurrencyChange::new(
                grant.user_id,
                CurrencyType::Gems,
                gems_awarded,
                TransactionType::Reward,
                format!("reached level {}", progress.level),
            )
            .with_idempotency_key(format!("level_up:{}:{}", grant.user_id, progress.level));
            self.ledger.add_currency(&change, Some(&mut *tx)).await?;
        }

        tx.publish(Effect::ProgressUpdated {
            user_id: grant.user_id,
            level: progress.level,
            xp: progress.xp,
            levels_gained,
        })
        .await?;

        info!(
            user_id = %grant.user_id,
            source = %grant.source,
            xp_gained,
            xp = progress.xp,
            level = progress.level,
            levels_gained,
            "xp granted"
        );
        Ok(XpGrantOutcome {
            progress,
            xp_gained,
            levels_gained,
            coins_awarded,
            gems_awarded,
        })
    }

    async fn adjust_in(
        tx: &mut TxContext,
        user_id: UserId,
        counter: Counter,
        name: &str,
        delta: i64,
    ) -> Result<PlayerProgress> {
        let mut progress = tx.lock_progress(user_id).await?;
        let map = match counter {
            Counter::Stat => &mut progress.stats,
            Counter::Skill => &mut progress.skills,
        };
        let value = map.entry(name.to_string()).or_insert(0);
        *value = value
            .checked_add(delta)
            .ok_or_else(|| EconomyError::InvalidAmount(format!("{name} overflow")))?;
        let current = *value;
        progress.updated_at = Utc::now();
        tx.put_progress(&progress).await?;

        tx.publish(Effect::ProgressUpdated {
            user_id,
            level: progress.level,
            xp: progress.xp,
            levels_gained: 0,
        })
        .await?;

        info!(user_id = %user_id, counter = counter.as_str(), name = %name, delta, value = current, "progress adjusted");
        Ok(progress)
    }

    async fn unlock_in(
        tx: &mut TxContext,
        user_id: UserId,
        achievement: &str,
    ) -> Result<(PlayerProgress, bool)> {
        let mut progress = tx.lock_progress(user_id).await?;
        if progress.achievements.contains_key(achievement) {
            debug!(user_id = %user_id, achievement = %achievement, "achievement already unlocked");
            return Ok((progress, false));
        }

        let now = Utc::now();
        progress.achievements.insert(achievement.to_string(), now);
        progress.updated_at = now;
        tx.put_progress(&progress).await?;
        tx.publish(Effect::AchievementUnlocked {
            user_id,
            achievement: achievement.to_string(),
        })
        .await?;

        info!(user_id = %user_id, achievement = %achievement, "achievement unlocked");
        Ok((progress, true))
    }
}

#[derive(Debug, Clone, Copy)]
enum Counter {
    Stat,
    Skill,
}

impl Counter {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Stat => "stat",
            Self::Skill => "skill",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCache;
    use gamevault_store::MemoryStore;

    fn progression() -> (Progression, Ledger, Database) {
        let db = Database::new(Arc::new(MemoryStore::new()));
        let ledger = Ledger::new(db.clone());
        let progression = Progression::new(
            db.clone(),
            ledger.clone(),
            Arc::new(TtlCache::new()),
            RewardCurves::default(),
            Duration::from_secs(5),
        );
        (progression, ledger, db)
    }

    #[tokio::test]
    async fn new_player_starts_at_level_one() {
        let (progression, _, _) = progression();
        let progress = progression.get_progress(UserId::generate()).await.unwrap();
        assert_eq!((progress.level, progress.xp), (1, 0));
    }

    #[tokio::test]
    async fn crossing_a_level_pays_coins_and_gems() {
        let (progression, ledger, _) = progression();
        let user_id = UserId::generate();

        let outcome = progression
            .grant_xp(&XpGrant::new(user_id, 100, RewardSource::Quiz), None)
            .await
            .unwrap();
        assert_eq!(outcome.levels_gained, 1);
        assert_eq!(outcome.coins_awarded, 10);
        assert_eq!(outcome.gems_awarded, 5);

        let wallet = ledger.get_or_create_wallet(user_id).await.unwrap();
        assert_eq!((wallet.coins, wallet.gems), (10, 5));
    }

    #[tokio::test]
    async fn level_up_key_pays_gems_once() {
        let (progression, ledger, _) = progression();
        let user_id = UserId::generate();
        progression
            .grant_xp(&XpGrant::new(user_id, 100, RewardSource::Quiz), None)
            .await
            .unwrap();

        let replay = CurrencyChange::new(user_id, CurrencyType::Gems, 5, TransactionType::Reward, "replay")
            .with_idempotency_key(format!("level_up:{user_id}:2"));
        let wallet = ledger.add_currency(&replay, None).await.unwrap();
        assert_eq!(wallet.gems, 5);
    }

    #[tokio::test]
    async fn multiplier_is_floored() {
        let (progression, _, _) = progression();
        let user_id = UserId::generate();
        let outcome = progression
            .grant_xp(
                &XpGrant::new(user_id, 15, RewardSource::MatchSession).with_multiplier(1.5),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.xp_gained, 22);
        assert_eq!(outcome.coins_awarded, 2);
        assert_eq!(outcome.levels_gained, 0);
    }

    #[tokio::test]
    async fn writes_invalidate_cached_progress() {
        let (progression, _, _) = progression();
        let user_id = UserId::generate();
        assert_eq!(progression.get_progress(user_id).await.unwrap().xp, 0);

        progression
            .grant_xp(&XpGrant::new(user_id, 40, RewardSource::Quiz), None)
            .await
            .unwrap();
        assert_eq!(progression.get_progress(user_id).await.unwrap().xp, 40);

        progression.modify_stat(user_id, "wins", 3, None).await.unwrap();
        assert_eq!(progression.get_progress(user_id).await.unwrap().stats["wins"], 3);
    }

    #[tokio::test]
    async fn caller_transaction_leaves_cache_until_invalidated() {
        let (progression, _, db) = progression();
        let user_id = UserId::generate();
        assert_eq!(progression.get_progress(user_id).await.unwrap().xp, 0);

        let mut tx = db.begin().await.unwrap();
        progression
            .grant_xp(&XpGrant::new(user_id, 40, RewardSource::Quiz), Some(&mut tx))
            .await
            .unwrap();
        assert_eq!(progression.get_progress(user_id).await.unwrap().xp, 0);
        tx.commit().await.unwrap();
        progression.invalidate(user_id);

        assert_eq!(progression.get_progress(user_id).await.unwrap().xp, 40);
    }

    #[tokio::test]
    async fn achievement_unlocks_once() {
        let (progression, _, db) = progression();
        let user_id = UserId::generate();

        let (_, first) = progression.unlock_achievement(user_id, "first_win", None).await.unwrap();
        let (progress, second) = progression.unlock_achievement(user_id, "first_win", None).await.unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(progress.achievements.len(), 1);

        let unlocked = db
            .store()
            .pending_effects(10)
            .await
            .unwrap()
            .into_iter()
            .filter(|record| matches!(record.effect, Effect::AchievementUnlocked { .. }))
            .count();
        assert_eq!(unlocked, 1);
    }

    #[tokio::test]
    async fn skills_accumulate() {
        let (progression, _, _) = progression();
        let user_id = UserId::generate();
        progression.upgrade_skill(user_id, "archery", 1, None).await.unwrap();
        let progress = progression.upgrade_skill(user_id, "archery", 2, None).await.unwrap();
        assert_eq!(progress.skills["archery"], 3);

        let err = progression.upgrade_skill(user_id, "archery", 0, None).await.unwrap_err();
        assert!(matches!(err, EconomyError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn failed_caller_transaction_rolls_back_rewards() {
        let (progression, ledger, db) = progression();
        let user_id = UserId::generate();

        let mut tx = db.begin().await.unwrap();
        progression
            .grant_xp(&XpGrant::new(user_id, 100, RewardSource::Quiz), Some(&mut tx))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(progression.get_progress(user_id).await.unwrap().xp, 0);
        assert_eq!(ledger.get_or_create_wallet(user_id).await.unwrap().gems, 0);
    }
}
