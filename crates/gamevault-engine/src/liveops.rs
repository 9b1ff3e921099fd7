//! LiveOps events: creation, bulk fan-out and the background scheduler.
//!
//! Triggering an event marks it active and broadcasts it in one transaction.
//! Per-user actions then run concurrently, each in its own transaction and
//! guarded by the key `liveops:{event}:{user}`, so re-triggering an event or
//! retrying a failed user never applies an action twice. `double_xp` events
//! stay active until `ends_at`; everything else completes after fan-out.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use gamevault_core::{
    ActivityLogEntry, ActivityStatus, ConfigType, CurrencyChange, EconomyError, Effect,
    EventAction, EventId, EventStatus, GrantReceipt, LiveOpsEvent, NewLiveOpsEvent, Result,
    RewardSource, TransactionType, UserId, XP_MULTIPLIER_KEY,
};
use gamevault_store::{Database, TxContext};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cache::{Cache, CacheExt};
use crate::ledger::Ledger;
use crate::progression::{Progression, XpGrant};
use crate::remote_config::RemoteConfigService;

const STATUS_KEY: &str = "system_status";

/// Who fired an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// An operator.
    Manual,
    /// The scheduler, at `starts_at`.
    Scheduled,
}

impl TriggerSource {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        }
    }
}

/// A per-user action that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFailure {
    /// Target player.
    pub user_id: UserId,
    /// Error message.
    pub error: String,
}

/// Outcome of [`LiveOps::trigger`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerReport {
    /// Event after the trigger.
    pub event: LiveOpsEvent,
    /// Users the action applied to, including earlier applications.
    pub succeeded: usize,
    /// Users the action failed for.
    pub failed: usize,
    /// Failure details.
    pub failures: Vec<UserFailure>,
}

/// Snapshot served to clients polling for live events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Events currently active.
    pub active_events: Vec<LiveOpsEvent>,
    /// Current global XP multiplier.
    pub xp_multiplier: f64,
    /// When the snapshot was taken.
    pub generated_at: DateTime<Utc>,
}

/// LiveOps event management and fan-out.
#[derive(Clone)]
pub struct LiveOps {
    db: Database,
    ledger: Ledger,
    progression: Progression,
    config: RemoteConfigService,
    status_cache: Arc<dyn Cache<SystemStatus>>,
    status_ttl: Duration,
}

impl std::fmt::Debug for LiveOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveOps")
            .field("status_ttl", &self.status_ttl)
            .finish_non_exhaustive()
    }
}

impl LiveOps {
    /// Fan-out over the ledger, progression and remote config.
    #[must_use]
    pub fn new(
        db: Database,
        ledger: Ledger,
        progression: Progression,
        config: RemoteConfigService,
        status_cache: Arc<dyn Cache<SystemStatus>>,
        status_ttl: Duration,
    ) -> Self {
        Self {
            db,
            ledger,
            progression,
            config,
            status_cache,
            status_ttl,
        }
    }

    /// Validate and store a scheduled event.
    ///
    /// # Errors
    ///
    /// `InvalidInput` or `InvalidAmount` for a malformed event.
    pub async fn create_event(&self, new: NewLiveOpsEvent) -> Result<LiveOpsEvent> {
        let mut event = LiveOpsEvent::create(new)?;
        let mut seen = HashSet::new();
        event.target_users.retain(|user_id| seen.insert(*user_id));

        let mut tx = self.db.begin().await?;
        let result: Result<()> = async {
            tx.lock_event(event.id).await?;
            tx.put_event(&event).await?;
            Ok(())
        }
        .await;
        tx.finish(result).await?;

        info!(
            event_id = %event.id,
            name = %event.name,
            action = event.action.name(),
            targets = event.target_users.len(),
            "liveops event created"
        );
        Ok(event)
    }

    /// Events, optionally in one status.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub async fn list_events(&self, status: Option<EventStatus>) -> Result<Vec<LiveOpsEvent>> {
        Ok(self.db.store().list_events(status).await?)
    }

    /// One event.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event.
    pub async fn get_event(&self, event_id: EventId) -> Result<LiveOpsEvent> {
        self.db
            .store()
            .get_event(event_id)
            .await?
            .ok_or_else(|| EconomyError::not_found("event", event_id))
    }

    /// Activity log, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub async fn activity(
        &self,
        event_id: Option<EventId>,
        limit: usize,
    ) -> Result<Vec<ActivityLogEntry>> {
        Ok(self.db.store().list_activity(event_id, limit).await?)
    }

    /// Fire an event.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown event.
    /// - `InvalidState` if the event is completed, cancelled, or a `double_xp`
    ///   event that is already running.
    ///
    /// Per-user failures do not fail the trigger; they are reported and logged.
    pub async fn trigger(&self, event_id: EventId, source: TriggerSource) -> Result<TriggerReport> {
        // Read once for the whole batch, before the event can become active.
        let multiplier = self.config.global_xp_multiplier().await?;

        let mut tx = self.db.begin().await?;
        let result = self.activate_in(&mut tx, event_id).await;
        let event = tx.finish(result).await?;
        if matches!(event.action, EventAction::DoubleXp { .. }) {
            self.config.invalidate(XP_MULTIPLIER_KEY);
        }
        self.invalidate_status();

        info!(event_id = %event.id, name = %event.name, source = source.as_str(), "liveops event triggered");
        self.log(ActivityLogEntry::new(
            event.id,
            None,
            "trigger",
            ActivityStatus::Success,
            Some(format!("{} trigger", source.as_str())),
        ))
        .await;

        let mut report = TriggerReport {
            event,
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
        };

        if report.event.action.is_per_user() {
            let event = &report.event;
            let outcomes = join_all(
                event
                    .target_users
                    .iter()
                    .map(|user_id| self.apply_to_user(event, *user_id, multiplier)),
            )
            .await;

            let mut failures = Vec::new();
            let mut succeeded = 0;
            for (user_id, outcome) in event.target_users.iter().zip(outcomes) {
                let entry = match outcome {
                    Ok(applied) => {
                        succeeded += 1;
                        ActivityLogEntry::new(
                            event.id,
                            Some(*user_id),
                            event.action.name(),
                            ActivityStatus::Success,
                            (!applied).then(|| "already applied".to_string()),
                        )
                    }
                    Err(err) => {
                        warn!(event_id = %event.id, user_id = %user_id, error = %err, "liveops action failed");
                        failures.push(UserFailure {
                            user_id: *user_id,
                            error: err.to_string(),
                        });
                        ActivityLogEntry::new(
                            event.id,
                            Some(*user_id),
                            event.action.name(),
                            ActivityStatus::Failed,
                            Some(err.to_string()),
                        )
                    }
                };
                self.log(entry).await;
            }
            report.succeeded = succeeded;
            report.failed = failures.len();
            report.failures = failures;
        } else if let EventAction::Announcement { message } = &report.event.action {
            self.log(ActivityLogEntry::new(
                report.event.id,
                None,
                "announcement",
                ActivityStatus::Success,
                Some(message.clone()),
            ))
            .await;
        }

        if !report.event.has_duration() {
            report.event = self.finish_event(event_id, EventStatus::Completed).await?;
        }

        info!(
            event_id = %report.event.id,
            succeeded = report.succeeded,
            failed = report.failed,
            status = %report.event.status,
            "liveops fan-out finished"
        );
        Ok(report)
    }

    /// Cancel a scheduled or active event. Cancelling a running `double_xp`
    /// resets the multiplier.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event, `InvalidState` if it already ended.
    pub async fn cancel_event(&self, event_id: EventId) -> Result<LiveOpsEvent> {
        let event = self.get_event(event_id).await?;
        if event.status.is_terminal() {
            return Err(EconomyError::InvalidState(format!(
                "event is already {}",
                event.status
            )));
        }
        self.finish_event(event_id, EventStatus::Cancelled).await
    }

    /// Complete an active event, resetting the multiplier for `double_xp`.
    /// Events that are not active are returned unchanged.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event.
    pub async fn end_event(&self, event_id: EventId) -> Result<LiveOpsEvent> {
        let event = self.get_event(event_id).await?;
        if event.status != EventStatus::Active {
            return Ok(event);
        }
        self.finish_event(event_id, EventStatus::Completed).await
    }

    /// Active events and the XP multiplier, cached briefly.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub async fn system_status(&self) -> Result<SystemStatus> {
        self.status_cache
            .get_or_set(STATUS_KEY, self.status_ttl, || async {
                let active_events = self.db.store().list_events(Some(EventStatus::Active)).await?;
                let xp_multiplier = self.config.global_xp_multiplier().await?;
                Ok::<_, EconomyError>(SystemStatus {
                    active_events,
                    xp_multiplier,
                    generated_at: Utc::now(),
                })
            })
            .await
    }

    /// Drop the cached status snapshot.
    pub fn invalidate_status(&self) {
        self.status_cache.invalidate(STATUS_KEY);
    }

    async fn activate_in(&self, tx: &mut TxContext, event_id: EventId) -> Result<LiveOpsEvent> {
        let mut event = tx
            .lock_event(event_id)
            .await?
            .ok_or_else(|| EconomyError::not_found("event", event_id))?;

        if event.status.is_terminal() {
            return Err(EconomyError::InvalidState(format!(
                "event is already {}",
                event.status
            )));
        }
        if event.status == EventStatus::Active && event.has_duration() {
            return Err(EconomyError::InvalidState("event is already running".into()));
        }

        event.status = EventStatus::Active;
        event.triggered_at = Some(Utc::now());
        if let EventAction::DoubleXp { multiplier } = event.action {
            self.config
                .set(XP_MULTIPLIER_KEY, json!(multiplier), ConfigType::Number, Some(&mut *tx))
                .await?;
        }
        tx.put_event(&event).await?;
        tx.publish(lifecycle_effect(&event)).await?;
        Ok(event)
    }

    async fn finish_event(&self, event_id: EventId, status: EventStatus) -> Result<LiveOpsEvent> {
        let mut tx = self.db.begin().await?;
        let result = self.finish_in(&mut tx, event_id, status).await;
        let event = tx.finish(result).await?;

        if matches!(event.action, EventAction::DoubleXp { .. }) {
            self.config.invalidate(XP_MULTIPLIER_KEY);
        }
        self.invalidate_status();
        self.log(ActivityLogEntry::new(
            event.id,
            None,
            event.status.as_str(),
            ActivityStatus::Success,
            None,
        ))
        .await;
        info!(event_id = %event.id, status = %event.status, "liveops event ended");
        Ok(event)
    }

    async fn finish_in(
        &self,
        tx: &mut TxContext,
        event_id: EventId,
        status: EventStatus,
    ) -> Result<LiveOpsEvent> {
        let mut event = tx
            .lock_event(event_id)
            .await?
            .ok_or_else(|| EconomyError::not_found("event", event_id))?;
        if event.status.is_terminal() {
            return Ok(event);
        }

        let was_active = event.status == EventStatus::Active;
        event.status = status;
        event.completed_at = Some(Utc::now());
        if was_active && event.has_duration() {
            self.config
                .set(XP_MULTIPLIER_KEY, json!(1.0), ConfigType::Number, Some(&mut *tx))
                .await?;
        }
        tx.put_event(&event).await?;
        tx.publish(lifecycle_effect(&event)).await?;
        Ok(event)
    }

    /// Apply the event's action to one player. Returns `false` if it had
    /// already been applied.
    async fn apply_to_user(
        &self,
        event: &LiveOpsEvent,
        user_id: UserId,
        multiplier: f64,
    ) -> Result<bool> {
        let key = event.user_key(user_id);

        if let EventAction::GrantCurrency { currency, amount } = &event.action {
            let change = CurrencyChange::new(
                user_id,
                *currency,
                *amount,
                TransactionType::Reward,
                format!("liveops: {}", event.name),
            )
            .with_idempotency_key(key.clone())
            .with_reference(event.id.to_string());

            let mut tx = self.db.begin().await?;
            let result: Result<bool> = async {
                if tx.find_ledger_entry(&key).await?.is_some() {
                    return Ok(false);
                }
                self.ledger.add_currency(&change, Some(&mut tx)).await?;
                Ok(true)
            }
            .await;
            return match tx.finish(result).await {
                Err(EconomyError::DuplicateIdempotencyKey { .. }) => Ok(false),
                other => other,
            };
        }

        let mut tx = self.db.begin().await?;
        let result = self.apply_receipted_in(&mut tx, event, user_id, &key, multiplier).await;
        let result = tx.finish(result).await;
        self.progression.invalidate(user_id);
        match result {
            Err(EconomyError::DuplicateIdempotencyKey { .. }) => Ok(false),
            other => other,
        }
    }

    async fn apply_receipted_in(
        &self,
        tx: &mut TxContext,
        event: &LiveOpsEvent,
        user_id: UserId,
        key: &str,
        multiplier: f64,
    ) -> Result<bool> {
        if tx.find_grant_receipt(key).await?.is_some() {
            debug!(event_id = %event.id, user_id = %user_id, "liveops action already applied");
            return Ok(false);
        }

        match &event.action {
            EventAction::GrantXp { amount } => {
                let grant = XpGrant::new(user_id, *amount, RewardSource::LiveOps)
                    .with_multiplier(multiplier);
                self.progression.grant_xp(&grant, Some(&mut *tx)).await?;
            }
            EventAction::ModifyStat { stat, delta } => {
                self.progression
                    .modify_stat(user_id, stat, *delta, Some(&mut *tx))
                    .await?;
            }
            EventAction::UnlockAchievement { achievement } => {
                self.progression
                    .unlock_achievement(user_id, achievement, Some(&mut *tx))
                    .await?;
            }
            EventAction::GrantCurrency { .. }
            | EventAction::DoubleXp { .. }
            | EventAction::Announcement { .. } => return Ok(false),
        }

        tx.insert_grant_receipt(&GrantReceipt::new(key, user_id, event.id.to_string()))
            .await?;
        Ok(true)
    }

    async fn log(&self, entry: ActivityLogEntry) {
        if let Err(err) = self.db.store().append_activity(&entry).await {
            error!(event_id = %entry.event_id, error = %err, "failed to append liveops activity");
        }
    }
}

fn lifecycle_effect(event: &LiveOpsEvent) -> Effect {
    Effect::LiveOpsEvent {
        event_id: event.id,
        name: event.name.clone(),
        action: event.action.clone(),
        status: event.status,
    }
}

/// Counts from one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerTick {
    /// Due events fired.
    pub triggered: usize,
    /// Expired events ended.
    pub ended: usize,
}

/// Background task firing due events and ending expired ones.
#[derive(Debug, Clone)]
pub struct LiveOpsScheduler {
    liveops: LiveOps,
    interval: Duration,
}

impl LiveOpsScheduler {
    /// Scheduler polling every `interval`.
    #[must_use]
    pub const fn new(liveops: LiveOps, interval: Duration) -> Self {
        Self { liveops, interval }
    }

    /// One pass. Failures of single events are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the due or expired events cannot be listed.
    pub async fn tick(&self) -> Result<SchedulerTick> {
        let now = Utc::now();
        let mut tick = SchedulerTick::default();

        for event in self.liveops.db.store().list_due_events(now).await? {
            match self.liveops.trigger(event.id, TriggerSource::Scheduled).await {
                Ok(_) => tick.triggered += 1,
                Err(err) => error!(event_id = %event.id, error = %err, "scheduled trigger failed"),
            }
        }

        for event in self.liveops.db.store().list_expired_events(now).await? {
            match self.liveops.end_event(event.id).await {
                Ok(_) => tick.ended += 1,
                Err(err) => error!(event_id = %event.id, error = %err, "failed to end expired event"),
            }
        }

        if tick != SchedulerTick::default() {
            info!(triggered = tick.triggered, ended = tick.ended, "liveops scheduler pass");
        }
        Ok(tick)
    }

    /// Run [`tick`](Self::tick) every interval until the runtime shuts down.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.tick().await {
                    error!(error = %err, "liveops scheduler pass failed");
                }
            }
        })
    }
}
