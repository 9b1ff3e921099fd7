//! LiveOps events and their activity log.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ActivityId, CurrencyType, EconomyError, EventId, Result, UserId};

/// What an event does when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventAction {
    /// Set the global XP multiplier until the event ends.
    DoubleXp {
        /// Multiplier applied to every XP grant.
        multiplier: f64,
    },
    /// Grant XP to each target.
    GrantXp {
        /// Base XP per player.
        amount: i64,
    },
    /// Grant currency to each target.
    GrantCurrency {
        /// Currency granted.
        currency: CurrencyType,
        /// Amount per player.
        amount: i64,
    },
    /// Add `delta` to a stat of each target.
    ModifyStat {
        /// Stat name.
        stat: String,
        /// Signed change.
        delta: i64,
    },
    /// Unlock an achievement for each target.
    UnlockAchievement {
        /// Achievement key.
        achievement: String,
    },
    /// Broadcast a message to everyone.
    Announcement {
        /// Message text.
        message: String,
    },
}

impl EventAction {
    /// Short action name used in the activity log.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::DoubleXp { .. } => "double_xp",
            Self::GrantXp { .. } => "grant_xp",
            Self::GrantCurrency { .. } => "grant_currency",
            Self::ModifyStat { .. } => "modify_stat",
            Self::UnlockAchievement { .. } => "unlock_achievement",
            Self::Announcement { .. } => "announcement",
        }
    }

    /// Whether the action applies per target player.
    #[must_use]
    pub const fn is_per_user(&self) -> bool {
        matches!(
            self,
            Self::GrantXp { .. }
                | Self::GrantCurrency { .. }
                | Self::ModifyStat { .. }
                | Self::UnlockAchievement { .. }
        )
    }

    /// Reject malformed parameters.
    ///
    /// # Errors
    ///
    /// Returns [`EconomyError::InvalidInput`] or [`EconomyError::InvalidAmount`].
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::DoubleXp { multiplier } if !multiplier.is_finite() || *multiplier <= 0.0 => Err(
                EconomyError::InvalidInput(format!("multiplier must be positive, got {multiplier}")),
            ),
            Self::GrantXp { amount } | Self::GrantCurrency { amount, .. } if *amount <= 0 => {
                Err(EconomyError::InvalidAmount(format!("amount must be positive, got {amount}")))
            }
            Self::ModifyStat { stat, .. } if stat.is_empty() => {
                Err(EconomyError::InvalidInput("stat name is empty".into()))
            }
            Self::UnlockAchievement { achievement } if achievement.is_empty() => {
                Err(EconomyError::InvalidInput("achievement key is empty".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Event lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Waiting for `starts_at` or a manual trigger.
    Scheduled,
    /// Fired; duration events stay here until `ends_at`.
    Active,
    /// Finished.
    Completed,
    /// Cancelled before completion.
    Cancelled,
}

impl EventStatus {
    /// Storage / wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the event can no longer fire.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

/// Parameters for a new event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLiveOpsEvent {
    /// Display name.
    pub name: String,
    /// What the event does.
    pub action: EventAction,
    /// Players affected by per-user actions.
    #[serde(default)]
    pub target_users: Vec<UserId>,
    /// When the scheduler should fire the event. `None` means manual only.
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    /// When a duration event ends.
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

/// A game-wide event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveOpsEvent {
    /// Event identifier.
    pub id: EventId,
    /// Display name.
    pub name: String,
    /// What the event does.
    pub action: EventAction,
    /// Players affected by per-user actions.
    pub target_users: Vec<UserId>,
    /// Lifecycle state.
    pub status: EventStatus,
    /// Scheduled start.
    pub starts_at: Option<DateTime<Utc>>,
    /// End of a duration event.
    pub ends_at: Option<DateTime<Utc>>,
    /// When the event was created.
    pub created_at: DateTime<Utc>,
    /// When the event last fired.
    pub triggered_at: Option<DateTime<Utc>>,
    /// When the event completed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl LiveOpsEvent {
    /// Validate `new` and build a scheduled event.
    ///
    /// # Errors
    ///
    /// Rejects empty names, invalid actions and `ends_at` not after `starts_at`.
    pub fn create(new: NewLiveOpsEvent) -> Result<Self> {
        if new.name.trim().is_empty() {
            return Err(EconomyError::InvalidInput("event name is empty".into()));
        }
        new.action.validate()?;
        if let (Some(start), Some(end)) = (new.starts_at, new.ends_at) {
            if end <= start {
                return Err(EconomyError::InvalidInput(
                    "ends_at must be after starts_at".into(),
                ));
            }
        }
        Ok(Self {
            id: EventId::generate(),
            name: new.name,
            action: new.action,
            target_users: new.target_users,
            status: EventStatus::Scheduled,
            starts_at: new.starts_at,
            ends_at: new.ends_at,
            created_at: Utc::now(),
            triggered_at: None,
            completed_at: None,
        })
    }

    /// Whether the event stays active until `ends_at` after firing.
    #[must_use]
    pub fn has_duration(&self) -> bool {
        matches!(self.action, EventAction::DoubleXp { .. }) && self.ends_at.is_some()
    }

    /// Idempotency key of the per-user action for `user_id`.
    #[must_use]
    pub fn user_key(&self, user_id: UserId) -> String {
        format!("liveops:{}:{user_id}", self.id)
    }
}

/// Outcome of one logged action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    /// Applied.
    Success,
    /// Failed; see `detail`.
    Failed,
}

impl ActivityStatus {
    /// Storage / wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for ActivityStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown activity status: {other}")),
        }
    }
}

/// Append-only log line for one liveops action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    /// Entry identifier.
    pub id: ActivityId,
    /// Event that performed the action.
    pub event_id: EventId,
    /// Affected player, for per-user actions.
    pub user_id: Option<UserId>,
    /// Action name.
    pub action: String,
    /// Outcome.
    pub status: ActivityStatus,
    /// Error message or summary.
    pub detail: Option<String>,
    /// When the action ran.
    pub created_at: DateTime<Utc>,
}

impl ActivityLogEntry {
    /// Log line for `action` of `event_id`.
    #[must_use]
    pub fn new(
        event_id: EventId,
        user_id: Option<UserId>,
        action: &str,
        status: ActivityStatus,
        detail: Option<String>,
    ) -> Self {
        Self {
            id: ActivityId::generate(),
            event_id,
            user_id,
            action: action.to_string(),
            status,
            detail,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn grant(amount: i64) -> NewLiveOpsEvent {
        NewLiveOpsEvent {
            name: "weekend bonus".into(),
            action: EventAction::GrantCurrency {
                currency: CurrencyType::Coins,
                amount,
            },
            target_users: vec![UserId::generate()],
            starts_at: None,
            ends_at: None,
        }
    }

    #[test]
    fn created_events_are_scheduled() {
        let event = LiveOpsEvent::create(grant(50)).unwrap();
        assert_eq!(event.status, EventStatus::Scheduled);
        assert!(!event.has_duration());
        assert!(event.action.is_per_user());
    }

    #[test]
    fn non_positive_grants_are_rejected() {
        assert!(matches!(
            LiveOpsEvent::create(grant(0)),
            Err(EconomyError::InvalidAmount(_))
        ));
    }

    #[test]
    fn end_must_follow_start() {
        let now = Utc::now();
        let mut new = grant(10);
        new.starts_at = Some(now);
        new.ends_at = Some(now - Duration::minutes(1));
        assert!(matches!(
            LiveOpsEvent::create(new),
            Err(EconomyError::InvalidInput(_))
        ));
    }

    #[test]
    fn double_xp_with_end_has_duration() {
        let event = LiveOpsEvent::create(NewLiveOpsEvent {
            name: "double xp".into(),
            action: EventAction::DoubleXp { multiplier: 2.0 },
            target_users: vec![],
            starts_at: None,
            ends_at: Some(Utc::now() + Duration::hours(2)),
        })
        .unwrap();
        assert!(event.has_duration());
        assert!(!event.action.is_per_user());
    }

    #[test]
    fn action_serializes_with_type_tag() {
        let json = serde_json::to_value(EventAction::GrantXp { amount: 100 }).unwrap();
        assert_eq!(json["type"], "grant_xp");
        assert_eq!(json["amount"], 100);
    }

    #[test]
    fn user_key_is_scoped_to_event() {
        let event = LiveOpsEvent::create(grant(5)).unwrap();
        let user = UserId::generate();
        assert_eq!(event.user_key(user), format!("liveops:{}:{user}", event.id));
    }
}
