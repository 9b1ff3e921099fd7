//! Versioned remote configuration behind a short-lived cache.

use std::sync::Arc;
use std::time::Duration;

use gamevault_core::{
    ConfigType, EconomyError, Effect, RemoteConfig, Result, XP_MULTIPLIER_KEY,
};
use gamevault_store::{Database, TxContext};
use serde_json::Value;
use tracing::{info, warn};

use crate::cache::{Cache, CacheExt};

fn cache_key(key: &str) -> String {
    format!("config:{key}")
}

/// Remote config reads and writes.
#[derive(Clone)]
pub struct RemoteConfigService {
    db: Database,
    cache: Arc<dyn Cache<Option<RemoteConfig>>>,
    ttl: Duration,
}

impl std::fmt::Debug for RemoteConfigService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfigService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl RemoteConfigService {
    /// Service caching reads in `cache` for `ttl`. Missing keys are cached too.
    #[must_use]
    pub fn new(db: Database, cache: Arc<dyn Cache<Option<RemoteConfig>>>, ttl: Duration) -> Self {
        Self { db, cache, ttl }
    }

    /// One config entry, if set.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub async fn get(&self, key: &str) -> Result<Option<RemoteConfig>> {
        self.cache
            .get_or_set(&cache_key(key), self.ttl, || async {
                Ok::<_, EconomyError>(self.db.store().get_config(key).await?)
            })
            .await
    }

    /// Every entry, uncached.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub async fn list(&self) -> Result<Vec<RemoteConfig>> {
        Ok(self.db.store().list_configs().await?)
    }

    /// Set `key`, bumping its version, and broadcast the change.
    ///
    /// With a caller-supplied transaction the caller invalidates `key` after
    /// finishing it.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty key or a value that does not match `config_type`.
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        config_type: ConfigType,
        tx: Option<&mut TxContext>,
    ) -> Result<RemoteConfig> {
        let candidate = RemoteConfig::new(key, value, config_type)?;
        if key == XP_MULTIPLIER_KEY {
            match candidate.as_f64() {
                Some(multiplier) if multiplier.is_finite() && multiplier > 0.0 => {}
                _ => {
                    return Err(EconomyError::InvalidInput(
                        "xp_multiplier must be a positive number".into(),
                    ))
                }
            }
        }

        let Some(tx) = tx else {
            let mut tx = self.db.begin().await?;
            let result = Self::set_in(&mut tx, candidate).await;
            let result = tx.finish(result).await;
            self.cache.invalidate(&cache_key(key));
            return result;
        };
        Self::set_in(tx, candidate).await
    }

    /// The global XP multiplier, 1.0 when unset or unusable.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub async fn global_xp_multiplier(&self) -> Result<f64> {
        let Some(config) = self.get(XP_MULTIPLIER_KEY).await? else {
            return Ok(1.0);
        };
        match config.as_f64() {
            Some(multiplier) if multiplier.is_finite() && multiplier > 0.0 => Ok(multiplier),
            _ => {
                warn!(value = %config.value, "ignoring unusable xp_multiplier");
                Ok(1.0)
            }
        }
    }

    /// Drop the cached entry for `key`.
    pub fn invalidate(&self, key: &str) {
        self.cache.invalidate(&cache_key(key));
    }

    async fn set_in(tx: &mut TxContext, candidate: RemoteConfig) -> Result<RemoteConfig> {
        let config = tx
            .upsert_config(&candidate.key, candidate.value, candidate.config_type)
            .await?;
        tx.publish(Effect::ConfigUpdated {
            key: config.key.clone(),
            value: config.value.clone(),
            version: config.version,
        })
        .await?;
        info!(key = %config.key, version = config.version, "config updated");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCache;
    use gamevault_store::MemoryStore;
    use serde_json::json;

    fn service() -> RemoteConfigService {
        RemoteConfigService::new(
            Database::new(Arc::new(MemoryStore::new())),
            Arc::new(TtlCache::new()),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn multiplier_defaults_to_one() {
        assert!((service().global_xp_multiplier().await.unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn set_bumps_version_and_refreshes_cache() {
        let config = service();
        assert!(config.get("max_lobby").await.unwrap().is_none());

        let first = config.set("max_lobby", json!(8), ConfigType::Number, None).await.unwrap();
        let second = config.set("max_lobby", json!(10), ConfigType::Number, None).await.unwrap();
        assert_eq!((first.version, second.version), (1, 2));

        let cached = config.get("max_lobby").await.unwrap().unwrap();
        assert_eq!(cached.value, json!(10));
        assert_eq!(config.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mistyped_values_are_rejected() {
        let config = service();
        let err = config
            .set("maintenance", json!("yes"), ConfigType::Flag, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EconomyError::InvalidInput(_)));

        let err = config
            .set(XP_MULTIPLIER_KEY, json!(0), ConfigType::Number, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EconomyError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn multiplier_reads_configured_value() {
        let config = service();
        config
            .set(XP_MULTIPLIER_KEY, json!(2.0), ConfigType::Number, None)
            .await
            .unwrap();
        assert!((config.global_xp_multiplier().await.unwrap() - 2.0).abs() < f64::EPSILON);
    }
}
