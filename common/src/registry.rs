// User registry
// Fingerprint identity and per-tenant subscription config on top of the store.
//
// Every read degrades to defaults on failure; only `register` reports store
// errors to its caller.

use crate::db::repositories::{UserRepository, UserStateRepository};
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{DeviceInfo, FeedType, Registration, User, UserState};
use crate::subscription::SubscriptionConfig;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const USER_ID_PREFIX: &str = "user_";
const USER_ID_HEX_LEN: usize = 16;
const UNKNOWN_DEVICE: &str = "Unknown device";
const WEB_DEVICE: &str = "Web device";

/// Derive a tenant id from a client fingerprint.
///
/// Pure and deterministic for a given salt. Clients sharing an address and
/// user agent (NAT, proxies) resolve to the same tenant.
pub fn generate_user_id(salt: &str, ip_address: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"_");
    hasher.update(ip_address.as_bytes());
    hasher.update(b"_");
    hasher.update(user_agent.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}{}", USER_ID_PREFIX, &digest[..USER_ID_HEX_LEN])
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Identity derivation and per-tenant configuration CRUD
#[derive(Clone)]
pub struct UserRegistry {
    users: UserRepository,
    states: UserStateRepository,
    salt: String,
}

impl UserRegistry {
    pub fn new(pool: DbPool, salt: impl Into<String>) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            states: UserStateRepository::new(pool),
            salt: salt.into(),
        }
    }

    pub fn generate_user_id(&self, ip_address: &str, user_agent: &str) -> String {
        generate_user_id(&self.salt, ip_address, user_agent)
    }

    /// Create the tenant on first contact, refresh it on every later one.
    ///
    /// A returning tenant gets its stored config back, never the defaults.
    #[instrument(skip(self, user_agent, device))]
    pub async fn register(
        &self,
        ip_address: &str,
        user_agent: &str,
        device: DeviceInfo,
    ) -> Result<Registration, DatabaseError> {
        let user_id = self.generate_user_id(ip_address, user_agent);
        let session_id = Uuid::new_v4().to_string();
        let device_id = device.device_id.unwrap_or_else(short_id);
        let device_name = device
            .device_name
            .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());
        let now = Utc::now();

        if let Some(config) = self
            .refresh_existing(&user_id, &session_id, &device_id, &device_name, now)
            .await?
        {
            info!(user_id = %user_id, "Existing user refreshed");
            return Ok(Registration {
                user_id,
                session_id,
                config,
                created: false,
            });
        }

        let user = User {
            user_id: user_id.clone(),
            session_id: session_id.clone(),
            device_id: device_id.clone(),
            device_name: device_name.clone(),
            config: SubscriptionConfig::with_device_name(device_name.clone()),
            created_at: now,
            last_active: now,
        };

        if self.users.insert_if_absent(&user).await? {
            info!(user_id = %user_id, "New user registered");
            return Ok(Registration {
                user_id,
                session_id,
                config: user.config,
                created: true,
            });
        }

        // Lost a race against a concurrent first contact
        let config = self
            .refresh_existing(&user_id, &session_id, &device_id, &device_name, now)
            .await?
            .unwrap_or(user.config);

        Ok(Registration {
            user_id,
            session_id,
            config,
            created: false,
        })
    }

    async fn refresh_existing(
        &self,
        user_id: &str,
        session_id: &str,
        device_id: &str,
        device_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SubscriptionConfig>, DatabaseError> {
        let config = match self.users.find_by_id(user_id).await {
            Ok(Some(user)) => user.config,
            Ok(None) => return Ok(None),
            Err(DatabaseError::MalformedConfig { reason, .. }) => {
                warn!(user_id = %user_id, reason = %reason, "Resetting malformed config");
                let defaults = SubscriptionConfig::with_device_name(device_name);
                self.users.save_config(user_id, &defaults, now).await?;
                defaults
            }
            Err(e) => return Err(e),
        };

        self.users
            .refresh_contact(user_id, session_id, device_id, device_name, now)
            .await?;
        Ok(Some(config))
    }

    /// Stored config, or defaults for unknown users and on any failure
    #[instrument(skip(self))]
    pub async fn get_config(&self, user_id: &str) -> SubscriptionConfig {
        match self.users.find_by_id(user_id).await {
            Ok(Some(user)) => user.config,
            Ok(None) => SubscriptionConfig::default(),
            Err(DatabaseError::MalformedConfig { reason, .. }) => {
                warn!(user_id = %user_id, reason = %reason, "Resetting malformed config");
                let defaults = SubscriptionConfig::default();
                if let Err(e) = self.users.replace_config(user_id, &defaults).await {
                    error!(user_id = %user_id, error = %e, "Failed to persist reset config");
                }
                defaults
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to load user config");
                SubscriptionConfig::default()
            }
        }
    }

    /// Deep-merge `patch` onto the stored config and persist it.
    ///
    /// Creates the tenant row when missing. Returns `false` on an invalid
    /// patch or a storage failure.
    #[instrument(skip(self, patch))]
    pub async fn update_config(&self, user_id: &str, patch: &serde_json::Value) -> bool {
        let current = match self.load_or_create(user_id).await {
            Ok(config) => config,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to load config for update");
                return false;
            }
        };

        let merged = match current.merge_patch(patch) {
            Ok(merged) => merged,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Rejected config update");
                return false;
            }
        };

        match self.users.save_config(user_id, &merged, Utc::now()).await {
            Ok(saved) => {
                if saved {
                    info!(user_id = %user_id, "User config updated");
                }
                saved
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to save user config");
                false
            }
        }
    }

    async fn load_or_create(&self, user_id: &str) -> Result<SubscriptionConfig, DatabaseError> {
        match self.users.find_by_id(user_id).await {
            Ok(Some(user)) => Ok(user.config),
            Ok(None) => {
                let now = Utc::now();
                let user = User {
                    user_id: user_id.to_string(),
                    session_id: Uuid::new_v4().to_string(),
                    device_id: short_id(),
                    device_name: WEB_DEVICE.to_string(),
                    config: SubscriptionConfig::with_device_name(WEB_DEVICE),
                    created_at: now,
                    last_active: now,
                };
                self.users.insert_if_absent(&user).await?;
                info!(user_id = %user_id, "Created missing user on config update");
                Ok(user.config)
            }
            Err(DatabaseError::MalformedConfig { reason, .. }) => {
                warn!(user_id = %user_id, reason = %reason, "Replacing malformed config");
                Ok(SubscriptionConfig::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Users whose last contact falls within `window`
    #[instrument(skip(self))]
    pub async fn list_active(&self, window: chrono::Duration) -> Vec<String> {
        let cutoff = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        match self.users.find_active_since(cutoff).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Failed to list active users");
                Vec::new()
            }
        }
    }

    /// Refresh `last_active` for a known user
    #[instrument(skip(self))]
    pub async fn touch(&self, user_id: &str) -> bool {
        self.set_last_active(user_id, Utc::now()).await
    }

    /// Overwrite `last_active`, e.g. when importing users or in maintenance tools
    pub async fn set_last_active(&self, user_id: &str, at: DateTime<Utc>) -> bool {
        match self.users.set_last_active(user_id, at).await {
            Ok(updated) => updated,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to update last_active");
                false
            }
        }
    }

    /// Polling state for a user, empty when unknown or unreadable
    #[instrument(skip(self))]
    pub async fn user_state(&self, user_id: &str) -> UserState {
        match self.states.find(user_id).await {
            Ok(Some(state)) => state,
            Ok(None) => UserState::empty(user_id),
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to load user state");
                UserState::empty(user_id)
            }
        }
    }

    /// Stamp a completed feed check. Failures are logged only.
    pub async fn record_check(
        &self,
        user_id: &str,
        feed: FeedType,
        at: DateTime<Utc>,
        added: usize,
    ) {
        let added = i64::try_from(added).unwrap_or(i64::MAX);
        if let Err(e) = self.states.record_check(user_id, feed, at, added).await {
            error!(user_id = %user_id, feed = %feed, error = %e, "Failed to record feed check");
        } else {
            debug!(user_id = %user_id, feed = %feed, "Feed check recorded");
        }
    }

    /// Full user record, if present and readable
    pub async fn find_user(&self, user_id: &str) -> Option<User> {
        match self.users.find_by_id(user_id).await {
            Ok(user) => user,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to load user");
                None
            }
        }
    }
}
