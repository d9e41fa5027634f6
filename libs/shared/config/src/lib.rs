use std::env;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Supabase,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Ok(StorageBackend::Memory),
            "supabase" => Ok(StorageBackend::Supabase),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

/// Cancellation lead times accepted from the environment, in hours.
pub const CANCELLATION_WINDOW_HOURS_RANGE: RangeInclusive<i64> = 0..=24 * 366;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub storage_backend: StorageBackend,
    pub server_port: u16,
    pub cancellation_window_hours: i64,
    pub booking_max_attempts: u32,
    pub booking_lock_timeout_ms: u64,
    pub booking_lock_lease_seconds: u64,
    pub expiry_sweep_interval_seconds: u64,
    pub notification_webhook_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: String::new(),
            storage_backend: StorageBackend::Memory,
            server_port: 3000,
            cancellation_window_hours: 24,
            booking_max_attempts: 3,
            booking_lock_timeout_ms: 5_000,
            booking_lock_lease_seconds: 30,
            expiry_sweep_interval_seconds: 300,
            notification_webhook_url: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, authenticated routes will reject every request");
                    String::new()
                }),
            storage_backend: defaults.storage_backend,
            server_port: parse_var("PORT", defaults.server_port),
            cancellation_window_hours: within_range(
                "CANCELLATION_WINDOW_HOURS",
                parse_var("CANCELLATION_WINDOW_HOURS", defaults.cancellation_window_hours),
                defaults.cancellation_window_hours,
                CANCELLATION_WINDOW_HOURS_RANGE,
            ),
            booking_max_attempts: parse_var("BOOKING_MAX_ATTEMPTS", defaults.booking_max_attempts).max(1),
            booking_lock_timeout_ms: parse_var("BOOKING_LOCK_TIMEOUT_MS", defaults.booking_lock_timeout_ms),
            booking_lock_lease_seconds: parse_var("BOOKING_LOCK_LEASE_SECONDS", defaults.booking_lock_lease_seconds).max(1),
            expiry_sweep_interval_seconds: parse_var("EXPIRY_SWEEP_INTERVAL_SECONDS", defaults.expiry_sweep_interval_seconds).max(1),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        };

        config.storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!("{}, falling back to in-memory storage", e);
                StorageBackend::Memory
            }),
            Err(_) if config.is_configured() => StorageBackend::Supabase,
            Err(_) => {
                warn!("STORAGE_BACKEND not set and Supabase is not configured, using in-memory storage");
                StorageBackend::Memory
            }
        };

        if config.storage_backend == StorageBackend::Supabase && !config.is_configured() {
            warn!("Supabase storage selected but credentials are incomplete");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn within_range<T>(name: &str, value: T, default: T, range: RangeInclusive<T>) -> T
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if range.contains(&value) {
        value
    } else {
        warn!(
            "{} = {} is outside {}..={}, using default {}",
            name,
            value,
            range.start(),
            range.end(),
            default
        );
        default
    }
}
