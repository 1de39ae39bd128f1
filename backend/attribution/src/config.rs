//! Application configuration loaded from environment variables.

use std::str::FromStr;

use crate::errors::{AttributionError, Result};
use crate::matcher::{DEFAULT_CANDIDATE_LIMIT, DEFAULT_CONFIDENCE_FLOOR};

/// Store destinations a clicking browser is redirected to.
#[derive(Debug, Clone)]
pub struct AppLinks {
    /// App Store listing for the iOS app
    pub ios_app_store_url: String,
    /// Play Store package id of the Android app
    pub android_package: String,
    /// Where desktop and unrecognised browsers are sent
    pub web_fallback_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Maximum number of pooled SQLite connections
    pub db_max_connections: u32,
    /// Port for the REST API server
    pub api_port: u16,
    /// How long (in hours) a recorded click stays eligible for matching
    pub click_ttl_hours: i64,
    /// Maximum number of recent clicks scored per match attempt
    pub candidate_limit: u32,
    /// Minimum score a click needs to be attributed
    pub confidence_floor: f64,
    pub links: AppLinks,
    /// Points reported for the user who shared the link
    pub referrer_bonus: u32,
    /// Points reported for the newly referred user
    pub referred_bonus: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./attribution.db".to_string()),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 5)?,
            api_port: parse_var("API_PORT", 3000)?,
            click_ttl_hours: parse_var("CLICK_TTL_HOURS", 48)?,
            candidate_limit: parse_var("CANDIDATE_LIMIT", DEFAULT_CANDIDATE_LIMIT)?,
            confidence_floor: parse_var("CONFIDENCE_FLOOR", DEFAULT_CONFIDENCE_FLOOR)?,
            links: AppLinks {
                ios_app_store_url: env_var("IOS_APP_STORE_URL")
                    .unwrap_or_else(|_| "https://apps.apple.com/app/id0000000000".to_string()),
                android_package: env_var("ANDROID_PACKAGE")
                    .unwrap_or_else(|_| "com.example.app".to_string()),
                web_fallback_url: env_var("WEB_FALLBACK_URL")
                    .unwrap_or_else(|_| "https://example.com".to_string()),
            },
            referrer_bonus: parse_var("REFERRER_BONUS", 100)?,
            referred_bonus: parse_var("REFERRED_BONUS", 50)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return Err(AttributionError::Config(format!(
                "CONFIDENCE_FLOOR must be between 0 and 1, got {}",
                self.confidence_floor
            )));
        }
        if self.click_ttl_hours <= 0 {
            return Err(AttributionError::Config(
                "CLICK_TTL_HOURS must be positive".to_string(),
            ));
        }
        if self.candidate_limit == 0 || self.db_max_connections == 0 {
            return Err(AttributionError::Config(
                "CANDIDATE_LIMIT and DB_MAX_CONNECTIONS must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn click_ttl_secs(&self) -> i64 {
        self.click_ttl_hours * 60 * 60
    }
}

#[cfg(test)]
impl Config {
    pub fn default_for_test() -> Self {
        Config {
            database_url: "sqlite::memory:".to_string(),
            db_max_connections: 1,
            api_port: 0,
            click_ttl_hours: 48,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            links: AppLinks {
                ios_app_store_url: "https://apps.apple.com/app/id1".to_string(),
                android_package: "com.example.app".to_string(),
                web_fallback_url: "https://example.com".to_string(),
            },
            referrer_bonus: 100,
            referred_bonus: 50,
        }
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| AttributionError::Config(format!("Missing env var: {key}")))
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env_var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AttributionError::Config(format!("Invalid {key}: {raw}"))),
        Err(_) => Ok(default),
    }
}
