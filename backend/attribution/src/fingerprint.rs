//! Fingerprint records exchanged between click recording, the matcher and
//! the HTTP layer.

use serde::{Deserialize, Serialize};

/// Mobile platform a click or launch originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    /// Parse the lowercase platform identifier used on the wire and in storage.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ios" => Some(Self::Ios),
            "android" => Some(Self::Android),
            _ => None,
        }
    }

    /// Return the identifier stored in the `platform` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
        }
    }
}

/// A pending (or consumed) click as stored in / read from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClickRecord {
    pub id: String,
    pub referral_code: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub platform: String,
    pub os_version: Option<String>,
    pub device_model: Option<String>,
    pub screen_width: Option<f64>,
    pub screen_height: Option<f64>,
    pub language: Option<String>,
    pub timezone: Option<String>,
    pub matched: bool,
    pub matched_at: Option<i64>,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Fingerprint captured at click time, before it is persisted.
#[derive(Debug, Clone, Default)]
pub struct NewClick {
    pub referral_code: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub os_version: Option<String>,
    pub device_model: Option<String>,
    pub screen_width: Option<f64>,
    pub screen_height: Option<f64>,
    pub language: Option<String>,
    pub timezone: Option<String>,
}

/// Attributes reported by a freshly installed app on its first launch.
///
/// Only `platform` is required; every other attribute simply fails to
/// contribute to the score when absent.
#[derive(Debug, Clone)]
pub struct LaunchFingerprint {
    pub platform: Platform,
    pub ip_address: Option<String>,
    pub os_version: Option<String>,
    pub device_model: Option<String>,
    pub screen_width: Option<f64>,
    pub screen_height: Option<f64>,
    pub language: Option<String>,
    pub timezone: Option<String>,
}

#[cfg(test)]
impl LaunchFingerprint {
    /// A launch fingerprint carrying nothing but its platform.
    pub fn bare(platform: Platform) -> Self {
        Self {
            platform,
            ip_address: None,
            os_version: None,
            device_model: None,
            screen_width: None,
            screen_height: None,
            language: None,
            timezone: None,
        }
    }
}

/// Outcome of a match attempt.
///
/// Build it through [`MatchResult::no_match`] or [`MatchResult::matched`] so
/// the optional fields are present exactly when `matched` is true.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_id: Option<String>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            matched: false,
            referral_code: None,
            confidence: None,
            click_id: None,
        }
    }

    pub fn matched(click: &ClickRecord, confidence: f64) -> Self {
        Self {
            matched: true,
            referral_code: Some(click.referral_code.clone()),
            confidence: Some(confidence),
            click_id: Some(click.id.clone()),
        }
    }
}

/// A recorded referral between two users of the host application.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Referral {
    pub id: String,
    pub referrer_user_id: String,
    pub referred_user_id: String,
    pub referral_code: String,
    pub bonus_applied: bool,
    pub created_at: i64,
}

/// Treat empty strings as missing, the way browsers and the app report
/// attributes they could not determine.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Screen dimensions of zero or below carry no information.
pub fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}
