//! Weighted similarity between a recorded click and a launch fingerprint.
//!
//! Each [`FeatureWeight`] names an attribute, its weight in basis points and
//! the rule deciding agreement. A feature that does not agree, including one
//! missing on either side, still counts towards the normalising total, so
//! missing data is always a penalty.
//!
//! Weights are integers so that sums are exact: a click agreeing on
//! everything except the IP address scores exactly `0.6`.

use crate::errors::{AttributionError, Result};
use crate::fingerprint::{ClickRecord, LaunchFingerprint};

/// Attributes the scorer knows how to compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    IpAddress,
    DeviceModel,
    OsVersion,
    ScreenSize,
    Language,
    Timezone,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IpAddress => "ip_address",
            Self::DeviceModel => "device_model",
            Self::OsVersion => "os_version",
            Self::ScreenSize => "screen_size",
            Self::Language => "language",
            Self::Timezone => "timezone",
        }
    }
}

/// How two values of a feature are compared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    /// Both sides present and equal.
    Exact,
    /// Both sides present and every component differs by strictly less than
    /// the tolerance. Text features fall back to [`Rule::Exact`].
    WithinTolerance(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureWeight {
    pub feature: Feature,
    pub basis_points: u32,
    pub rule: Rule,
}

/// Screen sizes reported by the landing page and by the app may drift by a
/// few pixels.
pub const SCREEN_TOLERANCE: f64 = 10.0;

pub const DEFAULT_WEIGHTS: [FeatureWeight; 6] = [
    FeatureWeight {
        feature: Feature::IpAddress,
        basis_points: 4_000,
        rule: Rule::Exact,
    },
    FeatureWeight {
        feature: Feature::DeviceModel,
        basis_points: 2_000,
        rule: Rule::Exact,
    },
    FeatureWeight {
        feature: Feature::OsVersion,
        basis_points: 1_500,
        rule: Rule::Exact,
    },
    FeatureWeight {
        feature: Feature::ScreenSize,
        basis_points: 1_000,
        rule: Rule::WithinTolerance(SCREEN_TOLERANCE),
    },
    FeatureWeight {
        feature: Feature::Language,
        basis_points: 750,
        rule: Rule::Exact,
    },
    FeatureWeight {
        feature: Feature::Timezone,
        basis_points: 750,
        rule: Rule::Exact,
    },
];

/// A value pulled out of either fingerprint for comparison.
#[derive(Debug, Clone, Copy)]
enum Attribute<'a> {
    Text(Option<&'a str>),
    Dimensions(Option<(f64, f64)>),
}

fn text(value: Option<&str>) -> Attribute<'_> {
    Attribute::Text(value.filter(|v| !v.trim().is_empty()))
}

fn dimensions(width: Option<f64>, height: Option<f64>) -> Attribute<'static> {
    let valid = |v: f64| v.is_finite() && v > 0.0;
    match (width, height) {
        (Some(w), Some(h)) if valid(w) && valid(h) => Attribute::Dimensions(Some((w, h))),
        _ => Attribute::Dimensions(None),
    }
}

fn click_attribute(click: &ClickRecord, feature: Feature) -> Attribute<'_> {
    match feature {
        Feature::IpAddress => text(click.ip_address.as_deref()),
        Feature::DeviceModel => text(click.device_model.as_deref()),
        Feature::OsVersion => text(click.os_version.as_deref()),
        Feature::ScreenSize => dimensions(click.screen_width, click.screen_height),
        Feature::Language => text(click.language.as_deref()),
        Feature::Timezone => text(click.timezone.as_deref()),
    }
}

fn launch_attribute(launch: &LaunchFingerprint, feature: Feature) -> Attribute<'_> {
    match feature {
        Feature::IpAddress => text(launch.ip_address.as_deref()),
        Feature::DeviceModel => text(launch.device_model.as_deref()),
        Feature::OsVersion => text(launch.os_version.as_deref()),
        Feature::ScreenSize => dimensions(launch.screen_width, launch.screen_height),
        Feature::Language => text(launch.language.as_deref()),
        Feature::Timezone => text(launch.timezone.as_deref()),
    }
}

fn agrees(rule: Rule, recorded: Attribute<'_>, observed: Attribute<'_>) -> bool {
    match (recorded, observed) {
        (Attribute::Text(Some(a)), Attribute::Text(Some(b))) => a == b,
        (Attribute::Dimensions(Some((w1, h1))), Attribute::Dimensions(Some((w2, h2)))) => {
            match rule {
                Rule::Exact => w1 == w2 && h1 == h2,
                Rule::WithinTolerance(tolerance) => {
                    (w1 - w2).abs() < tolerance && (h1 - h2).abs() < tolerance
                }
            }
        }
        _ => false,
    }
}

/// The set of weighted features used to score candidates.
#[derive(Debug, Clone)]
pub struct WeightTable {
    entries: Vec<FeatureWeight>,
    total_basis_points: u32,
}

impl WeightTable {
    /// Build a table, rejecting one whose weights sum to zero or whose
    /// tolerances are not positive finite numbers.
    pub fn new(entries: Vec<FeatureWeight>) -> Result<Self> {
        let total_basis_points = entries
            .iter()
            .try_fold(0u32, |acc, entry| acc.checked_add(entry.basis_points))
            .ok_or_else(|| AttributionError::InvalidWeights("weights overflow".to_string()))?;

        if total_basis_points == 0 {
            return Err(AttributionError::InvalidWeights(
                "total weight must be positive".to_string(),
            ));
        }

        for entry in &entries {
            if let Rule::WithinTolerance(tolerance) = entry.rule {
                if !tolerance.is_finite() || tolerance <= 0.0 {
                    return Err(AttributionError::InvalidWeights(format!(
                        "tolerance for {} must be positive, got {tolerance}",
                        entry.feature.as_str()
                    )));
                }
            }
        }

        Ok(Self {
            entries,
            total_basis_points,
        })
    }

    pub fn entries(&self) -> &[FeatureWeight] {
        &self.entries
    }

    /// Score `click` against `launch`, returning a value in `[0, 1]`.
    pub fn score(&self, click: &ClickRecord, launch: &LaunchFingerprint) -> f64 {
        let satisfied: u32 = self
            .entries
            .iter()
            .filter(|entry| {
                agrees(
                    entry.rule,
                    click_attribute(click, entry.feature),
                    launch_attribute(launch, entry.feature),
                )
            })
            .map(|entry| entry.basis_points)
            .sum();

        f64::from(satisfied) / f64::from(self.total_basis_points)
    }
}

impl Default for WeightTable {
    fn default() -> Self {
        let entries = DEFAULT_WEIGHTS.to_vec();
        let total_basis_points = entries.iter().map(|e| e.basis_points).sum();
        Self {
            entries,
            total_basis_points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Platform;

    fn click() -> ClickRecord {
        ClickRecord {
            id: "click-1".to_string(),
            referral_code: "FRIEND42".to_string(),
            ip_address: Some("192.168.1.1".to_string()),
            user_agent: None,
            platform: "ios".to_string(),
            os_version: Some("15.0".to_string()),
            device_model: Some("iPhone13".to_string()),
            screen_width: Some(390.0),
            screen_height: Some(844.0),
            language: Some("en-US".to_string()),
            timezone: Some("America/New_York".to_string()),
            matched: false,
            matched_at: None,
            created_at: 1_700_000_000,
            expires_at: 1_700_172_800,
        }
    }

    fn launch() -> LaunchFingerprint {
        LaunchFingerprint {
            platform: Platform::Ios,
            ip_address: Some("192.168.1.1".to_string()),
            os_version: Some("15.0".to_string()),
            device_model: Some("iPhone13".to_string()),
            screen_width: Some(390.0),
            screen_height: Some(844.0),
            language: Some("en-US".to_string()),
            timezone: Some("America/New_York".to_string()),
        }
    }

    #[test]
    fn default_weights_total_one() {
        let total: u32 = DEFAULT_WEIGHTS.iter().map(|w| w.basis_points).sum();
        assert_eq!(total, 10_000);
    }

    #[test]
    fn identical_fingerprint_scores_one() {
        assert_eq!(WeightTable::default().score(&click(), &launch()), 1.0);
    }

    #[test]
    fn os_version_mismatch_costs_its_weight() {
        let mut launch = launch();
        launch.os_version = Some("15.1".to_string());
        assert_eq!(WeightTable::default().score(&click(), &launch), 0.85);
    }

    #[test]
    fn ip_mismatch_lands_exactly_on_the_floor() {
        let mut launch = launch();
        launch.ip_address = Some("10.0.0.7".to_string());
        assert_eq!(WeightTable::default().score(&click(), &launch), 0.6);
    }

    #[test]
    fn ip_and_timezone_mismatch_falls_below_the_floor() {
        let mut launch = launch();
        launch.ip_address = Some("10.0.0.7".to_string());
        launch.timezone = Some("Europe/Paris".to_string());
        let score = WeightTable::default().score(&click(), &launch);
        assert!(score < 0.6, "score {score}");
        assert_eq!(score, 0.525);
    }

    #[test]
    fn screen_size_tolerates_small_deltas() {
        let table = WeightTable::default();
        let mut launch = launch();
        launch.screen_width = Some(399.9);
        launch.screen_height = Some(834.5);
        assert_eq!(table.score(&click(), &launch), 1.0);
    }

    #[test]
    fn screen_delta_of_ten_fails_in_either_dimension() {
        let table = WeightTable::default();

        let mut wide = launch();
        wide.screen_width = Some(400.0);
        assert_eq!(table.score(&click(), &wide), 0.9);

        let mut tall = launch();
        tall.screen_height = Some(834.0);
        assert_eq!(table.score(&click(), &tall), 0.9);
    }

    #[test]
    fn missing_click_attributes_are_a_penalty() {
        let mut click = click();
        click.device_model = None;
        click.screen_height = None;
        click.language = Some(String::new());
        let score = WeightTable::default().score(&click, &launch());
        assert_eq!(score, 0.625);
    }

    #[test]
    fn missing_launch_attributes_never_agree() {
        let table = WeightTable::default();
        assert_eq!(table.score(&click(), &LaunchFingerprint::bare(Platform::Ios)), 0.0);

        let mut only_ip = LaunchFingerprint::bare(Platform::Ios);
        only_ip.ip_address = Some("192.168.1.1".to_string());
        assert_eq!(table.score(&click(), &only_ip), 0.4);
    }

    #[test]
    fn unknown_addresses_on_both_sides_do_not_agree() {
        let table = WeightTable::default();
        let mut click = click();
        let mut launch = launch();
        click.ip_address = None;
        launch.ip_address = None;
        assert_eq!(table.score(&click, &launch), 0.6);

        click.ip_address = Some(String::new());
        launch.ip_address = Some(" ".to_string());
        assert_eq!(table.score(&click, &launch), 0.6);
    }

    #[test]
    fn default_weights_pass_validation() {
        let table = WeightTable::new(DEFAULT_WEIGHTS.to_vec()).unwrap();
        assert_eq!(table.entries().len(), DEFAULT_WEIGHTS.len());
        assert_eq!(table.score(&click(), &launch()), 1.0);
    }

    #[test]
    fn scores_stay_within_unit_range_for_custom_tables() {
        let table = WeightTable::new(vec![
            FeatureWeight {
                feature: Feature::IpAddress,
                basis_points: 7,
                rule: Rule::Exact,
            },
            FeatureWeight {
                feature: Feature::ScreenSize,
                basis_points: 3,
                rule: Rule::Exact,
            },
        ])
        .unwrap();

        assert_eq!(table.score(&click(), &launch()), 1.0);

        let mut launch = launch();
        launch.screen_width = Some(391.0);
        assert_eq!(table.score(&click(), &launch), 0.7);
    }

    #[test]
    fn rejects_degenerate_tables() {
        assert!(WeightTable::new(vec![]).is_err());
        assert!(WeightTable::new(vec![FeatureWeight {
            feature: Feature::Language,
            basis_points: 0,
            rule: Rule::Exact,
        }])
        .is_err());
        assert!(WeightTable::new(vec![FeatureWeight {
            feature: Feature::ScreenSize,
            basis_points: 10,
            rule: Rule::WithinTolerance(-1.0),
        }])
        .is_err());
    }
}
