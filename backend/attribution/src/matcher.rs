//! Matches a first-launch fingerprint to the referral click that most likely
//! led to the install, and consumes that click so it is attributed once.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::fingerprint::{ClickRecord, LaunchFingerprint, MatchResult, Platform};
use crate::scoring::WeightTable;

pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.6;
pub const DEFAULT_CANDIDATE_LIMIT: u32 = 100;

/// Storage primitives the matcher needs.
#[async_trait]
pub trait ClickStore {
    /// Unmatched clicks for `platform` whose `expires_at` lies after `now`,
    /// most recent first, at most `limit` of them.
    async fn query_candidates(
        &self,
        platform: Platform,
        now: i64,
        limit: u32,
    ) -> Result<Vec<ClickRecord>>;

    /// Mark `click_id` as matched at `now` if it is still unmatched.
    ///
    /// Returns `true` only when this call performed the transition.
    async fn try_consume(&self, click_id: &str, now: i64) -> Result<bool>;
}

pub type SharedClickStore = Arc<dyn ClickStore + Send + Sync>;

/// A candidate that cleared the confidence floor, with its position in the
/// recency-ordered candidate list.
#[derive(Debug)]
struct Scored {
    position: usize,
    score: f64,
    click: ClickRecord,
}

/// Higher score ranks first; equal scores favour the earlier (more recent)
/// position.
fn rank(a: &Scored, b: &Scored) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then_with(|| b.position.cmp(&a.position))
}

pub struct Matcher {
    store: SharedClickStore,
    weights: WeightTable,
    confidence_floor: f64,
    candidate_limit: u32,
}

impl Matcher {
    pub fn new(
        store: SharedClickStore,
        weights: WeightTable,
        confidence_floor: f64,
        candidate_limit: u32,
    ) -> Self {
        Self {
            store,
            weights,
            confidence_floor,
            candidate_limit,
        }
    }

    pub async fn find_match(&self, launch: &LaunchFingerprint) -> Result<MatchResult> {
        self.find_match_at(launch, Utc::now().timestamp()).await
    }

    /// Retrieve, score, select and consume, as of the Unix time `now`.
    ///
    /// When another request consumes the chosen click first, the next-best
    /// remaining candidate is tried until none is left above the floor.
    pub async fn find_match_at(&self, launch: &LaunchFingerprint, now: i64) -> Result<MatchResult> {
        let candidates = self
            .store
            .query_candidates(launch.platform, now, self.candidate_limit)
            .await?;

        if candidates.is_empty() {
            debug!("No pending {} clicks to match against", launch.platform.as_str());
            return Ok(MatchResult::no_match());
        }

        let total = candidates.len();
        let mut eligible: Vec<Scored> = candidates
            .into_iter()
            .enumerate()
            .map(|(position, click)| Scored {
                position,
                score: self.weights.score(&click, launch),
                click,
            })
            .filter(|scored| scored.score >= self.confidence_floor)
            .collect();

        debug!(
            "Scored {total} candidates, {} at or above {}",
            eligible.len(),
            self.confidence_floor
        );

        while let Some(best) = eligible
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| rank(a, b))
            .map(|(idx, _)| idx)
        {
            let winner = eligible.swap_remove(best);

            if self.store.try_consume(&winner.click.id, now).await? {
                info!(
                    "Attributed launch to click {} (code {}, confidence {:.3})",
                    winner.click.id, winner.click.referral_code, winner.score
                );
                return Ok(MatchResult::matched(&winner.click, winner.score));
            }

            warn!(
                "Click {} was consumed concurrently, trying next candidate",
                winner.click.id
            );
        }

        Ok(MatchResult::no_match())
    }
}
