//! Database layer: migrations, click records and referral bookkeeping.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::errors::Result;
use crate::fingerprint::{ClickRecord, NewClick, Platform, Referral};
use crate::matcher::ClickStore;

const CLICK_COLUMNS: &str = r#"
    id, referral_code, ip_address, user_agent, platform, os_version, device_model,
    screen_width, screen_height, language, timezone, matched, matched_at,
    created_at, expires_at
"#;

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // Make sure the file is created if it doesn't exist yet.
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Click records
// ─────────────────────────────────────────────────────────

/// Persist a click fingerprint, valid for `ttl_secs` from `created_at`.
pub async fn record_click(
    pool: &SqlitePool,
    platform: Platform,
    click: &NewClick,
    created_at: i64,
    ttl_secs: i64,
) -> Result<ClickRecord> {
    let record = ClickRecord {
        id: Uuid::new_v4().to_string(),
        referral_code: click.referral_code.clone(),
        ip_address: click.ip_address.clone(),
        user_agent: click.user_agent.clone(),
        platform: platform.as_str().to_string(),
        os_version: click.os_version.clone(),
        device_model: click.device_model.clone(),
        screen_width: click.screen_width,
        screen_height: click.screen_height,
        language: click.language.clone(),
        timezone: click.timezone.clone(),
        matched: false,
        matched_at: None,
        created_at,
        expires_at: created_at + ttl_secs,
    };

    sqlx::query(
        r#"
        INSERT INTO click_records
            (id, referral_code, ip_address, user_agent, platform, os_version, device_model,
             screen_width, screen_height, language, timezone, matched, created_at, expires_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12, ?13)
        "#,
    )
    .bind(&record.id)
    .bind(&record.referral_code)
    .bind(&record.ip_address)
    .bind(&record.user_agent)
    .bind(&record.platform)
    .bind(&record.os_version)
    .bind(&record.device_model)
    .bind(record.screen_width)
    .bind(record.screen_height)
    .bind(&record.language)
    .bind(&record.timezone)
    .bind(record.created_at)
    .bind(record.expires_at)
    .execute(pool)
    .await?;

    Ok(record)
}

/// Fetch a single click by id, matched or not.
#[cfg(test)]
pub async fn get_click(pool: &SqlitePool, click_id: &str) -> Result<Option<ClickRecord>> {
    let row = sqlx::query_as::<_, ClickRecord>(&format!(
        "SELECT {CLICK_COLUMNS} FROM click_records WHERE id = ?1"
    ))
    .bind(click_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// [`ClickStore`] backed by the `click_records` table.
#[derive(Clone)]
pub struct SqliteClickStore {
    pool: SqlitePool,
}

impl SqliteClickStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClickStore for SqliteClickStore {
    async fn query_candidates(
        &self,
        platform: Platform,
        now: i64,
        limit: u32,
    ) -> Result<Vec<ClickRecord>> {
        // rowid breaks ties between clicks recorded within the same second.
        let rows = sqlx::query_as::<_, ClickRecord>(&format!(
            r#"
            SELECT {CLICK_COLUMNS}
            FROM   click_records
            WHERE  matched = 0 AND platform = ?1 AND expires_at > ?2
            ORDER  BY created_at DESC, rowid DESC
            LIMIT  ?3
            "#
        ))
        .bind(platform.as_str())
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn try_consume(&self, click_id: &str, now: i64) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE click_records SET matched = 1, matched_at = ?2 WHERE id = ?1 AND matched = 0",
        )
        .bind(click_id)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected == 1)
    }
}

// ─────────────────────────────────────────────────────────
// Referrals
// ─────────────────────────────────────────────────────────

/// Record a referral. Returns `None` when the referred user already has a
/// referral for this code.
pub async fn insert_referral(
    pool: &SqlitePool,
    referrer_user_id: &str,
    referred_user_id: &str,
    referral_code: &str,
    created_at: i64,
) -> Result<Option<Referral>> {
    let referral = Referral {
        id: Uuid::new_v4().to_string(),
        referrer_user_id: referrer_user_id.to_string(),
        referred_user_id: referred_user_id.to_string(),
        referral_code: referral_code.to_string(),
        bonus_applied: true,
        created_at,
    };

    let rows_affected = sqlx::query(
        r#"
        INSERT OR IGNORE INTO referrals
            (id, referrer_user_id, referred_user_id, referral_code, bonus_applied, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(&referral.id)
    .bind(&referral.referrer_user_id)
    .bind(&referral.referred_user_id)
    .bind(&referral.referral_code)
    .bind(referral.bonus_applied)
    .bind(referral.created_at)
    .execute(pool)
    .await?
    .rows_affected();

    Ok((rows_affected == 1).then_some(referral))
}

/// Referrals made by `user_id`, oldest first.
pub async fn get_referrals_by_referrer(pool: &SqlitePool, user_id: &str) -> Result<Vec<Referral>> {
    let rows = sqlx::query_as::<_, Referral>(
        r#"
        SELECT id, referrer_user_id, referred_user_id, referral_code, bonus_applied, created_at
        FROM   referrals
        WHERE  referrer_user_id = ?1
        ORDER  BY created_at ASC, rowid ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// The referral through which `user_id` joined, if any.
pub async fn get_referred_by(pool: &SqlitePool, user_id: &str) -> Result<Option<Referral>> {
    let row = sqlx::query_as::<_, Referral>(
        r#"
        SELECT id, referrer_user_id, referred_user_id, referral_code, bonus_applied, created_at
        FROM   referrals
        WHERE  referred_user_id = ?1
        ORDER  BY created_at ASC, rowid ASC
        LIMIT  1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// A single-connection in-memory database with migrations applied.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;
    const TTL: i64 = 48 * 60 * 60;

    fn click(code: &str) -> NewClick {
        NewClick {
            referral_code: code.to_string(),
            ip_address: Some("203.0.113.5".to_string()),
            os_version: Some("17.2".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn record_click_sets_expiry_from_ttl() {
        let pool = test_pool().await;
        let record = record_click(&pool, Platform::Ios, &click("ABC"), NOW, TTL)
            .await
            .unwrap();

        let stored = get_click(&pool, &record.id).await.unwrap().unwrap();
        assert_eq!(stored.referral_code, "ABC");
        assert_eq!(stored.platform, "ios");
        assert_eq!(stored.expires_at, NOW + TTL);
        assert_eq!(stored.os_version.as_deref(), Some("17.2"));
        assert_eq!(stored.device_model, None);
        assert!(!stored.matched);
        assert_eq!(stored.matched_at, None);
    }

    #[tokio::test]
    async fn candidates_are_filtered_and_most_recent_first() {
        let pool = test_pool().await;
        let store = SqliteClickStore::new(pool.clone());

        record_click(&pool, Platform::Ios, &click("FIRST"), NOW - 300, TTL)
            .await
            .unwrap();
        record_click(&pool, Platform::Ios, &click("SECOND"), NOW - 300, TTL)
            .await
            .unwrap();
        record_click(&pool, Platform::Ios, &click("THIRD"), NOW - 100, TTL)
            .await
            .unwrap();
        record_click(&pool, Platform::Ios, &click("EXPIRED"), NOW - TTL, TTL)
            .await
            .unwrap();
        record_click(&pool, Platform::Android, &click("ANDROID"), NOW, TTL)
            .await
            .unwrap();
        let consumed = record_click(&pool, Platform::Ios, &click("CONSUMED"), NOW, TTL)
            .await
            .unwrap();
        assert!(store.try_consume(&consumed.id, NOW).await.unwrap());

        let codes: Vec<String> = store
            .query_candidates(Platform::Ios, NOW, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.referral_code)
            .collect();
        assert_eq!(codes, vec!["THIRD", "SECOND", "FIRST"]);

        let limited = store.query_candidates(Platform::Ios, NOW, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].referral_code, "THIRD");
    }

    #[tokio::test]
    async fn try_consume_succeeds_only_once() {
        let pool = test_pool().await;
        let store = SqliteClickStore::new(pool.clone());
        let record = record_click(&pool, Platform::Ios, &click("ABC"), NOW, TTL)
            .await
            .unwrap();

        assert!(store.try_consume(&record.id, NOW + 5).await.unwrap());
        assert!(!store.try_consume(&record.id, NOW + 9).await.unwrap());
        assert!(!store.try_consume("missing", NOW).await.unwrap());

        let stored = get_click(&pool, &record.id).await.unwrap().unwrap();
        assert!(stored.matched);
        assert_eq!(stored.matched_at, Some(NOW + 5));
        assert_eq!(stored.expires_at, NOW + TTL);
    }

    #[tokio::test]
    async fn duplicate_referrals_are_ignored() {
        let pool = test_pool().await;

        let first = insert_referral(&pool, "alice", "bob", "ALICE1", NOW).await.unwrap();
        assert!(first.is_some());
        let repeat = insert_referral(&pool, "alice", "bob", "ALICE1", NOW + 1)
            .await
            .unwrap();
        assert!(repeat.is_none());
        let other_code = insert_referral(&pool, "carol", "bob", "CAROL1", NOW + 2)
            .await
            .unwrap();
        assert!(other_code.is_some());

        let made = get_referrals_by_referrer(&pool, "alice").await.unwrap();
        assert_eq!(made.len(), 1);
        assert_eq!(made[0].referred_user_id, "bob");

        let joined_via = get_referred_by(&pool, "bob").await.unwrap().unwrap();
        assert_eq!(joined_via.referral_code, "ALICE1");
        assert!(get_referred_by(&pool, "alice").await.unwrap().is_none());
    }
}
