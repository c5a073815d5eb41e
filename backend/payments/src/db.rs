//! Database layer: privileged pool, migrations, and donation queries.
//!
//! Status transitions are single conditional `UPDATE` statements scoped by
//! the allowed predecessor states, so concurrent capture and webhook paths
//! cannot move a donation backwards or overwrite a confirmed capture.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{PaymentError, Result};
use crate::models::{
    format_amount, Campaign, CampaignProgress, Donation, DonationStatus, NewDonation, Project,
};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

// ─────────────────────────────────────────────────────────
// Privileged client
// ─────────────────────────────────────────────────────────

/// Server-side datastore handle.
///
/// The pool is created on first use and then shared for the lifetime of the
/// process; there is no teardown.
pub struct Datastore {
    database_url: Option<String>,
    pool: OnceCell<SqlitePool>,
}

impl Datastore {
    pub fn new(database_url: Option<String>) -> Self {
        Self {
            database_url,
            pool: OnceCell::new(),
        }
    }

    /// Wrap an already-initialized pool.
    #[cfg(test)]
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self {
            database_url: None,
            pool: OnceCell::new_with(Some(pool)),
        }
    }

    /// Return the privileged pool, connecting and migrating on first call.
    pub async fn privileged(&self) -> Result<&SqlitePool> {
        self.pool
            .get_or_try_init(|| async {
                let url = self.database_url.as_deref().ok_or_else(|| {
                    PaymentError::Config("Datastore URL missing: set DATABASE_URL".to_string())
                })?;
                init_pool(url).await
            })
            .await
    }
}

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Campaigns
// ─────────────────────────────────────────────────────────

pub async fn find_campaign_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<Campaign>> {
    let campaign = sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE slug = ?1")
        .bind(slug)
        .fetch_optional(pool)
        .await?;
    Ok(campaign)
}

pub async fn find_project(pool: &SqlitePool, id: &str) -> Result<Option<Project>> {
    let project =
        sqlx::query_as::<_, Project>("SELECT id, title, goal_amount FROM projects WHERE id = ?1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(project)
}

/// Create (or reactivate) the campaign for `slug`, seeded from `project`.
pub async fn upsert_campaign_from_project(
    pool: &SqlitePool,
    slug: &str,
    project: &Project,
    currency: &str,
) -> Result<Campaign> {
    let campaign = sqlx::query_as::<_, Campaign>(
        r#"
        INSERT INTO campaigns (id, slug, title, goal_amount, currency, active, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
        ON CONFLICT (slug) DO UPDATE SET
            title       = excluded.title,
            goal_amount = excluded.goal_amount,
            currency    = excluded.currency,
            active      = 1
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(slug)
    .bind(&project.title)
    .bind(&project.goal_amount)
    .bind(currency)
    .bind(chrono::Utc::now().timestamp())
    .fetch_one(pool)
    .await?;
    Ok(campaign)
}

// ─────────────────────────────────────────────────────────
// Donation writes
// ─────────────────────────────────────────────────────────

/// Insert a `pending` donation. `None` means the insert returned no row.
pub async fn insert_donation(pool: &SqlitePool, new: &NewDonation) -> Result<Option<Donation>> {
    let donation = sqlx::query_as::<_, Donation>(
        r#"
        INSERT INTO donations
            (id, campaign_id, project_id, user_id, amount, currency, status,
             donor_name, donor_email, is_anonymous, message, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?9, ?10, ?11)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&new.campaign_id)
    .bind(&new.project_id)
    .bind(&new.user_id)
    .bind(format_amount(new.amount))
    .bind(&new.currency)
    .bind(&new.donor.name)
    .bind(&new.donor.email)
    .bind(new.donor.is_anonymous)
    .bind(&new.donor.message)
    .bind(chrono::Utc::now().timestamp())
    .fetch_optional(pool)
    .await?;
    Ok(donation)
}

/// Attach the PayPal order to a still-`pending` donation. Returns `false`
/// when the row has already left `pending`.
pub async fn set_order_id(pool: &SqlitePool, donation_id: &str, order_id: &str) -> Result<bool> {
    let rows = sqlx::query(
        "UPDATE donations SET provider_order_id = ?1 WHERE id = ?2 AND status = 'pending'",
    )
    .bind(order_id)
    .bind(donation_id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

/// A column/value pair used to locate a donation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DonationFilter<'a> {
    Id(&'a str),
    OrderId(&'a str),
    CaptureId(&'a str),
}

impl<'a> DonationFilter<'a> {
    fn column(&self) -> &'static str {
        match self {
            Self::Id(_) => "id",
            Self::OrderId(_) => "provider_order_id",
            Self::CaptureId(_) => "provider_capture_id",
        }
    }

    fn value(&self) -> &'a str {
        match self {
            Self::Id(v) | Self::OrderId(v) | Self::CaptureId(v) => *v,
        }
    }
}

fn status_list(statuses: &[&str]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{s}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Move matching donations to `to` if they are in one of its predecessor
/// states. Returns the number of rows changed.
pub async fn transition(
    pool: &SqlitePool,
    filter: DonationFilter<'_>,
    to: DonationStatus,
) -> Result<u64> {
    let from = to.predecessors();
    if from.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "UPDATE donations SET status = ?1 WHERE {} = ?2 AND status IN ({})",
        filter.column(),
        status_list(from)
    );
    let rows = sqlx::query(&sql)
        .bind(to.as_str())
        .bind(filter.value())
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows)
}

/// Confirm matching unconfirmed donations. `capture_id = None` keeps the
/// stored capture id.
pub async fn confirm(
    pool: &SqlitePool,
    filter: DonationFilter<'_>,
    capture_id: Option<&str>,
    confirmed_at: i64,
) -> Result<u64> {
    let sql = format!(
        r#"
        UPDATE donations
        SET    status = 'confirmed',
               provider_capture_id = COALESCE(?1, provider_capture_id),
               confirmed_at = ?2
        WHERE  {} = ?3 AND status IN ({})
        "#,
        filter.column(),
        status_list(DonationStatus::Confirmed.predecessors())
    );
    let rows = sqlx::query(&sql)
        .bind(capture_id)
        .bind(confirmed_at)
        .bind(filter.value())
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows)
}

/// Fail order-less `pending` donations created before `cutoff`.
pub async fn fail_stale_pending(pool: &SqlitePool, cutoff: i64) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE donations
        SET    status = 'failed'
        WHERE  status = 'pending'
          AND  provider_order_id IS NULL
          AND  created_at < ?1
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Donation reads
// ─────────────────────────────────────────────────────────

pub async fn find_donation(
    pool: &SqlitePool,
    filter: DonationFilter<'_>,
) -> Result<Option<Donation>> {
    let sql = format!(
        "SELECT * FROM donations WHERE {} = ?1 ORDER BY created_at ASC LIMIT 1",
        filter.column()
    );
    let donation = sqlx::query_as::<_, Donation>(&sql)
        .bind(filter.value())
        .fetch_optional(pool)
        .await?;
    Ok(donation)
}

/// Evaluate `filters` in order and return the first donation found.
pub async fn find_first_match(
    pool: &SqlitePool,
    filters: &[DonationFilter<'_>],
) -> Result<Option<Donation>> {
    for filter in filters {
        if let Some(donation) = find_donation(pool, *filter).await? {
            return Ok(Some(donation));
        }
    }
    Ok(None)
}

// ─────────────────────────────────────────────────────────
// Webhook event log
// ─────────────────────────────────────────────────────────

pub async fn webhook_event_processed(pool: &SqlitePool, event_id: &str) -> Result<bool> {
    let row: Option<(String,)> = sqlx::query_as("SELECT id FROM webhook_events WHERE id = ?1")
        .bind(event_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Remember a processed event. Returns `false` when it was already recorded.
pub async fn record_webhook_event(
    pool: &SqlitePool,
    event_id: &str,
    event_type: &str,
    resource_id: Option<&str>,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        INSERT OR IGNORE INTO webhook_events (id, event_type, resource_id, received_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(event_id)
    .bind(event_type)
    .bind(resource_id)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows > 0)
}

// ─────────────────────────────────────────────────────────
// Campaign progress
// ─────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ProgressRow {
    id: String,
    slug: String,
    title: String,
    goal_amount: Option<String>,
    currency: String,
    confirmed_cents: i64,
    confirmed_count: i64,
}

fn parse_goal(goal: Option<&str>) -> Option<f64> {
    goal.and_then(|g| g.trim().parse::<f64>().ok())
}

/// Confirmed totals per active campaign, from the `campaign_progress` view
/// when it is queryable, otherwise aggregated here.
pub async fn campaign_progress(pool: &SqlitePool) -> Result<Vec<CampaignProgress>> {
    let view = sqlx::query_as::<_, ProgressRow>(
        r#"
        SELECT id, slug, title, goal_amount, currency, confirmed_cents, confirmed_count
        FROM   campaign_progress
        ORDER  BY slug ASC
        "#,
    )
    .fetch_all(pool)
    .await;

    match view {
        Ok(rows) => Ok(rows
            .into_iter()
            .map(|r| {
                CampaignProgress::new(
                    r.id,
                    r.slug,
                    r.title,
                    parse_goal(r.goal_amount.as_deref()),
                    r.currency,
                    Decimal::new(r.confirmed_cents, 2).to_f64().unwrap_or(0.0),
                    r.confirmed_count,
                )
            })
            .collect()),
        Err(e) => {
            warn!("campaign_progress view unavailable ({e}); aggregating manually");
            aggregate_progress(pool).await
        }
    }
}

/// Sum confirmed donations per active campaign without the view.
pub async fn aggregate_progress(pool: &SqlitePool) -> Result<Vec<CampaignProgress>> {
    let campaigns = sqlx::query_as::<_, Campaign>(
        "SELECT * FROM campaigns WHERE COALESCE(active, 1) != 0 ORDER BY slug ASC",
    )
    .fetch_all(pool)
    .await?;

    let confirmed: Vec<(String, String)> = sqlx::query_as(
        "SELECT campaign_id, amount FROM donations WHERE status IN ('confirmed', 'confirmado')",
    )
    .fetch_all(pool)
    .await?;

    let mut totals: HashMap<String, (Decimal, i64)> = HashMap::new();
    for (campaign_id, amount) in confirmed {
        let Ok(amount) = Decimal::from_str(&amount) else {
            warn!("Skipping unparseable donation amount '{amount}' for campaign {campaign_id}");
            continue;
        };
        let entry = totals.entry(campaign_id).or_insert((Decimal::ZERO, 0));
        entry.0 += amount;
        entry.1 += 1;
    }

    Ok(campaigns
        .into_iter()
        .map(|c| {
            let (total, count) = totals.remove(&c.id).unwrap_or((Decimal::ZERO, 0));
            CampaignProgress::new(
                c.id,
                c.slug,
                c.title,
                parse_goal(c.goal_amount.as_deref()),
                c.currency,
                total.to_f64().unwrap_or(0.0),
                count,
            )
        })
        .collect())
}
