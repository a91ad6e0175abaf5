//! Database layer: migrations and every query the lifecycles need.
//!
//! Status changes are written as conditional updates (`WHERE status = …`).
//! They report the number of rows they touched so callers can tell a lost race
//! from success. Funding is only ever changed through [`apply_funding`], a
//! single atomic increment.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::errors::Result;
use crate::models::{AidPackage, Delivery, Donation, SortBy, SortOrder, StatusUpdate};
use crate::types::{DeliveryStatus, ItemType, PackageStatus, ProofType, UrgencyLevel};
use crate::verification::IssuedCode;

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations applied successfully");
    Ok(())
}

/// Single-connection in-memory database with the schema applied.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate(&pool).await.unwrap();
    pool
}

/// File-backed database behind several connections, for tests that race
/// writers against each other.
#[cfg(test)]
pub async fn shared_test_pool() -> SqlitePool {
    use sqlx::sqlite::SqliteJournalMode;

    let path = std::env::temp_dir().join(format!("helpchain-{}.db", uuid::Uuid::new_v4()));
    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(10));
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .unwrap();
    migrate(&pool).await.unwrap();
    pool
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ─────────────────────────────────────────────────────────
// Aid packages
// ─────────────────────────────────────────────────────────

pub async fn insert_package(pool: &SqlitePool, p: &AidPackage) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO aid_packages
            (id, external_id, ngo_id, title, description, item_type, quantity, unit,
             currency, funding_goal, current_funding, status, is_funded, is_delivered,
             urgency_level, expected_delivery_at, beneficiary_count, delivery_address,
             delivery_city, delivery_country, tags, assigned_volunteer, creation_tx_hash,
             delivery_tx_hash, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)
        "#,
    )
    .bind(&p.id)
    .bind(p.external_id)
    .bind(&p.ngo_id)
    .bind(&p.title)
    .bind(&p.description)
    .bind(p.item_type)
    .bind(p.quantity)
    .bind(p.unit)
    .bind(p.currency)
    .bind(p.funding_goal)
    .bind(p.current_funding)
    .bind(p.status)
    .bind(p.is_funded)
    .bind(p.is_delivered)
    .bind(p.urgency_level)
    .bind(p.expected_delivery_at)
    .bind(p.beneficiary_count)
    .bind(&p.delivery_address)
    .bind(&p.delivery_city)
    .bind(&p.delivery_country)
    .bind(Json(&p.tags))
    .bind(&p.assigned_volunteer)
    .bind(&p.creation_tx_hash)
    .bind(&p.delivery_tx_hash)
    .bind(p.created_at)
    .bind(p.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch a package with its derived fields filled in.
pub async fn get_package(pool: &SqlitePool, id: &str) -> Result<Option<AidPackage>> {
    let row = sqlx::query_as::<_, AidPackage>("SELECT * FROM aid_packages WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(p) => Ok(Some(hydrate(pool, p).await?)),
        None => Ok(None),
    }
}

async fn hydrate(pool: &SqlitePool, mut package: AidPackage) -> Result<AidPackage> {
    let hashes: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT transaction_hash FROM donations
        WHERE  aid_package_id = ?1 AND status = 'confirmed'
        ORDER  BY created_at ASC, rowid ASC
        "#,
    )
    .bind(&package.id)
    .fetch_all(pool)
    .await?;
    package.funding_tx_hashes = hashes.into_iter().map(|(h,)| h).collect();
    package.funding_percentage = package.compute_funding_percentage();
    Ok(package)
}

/// What a package listing is narrowed to. `None` fields do not filter.
#[derive(Debug, Default)]
pub struct PackageFilter<'a> {
    pub ngo_id: Option<&'a str>,
    pub status: Option<PackageStatus>,
    pub item_type: Option<ItemType>,
    pub urgency_level: Option<UrgencyLevel>,
    pub city: Option<&'a str>,
    pub country: Option<&'a str>,
    pub search: Option<&'a str>,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
}

const PACKAGE_FILTER: &str = r#"
    WHERE  (?1 IS NULL OR ngo_id = ?1)
      AND  (?2 IS NULL OR status = ?2)
      AND  (?3 IS NULL OR item_type = ?3)
      AND  (?4 IS NULL OR urgency_level = ?4)
      AND  (?5 IS NULL OR delivery_city LIKE ?5 ESCAPE '\')
      AND  (?6 IS NULL OR delivery_country LIKE ?6 ESCAPE '\')
      AND  (?7 IS NULL OR title LIKE ?7 ESCAPE '\'
                       OR description LIKE ?7 ESCAPE '\'
                       OR tags LIKE ?7 ESCAPE '\')
"#;

/// `%text%` for a case-insensitive substring match, with LIKE wildcards escaped.
fn contains_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn order_clause(sort_by: SortBy, order: SortOrder) -> String {
    let column = match sort_by {
        SortBy::CreatedAt => "created_at",
        SortBy::FundingGoal => "funding_goal",
        SortBy::CurrentFunding => "current_funding",
        SortBy::ExpectedDeliveryDate => "expected_delivery_at",
        SortBy::UrgencyLevel => {
            "CASE urgency_level WHEN 'low' THEN 0 WHEN 'medium' THEN 1 WHEN 'high' THEN 2 ELSE 3 END"
        }
    };
    let direction = match order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    format!("ORDER BY {column} {direction}, rowid {direction}")
}

/// Page through packages. Returns the page and the total count.
pub async fn list_packages(
    pool: &SqlitePool,
    filter: &PackageFilter<'_>,
    limit: u32,
    offset: u32,
) -> Result<(Vec<AidPackage>, i64)> {
    let city = filter.city.map(contains_pattern);
    let country = filter.country.map(contains_pattern);
    let search = filter.search.map(contains_pattern);

    let sql = format!(
        "SELECT * FROM aid_packages {PACKAGE_FILTER} {} LIMIT ?8 OFFSET ?9",
        order_clause(filter.sort_by, filter.sort_order)
    );
    let rows = sqlx::query_as::<_, AidPackage>(&sql)
        .bind(filter.ngo_id)
        .bind(filter.status)
        .bind(filter.item_type)
        .bind(filter.urgency_level)
        .bind(city.as_deref())
        .bind(country.as_deref())
        .bind(search.as_deref())
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(pool)
        .await?;

    let count_sql = format!("SELECT COUNT(*) FROM aid_packages {PACKAGE_FILTER}");
    let (total,): (i64,) = sqlx::query_as(&count_sql)
        .bind(filter.ngo_id)
        .bind(filter.status)
        .bind(filter.item_type)
        .bind(filter.urgency_level)
        .bind(city.as_deref())
        .bind(country.as_deref())
        .bind(search.as_deref())
        .fetch_one(pool)
        .await?;

    let mut packages = Vec::with_capacity(rows.len());
    for row in rows {
        packages.push(hydrate(pool, row).await?);
    }
    Ok((packages, total))
}

/// Funded packages waiting for a volunteer.
pub async fn available_packages(pool: &SqlitePool) -> Result<Vec<AidPackage>> {
    let rows = sqlx::query_as::<_, AidPackage>(
        r#"
        SELECT * FROM aid_packages
        WHERE  status = 'funded' AND assigned_volunteer IS NULL
        ORDER  BY created_at ASC, rowid ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut packages = Vec::with_capacity(rows.len());
    for row in rows {
        packages.push(hydrate(pool, row).await?);
    }
    Ok(packages)
}

/// Store the creation transaction. The external id is only overwritten when known.
pub async fn set_package_creation_linkage(
    pool: &SqlitePool,
    id: &str,
    tx_hash: &str,
    external_id: Option<i64>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE aid_packages
        SET    creation_tx_hash = ?1,
               external_id = COALESCE(?2, external_id),
               updated_at = ?3
        WHERE  id = ?4
        "#,
    )
    .bind(tx_hash)
    .bind(external_id)
    .bind(now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_package_delivery_tx(pool: &SqlitePool, id: &str, tx_hash: &str) -> Result<()> {
    sqlx::query("UPDATE aid_packages SET delivery_tx_hash = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(tx_hash)
        .bind(now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Descriptive edits on a non-terminal package. `None` leaves a field unchanged.
pub struct PackageEdits<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub expected_delivery_at: Option<i64>,
    pub urgency_level: Option<UrgencyLevel>,
    pub tags: Option<&'a [String]>,
}

pub async fn update_package_details(
    pool: &SqlitePool,
    id: &str,
    edits: &PackageEdits<'_>,
) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE aid_packages
        SET    title                = COALESCE(?1, title),
               description          = COALESCE(?2, description),
               expected_delivery_at = COALESCE(?3, expected_delivery_at),
               urgency_level        = COALESCE(?4, urgency_level),
               tags                 = COALESCE(?5, tags),
               updated_at           = ?6
        WHERE  id = ?7 AND status NOT IN ('delivered', 'cancelled')
        "#,
    )
    .bind(edits.title)
    .bind(edits.description)
    .bind(edits.expected_delivery_at)
    .bind(edits.urgency_level)
    .bind(edits.tags.map(Json))
    .bind(now())
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Cancel a package that is still active and has never been funded.
pub async fn cancel_package(pool: &SqlitePool, id: &str) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE aid_packages
        SET    status = 'cancelled', updated_at = ?1
        WHERE  id = ?2 AND status = 'active' AND current_funding = 0
        "#,
    )
    .bind(now())
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Atomically credit `amount` to a package that accepts donations, flipping
/// it to `funded` when the goal is reached.
///
/// Returns the new `(current_funding, status)`, or `None` when the package no
/// longer accepts donations or the credit would overflow.
pub async fn apply_funding(
    conn: &mut SqliteConnection,
    id: &str,
    amount: i64,
) -> Result<Option<(i64, PackageStatus)>> {
    let row = sqlx::query_as::<_, (i64, PackageStatus)>(
        r#"
        UPDATE aid_packages
        SET    current_funding = current_funding + ?1,
               is_funded = CASE WHEN current_funding + ?1 >= funding_goal THEN 1 ELSE is_funded END,
               status = CASE WHEN status = 'active' AND current_funding + ?1 >= funding_goal
                             THEN 'funded' ELSE status END,
               updated_at = ?2
        WHERE  id = ?3 AND status IN ('active', 'funded') AND current_funding <= ?4
        RETURNING current_funding, status
        "#,
    )
    .bind(amount)
    .bind(now())
    .bind(id)
    .bind(i64::MAX - amount)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

/// Funded → InDelivery, recording the volunteer.
pub async fn mark_package_in_delivery(
    conn: &mut SqliteConnection,
    id: &str,
    volunteer_id: &str,
) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE aid_packages
        SET    status = 'in_delivery', assigned_volunteer = ?1, updated_at = ?2
        WHERE  id = ?3 AND status = 'funded'
        "#,
    )
    .bind(volunteer_id)
    .bind(now())
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(rows)
}

/// InDelivery → Delivered.
pub async fn mark_package_delivered(conn: &mut SqliteConnection, id: &str) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE aid_packages
        SET    status = 'delivered', is_delivered = 1, updated_at = ?1
        WHERE  id = ?2 AND status = 'in_delivery'
        "#,
    )
    .bind(now())
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(rows)
}

/// InDelivery → Funded after the delivery was abandoned.
pub async fn release_package(conn: &mut SqliteConnection, id: &str) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE aid_packages
        SET    status = 'funded', assigned_volunteer = NULL, updated_at = ?1
        WHERE  id = ?2 AND status = 'in_delivery'
        "#,
    )
    .bind(now())
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Deliveries
// ─────────────────────────────────────────────────────────

pub async fn insert_delivery(conn: &mut SqliteConnection, d: &Delivery) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO deliveries
            (id, external_id, aid_package_id, volunteer_id, volunteer_address, status,
             transport_method, pledged_at, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&d.id)
    .bind(d.external_id)
    .bind(&d.aid_package_id)
    .bind(&d.volunteer_id)
    .bind(&d.volunteer_address)
    .bind(d.status)
    .bind(d.transport_method)
    .bind(d.pledged_at)
    .bind(d.created_at)
    .bind(d.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_delivery(pool: &SqlitePool, id: &str) -> Result<Option<Delivery>> {
    let row = sqlx::query_as::<_, Delivery>("SELECT * FROM deliveries WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// The package's delivery that has not failed or been cancelled, if any.
pub async fn current_delivery_for_package(
    pool: &SqlitePool,
    package_id: &str,
) -> Result<Option<Delivery>> {
    let row = sqlx::query_as::<_, Delivery>(
        r#"
        SELECT * FROM deliveries
        WHERE  aid_package_id = ?1 AND status NOT IN ('failed', 'cancelled')
        "#,
    )
    .bind(package_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn deliveries_for_volunteer(
    pool: &SqlitePool,
    volunteer_id: &str,
) -> Result<Vec<Delivery>> {
    let rows = sqlx::query_as::<_, Delivery>(
        r#"
        SELECT * FROM deliveries
        WHERE  volunteer_id = ?1
        ORDER  BY pledged_at DESC, rowid DESC
        "#,
    )
    .bind(volunteer_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Move a delivery one step forward, stamping the reached status once.
pub async fn advance_delivery(
    conn: &mut SqliteConnection,
    id: &str,
    from: DeliveryStatus,
    to: DeliveryStatus,
    at: i64,
) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE deliveries
        SET    status = ?1,
               picked_up_at  = CASE WHEN ?1 = 'picked_up'  THEN COALESCE(picked_up_at, ?2)  ELSE picked_up_at  END,
               in_transit_at = CASE WHEN ?1 = 'in_transit' THEN COALESCE(in_transit_at, ?2) ELSE in_transit_at END,
               updated_at = ?2
        WHERE  id = ?3 AND status = ?4
        "#,
    )
    .bind(to)
    .bind(at)
    .bind(id)
    .bind(from)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(rows)
}

/// InTransit → Delivered with the submitted proof.
pub async fn confirm_delivery(
    conn: &mut SqliteConnection,
    id: &str,
    proof: &str,
    proof_type: ProofType,
    verified: bool,
    at: i64,
) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE deliveries
        SET    status = 'delivered',
               delivered_at = COALESCE(delivered_at, ?1),
               delivery_proof = ?2,
               proof_type = ?3,
               is_verified = ?4,
               verification_code = NULL,
               updated_at = ?1
        WHERE  id = ?5 AND status = 'in_transit'
        "#,
    )
    .bind(at)
    .bind(proof)
    .bind(proof_type)
    .bind(verified)
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Any non-terminal status → Failed or Cancelled.
pub async fn close_delivery(
    conn: &mut SqliteConnection,
    id: &str,
    outcome: DeliveryStatus,
    reason: Option<&str>,
    at: i64,
) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE deliveries
        SET    status = ?1, failure_reason = ?2, closed_at = ?3,
               verification_code = NULL, updated_at = ?3
        WHERE  id = ?4 AND status IN ('pledged', 'picked_up', 'in_transit')
        "#,
    )
    .bind(outcome)
    .bind(reason)
    .bind(at)
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(rows)
}

pub async fn set_delivery_pledge_linkage(
    pool: &SqlitePool,
    id: &str,
    tx_hash: &str,
    external_id: Option<i64>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE deliveries
        SET    pledge_tx_hash = ?1, external_id = COALESCE(?2, external_id), updated_at = ?3
        WHERE  id = ?4
        "#,
    )
    .bind(tx_hash)
    .bind(external_id)
    .bind(now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_delivery_confirmation_tx(
    pool: &SqlitePool,
    id: &str,
    tx_hash: &str,
) -> Result<()> {
    sqlx::query("UPDATE deliveries SET confirmation_tx_hash = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(tx_hash)
        .bind(now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Store a freshly issued verification code, resetting the attempt counter.
pub async fn set_verification_code(
    pool: &SqlitePool,
    id: &str,
    code: &str,
    issued_at: i64,
) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE deliveries
        SET    verification_code = ?1, verification_issued_at = ?2,
               verification_attempts = 0, updated_at = ?2
        WHERE  id = ?3 AND status IN ('pledged', 'picked_up', 'in_transit')
        "#,
    )
    .bind(code)
    .bind(issued_at)
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Use up one verification attempt, unless none are left.
///
/// Returns the outstanding code, or `None` when the delivery has no code or
/// has reached `max_attempts`. The check and the increment are one statement,
/// so concurrent guesses cannot overrun the limit.
pub async fn claim_verification_attempt(
    pool: &SqlitePool,
    id: &str,
    max_attempts: u32,
) -> Result<Option<IssuedCode>> {
    let row = sqlx::query_as::<_, IssuedCode>(
        r#"
        UPDATE deliveries
        SET    verification_attempts = verification_attempts + 1
        WHERE  id = ?1 AND verification_code IS NOT NULL AND verification_attempts < ?2
        RETURNING verification_code AS code, COALESCE(verification_issued_at, 0) AS issued_at
        "#,
    )
    .bind(id)
    .bind(i64::from(max_attempts))
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

// ─────────────────────────────────────────────────────────
// Delivery status log
// ─────────────────────────────────────────────────────────

/// Append a transition to the log; the ledger hash is filled in later.
pub async fn insert_status_update(
    conn: &mut SqliteConnection,
    delivery_id: &str,
    status: DeliveryStatus,
    at: i64,
) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO delivery_status_updates (delivery_id, status, recorded_at) VALUES (?1, ?2, ?3)",
    )
    .bind(delivery_id)
    .bind(status)
    .bind(at)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn set_status_update_tx(pool: &SqlitePool, id: i64, tx_hash: &str) -> Result<()> {
    sqlx::query("UPDATE delivery_status_updates SET tx_hash = ?1 WHERE id = ?2")
        .bind(tx_hash)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn status_updates_for_delivery(
    pool: &SqlitePool,
    delivery_id: &str,
) -> Result<Vec<StatusUpdate>> {
    let rows = sqlx::query_as::<_, StatusUpdate>(
        "SELECT * FROM delivery_status_updates WHERE delivery_id = ?1 ORDER BY id ASC",
    )
    .bind(delivery_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Logged transitions of the package's deliveries that never got a ledger hash.
pub async fn count_unmirrored_status_updates(pool: &SqlitePool, package_id: &str) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM   delivery_status_updates u
        JOIN   deliveries d ON d.id = u.delivery_id
        WHERE  d.aid_package_id = ?1 AND u.tx_hash IS NULL
        "#,
    )
    .bind(package_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

// ─────────────────────────────────────────────────────────
// Donations
// ─────────────────────────────────────────────────────────

pub async fn insert_donation(conn: &mut SqliteConnection, d: &Donation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO donations
            (id, aid_package_id, donor_id, donor_address, amount, currency,
             transaction_hash, block_number, external_id, status, message,
             is_anonymous, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
    )
    .bind(&d.id)
    .bind(&d.aid_package_id)
    .bind(&d.donor_id)
    .bind(&d.donor_address)
    .bind(d.amount)
    .bind(d.currency)
    .bind(&d.transaction_hash)
    .bind(d.block_number)
    .bind(d.external_id)
    .bind(d.status)
    .bind(&d.message)
    .bind(d.is_anonymous)
    .bind(d.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn donations_for_package(pool: &SqlitePool, package_id: &str) -> Result<Vec<Donation>> {
    let rows = sqlx::query_as::<_, Donation>(
        r#"
        SELECT * FROM donations
        WHERE  aid_package_id = ?1
        ORDER  BY created_at DESC, rowid DESC
        "#,
    )
    .bind(package_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn donations_for_donor(pool: &SqlitePool, donor_id: &str) -> Result<Vec<Donation>> {
    let rows = sqlx::query_as::<_, Donation>(
        r#"
        SELECT * FROM donations
        WHERE  donor_id = ?1
        ORDER  BY created_at DESC, rowid DESC
        "#,
    )
    .bind(donor_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// `(confirmed total, failed count)` for a package's donations.
pub async fn donation_totals(pool: &SqlitePool, package_id: &str) -> Result<(i64, i64)> {
    let row: (i64, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(CASE WHEN status = 'confirmed' THEN amount ELSE 0 END), 0),
               COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
        FROM   donations
        WHERE  aid_package_id = ?1
        "#,
    )
    .bind(package_id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}
