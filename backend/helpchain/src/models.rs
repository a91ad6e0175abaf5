//! Persisted records, request payloads and response shapes.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::errors::{FieldErrors, Result};
use crate::types::{
    Currency, DeliveryStatus, DonationStatus, ItemType, PackageStatus, ProofType,
    TransportMethod, Unit, UrgencyLevel,
};

// ─────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────

/// A humanitarian aid request created by an NGO.
///
/// Money fields count minor units of `currency`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AidPackage {
    pub id: String,
    pub external_id: Option<i64>,
    pub ngo_id: String,
    pub title: String,
    pub description: String,
    pub item_type: ItemType,
    pub quantity: i64,
    pub unit: Unit,
    pub currency: Currency,
    pub funding_goal: i64,
    pub current_funding: i64,
    pub status: PackageStatus,
    pub is_funded: bool,
    pub is_delivered: bool,
    pub urgency_level: UrgencyLevel,
    pub expected_delivery_at: i64,
    pub beneficiary_count: i64,
    pub delivery_address: String,
    pub delivery_city: String,
    pub delivery_country: String,
    #[sqlx(json)]
    pub tags: Vec<String>,
    pub assigned_volunteer: Option<String>,
    pub creation_tx_hash: Option<String>,
    pub delivery_tx_hash: Option<String>,
    /// Hashes of the confirmed donations, loaded separately.
    #[sqlx(skip)]
    pub funding_tx_hashes: Vec<String>,
    #[sqlx(skip)]
    pub funding_percentage: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AidPackage {
    pub fn compute_funding_percentage(&self) -> u32 {
        if self.funding_goal <= 0 {
            return 100;
        }
        let pct = (self.current_funding as f64 / self.funding_goal as f64 * 100.0).round();
        pct.clamp(0.0, u32::MAX as f64) as u32
    }
}

/// A volunteer's fulfilment of one funded package.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Delivery {
    pub id: String,
    pub external_id: Option<i64>,
    pub aid_package_id: String,
    pub volunteer_id: String,
    pub volunteer_address: Option<String>,
    pub status: DeliveryStatus,
    pub transport_method: Option<TransportMethod>,
    pub pledged_at: i64,
    pub picked_up_at: Option<i64>,
    pub in_transit_at: Option<i64>,
    pub delivered_at: Option<i64>,
    pub closed_at: Option<i64>,
    pub failure_reason: Option<String>,
    pub delivery_proof: Option<String>,
    pub proof_type: Option<ProofType>,
    pub is_verified: bool,
    #[serde(skip)]
    pub verification_code: Option<String>,
    #[serde(skip)]
    pub verification_issued_at: Option<i64>,
    #[serde(skip)]
    pub verification_attempts: i64,
    pub pledge_tx_hash: Option<String>,
    pub confirmation_tx_hash: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One delivery transition and the hash of its mirrored ledger call.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StatusUpdate {
    pub id: i64,
    pub delivery_id: String,
    pub status: DeliveryStatus,
    pub tx_hash: Option<String>,
    pub recorded_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Donation {
    pub id: String,
    pub aid_package_id: String,
    pub donor_id: String,
    pub donor_address: String,
    pub amount: i64,
    pub currency: Currency,
    pub transaction_hash: String,
    pub block_number: i64,
    pub external_id: Option<i64>,
    pub status: DonationStatus,
    pub message: Option<String>,
    pub is_anonymous: bool,
    pub created_at: i64,
}

// ─────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryLocation {
    pub address: String,
    pub city: String,
    pub country: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePackageRequest {
    pub title: String,
    pub description: String,
    pub item_type: ItemType,
    pub quantity: i64,
    pub unit: Unit,
    pub funding_goal: i64,
    pub currency: Option<Currency>,
    pub delivery_location: DeliveryLocation,
    pub expected_delivery_date: String,
    pub beneficiary_count: i64,
    pub urgency_level: Option<UrgencyLevel>,
    pub tags: Option<Vec<String>>,
}

impl CreatePackageRequest {
    /// Check every field and return the parsed expected delivery time.
    pub fn validate(&self) -> Result<i64> {
        let mut errors = FieldErrors::default();
        check_title(&mut errors, &self.title);
        check_description(&mut errors, &self.description);
        errors.check(self.quantity >= 1, "quantity", "Quantity must be at least 1");
        errors.check(
            self.funding_goal >= 0,
            "funding_goal",
            "Funding goal cannot be negative",
        );
        errors.check(
            self.beneficiary_count >= 1,
            "beneficiary_count",
            "Beneficiary count must be at least 1",
        );
        errors.check(
            self.delivery_location.address.trim().chars().count() >= 5,
            "delivery_location.address",
            "Delivery address is required",
        );
        errors.check(
            self.delivery_location.city.trim().chars().count() >= 2,
            "delivery_location.city",
            "City is required",
        );
        errors.check(
            self.delivery_location.country.trim().chars().count() >= 2,
            "delivery_location.country",
            "Country is required",
        );
        let expected = parse_date(&self.expected_delivery_date);
        errors.check(
            expected.is_some(),
            "expected_delivery_date",
            "Invalid delivery date",
        );
        errors.finish()?;
        Ok(expected.unwrap_or_default())
    }
}

/// Descriptive fields an NGO may change. Financial fields are not accepted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePackageRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub expected_delivery_date: Option<String>,
    pub urgency_level: Option<UrgencyLevel>,
    pub tags: Option<Vec<String>>,
}

impl UpdatePackageRequest {
    /// Check the supplied fields and return the parsed delivery time, if given.
    pub fn validate(&self) -> Result<Option<i64>> {
        let mut errors = FieldErrors::default();
        if let Some(title) = &self.title {
            check_title(&mut errors, title);
        }
        if let Some(description) = &self.description {
            check_description(&mut errors, description);
        }
        let expected = self.expected_delivery_date.as_deref().map(parse_date);
        errors.check(
            !matches!(expected, Some(None)),
            "expected_delivery_date",
            "Invalid delivery date",
        );
        errors.finish()?;
        Ok(expected.flatten())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DonationRequest {
    pub amount: i64,
    pub donor_address: String,
    pub message: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
}

impl DonationRequest {
    pub fn validate(&self) -> Result<()> {
        let mut errors = FieldErrors::default();
        errors.check(self.amount > 0, "amount", "Amount must be positive");
        errors.check(
            is_ledger_address(&self.donor_address),
            "donor_address",
            "Valid ledger address required",
        );
        errors.check(
            self.message
                .as_deref()
                .map_or(true, |m| m.chars().count() <= 500),
            "message",
            "Message too long",
        );
        errors.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PledgeRequest {
    pub volunteer_address: Option<String>,
    pub transport_method: Option<TransportMethod>,
}

impl PledgeRequest {
    pub fn validate(&self) -> Result<()> {
        let mut errors = FieldErrors::default();
        errors.check(
            self.volunteer_address
                .as_deref()
                .map_or(true, is_ledger_address),
            "volunteer_address",
            "Valid ledger address required",
        );
        errors.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: DeliveryStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmRequest {
    pub proof: String,
    pub proof_type: Option<ProofType>,
    pub otp: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloseDeliveryRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListPackagesQuery {
    pub status: Option<PackageStatus>,
    pub item_type: Option<ItemType>,
    pub urgency_level: Option<UrgencyLevel>,
    pub city: Option<String>,
    pub country: Option<String>,
    /// Matched against title, description and tags.
    pub search: Option<String>,
    pub sort_by: Option<SortBy>,
    pub sort_order: Option<SortOrder>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Text filters of a listing, trimmed, with blank ones dropped.
pub struct TextFilters<'a> {
    pub city: Option<&'a str>,
    pub country: Option<&'a str>,
    pub search: Option<&'a str>,
}

impl ListPackagesQuery {
    pub fn text_filters(&self) -> Result<TextFilters<'_>> {
        let filters = TextFilters {
            city: trimmed(&self.city),
            country: trimmed(&self.country),
            search: trimmed(&self.search),
        };
        let short = |v: Option<&str>| v.map_or(true, |t| t.chars().count() <= 100);
        let mut errors = FieldErrors::default();
        errors.check(short(filters.city), "city", "City filter too long");
        errors.check(short(filters.country), "country", "Country filter too long");
        errors.check(short(filters.search), "search", "Search term too long");
        errors.finish()?;
        Ok(filters)
    }
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|t| !t.is_empty())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    CreatedAt,
    FundingGoal,
    CurrentFunding,
    ExpectedDeliveryDate,
    UrgencyLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

// ─────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PackageResponse {
    pub aid_package: AidPackage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_items: i64,
    pub items_per_page: u32,
}

#[derive(Debug, Serialize)]
pub struct PackagesPage {
    pub aid_packages: Vec<AidPackage>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct DonationResponse {
    pub donation: Donation,
    pub aid_package: AidPackage,
    pub transaction_hash: String,
}

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub delivery: Delivery,
    pub aid_package: AidPackage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeliveryTimeline {
    pub delivery: Delivery,
    pub status_updates: Vec<StatusUpdate>,
}

#[derive(Debug, Serialize)]
pub struct VerificationCodeResponse {
    pub delivery_id: String,
    pub verification_code: String,
    pub expires_at: i64,
}

/// How far a package's local record has drifted from the ledger.
#[derive(Debug, Serialize)]
pub struct ReconciliationReport {
    pub aid_package_id: String,
    pub current_funding: i64,
    pub confirmed_donation_total: i64,
    pub funding_consistent: bool,
    pub failed_donations: i64,
    pub missing_creation_tx: bool,
    pub missing_external_id: bool,
    pub missing_delivery_tx: bool,
    pub unmirrored_status_updates: i64,
}

// ─────────────────────────────────────────────────────────
// Field checks
// ─────────────────────────────────────────────────────────

fn check_title(errors: &mut FieldErrors, title: &str) {
    let len = title.trim().chars().count();
    errors.check(
        (5..=200).contains(&len),
        "title",
        "Title must be between 5 and 200 characters",
    );
}

fn check_description(errors: &mut FieldErrors, description: &str) {
    let len = description.trim().chars().count();
    errors.check(
        (10..=1000).contains(&len),
        "description",
        "Description must be between 10 and 1000 characters",
    );
}

/// `0x` followed by 20 hex-encoded bytes.
pub fn is_ledger_address(raw: &str) -> bool {
    raw.strip_prefix("0x")
        .filter(|h| h.len() == 40)
        .map_or(false, |h| hex::decode(h).is_ok())
}

/// Parse an RFC 3339 timestamp or a plain `YYYY-MM-DD` date into unix seconds.
pub fn parse_date(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}
