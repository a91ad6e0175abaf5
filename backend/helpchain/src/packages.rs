//! Aid package lifecycle.
//!
//! Transitions are local-first: the row is written, then the chain mirror is
//! asked to record it. A mirror failure leaves the ledger linkage empty and
//! never undoes the local write. Funding changes live in [`crate::donations`]
//! and the InDelivery/Delivered flips in [`crate::deliveries`].

use tracing::{info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::Caller;
use crate::db::{self, PackageEdits, PackageFilter};
use crate::errors::{AppError, Result};
use crate::ledger::best_effort;
use crate::models::{
    AidPackage, CreatePackageRequest, ListPackagesQuery, PackageResponse, PackagesPage,
    Pagination, ReconciliationReport, UpdatePackageRequest,
};
use crate::types::{Action, PackageStatus};

const MAX_PAGE_SIZE: u32 = 100;

/// Load a package or fail with `not_found`.
pub async fn load(state: &AppState, id: &str) -> Result<AidPackage> {
    db::get_package(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Aid package"))
}

pub async fn create(
    state: &AppState,
    caller: &Caller,
    req: CreatePackageRequest,
) -> Result<PackageResponse> {
    caller.require(Action::CreatePackage)?;
    let expected_delivery_at = req.validate()?;

    let now = db::now();
    // A zero goal is met before the first donation.
    let is_funded = req.funding_goal == 0;
    let package = AidPackage {
        id: Uuid::new_v4().to_string(),
        external_id: None,
        ngo_id: caller.id.clone(),
        title: req.title.trim().to_string(),
        description: req.description.trim().to_string(),
        item_type: req.item_type,
        quantity: req.quantity,
        unit: req.unit,
        currency: req.currency.unwrap_or_default(),
        funding_goal: req.funding_goal,
        current_funding: 0,
        status: if is_funded {
            PackageStatus::Funded
        } else {
            PackageStatus::Active
        },
        is_funded,
        is_delivered: false,
        urgency_level: req.urgency_level.unwrap_or_default(),
        expected_delivery_at,
        beneficiary_count: req.beneficiary_count,
        delivery_address: req.delivery_location.address.trim().to_string(),
        delivery_city: req.delivery_location.city.trim().to_string(),
        delivery_country: req.delivery_location.country.trim().to_string(),
        tags: req.tags.unwrap_or_default(),
        assigned_volunteer: None,
        creation_tx_hash: None,
        delivery_tx_hash: None,
        funding_tx_hashes: Vec::new(),
        funding_percentage: 0,
        created_at: now,
        updated_at: now,
    };
    db::insert_package(&state.pool, &package).await?;
    info!("Aid package {} created by {}", package.id, caller.id);

    let receipt = best_effort(
        "create_package",
        &package.id,
        state.mirror.create_package(&package).await,
    );
    if let Some(r) = &receipt {
        db::set_package_creation_linkage(&state.pool, &package.id, &r.tx_hash, r.external_id)
            .await?;
    }

    Ok(PackageResponse {
        aid_package: load(state, &package.id).await?,
        transaction_hash: receipt.map(|r| r.tx_hash),
    })
}

pub async fn list(state: &AppState, query: ListPackagesQuery) -> Result<PackagesPage> {
    page_of(state, None, &query).await
}

/// One NGO's packages, with the same filters as [`list`].
pub async fn list_for_ngo(
    state: &AppState,
    ngo_id: &str,
    query: ListPackagesQuery,
) -> Result<PackagesPage> {
    page_of(state, Some(ngo_id), &query).await
}

async fn page_of(
    state: &AppState,
    ngo_id: Option<&str>,
    query: &ListPackagesQuery,
) -> Result<PackagesPage> {
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(state.config.default_page_size);
    if page == 0 {
        return Err(AppError::validation("page", "Page must be at least 1"));
    }
    if limit == 0 || limit > MAX_PAGE_SIZE {
        return Err(AppError::validation(
            "limit",
            format!("Limit must be between 1 and {MAX_PAGE_SIZE}"),
        ));
    }
    let text = query.text_filters()?;
    let filter = PackageFilter {
        ngo_id,
        status: query.status,
        item_type: query.item_type,
        urgency_level: query.urgency_level,
        city: text.city,
        country: text.country,
        search: text.search,
        sort_by: query.sort_by.unwrap_or_default(),
        sort_order: query.sort_order.unwrap_or_default(),
    };

    let offset = (page - 1).saturating_mul(limit);
    let (aid_packages, total_items) =
        db::list_packages(&state.pool, &filter, limit, offset).await?;
    let total_pages = u32::try_from((total_items + i64::from(limit) - 1) / i64::from(limit))
        .unwrap_or(u32::MAX);

    Ok(PackagesPage {
        aid_packages,
        pagination: Pagination {
            current_page: page,
            total_pages,
            total_items,
            items_per_page: limit,
        },
    })
}

/// Edit descriptive fields. Financial fields cannot reach this path.
pub async fn update(
    state: &AppState,
    caller: &Caller,
    id: &str,
    req: UpdatePackageRequest,
) -> Result<AidPackage> {
    caller.require(Action::ManagePackage)?;
    let package = load(state, id).await?;
    caller.require_self(&package.ngo_id, "creating NGO")?;
    if package.status.is_terminal() {
        return Err(AppError::invalid_state(
            package.status,
            "Delivered or cancelled packages cannot be edited",
        ));
    }
    let expected_delivery_at = req.validate()?;

    let edits = PackageEdits {
        title: req.title.as_deref().map(str::trim),
        description: req.description.as_deref().map(str::trim),
        expected_delivery_at,
        urgency_level: req.urgency_level,
        tags: req.tags.as_deref(),
    };
    if db::update_package_details(&state.pool, id, &edits).await? == 0 {
        let current = load(state, id).await?;
        return Err(AppError::invalid_state(
            current.status,
            "Delivered or cancelled packages cannot be edited",
        ));
    }
    load(state, id).await
}

/// Withdraw a package that has not received any funding.
pub async fn cancel(state: &AppState, caller: &Caller, id: &str) -> Result<AidPackage> {
    caller.require(Action::ManagePackage)?;
    let package = load(state, id).await?;
    caller.require_self(&package.ngo_id, "creating NGO")?;
    ensure_cancellable(&package)?;

    if db::cancel_package(&state.pool, id).await? == 0 {
        // A donation landed between the read and the write.
        let current = load(state, id).await?;
        ensure_cancellable(&current)?;
        return Err(AppError::invalid_state(current.status, "Package cannot be cancelled"));
    }
    info!("Aid package {id} cancelled by {}", caller.id);
    load(state, id).await
}

fn ensure_cancellable(package: &AidPackage) -> Result<()> {
    if package.status != PackageStatus::Active {
        return Err(AppError::invalid_state(
            package.status,
            "Only active packages can be cancelled",
        ));
    }
    if package.current_funding > 0 {
        return Err(AppError::invalid_state(
            package.status,
            "Cannot cancel a package that has received funding",
        ));
    }
    Ok(())
}

/// Re-attempt the create-package mirror call for an unlinked package.
///
/// A package is unlinked until it has both a creation hash and a ledger id;
/// a mined creation whose event was never read still needs the id, since
/// donations are addressed by it. Unlike the creation path, a failure here
/// is reported to the caller.
pub async fn retry_ledger(state: &AppState, caller: &Caller, id: &str) -> Result<PackageResponse> {
    caller.require(Action::ManagePackage)?;
    let package = load(state, id).await?;
    caller.require_self(&package.ngo_id, "creating NGO")?;
    if package.creation_tx_hash.is_some() && package.external_id.is_some() {
        return Err(AppError::invalid_state(
            package.status,
            "Aid package is already recorded on the ledger",
        ));
    }
    if package.status == PackageStatus::Cancelled {
        return Err(AppError::invalid_state(
            package.status,
            "Cancelled packages are not recorded on the ledger",
        ));
    }

    let receipt = state.mirror.create_package(&package).await?;
    if receipt.external_id.is_none() {
        warn!("Aid package {id} retry mined as {} without a ledger id", receipt.tx_hash);
    }
    db::set_package_creation_linkage(&state.pool, id, &receipt.tx_hash, receipt.external_id)
        .await?;
    info!("Aid package {id} linked to ledger by retry: tx {}", receipt.tx_hash);

    Ok(PackageResponse {
        aid_package: load(state, id).await?,
        transaction_hash: Some(receipt.tx_hash),
    })
}

/// Compare the local record with what should have reached the ledger.
pub async fn reconciliation(state: &AppState, id: &str) -> Result<ReconciliationReport> {
    let package = load(state, id).await?;
    let (confirmed_donation_total, failed_donations) =
        db::donation_totals(&state.pool, id).await?;
    let unmirrored_status_updates = db::count_unmirrored_status_updates(&state.pool, id).await?;

    Ok(ReconciliationReport {
        aid_package_id: package.id,
        current_funding: package.current_funding,
        confirmed_donation_total,
        funding_consistent: confirmed_donation_total == package.current_funding,
        failed_donations,
        missing_creation_tx: package.creation_tx_hash.is_none(),
        missing_external_id: package.external_id.is_none(),
        missing_delivery_tx: package.status == PackageStatus::Delivered
            && package.delivery_tx_hash.is_none(),
        unmirrored_status_updates,
    })
}
