//! Delivery lifecycle.
//!
//! Every transition commits the delivery row, the package flip it implies and
//! a status-log row in one transaction, guarded by the status the request
//! observed. The chain mirror is called after the commit; its hash, when
//! there is one, is written back to the delivery, the log row and (on
//! confirmation) the package.

use sqlx::SqliteConnection;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::Caller;
use crate::db;
use crate::errors::{is_unique_violation, AppError, Result};
use crate::ledger::best_effort;
use crate::models::{
    AidPackage, CloseDeliveryRequest, ConfirmRequest, Delivery, DeliveryResponse,
    DeliveryTimeline, PledgeRequest, StatusUpdateRequest, VerificationCodeResponse,
};
use crate::packages;
use crate::types::{Action, Advance, AdvanceError, DeliveryStatus, PackageStatus, ProofType};
use crate::verification::{self, CodeRejection};

// ─────────────────────────────────────────────────────────
// Lookups
// ─────────────────────────────────────────────────────────

async fn load_delivery(state: &AppState, id: &str) -> Result<Delivery> {
    db::get_delivery(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Delivery"))
}

/// The package's delivery that has not failed or been cancelled.
async fn current_delivery(state: &AppState, package_id: &str) -> Result<Delivery> {
    db::current_delivery_for_package(&state.pool, package_id)
        .await?
        .ok_or_else(|| AppError::not_found("Delivery"))
}

/// Package and delivery for a volunteer acting on their own delivery.
async fn assigned(
    state: &AppState,
    caller: &Caller,
    package_id: &str,
) -> Result<(AidPackage, Delivery)> {
    caller.require(Action::WorkDelivery)?;
    let package = packages::load(state, package_id).await?;
    let delivery = current_delivery(state, package_id).await?;
    caller.require_self(&delivery.volunteer_id, "assigned volunteer")?;
    Ok((package, delivery))
}

async fn respond(
    state: &AppState,
    delivery_id: &str,
    transaction_hash: Option<String>,
) -> Result<DeliveryResponse> {
    let delivery = load_delivery(state, delivery_id).await?;
    let aid_package = packages::load(state, &delivery.aid_package_id).await?;
    Ok(DeliveryResponse {
        delivery,
        aid_package,
        transaction_hash,
    })
}

/// Record the mirrored hash of a logged transition.
async fn link_status_update(
    state: &AppState,
    update_id: i64,
    tx_hash: Option<&str>,
) -> Result<()> {
    if let Some(hash) = tx_hash {
        db::set_status_update_tx(&state.pool, update_id, hash).await?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Transitions
// ─────────────────────────────────────────────────────────

/// Volunteer takes on a funded package. The package moves to InDelivery.
pub async fn pledge(
    state: &AppState,
    caller: &Caller,
    package_id: &str,
    req: PledgeRequest,
) -> Result<DeliveryResponse> {
    caller.require(Action::PledgeDelivery)?;
    req.validate()?;
    let package = packages::load(state, package_id).await?;
    if package.status != PackageStatus::Funded {
        return Err(AppError::invalid_state(
            package.status,
            "Aid package is not available for delivery",
        ));
    }

    let now = db::now();
    let delivery = Delivery {
        id: Uuid::new_v4().to_string(),
        external_id: None,
        aid_package_id: package.id.clone(),
        volunteer_id: caller.id.clone(),
        volunteer_address: req.volunteer_address.clone(),
        status: DeliveryStatus::Pledged,
        transport_method: req.transport_method,
        pledged_at: now,
        picked_up_at: None,
        in_transit_at: None,
        delivered_at: None,
        closed_at: None,
        failure_reason: None,
        delivery_proof: None,
        proof_type: None,
        is_verified: false,
        verification_code: None,
        verification_issued_at: None,
        verification_attempts: 0,
        pledge_tx_hash: None,
        confirmation_tx_hash: None,
        created_at: now,
        updated_at: now,
    };

    let mut tx = state.pool.begin().await?;
    insert_delivery(&mut *tx, &delivery).await?;
    if db::mark_package_in_delivery(&mut *tx, &package.id, &caller.id).await? == 0 {
        tx.rollback().await?;
        let current = packages::load(state, package_id).await?;
        return Err(AppError::invalid_state(
            current.status,
            "Aid package is not available for delivery",
        ));
    }
    let update_id = db::insert_status_update(&mut *tx, &delivery.id, DeliveryStatus::Pledged, now)
        .await?;
    tx.commit().await?;
    info!(
        "Delivery {} pledged by {} for package {package_id}",
        delivery.id, caller.id
    );

    let receipt = best_effort(
        "pledge_delivery",
        &delivery.id,
        state
            .mirror
            .pledge(&package, req.volunteer_address.as_deref())
            .await,
    );
    if let Some(r) = &receipt {
        db::set_delivery_pledge_linkage(&state.pool, &delivery.id, &r.tx_hash, r.external_id)
            .await?;
    }
    link_status_update(state, update_id, receipt.as_ref().map(|r| r.tx_hash.as_str())).await?;

    respond(state, &delivery.id, receipt.map(|r| r.tx_hash)).await
}

async fn insert_delivery(conn: &mut SqliteConnection, delivery: &Delivery) -> Result<()> {
    match db::insert_delivery(conn, delivery).await {
        Err(AppError::Database(e)) if is_unique_violation(&e) => Err(AppError::invalid_state(
            PackageStatus::InDelivery,
            "Aid package already has an active delivery",
        )),
        other => other,
    }
}

/// Move the delivery one step along Pledged → PickedUp → InTransit.
///
/// Repeating the current status is a no-op and makes no ledger call.
pub async fn advance(
    state: &AppState,
    caller: &Caller,
    package_id: &str,
    req: StatusUpdateRequest,
) -> Result<DeliveryResponse> {
    let (package, delivery) = assigned(state, caller, package_id).await?;

    let target = match delivery.status.plan_advance(req.status) {
        Ok(Advance::Unchanged) => return respond(state, &delivery.id, None).await,
        Ok(Advance::To(target)) => target,
        Err(e @ AdvanceError::NotAnUpdateTarget(_)) => {
            return Err(AppError::validation("status", e.to_string()))
        }
        Err(e) => return Err(AppError::invalid_state(delivery.status, e.to_string())),
    };

    let now = db::now();
    let mut tx = state.pool.begin().await?;
    if db::advance_delivery(&mut *tx, &delivery.id, delivery.status, target, now).await? == 0 {
        tx.rollback().await?;
        let current = load_delivery(state, &delivery.id).await?;
        return Err(AppError::invalid_state(
            current.status,
            "Delivery status changed concurrently",
        ));
    }
    let update_id = db::insert_status_update(&mut *tx, &delivery.id, target, now).await?;
    tx.commit().await?;
    info!("Delivery {} moved {} → {target}", delivery.id, delivery.status);

    let receipt = best_effort(
        "update_delivery_status",
        &delivery.id,
        state.mirror.update_status(&package, target).await,
    );
    link_status_update(state, update_id, receipt.as_ref().map(|r| r.tx_hash.as_str())).await?;

    respond(state, &delivery.id, receipt.map(|r| r.tx_hash)).await
}

/// Close an in-transit delivery with proof. The package becomes Delivered.
pub async fn confirm(
    state: &AppState,
    caller: &Caller,
    package_id: &str,
    req: ConfirmRequest,
) -> Result<DeliveryResponse> {
    let (package, delivery) = assigned(state, caller, package_id).await?;
    match delivery.status {
        DeliveryStatus::Delivered => return Err(AppError::AlreadyConfirmed),
        DeliveryStatus::InTransit => {}
        other => {
            return Err(AppError::invalid_state(
                other,
                "Delivery must be in transit to be confirmed",
            ))
        }
    }

    let proof = req.proof.trim();
    if proof.is_empty() {
        return Err(AppError::validation("proof", "Delivery proof is required"));
    }

    let now = db::now();
    let verified = delivery.verification_code.is_some();
    if verified {
        check_code(state, &delivery, req.otp.as_deref(), now).await?;
    }
    let proof_type = req
        .proof_type
        .unwrap_or(if verified { ProofType::Otp } else { ProofType::Other });

    let mut tx = state.pool.begin().await?;
    if db::confirm_delivery(&mut *tx, &delivery.id, proof, proof_type, verified, now).await? == 0 {
        tx.rollback().await?;
        let current = load_delivery(state, &delivery.id).await?;
        if current.status == DeliveryStatus::Delivered {
            return Err(AppError::AlreadyConfirmed);
        }
        return Err(AppError::invalid_state(
            current.status,
            "Delivery must be in transit to be confirmed",
        ));
    }
    if db::mark_package_delivered(&mut *tx, &package.id).await? == 0 {
        tx.rollback().await?;
        let current = packages::load(state, package_id).await?;
        return Err(AppError::invalid_state(
            current.status,
            "Aid package is not in delivery",
        ));
    }
    let update_id =
        db::insert_status_update(&mut *tx, &delivery.id, DeliveryStatus::Delivered, now).await?;
    tx.commit().await?;
    info!("Delivery {} confirmed; package {package_id} delivered", delivery.id);

    let receipt = best_effort(
        "confirm_delivery",
        &delivery.id,
        state.mirror.confirm(&package, proof).await,
    );
    if let Some(r) = &receipt {
        db::set_delivery_confirmation_tx(&state.pool, &delivery.id, &r.tx_hash).await?;
        db::set_package_delivery_tx(&state.pool, &package.id, &r.tx_hash).await?;
    }
    link_status_update(state, update_id, receipt.as_ref().map(|r| r.tx_hash.as_str())).await?;

    respond(state, &delivery.id, receipt.map(|r| r.tx_hash)).await
}

async fn check_code(
    state: &AppState,
    delivery: &Delivery,
    otp: Option<&str>,
    now: i64,
) -> Result<()> {
    let policy = state.code_policy();
    let outcome = match verification::submitted(otp) {
        Ok(code) => {
            let issued =
                db::claim_verification_attempt(&state.pool, &delivery.id, policy.max_attempts)
                    .await?;
            policy.check(issued.as_ref(), code, now)
        }
        Err(rejection) => Err(rejection),
    };
    outcome.map_err(|rejection| {
        if rejection == CodeRejection::Locked {
            warn!("Delivery {} verification is locked", delivery.id);
        }
        AppError::validation("otp", rejection.to_string())
    })
}

/// Abandon a delivery as Failed or Cancelled, handing the package back to
/// the pool of funded packages.
pub async fn close(
    state: &AppState,
    caller: &Caller,
    package_id: &str,
    outcome: DeliveryStatus,
    req: CloseDeliveryRequest,
) -> Result<DeliveryResponse> {
    debug_assert!(matches!(
        outcome,
        DeliveryStatus::Failed | DeliveryStatus::Cancelled
    ));
    let (package, delivery) = assigned(state, caller, package_id).await?;
    if delivery.status.is_terminal() {
        return Err(AppError::invalid_state(
            delivery.status,
            "Delivery is already closed",
        ));
    }
    let reason = req
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());
    if reason.is_some_and(|r| r.chars().count() > 500) {
        return Err(AppError::validation("reason", "Reason too long"));
    }

    let now = db::now();
    let mut tx = state.pool.begin().await?;
    if db::close_delivery(&mut *tx, &delivery.id, outcome, reason, now).await? == 0 {
        tx.rollback().await?;
        let current = load_delivery(state, &delivery.id).await?;
        return Err(AppError::invalid_state(
            current.status,
            "Delivery is already closed",
        ));
    }
    if db::release_package(&mut *tx, &package.id).await? == 0 {
        tx.rollback().await?;
        let current = packages::load(state, package_id).await?;
        return Err(AppError::invalid_state(
            current.status,
            "Aid package is not in delivery",
        ));
    }
    let update_id = db::insert_status_update(&mut *tx, &delivery.id, outcome, now).await?;
    tx.commit().await?;
    info!(
        "Delivery {} closed as {outcome}; package {package_id} is funded again",
        delivery.id
    );

    let receipt = best_effort(
        "update_delivery_status",
        &delivery.id,
        state.mirror.update_status(&package, outcome).await,
    );
    link_status_update(state, update_id, receipt.as_ref().map(|r| r.tx_hash.as_str())).await?;

    respond(state, &delivery.id, receipt.map(|r| r.tx_hash)).await
}

/// Issue a fresh verification code for the package's open delivery.
pub async fn issue_code(
    state: &AppState,
    caller: &Caller,
    package_id: &str,
) -> Result<VerificationCodeResponse> {
    caller.require(Action::ManagePackage)?;
    let package = packages::load(state, package_id).await?;
    caller.require_self(&package.ngo_id, "creating NGO")?;
    let delivery = current_delivery(state, package_id).await?;
    if delivery.status.is_terminal() {
        return Err(AppError::invalid_state(
            delivery.status,
            "Delivery is already closed",
        ));
    }

    let code = verification::generate_code();
    let issued_at = db::now();
    if db::set_verification_code(&state.pool, &delivery.id, &code, issued_at).await? == 0 {
        let current = load_delivery(state, &delivery.id).await?;
        return Err(AppError::invalid_state(
            current.status,
            "Delivery is already closed",
        ));
    }
    info!("Verification code issued for delivery {}", delivery.id);

    Ok(VerificationCodeResponse {
        delivery_id: delivery.id,
        verification_code: code,
        expires_at: state.code_policy().expires_at(issued_at),
    })
}

// ─────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────

/// Funded packages waiting for a volunteer.
pub async fn available(state: &AppState, caller: &Caller) -> Result<Vec<AidPackage>> {
    caller.require(Action::PledgeDelivery)?;
    db::available_packages(&state.pool).await
}

pub async fn mine(state: &AppState, caller: &Caller) -> Result<Vec<Delivery>> {
    caller.require(Action::WorkDelivery)?;
    db::deliveries_for_volunteer(&state.pool, &caller.id).await
}

/// The package's open or delivered delivery with its status log.
pub async fn timeline(state: &AppState, package_id: &str) -> Result<DeliveryTimeline> {
    packages::load(state, package_id).await?;
    let delivery = current_delivery(state, package_id).await?;
    let status_updates = db::status_updates_for_delivery(&state.pool, &delivery.id).await?;
    Ok(DeliveryTimeline {
        delivery,
        status_updates,
    })
}
