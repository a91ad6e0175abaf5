//! Donation recording, the one chain-first path.
//!
//! The donor's funds move on the ledger, so the ledger call happens before any
//! local write and its failure fails the request. Only a mined donation is
//! credited to the package, through the atomic increment in
//! [`db::apply_funding`].

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::Caller;
use crate::db;
use crate::errors::{is_unique_violation, AppError, Result};
use crate::ledger::LedgerError;
use crate::models::{Donation, DonationRequest, DonationResponse};
use crate::packages;
use crate::types::{Action, DonationStatus};

const ANONYMOUS: &str = "anonymous";

pub async fn record(
    state: &AppState,
    caller: &Caller,
    package_id: &str,
    req: DonationRequest,
) -> Result<DonationResponse> {
    caller.require(Action::Donate)?;
    req.validate()?;
    let package = packages::load(state, package_id).await?;
    if !package.status.accepts_donations() {
        return Err(AppError::invalid_state(
            package.status,
            "Aid package is not accepting donations",
        ));
    }

    let receipt = state
        .mirror
        .record_donation(&package, &req.donor_address, req.amount)
        .await
        .map_err(|e| {
            warn!("Donation to {package_id} refused, ledger call failed: {e}");
            e
        })?;

    let block_number = i64::try_from(receipt.block_number).map_err(|_| {
        error!(
            "Donation {} to {package_id} mined at unrepresentable block {}; not recorded",
            receipt.tx_hash, receipt.block_number
        );
        LedgerError::MalformedResponse(format!(
            "block number {} out of range",
            receipt.block_number
        ))
    })?;

    let mut donation = Donation {
        id: Uuid::new_v4().to_string(),
        aid_package_id: package.id.clone(),
        donor_id: caller.id.clone(),
        donor_address: req.donor_address,
        amount: req.amount,
        currency: package.currency,
        transaction_hash: receipt.tx_hash.clone(),
        block_number,
        external_id: receipt.external_id,
        status: DonationStatus::Confirmed,
        message: req.message,
        is_anonymous: req.is_anonymous,
        created_at: db::now(),
    };

    let mut tx = state.pool.begin().await?;
    match db::apply_funding(&mut *tx, package_id, donation.amount).await? {
        Some((current_funding, status)) => {
            insert(&mut *tx, &donation).await?;
            tx.commit().await?;
            info!(
                "Donation {} of {} credited to {package_id}: funding {current_funding}, status {status}",
                donation.transaction_hash, donation.amount
            );
        }
        None => {
            tx.rollback().await?;
            donation.status = DonationStatus::Failed;
            {
                let mut conn = state.pool.acquire().await?;
                insert(&mut *conn, &donation).await?;
            }
            error!(
                "Donation {} is on the ledger but was not credited to {package_id}; stored as failed",
                donation.transaction_hash
            );
            let current = packages::load(state, package_id).await?;
            return Err(AppError::invalid_state(
                current.status,
                "Aid package stopped accepting donations; the transaction was recorded for reconciliation",
            ));
        }
    }

    Ok(DonationResponse {
        donation,
        aid_package: packages::load(state, package_id).await?,
        transaction_hash: receipt.tx_hash,
    })
}

async fn insert(conn: &mut sqlx::SqliteConnection, donation: &Donation) -> Result<()> {
    match db::insert_donation(conn, donation).await {
        Err(AppError::Database(e)) if is_unique_violation(&e) => Err(AppError::validation(
            "transaction_hash",
            "This transaction has already been recorded",
        )),
        other => other,
    }
}

/// Donations to a package, newest first. Anonymous donors are masked.
pub async fn list_for_package(state: &AppState, package_id: &str) -> Result<Vec<Donation>> {
    packages::load(state, package_id).await?;
    let mut donations = db::donations_for_package(&state.pool, package_id).await?;
    for d in donations.iter_mut().filter(|d| d.is_anonymous) {
        d.donor_id = ANONYMOUS.to_string();
        d.donor_address = ANONYMOUS.to_string();
    }
    Ok(donations)
}

/// A donor's own donation history, newest first.
pub async fn list_for_donor(
    state: &AppState,
    caller: &Caller,
    donor_id: &str,
) -> Result<Vec<Donation>> {
    caller.require(Action::Donate)?;
    caller.require_self(donor_id, "donor")?;
    db::donations_for_donor(&state.pool, donor_id).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::deliveries;
    use crate::invariants::{assert_funding_matches_donations, assert_package_invariants};
    use crate::ledger::mock::MockOutcome;
    use crate::ledger::{ChainMirror, LedgerCall, LedgerClient, LedgerReceipt};
    use crate::models::PledgeRequest;
    use crate::testing::{self, donor, ngo, volunteer, DONOR_ADDRESS};
    use crate::types::PackageStatus;

    fn donation(amount: i64) -> DonationRequest {
        DonationRequest {
            amount,
            donor_address: DONOR_ADDRESS.to_string(),
            message: Some("Stay strong".to_string()),
            is_anonymous: false,
        }
    }

    #[tokio::test]
    async fn goal_reached_flips_to_funded() {
        let (state, _) = testing::state().await;
        let pkg = testing::package(&state, 100).await;

        let first = record(&state, &donor(), &pkg.id, donation(60)).await.unwrap();
        assert_eq!(first.aid_package.status, PackageStatus::Active);
        assert_eq!(first.aid_package.current_funding, 60);
        assert!(!first.aid_package.is_funded);
        assert_eq!(first.donation.status, DonationStatus::Confirmed);
        assert_package_invariants(&first.aid_package);

        let second = record(&state, &donor(), &pkg.id, donation(40)).await.unwrap();
        assert_eq!(second.aid_package.status, PackageStatus::Funded);
        assert_eq!(second.aid_package.current_funding, 100);
        assert!(second.aid_package.is_funded);
        assert_eq!(second.aid_package.funding_tx_hashes.len(), 2);
        assert_package_invariants(&second.aid_package);
        assert_funding_matches_donations(&state, &pkg.id).await;
    }

    #[tokio::test]
    async fn funded_packages_keep_accepting() {
        let (state, _) = testing::state().await;
        let pkg = testing::package(&state, 50).await;
        testing::donate(&state, &pkg.id, 50).await;

        let resp = record(&state, &donor(), &pkg.id, donation(5)).await.unwrap();
        assert_eq!(resp.aid_package.status, PackageStatus::Funded);
        assert_eq!(resp.aid_package.current_funding, 55);
    }

    #[tokio::test]
    async fn ledger_failure_writes_nothing() {
        let (state, ledger) = testing::state().await;
        let pkg = testing::package(&state, 100).await;
        ledger.push(MockOutcome::Fail);

        let err = record(&state, &donor(), &pkg.id, donation(60)).await.unwrap_err();
        assert_eq!(err.kind(), "ledger_call");
        assert_eq!(packages::load(&state, &pkg.id).await.unwrap().current_funding, 0);
        assert!(db::donations_for_package(&state.pool, &pkg.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn ledger_timeout_writes_nothing() {
        let (state, ledger) = testing::state().await;
        let pkg = testing::package(&state, 100).await;
        ledger.push(MockOutcome::Hang);

        let err = record(&state, &donor(), &pkg.id, donation(60)).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(packages::load(&state, &pkg.id).await.unwrap().current_funding, 0);
    }

    #[tokio::test]
    async fn unlinked_package_cannot_receive_donations() {
        let (state, ledger) = testing::state().await;
        ledger.push(MockOutcome::Fail);
        let pkg = testing::package(&state, 100).await;

        let err = record(&state, &donor(), &pkg.id, donation(10)).await.unwrap_err();
        assert_eq!(err.kind(), "ledger_call");
        // Only the failed creation call reached the ledger.
        assert_eq!(ledger.calls().len(), 1);
    }

    #[tokio::test]
    async fn donation_call_carries_ledger_package_id() {
        let (state, ledger) = testing::state().await;
        let pkg = testing::package(&state, 100).await;
        record(&state, &donor(), &pkg.id, donation(25)).await.unwrap();

        assert_eq!(
            ledger.calls().last(),
            Some(&LedgerCall::Donate {
                package_id: pkg.external_id.unwrap(),
                donor: DONOR_ADDRESS.to_string(),
                amount: 25,
            })
        );
    }

    #[tokio::test]
    async fn rejected_inputs_and_states() {
        let (state, ledger) = testing::state().await;
        let pkg = testing::package(&state, 100).await;
        let calls_before = ledger.calls().len();

        let err = record(&state, &donor(), &pkg.id, donation(0)).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        let err = record(&state, &donor(), &pkg.id, donation(-5)).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        let err = record(&state, &ngo(), &pkg.id, donation(5)).await.unwrap_err();
        assert_eq!(err.kind(), "authorization");
        let err = record(&state, &donor(), "missing", donation(5)).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");

        packages::cancel(&state, &ngo(), &pkg.id).await.unwrap();
        let err = record(&state, &donor(), &pkg.id, donation(5)).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_state");
        assert_eq!(ledger.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn in_delivery_packages_refuse_donations() {
        let (state, _) = testing::state().await;
        let pkg = testing::funded_package(&state).await;
        deliveries::pledge(&state, &volunteer(), &pkg.id, PledgeRequest::default())
            .await
            .unwrap();

        match record(&state, &donor(), &pkg.id, donation(5)).await {
            Err(AppError::InvalidState { current, .. }) => assert_eq!(current, "InDelivery"),
            other => panic!("expected invalid state, got {other:?}"),
        }
    }

    /// Ledger that cancels the package while the donation is being mined.
    struct CancelsWhileMining {
        pool: sqlx::SqlitePool,
    }

    #[async_trait::async_trait]
    impl LedgerClient for CancelsWhileMining {
        async fn submit(&self, call: &LedgerCall) -> std::result::Result<LedgerReceipt, LedgerError> {
            if let LedgerCall::Donate { package_id, .. } = call {
                sqlx::query("UPDATE aid_packages SET status = 'cancelled' WHERE external_id = ?1")
                    .bind(*package_id)
                    .execute(&self.pool)
                    .await
                    .unwrap();
            }
            Ok(LedgerReceipt {
                tx_hash: "0xfeed".to_string(),
                block_number: 7,
                external_id: None,
            })
        }
    }

    #[tokio::test]
    async fn refused_credit_is_kept_as_failed() {
        let (state, _) = testing::state().await;
        let pkg = testing::package(&state, 100).await;
        let racing = AppState {
            mirror: ChainMirror::new(
                Arc::new(CancelsWhileMining {
                    pool: state.pool.clone(),
                }),
                state.config.ledger_timeout,
            ),
            ..state.clone()
        };

        match record(&racing, &donor(), &pkg.id, donation(10)).await {
            Err(AppError::InvalidState { current, .. }) => assert_eq!(current, "Cancelled"),
            other => panic!("expected invalid state, got {other:?}"),
        }

        let stored = db::donations_for_package(&state.pool, &pkg.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, DonationStatus::Failed);
        assert_eq!(stored[0].transaction_hash, "0xfeed");

        let report = packages::reconciliation(&state, &pkg.id).await.unwrap();
        assert_eq!(report.current_funding, 0);
        assert_eq!(report.failed_donations, 1);
        assert!(report.funding_consistent);
    }

    /// Ledger whose receipts report a block number past `i64::MAX`.
    struct FarFutureBlock;

    #[async_trait::async_trait]
    impl LedgerClient for FarFutureBlock {
        async fn submit(&self, _call: &LedgerCall) -> std::result::Result<LedgerReceipt, LedgerError> {
            Ok(LedgerReceipt {
                tx_hash: "0xb10c".to_string(),
                block_number: u64::MAX,
                external_id: None,
            })
        }
    }

    #[tokio::test]
    async fn out_of_range_block_number_is_malformed() {
        let (state, _) = testing::state().await;
        let pkg = testing::package(&state, 100).await;
        let far = AppState {
            mirror: ChainMirror::new(Arc::new(FarFutureBlock), state.config.ledger_timeout),
            ..state.clone()
        };

        match record(&far, &donor(), &pkg.id, donation(10)).await {
            Err(AppError::Ledger(LedgerError::MalformedResponse(_))) => {}
            other => panic!("expected malformed ledger response, got {other:?}"),
        }
        assert_eq!(packages::load(&state, &pkg.id).await.unwrap().current_funding, 0);
        assert!(db::donations_for_package(&state.pool, &pkg.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn concurrent_donations_are_not_lost() {
        let (state, _) = testing::concurrent_state().await;
        let pkg = testing::package(&state, 1_000).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let state = state.clone();
            let id = pkg.id.clone();
            handles.push(tokio::spawn(async move {
                record(&state, &donor(), &id, donation(7)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let pkg = packages::load(&state, &pkg.id).await.unwrap();
        assert_eq!(pkg.current_funding, 70);
        assert_eq!(pkg.funding_tx_hashes.len(), 10);
        assert_funding_matches_donations(&state, &pkg.id).await;
    }

    #[tokio::test]
    async fn donor_history_is_private() {
        let (state, _) = testing::state().await;
        let first = testing::package(&state, 100).await;
        let second = testing::package(&state, 100).await;
        let mut req = donation(10);
        req.is_anonymous = true;
        record(&state, &donor(), &first.id, req).await.unwrap();
        record(&state, &donor(), &second.id, donation(20)).await.unwrap();
        let other = Caller::new("donor-2", crate::types::Role::Donor);
        record(&state, &other, &second.id, donation(5)).await.unwrap();

        let history = list_for_donor(&state, &donor(), "donor-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|d| d.donor_id == "donor-1"));
        assert_eq!(history[0].aid_package_id, second.id);

        let err = list_for_donor(&state, &other, "donor-1").await.unwrap_err();
        assert_eq!(err.kind(), "authorization");
        let err = list_for_donor(&state, &ngo(), "ngo-1").await.unwrap_err();
        assert_eq!(err.kind(), "authorization");
    }

    #[tokio::test]
    async fn anonymous_donors_are_masked() {
        let (state, _) = testing::state().await;
        let pkg = testing::package(&state, 100).await;
        let mut req = donation(10);
        req.is_anonymous = true;
        record(&state, &donor(), &pkg.id, req).await.unwrap();
        record(&state, &donor(), &pkg.id, donation(5)).await.unwrap();

        let listed = list_for_package(&state, &pkg.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        let masked = listed.iter().find(|d| d.is_anonymous).unwrap();
        assert_eq!(masked.donor_id, ANONYMOUS);
        let named = listed.iter().find(|d| !d.is_anonymous).unwrap();
        assert_eq!(named.donor_id, "donor-1");
    }
}
