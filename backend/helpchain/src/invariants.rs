//! Invariant assertions applied after lifecycle steps in tests.

use crate::api::AppState;
use crate::db;
use crate::models::{AidPackage, Delivery};
use crate::types::{DeliveryStatus, PackageStatus};

/// Funding never goes negative.
pub fn assert_funding_non_negative(package: &AidPackage) {
    assert!(
        package.current_funding >= 0,
        "package {} has negative funding ({})",
        package.id,
        package.current_funding
    );
}

/// The funded flag agrees with the totals, and Funded or later statuses
/// are only reached by meeting the goal.
pub fn assert_funded_flag_consistent(package: &AidPackage) {
    if package.is_funded {
        assert!(
            package.current_funding >= package.funding_goal,
            "package {} is flagged funded at {} of {}",
            package.id,
            package.current_funding,
            package.funding_goal
        );
    }
    let past_funding = matches!(
        package.status,
        PackageStatus::Funded | PackageStatus::InDelivery | PackageStatus::Delivered
    );
    assert_eq!(
        past_funding, package.is_funded,
        "package {} is {} with is_funded = {}",
        package.id, package.status, package.is_funded
    );
    if package.status == PackageStatus::Active && package.current_funding > 0 {
        assert!(
            package.current_funding < package.funding_goal,
            "package {} is still Active at {} of {}",
            package.id,
            package.current_funding,
            package.funding_goal
        );
    }
}

/// Cancelled packages never held funds.
pub fn assert_cancelled_unfunded(package: &AidPackage) {
    if package.status == PackageStatus::Cancelled {
        assert_eq!(
            package.current_funding, 0,
            "cancelled package {} holds funding",
            package.id
        );
    }
}

/// The delivered flag and the volunteer assignment follow the status.
pub fn assert_delivery_flags(package: &AidPackage) {
    assert_eq!(
        package.is_delivered,
        package.status == PackageStatus::Delivered,
        "package {} is {} with is_delivered = {}",
        package.id,
        package.status,
        package.is_delivered
    );
    if package.status == PackageStatus::InDelivery {
        assert!(
            package.assigned_volunteer.is_some(),
            "package {} is in delivery without a volunteer",
            package.id
        );
    }
}

/// Run all stateless package invariants.
pub fn assert_package_invariants(package: &AidPackage) {
    assert_funding_non_negative(package);
    assert_funded_flag_consistent(package);
    assert_cancelled_unfunded(package);
    assert_delivery_flags(package);
}

/// Each reached status carries its timestamp, and timestamps never run
/// backward along the forward path.
pub fn assert_delivery_invariants(delivery: &Delivery) {
    let reached = |status: DeliveryStatus, at: Option<i64>| {
        let expected = match delivery.status {
            DeliveryStatus::Pledged => status == DeliveryStatus::Pledged,
            DeliveryStatus::PickedUp => status != DeliveryStatus::InTransit,
            DeliveryStatus::InTransit => true,
            DeliveryStatus::Delivered => true,
            DeliveryStatus::Failed | DeliveryStatus::Cancelled => return,
        };
        if expected {
            assert!(
                at.is_some(),
                "delivery {} is {} without a {status} timestamp",
                delivery.id,
                delivery.status
            );
        }
    };
    reached(DeliveryStatus::PickedUp, delivery.picked_up_at);
    reached(DeliveryStatus::InTransit, delivery.in_transit_at);

    let path = [
        Some(delivery.pledged_at),
        delivery.picked_up_at,
        delivery.in_transit_at,
        delivery.delivered_at,
    ];
    let stamps: Vec<i64> = path.into_iter().flatten().collect();
    assert!(
        stamps.windows(2).all(|w| w[0] <= w[1]),
        "delivery {} has out-of-order timestamps {stamps:?}",
        delivery.id
    );
    assert_eq!(
        delivery.delivered_at.is_some(),
        delivery.status == DeliveryStatus::Delivered,
        "delivery {} is {} with delivered_at = {:?}",
        delivery.id,
        delivery.status,
        delivery.delivered_at
    );
}

/// At most one delivery per package is neither failed nor cancelled.
pub async fn assert_single_active_delivery(state: &AppState, package_id: &str) {
    let (open,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM deliveries WHERE aid_package_id = ?1 AND status NOT IN ('failed', 'cancelled')",
    )
    .bind(package_id)
    .fetch_one(&state.pool)
    .await
    .unwrap();
    assert!(
        open <= 1,
        "package {package_id} has {open} active deliveries"
    );
}

/// Confirmed donations add up to the package's funding.
pub async fn assert_funding_matches_donations(state: &AppState, package_id: &str) {
    let package = db::get_package(&state.pool, package_id)
        .await
        .unwrap()
        .unwrap();
    let (confirmed, _) = db::donation_totals(&state.pool, package_id).await.unwrap();
    assert_eq!(
        confirmed, package.current_funding,
        "package {package_id} funding {} disagrees with confirmed donations {confirmed}",
        package.current_funding
    );
}
