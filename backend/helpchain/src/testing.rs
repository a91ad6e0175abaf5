//! Shared fixtures for the lifecycle tests.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;

use crate::api::AppState;
use crate::auth::Caller;
use crate::config::Config;
use crate::db;
use crate::ledger::mock::MockLedger;
use crate::ledger::ChainMirror;
use crate::models::{AidPackage, CreatePackageRequest, DeliveryLocation, DonationRequest};
use crate::types::{ItemType, Role, Unit};
use crate::{donations, packages};

pub const DONOR_ADDRESS: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

pub fn test_config() -> Config {
    let mut config = Config::from_lookup(|_| None).unwrap();
    config.ledger_timeout = Duration::from_millis(50);
    config
}

/// Fresh in-memory database wired to a scripted ledger.
pub async fn state() -> (AppState, Arc<MockLedger>) {
    state_on(db::test_pool().await)
}

/// Like [`state`], on a multi-connection database so spawned requests
/// really overlap.
pub async fn concurrent_state() -> (AppState, Arc<MockLedger>) {
    state_on(db::shared_test_pool().await)
}

fn state_on(pool: SqlitePool) -> (AppState, Arc<MockLedger>) {
    let config = test_config();
    let ledger = Arc::new(MockLedger::new());
    let state = AppState {
        pool,
        mirror: ChainMirror::new(ledger.clone(), config.ledger_timeout),
        config,
    };
    (state, ledger)
}

pub fn ngo() -> Caller {
    Caller::new("ngo-1", Role::Ngo)
}

pub fn other_ngo() -> Caller {
    Caller::new("ngo-2", Role::Ngo)
}

pub fn donor() -> Caller {
    Caller::new("donor-1", Role::Donor)
}

pub fn volunteer() -> Caller {
    Caller::new("volunteer-1", Role::Volunteer)
}

pub fn other_volunteer() -> Caller {
    Caller::new("volunteer-2", Role::Volunteer)
}

pub fn create_request(funding_goal: i64) -> CreatePackageRequest {
    CreatePackageRequest {
        title: "Rice for Kakuma".to_string(),
        description: "Two weeks of staple food for displaced families".to_string(),
        item_type: ItemType::Food,
        quantity: 50,
        unit: Unit::Kg,
        funding_goal,
        currency: None,
        delivery_location: DeliveryLocation {
            address: "Block 4, Kakuma Camp".to_string(),
            city: "Kakuma".to_string(),
            country: "Kenya".to_string(),
        },
        expected_delivery_date: "2026-12-01".to_string(),
        beneficiary_count: 30,
        urgency_level: None,
        tags: Some(vec!["food".to_string()]),
    }
}

/// An Active package owned by [`ngo`].
pub async fn package(state: &AppState, funding_goal: i64) -> AidPackage {
    packages::create(state, &ngo(), create_request(funding_goal))
        .await
        .unwrap()
        .aid_package
}

pub async fn donate(state: &AppState, package_id: &str, amount: i64) -> AidPackage {
    donations::record(
        state,
        &donor(),
        package_id,
        DonationRequest {
            amount,
            donor_address: DONOR_ADDRESS.to_string(),
            message: None,
            is_anonymous: false,
        },
    )
    .await
    .unwrap()
    .aid_package
}

/// A package that has just reached its goal.
pub async fn funded_package(state: &AppState) -> AidPackage {
    let package = package(state, 100).await;
    donate(state, &package.id, 100).await
}
