//! Chain mirror: records lifecycle events on the HelpChain contract.
//!
//! The contract is reached through a signing relayer that speaks JSON-RPC 2.0
//! and answers each call with the mined transaction hash, its block number and
//! the contract events it emitted.
//!
//! ## Failure policy
//!
//! * One attempt per call. No retry, no back-off.
//! * Every call is bounded by [`ChainMirror`]'s timeout; a timeout is reported
//!   as [`LedgerError::Timeout`] and treated like any other failure.
//! * Status transitions swallow failures through [`best_effort`]. Donations
//!   propagate them, since a donation only exists once the chain holds it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::AidPackage;
use crate::types::{DeliveryStatus, ItemType};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger call timed out after {0:?}")]
    Timeout(Duration),

    #[error("ledger transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ledger RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed ledger response: {0}")]
    MalformedResponse(String),

    #[error("aid package has no ledger id")]
    Unlinked,

    #[error("ledger integration is disabled")]
    Disabled,
}

/// Facts returned by a successful ledger call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    /// Id assigned by the contract to the entity the call created, if any.
    pub external_id: Option<i64>,
}

// ─────────────────────────────────────────────────────────
// Calls
// ─────────────────────────────────────────────────────────

/// One contract call, carrying only what that call needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    CreatePackage {
        reference: String,
        description: String,
        item_type: ItemType,
        quantity: i64,
        funding_goal: i64,
    },
    Donate {
        package_id: i64,
        donor: String,
        amount: i64,
    },
    PledgeDelivery {
        package_id: i64,
        volunteer: Option<String>,
    },
    UpdateDeliveryStatus {
        package_id: i64,
        status: DeliveryStatus,
    },
    ConfirmDelivery {
        package_id: i64,
        proof: String,
    },
}

impl LedgerCall {
    pub fn method(&self) -> &'static str {
        match self {
            Self::CreatePackage { .. } => "helpchain_createAidPackage",
            Self::Donate { .. } => "helpchain_donateToPackage",
            Self::PledgeDelivery { .. } => "helpchain_pledgeDelivery",
            Self::UpdateDeliveryStatus { .. } => "helpchain_updateDeliveryStatus",
            Self::ConfirmDelivery { .. } => "helpchain_confirmDelivery",
        }
    }

    /// The contract event this call is expected to emit.
    pub fn expected_event(&self) -> EventKind {
        match self {
            Self::CreatePackage { .. } => EventKind::AidPackageCreated,
            Self::Donate { .. } => EventKind::DonationReceived,
            Self::PledgeDelivery { .. } => EventKind::DeliveryPledged,
            Self::UpdateDeliveryStatus { .. } => EventKind::StatusUpdated,
            Self::ConfirmDelivery { .. } => EventKind::DeliveryConfirmed,
        }
    }

    /// JSON-RPC params. Amounts travel as decimal strings (uint256 on-chain).
    fn params(&self, contract: &str) -> Value {
        match self {
            Self::CreatePackage {
                reference,
                description,
                item_type,
                quantity,
                funding_goal,
            } => json!({
                "contract": contract,
                "reference": reference,
                "description": description,
                "itemType": item_type.ledger_index(),
                "quantity": quantity,
                "fundingGoal": funding_goal.to_string(),
            }),
            Self::Donate {
                package_id,
                donor,
                amount,
            } => json!({
                "contract": contract,
                "packageId": package_id,
                "donor": donor,
                "amount": amount.to_string(),
            }),
            Self::PledgeDelivery {
                package_id,
                volunteer,
            } => json!({
                "contract": contract,
                "packageId": package_id,
                "volunteer": volunteer,
            }),
            Self::UpdateDeliveryStatus { package_id, status } => json!({
                "contract": contract,
                "packageId": package_id,
                "status": status.ledger_code(),
            }),
            Self::ConfirmDelivery { package_id, proof } => json!({
                "contract": contract,
                "packageId": package_id,
                "deliveryProof": proof,
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Contract events
// ─────────────────────────────────────────────────────────

/// Events emitted by the HelpChain contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    AidPackageCreated,
    DonationReceived,
    DeliveryPledged,
    StatusUpdated,
    DeliveryConfirmed,
    /// An event from this contract that we don't recognise.
    Unknown,
}

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "AidPackageCreated" => Self::AidPackageCreated,
            "DonationReceived" => Self::DonationReceived,
            "DeliveryPledged" => Self::DeliveryPledged,
            "StatusUpdated" => Self::StatusUpdated,
            "DeliveryConfirmed" => Self::DeliveryConfirmed,
            _ => Self::Unknown,
        }
    }

    /// Event arguments that carry the id of the entity the event created.
    fn id_args(self) -> &'static [&'static str] {
        match self {
            Self::AidPackageCreated => &["packageId", "id"],
            Self::DonationReceived => &["donationId"],
            Self::DeliveryPledged => &["deliveryId"],
            Self::StatusUpdated | Self::DeliveryConfirmed | Self::Unknown => &[],
        }
    }
}

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    pub result: Option<TxResult>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxResult {
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawEvent {
    pub event: String,
    #[serde(default)]
    pub args: Value,
}

/// Turn a relayer result into a receipt, reading the created entity's id
/// from the expected event when the call creates one.
pub fn decode_receipt(result: TxResult, expected: EventKind) -> Result<LedgerReceipt, LedgerError> {
    let tx_hash = result
        .tx_hash
        .filter(|h| !h.is_empty())
        .ok_or_else(|| LedgerError::MalformedResponse("missing txHash".to_string()))?;
    let block_number = result
        .block_number
        .ok_or_else(|| LedgerError::MalformedResponse("missing blockNumber".to_string()))?;

    let external_id = result
        .events
        .iter()
        .find(|e| EventKind::from_name(&e.event) == expected)
        .and_then(|e| extract_id(&e.args, expected.id_args()));

    Ok(LedgerReceipt {
        tx_hash,
        block_number,
        external_id,
    })
}

/// Read an integer id from the first matching argument. Accepts JSON numbers,
/// decimal strings and 0x-prefixed hex strings.
fn extract_id(args: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| match args.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => i64::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        },
        _ => None,
    })
}

// ─────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────

/// A way of submitting one contract call.
///
/// Implementations perform exactly one external call per invocation and do
/// not retry. Timeouts are imposed by [`ChainMirror`].
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn submit(&self, call: &LedgerCall) -> Result<LedgerReceipt, LedgerError>;
}

/// JSON-RPC client for the contract relayer.
pub struct JsonRpcLedger {
    client: Client,
    rpc_url: String,
    contract_address: String,
}

impl JsonRpcLedger {
    pub fn new(client: Client, rpc_url: String, contract_address: String) -> Self {
        Self {
            client,
            rpc_url,
            contract_address,
        }
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    async fn submit(&self, call: &LedgerCall) -> Result<LedgerReceipt, LedgerError> {
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": call.method(),
                "params": call.params(&self.contract_address),
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Rpc {
                code: i64::from(status.as_u16()),
                message: format!("relayer answered HTTP {status}"),
            });
        }

        let body: RpcResponse = response.json().await?;
        if let Some(err) = body.error {
            return Err(LedgerError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        let result = body
            .result
            .ok_or_else(|| LedgerError::MalformedResponse("empty result".to_string()))?;

        debug!(
            "{} mined in block {:?} with {} events",
            call.method(),
            result.block_number,
            result.events.len()
        );
        decode_receipt(result, call.expected_event())
    }
}

/// Stand-in used when no relayer is configured.
pub struct DisabledLedger;

#[async_trait]
impl LedgerClient for DisabledLedger {
    async fn submit(&self, _call: &LedgerCall) -> Result<LedgerReceipt, LedgerError> {
        Err(LedgerError::Disabled)
    }
}

// ─────────────────────────────────────────────────────────
// Mirror
// ─────────────────────────────────────────────────────────

/// The process-wide ledger adapter handed to both state machines.
#[derive(Clone)]
pub struct ChainMirror {
    client: Arc<dyn LedgerClient>,
    timeout: Duration,
}

impl ChainMirror {
    pub fn new(client: Arc<dyn LedgerClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn submit(&self, call: LedgerCall) -> Result<LedgerReceipt, LedgerError> {
        match tokio::time::timeout(self.timeout, self.client.submit(&call)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(self.timeout)),
        }
    }

    pub async fn create_package(&self, package: &AidPackage) -> Result<LedgerReceipt, LedgerError> {
        self.submit(LedgerCall::CreatePackage {
            reference: package.id.clone(),
            description: package.description.clone(),
            item_type: package.item_type,
            quantity: package.quantity,
            funding_goal: package.funding_goal,
        })
        .await
    }

    pub async fn record_donation(
        &self,
        package: &AidPackage,
        donor: &str,
        amount: i64,
    ) -> Result<LedgerReceipt, LedgerError> {
        let package_id = package.external_id.ok_or(LedgerError::Unlinked)?;
        self.submit(LedgerCall::Donate {
            package_id,
            donor: donor.to_string(),
            amount,
        })
        .await
    }

    pub async fn pledge(
        &self,
        package: &AidPackage,
        volunteer: Option<&str>,
    ) -> Result<LedgerReceipt, LedgerError> {
        let package_id = package.external_id.ok_or(LedgerError::Unlinked)?;
        self.submit(LedgerCall::PledgeDelivery {
            package_id,
            volunteer: volunteer.map(str::to_string),
        })
        .await
    }

    pub async fn update_status(
        &self,
        package: &AidPackage,
        status: DeliveryStatus,
    ) -> Result<LedgerReceipt, LedgerError> {
        let package_id = package.external_id.ok_or(LedgerError::Unlinked)?;
        self.submit(LedgerCall::UpdateDeliveryStatus { package_id, status })
            .await
    }

    pub async fn confirm(
        &self,
        package: &AidPackage,
        proof: &str,
    ) -> Result<LedgerReceipt, LedgerError> {
        let package_id = package.external_id.ok_or(LedgerError::Unlinked)?;
        self.submit(LedgerCall::ConfirmDelivery {
            package_id,
            proof: proof.to_string(),
        })
        .await
    }
}

/// Degrade a failed mirror call to "no ledger linkage".
pub fn best_effort(
    operation: &str,
    entity_id: &str,
    result: Result<LedgerReceipt, LedgerError>,
) -> Option<LedgerReceipt> {
    match result {
        Ok(receipt) => {
            info!(
                "{operation} mirrored for {entity_id}: tx {} (block {})",
                receipt.tx_hash, receipt.block_number
            );
            Some(receipt)
        }
        Err(e) => {
            warn!("{operation} not mirrored for {entity_id}, ledger linkage left empty: {e}");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────
// Scripted ledger for tests
// ─────────────────────────────────────────────────────────


// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::mock::{MockLedger, MockOutcome};
    use super::*;

    fn tx_result(raw: &str) -> TxResult {
        let response: RpcResponse = serde_json::from_str(raw).unwrap();
        response.result.unwrap()
    }

    #[test]
    fn event_kind_from_name() {
        assert_eq!(
            EventKind::from_name("AidPackageCreated"),
            EventKind::AidPackageCreated
        );
        assert_eq!(
            EventKind::from_name("DeliveryConfirmed"),
            EventKind::DeliveryConfirmed
        );
        assert_eq!(EventKind::from_name("Transfer"), EventKind::Unknown);
    }

    #[test]
    fn decode_creation_receipt_reads_package_id() {
        let result = tx_result(
            r#"{"jsonrpc":"2.0","id":1,"result":{
                "txHash":"0xabc","blockNumber":4512,
                "events":[
                    {"event":"Transfer","args":{"value":"1"}},
                    {"event":"AidPackageCreated","args":{"packageId":"42","ngo":"0x01"}}
                ]}}"#,
        );
        let receipt = decode_receipt(result, EventKind::AidPackageCreated).unwrap();
        assert_eq!(receipt.tx_hash, "0xabc");
        assert_eq!(receipt.block_number, 4512);
        assert_eq!(receipt.external_id, Some(42));
    }

    #[test]
    fn decode_accepts_hex_and_numeric_ids() {
        let hex = tx_result(
            r#"{"result":{"txHash":"0x1","blockNumber":1,
                "events":[{"event":"DeliveryPledged","args":{"deliveryId":"0x2a"}}]}}"#,
        );
        assert_eq!(
            decode_receipt(hex, EventKind::DeliveryPledged)
                .unwrap()
                .external_id,
            Some(42)
        );

        let number = tx_result(
            r#"{"result":{"txHash":"0x1","blockNumber":1,
                "events":[{"event":"DonationReceived","args":{"donationId":7}}]}}"#,
        );
        assert_eq!(
            decode_receipt(number, EventKind::DonationReceived)
                .unwrap()
                .external_id,
            Some(7)
        );
    }

    #[test]
    fn decode_without_hash_is_malformed() {
        let result = tx_result(r#"{"result":{"blockNumber":9,"events":[]}}"#);
        assert!(matches!(
            decode_receipt(result, EventKind::StatusUpdated),
            Err(LedgerError::MalformedResponse(_))
        ));
    }

    #[test]
    fn status_params_use_contract_codes() {
        let call = LedgerCall::UpdateDeliveryStatus {
            package_id: 3,
            status: DeliveryStatus::InTransit,
        };
        let params = call.params("0xC0");
        assert_eq!(params["status"], 2);
        assert_eq!(params["packageId"], 3);
        assert_eq!(call.method(), "helpchain_updateDeliveryStatus");
    }

    #[tokio::test]
    async fn hung_call_times_out() {
        let ledger = Arc::new(MockLedger::new());
        ledger.push(MockOutcome::Hang);
        let mirror = ChainMirror::new(ledger.clone(), Duration::from_millis(20));

        let call = LedgerCall::ConfirmDelivery {
            package_id: 1,
            proof: "OTP:123456".to_string(),
        };
        let err = mirror.submit(call).await.unwrap_err();
        assert!(matches!(err, LedgerError::Timeout(_)));
        assert_eq!(ledger.calls().len(), 1);
    }

    #[tokio::test]
    async fn disabled_ledger_always_fails() {
        let mirror = ChainMirror::new(Arc::new(DisabledLedger), Duration::from_secs(1));
        let call = LedgerCall::Donate {
            package_id: 1,
            donor: "0x00".to_string(),
            amount: 5,
        };
        assert!(matches!(
            mirror.submit(call).await,
            Err(LedgerError::Disabled)
        ));
    }

    #[test]
    fn best_effort_swallows_failures() {
        assert!(best_effort("pledge", "d-1", Err(LedgerError::Unlinked)).is_none());
        let receipt = LedgerReceipt {
            tx_hash: "0x1".to_string(),
            block_number: 1,
            external_id: None,
        };
        assert_eq!(
            best_effort("pledge", "d-1", Ok(receipt.clone())),
            Some(receipt)
        );
    }
}
