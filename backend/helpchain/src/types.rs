//! # Types
//!
//! Closed enums shared by every module, and the pure transition rules of the
//! two lifecycles.
//!
//! ## Aid package lifecycle
//!
//! ```text
//! Active ──► Funded ──► InDelivery ──► Delivered
//!    │                      │
//!    ▼                      ▼ (delivery failed / cancelled)
//! Cancelled               Funded
//! ```
//!
//! ## Delivery lifecycle
//!
//! ```text
//! Pledged ──► PickedUp ──► InTransit ──► Delivered
//!    └────────────┴────────────┴──► Failed | Cancelled
//! ```
//!
//! Every enum is stored as snake_case text and serialized to clients in
//! PascalCase.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of an aid package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
pub enum PackageStatus {
    /// Accepting donations.
    Active,
    /// Funding goal reached; waiting for a volunteer.
    Funded,
    /// A volunteer has pledged the delivery.
    InDelivery,
    /// Delivery confirmed. Terminal.
    Delivered,
    /// Withdrawn by the NGO before any funding. Terminal.
    Cancelled,
}

impl PackageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Donations are accepted until the package is handed to a volunteer.
    pub fn accepts_donations(self) -> bool {
        matches!(self, Self::Active | Self::Funded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Funded => "Funded",
            Self::InDelivery => "InDelivery",
            Self::Delivered => "Delivered",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pledged,
    PickedUp,
    InTransit,
    Delivered,
    Failed,
    Cancelled,
}

/// Result of planning a forward status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The delivery is already at the requested status.
    Unchanged,
    /// Move from the current status to the contained one.
    To(DeliveryStatus),
}

/// Why a status update was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceError {
    /// Only `PickedUp` and `InTransit` may be requested through a status update.
    NotAnUpdateTarget(DeliveryStatus),
    /// The delivery already reached a terminal status.
    Terminal(DeliveryStatus),
    /// The request would move the delivery backward.
    Backward {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
    /// The request skips an intermediate status.
    Skipped {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
}

impl fmt::Display for AdvanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnUpdateTarget(s) => {
                write!(f, "{s} cannot be set through a status update")
            }
            Self::Terminal(s) => write!(f, "delivery is already {s}"),
            Self::Backward { from, to } => {
                write!(f, "cannot move a delivery backward from {from} to {to}")
            }
            Self::Skipped { from, to } => {
                write!(f, "cannot move a delivery from {from} to {to} without the intermediate step")
            }
        }
    }
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed | Self::Cancelled)
    }

    /// Position on the forward path, `None` for the abandoned states.
    fn rank(self) -> Option<u8> {
        match self {
            Self::Pledged => Some(0),
            Self::PickedUp => Some(1),
            Self::InTransit => Some(2),
            Self::Delivered => Some(3),
            Self::Failed | Self::Cancelled => None,
        }
    }

    /// Plan a volunteer status update from `self` to `target`.
    ///
    /// Repeating the current status is a no-op so that duplicate submissions
    /// keep the first timestamp.
    pub fn plan_advance(self, target: DeliveryStatus) -> Result<Advance, AdvanceError> {
        if !matches!(target, Self::PickedUp | Self::InTransit) {
            return Err(AdvanceError::NotAnUpdateTarget(target));
        }
        if self == target {
            return Ok(Advance::Unchanged);
        }
        let (Some(from), Some(to)) = (self.rank(), target.rank()) else {
            return Err(AdvanceError::Terminal(self));
        };
        if self.is_terminal() {
            return Err(AdvanceError::Terminal(self));
        }
        if to < from {
            Err(AdvanceError::Backward { from: self, to: target })
        } else if to == from + 1 {
            Ok(Advance::To(target))
        } else {
            Err(AdvanceError::Skipped { from: self, to: target })
        }
    }

    /// Status code understood by the HelpChain contract.
    pub fn ledger_code(self) -> u8 {
        match self {
            Self::Pledged => 0,
            Self::PickedUp => 1,
            Self::InTransit => 2,
            Self::Delivered => 3,
            Self::Failed => 4,
            Self::Cancelled => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pledged => "Pledged",
            Self::PickedUp => "PickedUp",
            Self::InTransit => "InTransit",
            Self::Delivered => "Delivered",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────
// Roles and permissions
// ─────────────────────────────────────────────────────────

/// The three kinds of account the platform knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Ngo,
    Donor,
    Volunteer,
}

/// Role-gated operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreatePackage,
    /// Update, cancel, retry ledger linkage, issue verification codes.
    ManagePackage,
    Donate,
    PledgeDelivery,
    /// Status updates, confirmation, failure and cancellation of a delivery.
    WorkDelivery,
}

impl Role {
    /// Parse the role header value. Accepts any casing.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ngo" => Some(Self::Ngo),
            "donor" => Some(Self::Donor),
            "volunteer" => Some(Self::Volunteer),
            _ => None,
        }
    }

    pub fn may(self, action: Action) -> bool {
        match (self, action) {
            (Self::Ngo, Action::CreatePackage | Action::ManagePackage) => true,
            (Self::Ngo, Action::Donate | Action::PledgeDelivery | Action::WorkDelivery) => false,
            (Self::Donor, Action::Donate) => true,
            (
                Self::Donor,
                Action::CreatePackage
                | Action::ManagePackage
                | Action::PledgeDelivery
                | Action::WorkDelivery,
            ) => false,
            (Self::Volunteer, Action::PledgeDelivery | Action::WorkDelivery) => true,
            (Self::Volunteer, Action::CreatePackage | Action::ManagePackage | Action::Donate) => {
                false
            }
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ngo => "NGO",
            Self::Donor => "Donor",
            Self::Volunteer => "Volunteer",
        })
    }
}

// ─────────────────────────────────────────────────────────
// Descriptive enums
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
pub enum ItemType {
    Food,
    Medicine,
    Clothing,
    Other,
}

impl ItemType {
    /// Index of the item type in the contract's enum.
    pub fn ledger_index(self) -> u8 {
        match self {
            Self::Food => 0,
            Self::Medicine => 1,
            Self::Clothing => 2,
            Self::Other => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "snake_case")]
pub enum Unit {
    Kg,
    Pieces,
    Boxes,
    Bottles,
    Packets,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Eth,
    Matic,
    Usd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
pub enum ProofType {
    #[serde(rename = "OTP")]
    Otp,
    #[serde(rename = "GPS")]
    Gps,
    Photo,
    Signature,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
pub enum TransportMethod {
    Car,
    Motorcycle,
    Bicycle,
    Walking,
    PublicTransport,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
pub enum DonationStatus {
    /// Funds arrived on-chain and were credited to the package.
    Confirmed,
    /// Funds arrived on-chain but the package refused the credit.
    Failed,
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_steps_are_planned() {
        assert_eq!(
            DeliveryStatus::Pledged.plan_advance(DeliveryStatus::PickedUp),
            Ok(Advance::To(DeliveryStatus::PickedUp))
        );
        assert_eq!(
            DeliveryStatus::PickedUp.plan_advance(DeliveryStatus::InTransit),
            Ok(Advance::To(DeliveryStatus::InTransit))
        );
    }

    #[test]
    fn repeated_target_is_a_noop() {
        assert_eq!(
            DeliveryStatus::PickedUp.plan_advance(DeliveryStatus::PickedUp),
            Ok(Advance::Unchanged)
        );
        assert_eq!(
            DeliveryStatus::InTransit.plan_advance(DeliveryStatus::InTransit),
            Ok(Advance::Unchanged)
        );
    }

    #[test]
    fn skipping_pickup_is_rejected() {
        assert_eq!(
            DeliveryStatus::Pledged.plan_advance(DeliveryStatus::InTransit),
            Err(AdvanceError::Skipped {
                from: DeliveryStatus::Pledged,
                to: DeliveryStatus::InTransit
            })
        );
    }

    #[test]
    fn backward_and_terminal_moves_are_rejected() {
        assert_eq!(
            DeliveryStatus::InTransit.plan_advance(DeliveryStatus::PickedUp),
            Err(AdvanceError::Backward {
                from: DeliveryStatus::InTransit,
                to: DeliveryStatus::PickedUp
            })
        );
        assert_eq!(
            DeliveryStatus::Delivered.plan_advance(DeliveryStatus::InTransit),
            Err(AdvanceError::Terminal(DeliveryStatus::Delivered))
        );
        assert_eq!(
            DeliveryStatus::Failed.plan_advance(DeliveryStatus::PickedUp),
            Err(AdvanceError::Terminal(DeliveryStatus::Failed))
        );
    }

    #[test]
    fn only_pickup_and_transit_are_update_targets() {
        for target in [
            DeliveryStatus::Pledged,
            DeliveryStatus::Delivered,
            DeliveryStatus::Failed,
            DeliveryStatus::Cancelled,
        ] {
            assert_eq!(
                DeliveryStatus::Pledged.plan_advance(target),
                Err(AdvanceError::NotAnUpdateTarget(target))
            );
        }
    }

    #[test]
    fn package_donation_window() {
        assert!(PackageStatus::Active.accepts_donations());
        assert!(PackageStatus::Funded.accepts_donations());
        assert!(!PackageStatus::InDelivery.accepts_donations());
        assert!(!PackageStatus::Delivered.accepts_donations());
        assert!(!PackageStatus::Cancelled.accepts_donations());
    }

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!(Role::parse("NGO"), Some(Role::Ngo));
        assert_eq!(Role::parse("volunteer"), Some(Role::Volunteer));
        assert_eq!(Role::parse(" Donor "), Some(Role::Donor));
        assert_eq!(Role::parse("admin"), None);
    }

    #[test]
    fn permissions_follow_roles() {
        assert!(Role::Ngo.may(Action::CreatePackage));
        assert!(!Role::Ngo.may(Action::Donate));
        assert!(Role::Donor.may(Action::Donate));
        assert!(!Role::Donor.may(Action::PledgeDelivery));
        assert!(Role::Volunteer.may(Action::WorkDelivery));
        assert!(!Role::Volunteer.may(Action::ManagePackage));
    }

    #[test]
    fn ledger_codes_match_contract_enum() {
        assert_eq!(DeliveryStatus::PickedUp.ledger_code(), 1);
        assert_eq!(DeliveryStatus::InTransit.ledger_code(), 2);
        assert_eq!(ItemType::Medicine.ledger_index(), 1);
    }
}
