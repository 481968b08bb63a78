//! Purchase order models and state machine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::VariantKey;

/// Purchase order status lifecycle. Transitions are forward-only; see
/// [`PurchaseOrderStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Submitted,
    Approved,
    PartiallyReceived,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Submitted => "submitted",
            PurchaseOrderStatus::Approved => "approved",
            PurchaseOrderStatus::PartiallyReceived => "partially_received",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PurchaseOrderStatus::Draft),
            "submitted" => Some(PurchaseOrderStatus::Submitted),
            "approved" => Some(PurchaseOrderStatus::Approved),
            "partially_received" => Some(PurchaseOrderStatus::PartiallyReceived),
            "received" => Some(PurchaseOrderStatus::Received),
            "cancelled" => Some(PurchaseOrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Received | PurchaseOrderStatus::Cancelled
        )
    }

    /// Whether an order in this status is holding on-order quantity on the
    /// snapshots of its lines.
    pub fn holds_on_order(&self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Submitted
                | PurchaseOrderStatus::Approved
                | PurchaseOrderStatus::PartiallyReceived
        )
    }

    /// The allowed-transition table. Everything not listed here is an
    /// invalid transition.
    pub fn can_transition_to(&self, next: PurchaseOrderStatus) -> bool {
        use PurchaseOrderStatus::*;
        matches!(
            (self, next),
            (Draft, Submitted)
                | (Draft, Cancelled)
                | (Submitted, Approved)
                | (Submitted, Cancelled)
                | (Approved, PartiallyReceived)
                | (Approved, Received)
                | (PartiallyReceived, Received)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub store_id: Uuid,
    pub supplier_id: Uuid,
    pub status: PurchaseOrderStatus,
    pub note: Option<String>,
    pub created_by: Option<Uuid>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One line of a purchase order. Quantities are in base units; mutable only
/// while the order is draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub id: Uuid,
    pub purchase_order_id: Uuid,
    pub product_id: Uuid,
    pub variant_key: VariantKey,
    pub qty_ordered: i64,
    pub qty_received: i64,
    pub unit_cost: Option<Decimal>,
}

impl PurchaseOrderLine {
    pub fn qty_remaining(&self) -> i64 {
        (self.qty_ordered - self.qty_received).max(0)
    }

    pub fn is_fully_received(&self) -> bool {
        self.qty_received >= self.qty_ordered
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseOrderWithLines {
    #[serde(flatten)]
    pub order: PurchaseOrder,
    pub lines: Vec<PurchaseOrderLine>,
}

/// Planned effect of receiving one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineReceipt {
    pub line_id: Uuid,
    pub product_id: Uuid,
    pub variant_key: VariantKey,
    /// Quantity being received now, base units.
    pub receive_qty: i64,
    /// How much to subtract from the snapshot's on-order counter: never
    /// more than the line's remaining ordered quantity.
    pub on_order_decrement: i64,
    pub new_received_total: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReceiptPlanError {
    #[error("line {0} does not belong to this purchase order")]
    UnknownLine(Uuid),
    #[error("line {line_id} would exceed ordered quantity ({requested} > {remaining} remaining)")]
    OverReceive {
        line_id: Uuid,
        requested: i64,
        remaining: i64,
    },
    #[error("receive quantity must be positive")]
    NonPositiveQuantity,
    #[error("nothing left to receive")]
    NothingToReceive,
}

/// Plan a receipt against the order's lines.
///
/// `requested` maps line id to an explicit base-unit quantity; lines absent
/// from a non-empty map are untouched. An empty map means "receive all
/// remaining". Over-receipt beyond the ordered quantity is rejected unless
/// `allow_over_receive`.
pub fn plan_receipt(
    lines: &[PurchaseOrderLine],
    requested: &[(Uuid, i64)],
    allow_over_receive: bool,
) -> Result<Vec<LineReceipt>, ReceiptPlanError> {
    for (line_id, _) in requested {
        if !lines.iter().any(|l| l.id == *line_id) {
            return Err(ReceiptPlanError::UnknownLine(*line_id));
        }
    }

    let mut plan = Vec::new();
    for line in lines {
        let qty = if requested.is_empty() {
            line.qty_remaining()
        } else {
            match requested.iter().find(|(id, _)| *id == line.id) {
                Some((_, qty)) => *qty,
                None => continue,
            }
        };
        if qty == 0 {
            continue;
        }
        if qty < 0 {
            return Err(ReceiptPlanError::NonPositiveQuantity);
        }
        let remaining = line.qty_remaining();
        if qty > remaining && !allow_over_receive {
            return Err(ReceiptPlanError::OverReceive {
                line_id: line.id,
                requested: qty,
                remaining,
            });
        }
        plan.push(LineReceipt {
            line_id: line.id,
            product_id: line.product_id,
            variant_key: line.variant_key.clone(),
            receive_qty: qty,
            on_order_decrement: qty.min(remaining),
            new_received_total: line.qty_received + qty,
        });
    }

    if plan.is_empty() {
        return Err(ReceiptPlanError::NothingToReceive);
    }
    Ok(plan)
}

/// Status an order lands in once the given lines reflect a receipt.
pub fn status_after_receipt(lines: &[PurchaseOrderLine]) -> PurchaseOrderStatus {
    if lines.iter().all(|l| l.is_fully_received()) {
        PurchaseOrderStatus::Received
    } else {
        PurchaseOrderStatus::PartiallyReceived
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(ordered: i64, received: i64) -> PurchaseOrderLine {
        PurchaseOrderLine {
            id: Uuid::new_v4(),
            purchase_order_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            variant_key: VariantKey::base(),
            qty_ordered: ordered,
            qty_received: received,
            unit_cost: None,
        }
    }

    #[test]
    fn transition_table_matches_lifecycle() {
        use PurchaseOrderStatus::*;
        let all = [
            Draft,
            Submitted,
            Approved,
            PartiallyReceived,
            Received,
            Cancelled,
        ];
        let allowed = [
            (Draft, Submitted),
            (Draft, Cancelled),
            (Submitted, Approved),
            (Submitted, Cancelled),
            (Approved, PartiallyReceived),
            (Approved, Received),
            (PartiallyReceived, Received),
        ];
        for from in all {
            for to in all {
                let expect = allowed.contains(&(from, to));
                assert_eq!(from.can_transition_to(to), expect, "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn draft_cannot_jump_to_received() {
        assert!(!PurchaseOrderStatus::Draft.can_transition_to(PurchaseOrderStatus::Received));
    }

    #[test]
    fn terminal_states_allow_nothing() {
        use PurchaseOrderStatus::*;
        for from in [Received, Cancelled] {
            assert!(from.is_terminal());
            for to in [Draft, Submitted, Approved, PartiallyReceived, Received, Cancelled] {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn plan_defaults_to_all_remaining() {
        let lines = vec![line(100, 40), line(50, 50)];
        let plan = plan_receipt(&lines, &[], false).unwrap();
        // Fully received line contributes nothing.
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].receive_qty, 60);
        assert_eq!(plan[0].on_order_decrement, 60);
        assert_eq!(plan[0].new_received_total, 100);
    }

    #[test]
    fn plan_rejects_over_receive_without_flag() {
        let lines = vec![line(100, 40)];
        let err = plan_receipt(&lines, &[(lines[0].id, 70)], false).unwrap_err();
        assert_eq!(
            err,
            ReceiptPlanError::OverReceive {
                line_id: lines[0].id,
                requested: 70,
                remaining: 60,
            }
        );
    }

    #[test]
    fn plan_allows_over_receive_with_flag_but_caps_on_order() {
        let lines = vec![line(100, 40)];
        let plan = plan_receipt(&lines, &[(lines[0].id, 70)], true).unwrap();
        assert_eq!(plan[0].receive_qty, 70);
        // On-order never goes below zero for this line.
        assert_eq!(plan[0].on_order_decrement, 60);
        assert_eq!(plan[0].new_received_total, 110);
    }

    #[test]
    fn plan_rejects_unknown_line() {
        let lines = vec![line(10, 0)];
        let stray = Uuid::new_v4();
        assert_eq!(
            plan_receipt(&lines, &[(stray, 5)], false),
            Err(ReceiptPlanError::UnknownLine(stray))
        );
    }

    #[test]
    fn plan_on_fully_received_order_is_empty() {
        let lines = vec![line(10, 10)];
        assert_eq!(
            plan_receipt(&lines, &[], false),
            Err(ReceiptPlanError::NothingToReceive)
        );
    }

    #[test]
    fn status_after_receipt_distinguishes_partial() {
        assert_eq!(
            status_after_receipt(&[line(100, 40)]),
            PurchaseOrderStatus::PartiallyReceived
        );
        assert_eq!(
            status_after_receipt(&[line(100, 100), line(5, 7)]),
            PurchaseOrderStatus::Received
        );
    }
}
