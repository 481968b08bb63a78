//! Plan-limit gate
//!
//! Billing itself lives outside this service; organizations carry the plan
//! ceilings as columns and workflows consult this gate before creating new
//! org-scoped resources.

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    PurchaseOrders,
    StockCounts,
}

impl LimitKind {
    fn describe(&self) -> &'static str {
        match self {
            LimitKind::PurchaseOrders => "open purchase orders",
            LimitKind::StockCounts => "open stock counts",
        }
    }
}

pub async fn assert_within_limits(
    tx: &mut Transaction<'_, Postgres>,
    organization_id: Uuid,
    kind: LimitKind,
) -> AppResult<()> {
    let limit: Option<i32> = match kind {
        LimitKind::PurchaseOrders => {
            sqlx::query_scalar("SELECT max_open_purchase_orders FROM organizations WHERE id = $1")
                .bind(organization_id)
                .fetch_optional(&mut **tx)
                .await?
                .ok_or_else(|| AppError::NotFound("Organization".to_string()))?
        }
        LimitKind::StockCounts => {
            sqlx::query_scalar("SELECT max_open_stock_counts FROM organizations WHERE id = $1")
                .bind(organization_id)
                .fetch_optional(&mut **tx)
                .await?
                .ok_or_else(|| AppError::NotFound("Organization".to_string()))?
        }
    };

    // NULL means the plan is unlimited.
    let Some(limit) = limit else {
        return Ok(());
    };

    let open: i64 = match kind {
        LimitKind::PurchaseOrders => sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM purchase_orders
            WHERE organization_id = $1
              AND status IN ('draft', 'submitted', 'approved', 'partially_received')
            "#,
        )
        .bind(organization_id)
        .fetch_one(&mut **tx)
        .await?,
        LimitKind::StockCounts => sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM stock_counts
            WHERE organization_id = $1 AND status IN ('draft', 'in_progress')
            "#,
        )
        .bind(organization_id)
        .fetch_one(&mut **tx)
        .await?,
    };

    if open >= limit as i64 {
        return Err(AppError::PlanLimitExceeded(format!(
            "plan allows at most {} {}",
            limit,
            kind.describe()
        )));
    }

    Ok(())
}
