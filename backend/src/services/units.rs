//! Unit and pack resolution
//!
//! Loads the catalog rows a quantity refers to and delegates the actual
//! conversion to [`shared::validation::resolve_base_quantity`]. Read-only
//! relative to any surrounding transaction, safe to call repeatedly.

use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use shared::{resolve_base_quantity, OperationMode, ProductPack};

use crate::error::{AppError, AppResult};

/// Unit resolver service
#[derive(Clone)]
pub struct UnitService {
    db: PgPool,
}

/// Catalog facts the mutation paths need about a product.
#[derive(Debug, Clone)]
pub struct ProductInfo {
    pub id: Uuid,
    pub base_unit_id: Uuid,
    pub low_stock_threshold: Option<i64>,
    pub is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct ProductInfoRow {
    id: Uuid,
    base_unit_id: Uuid,
    low_stock_threshold: Option<i64>,
    is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct PackRow {
    id: Uuid,
    product_id: Uuid,
    organization_id: Uuid,
    name: String,
    multiplier: i64,
    allow_in_purchasing: bool,
    allow_in_receiving: bool,
    is_active: bool,
}

impl From<PackRow> for ProductPack {
    fn from(row: PackRow) -> Self {
        ProductPack {
            id: row.id,
            product_id: row.product_id,
            organization_id: row.organization_id,
            name: row.name,
            multiplier: row.multiplier,
            allow_in_purchasing: row.allow_in_purchasing,
            allow_in_receiving: row.allow_in_receiving,
            is_active: row.is_active,
        }
    }
}

impl UnitService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Load a product within the caller's organization.
    pub async fn load_product(
        &self,
        organization_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<ProductInfo> {
        let row = sqlx::query_as::<_, ProductInfoRow>(
            r#"
            SELECT id, base_unit_id, low_stock_threshold, is_active
            FROM products
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(product_id)
        .bind(organization_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        Ok(ProductInfo {
            id: row.id,
            base_unit_id: row.base_unit_id,
            low_stock_threshold: row.low_stock_threshold,
            is_active: row.is_active,
        })
    }

    /// Validate that a variant belongs to the product and organization.
    pub async fn ensure_variant(
        &self,
        organization_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
    ) -> AppResult<()> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM product_variants
                WHERE id = $1 AND product_id = $2 AND organization_id = $3
            )
            "#,
        )
        .bind(variant_id)
        .bind(product_id)
        .bind(organization_id)
        .fetch_one(&self.db)
        .await?;

        if !exists {
            return Err(AppError::NotFound("Product variant".to_string()));
        }
        Ok(())
    }

    async fn load_pack(&self, organization_id: Uuid, pack_id: Uuid) -> AppResult<ProductPack> {
        let row = sqlx::query_as::<_, PackRow>(
            r#"
            SELECT id, product_id, organization_id, name, multiplier,
                   allow_in_purchasing, allow_in_receiving, is_active
            FROM product_packs
            WHERE id = $1 AND organization_id = $2 AND is_active = TRUE
            "#,
        )
        .bind(pack_id)
        .bind(organization_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Pack".to_string()))?;

        Ok(row.into())
    }

    /// Convert a caller-supplied quantity into base units for `product`.
    pub async fn resolve_quantity(
        &self,
        organization_id: Uuid,
        product: &ProductInfo,
        quantity: Decimal,
        unit_id: Option<Uuid>,
        pack_id: Option<Uuid>,
        mode: OperationMode,
    ) -> AppResult<i64> {
        let pack = match pack_id {
            Some(pack_id) => Some(self.load_pack(organization_id, pack_id).await?),
            None => None,
        };

        let qty = resolve_base_quantity(
            product.id,
            product.base_unit_id,
            quantity,
            unit_id,
            pack.as_ref(),
            mode,
        )?;

        Ok(qty)
    }
}
