use crate::{
    db::DbPool,
    entities::{
        product::Entity as ProductEntity,
        shipping_method::{self, Entity as ShippingMethodEntity},
    },
    errors::ServiceError,
};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Weight assumed for products without a registered weight, in kilograms.
pub const DEFAULT_ITEM_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShippingQuoteItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EstimatedDays {
    pub min: i32,
    pub max: i32,
}

/// A quoted carrier option. Computed per request, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShippingOption {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub cost: Decimal,
    pub estimated_days: EstimatedDays,
    pub is_free: bool,
}

/// Normalize a CEP: strip formatting, require exactly 8 digits.
pub fn normalize_zip(zip: &str) -> Result<String, ServiceError> {
    let digits: String = zip.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 8 {
        return Err(ServiceError::ValidationError(
            "CEP inválido: deve conter 8 dígitos".to_string(),
        ));
    }
    Ok(digits)
}

/// Flat linear cost model: the first weight unit is covered by the base
/// cost, every unit above it is billed at the per-unit rate. A subtotal at
/// or above `free_above` forces the cost to zero.
pub fn method_cost(
    base_cost: Decimal,
    per_unit_cost: Decimal,
    free_above: Option<Decimal>,
    total_weight: f64,
    cart_subtotal: Decimal,
) -> (Decimal, bool) {
    if let Some(threshold) = free_above {
        if cart_subtotal >= threshold {
            return (Decimal::ZERO, true);
        }
    }

    let billable_weight = (total_weight - 1.0).max(0.0);
    let billable = Decimal::from_f64(billable_weight).unwrap_or(Decimal::ZERO);
    let cost = (base_cost + per_unit_cost * billable).round_dp(2);
    (cost, false)
}

/// Quotes every active shipping method for a cart and destination.
#[derive(Clone)]
pub struct ShippingQuoteService {
    db: Arc<DbPool>,
}

impl ShippingQuoteService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Total cart weight: product weight (default 0.5) times quantity.
    /// Unknown products weigh the default rather than failing the quote.
    async fn total_weight(&self, items: &[ShippingQuoteItem]) -> Result<f64, ServiceError> {
        let mut total = 0.0;
        for item in items {
            let weight = ProductEntity::find_by_id(item.product_id)
                .one(&*self.db)
                .await?
                .and_then(|p| p.weight)
                .unwrap_or(DEFAULT_ITEM_WEIGHT);
            total += weight * f64::from(item.quantity.max(0));
        }
        Ok(total)
    }

    /// Rank-ordered quote of all active methods. The flat-rate model never
    /// excludes a method by weight or destination.
    #[instrument(skip(self, items), fields(item_count = items.len(), zip = %zip_code))]
    pub async fn quote(
        &self,
        items: &[ShippingQuoteItem],
        zip_code: &str,
        cart_subtotal: Decimal,
    ) -> Result<Vec<ShippingOption>, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError("carrinho vazio".to_string()));
        }
        let _zip = normalize_zip(zip_code)?;

        let total_weight = self.total_weight(items).await?;

        let methods = ShippingMethodEntity::find()
            .filter(shipping_method::Column::IsActive.eq(true))
            .order_by_asc(shipping_method::Column::BaseCost)
            .all(&*self.db)
            .await?;

        let options = methods
            .into_iter()
            .map(|method| {
                let (cost, is_free) = method_cost(
                    method.base_cost,
                    method.per_unit_cost,
                    method.free_above,
                    total_weight,
                    cart_subtotal,
                );
                ShippingOption {
                    id: method.id,
                    name: method.name,
                    description: method.description,
                    cost,
                    estimated_days: EstimatedDays {
                        min: method.min_days,
                        max: method.max_days,
                    },
                    is_free,
                }
            })
            .collect::<Vec<_>>();

        info!(
            option_count = options.len(),
            total_weight, "Shipping quote computed"
        );
        Ok(options)
    }

    /// Active methods as configured, cheapest base cost first.
    pub async fn active_methods(&self) -> Result<Vec<shipping_method::Model>, ServiceError> {
        let methods = ShippingMethodEntity::find()
            .filter(shipping_method::Column::IsActive.eq(true))
            .order_by_asc(shipping_method::Column::BaseCost)
            .all(&*self.db)
            .await?;
        Ok(methods)
    }

    /// Recompute the cost of a single method for the order orchestrator.
    /// The quoted-options contract holds: the method must exist and be active.
    #[instrument(skip(self, items))]
    pub async fn cost_for_method(
        &self,
        method_id: Uuid,
        items: &[ShippingQuoteItem],
        cart_subtotal: Decimal,
    ) -> Result<(shipping_method::Model, Decimal), ServiceError> {
        let method = ShippingMethodEntity::find_by_id(method_id)
            .one(&*self.db)
            .await?
            .filter(|m| m.is_active)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Shipping method {} not found", method_id))
            })?;

        let total_weight = self.total_weight(items).await?;
        let (cost, _) = method_cost(
            method.base_cost,
            method.per_unit_cost,
            method.free_above,
            total_weight,
            cart_subtotal,
        );
        Ok((method, cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case("01310-100", "01310100")]
    #[case("01 310 100", "01310100")]
    #[case("01310100", "01310100")]
    fn zip_normalization_strips_formatting(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_zip(input).unwrap(), expected);
    }

    #[rstest]
    #[case("0131010")]
    #[case("013101000")]
    #[case("")]
    #[case("abcdefgh")]
    fn zip_must_have_exactly_eight_digits(#[case] input: &str) {
        assert!(normalize_zip(input).is_err());
    }

    #[test]
    fn first_weight_unit_is_covered_by_base_cost() {
        let (cost, free) = method_cost(dec!(10), dec!(2), None, 1.0, dec!(50));
        assert_eq!(cost, dec!(10));
        assert!(!free);

        let (cost_below, _) = method_cost(dec!(10), dec!(2), None, 0.3, dec!(50));
        assert_eq!(cost_below, dec!(10));
    }

    #[test]
    fn weight_above_one_unit_is_billed_linearly() {
        let (cost, _) = method_cost(dec!(10), dec!(2), None, 3.0, dec!(50));
        assert_eq!(cost, dec!(14));

        let (cost, _) = method_cost(dec!(10), dec!(2.5), None, 2.5, dec!(50));
        assert_eq!(cost, dec!(13.75));
    }

    #[test]
    fn subtotal_at_threshold_ships_free() {
        let (cost, free) = method_cost(dec!(10), dec!(2), Some(dec!(200)), 5.0, dec!(200));
        assert_eq!(cost, Decimal::ZERO);
        assert!(free);
    }

    #[test]
    fn subtotal_below_threshold_is_charged() {
        let (cost, free) = method_cost(dec!(10), dec!(2), Some(dec!(200)), 5.0, dec!(199.99));
        assert_eq!(cost, dec!(18));
        assert!(!free);
    }
}
