use crate::{
    db::DbPool,
    entities::{
        product::Entity as ProductEntity,
        product_variant::{self, Entity as ProductVariantEntity},
    },
    errors::{ServiceError, StockShortfall},
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// One cart line to check, as sent to the order endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StockItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Pre-flight availability report. `unavailable_items` is empty exactly
/// when `available` is true.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StockValidation {
    pub available: bool,
    pub unavailable_items: Vec<StockShortfall>,
}

/// Read-only availability checks against current stock. This never mutates
/// inventory: the decrement happens inside the order-creation transaction.
#[derive(Clone)]
pub struct StockValidator {
    db: Arc<DbPool>,
}

impl StockValidator {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Check every line against product- or variant-level stock. A missing
    /// product (or variant) reports `available_quantity: 0` rather than
    /// erroring: the storefront treats it as an out-of-stock line.
    #[instrument(skip(self, items), fields(item_count = items.len()))]
    pub async fn validate(
        &self,
        items: &[StockItemRequest],
    ) -> Result<StockValidation, ServiceError> {
        let mut unavailable = Vec::new();

        for item in items {
            let product = ProductEntity::find_by_id(item.product_id)
                .one(&*self.db)
                .await?;

            let (product_name, available_quantity) = match product {
                None => ("produto indisponível".to_string(), 0),
                Some(product) if !product.is_active => (product.name, 0),
                Some(product) => {
                    let available = match &item.size {
                        Some(size) => {
                            self.variant_stock(item.product_id, size, item.color.as_deref())
                                .await?
                        }
                        None => product.stock,
                    };
                    (product.name, available)
                }
            };

            if item.quantity > available_quantity {
                unavailable.push(StockShortfall {
                    product_id: item.product_id,
                    product_name,
                    requested_quantity: item.quantity,
                    available_quantity,
                });
            }
        }

        if !unavailable.is_empty() {
            info!(
                unavailable_count = unavailable.len(),
                "Stock validation found unavailable items"
            );
        }

        Ok(StockValidation {
            available: unavailable.is_empty(),
            unavailable_items: unavailable,
        })
    }

    /// Variant-level stock for a size (and color, when selected). An
    /// unknown combination counts as zero.
    async fn variant_stock(
        &self,
        product_id: Uuid,
        size: &str,
        color: Option<&str>,
    ) -> Result<i32, ServiceError> {
        let mut query = ProductVariantEntity::find()
            .filter(product_variant::Column::ProductId.eq(product_id))
            .filter(product_variant::Column::Size.eq(size));
        if let Some(color) = color {
            query = query.filter(product_variant::Column::Color.eq(color));
        }

        let variant = query.one(&*self.db).await?;
        Ok(variant.map(|v| v.stock).unwrap_or(0))
    }
}

/// A variant as the storefront cart carries it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartVariant {
    pub size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub stock: i32,
}

/// A client-side cart line: what the storefront holds before checkout.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClientCartItem {
    pub id: String,
    pub quantity: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_color: Option<String>,
    #[serde(default)]
    pub variants: Vec<CartVariant>,
}

/// Structural cart validation run before any network call at checkout.
/// Messages are what the storefront displays, hence Portuguese.
pub fn validate_cart_for_checkout(items: &[ClientCartItem]) -> Result<(), ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::ValidationError("carrinho vazio".to_string()));
    }

    for item in items {
        if item.id.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "item do carrinho sem identificador".to_string(),
            ));
        }

        if item.quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "quantidade inválida para o item {}",
                item.id
            )));
        }

        if !item.variants.is_empty() {
            let size = match &item.selected_size {
                Some(size) if !size.trim().is_empty() => size,
                _ => {
                    return Err(ServiceError::ValidationError(format!(
                        "tamanho não selecionado para o item {}",
                        item.id
                    )))
                }
            };

            let variant = item.variants.iter().find(|v| {
                v.size == *size
                    && item
                        .selected_color
                        .as_ref()
                        .map(|c| v.color.as_deref() == Some(c.as_str()))
                        .unwrap_or(true)
            });

            let stock = variant.map(|v| v.stock).unwrap_or(0);
            if stock == 0 {
                return Err(ServiceError::ValidationError(format!(
                    "variante sem estoque para o item {}",
                    item.id
                )));
            }

            if item.quantity > stock {
                return Err(ServiceError::ValidationError(format!(
                    "quantidade do item {} acima do estoque (disponível: {})",
                    item.id, stock
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_with_variant(quantity: i32) -> ClientCartItem {
        ClientCartItem {
            id: "p1".to_string(),
            quantity,
            selected_size: Some("M".to_string()),
            selected_color: None,
            variants: vec![CartVariant {
                size: "M".to_string(),
                color: Some("Preto".to_string()),
                stock: 2,
            }],
        }
    }

    fn expect_message(items: &[ClientCartItem], needle: &str) {
        match validate_cart_for_checkout(items) {
            Err(ServiceError::ValidationError(msg)) => {
                assert!(
                    msg.contains(needle),
                    "message {:?} should contain {:?}",
                    msg,
                    needle
                );
            }
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn empty_cart_is_rejected() {
        expect_message(&[], "carrinho vazio");
    }

    #[test]
    fn missing_item_id_is_rejected() {
        let mut item = item_with_variant(1);
        item.id = "  ".to_string();
        expect_message(&[item], "sem identificador");
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        expect_message(&[item_with_variant(0)], "quantidade inválida");
        expect_message(&[item_with_variant(-1)], "quantidade inválida");
    }

    #[test]
    fn missing_selected_size_is_rejected() {
        let mut item = item_with_variant(1);
        item.selected_size = None;
        expect_message(&[item], "tamanho não selecionado");
    }

    #[test]
    fn zero_stock_variant_is_rejected() {
        let mut item = item_with_variant(1);
        item.variants[0].stock = 0;
        expect_message(&[item], "sem estoque");
    }

    #[test]
    fn unknown_size_counts_as_zero_stock() {
        let mut item = item_with_variant(1);
        item.selected_size = Some("GG".to_string());
        expect_message(&[item], "sem estoque");
    }

    #[test]
    fn quantity_above_variant_stock_is_rejected() {
        expect_message(&[item_with_variant(3)], "acima do estoque");
    }

    #[test]
    fn cart_within_stock_passes() {
        assert!(validate_cart_for_checkout(&[item_with_variant(1)]).is_ok());
        assert!(validate_cart_for_checkout(&[item_with_variant(2)]).is_ok());
    }

    #[test]
    fn selected_color_must_match_variant() {
        let mut item = item_with_variant(1);
        item.selected_color = Some("Branco".to_string());
        expect_message(&[item], "sem estoque");
    }

    #[test]
    fn item_without_variants_skips_size_checks() {
        let item = ClientCartItem {
            id: "p2".to_string(),
            quantity: 5,
            selected_size: None,
            selected_color: None,
            variants: vec![],
        };
        assert!(validate_cart_for_checkout(&[item]).is_ok());
    }
}
