use crate::{
    auth::AuthUser,
    db::DbPool,
    entities::{
        address::{self, Entity as AddressEntity},
        order::{self, Entity as OrderEntity, Model as OrderModel},
        order_item::{self, Entity as OrderItemEntity},
        product::{self, Entity as ProductEntity},
        product_variant::{self, Entity as ProductVariantEntity},
    },
    errors::{ServiceError, StockShortfall},
    events::{Event, EventSender},
    services::payments::{CreditCardPayload, PaymentMethod, PaymentService, PaymentSummary},
    services::shipping::{ShippingQuoteItem, ShippingQuoteService},
    services::stock::{StockItemRequest, StockValidator},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
    pub size: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderRequest {
    pub address_id: Uuid,
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<OrderItemRequest>,
    pub shipping_method_id: Uuid,
    pub payment_method: PaymentMethod,
    pub credit_card: Option<CreditCardPayload>,
    /// Payer document for boleto issuance
    pub payer_cpf: Option<String>,
    pub coupon_code: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RetryPaymentRequest {
    pub payment_method: PaymentMethod,
    pub credit_card: Option<CreditCardPayload>,
    pub payer_cpf: Option<String>,
}

/// What the storefront receives right after order creation. For PIX the
/// payment block carries the QR code the client must render immediately.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderConfirmation {
    pub order_number: String,
    pub status: OrderStatus,
    pub payment: PaymentSummary,
    pub total: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub product_name: String,
    pub size: Option<String>,
    pub color: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: String,
    pub ship_to: String,
    pub shipping_method_name: String,
    pub shipping_cost: Decimal,
    pub subtotal: Decimal,
    pub total: Decimal,
    pub notes: Option<String>,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Composes address ownership, stock validation, server-side shipping
/// recompute and the payment branch into atomic order creation.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    stock: StockValidator,
    shipping: ShippingQuoteService,
    payments: PaymentService,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        stock: StockValidator,
        shipping: ShippingQuoteService,
        payments: PaymentService,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            stock,
            shipping,
            payments,
            event_sender,
        }
    }

    pub fn payments(&self) -> &PaymentService {
        &self.payments
    }

    /// Create an order: validate everything first, then write order, items,
    /// stock decrement and the pending payment row in one transaction, then
    /// run the payment branch. No partial order survives a stock shortfall.
    #[instrument(skip(self, user, request), fields(user_id = %user.user_id))]
    pub async fn create_order(
        &self,
        user: &AuthUser,
        request: CreateOrderRequest,
    ) -> Result<OrderConfirmation, ServiceError> {
        request.validate()?;
        for item in &request.items {
            item.validate()?;
        }
        if let Some(card) = &request.credit_card {
            card.validate()?;
        }

        if request.payment_method == PaymentMethod::CreditCard && request.credit_card.is_none() {
            return Err(ServiceError::ValidationError(
                "credit card payment requires the encrypted card payload".to_string(),
            ));
        }
        if let Some(coupon) = &request.coupon_code {
            debug!(%coupon, "Coupon codes are accepted but not currently applied");
        }

        // Address must exist and belong to the caller
        let destination = AddressEntity::find_by_id(request.address_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Address {} not found", request.address_id))
            })?;
        if destination.user_id != user.user_id {
            warn!(address_id = %request.address_id, "Order creation with someone else's address");
            return Err(ServiceError::Forbidden(
                "address does not belong to the caller".to_string(),
            ));
        }

        // Pre-flight stock check: itemized 422, no partial order
        let stock_items: Vec<StockItemRequest> = request
            .items
            .iter()
            .map(|item| StockItemRequest {
                product_id: item.product_id,
                quantity: item.quantity,
                size: item.size.clone(),
                color: item.color.clone(),
            })
            .collect();
        let validation = self.stock.validate(&stock_items).await?;
        if !validation.available {
            return Err(ServiceError::InsufficientStock(validation.unavailable_items));
        }

        // Server-side pricing from the catalog, never from the client
        let mut subtotal = Decimal::ZERO;
        let mut lines = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let product = ProductEntity::find_by_id(item.product_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", item.product_id))
                })?;
            let line_total = product.price * Decimal::from(item.quantity);
            subtotal += line_total;
            lines.push((product, item, line_total));
        }

        let quote_items: Vec<ShippingQuoteItem> = request
            .items
            .iter()
            .map(|item| ShippingQuoteItem {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect();
        let (method, shipping_cost) = self
            .shipping
            .cost_for_method(request.shipping_method_id, &quote_items, subtotal)
            .await?;

        let total = subtotal + shipping_cost;
        let order_id = Uuid::new_v4();
        let order_number = format!("VIT-{}", &order_id.simple().to_string()[..8].to_uppercase());
        let now = Utc::now();

        let card_token = request.credit_card.as_ref().map(|c| c.encrypted.clone());
        let payer_name = user
            .name
            .clone()
            .unwrap_or_else(|| destination.recipient.clone());
        let payer_cpf = request
            .payer_cpf
            .clone()
            .or_else(|| request.credit_card.as_ref().map(|c| c.holder_cpf.clone()));

        let txn = self.db.begin().await?;

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            user_id: Set(user.user_id),
            address_id: Set(destination.id),
            ship_to: Set(format_destination(&destination)),
            status: Set(OrderStatus::Pending.to_string()),
            payment_status: Set("pending".to_string()),
            shipping_method_id: Set(method.id),
            shipping_method_name: Set(method.name.clone()),
            shipping_cost: Set(shipping_cost),
            subtotal: Set(subtotal),
            total: Set(total),
            notes: Set(request.notes.clone()),
            is_archived: Set(false),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };
        let created_order = order_model.insert(&txn).await?;

        for (product, item, line_total) in &lines {
            let order_item_model = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                product_name: Set(product.name.clone()),
                size: Set(item.size.clone()),
                color: Set(item.color.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(product.price),
                total_price: Set(*line_total),
                created_at: Set(now),
            };
            order_item_model.insert(&txn).await?;

            // Authoritative decrement; a concurrent sale rolls the order back
            decrement_stock(
                &txn,
                product.id,
                &product.name,
                item.size.as_deref(),
                item.color.as_deref(),
                item.quantity,
            )
            .await?;
        }

        PaymentService::pending_payment(order_id, request.payment_method, total, card_token.clone())
            .insert(&txn)
            .await?;

        txn.commit().await?;

        info!(%order_id, %order_number, %total, "Order created");
        self.event_sender.send_logged(Event::OrderCreated(order_id)).await;
        for (product, item, _) in &lines {
            self.event_sender
                .send_logged(Event::StockDecremented {
                    product_id: product.id,
                    quantity: item.quantity,
                    order_id,
                })
                .await;
        }

        // Payment branch runs after commit; failures leave a retryable payment
        let payment = self
            .payments
            .execute(
                &created_order,
                request.payment_method,
                card_token,
                &payer_name,
                payer_cpf.as_deref(),
            )
            .await?;

        Ok(OrderConfirmation {
            order_number,
            status: OrderStatus::Pending,
            payment: PaymentSummary::from_model(&payment),
            total,
        })
    }

    /// Re-run only the payment step of an order still awaiting payment.
    /// Stock was decremented at creation and is not revalidated.
    #[instrument(skip(self, user, request), fields(order_id = %order_id))]
    pub async fn retry_payment(
        &self,
        user: &AuthUser,
        order_id: Uuid,
        request: RetryPaymentRequest,
    ) -> Result<PaymentSummary, ServiceError> {
        request.validate()?;
        if let Some(card) = &request.credit_card {
            card.validate()?;
        }
        let order = self.owned_order(user, order_id).await?;

        match order.payment_status.as_str() {
            "pending" | "failed" => {}
            other => {
                return Err(ServiceError::Conflict(format!(
                    "payment is already {}, nothing to retry",
                    other
                )))
            }
        }
        if order.status == OrderStatus::Cancelled.to_string() {
            return Err(ServiceError::InvalidOperation(
                "cancelled orders cannot be paid".to_string(),
            ));
        }

        if request.payment_method == PaymentMethod::CreditCard && request.credit_card.is_none() {
            return Err(ServiceError::ValidationError(
                "credit card payment requires the encrypted card payload".to_string(),
            ));
        }

        let card_token = request.credit_card.as_ref().map(|c| c.encrypted.clone());
        let payer_name = user.name.clone().unwrap_or_else(|| "Cliente".to_string());
        let payer_cpf = request
            .payer_cpf
            .clone()
            .or_else(|| request.credit_card.as_ref().map(|c| c.holder_cpf.clone()));

        let payment = self
            .payments
            .execute(
                &order,
                request.payment_method,
                card_token,
                &payer_name,
                payer_cpf.as_deref(),
            )
            .await?;

        info!(%order_id, method = %request.payment_method, "Payment retried");
        Ok(PaymentSummary::from_model(&payment))
    }

    /// Poll-facing payment status; delegates expiry and gateway refresh to
    /// the payment service.
    #[instrument(skip(self, user), fields(order_id = %order_id))]
    pub async fn get_payment_status(
        &self,
        user: &AuthUser,
        order_id: Uuid,
    ) -> Result<crate::services::payments::PaymentStatus, ServiceError> {
        self.owned_order(user, order_id).await?;
        self.payments.status_of(order_id).await
    }

    /// Fetch one of the caller's orders with its items.
    #[instrument(skip(self, user), fields(order_id = %order_id))]
    pub async fn get_order(
        &self,
        user: &AuthUser,
        order_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.owned_order(user, order_id).await?;
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        model_to_response(order, items)
    }

    /// The caller's orders, newest first.
    #[instrument(skip(self, user))]
    pub async fn list_orders(
        &self,
        user: &AuthUser,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let paginator = OrderEntity::find()
            .filter(order::Column::UserId.eq(user.user_id))
            .filter(order::Column::IsArchived.eq(false))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut responses = Vec::with_capacity(orders.len());
        for order in orders {
            let items = OrderItemEntity::find()
                .filter(order_item::Column::OrderId.eq(order.id))
                .all(&*self.db)
                .await?;
            responses.push(model_to_response(order, items)?);
        }

        Ok(OrderListResponse {
            orders: responses,
            total,
            page,
            per_page,
        })
    }

    /// Cancel a pending order, restoring the stock decremented at creation.
    #[instrument(skip(self, user), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        user: &AuthUser,
        order_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.owned_order(user, order_id).await?;

        if order.status != OrderStatus::Pending.to_string() {
            return Err(ServiceError::Conflict(format!(
                "only pending orders can be cancelled, current status is {}",
                order.status
            )));
        }

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        let txn = self.db.begin().await?;

        for item in &items {
            restore_stock(
                &txn,
                item.product_id,
                item.size.as_deref(),
                item.color.as_deref(),
                item.quantity,
            )
            .await?;
        }

        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled.to_string());
        active.updated_at = Set(Some(Utc::now()));
        let version = active.version.clone().unwrap();
        active.version = Set(version + 1);
        let cancelled = active.update(&txn).await?;

        txn.commit().await?;

        info!(%order_id, "Order cancelled");
        self.event_sender
            .send_logged(Event::OrderCancelled(order_id))
            .await;
        for item in &items {
            self.event_sender
                .send_logged(Event::StockRestored {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    order_id,
                })
                .await;
        }

        model_to_response(cancelled, items)
    }

    async fn owned_order(&self, user: &AuthUser, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.user_id != user.user_id {
            warn!(%order_id, user_id = %user.user_id, "Cross-tenant order access denied");
            return Err(ServiceError::Forbidden(
                "order does not belong to the caller".to_string(),
            ));
        }

        Ok(order)
    }
}

fn format_destination(address: &address::Model) -> String {
    let complement = address
        .complement
        .as_deref()
        .map(|c| format!(" {}", c))
        .unwrap_or_default();
    format!(
        "{}, {}, {}{}, {}, {} - {}, CEP {}",
        address.recipient,
        address.street,
        address.number,
        complement,
        address.district,
        address.city,
        address.state,
        address.zip_code
    )
}

fn model_to_response(
    order: OrderModel,
    items: Vec<order_item::Model>,
) -> Result<OrderResponse, ServiceError> {
    let status: OrderStatus = order
        .status
        .parse()
        .map_err(|_| ServiceError::InternalError(format!("unknown order status {}", order.status)))?;

    Ok(OrderResponse {
        id: order.id,
        order_number: order.order_number,
        status,
        payment_status: order.payment_status,
        ship_to: order.ship_to,
        shipping_method_name: order.shipping_method_name,
        shipping_cost: order.shipping_cost,
        subtotal: order.subtotal,
        total: order.total,
        notes: order.notes,
        items: items
            .into_iter()
            .map(|item| OrderItemResponse {
                product_id: item.product_id,
                product_name: item.product_name,
                size: item.size,
                color: item.color,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total_price: item.total_price,
            })
            .collect(),
        created_at: order.created_at,
        updated_at: order.updated_at,
    })
}

/// Decrement stock at the level the sale happened: the variant when a size
/// was selected, the product otherwise. Runs inside the order transaction;
/// a shortfall here aborts the whole order.
async fn decrement_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    product_name: &str,
    size: Option<&str>,
    color: Option<&str>,
    quantity: i32,
) -> Result<(), ServiceError> {
    match size {
        Some(size) => {
            let mut query = ProductVariantEntity::find()
                .filter(product_variant::Column::ProductId.eq(product_id))
                .filter(product_variant::Column::Size.eq(size));
            if let Some(color) = color {
                query = query.filter(product_variant::Column::Color.eq(color));
            }
            let variant = query.one(conn).await?.ok_or_else(|| {
                ServiceError::InsufficientStock(vec![StockShortfall {
                    product_id,
                    product_name: product_name.to_string(),
                    requested_quantity: quantity,
                    available_quantity: 0,
                }])
            })?;

            if variant.stock < quantity {
                return Err(ServiceError::InsufficientStock(vec![StockShortfall {
                    product_id,
                    product_name: product_name.to_string(),
                    requested_quantity: quantity,
                    available_quantity: variant.stock,
                }]));
            }

            let new_stock = variant.stock - quantity;
            let mut active: product_variant::ActiveModel = variant.into();
            active.stock = Set(new_stock);
            active.updated_at = Set(Some(Utc::now()));
            active.update(conn).await?;
        }
        None => {
            let product = ProductEntity::find_by_id(product_id)
                .one(conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", product_id))
                })?;

            if product.stock < quantity {
                return Err(ServiceError::InsufficientStock(vec![StockShortfall {
                    product_id,
                    product_name: product.name,
                    requested_quantity: quantity,
                    available_quantity: product.stock,
                }]));
            }

            let new_stock = product.stock - quantity;
            let mut active: product::ActiveModel = product.into();
            active.stock = Set(new_stock);
            active.updated_at = Set(Some(Utc::now()));
            active.update(conn).await?;
        }
    }
    Ok(())
}

/// Give back stock taken by [`decrement_stock`]; used on cancellation.
async fn restore_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    size: Option<&str>,
    color: Option<&str>,
    quantity: i32,
) -> Result<(), ServiceError> {
    match size {
        Some(size) => {
            let mut query = ProductVariantEntity::find()
                .filter(product_variant::Column::ProductId.eq(product_id))
                .filter(product_variant::Column::Size.eq(size));
            if let Some(color) = color {
                query = query.filter(product_variant::Column::Color.eq(color));
            }
            if let Some(variant) = query.one(conn).await? {
                let new_stock = variant.stock + quantity;
                let mut active: product_variant::ActiveModel = variant.into();
                active.stock = Set(new_stock);
                active.updated_at = Set(Some(Utc::now()));
                active.update(conn).await?;
            }
        }
        None => {
            if let Some(product) = ProductEntity::find_by_id(product_id).one(conn).await? {
                let new_stock = product.stock + quantity;
                let mut active: product::ActiveModel = product.into();
                active.stock = Set(new_stock);
                active.updated_at = Set(Some(Utc::now()));
                active.update(conn).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_round_trips_through_strings() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            let parsed: OrderStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn destination_snapshot_includes_every_component() {
        let address = address::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            label: None,
            recipient: "Ana Souza".to_string(),
            street: "Rua das Flores".to_string(),
            number: "123".to_string(),
            complement: Some("ap 42".to_string()),
            district: "Centro".to_string(),
            city: "São Paulo".to_string(),
            state: "SP".to_string(),
            zip_code: "01310100".to_string(),
            phone: None,
            is_default: true,
            created_at: Utc::now(),
            updated_at: None,
        };

        let snapshot = format_destination(&address);
        assert!(snapshot.contains("Ana Souza"));
        assert!(snapshot.contains("Rua das Flores"));
        assert!(snapshot.contains("123 ap 42"));
        assert!(snapshot.contains("São Paulo - SP"));
        assert!(snapshot.contains("CEP 01310100"));
    }
}
