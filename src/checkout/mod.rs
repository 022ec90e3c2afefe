//! Server-held checkout wizard. Steps are strictly linear (buyer →
//! recipient → payment → confirmation): a step can only be filled when the
//! flow is standing on it, while going back is always possible before the
//! order exists. Abandoning the flow drops the session with no trace.

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::{
        CreateOrderRequest, OrderConfirmation, OrderItemRequest, OrderService,
    },
    services::payments::{CreditCardPayload, PaymentMethod},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::Display;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckoutStep {
    Buyer,
    Recipient,
    Payment,
    Confirmation,
}

/// Buyer identification. Presence is checked here; business validation
/// (CPF digits, stock, ownership) happens at order creation.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct BuyerInfo {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "CPF is required"))]
    pub cpf: String,
    pub phone: Option<String>,
}

/// Destination and carrier selection.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RecipientInfo {
    pub address_id: Uuid,
    pub shipping_method_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CompleteCheckoutRequest {
    pub payment_method: PaymentMethod,
    pub credit_card: Option<CreditCardPayload>,
    pub payer_cpf: Option<String>,
    pub coupon_code: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSession {
    pub id: Uuid,
    #[serde(skip)]
    pub user_id: Uuid,
    pub step: CheckoutStep,
    pub items: Vec<OrderItemRequest>,
    pub buyer: Option<BuyerInfo>,
    pub recipient: Option<RecipientInfo>,
    pub order_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// In-process session store driving the wizard. Sessions never touch the
/// database: cancellation leaves no server-side draft behind.
#[derive(Clone)]
pub struct CheckoutFlowService {
    sessions: Arc<DashMap<Uuid, CheckoutSession>>,
    orders: OrderService,
    event_sender: EventSender,
}

impl CheckoutFlowService {
    pub fn new(orders: OrderService, event_sender: EventSender) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            orders,
            event_sender,
        }
    }

    /// Open a session over a cart snapshot, standing on the buyer step.
    #[instrument(skip(self, user, items), fields(user_id = %user.user_id))]
    pub async fn start(
        &self,
        user: &AuthUser,
        items: Vec<OrderItemRequest>,
    ) -> Result<CheckoutSession, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError("carrinho vazio".to_string()));
        }
        for item in &items {
            item.validate()?;
        }

        let session = CheckoutSession {
            id: Uuid::new_v4(),
            user_id: user.user_id,
            step: CheckoutStep::Buyer,
            items,
            buyer: None,
            recipient: None,
            order_number: None,
            created_at: Utc::now(),
        };

        self.sessions.insert(session.id, session.clone());
        info!(session_id = %session.id, "Checkout session started");
        self.event_sender
            .send_logged(Event::CheckoutStarted {
                session_id: session.id,
            })
            .await;

        Ok(session)
    }

    pub fn get(&self, user: &AuthUser, session_id: Uuid) -> Result<CheckoutSession, ServiceError> {
        let session = self
            .sessions
            .get(&session_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Checkout session {} not found", session_id))
            })?;

        if session.user_id != user.user_id {
            warn!(%session_id, "Cross-tenant checkout session access denied");
            return Err(ServiceError::Forbidden(
                "checkout session does not belong to the caller".to_string(),
            ));
        }

        Ok(session)
    }

    /// Fill the buyer step. Only valid while standing on it.
    #[instrument(skip(self, user, buyer), fields(session_id = %session_id))]
    pub fn set_buyer(
        &self,
        user: &AuthUser,
        session_id: Uuid,
        buyer: BuyerInfo,
    ) -> Result<CheckoutSession, ServiceError> {
        buyer.validate()?;
        let mut session = self.get(user, session_id)?;

        if session.step != CheckoutStep::Buyer {
            return Err(ServiceError::InvalidOperation(format!(
                "buyer data can only be set on the buyer step, flow is at {}",
                session.step
            )));
        }

        session.buyer = Some(buyer);
        session.step = CheckoutStep::Recipient;
        self.sessions.insert(session_id, session.clone());
        Ok(session)
    }

    /// Fill the recipient step: destination address plus carrier choice.
    /// Skipping the buyer step forward is rejected.
    #[instrument(skip(self, user, recipient), fields(session_id = %session_id))]
    pub fn set_recipient(
        &self,
        user: &AuthUser,
        session_id: Uuid,
        recipient: RecipientInfo,
    ) -> Result<CheckoutSession, ServiceError> {
        let mut session = self.get(user, session_id)?;

        match session.step {
            CheckoutStep::Recipient => {}
            CheckoutStep::Buyer => {
                return Err(ServiceError::InvalidOperation(
                    "complete the buyer step before the recipient step".to_string(),
                ))
            }
            step => {
                return Err(ServiceError::InvalidOperation(format!(
                    "recipient data can only be set on the recipient step, flow is at {}",
                    step
                )))
            }
        }

        session.recipient = Some(recipient);
        session.step = CheckoutStep::Payment;
        self.sessions.insert(session_id, session.clone());
        Ok(session)
    }

    /// Step back one position. Always allowed before the order exists; the
    /// previously entered data stays in place for editing.
    #[instrument(skip(self, user), fields(session_id = %session_id))]
    pub fn back(&self, user: &AuthUser, session_id: Uuid) -> Result<CheckoutSession, ServiceError> {
        let mut session = self.get(user, session_id)?;

        session.step = match session.step {
            CheckoutStep::Buyer => CheckoutStep::Buyer,
            CheckoutStep::Recipient => CheckoutStep::Buyer,
            CheckoutStep::Payment => CheckoutStep::Recipient,
            CheckoutStep::Confirmation => {
                return Err(ServiceError::InvalidOperation(
                    "the order was already placed, the flow cannot go back".to_string(),
                ))
            }
        };

        self.sessions.insert(session_id, session.clone());
        Ok(session)
    }

    /// Place the order. Requires the flow to stand on the payment step,
    /// which structurally guarantees buyer and recipient are filled.
    #[instrument(skip(self, user, request), fields(session_id = %session_id))]
    pub async fn complete(
        &self,
        user: &AuthUser,
        session_id: Uuid,
        request: CompleteCheckoutRequest,
    ) -> Result<OrderConfirmation, ServiceError> {
        request.validate()?;
        let session = self.get(user, session_id)?;

        if session.step != CheckoutStep::Payment {
            return Err(ServiceError::InvalidOperation(format!(
                "checkout can only complete from the payment step, flow is at {}",
                session.step
            )));
        }
        let recipient = session.recipient.clone().ok_or_else(|| {
            ServiceError::InvalidOperation("recipient step is incomplete".to_string())
        })?;
        let buyer = session.buyer.clone().ok_or_else(|| {
            ServiceError::InvalidOperation("buyer step is incomplete".to_string())
        })?;

        let confirmation = self
            .orders
            .create_order(
                user,
                CreateOrderRequest {
                    address_id: recipient.address_id,
                    items: session.items.clone(),
                    shipping_method_id: recipient.shipping_method_id,
                    payment_method: request.payment_method,
                    credit_card: request.credit_card,
                    payer_cpf: request.payer_cpf.or(Some(buyer.cpf)),
                    coupon_code: request.coupon_code,
                    notes: request.notes,
                },
            )
            .await?;

        if let Some(mut entry) = self.sessions.get_mut(&session_id) {
            entry.step = CheckoutStep::Confirmation;
            entry.order_number = Some(confirmation.order_number.clone());
        }

        info!(%session_id, order_number = %confirmation.order_number, "Checkout completed");
        self.event_sender
            .send_logged(Event::CheckoutCompleted {
                session_id,
                order_number: confirmation.order_number.clone(),
            })
            .await;
        Ok(confirmation)
    }

    /// Abandon the flow. The session disappears entirely; nothing was ever
    /// persisted for it.
    #[instrument(skip(self, user), fields(session_id = %session_id))]
    pub fn cancel(&self, user: &AuthUser, session_id: Uuid) -> Result<(), ServiceError> {
        self.get(user, session_id)?;
        self.sessions.remove(&session_id);
        info!(%session_id, "Checkout session discarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_after(step: CheckoutStep) -> CheckoutStep {
        match step {
            CheckoutStep::Buyer => CheckoutStep::Recipient,
            CheckoutStep::Recipient => CheckoutStep::Payment,
            CheckoutStep::Payment => CheckoutStep::Confirmation,
            CheckoutStep::Confirmation => CheckoutStep::Confirmation,
        }
    }

    #[test]
    fn steps_are_ordered() {
        assert_eq!(step_after(CheckoutStep::Buyer), CheckoutStep::Recipient);
        assert_eq!(step_after(CheckoutStep::Recipient), CheckoutStep::Payment);
        assert_eq!(step_after(CheckoutStep::Payment), CheckoutStep::Confirmation);
    }

    #[test]
    fn step_labels_are_snake_case() {
        assert_eq!(CheckoutStep::Buyer.to_string(), "buyer");
        assert_eq!(CheckoutStep::Confirmation.to_string(), "confirmation");
    }
}
