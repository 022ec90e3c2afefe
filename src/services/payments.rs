use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity},
        payment::{self, Entity as PaymentEntity, Model as PaymentModel},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    psp::{GatewayChargeStatus, PspGateway},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumString};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Payment rails the storefront offers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    Pix,
    Boleto,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

/// Card data as accepted by the order endpoints: the opaque tokenization
/// blob plus holder identification. Raw card fields never appear here.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreditCardPayload {
    #[validate(length(min = 1, message = "Encrypted card blob is required"))]
    pub encrypted: String,
    #[validate(length(min = 1, message = "Holder name is required"))]
    pub holder_name: String,
    #[validate(length(min = 11, message = "Holder CPF is required"))]
    pub holder_cpf: String,
}

/// Payment state as returned to the storefront.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentSummary {
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pix_qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pix_qr_code_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pix_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boleto_barcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boleto_url: Option<String>,
}

fn parse_status(raw: &str) -> PaymentStatus {
    raw.parse().unwrap_or(PaymentStatus::Pending)
}

fn parse_method(raw: &str) -> PaymentMethod {
    raw.parse().unwrap_or(PaymentMethod::Pix)
}

impl PaymentSummary {
    pub fn from_model(model: &PaymentModel) -> Self {
        Self {
            status: parse_status(&model.status),
            method: parse_method(&model.method),
            pix_qr_code: model.pix_qr_code.clone(),
            pix_qr_code_base64: model.pix_qr_code_base64.clone(),
            pix_expires_at: model.pix_expires_at,
            boleto_barcode: model.boleto_barcode.clone(),
            boleto_url: model.boleto_url.clone(),
        }
    }
}

/// Owns the Payment record and every gateway interaction after an order
/// exists. Gateway failures on this path never roll the order back: the
/// payment stays pending/failed and the user-triggered retry re-runs it.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    gateway: Arc<dyn PspGateway>,
    event_sender: EventSender,
    pix_expiration: Duration,
}

impl PaymentService {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<dyn PspGateway>,
        event_sender: EventSender,
        pix_expiration: Duration,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            pix_expiration,
        }
    }

    /// Active model for the pending payment row created inside the
    /// order-creation transaction.
    pub fn pending_payment(
        order_id: Uuid,
        method: PaymentMethod,
        amount: Decimal,
        card_token: Option<String>,
    ) -> payment::ActiveModel {
        let now = Utc::now();
        payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            method: Set(method.to_string()),
            status: Set(PaymentStatus::Pending.to_string()),
            amount: Set(amount),
            card_token: Set(card_token),
            gateway_charge_id: Set(None),
            pix_qr_code: Set(None),
            pix_qr_code_base64: Set(None),
            pix_expires_at: Set(None),
            boleto_barcode: Set(None),
            boleto_url: Set(None),
            attempts: Set(0),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
    }

    /// The order's current (latest) payment row.
    pub async fn payment_for_order(&self, order_id: Uuid) -> Result<PaymentModel, ServiceError> {
        PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_desc(payment::Column::CreatedAt)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Payment for order {} not found", order_id))
            })
    }

    /// Run the payment-method branch for an order whose pending payment row
    /// already exists. Called right after the order transaction commits, and
    /// again on every user-triggered retry.
    #[instrument(skip(self, card_token), fields(order_id = %order.id, method = %method))]
    pub async fn execute(
        &self,
        order: &order::Model,
        method: PaymentMethod,
        card_token: Option<String>,
        payer_name: &str,
        payer_cpf: Option<&str>,
    ) -> Result<PaymentModel, ServiceError> {
        let payment = self.payment_for_order(order.id).await?;

        match method {
            PaymentMethod::CreditCard => {
                let token = card_token
                    .or_else(|| payment.card_token.clone())
                    .ok_or_else(|| {
                        ServiceError::InvalidInput(
                            "credit card payment requires the encrypted card payload".to_string(),
                        )
                    })?;

                match self
                    .gateway
                    .charge_card(&order.order_number, payment.amount, &token)
                    .await
                {
                    Ok(outcome) => {
                        let status = match outcome.status {
                            GatewayChargeStatus::Paid => PaymentStatus::Paid,
                            GatewayChargeStatus::Pending => PaymentStatus::Pending,
                            GatewayChargeStatus::Declined => PaymentStatus::Failed,
                        };
                        self.record_attempt(
                            payment,
                            method,
                            status,
                            Some(outcome.charge_id),
                            Some(token),
                            None,
                            None,
                        )
                        .await
                    }
                    Err(crate::psp::PspError::Declined(reason)) => {
                        warn!(%reason, "Card charge declined");
                        self.record_attempt(
                            payment,
                            method,
                            PaymentStatus::Failed,
                            None,
                            Some(token),
                            None,
                            None,
                        )
                        .await
                    }
                    Err(err) => {
                        // Gateway unreachable: the payment stays pending and
                        // the client lands on the retry path
                        warn!(error = %err, "Card charge could not reach the gateway");
                        self.record_attempt(
                            payment,
                            method,
                            PaymentStatus::Pending,
                            None,
                            Some(token),
                            None,
                            None,
                        )
                        .await
                    }
                }
            }
            PaymentMethod::Pix => {
                match self
                    .gateway
                    .create_pix_qr(&order.order_number, payment.amount, self.pix_expiration)
                    .await
                {
                    Ok(qr) => {
                        self.record_attempt(
                            payment,
                            method,
                            PaymentStatus::Pending,
                            Some(qr.charge_id.clone()),
                            None,
                            Some(qr),
                            None,
                        )
                        .await
                    }
                    Err(err) => {
                        warn!(error = %err, "PIX QR issuance failed");
                        self.record_attempt(payment, method, PaymentStatus::Pending, None, None, None, None)
                            .await
                    }
                }
            }
            PaymentMethod::Boleto => {
                match self
                    .gateway
                    .create_boleto(
                        &order.order_number,
                        payment.amount,
                        payer_name,
                        payer_cpf.unwrap_or_default(),
                    )
                    .await
                {
                    Ok(slip) => {
                        self.record_attempt(
                            payment,
                            method,
                            PaymentStatus::Pending,
                            Some(slip.charge_id.clone()),
                            None,
                            None,
                            Some(slip),
                        )
                        .await
                    }
                    Err(err) => {
                        warn!(error = %err, "Boleto issuance failed");
                        self.record_attempt(payment, method, PaymentStatus::Pending, None, None, None, None)
                            .await
                    }
                }
            }
        }
    }

    /// Poll-facing status read. An expired pending PIX resolves to failed
    /// here, so clients that missed the deadline locally stop polling; a
    /// live pending charge is refreshed from the gateway.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn status_of(&self, order_id: Uuid) -> Result<PaymentStatus, ServiceError> {
        let payment = self.payment_for_order(order_id).await?;
        let status = parse_status(&payment.status);
        if status != PaymentStatus::Pending {
            return Ok(status);
        }

        if parse_method(&payment.method) == PaymentMethod::Pix {
            if let Some(expires_at) = payment.pix_expires_at {
                if expires_at < Utc::now() {
                    info!(%order_id, "Pending PIX charge expired");
                    self.transition(&payment, PaymentStatus::Failed).await?;
                    self.event_sender
                        .send_logged(Event::PixExpired { order_id })
                        .await;
                    return Ok(PaymentStatus::Failed);
                }
            }
        }

        if let Some(charge_id) = payment.gateway_charge_id.clone() {
            match self.gateway.charge_status(&charge_id).await {
                Ok(GatewayChargeStatus::Paid) => {
                    self.transition(&payment, PaymentStatus::Paid).await?;
                    return Ok(PaymentStatus::Paid);
                }
                Ok(GatewayChargeStatus::Declined) => {
                    self.transition(&payment, PaymentStatus::Failed).await?;
                    return Ok(PaymentStatus::Failed);
                }
                Ok(GatewayChargeStatus::Pending) => {}
                Err(err) => {
                    // A polling miss is not an error worth surfacing
                    warn!(error = %err, %charge_id, "Charge status refresh failed");
                }
            }
        }

        Ok(PaymentStatus::Pending)
    }

    /// Apply a gateway webhook update by charge id. Transitions are guarded:
    /// a paid payment is never downgraded, so duplicate deliveries are
    /// acknowledged without effect. Unknown charge ids are reported back as
    /// not found; the webhook handler acknowledges them anyway.
    #[instrument(skip(self))]
    pub async fn apply_gateway_update(
        &self,
        charge_id: &str,
        status: GatewayChargeStatus,
    ) -> Result<(), ServiceError> {
        let payment = PaymentEntity::find()
            .filter(payment::Column::GatewayChargeId.eq(charge_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Payment with charge id {} not found", charge_id))
            })?;

        let new_status = match status {
            GatewayChargeStatus::Paid => PaymentStatus::Paid,
            GatewayChargeStatus::Declined => PaymentStatus::Failed,
            GatewayChargeStatus::Pending => return Ok(()),
        };

        let current = parse_status(&payment.status);
        if current == new_status || current == PaymentStatus::Paid {
            info!(%charge_id, %current, "Webhook transition is a no-op");
            return Ok(());
        }

        self.transition(&payment, new_status).await?;
        Ok(())
    }

    /// Persist the outcome of one payment attempt and emit the transition.
    #[allow(clippy::too_many_arguments)]
    async fn record_attempt(
        &self,
        payment: PaymentModel,
        method: PaymentMethod,
        status: PaymentStatus,
        gateway_charge_id: Option<String>,
        card_token: Option<String>,
        pix: Option<crate::psp::PixQr>,
        boleto: Option<crate::psp::BoletoSlip>,
    ) -> Result<PaymentModel, ServiceError> {
        let order_id = payment.order_id;
        let old_status = parse_status(&payment.status);
        let previous_method = parse_method(&payment.method);
        let attempts = payment.attempts;

        let txn = self.db.begin().await?;

        let mut active: payment::ActiveModel = payment.into();
        active.method = Set(method.to_string());
        active.status = Set(status.to_string());
        active.attempts = Set(attempts + 1);
        active.updated_at = Set(Some(Utc::now()));
        if method != previous_method {
            // A method switch invalidates the other rail's artifacts
            active.gateway_charge_id = Set(None);
            active.card_token = Set(None);
            active.pix_qr_code = Set(None);
            active.pix_qr_code_base64 = Set(None);
            active.pix_expires_at = Set(None);
            active.boleto_barcode = Set(None);
            active.boleto_url = Set(None);
        }
        if let Some(charge_id) = gateway_charge_id {
            active.gateway_charge_id = Set(Some(charge_id));
        }
        if let Some(token) = card_token {
            active.card_token = Set(Some(token));
        }
        if let Some(qr) = pix {
            active.pix_qr_code = Set(Some(qr.payload));
            active.pix_qr_code_base64 = Set(Some(qr.image_base64));
            active.pix_expires_at = Set(Some(qr.expires_at));
        }
        if let Some(slip) = boleto {
            active.boleto_barcode = Set(Some(slip.barcode));
            active.boleto_url = Set(Some(slip.document_url));
        }
        let updated = active.update(&txn).await?;

        Self::sync_order_payment_status(&txn, order_id, status).await?;
        txn.commit().await?;

        if old_status != status {
            self.event_sender
                .send_logged(Event::PaymentStatusChanged {
                    order_id,
                    old_status: old_status.to_string(),
                    new_status: status.to_string(),
                })
                .await;
        }

        Ok(updated)
    }

    /// Move a payment (and its order's `payment_status`) to a new status.
    async fn transition(
        &self,
        payment: &PaymentModel,
        new_status: PaymentStatus,
    ) -> Result<(), ServiceError> {
        let old_status = parse_status(&payment.status);
        let order_id = payment.order_id;

        let txn = self.db.begin().await?;
        let mut active: payment::ActiveModel = payment.clone().into();
        active.status = Set(new_status.to_string());
        active.updated_at = Set(Some(Utc::now()));
        active.update(&txn).await?;

        Self::sync_order_payment_status(&txn, order_id, new_status).await?;
        txn.commit().await?;

        self.event_sender
            .send_logged(Event::PaymentStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;
        Ok(())
    }

    async fn sync_order_payment_status(
        txn: &sea_orm::DatabaseTransaction,
        order_id: Uuid,
        status: PaymentStatus,
    ) -> Result<(), ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let mut active: order::ActiveModel = order.into();
        active.payment_status = Set(status.to_string());
        active.updated_at = Set(Some(Utc::now()));
        active.update(txn).await?;
        Ok(())
    }
}
