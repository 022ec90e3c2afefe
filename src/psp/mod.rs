//! Payment service provider integration: pure card validation, the gateway
//! client and the tokenization handle sitting in front of it.

pub mod card;
pub mod client;
pub mod encryption;

pub use card::{cpf_valid, detect_brand, luhn_valid, CardBrand};
pub use client::HttpPspGateway;
pub use encryption::{EncryptionHandle, SdkState};

use crate::errors::{FieldError, ServiceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Raw card fields as collected by the storefront. These exist only on the
/// client side of the PSP boundary; order endpoints accept the opaque token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardFields {
    pub number: String,
    pub holder_name: String,
    pub holder_cpf: String,
    pub expiry_month: u8,
    pub expiry_year: i32,
    pub cvv: String,
}

/// Tokenization output: an opaque blob the gateway can charge later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedCard {
    pub blob: String,
    pub brand: CardBrand,
}

/// Charge status as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayChargeStatus {
    Paid,
    Declined,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeOutcome {
    pub charge_id: String,
    pub status: GatewayChargeStatus,
}

/// A PIX QR code the client must render immediately: payload for
/// copy-and-paste, image for display, and the payability deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixQr {
    pub charge_id: String,
    pub payload: String,
    pub image_base64: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoletoSlip {
    pub charge_id: String,
    pub barcode: String,
    pub document_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PspError {
    /// Field-level validation failure, local or gateway-reported
    #[error("card rejected: {} field error(s)", .0.len())]
    Rejected(Vec<FieldError>),

    /// The gateway processed the request and declined it
    #[error("payment declined: {0}")]
    Declined(String),

    /// The gateway could not be reached or answered outside its contract
    #[error("gateway transport error: {0}")]
    Transport(String),
}

impl From<PspError> for ServiceError {
    fn from(err: PspError) -> Self {
        match err {
            PspError::Rejected(fields) => ServiceError::CardRejected(fields),
            PspError::Declined(msg) => ServiceError::PaymentFailed(msg),
            PspError::Transport(msg) => ServiceError::GatewayError(msg),
        }
    }
}

/// The gateway surface the services depend on. The HTTP implementation
/// lives in [`client`]; tests substitute their own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PspGateway: Send + Sync {
    /// Fetch the public key used for card tokenization.
    async fn fetch_public_key(&self) -> Result<String, PspError>;

    /// Exchange raw card fields for an opaque charge token.
    async fn tokenize_card(&self, fields: &CardFields, public_key: &str)
        -> Result<String, PspError>;

    /// Capture a charge against a previously tokenized card.
    async fn charge_card(
        &self,
        reference: &str,
        amount: Decimal,
        card_token: &str,
    ) -> Result<ChargeOutcome, PspError>;

    /// Issue a PIX QR code payable until `expires_in` from now.
    async fn create_pix_qr(
        &self,
        reference: &str,
        amount: Decimal,
        expires_in: Duration,
    ) -> Result<PixQr, PspError>;

    /// Issue a boleto slip for the given payer.
    async fn create_boleto(
        &self,
        reference: &str,
        amount: Decimal,
        payer_name: &str,
        payer_cpf: &str,
    ) -> Result<BoletoSlip, PspError>;

    /// Current status of an existing charge.
    async fn charge_status(&self, charge_id: &str) -> Result<GatewayChargeStatus, PspError>;
}
