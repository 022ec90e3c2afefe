use super::{
    BoletoSlip, CardFields, ChargeOutcome, GatewayChargeStatus, PixQr, PspError, PspGateway,
};
use crate::errors::FieldError;
use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{instrument, warn};

/// HTTP client for the payment gateway. Amounts cross the wire in cents;
/// every call carries the server-to-server API token when one is configured.
#[derive(Clone)]
pub struct HttpPspGateway {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpPspGateway {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            api_token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Convert a decimal amount in BRL to integer cents.
    fn to_cents(amount: Decimal) -> Result<i64, PspError> {
        (amount * Decimal::from(100))
            .round()
            .to_i64()
            .ok_or_else(|| PspError::Transport(format!("amount out of range: {}", amount)))
    }

    async fn read_error(response: reqwest::Response) -> PspError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if let Ok(parsed) = serde_json::from_str::<GatewayErrorBody>(&body) {
            let fields: Vec<FieldError> = parsed
                .error_messages
                .into_iter()
                .map(|m| FieldError::new(m.parameter_name.unwrap_or_default(), m.description))
                .collect();
            if !fields.is_empty() {
                return match status {
                    StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                        PspError::Rejected(fields)
                    }
                    StatusCode::PAYMENT_REQUIRED => PspError::Declined(
                        fields
                            .iter()
                            .map(|f| f.message.clone())
                            .collect::<Vec<_>>()
                            .join("; "),
                    ),
                    _ => PspError::Transport(format!("gateway returned {}: {}", status, body)),
                };
            }
        }

        PspError::Transport(format!("gateway returned {}: {}", status, body))
    }
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    #[serde(default)]
    error_messages: Vec<GatewayErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorMessage {
    parameter_name: Option<String>,
    description: String,
}

#[derive(Debug, Deserialize)]
struct PublicKeyResponse {
    public_key: String,
}

#[derive(Debug, Serialize)]
struct TokenizeRequest<'a> {
    public_key: &'a str,
    number: &'a str,
    holder_name: &'a str,
    holder_cpf: &'a str,
    expiry_month: u8,
    expiry_year: i32,
    cvv: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenizeResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct ChargeRequest<'a> {
    reference_id: &'a str,
    amount_cents: i64,
    currency: &'a str,
    card_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    id: String,
    status: GatewayChargeStatus,
    #[serde(default)]
    decline_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct PixRequest<'a> {
    reference_id: &'a str,
    amount_cents: i64,
    currency: &'a str,
    expiration_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct PixResponse {
    id: String,
    text: String,
    image_base64: String,
    expiration_date: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct BoletoRequest<'a> {
    reference_id: &'a str,
    amount_cents: i64,
    currency: &'a str,
    payer_name: &'a str,
    payer_cpf: &'a str,
}

#[derive(Debug, Deserialize)]
struct BoletoResponse {
    id: String,
    barcode: String,
    document_url: String,
}

#[derive(Debug, Deserialize)]
struct ChargeStatusResponse {
    status: GatewayChargeStatus,
}

#[async_trait]
impl PspGateway for HttpPspGateway {
    #[instrument(skip(self))]
    async fn fetch_public_key(&self) -> Result<String, PspError> {
        let response = self
            .request(self.http.get(self.url("/public-keys/card")))
            .send()
            .await
            .map_err(|e| PspError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let body: PublicKeyResponse = response
            .json()
            .await
            .map_err(|e| PspError::Transport(e.to_string()))?;
        Ok(body.public_key)
    }

    #[instrument(skip(self, fields, public_key))]
    async fn tokenize_card(
        &self,
        fields: &CardFields,
        public_key: &str,
    ) -> Result<String, PspError> {
        let request = TokenizeRequest {
            public_key,
            number: &fields.number,
            holder_name: &fields.holder_name,
            holder_cpf: &fields.holder_cpf,
            expiry_month: fields.expiry_month,
            expiry_year: fields.expiry_year,
            cvv: &fields.cvv,
        };

        let response = self
            .request(self.http.post(self.url("/cards/tokenize")).json(&request))
            .send()
            .await
            .map_err(|e| PspError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let body: TokenizeResponse = response
            .json()
            .await
            .map_err(|e| PspError::Transport(e.to_string()))?;
        Ok(body.token)
    }

    #[instrument(skip(self, card_token), fields(reference = %reference))]
    async fn charge_card(
        &self,
        reference: &str,
        amount: Decimal,
        card_token: &str,
    ) -> Result<ChargeOutcome, PspError> {
        let request = ChargeRequest {
            reference_id: reference,
            amount_cents: Self::to_cents(amount)?,
            currency: "BRL",
            card_token,
        };

        let response = self
            .request(self.http.post(self.url("/charges")).json(&request))
            .send()
            .await
            .map_err(|e| PspError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let body: ChargeResponse = response
            .json()
            .await
            .map_err(|e| PspError::Transport(e.to_string()))?;

        if body.status == GatewayChargeStatus::Declined {
            let reason = body
                .decline_reason
                .unwrap_or_else(|| "card declined by issuer".to_string());
            warn!(charge_id = %body.id, %reason, "Card charge declined");
            return Err(PspError::Declined(reason));
        }

        Ok(ChargeOutcome {
            charge_id: body.id,
            status: body.status,
        })
    }

    #[instrument(skip(self), fields(reference = %reference))]
    async fn create_pix_qr(
        &self,
        reference: &str,
        amount: Decimal,
        expires_in: Duration,
    ) -> Result<PixQr, PspError> {
        let expiration_date = Utc::now()
            + chrono::Duration::from_std(expires_in)
                .map_err(|e| PspError::Transport(e.to_string()))?;
        let request = PixRequest {
            reference_id: reference,
            amount_cents: Self::to_cents(amount)?,
            currency: "BRL",
            expiration_date,
        };

        let response = self
            .request(self.http.post(self.url("/qr-codes")).json(&request))
            .send()
            .await
            .map_err(|e| PspError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let body: PixResponse = response
            .json()
            .await
            .map_err(|e| PspError::Transport(e.to_string()))?;

        // The image must render as-is on the storefront; reject broken encodings here
        base64::engine::general_purpose::STANDARD
            .decode(&body.image_base64)
            .map_err(|e| {
                PspError::Transport(format!("gateway returned invalid QR image encoding: {}", e))
            })?;

        Ok(PixQr {
            charge_id: body.id,
            payload: body.text,
            image_base64: body.image_base64,
            expires_at: body.expiration_date,
        })
    }

    #[instrument(skip(self, payer_cpf), fields(reference = %reference))]
    async fn create_boleto(
        &self,
        reference: &str,
        amount: Decimal,
        payer_name: &str,
        payer_cpf: &str,
    ) -> Result<BoletoSlip, PspError> {
        let request = BoletoRequest {
            reference_id: reference,
            amount_cents: Self::to_cents(amount)?,
            currency: "BRL",
            payer_name,
            payer_cpf,
        };

        let response = self
            .request(self.http.post(self.url("/boletos")).json(&request))
            .send()
            .await
            .map_err(|e| PspError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let body: BoletoResponse = response
            .json()
            .await
            .map_err(|e| PspError::Transport(e.to_string()))?;

        Ok(BoletoSlip {
            charge_id: body.id,
            barcode: body.barcode,
            document_url: body.document_url,
        })
    }

    #[instrument(skip(self))]
    async fn charge_status(&self, charge_id: &str) -> Result<GatewayChargeStatus, PspError> {
        let response = self
            .request(
                self.http
                    .get(self.url(&format!("/charges/{}", charge_id))),
            )
            .send()
            .await
            .map_err(|e| PspError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let body: ChargeStatusResponse = response
            .json()
            .await
            .map_err(|e| PspError::Transport(e.to_string()))?;
        Ok(body.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_convert_to_cents() {
        use rust_decimal_macros::dec;
        assert_eq!(HttpPspGateway::to_cents(dec!(10.00)).unwrap(), 1000);
        assert_eq!(HttpPspGateway::to_cents(dec!(0.01)).unwrap(), 1);
        assert_eq!(HttpPspGateway::to_cents(dec!(199.90)).unwrap(), 19990);
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let gw = HttpPspGateway::new("https://psp.example.com/", None);
        assert_eq!(gw.url("/charges"), "https://psp.example.com/charges");
    }
}
