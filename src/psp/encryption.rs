use super::card::{cpf_valid, detect_brand, luhn_valid, CardBrand};
use super::{CardFields, EncryptedCard, PspError, PspGateway};
use crate::errors::FieldError;
use chrono::{Datelike, Utc};
use serde::Serialize;
use std::sync::Arc;
use strum::Display;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

/// Lifecycle of the tokenization key fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SdkState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

enum KeyState {
    Unloaded,
    Loading,
    Ready(String),
    Failed(String),
}

/// Singleton handle in front of card tokenization. The public key is fetched
/// once: concurrent `ensure_ready` callers queue on the same in-flight load
/// instead of issuing duplicate requests, and a failed load stays failed
/// until [`reset`](Self::reset).
pub struct EncryptionHandle {
    gateway: Arc<dyn PspGateway>,
    state: RwLock<KeyState>,
    load_guard: Mutex<()>,
}

impl EncryptionHandle {
    /// `configured_key` short-circuits the gateway fetch when the public key
    /// is provided through configuration.
    pub fn new(gateway: Arc<dyn PspGateway>, configured_key: Option<String>) -> Self {
        let state = match configured_key {
            Some(key) => KeyState::Ready(key),
            None => KeyState::Unloaded,
        };
        Self {
            gateway,
            state: RwLock::new(state),
            load_guard: Mutex::new(()),
        }
    }

    /// Observable load state.
    pub async fn state(&self) -> SdkState {
        match &*self.state.read().await {
            KeyState::Unloaded => SdkState::Unloaded,
            KeyState::Loading => SdkState::Loading,
            KeyState::Ready(_) => SdkState::Ready,
            KeyState::Failed(_) => SdkState::Failed,
        }
    }

    /// Ensure the tokenization key is available, fetching it at most once.
    /// Every concurrent caller awaits the same load; after a failure the
    /// handle answers with the recorded error without re-attempting.
    #[instrument(skip(self))]
    pub async fn ensure_ready(&self) -> Result<String, PspError> {
        if let KeyState::Ready(key) = &*self.state.read().await {
            return Ok(key.clone());
        }

        // Single-flight: the first caller loads, the rest queue here
        let _guard = self.load_guard.lock().await;

        match &*self.state.read().await {
            KeyState::Ready(key) => return Ok(key.clone()),
            KeyState::Failed(reason) => {
                return Err(PspError::Transport(format!(
                    "tokenization key load previously failed: {}",
                    reason
                )))
            }
            KeyState::Unloaded | KeyState::Loading => {}
        }

        *self.state.write().await = KeyState::Loading;
        info!("Fetching card tokenization public key");

        match self.gateway.fetch_public_key().await {
            Ok(key) => {
                *self.state.write().await = KeyState::Ready(key.clone());
                info!("Card tokenization key ready");
                Ok(key)
            }
            Err(err) => {
                warn!(error = %err, "Card tokenization key load failed");
                *self.state.write().await = KeyState::Failed(err.to_string());
                Err(err)
            }
        }
    }

    /// Drop a failed (or stale) key so the next `ensure_ready` retries.
    pub async fn reset(&self) {
        *self.state.write().await = KeyState::Unloaded;
    }

    /// Validate the card fields locally, then exchange them for an opaque
    /// token. Field problems are reported all at once; nothing is sent to
    /// the gateway until the fields pass.
    #[instrument(skip_all)]
    pub async fn encrypt(&self, fields: &CardFields) -> Result<EncryptedCard, PspError> {
        let brand = validate_card_fields(fields)?;
        let public_key = self.ensure_ready().await?;

        let blob = self.gateway.tokenize_card(fields, &public_key).await?;
        Ok(EncryptedCard { blob, brand })
    }
}

/// Field-by-field validation; collects every problem before failing.
pub fn validate_card_fields(fields: &CardFields) -> Result<CardBrand, PspError> {
    let mut errors = Vec::new();

    let brand = detect_brand(&fields.number);
    if !luhn_valid(&fields.number) {
        errors.push(FieldError::new("number", "invalid card number"));
    } else if brand.is_none() {
        errors.push(FieldError::new("number", "card brand not supported"));
    }

    if fields.holder_name.trim().is_empty() {
        errors.push(FieldError::new("holder_name", "cardholder name is required"));
    }

    if !cpf_valid(&fields.holder_cpf) {
        errors.push(FieldError::new("holder_cpf", "invalid cardholder cpf"));
    }

    if !(1..=12).contains(&fields.expiry_month) {
        errors.push(FieldError::new("expiry_month", "invalid expiry month"));
    } else {
        let now = Utc::now();
        let expired = fields.expiry_year < now.year()
            || (fields.expiry_year == now.year() && u32::from(fields.expiry_month) < now.month());
        if expired {
            errors.push(FieldError::new("expiry_year", "card is expired"));
        }
    }

    let expected_cvv_len = match brand {
        Some(CardBrand::Amex) => 4,
        _ => 3,
    };
    if fields.cvv.len() != expected_cvv_len || !fields.cvv.chars().all(|c| c.is_ascii_digit()) {
        errors.push(FieldError::new(
            "cvv",
            format!("security code must have {} digits", expected_cvv_len),
        ));
    }

    match brand {
        Some(brand) if errors.is_empty() => Ok(brand),
        _ => Err(PspError::Rejected(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::MockPspGateway;
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn good_fields() -> CardFields {
        CardFields {
            number: "4539620659922097".to_string(),
            holder_name: "Ana Souza".to_string(),
            holder_cpf: "12173958658".to_string(),
            expiry_month: 12,
            expiry_year: Utc::now().year() + 2,
            cvv: "123".to_string(),
        }
    }

    #[test]
    fn valid_fields_detect_visa() {
        assert_eq!(validate_card_fields(&good_fields()).unwrap(), CardBrand::Visa);
    }

    #[test]
    fn all_field_errors_are_collected() {
        let fields = CardFields {
            number: "1234".to_string(),
            holder_name: "  ".to_string(),
            holder_cpf: "11111111111".to_string(),
            expiry_month: 13,
            expiry_year: 2020,
            cvv: "12".to_string(),
        };

        let err = validate_card_fields(&fields).unwrap_err();
        match err {
            PspError::Rejected(errors) => {
                let fields_with_errors: Vec<&str> =
                    errors.iter().map(|e| e.field.as_str()).collect();
                assert!(fields_with_errors.contains(&"number"));
                assert!(fields_with_errors.contains(&"holder_name"));
                assert!(fields_with_errors.contains(&"holder_cpf"));
                assert!(fields_with_errors.contains(&"expiry_month"));
                assert!(fields_with_errors.contains(&"cvv"));
            }
            other => panic!("expected Rejected, got {:?}", other.to_string()),
        }
    }

    #[test]
    fn expired_card_is_rejected() {
        let mut fields = good_fields();
        fields.expiry_year = Utc::now().year() - 1;
        let err = validate_card_fields(&fields).unwrap_err();
        match err {
            PspError::Rejected(errors) => {
                assert!(errors.iter().any(|e| e.field == "expiry_year"));
            }
            other => panic!("expected Rejected, got {:?}", other.to_string()),
        }
    }

    #[tokio::test]
    async fn ensure_ready_loads_once_under_concurrency() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let mut gateway = MockPspGateway::new();
        gateway.expect_fetch_public_key().returning(|| {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Ok("PUBKEY-1".to_string())
        });

        let handle = Arc::new(EncryptionHandle::new(Arc::new(gateway), None));
        assert_eq!(handle.state().await, SdkState::Unloaded);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.ensure_ready().await })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "PUBKEY-1");
        }

        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state().await, SdkState::Ready);
    }

    #[tokio::test]
    async fn failed_load_stays_failed_until_reset() {
        let mut gateway = MockPspGateway::new();
        let mut first = true;
        gateway.expect_fetch_public_key().returning(move || {
            if std::mem::take(&mut first) {
                Err(PspError::Transport("connection refused".to_string()))
            } else {
                Ok("PUBKEY-2".to_string())
            }
        });

        let handle = EncryptionHandle::new(Arc::new(gateway), None);

        assert!(handle.ensure_ready().await.is_err());
        assert_eq!(handle.state().await, SdkState::Failed);

        // Attempt-once: no silent retry while failed
        assert!(handle.ensure_ready().await.is_err());

        handle.reset().await;
        assert_eq!(handle.ensure_ready().await.unwrap(), "PUBKEY-2");
        assert_eq!(handle.state().await, SdkState::Ready);
    }

    #[tokio::test]
    async fn configured_key_skips_gateway_fetch() {
        let gateway = MockPspGateway::new(); // no expectations: any call would panic
        let handle = EncryptionHandle::new(Arc::new(gateway), Some("STATIC-KEY".to_string()));
        assert_eq!(handle.state().await, SdkState::Ready);
        assert_eq!(handle.ensure_ready().await.unwrap(), "STATIC-KEY");
    }

    #[tokio::test]
    async fn encrypt_rejects_before_touching_gateway() {
        let gateway = MockPspGateway::new(); // any gateway call would panic
        let handle = EncryptionHandle::new(Arc::new(gateway), Some("STATIC-KEY".to_string()));

        let mut fields = good_fields();
        fields.number = "4539620659922098".to_string(); // fails Luhn

        let err = handle.encrypt(&fields).await.unwrap_err();
        assert_matches!(err, PspError::Rejected(_));
    }

    #[tokio::test]
    async fn encrypt_returns_opaque_blob() {
        let mut gateway = MockPspGateway::new();
        gateway
            .expect_tokenize_card()
            .returning(|_, _| Ok("tok_opaque_123".to_string()));

        let handle = EncryptionHandle::new(Arc::new(gateway), Some("STATIC-KEY".to_string()));
        let card = handle.encrypt(&good_fields()).await.unwrap();
        assert_eq!(card.blob, "tok_opaque_123");
        assert_eq!(card.brand, CardBrand::Visa);
    }
}
