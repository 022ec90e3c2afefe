use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use vitrine_api::{
    auth::{AuthConfig, AuthVerifier},
    config::AppConfig,
    db,
    entities::{address, product, product_variant, shipping_method},
    events::{self, EventSender},
    handlers::AppServices,
    psp::{
        BoletoSlip, CardFields, ChargeOutcome, GatewayChargeStatus, PixQr, PspError, PspGateway,
    },
    AppState,
};

/// Read a money field regardless of whether it crossed the wire as a JSON
/// string or number.
#[allow(dead_code)]
pub fn decimal_field(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("expected a decimal, got {:?}", other),
    }
}

/// Gateway stub answering every call successfully. Charges are paid
/// immediately; PIX QR codes expire one hour out.
pub struct StubGateway;

#[async_trait]
impl PspGateway for StubGateway {
    async fn fetch_public_key(&self) -> Result<String, PspError> {
        Ok("PUB-TEST-KEY".to_string())
    }

    async fn tokenize_card(
        &self,
        _fields: &CardFields,
        _public_key: &str,
    ) -> Result<String, PspError> {
        Ok("tok_test_0001".to_string())
    }

    async fn charge_card(
        &self,
        reference: &str,
        _amount: Decimal,
        _card_token: &str,
    ) -> Result<ChargeOutcome, PspError> {
        Ok(ChargeOutcome {
            charge_id: format!("ch_{}", reference),
            status: GatewayChargeStatus::Paid,
        })
    }

    async fn create_pix_qr(
        &self,
        reference: &str,
        _amount: Decimal,
        expires_in: std::time::Duration,
    ) -> Result<PixQr, PspError> {
        Ok(PixQr {
            charge_id: format!("pix_{}", reference),
            payload: "00020126580014br.gov.bcb.pix-test".to_string(),
            image_base64: "aW1hZ2U=".to_string(),
            expires_at: Utc::now() + chrono::Duration::from_std(expires_in).unwrap(),
        })
    }

    async fn create_boleto(
        &self,
        reference: &str,
        _amount: Decimal,
        _payer_name: &str,
        _payer_cpf: &str,
    ) -> Result<BoletoSlip, PspError> {
        Ok(BoletoSlip {
            charge_id: format!("bol_{}", reference),
            barcode: "34191.79001 01043.510047 91020.150008 6 97690000019990".to_string(),
            document_url: "https://psp.test/boletos/1".to_string(),
        })
    }

    async fn charge_status(&self, _charge_id: &str) -> Result<GatewayChargeStatus, PspError> {
        Ok(GatewayChargeStatus::Pending)
    }
}

/// Helper harness spinning up application state over an in-memory SQLite
/// database, with a stub payment gateway and a signed bearer token.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub user_id: Uuid,
    token: String,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_gateway(Arc::new(StubGateway)).await
    }

    pub async fn with_gateway(gateway: Arc<dyn PspGateway>) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "test_secret_key_for_testing_purposes_only_32chars".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(db_arc.clone(), gateway, event_sender.clone(), &cfg);

        let state = AppState {
            db: db_arc,
            config: cfg.clone(),
            event_sender,
            services,
        };

        let verifier = Arc::new(AuthVerifier::new(AuthConfig::new(
            cfg.jwt_secret.clone(),
            cfg.jwt_issuer.clone(),
            cfg.jwt_audience.clone(),
        )));
        let user_id = Uuid::new_v4();
        let token = verifier
            .issue_token(
                user_id,
                Some("Ana Souza".to_string()),
                Some("ana@example.com".to_string()),
                3600,
            )
            .expect("failed to issue test token");

        let router = Router::new()
            .nest("/api/v1", vitrine_api::api_v1_routes())
            .layer(axum::middleware::from_fn_with_state(
                verifier.clone(),
                |axum::extract::State(auth): axum::extract::State<Arc<AuthVerifier>>,
                 mut req: axum::http::Request<Body>,
                 next: axum::middleware::Next| async move {
                    req.extensions_mut().insert(auth);
                    next.run(req).await
                },
            ))
            .layer(axum::middleware::from_fn(
                vitrine_api::middleware_helpers::request_id::request_id_middleware,
            ))
            .with_state(state.clone());

        Self {
            router,
            state,
            user_id,
            token,
            _event_task: event_task,
        }
    }

    /// Issue a request with the harness bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.request_as(method, uri, body, Some(&self.token)).await
    }

    /// Issue a request without authentication.
    pub async fn request_anon(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.request_as(method, uri, body, None).await
    }

    pub async fn request_as(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .expect("failed to build request"),
            None => builder.body(Body::empty()).expect("failed to build request"),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        (status, json)
    }

    /// A token for a different user, for ownership-check tests.
    pub fn token_for(&self, user_id: Uuid) -> String {
        let verifier = AuthVerifier::new(AuthConfig::new(
            self.state.config.jwt_secret.clone(),
            self.state.config.jwt_issuer.clone(),
            self.state.config.jwt_audience.clone(),
        ));
        verifier
            .issue_token(user_id, Some("Outro Usuário".to_string()), None, 3600)
            .expect("failed to issue token")
    }

    pub async fn seed_product(
        &self,
        name: &str,
        price: Decimal,
        weight: Option<f64>,
        stock: i32,
    ) -> Uuid {
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            description: Set(None),
            price: Set(price),
            weight: Set(weight),
            stock: Set(stock),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed product");
        id
    }

    pub async fn seed_variant(&self, product_id: Uuid, size: &str, color: &str, stock: i32) -> Uuid {
        let id = Uuid::new_v4();
        product_variant::ActiveModel {
            id: Set(id),
            product_id: Set(product_id),
            size: Set(size.to_string()),
            color: Set(color.to_string()),
            stock: Set(stock),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed variant");
        id
    }

    pub async fn seed_shipping_method(
        &self,
        name: &str,
        base_cost: Decimal,
        per_unit_cost: Decimal,
        free_above: Option<Decimal>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        shipping_method::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            description: Set(Some(format!("{} (teste)", name))),
            base_cost: Set(base_cost),
            per_unit_cost: Set(per_unit_cost),
            free_above: Set(free_above),
            min_days: Set(3),
            max_days: Set(8),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed shipping method");
        id
    }

    pub async fn seed_address(&self, user_id: Uuid, is_default: bool) -> Uuid {
        let id = Uuid::new_v4();
        address::ActiveModel {
            id: Set(id),
            user_id: Set(user_id),
            label: Set(Some("Casa".to_string())),
            recipient: Set("Ana Souza".to_string()),
            street: Set("Rua das Flores".to_string()),
            number: Set("123".to_string()),
            complement: Set(None),
            district: Set("Centro".to_string()),
            city: Set("São Paulo".to_string()),
            state: Set("SP".to_string()),
            zip_code: Set("01310100".to_string()),
            phone: Set(Some("11999990000".to_string())),
            is_default: Set(is_default),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed address");
        id
    }
}
