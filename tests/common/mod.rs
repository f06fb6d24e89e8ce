use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use storefront_api::{
    config::AppConfig,
    db,
    entities::{customer, product},
    events::{self, EventSender},
    gateway::{
        GatewayError, InitiateCharge, InitiatedCharge, PaymentGateway, VerificationStatus,
        VerifiedTransaction,
    },
    handlers::AppServices,
    notifier::{EmailMessage, Notifier, NotifierError},
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_SECRET: &str = "sk_test_0123456789abcdef";

/// Gateway stand-in: records initiated charges and serves configurable
/// verification results.
pub struct MockGateway {
    pub initiated: Mutex<Vec<InitiateCharge>>,
    pub verify_results: Mutex<Vec<(String, VerifiedTransaction)>>,
    pub fail_verify: Mutex<bool>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            initiated: Mutex::new(Vec::new()),
            verify_results: Mutex::new(Vec::new()),
            fail_verify: Mutex::new(false),
        })
    }

    /// Registers the verification result returned for `reference`.
    pub fn set_verification(&self, reference: &str, status: VerificationStatus, amount_minor: i64) {
        self.verify_results.lock().unwrap().push((
            reference.to_string(),
            VerifiedTransaction {
                status,
                amount_minor,
                currency: "KES".to_string(),
            },
        ));
    }

    pub fn set_fail_verify(&self, fail: bool) {
        *self.fail_verify.lock().unwrap() = fail;
    }

    pub fn initiated_references(&self) -> Vec<String> {
        self.initiated
            .lock()
            .unwrap()
            .iter()
            .map(|charge| charge.reference.clone())
            .collect()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initiate(&self, charge: InitiateCharge) -> Result<InitiatedCharge, GatewayError> {
        let reference = charge.reference.clone();
        self.initiated.lock().unwrap().push(charge);
        Ok(InitiatedCharge {
            checkout_url: format!("https://checkout.test/{}", reference),
            reference,
        })
    }

    async fn verify(&self, reference: &str) -> Result<VerifiedTransaction, GatewayError> {
        if *self.fail_verify.lock().unwrap() {
            return Err(GatewayError::Malformed("verify unavailable".to_string()));
        }
        self.verify_results
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(r, _)| r == reference)
            .map(|(_, tx)| tx.clone())
            .ok_or_else(|| GatewayError::Declined {
                message: format!("unknown transaction {}", reference),
                payload: None,
            })
    }
}

/// Notifier stand-in that records every message instead of sending it.
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    #[allow(dead_code)]
    pub fn sent_templates(&self) -> Vec<&'static str> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.template.id())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: EmailMessage) -> Result<(), NotifierError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Helper harness for spinning up an application backed by a throwaway
/// SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
    pub notifier: Arc<RecordingNotifier>,
    db_file: std::path::PathBuf,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_file = std::env::temp_dir().join(format!("storefront_test_{}.db", Uuid::new_v4()));
        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            TEST_SECRET.to_string(),
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = MockGateway::new();
        let notifier = RecordingNotifier::new();

        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            gateway.clone(),
            notifier.clone(),
            cfg.currency.clone(),
            cfg.gateway_secret_key.clone(),
        );

        let state = AppState {
            db: db_arc,
            config: cfg.clone(),
            event_sender,
            services,
        };
        let router = storefront_api::app_router(state.clone());

        Self {
            router,
            state,
            gateway,
            notifier,
            db_file,
            _event_task: event_task,
        }
    }

    /// Send a JSON request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Send a raw-body request with explicit headers, for webhook tests.
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(Body::from(body))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_customer(&self, email: &str, is_staff: bool) -> customer::Model {
        customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            first_name: Set("Test".to_string()),
            last_name: Set("Customer".to_string()),
            is_staff: Set(is_staff),
            created_at: Set(Utc::now()),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed customer for tests")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            stock: Set(stock),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed product for tests")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_file);
    }
}
