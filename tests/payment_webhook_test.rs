//! Charge initiation and webhook reconciliation, including signature
//! rejection and duplicate-delivery idempotence.

mod common;

use axum::{body, http::Method, response::Response};
use chrono::Utc;
use common::{TestApp, TEST_SECRET};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::{json, Value};
use storefront_api::entities::{payment, Payment, PaymentStatus};
use storefront_api::gateway::{sign_webhook_body, VerificationStatus, SIGNATURE_HEADER};
use uuid::Uuid;

async fn payment_status(app: &TestApp, reference: &str) -> PaymentStatus {
    Payment::find()
        .filter(payment::Column::TransactionId.eq(reference))
        .one(app.state.db.as_ref())
        .await
        .expect("payment query")
        .expect("payment row")
        .status
}

async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Seeds a customer with a checked-out pending order and returns
/// (customer_id, order_id).
async fn pending_order(app: &TestApp, email: &str) -> (String, String) {
    let customer = app.seed_customer(email, false).await;
    let product = app.seed_product("Headphones", dec!(80.00), 10).await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/customers/{}/cart/items", customer.id),
            Some(json!({"product_id": product.id, "quantity": 1})),
        )
        .await;
    assert_eq!(response.status(), 200);

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/customers/{}/checkout", customer.id),
            Some(json!({
                "shipping_address": "5 Station Rd",
                "billing_address": "5 Station Rd"
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    let order = response_json(response).await;
    (
        customer.id.to_string(),
        order["id"].as_str().unwrap().to_string(),
    )
}

async fn deliver_webhook(app: &TestApp, event: &str, reference: &str) -> Response {
    let payload = json!({"event": event, "data": {"reference": reference}});
    let body = serde_json::to_vec(&payload).unwrap();
    let signature = sign_webhook_body(TEST_SECRET, &body);
    app.request_raw(
        Method::POST,
        "/api/v1/payments/webhook",
        body,
        &[
            ("content-type", "application/json"),
            (SIGNATURE_HEADER, &signature),
        ],
    )
    .await
}

#[tokio::test]
async fn pay_then_settle_marks_order_created() {
    let app = TestApp::new().await;
    let (_customer_id, order_id) = pending_order(&app, "settle@example.com").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/pay", order_id),
            Some(json!({})),
        )
        .await;
    assert_eq!(response.status(), 201);
    let initiated = response_json(response).await;
    let reference = initiated["reference"].as_str().unwrap().to_string();
    assert!(reference.starts_with(&format!("order_{}", order_id)));
    assert_eq!(initiated["amount"], json!("80.00"));
    assert_eq!(app.gateway.initiated_references(), vec![reference.clone()]);

    app.gateway
        .set_verification(&reference, VerificationStatus::Success, 8000);
    let response = deliver_webhook(&app, "charge.success", &reference).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response_json(response).await, json!("processed"));

    let response = app
        .request(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
        .await;
    let order = response_json(response).await;
    assert_eq!(order["status"], "created");

    let templates = app.notifier.sent_templates();
    assert!(templates.contains(&"payment_success"));
}

#[tokio::test]
async fn duplicate_delivery_is_a_noop() {
    let app = TestApp::new().await;
    let (_, order_id) = pending_order(&app, "dup@example.com").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/pay", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), 201);
    let reference = response_json(response).await["reference"]
        .as_str()
        .unwrap()
        .to_string();

    app.gateway
        .set_verification(&reference, VerificationStatus::Success, 8000);

    let response = deliver_webhook(&app, "charge.success", &reference).await;
    assert_eq!(response_json(response).await, json!("processed"));

    let response = deliver_webhook(&app, "charge.success", &reference).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response_json(response).await, json!("already_processed"));
}

#[tokio::test]
async fn bad_signature_is_rejected_before_any_state_change() {
    let app = TestApp::new().await;
    let (_, order_id) = pending_order(&app, "sig@example.com").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/pay", order_id),
            None,
        )
        .await;
    let reference = response_json(response).await["reference"]
        .as_str()
        .unwrap()
        .to_string();

    let payload = json!({"event": "charge.success", "data": {"reference": reference}});
    let body = serde_json::to_vec(&payload).unwrap();

    // missing header
    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/payments/webhook",
            body.clone(),
            &[("content-type", "application/json")],
        )
        .await;
    assert_eq!(response.status(), 401);

    // wrong key
    let forged = sign_webhook_body("sk_test_wrong_key_000000", &body);
    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/payments/webhook",
            body,
            &[
                ("content-type", "application/json"),
                (SIGNATURE_HEADER, &forged),
            ],
        )
        .await;
    assert_eq!(response.status(), 401);

    // order untouched
    let response = app
        .request(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
        .await;
    assert_eq!(response_json(response).await["status"], "pending");
}

#[tokio::test]
async fn failed_verification_changes_nothing() {
    let app = TestApp::new().await;
    let (_, order_id) = pending_order(&app, "verifyfail@example.com").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/pay", order_id),
            None,
        )
        .await;
    let reference = response_json(response).await["reference"]
        .as_str()
        .unwrap()
        .to_string();

    app.gateway
        .set_verification(&reference, VerificationStatus::Failed, 8000);
    let response = deliver_webhook(&app, "charge.success", &reference).await;
    assert_eq!(response.status(), 502);

    let response = app
        .request(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
        .await;
    assert_eq!(response_json(response).await["status"], "pending");
}

#[tokio::test]
async fn failure_event_after_success_is_ignored() {
    let app = TestApp::new().await;
    let (_, order_id) = pending_order(&app, "latefail@example.com").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/pay", order_id),
            None,
        )
        .await;
    let reference = response_json(response).await["reference"]
        .as_str()
        .unwrap()
        .to_string();

    app.gateway
        .set_verification(&reference, VerificationStatus::Success, 8000);
    let response = deliver_webhook(&app, "charge.success", &reference).await;
    assert_eq!(response.status(), 200);

    let response = deliver_webhook(&app, "invoice.payment_failed", &reference).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response_json(response).await, json!("already_processed"));

    // completed is terminal: the failure delivery must not rewrite it
    assert_eq!(payment_status(&app, &reference).await, PaymentStatus::Completed);

    let response = app
        .request(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
        .await;
    assert_eq!(response_json(response).await["status"], "created");
}

#[tokio::test]
async fn failure_event_marks_payment_failed_and_keeps_order_pending() {
    let app = TestApp::new().await;
    let (_, order_id) = pending_order(&app, "declined@example.com").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/pay", order_id),
            None,
        )
        .await;
    let reference = response_json(response).await["reference"]
        .as_str()
        .unwrap()
        .to_string();

    let response = deliver_webhook(&app, "invoice.payment_failed", &reference).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response_json(response).await, json!("processed"));

    let response = app
        .request(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
        .await;
    assert_eq!(response_json(response).await["status"], "pending");

    let templates = app.notifier.sent_templates();
    assert!(templates.contains(&"payment_failure"));
}

#[tokio::test]
async fn unknown_event_type_is_rejected() {
    let app = TestApp::new().await;
    let response = deliver_webhook(&app, "charge.dispute.create", "order_x_1").await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn failure_event_for_unknown_transaction_is_not_found() {
    let app = TestApp::new().await;
    let response = deliver_webhook(&app, "invoice.payment_failed", "order_ghost_1").await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn paying_a_paid_order_conflicts() {
    let app = TestApp::new().await;
    let (_, order_id) = pending_order(&app, "twice@example.com").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/pay", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), 201);

    // a second initiation while the first is pending
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/pay", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn settlement_for_unknown_charge_creates_orphan_payment() {
    let app = TestApp::new().await;
    let reference = "order_external_1700000000";

    app.gateway
        .set_verification(reference, VerificationStatus::Success, 12345);
    let response = deliver_webhook(&app, "charge.success", reference).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response_json(response).await, json!("processed"));

    // replay is still a no-op
    let response = deliver_webhook(&app, "charge.success", reference).await;
    assert_eq!(response_json(response).await, json!("already_processed"));
}

#[tokio::test]
async fn storage_rejects_second_inflight_payment_for_same_order() {
    let app = TestApp::new().await;
    let (customer_id, order_id) = pending_order(&app, "inflight@example.com").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/pay", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), 201);

    // a second pending row written directly, as a racing initiation that
    // slipped past the service pre-check would be
    let now = Utc::now();
    let duplicate = payment::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(Some(Uuid::parse_str(&order_id).unwrap())),
        customer_id: Set(Some(Uuid::parse_str(&customer_id).unwrap())),
        amount: Set(dec!(80.00)),
        currency: Set("KES".to_string()),
        reference: Set(format!("order_{}_racer", order_id)),
        transaction_id: Set(format!("order_{}_racer", order_id)),
        status: Set(PaymentStatus::Pending),
        payment_method: Set(None),
        payment_date: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let result = duplicate.insert(app.state.db.as_ref()).await;
    assert!(result.is_err(), "second in-flight payment row must be rejected");

    let in_flight = Payment::find()
        .filter(payment::Column::OrderId.eq(Uuid::parse_str(&order_id).unwrap()))
        .all(app.state.db.as_ref())
        .await
        .expect("payment query");
    assert_eq!(in_flight.len(), 1);
}

#[tokio::test]
async fn override_amount_must_be_positive() {
    let app = TestApp::new().await;
    let (_, order_id) = pending_order(&app, "badamount@example.com").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/pay", order_id),
            Some(json!({"amount": "0"})),
        )
        .await;
    assert_eq!(response.status(), 400);
}
