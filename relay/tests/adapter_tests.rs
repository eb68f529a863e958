use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use parking_lot::Mutex;
use relay::{
    AdapterFactory, AdapterId, HttpAdapterFactory, LazyInitializer, RelayError, RpcDispatcher,
    Session, SessionConfig,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Recorder {
    fn push(&self, route: &str, payload: Value) {
        self.seen.lock().push((route.to_string(), payload));
    }

    fn find(&self, route: &str) -> Option<Value> {
        self.seen
            .lock()
            .iter()
            .find(|(seen, _)| seen == route)
            .map(|(_, payload)| payload.clone())
    }

    fn count(&self, route: &str) -> usize {
        self.seen.lock().iter().filter(|(seen, _)| seen == route).count()
    }
}

async fn spawn(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock backend");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("mock backend");
    });
    format!("http://{addr}")
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn data_backend(recorder: Recorder) -> String {
    let router = Router::new()
        .route(
            "/api/health",
            get(|State(recorder): State<Recorder>| async move {
                recorder.push("health", json!({}));
                Json(json!({ "code": 200, "message": "API is healthy." }))
            }),
        )
        .route(
            "/api/collections/:collection/auth-with-password",
            post(
                |Path(collection): Path<String>, Json(body): Json<Value>| async move {
                    if body["password"] != "hunter2" {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({ "message": "Failed to authenticate." })),
                        );
                    }
                    (
                        StatusCode::OK,
                        Json(json!({ "token": "tok-1", "record": { "collectionName": collection } })),
                    )
                },
            ),
        )
        .route(
            "/api/collections/:collection/records",
            get(
                |headers: HeaderMap,
                 Path(collection): Path<String>,
                 Query(query): Query<HashMap<String, String>>| async move {
                    if bearer(&headers).as_deref() != Some("tok-1") {
                        return (StatusCode::FORBIDDEN, Json(json!({ "message": "forbidden" })));
                    }
                    (
                        StatusCode::OK,
                        Json(json!({
                            "collection": collection,
                            "page": query.get("page"),
                            "perPage": query.get("perPage"),
                            "filter": query.get("filter"),
                            "items": []
                        })),
                    )
                },
            )
            .post(
                |State(recorder): State<Recorder>,
                 Path(collection): Path<String>,
                 Json(body): Json<Value>| async move {
                    recorder.push("create", json!({ "collection": collection, "data": body }));
                    let mut record = body;
                    record["id"] = json!("rec_1");
                    Json(record)
                },
            ),
        )
        .with_state(recorder);
    spawn(router).await
}

async fn payment_backend(recorder: Recorder) -> String {
    let router = Router::new()
        .route(
            "/v1/balance",
            get(|headers: HeaderMap| async move {
                if bearer(&headers).as_deref() != Some("sk_test_123") {
                    return (
                        StatusCode::UNAUTHORIZED,
                        Json(json!({ "error": { "message": "Invalid API Key provided" } })),
                    );
                }
                (StatusCode::OK, Json(json!({ "object": "balance", "livemode": false })))
            }),
        )
        .route(
            "/v1/customers",
            post(
                |State(recorder): State<Recorder>,
                 Form(form): Form<HashMap<String, String>>| async move {
                    let payload = serde_json::to_value(&form).unwrap_or_default();
                    recorder.push("customer", payload);
                    Json(json!({
                        "id": "cus_1",
                        "object": "customer",
                        "email": form.get("email"),
                    }))
                },
            ),
        )
        .route(
            "/v1/customers/:id",
            get(|Path(id): Path<String>| async move {
                (
                    StatusCode::NOT_FOUND,
                    Json(json!({ "error": { "message": format!("No such customer: '{id}'") } })),
                )
            }),
        )
        .with_state(recorder);
    spawn(router).await
}

async fn notification_backend(recorder: Recorder) -> String {
    let router = Router::new()
        .route("/domains", get(|| async { Json(json!({ "data": [] })) }))
        .route(
            "/emails",
            post(
                |State(recorder): State<Recorder>, Json(body): Json<Value>| async move {
                    recorder.push("email", body);
                    Json(json!({ "id": "em_1" }))
                },
            ),
        )
        .with_state(recorder);
    spawn(router).await
}

#[tokio::test]
async fn data_adapter_authenticates_and_clamps_paging() {
    let recorder = Recorder::default();
    let base = data_backend(recorder.clone()).await;
    let config = SessionConfig::from_pairs([
        ("data.url", base.as_str()),
        ("data.identity", "admin@example.com"),
        ("data.password", "hunter2"),
    ]);
    let settings = config.backend(AdapterId::Data).expect("data settings");
    let adapter = HttpAdapterFactory::default()
        .connect(AdapterId::Data, &settings)
        .await
        .expect("data adapter connects");

    let listing = adapter
        .call(
            "records.list",
            json!({ "collection": "posts", "per_page": 9999, "filter": "published = true" }),
        )
        .await
        .expect("records listed");
    assert_eq!(listing["collection"], "posts");
    assert_eq!(listing["perPage"], "500");
    assert_eq!(listing["page"], "1");
    assert_eq!(listing["filter"], "published = true");
    assert_eq!(recorder.count("health"), 1);
}

#[tokio::test]
async fn data_adapter_surfaces_rejected_credentials() {
    let base = data_backend(Recorder::default()).await;
    let config = SessionConfig::from_pairs([
        ("data.url", base.as_str()),
        ("data.identity", "admin@example.com"),
        ("data.password", "wrong"),
    ]);
    let settings = config.backend(AdapterId::Data).expect("data settings");
    let err = HttpAdapterFactory::default()
        .connect(AdapterId::Data, &settings)
        .await
        .err()
        .expect("bad credentials rejected");
    match err {
        RelayError::Backend { adapter, status, detail } => {
            assert_eq!(adapter, AdapterId::Data);
            assert_eq!(status, Some(400));
            assert_eq!(detail["message"], "Failed to authenticate.");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn payment_adapter_sends_form_encoded_requests() {
    let recorder = Recorder::default();
    let base = payment_backend(recorder.clone()).await;
    let config = SessionConfig::from_pairs([
        ("payment.secret_key", "sk_test_123"),
        ("payment.api_base", base.as_str()),
    ]);
    let settings = config.backend(AdapterId::Payment).expect("payment settings");
    let adapter = HttpAdapterFactory::default()
        .connect(AdapterId::Payment, &settings)
        .await
        .expect("payment adapter connects");

    let customer = adapter
        .call(
            "customers.create",
            json!({ "email": "ada@example.com", "name": "Ada", "metadata": { "plan": "pro" } }),
        )
        .await
        .expect("customer created");
    assert_eq!(customer["id"], "cus_1");
    let form = recorder.find("customer").expect("form recorded");
    assert_eq!(form["email"], "ada@example.com");
    assert_eq!(form["metadata[plan]"], "pro");

    let err = adapter
        .call("customers.get", json!({ "id": "cus_missing" }))
        .await
        .expect_err("missing customer");
    assert!(matches!(err, RelayError::Backend { status: Some(404), .. }));
}

#[tokio::test]
async fn payment_adapter_rejects_invalid_keys_at_connect() {
    let base = payment_backend(Recorder::default()).await;
    let config = SessionConfig::from_pairs([
        ("payment.secret_key", "sk_wrong"),
        ("payment.api_base", base.as_str()),
    ]);
    let settings = config.backend(AdapterId::Payment).expect("payment settings");
    let err = HttpAdapterFactory::default()
        .connect(AdapterId::Payment, &settings)
        .await
        .err()
        .expect("invalid key rejected");
    assert!(matches!(err, RelayError::Backend { status: Some(401), .. }));
}

#[tokio::test]
async fn unreachable_backends_fail_with_network_errors() {
    let config = SessionConfig::from_pairs([("data.url", "http://127.0.0.1:9")]);
    let settings = config.backend(AdapterId::Data).expect("data settings");
    let err = HttpAdapterFactory::new(Duration::from_secs(2))
        .connect(AdapterId::Data, &settings)
        .await
        .err()
        .expect("nothing listens on the discard port");
    assert!(matches!(err, RelayError::Network(_)));
}

#[tokio::test]
async fn onboarding_runs_across_all_three_backends() {
    let recorder = Recorder::default();
    let data = data_backend(recorder.clone()).await;
    let payment = payment_backend(recorder.clone()).await;
    let notification = notification_backend(recorder.clone()).await;

    let dispatcher = RpcDispatcher::new(
        Arc::new(relay::default_registry().expect("registry")),
        LazyInitializer::new(Arc::new(HttpAdapterFactory::default())),
    );
    let mut session = Session::new(Some(SessionConfig::from_pairs([
        ("data.url", data.as_str()),
        ("payment.secret_key", "sk_test_123"),
        ("payment.api_base", payment.as_str()),
        ("notification.api_key", "re_test"),
        ("notification.api_base", notification.as_str()),
        ("notification.from", "hello@example.com"),
    ])));

    let request = json!({
        "jsonrpc": "2.0",
        "id": "onboard-1",
        "method": "tools/call",
        "params": {
            "name": "onboard_customer",
            "arguments": { "email": "ada@example.com", "name": "Ada" }
        }
    });
    let response = dispatcher
        .handle_bytes(&mut session, request.to_string().as_bytes())
        .await;
    assert!(!response.is_error(), "{:?}", response.error);
    let result = response.result.expect("result");
    assert_eq!(result["structuredContent"]["customer"]["id"], "cus_1");
    assert_eq!(result["structuredContent"]["record"]["id"], "rec_1");
    assert_eq!(result["structuredContent"]["email"]["id"], "em_1");

    let stored = recorder.find("create").expect("record created");
    assert_eq!(stored["collection"], "customers");
    assert_eq!(stored["data"]["payment_customer_id"], "cus_1");
    let email = recorder.find("email").expect("email sent");
    assert_eq!(email["from"], "hello@example.com");
    assert_eq!(email["to"], json!(["ada@example.com"]));

    for adapter in AdapterId::ALL {
        assert!(session.adapter_state(adapter).is_ready(), "{adapter} not ready");
    }
}
