//! Drives the full router with `oneshot` requests.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tokio::sync::Notify;
use tower::ServiceExt;

use warmpool_api::build_router;
use warmpool_controller::State;
use warmpool_provider::MemoryProvider;

struct Harness {
    provider: Arc<MemoryProvider>,
    state: Arc<State>,
    nudge: Arc<Notify>,
    router: Router,
}

fn harness() -> Harness {
    let provider = Arc::new(MemoryProvider::new());
    let state = Arc::new(State::new(provider.clone()));
    let nudge = Arc::new(Notify::new());
    let router = build_router(Arc::clone(&state), Arc::clone(&nudge));
    Harness {
        provider,
        state,
        nudge,
        router,
    }
}

fn runtime_json(name: &str, free_size: u32) -> Value {
    json!({
        "name": name,
        "free_size": free_size,
        "revision": {
            "name": "v1",
            "containers": [{ "name": "app", "image": "us-docker.pkg.dev/demo/app:1" }]
        }
    })
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn nudged(nudge: &Notify) -> bool {
    tokio::time::timeout(Duration::from_millis(100), nudge.notified())
        .await
        .is_ok()
}

#[tokio::test]
async fn register_list_and_describe() {
    let h = harness();

    let web = runtime_json("web", 2);
    let (status, body) = send(&h.router, "POST", "/api/v1/runtimes", Some(web)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["desired"], 2);
    assert!(nudged(&h.nudge).await);

    let (status, body) = send(&h.router, "GET", "/api/v1/runtimes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["name"], "web");

    let (status, body) = send(&h.router, "GET", "/api/v1/runtimes/web", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pools"][0], "web [wp_runtime=web]:");
}

#[tokio::test]
async fn duplicate_and_invalid_registration() {
    let h = harness();
    send(&h.router, "POST", "/api/v1/runtimes", Some(runtime_json("web", 1))).await;

    let again = runtime_json("web", 1);
    let (status, body) = send(&h.router, "POST", "/api/v1/runtimes", Some(again)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    let bad = runtime_json("Web!", 1);
    let (status, _) = send(&h.router, "POST", "/api/v1/runtimes", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_is_accepted_and_nudges() {
    let h = harness();
    send(&h.router, "POST", "/api/v1/runtimes", Some(runtime_json("web", 1))).await;
    // Drain the registration nudge.
    assert!(nudged(&h.nudge).await);

    let resized = runtime_json("web", 4);
    let (status, body) = send(&h.router, "PUT", "/api/v1/runtimes/web", Some(resized)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["status"], "accepted");
    assert!(nudged(&h.nudge).await);
    assert_eq!(h.state.runtime("web").unwrap().definition().free_size, 4);

    let unknown = runtime_json("api", 1);
    let (status, _) = send(&h.router, "PUT", "/api/v1/runtimes/api", Some(unknown)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn instance_lookup_and_routes() {
    let h = harness();
    send(&h.router, "POST", "/api/v1/runtimes", Some(runtime_json("web", 2))).await;
    h.state.reconcile().await.unwrap();

    let names = h.provider.service_names();
    h.provider.assign(&names[0], "user-1");
    h.state.refresh().await.unwrap();

    let uri = format!("/api/v1/runtimes/web/services/{}", names[1]);
    let (status, body) = send(&h.router, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pool"], "free");
    assert_eq!(body["data"]["status"], "READY");

    let (status, body) = send(&h.router, "GET", "/api/v1/runtimes/web/services/user-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], names[0].as_str());
    assert_eq!(body["data"]["assignment"], "user-1");

    let (status, body) = send(&h.router, "GET", "/api/v1/runtimes/web/routes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["user-1"],
        format!("https://{}.memory.local", names[0]).as_str()
    );

    let (status, _) = send(&h.router, "GET", "/api/v1/runtimes/web/services/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deregister_and_reconcile() {
    let h = harness();
    send(&h.router, "POST", "/api/v1/runtimes", Some(runtime_json("web", 1))).await;
    assert!(nudged(&h.nudge).await);

    let (status, _) = send(&h.router, "POST", "/api/v1/reconcile", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(nudged(&h.nudge).await);

    let (status, _) = send(&h.router, "DELETE", "/api/v1/runtimes/web", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&h.router, "GET", "/api/v1/runtimes/web", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
