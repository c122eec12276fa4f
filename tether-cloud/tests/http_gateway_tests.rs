use pretty_assertions::assert_eq;
use tether_cloud::{CloudConfig, CloudGateway, GatewayError, HttpCloudGateway, ListFilter};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn setup(server: &MockServer) -> HttpCloudGateway {
    HttpCloudGateway::new(CloudConfig::local(server.uri())).unwrap()
}

fn project_json(id: &str, name: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "attributes": { "name": name },
        "created_at": "2026-01-05T10:00:00Z",
        "updated_at": "2026-01-05T10:00:00Z"
    })
}

// --- Construction ---

#[test]
fn rejects_malformed_base_url() {
    let result = HttpCloudGateway::new(CloudConfig::local("not a url"));
    assert!(matches!(result, Err(GatewayError::Config(_))));
}

#[tokio::test]
async fn token_from_config_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/projects/p-1"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(project_json("p-1", "Demo")))
        .expect(1)
        .mount(&server)
        .await;

    let config = CloudConfig {
        auth_token: Some("secret".into()),
        ..CloudConfig::local(server.uri())
    };
    let gateway = HttpCloudGateway::new(config).unwrap();
    assert!(gateway.is_authenticated().await);
    assert!(gateway.get("project", "p-1").await.unwrap().is_some());
}

// --- Create ---

#[tokio::test]
async fn create_returns_canonical_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/projects"))
        .and(body_json(serde_json::json!({ "name": "Demo" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(project_json("p-100", "Demo")))
        .mount(&server)
        .await;

    let gateway = setup(&server);
    let record = gateway
        .create("project", &serde_json::json!({ "name": "Demo" }))
        .await
        .unwrap();
    assert_eq!(record.id, "p-100");
    assert_eq!(record.attributes["name"], "Demo");
}

#[tokio::test]
async fn create_validation_error_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/projects"))
        .respond_with(ResponseTemplate::new(422).set_body_string("name required"))
        .mount(&server)
        .await;

    let err = setup(&server)
        .create("project", &serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Rejected(ref msg) if msg.contains("name required")));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn create_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/projects"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = setup(&server)
        .create("project", &serde_json::json!({ "name": "x" }))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Network(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn rate_limited_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = setup(&server)
        .create("project", &serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn create_rejects_reserved_server_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/projects"))
        .respond_with(ResponseTemplate::new(201).set_body_json(project_json("local_123", "Demo")))
        .mount(&server)
        .await;

    let err = setup(&server)
        .create("project", &serde_json::json!({ "name": "Demo" }))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Rejected(_)));
}

#[tokio::test]
async fn malformed_body_is_serialization_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = setup(&server)
        .create("project", &serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Serialization(_)));
}

// --- Get / List ---

#[tokio::test]
async fn get_missing_returns_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/projects/nope"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(setup(&server).get("project", "nope").await.unwrap().is_none());
}

#[tokio::test]
async fn get_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = setup(&server).get("project", "p-1").await.unwrap_err();
    assert!(matches!(err, GatewayError::Unauthorized(_)));
}

#[tokio::test]
async fn list_returns_items() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/projects"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [project_json("p-1", "A"), project_json("p-2", "B")]
        })))
        .mount(&server)
        .await;

    let filter = ListFilter {
        limit: Some(2),
        ..ListFilter::all()
    };
    let records = setup(&server).list("project", &filter).await.unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["p-1", "p-2"]);
}

// --- Update / Delete ---

#[tokio::test]
async fn update_patches_record() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/projects/p-1"))
        .and(body_json(serde_json::json!({ "name": "Renamed" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(project_json("p-1", "Renamed")))
        .mount(&server)
        .await;

    let record = setup(&server)
        .update("project", "p-1", &serde_json::json!({ "name": "Renamed" }))
        .await
        .unwrap();
    assert_eq!(record.attributes["name"], "Renamed");
}

#[tokio::test]
async fn update_missing_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = setup(&server)
        .update("project", "gone", &serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
}

#[tokio::test]
async fn update_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(409).set_body_string("stale version"))
        .mount(&server)
        .await;

    let err = setup(&server)
        .update("project", "p-1", &serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Conflict(_)));
}

#[tokio::test]
async fn delete_success() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/projects/p-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    setup(&server).delete("project", "p-1").await.unwrap();
}

// --- Transport ---

#[tokio::test]
async fn unreachable_server_is_network_error() {
    let gateway = HttpCloudGateway::new(CloudConfig::local("http://127.0.0.1:1")).unwrap();
    let err = gateway
        .create("project", &serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(err.is_transient(), "expected transient error, got {err}");
}
