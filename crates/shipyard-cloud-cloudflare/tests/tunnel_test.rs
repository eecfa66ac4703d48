//! CloudflareTunnels against a mocked API

use serde_json::{Value, json};
use shipyard_cloud::{CloudError, PollPolicy, RetryConfig, TunnelProvider, TunnelRequest};
use shipyard_cloud_cloudflare::{CloudflareClient, CloudflareTunnels};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TUNNELS: &str = "/accounts/acc-1/cfd_tunnel";
const ORIGIN: &str = "http://ingress-nginx-controller.ingress-nginx.svc.cluster.local:80";

fn tunnels(server: &MockServer) -> CloudflareTunnels {
    CloudflareTunnels::with_client(
        CloudflareClient::with_base_url("cf-token", "acc-1", server.uri())
            .with_retry(RetryConfig::none()),
    )
    .with_verify_policy(PollPolicy::new(3, Duration::from_millis(10)))
}

fn ok(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "errors": [],
        "result": result
    }))
}

fn request() -> TunnelRequest {
    TunnelRequest {
        service_name: "web".into(),
        tunnel_name: "myapp-web".into(),
        hostname: "www.example.com".into(),
        domain: "example.com".into(),
        origin_url: ORIGIN.into(),
    }
}

async fn mount_configuration(server: &MockServer, tunnel_id: &str, hostname: &str) {
    Mock::given(method("PUT"))
        .and(path(format!("{TUNNELS}/{tunnel_id}/configurations")))
        .and(body_partial_json(json!({
            "config": { "ingress": [
                { "hostname": hostname, "service": ORIGIN,
                  "originRequest": { "httpHostHeader": hostname } },
                { "service": "http_status:404" }
            ]}
        })))
        .respond_with(ok(json!({})))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{TUNNELS}/{tunnel_id}/configurations")))
        .respond_with(ok(json!({
            "config": { "ingress": [
                { "hostname": hostname, "service": ORIGIN },
                { "service": "http_status:404" }
            ]}
        })))
        .mount(server)
        .await;
}

async fn mount_zone(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/zones"))
        .and(query_param("name", "example.com"))
        .respond_with(ok(json!([{ "id": "zone-1", "name": "example.com" }])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn creates_tunnel_configures_ingress_and_cname() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TUNNELS))
        .and(header("authorization", "Bearer cf-token"))
        .and(query_param("name", "myapp-web"))
        .and(query_param("is_deleted", "false"))
        .respond_with(ok(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TUNNELS))
        .and(body_partial_json(json!({ "name": "myapp-web", "config_src": "cloudflare" })))
        .respond_with(ok(json!({ "id": "t-1", "name": "myapp-web" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{TUNNELS}/t-1/token")))
        .respond_with(ok(json!("eyJhIjoidG9rZW4ifQ")))
        .expect(1)
        .mount(&server)
        .await;
    mount_configuration(&server, "t-1", "www.example.com").await;
    mount_zone(&server).await;
    Mock::given(method("GET"))
        .and(path("/zones/zone-1/dns_records"))
        .respond_with(ok(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/zones/zone-1/dns_records"))
        .and(body_partial_json(json!({
            "type": "CNAME",
            "name": "www.example.com",
            "content": "t-1.cfargotunnel.com",
            "proxied": true
        })))
        .respond_with(ok(json!({
            "id": "rec-1", "name": "www.example.com", "type": "CNAME",
            "content": "t-1.cfargotunnel.com", "proxied": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let info = tunnels(&server)
        .ensure_tunnel(&request(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(info.tunnel_id, "t-1");
    assert_eq!(info.tunnel_token, "eyJhIjoidG9rZW4ifQ");
    assert_eq!(info.hostname, "www.example.com");
}

#[tokio::test]
async fn existing_tunnel_and_record_are_reused() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TUNNELS))
        .respond_with(ok(json!([
            { "id": "t-9", "name": "myapp-web", "token": "inline-token" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TUNNELS))
        .respond_with(ok(json!({})))
        .expect(0)
        .mount(&server)
        .await;
    mount_configuration(&server, "t-9", "www.example.com").await;
    mount_zone(&server).await;
    Mock::given(method("GET"))
        .and(path("/zones/zone-1/dns_records"))
        .and(query_param("type", "CNAME"))
        .respond_with(ok(json!([{
            "id": "rec-1", "name": "www.example.com", "type": "CNAME",
            "content": "old.cfargotunnel.com", "proxied": true
        }])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/zones/zone-1/dns_records/rec-1"))
        .and(body_partial_json(json!({ "content": "t-9.cfargotunnel.com" })))
        .respond_with(ok(json!({
            "id": "rec-1", "name": "www.example.com", "type": "CNAME",
            "content": "t-9.cfargotunnel.com", "proxied": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let info = tunnels(&server)
        .ensure_tunnel(&request(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(info.tunnel_id, "t-9");
    assert_eq!(info.tunnel_token, "inline-token");
}

#[tokio::test]
async fn unpropagated_configuration_is_a_tunnel_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TUNNELS))
        .respond_with(ok(json!([{ "id": "t-1", "name": "myapp-web", "token": "tok" }])))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{TUNNELS}/t-1/configurations")))
        .respond_with(ok(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{TUNNELS}/t-1/configurations")))
        .respond_with(ok(json!({ "config": { "ingress": [{ "service": "http_status:404" }] } })))
        .expect(3)
        .mount(&server)
        .await;

    let err = tunnels(&server)
        .ensure_tunnel(&request(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::Tunnel(ref m) if m.contains("not propagated")));
}

#[tokio::test]
async fn missing_zone_is_a_dns_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TUNNELS))
        .respond_with(ok(json!([{ "id": "t-1", "name": "myapp-web", "token": "tok" }])))
        .mount(&server)
        .await;
    mount_configuration(&server, "t-1", "www.example.com").await;
    Mock::given(method("GET"))
        .and(path("/zones"))
        .respond_with(ok(json!([])))
        .mount(&server)
        .await;

    let err = tunnels(&server)
        .ensure_tunnel(&request(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::Dns(ref m) if m.contains("example.com")));
}

#[tokio::test]
async fn remove_tunnel_tolerates_missing_resources() {
    let server = MockServer::start().await;
    mount_zone(&server).await;
    Mock::given(method("GET"))
        .and(path("/zones/zone-1/dns_records"))
        .respond_with(ok(json!([{
            "id": "rec-1", "name": "www.example.com", "type": "CNAME",
            "content": "t-1.cfargotunnel.com", "proxied": true
        }])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/zones/zone-1/dns_records/rec-1"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TUNNELS))
        .respond_with(ok(json!([{ "id": "t-1", "name": "myapp-web" }])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{TUNNELS}/t-1/connections")))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "success": false, "errors": [{ "code": 1000, "message": "boom" }], "result": null
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{TUNNELS}/t-1")))
        .respond_with(ok(json!({ "id": "t-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let report = tunnels(&server)
        .remove_tunnel("myapp-web", "www.example.com", "example.com")
        .await;

    assert_eq!(report.failures().len(), 1);
    assert_eq!(report.failures()[0].operation, "delete tunnel connections");
}

#[tokio::test]
async fn invalid_token_fails_validation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/tokens/verify"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "success": false,
            "errors": [{ "code": 1000, "message": "Invalid API Token" }],
            "result": null
        })))
        .mount(&server)
        .await;

    let err = tunnels(&server).validate_credentials().await.unwrap_err();
    assert!(err.to_string().contains("cloudflare credentials invalid"));
    assert!(err.to_string().contains("Invalid API Token"));
}
