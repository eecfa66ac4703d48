use shipyard_deploy::verify::{HttpProbe, ProbeOutcome, ReqwestProbe, TrafficVerifier, VerifyPolicy};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn probe() -> ReqwestProbe {
    ReqwestProbe::new(Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn healthy_app_is_a_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/up"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let outcome = probe().probe(&format!("{}/up", server.uri())).await;
    assert_eq!(
        outcome,
        ProbeOutcome::Response {
            status: 200,
            error_marker: false
        }
    );
    assert!(outcome.is_success());
}

#[tokio::test]
async fn error_backend_header_overrides_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).insert_header("X-Shipyard-Error", "503"))
        .mount(&server)
        .await;

    let outcome = probe().probe(&format!("{}/up", server.uri())).await;
    assert_eq!(
        outcome,
        ProbeOutcome::Response {
            status: 200,
            error_marker: true
        }
    );
    assert!(!outcome.is_success());
}

#[tokio::test]
async fn connection_refused_is_unreachable() {
    // nothing listens on the discard port
    let outcome = probe().probe("http://127.0.0.1:9/up").await;
    assert!(matches!(outcome, ProbeOutcome::Unreachable(_)));
}

#[tokio::test]
async fn verifier_needs_consecutive_successes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let probe = probe();
    let policy = VerifyPolicy {
        interval: Duration::from_millis(10),
        ..VerifyPolicy::default()
    };
    let verifier = TrafficVerifier::new(&probe, policy, CancellationToken::new());

    let attempt = verifier.verify(&format!("{}/up", server.uri())).await.unwrap();
    assert_eq!(attempt, 5);
}

#[tokio::test]
async fn redirect_is_classified_as_is() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/up"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/login"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let outcome = probe().probe(&format!("{}/up", server.uri())).await;
    assert_eq!(
        outcome,
        ProbeOutcome::Response {
            status: 302,
            error_marker: false
        }
    );
    assert!(!outcome.is_success());
}
