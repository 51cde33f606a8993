#![allow(clippy::unwrap_used)]
// Integration tests for `HttpTransport` using wiremock.

use std::net::Ipv4Addr;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use netrules_api::command::{PortForwardingRuleTo, SetPortForwardingRulesCommand};
use netrules_api::{
    CommandBatch, CommandBody, Error, HttpTransport, OnError, RouterCommand, RouterEndpoint,
    RouterTransport, RoutingMetadata, ZoneNetworkType, ensure_success,
};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, HttpTransport) {
    let server = MockServer::start().await;
    let transport = HttpTransport::with_base_url(
        reqwest::Client::new(),
        Url::parse(&server.uri()).unwrap(),
    );
    (server, transport)
}

fn router() -> RouterEndpoint {
    RouterEndpoint {
        name: "r-12-VM".into(),
        control_ip: Ipv4Addr::new(169, 254, 2, 12),
    }
}

fn pf_batch() -> CommandBatch {
    let routing = RoutingMetadata {
        router_name: "r-12-VM".into(),
        router_control_ip: Ipv4Addr::new(169, 254, 2, 12),
        router_guest_ip: Some(Ipv4Addr::new(10, 1, 1, 1)),
        zone_network_type: ZoneNetworkType::Advanced,
    };
    let rule = PortForwardingRuleTo {
        id: uuid::Uuid::nil(),
        src_ip: Ipv4Addr::new(10, 0, 0, 5),
        protocol: "tcp".into(),
        src_port_range: [22, 22],
        dst_ip: Ipv4Addr::new(192, 168, 1, 10),
        dst_port_range: [22, 22],
        source_cidrs: vec![],
        revoked: false,
    };
    CommandBatch::new(
        vec![RouterCommand::new(
            routing,
            CommandBody::SetPortForwardingRules(SetPortForwardingRulesCommand {
                rules: vec![rule],
            }),
        )],
        OnError::Stop,
    )
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_batch_success() {
    let (server, transport) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/commands"))
        .and(body_partial_json(json!({
            "on_error": "stop",
            "commands": [{ "type": "set_port_forwarding_rules" }]
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "answers": [{ "success": true }] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let batch = pf_batch();
    let answers = transport.send(&router(), &batch).await.unwrap();
    assert_eq!(answers.len(), 1);
    ensure_success(&router(), &batch, &answers).unwrap();
}

#[tokio::test]
async fn test_command_rejection_is_reported_per_command() {
    let (server, transport) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "answers": [{ "success": false, "details": "iptables: No chain/target/match" }]
        })))
        .mount(&server)
        .await;

    let batch = pf_batch();
    let answers = transport.send(&router(), &batch).await.unwrap();
    let err = ensure_success(&router(), &batch, &answers).unwrap_err();
    assert!(
        matches!(err, Error::CommandFailed { ref details, .. } if details.contains("iptables")),
        "expected CommandFailed, got: {err:?}"
    );
}

#[tokio::test]
async fn test_http_error_status() {
    let (server, transport) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/commands"))
        .respond_with(ResponseTemplate::new(503).set_body_string("agent busy"))
        .mount(&server)
        .await;

    let result = transport.send(&router(), &pf_batch()).await;
    assert!(
        matches!(result, Err(Error::Status { status: 503, .. })),
        "expected Status error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_malformed_reply() {
    let (server, transport) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let result = transport.send(&router(), &pf_batch()).await;
    assert!(matches!(result, Err(Error::Deserialization { .. })));
}

#[tokio::test]
async fn test_bearer_token_is_sent() {
    let server = MockServer::start().await;
    let config = netrules_api::TransportConfig {
        token: Some(secrecy::SecretString::from("s3cret".to_string())),
        ..Default::default()
    };
    let transport = HttpTransport::with_base_url(
        config.build_client().unwrap(),
        Url::parse(&server.uri()).unwrap(),
    );

    Mock::given(method("POST"))
        .and(path("/v1/commands"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "answers": [{ "success": true }] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    transport.send(&router(), &pf_batch()).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_router() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let transport = HttpTransport::with_base_url(
        reqwest::Client::new(),
        Url::parse(&format!("http://127.0.0.1:{port}")).unwrap(),
    );
    let err = transport.send(&router(), &pf_batch()).await.unwrap_err();
    assert!(err.is_unreachable(), "expected unreachable, got: {err:?}");
}
