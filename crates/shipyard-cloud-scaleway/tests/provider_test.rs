//! ScalewayProvider against a mocked API

use serde_json::json;
use shipyard_cloud::{CloudError, CloudProvider, RetryConfig, ServerCreateOptions};
use shipyard_cloud_scaleway::{ScalewayClient, ScalewayProvider};
use shipyard_remote::memory::ScriptedExecutor;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INSTANCE: &str = "/instance/v1/zones/fr-par-1";

fn provider(server: &MockServer) -> ScalewayProvider {
    ScalewayProvider::with_client(
        ScalewayClient::with_base_url("scw-secret", server.uri()).with_retry(RetryConfig::none()),
        "project-1",
        "fr-par-1",
    )
}

fn server_json(state: &str) -> serde_json::Value {
    json!({
        "id": "srv-1",
        "name": "myapp-master-1",
        "state": state,
        "public_ip": { "address": "51.15.0.10" },
        "volumes": { "0": { "id": "root-vol", "volume_type": "l_ssd" } }
    })
}

#[tokio::test]
async fn security_group_gets_ssh_rule() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{INSTANCE}/security_groups")))
        .and(header("x-auth-token", "scw-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "security_groups": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{INSTANCE}/security_groups")))
        .and(body_partial_json(json!({
            "name": "myapp-firewall",
            "stateful": true,
            "inbound_default_policy": "drop",
            "outbound_default_policy": "accept"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "security_group": { "id": "sg-1", "name": "myapp-firewall" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{INSTANCE}/security_groups/sg-1/rules")))
        .and(body_partial_json(json!({
            "protocol": "TCP",
            "direction": "inbound",
            "dest_port_from": 22,
            "dest_port_to": 22
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "rule": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let firewall = provider(&server)
        .find_or_create_firewall("myapp-firewall")
        .await
        .unwrap();
    assert_eq!(firewall.id, "sg-1");
}

#[tokio::test]
async fn create_server_sets_user_data_powers_on_and_joins_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{INSTANCE}/servers")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "servers": [] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{INSTANCE}/products/servers")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "servers": { "DEV1-S": {} }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{INSTANCE}/images")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "images": [{ "id": "img-noble" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{INSTANCE}/servers")))
        .and(body_partial_json(json!({
            "name": "myapp-master-1",
            "commercial_type": "DEV1-S",
            "image": "img-noble",
            "boot_type": "local",
            "security_group": "sg-1"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "server": server_json("stopped")
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("{INSTANCE}/servers/srv-1/user_data/cloud-init")))
        .and(header("content-type", "text/plain"))
        .and(body_string("#cloud-config\n"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{INSTANCE}/servers/srv-1/action")))
        .and(body_partial_json(json!({ "action": "poweron" })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "task": {} })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{INSTANCE}/servers/srv-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "server": server_json("running")
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{INSTANCE}/servers/srv-1/private_nics")))
        .and(body_partial_json(json!({ "private_network_id": "pn-1" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "private_nic": { "id": "nic-1", "private_network_id": "pn-1" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let created = provider(&server)
        .create_server(&ServerCreateOptions {
            name: "myapp-master-1".into(),
            server_type: "DEV1-S".into(),
            image: "ubuntu-24.04".into(),
            location: "fr-par-1".into(),
            user_data: Some("#cloud-config\n".into()),
            network_id: Some("pn-1".into()),
            firewall_id: Some("sg-1".into()),
        })
        .await
        .unwrap();

    assert_eq!(created.id, "srv-1");
    assert!(created.is_ready());
}

#[tokio::test]
async fn attach_volume_patches_next_slot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{INSTANCE}/servers/srv-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "server": server_json("running")
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/block/v1alpha1/zones/fr-par-1/volumes/vol-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "vol-9",
            "name": "myapp-master-data",
            "size": 10_000_000_000u64,
            "status": "available",
            "references": []
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("{INSTANCE}/servers/srv-1")))
        .and(body_partial_json(json!({
            "volumes": {
                "0": { "id": "root-vol" },
                "1": { "id": "vol-9", "volume_type": "sbs_volume" }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "server": server_json("running")
        })))
        .expect(1)
        .mount(&server)
        .await;

    provider(&server)
        .attach_volume("vol-9", "srv-1")
        .await
        .unwrap();
}

#[tokio::test]
async fn device_path_is_found_over_ssh() {
    let server = MockServer::start().await;
    let executor = ScriptedExecutor::new("51.15.0.10");
    executor.on(
        "ls /dev/disk/by-id/",
        "scsi-0SCW_sbs_volume-vol-9\n",
    );

    let path = provider(&server)
        .wait_for_device_path("vol-9", &executor, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        path.as_deref(),
        Some("/dev/disk/by-id/scsi-0SCW_sbs_volume-vol-9")
    );
    assert!(executor.ran("grep -i 'vol-9'"));
}

#[tokio::test]
async fn forbidden_maps_to_authentication() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{INSTANCE}/servers")))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "message": "permission denied",
            "type": "permissions_denied"
        })))
        .mount(&server)
        .await;

    let err = provider(&server).list_servers().await.unwrap_err();
    assert!(matches!(err, CloudError::Authentication(_)));
}

#[tokio::test]
async fn zone_validation_is_local() {
    let server = MockServer::start().await;
    let provider = provider(&server);
    provider.validate_region("nl-ams-2").await.unwrap();
    let err = provider.validate_region("us-east-1").await.unwrap_err();
    assert!(err.to_string().contains("invalid scaleway zone"));
}
