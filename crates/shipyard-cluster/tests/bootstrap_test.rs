//! Bootstrap protocol against a scripted host

use shipyard_cluster::{Bootstrapper, ClusterError, ClusterToken, MasterNode};
use shipyard_core::Manifests;
use shipyard_remote::memory::{Reply, ScriptedExecutor};
use tokio_util::sync::CancellationToken;

const TOKEN: &str = "K10f00d::server:5ecret5ecret";

fn fresh_master() -> ScriptedExecutor {
    let exec = ScriptedExecutor::new("203.0.113.10");
    exec.on("boot-finished", "ready");
    exec.fail_on("systemctl is-active k3s");
    exec.fail_on("systemctl is-active docker");
    exec.on("print $2", "10.0.1.5");
    exec.on("print $NF", "enp7s0");
    exec.on(
        "kubectl get nodes --no-headers",
        "myapp-master-1   Ready   control-plane,master   1m   v1.29.3+k3s1",
    );
    exec.on("items[0].metadata.name", "myapp-master-1");
    exec.on("{.status.readyReplicas}", "1");
    exec.on("{.spec.replicas}", "1");
    exec.on("node-token", TOKEN);
    exec
}

#[tokio::test(start_paused = true)]
async fn master_install_runs_in_order() {
    let manifests = Manifests::new().unwrap();
    let exec = fresh_master();
    let bootstrapper = Bootstrapper::new(&manifests, "deploy", CancellationToken::new());

    let master = bootstrapper
        .bootstrap_master(&exec, "myapp-master-1", "master")
        .await
        .unwrap();

    assert_eq!(master.private_ip, "10.0.1.5");
    assert_eq!(master.token.expose(), TOKEN);

    let docker = exec.position("apt-get install -y -qq docker.io").unwrap();
    let registries = exec.position("/etc/rancher/k3s/registries.yaml").unwrap();
    let install = exec.position("get.k3s.io").unwrap();
    let label = exec
        .position("kubectl label node myapp-master-1 shipyard.io/server-name=master")
        .unwrap();
    let registry = exec.position("name: shipyard-registry").unwrap();
    let ingress = exec.position("controller-v1.10.0").unwrap();
    assert!(docker < registries && registries < install);
    assert!(install < label && label < registry && registry < ingress);

    assert!(exec.ran("--flannel-iface=enp7s0"));
    assert!(exec.ran("s/127.0.0.1/10.0.1.5/g"));
    assert!(exec.ran("custom-http-errors"));
    assert!(exec.ran("--default-backend-service=ingress-nginx/shipyard-error-backend"));
    assert!(exec.ran("rollout status deployment/ingress-nginx-controller"));
}

#[tokio::test(start_paused = true)]
async fn running_master_skips_install() {
    let manifests = Manifests::new().unwrap();
    let exec = fresh_master();
    exec.on("systemctl is-active k3s", "active");

    let master = Bootstrapper::new(&manifests, "deploy", CancellationToken::new())
        .bootstrap_master(&exec, "myapp-master-1", "master")
        .await
        .unwrap();

    assert_eq!(master.token.expose(), TOKEN);
    assert!(!exec.ran("get.k3s.io"));
    assert!(!exec.ran("docker.io"));
}

#[tokio::test(start_paused = true)]
async fn error_backend_patch_is_not_repeated() {
    let manifests = Manifests::new().unwrap();
    let exec = fresh_master();
    exec.on(
        "containers[0].args",
        "[\"/nginx-ingress-controller\",\"--default-backend-service=ingress-nginx/shipyard-error-backend\"]",
    );

    Bootstrapper::new(&manifests, "deploy", CancellationToken::new())
        .bootstrap_master(&exec, "myapp-master-1", "master")
        .await
        .unwrap();

    assert!(!exec.ran("--type=json"));
}

#[tokio::test(start_paused = true)]
async fn empty_token_is_fatal() {
    let manifests = Manifests::new().unwrap();
    let exec = fresh_master();
    exec.on("systemctl is-active k3s", "active");
    exec.on("node-token", "\n");

    let err = Bootstrapper::new(&manifests, "deploy", CancellationToken::new())
        .bootstrap_master(&exec, "myapp-master-1", "master")
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::EmptyToken));
}

#[tokio::test(start_paused = true)]
async fn cloud_init_timeout() {
    let manifests = Manifests::new().unwrap();
    let exec = ScriptedExecutor::new("203.0.113.10");
    exec.on_sequence("boot-finished", vec![Reply::Unreachable]);

    let err = Bootstrapper::new(&manifests, "deploy", CancellationToken::new())
        .wait_for_cloud_init(&exec)
        .await
        .unwrap_err();

    match err {
        ClusterError::CloudInitTimeout { host, attempts } => {
            assert_eq!(host, "203.0.113.10");
            assert_eq!(attempts, 60);
        }
        other => panic!("expected cloud-init timeout, got {other:?}"),
    }
    assert_eq!(exec.count("boot-finished"), 60);
}

#[tokio::test(start_paused = true)]
async fn node_never_ready() {
    let manifests = Manifests::new().unwrap();
    let exec = fresh_master();
    exec.on(
        "kubectl get nodes --no-headers",
        "myapp-master-1   NotReady   control-plane,master   1m   v1.29.3+k3s1",
    );

    let err = Bootstrapper::new(&manifests, "deploy", CancellationToken::new())
        .bootstrap_master(&exec, "myapp-master-1", "master")
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::NotReady { ref component, .. } if component == "k3s node"));
}

#[tokio::test(start_paused = true)]
async fn missing_private_ip() {
    let manifests = Manifests::new().unwrap();
    let exec = fresh_master();
    exec.on("print $2", "");

    let err = Bootstrapper::new(&manifests, "deploy", CancellationToken::new())
        .bootstrap_master(&exec, "myapp-master-1", "master")
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::MissingPrivateIp { .. }));
}

#[tokio::test(start_paused = true)]
async fn worker_joins_with_master_token() {
    let manifests = Manifests::new().unwrap();
    let worker = ScriptedExecutor::new("203.0.113.11");
    worker.on("boot-finished", "ready");
    worker.fail_on("systemctl is-active k3s-agent");
    worker.on("print $2", "10.0.1.6");
    worker.on("print $NF", "enp7s0");

    let master = MasterNode {
        name: "myapp-master-1".into(),
        private_ip: "10.0.1.5".into(),
        token: ClusterToken::new(TOKEN).unwrap(),
    };

    Bootstrapper::new(&manifests, "deploy", CancellationToken::new())
        .bootstrap_worker(&worker, "myapp-workers-1", &master)
        .await
        .unwrap();

    assert!(worker.ran("K3S_URL='https://10.0.1.5:6443'"));
    assert!(worker.ran(&format!("K3S_TOKEN='{}'", TOKEN)));
    assert!(worker.ran("--node-name=myapp-workers-1"));
}

#[tokio::test(start_paused = true)]
async fn worker_join_is_labeled_from_master() {
    let manifests = Manifests::new().unwrap();
    let master = ScriptedExecutor::new("203.0.113.10");
    master.on_sequence(
        "kubectl get nodes -o name",
        vec![
            Reply::ok("node/myapp-master-1"),
            Reply::ok("node/myapp-master-1\nnode/myapp-workers-1"),
        ],
    );

    let joined = Bootstrapper::new(&manifests, "deploy", CancellationToken::new())
        .await_worker_join(&master, "myapp-workers-1", "workers")
        .await
        .unwrap();

    assert!(joined);
    assert!(master.ran("kubectl label node myapp-workers-1 shipyard.io/server-name=workers"));
}

#[tokio::test(start_paused = true)]
async fn worker_that_never_joins_is_skipped() {
    let manifests = Manifests::new().unwrap();
    let master = ScriptedExecutor::new("203.0.113.10");
    master.on("kubectl get nodes -o name", "node/myapp-master-1");

    let joined = Bootstrapper::new(&manifests, "deploy", CancellationToken::new())
        .await_worker_join(&master, "myapp-workers-1", "workers")
        .await
        .unwrap();

    assert!(!joined);
    assert!(!master.ran("kubectl label node"));
}

#[tokio::test]
async fn cancellation_stops_polling() {
    let manifests = Manifests::new().unwrap();
    let exec = ScriptedExecutor::new("203.0.113.10");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = Bootstrapper::new(&manifests, "deploy", cancel)
        .wait_for_cloud_init(&exec)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(exec.commands().is_empty());
}
