//! Shell scripts run on cluster nodes

use shipyard_core::naming::REGISTRY_NODE_PORT;
use shipyard_remote::shell::quote;

pub const INSTALL_URL: &str = "https://get.k3s.io";
pub const INGRESS_NGINX_MANIFEST: &str = "https://raw.githubusercontent.com/kubernetes/ingress-nginx/controller-v1.10.0/deploy/static/provider/baremetal/deploy.yaml";
pub const CLUSTER_CIDR: &str = "10.42.0.0/16";
pub const SERVICE_CIDR: &str = "10.43.0.0/16";
pub const TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/node-token";

pub const CLOUD_INIT_DONE: &str = "test -f /var/lib/cloud/instance/boot-finished && echo ready";
pub const SERVER_ACTIVE: &str = "systemctl is-active k3s";
pub const AGENT_ACTIVE: &str = "systemctl is-active k3s-agent";
pub const DOCKER_ACTIVE: &str = "systemctl is-active docker";
pub const NODES: &str = "kubectl get nodes --no-headers";

/// First address in 10.0.0.0/8, which every provider's private network uses
pub const PRIVATE_IP: &str =
    "ip -4 addr show | grep 'inet 10\\.' | awk '{print $2}' | cut -d/ -f1 | head -1";
pub const PRIVATE_INTERFACE: &str =
    "ip -4 addr show | grep 'inet 10\\.' | awk '{print $NF}' | head -1";

pub fn read_token() -> String {
    format!("sudo cat {}", TOKEN_PATH)
}

pub fn install_docker(user: &str) -> String {
    format!(
        "sudo apt-get update -qq && sudo apt-get install -y -qq docker.io && \
         sudo systemctl enable --now docker && sudo usermod -aG docker {}",
        user
    )
}

/// Let the node's docker push to the in-cluster registry over plain HTTP
pub fn docker_insecure_registry(private_ip: &str) -> String {
    format!(
        "sudo mkdir -p /etc/docker && \
         echo '{{\"insecure-registries\": [\"localhost:{port}\", \"{ip}:{port}\"]}}' | sudo tee /etc/docker/daemon.json > /dev/null && \
         sudo systemctl restart docker",
        port = REGISTRY_NODE_PORT,
        ip = private_ip
    )
}

/// containerd mirror so pods can pull `localhost:30500/...` images
pub fn registries_yaml() -> String {
    let config = format!(
        "mirrors:\n  \"localhost:{port}\":\n    endpoint:\n      - \"http://localhost:{port}\"\n\
         configs:\n  \"localhost:{port}\":\n    tls:\n      insecure_skip_verify: true\n",
        port = REGISTRY_NODE_PORT
    );
    format!(
        "sudo mkdir -p /etc/rancher/k3s && cat <<'EOF' | sudo tee /etc/rancher/k3s/registries.yaml > /dev/null\n{}EOF",
        config
    )
}

pub fn install_server(private_ip: &str, interface: &str) -> String {
    format!(
        "curl -sfL {url} | sudo sh -s - server \
         --bind-address={ip} \
         --advertise-address={ip} \
         --node-ip={ip} \
         --tls-san={ip} \
         --flannel-iface={iface} \
         --flannel-backend=wireguard-native \
         --disable=traefik \
         --write-kubeconfig-mode=644 \
         --cluster-cidr={cluster} \
         --service-cidr={service}",
        url = INSTALL_URL,
        ip = private_ip,
        iface = interface,
        cluster = CLUSTER_CIDR,
        service = SERVICE_CIDR,
    )
}

pub fn install_agent(
    master_ip: &str,
    token: &str,
    node_ip: &str,
    interface: &str,
    node_name: &str,
) -> String {
    format!(
        "curl -sfL {url} | sudo K3S_URL={server} K3S_TOKEN={token} sh -s - agent \
         --node-ip={ip} \
         --flannel-iface={iface} \
         --node-name={name}",
        url = INSTALL_URL,
        server = quote(&format!("https://{}:6443", master_ip)),
        token = quote(token),
        ip = node_ip,
        iface = interface,
        name = node_name,
    )
}

/// Copy the admin kubeconfig for `user`, pointing at the private address
pub fn kubeconfig(user: &str, private_ip: &str) -> String {
    format!(
        "mkdir -p ~/.kube && sudo cp /etc/rancher/k3s/k3s.yaml ~/.kube/config && \
         sudo sed -i 's/127.0.0.1/{ip}/g' ~/.kube/config && \
         sudo chown {user}:{user} ~/.kube/config && chmod 600 ~/.kube/config",
        ip = private_ip,
        user = user
    )
}

/// True when some node reports STATUS `Ready` (not `NotReady`)
pub fn any_node_ready(output: &str) -> bool {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|status| status.split(',').any(|s| s == "Ready"))
}
