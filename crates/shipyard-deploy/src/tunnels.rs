//! Tunnel requests for publicly reachable apps

use shipyard_cloud::TunnelRequest;
use shipyard_core::DeployConfig;

/// Tunnels hand requests to ingress-nginx, which routes by Host header
pub const INGRESS_ORIGIN: &str = "http://ingress-nginx-controller.ingress-nginx.svc.cluster.local:80";

/// One request per app with both a domain and a port
pub fn plan_tunnels(config: &DeployConfig) -> Vec<TunnelRequest> {
    let namer = config.namer();
    config
        .tunneled_apps()
        .filter_map(|(service, app)| {
            let domain = app.domain()?;
            Some(TunnelRequest {
                service_name: service.clone(),
                tunnel_name: namer.tunnel_name(service),
                hostname: app.hostname()?,
                domain: domain.to_string(),
                origin_url: INGRESS_ORIGIN.to_string(),
            })
        })
        .collect()
}
