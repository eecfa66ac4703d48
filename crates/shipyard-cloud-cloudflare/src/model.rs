//! Cloudflare API payloads

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Tunnel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateTunnel<'a> {
    pub name: &'a str,
    pub tunnel_secret: String,
    pub config_src: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigurationBody {
    pub config: TunnelConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub config: Option<TunnelConfig>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TunnelConfig {
    #[serde(default)]
    pub ingress: Vec<IngressRule>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_request: Option<OriginRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginRequest {
    #[serde(default)]
    pub http_host_header: Option<String>,
}

impl TunnelConfig {
    /// One hostname routed to `service`, everything else answered with 404
    pub fn single_route(hostname: &str, service: &str) -> Self {
        Self {
            ingress: vec![
                IngressRule {
                    hostname: Some(hostname.to_string()),
                    service: service.to_string(),
                    origin_request: Some(OriginRequest {
                        http_host_header: Some(hostname.to_string()),
                    }),
                },
                IngressRule {
                    hostname: None,
                    service: "http_status:404".to_string(),
                    origin_request: None,
                },
            ],
        }
    }

    pub fn routes(&self, hostname: &str, service: &str) -> bool {
        self.ingress
            .iter()
            .any(|r| r.hostname.as_deref() == Some(hostname) && r.service == service)
    }
}

#[derive(Debug, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub proxied: bool,
}

#[derive(Debug, Serialize)]
pub struct DnsRecordBody<'a> {
    #[serde(rename = "type")]
    pub record_type: &'a str,
    pub name: &'a str,
    pub content: &'a str,
    pub proxied: bool,
    /// 1 = automatic
    pub ttl: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_route_serializes_catch_all() {
        let config = TunnelConfig::single_route("www.example.com", "http://ingress:80");
        let json = serde_json::to_value(ConfigurationBody { config }).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "config": {
                    "ingress": [
                        {
                            "hostname": "www.example.com",
                            "service": "http://ingress:80",
                            "originRequest": { "httpHostHeader": "www.example.com" }
                        },
                        { "service": "http_status:404" }
                    ]
                }
            })
        );
    }

    #[test]
    fn test_routes_matches_hostname_and_service() {
        let config = TunnelConfig::single_route("www.example.com", "http://ingress:80");
        assert!(config.routes("www.example.com", "http://ingress:80"));
        assert!(!config.routes("www.example.com", "http://other:80"));
        assert!(!config.routes("api.example.com", "http://ingress:80"));
    }
}
