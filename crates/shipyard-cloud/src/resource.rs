//! Provider-neutral resource records and creation options

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub ip_range: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Firewall {
    pub id: String,
    pub name: String,
}

/// Server lifecycle, with vendor-specific intermediate states collapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Pending,
    Running,
    Stopped,
    Terminated,
}

impl ServerStatus {
    /// Map a vendor status string (Hetzner `status`, Scaleway `state`, EC2 state name)
    pub fn from_vendor(status: &str) -> Self {
        match status {
            "running" => ServerStatus::Running,
            "off" | "stopped" | "stopping" | "stopped in place" => ServerStatus::Stopped,
            "deleting" | "terminated" | "shutting-down" | "locked" => ServerStatus::Terminated,
            _ => ServerStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub status: ServerStatus,
    pub public_ipv4: Option<String>,
    pub private_ipv4: Option<String>,
}

impl Server {
    /// Running with a routable address; what `wait_for_server` waits for
    pub fn is_ready(&self) -> bool {
        self.status == ServerStatus::Running
            && self.public_ipv4.as_deref().is_some_and(|ip| !ip.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub size_gb: u32,
    pub location: Option<String>,
    pub status: String,
    pub server_id: Option<String>,
    pub device_path: Option<String>,
}

impl Volume {
    pub fn is_attached(&self) -> bool {
        self.server_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    pub fn is_attached_to(&self, server_id: &str) -> bool {
        self.server_id.as_deref() == Some(server_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCreateOptions {
    pub name: String,
    pub server_type: String,
    pub image: String,
    pub location: String,
    pub user_data: Option<String>,
    pub network_id: Option<String>,
    pub firewall_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeCreateOptions {
    pub name: String,
    pub size_gb: u32,
    /// Server whose location the volume is placed in
    pub server_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_collapse() {
        assert_eq!(ServerStatus::from_vendor("running"), ServerStatus::Running);
        assert_eq!(ServerStatus::from_vendor("initializing"), ServerStatus::Pending);
        assert_eq!(ServerStatus::from_vendor("starting"), ServerStatus::Pending);
        assert_eq!(ServerStatus::from_vendor("pending"), ServerStatus::Pending);
        assert_eq!(ServerStatus::from_vendor("off"), ServerStatus::Stopped);
        assert_eq!(ServerStatus::from_vendor("terminated"), ServerStatus::Terminated);
    }

    #[test]
    fn test_ready_requires_public_ip() {
        let mut server = Server {
            id: "1".into(),
            name: "app-master-1".into(),
            status: ServerStatus::Running,
            public_ipv4: None,
            private_ipv4: None,
        };
        assert!(!server.is_ready());
        server.public_ipv4 = Some("203.0.113.7".into());
        assert!(server.is_ready());
    }

    #[test]
    fn test_volume_attachment() {
        let volume = Volume {
            id: "v1".into(),
            name: "app-master-data".into(),
            size_gb: 10,
            location: None,
            status: "available".into(),
            server_id: Some("42".into()),
            device_path: None,
        };
        assert!(volume.is_attached());
        assert!(volume.is_attached_to("42"));
        assert!(!volume.is_attached_to("43"));
    }
}
