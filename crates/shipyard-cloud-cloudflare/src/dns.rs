//! Zone lookup and DNS record management

use crate::client::CloudflareClient;
use crate::model::{DnsRecord, DnsRecordBody, Zone};
use shipyard_cloud::Result;
use tracing::{debug, info};

impl CloudflareClient {
    pub async fn find_zone(&self, domain: &str) -> Result<Option<Zone>> {
        let zones: Vec<Zone> = self.get("/zones", &[("name", domain)]).await?;
        Ok(zones.into_iter().find(|z| z.name == domain))
    }

    pub async fn find_dns_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: &str,
    ) -> Result<Option<DnsRecord>> {
        let records: Vec<DnsRecord> = self
            .get(
                &format!("/zones/{}/dns_records", zone_id),
                &[("name", name), ("type", record_type)],
            )
            .await?;
        Ok(records
            .into_iter()
            .find(|r| r.name == name && r.record_type == record_type))
    }

    /// Create the record, or rewrite the existing one in place
    pub async fn upsert_dns_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: &str,
        content: &str,
        proxied: bool,
    ) -> Result<DnsRecord> {
        let body = DnsRecordBody {
            record_type,
            name,
            content,
            proxied,
            ttl: 1,
        };

        match self.find_dns_record(zone_id, name, record_type).await? {
            Some(existing) if existing.content == content && existing.proxied == proxied => {
                debug!(record = %name, "DNS record already up to date");
                Ok(existing)
            }
            Some(existing) => {
                info!(record = %name, from = %existing.content, to = %content, "Updating DNS record");
                self.patch(
                    &format!("/zones/{}/dns_records/{}", zone_id, existing.id),
                    &body,
                )
                .await
            }
            None => {
                info!(record = %name, content = %content, "Creating DNS record");
                self.post(&format!("/zones/{}/dns_records", zone_id), &body)
                    .await
            }
        }
    }

    pub async fn delete_dns_record(&self, zone_id: &str, record_id: &str) -> Result<()> {
        self.delete(&format!("/zones/{}/dns_records/{}", zone_id, record_id))
            .await
    }
}
