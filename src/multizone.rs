//! Multi-zone router: presents the [`Provider`] contract across several
//! RFC2136 servers, routing writes by longest-suffix match on the record
//! name and fanning reads out in parallel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::plan::Changes;
use crate::provider::Provider;
use crate::rfc2136::{Rfc2136Config, Rfc2136Provider};

/// Per-zone provider configuration. Secret files must already be resolved
/// to `tsig_secret` by the configuration loader.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneConfig {
    /// DNS server host.
    pub host: String,
    /// DNS server port; 0 uses 53.
    pub port: u16,
    /// Zone FQDN (trailing dot optional).
    pub zone: String,
    /// TSIG key name; empty disables signing.
    pub tsig_key: String,
    /// Base64-encoded TSIG secret.
    pub tsig_secret: String,
    /// TSIG algorithm name.
    pub tsig_alg: String,
    /// Minimum TTL for outgoing records; 0 disables.
    pub min_ttl: u32,
    /// Per-operation DNS timeout; zero uses the provider default.
    pub timeout: Duration,
}

/// A zone FQDN paired with the sub-provider that manages it.
struct ZoneEntry {
    /// Normalised zone FQDN, e.g. "example.com.".
    fqdn: String,
    provider: Arc<dyn Provider>,
}

/// A [`Provider`] routing across multiple RFC2136-managed zones.
pub struct MultiZoneProvider {
    zones: Vec<ZoneEntry>,
}

impl MultiZoneProvider {
    /// Build a router with one RFC2136 sub-provider per zone config.
    pub fn new(configs: Vec<ZoneConfig>) -> Result<Self, Error> {
        let mut zones = Vec::with_capacity(configs.len());
        for zc in configs {
            let fqdn = normalise_fqdn(&zc.zone);
            let provider = Rfc2136Provider::new(Rfc2136Config {
                host: zc.host,
                port: zc.port,
                zone: zc.zone,
                tsig_key: zc.tsig_key,
                tsig_secret: zc.tsig_secret,
                tsig_alg: zc.tsig_alg,
                min_ttl: zc.min_ttl,
                timeout: zc.timeout,
            })?;
            zones.push(ZoneEntry {
                fqdn,
                provider: Arc::new(provider),
            });
        }
        Ok(Self { zones })
    }

    /// Build a router from pre-built sub-providers (used by tests).
    pub fn from_parts(parts: Vec<(String, Arc<dyn Provider>)>) -> Self {
        Self {
            zones: parts
                .into_iter()
                .map(|(zone, provider)| ZoneEntry {
                    fqdn: normalise_fqdn(&zone),
                    provider,
                })
                .collect(),
        }
    }

    /// Number of configured zones.
    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Index of the zone whose FQDN is the longest suffix match for
    /// `dns_name`, or `None` when no zone matches.
    fn zone_index(&self, dns_name: &str) -> Option<usize> {
        let name = dns_name.trim_end_matches('.');
        let mut best: Option<usize> = None;
        let mut best_len = 0;
        for (i, entry) in self.zones.iter().enumerate() {
            let zone = entry.fqdn.trim_end_matches('.');
            if (name == zone || name.ends_with(&format!(".{zone}"))) && zone.len() > best_len {
                best_len = zone.len();
                best = Some(i);
            }
        }
        best
    }
}

/// Ensure a zone name carries a trailing dot.
fn normalise_fqdn(zone: &str) -> String {
    let trimmed = zone.trim().trim_end_matches('.');
    format!("{trimmed}.")
}

#[async_trait]
impl Provider for MultiZoneProvider {
    /// Fan out to all sub-providers in parallel and merge the results.
    /// Returns the first error (by zone order), with no partial results.
    async fn records(&self) -> Result<Vec<Endpoint>, Error> {
        let reads = self.zones.iter().map(|z| z.provider.records());
        let results = join_all(reads).await;

        let mut all = Vec::new();
        for result in results {
            all.extend(result?);
        }
        Ok(all)
    }

    /// Split the change set by zone via longest-suffix matching and
    /// dispatch each subset to its sub-provider. Endpoints with no
    /// matching zone are logged and skipped. Zones with no scheduled work
    /// are not contacted; the first sub-provider error aborts.
    async fn apply(&self, changes: &Changes) -> Result<(), Error> {
        let mut buckets: Vec<Changes> = vec![Changes::default(); self.zones.len()];

        for ep in &changes.create {
            match self.zone_index(&ep.dns_name) {
                Some(i) => buckets[i].create.push(ep.clone()),
                None => warn!(dns_name = %ep.dns_name, "no zone match for endpoint, skipping"),
            }
        }
        for ep in &changes.delete {
            match self.zone_index(&ep.dns_name) {
                Some(i) => buckets[i].delete.push(ep.clone()),
                None => warn!(dns_name = %ep.dns_name, "no zone match for endpoint, skipping"),
            }
        }
        for (old, new) in changes.update_old.iter().zip(&changes.update_new) {
            match self.zone_index(&old.dns_name) {
                Some(i) => {
                    buckets[i].update_old.push(old.clone());
                    buckets[i].update_new.push(new.clone());
                }
                None => warn!(dns_name = %old.dns_name, "no zone match for endpoint, skipping"),
            }
        }

        for (entry, bucket) in self.zones.iter().zip(&buckets) {
            if bucket.is_empty() {
                continue;
            }
            entry.provider.apply(bucket).await?;
        }
        Ok(())
    }

    /// Run preflight checks against all zones sequentially, failing fast
    /// with the offending zone named.
    async fn preflight(&self) -> Result<(), Error> {
        for entry in &self.zones {
            entry.provider.preflight().await.map_err(|e| Error::Zone {
                zone: entry.fqdn.clone(),
                source: Box::new(e),
            })?;
        }
        Ok(())
    }
}
