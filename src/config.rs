//! Multi-zone configuration loading: a YAML zones file and an
//! environment-variable prefix scheme, both producing [`ZoneConfig`]s.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::Error;
use crate::multizone::ZoneConfig;

/// Prefix for multi-zone environment variables:
/// `EXTERNAL_DNS_RFC2136_ZONE_<NAME>_<FIELD>`.
pub const ZONE_ENV_PREFIX: &str = "EXTERNAL_DNS_RFC2136_ZONE_";

/// Top-level structure of the YAML zones file.
#[derive(Debug, Deserialize)]
struct ZonesFile {
    #[serde(default)]
    zones: Vec<ZoneFileEntry>,
}

/// One zone entry in the YAML file. Unrecognised keys are ignored.
#[derive(Debug, Default, Deserialize)]
struct ZoneFileEntry {
    #[serde(default)]
    host: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    zone: String,
    #[serde(default, rename = "tsig-key")]
    tsig_key: String,
    #[serde(default, rename = "tsig-secret")]
    tsig_secret: String,
    #[serde(default, rename = "tsig-secret-file")]
    tsig_secret_file: String,
    #[serde(default, rename = "tsig-alg")]
    tsig_alg: String,
    #[serde(default, rename = "min-ttl")]
    min_ttl: u32,
    /// Duration string, e.g. "10s"; empty uses the provider default.
    #[serde(default)]
    timeout: String,
}

/// Load zone configs from a YAML file, resolving secret files and
/// validating required fields.
pub fn load_zones_file(path: &Path) -> Result<Vec<ZoneConfig>, Error> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("reading config file {}: {e}", path.display())))?;

    let raw: ZonesFile = serde_yaml::from_str(&data)
        .map_err(|e| Error::config(format!("parsing config file {}: {e}", path.display())))?;

    let mut configs = Vec::with_capacity(raw.zones.len());
    for (i, entry) in raw.zones.into_iter().enumerate() {
        if entry.host.is_empty() {
            return Err(Error::config(format!("zone[{i}]: host is required")));
        }
        if entry.zone.is_empty() {
            return Err(Error::config(format!("zone[{i}]: zone is required")));
        }
        if !entry.tsig_secret.is_empty() && !entry.tsig_secret_file.is_empty() {
            return Err(Error::config(format!(
                "zone[{i}]: tsig-secret and tsig-secret-file are mutually exclusive"
            )));
        }

        let tsig_secret = if entry.tsig_secret_file.is_empty() {
            entry.tsig_secret
        } else {
            read_secret_file(&entry.tsig_secret_file)
                .map_err(|e| Error::config(format!("zone[{i}]: reading tsig-secret-file: {e}")))?
        };

        let timeout = if entry.timeout.is_empty() {
            Duration::ZERO
        } else {
            humantime::parse_duration(&entry.timeout).map_err(|e| {
                Error::config(format!("zone[{i}]: invalid timeout {:?}: {e}", entry.timeout))
            })?
        };

        configs.push(ZoneConfig {
            host: entry.host,
            port: entry.port,
            zone: entry.zone,
            tsig_key: entry.tsig_key,
            tsig_secret,
            tsig_alg: entry.tsig_alg,
            min_ttl: entry.min_ttl,
            timeout,
        });
    }

    debug!(zones = configs.len(), path = %path.display(), "loaded zone config file");
    Ok(configs)
}

/// Load zone configs from `EXTERNAL_DNS_RFC2136_ZONE_<NAME>_<FIELD>`
/// variables in the process environment. Returns `None` when no matching
/// variables exist.
pub fn load_zones_from_env() -> Result<Option<Vec<ZoneConfig>>, Error> {
    zones_from_vars(std::env::vars())
}

/// Field suffixes recognised after the zone name. Longer suffixes appear
/// before shorter ones that are prefixes of them (TSIG_SECRET_FILE before
/// TSIG_SECRET) so matching stays unambiguous.
const ZONE_ENV_FIELDS: &[&str] = &[
    "TSIG_SECRET_FILE",
    "TSIG_SECRET",
    "TSIG_KEY",
    "TSIG_ALG",
    "MIN_TTL",
    "TIMEOUT",
    "HOST",
    "PORT",
    "ZONE",
];

/// The environment-prefix scanner over an injected variable iterator,
/// grouping by zone name (sorted alphabetically for deterministic
/// construction). Unknown field suffixes are silently ignored.
pub fn zones_from_vars(
    vars: impl Iterator<Item = (String, String)>,
) -> Result<Option<Vec<ZoneConfig>>, Error> {
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct PartialZone {
        host: String,
        port: u16,
        zone: String,
        tsig_key: String,
        tsig_secret: String,
        tsig_secret_file: String,
        tsig_alg: String,
        min_ttl: u32,
        timeout: Duration,
    }

    let mut partials: BTreeMap<String, PartialZone> = BTreeMap::new();

    for (key, value) in vars {
        let Some(rest) = key.strip_prefix(ZONE_ENV_PREFIX) else {
            continue;
        };

        for field in ZONE_ENV_FIELDS {
            let suffix = format!("_{field}");
            let Some(name) = rest.strip_suffix(&suffix) else {
                continue;
            };
            if name.is_empty() {
                break;
            }
            let zone = partials.entry(name.to_string()).or_default();
            match *field {
                "HOST" => zone.host = value.clone(),
                "ZONE" => zone.zone = value.clone(),
                "TSIG_KEY" => zone.tsig_key = value.clone(),
                "TSIG_SECRET" => zone.tsig_secret = value.clone(),
                "TSIG_SECRET_FILE" => zone.tsig_secret_file = value.clone(),
                "TSIG_ALG" => zone.tsig_alg = value.clone(),
                "PORT" => {
                    zone.port = value
                        .parse()
                        .map_err(|e| Error::config(format!("env {key}: invalid PORT {value:?}: {e}")))?;
                }
                "MIN_TTL" => {
                    zone.min_ttl = value.parse().map_err(|e| {
                        Error::config(format!("env {key}: invalid MIN_TTL {value:?}: {e}"))
                    })?;
                }
                "TIMEOUT" => {
                    zone.timeout = humantime::parse_duration(&value).map_err(|e| {
                        Error::config(format!("env {key}: invalid TIMEOUT {value:?}: {e}"))
                    })?;
                }
                _ => unreachable!("field list and match arms are kept in sync"),
            }
            break;
        }
    }

    if partials.is_empty() {
        return Ok(None);
    }

    let mut configs = Vec::with_capacity(partials.len());
    for (name, zone) in partials {
        if zone.host.is_empty() {
            return Err(Error::config(format!("zone {name}: HOST is required")));
        }
        if zone.zone.is_empty() {
            return Err(Error::config(format!("zone {name}: ZONE is required")));
        }
        if !zone.tsig_secret.is_empty() && !zone.tsig_secret_file.is_empty() {
            return Err(Error::config(format!(
                "zone {name}: TSIG_SECRET and TSIG_SECRET_FILE are mutually exclusive"
            )));
        }

        let tsig_secret = if zone.tsig_secret_file.is_empty() {
            zone.tsig_secret
        } else {
            read_secret_file(&zone.tsig_secret_file)
                .map_err(|e| Error::config(format!("zone {name}: reading TSIG_SECRET_FILE: {e}")))?
        };

        configs.push(ZoneConfig {
            host: zone.host,
            port: zone.port,
            zone: zone.zone,
            tsig_key: zone.tsig_key,
            tsig_secret,
            tsig_alg: zone.tsig_alg,
            min_ttl: zone.min_ttl,
            timeout: zone.timeout,
        });
    }

    Ok(Some(configs))
}

/// Read a TSIG secret file, trimming surrounding whitespace.
pub fn read_secret_file(path: impl AsRef<Path>) -> Result<String, std::io::Error> {
    Ok(std::fs::read_to_string(path)?.trim().to_string())
}
