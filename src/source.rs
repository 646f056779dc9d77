//! Sources of desired DNS endpoints.
//!
//! The Docker source derives endpoints from container labels:
//!
//! ```text
//! external-dns.io/hostname    = app.example.com
//! external-dns.io/target      = 192.0.2.10        (required)
//! external-dns.io/ttl         = 120               (optional, default 300)
//! external-dns.io/record-type = A                 (optional, inferred)
//! ```
//!
//! Multiple records per container use indexed labels (`hostname-0`,
//! `target-0`, `hostname-1`, ...).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::endpoint::{infer_record_type, Endpoint, RecordType, DEFAULT_TTL};
use crate::error::Error;

/// Label namespace shared by all record labels.
const LABEL_PREFIX: &str = "external-dns.io/";

/// Callback invoked when the source detects a change. May run on any task.
pub type EventHandler = Arc<dyn Fn() + Send + Sync>;

/// Discovers desired DNS endpoints from an external system.
#[async_trait]
pub trait Source: Send + Sync {
    /// The current set of desired DNS endpoints.
    async fn endpoints(&self) -> Result<Vec<Endpoint>, Error>;

    /// Register a callback invoked when the source detects a change
    /// (e.g. a container start or stop). The handler should trigger a
    /// reconciliation and must be safe to call from the source's tasks.
    fn add_event_handler(&self, handler: EventHandler);
}

/// Parse DNS endpoints from a container's label map.
///
/// `container_id` is used only for log messages.
pub fn endpoints_from_labels(
    container_id: &str,
    labels: &HashMap<String, String>,
) -> Vec<Endpoint> {
    let mut eps = Vec::new();

    let get = |key: &str| labels.get(&format!("{LABEL_PREFIX}{key}")).map(String::as_str);

    // Non-indexed single record.
    if let Some(hostname) = get("hostname") {
        if let Some(ep) = parse_single(
            container_id,
            hostname,
            get("target"),
            get("ttl"),
            get("record-type"),
        ) {
            eps.push(ep);
        }
    }

    // Indexed records: external-dns.io/hostname-0, external-dns.io/target-0, ...
    for i in 0.. {
        let Some(hostname) = get(&format!("hostname-{i}")) else {
            break;
        };
        if let Some(ep) = parse_single(
            container_id,
            hostname,
            get(&format!("target-{i}")),
            get(&format!("ttl-{i}")),
            get(&format!("record-type-{i}")),
        ) {
            eps.push(ep);
        }
    }

    eps
}

/// Build one endpoint from raw label values. Returns `None` and logs a
/// warning when required labels are absent or invalid.
fn parse_single(
    container_id: &str,
    hostname: &str,
    target: Option<&str>,
    raw_ttl: Option<&str>,
    raw_record_type: Option<&str>,
) -> Option<Endpoint> {
    let hostname = hostname.trim();
    if hostname.is_empty() {
        return None;
    }

    let target = target.unwrap_or("").trim();
    if target.is_empty() {
        warn!(
            container = container_id,
            hostname, "container missing target label, skipping"
        );
        return None;
    }

    let mut ttl = DEFAULT_TTL;
    if let Some(raw) = raw_ttl {
        match raw.trim().parse::<u32>() {
            Ok(v) => ttl = v,
            Err(_) => {
                warn!(
                    container = container_id,
                    hostname,
                    ttl = raw,
                    "container has invalid TTL, skipping"
                );
                return None;
            }
        }
    }

    let record_type = match raw_record_type.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => match raw.parse::<RecordType>() {
            Ok(rt) => rt,
            Err(_) => {
                warn!(
                    container = container_id,
                    hostname,
                    record_type = raw,
                    "container has unsupported record type, skipping"
                );
                return None;
            }
        },
        None => infer_record_type(target),
    };

    Some(Endpoint::new(hostname, vec![target.to_string()], record_type, ttl))
}

/// A [`Source`] backed by the Docker daemon.
pub struct DockerSource {
    client: Docker,
    handlers: Mutex<Vec<EventHandler>>,
    reconnect_wait: Duration,
}

impl DockerSource {
    /// Connect to the Docker daemon.
    ///
    /// With no host the connection uses the environment (`DOCKER_HOST`) or
    /// the default local socket. Explicit hosts accept `unix://` socket
    /// paths and `tcp://`/`http://` addresses.
    pub fn new(host: Option<&str>) -> Result<Self, Error> {
        let client = match host {
            None => Docker::connect_with_local_defaults()?,
            Some(h) if h.starts_with("unix://") => Docker::connect_with_socket(
                h.trim_start_matches("unix://"),
                120,
                API_DEFAULT_VERSION,
            )?,
            Some(h) => Docker::connect_with_http(h, 120, API_DEFAULT_VERSION)?,
        };
        Ok(Self {
            client,
            handlers: Mutex::new(Vec::new()),
            reconnect_wait: Duration::from_secs(5),
        })
    }

    /// Subscribe to container lifecycle events and invoke registered
    /// handlers on each one. Reconnects after stream errors. Blocks until
    /// the shutdown token is cancelled.
    pub async fn watch(&self, shutdown: CancellationToken) {
        loop {
            self.run_event_loop(&shutdown).await;
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = sleep(self.reconnect_wait) => {
                    warn!("reconnecting to Docker event stream");
                }
            }
        }
    }

    async fn run_event_loop(&self, shutdown: &CancellationToken) {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        filters.insert(
            "event".to_string(),
            vec![
                "start".to_string(),
                "stop".to_string(),
                "die".to_string(),
                "update".to_string(),
            ],
        );

        let mut events = self.client.events(Some(EventsOptions::<String> {
            filters,
            ..Default::default()
        }));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                event = events.next() => {
                    match event {
                        Some(Ok(msg)) => {
                            debug!(action = ?msg.action, "docker event");
                            self.notify();
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "docker event stream error");
                            return;
                        }
                        None => return,
                    }
                }
            }
        }
    }

    fn notify(&self) {
        for handler in self.handlers.lock().iter() {
            handler();
        }
    }
}

#[async_trait]
impl Source for DockerSource {
    async fn endpoints(&self) -> Result<Vec<Endpoint>, Error> {
        let containers = self
            .client
            .list_containers(Some(ListContainersOptions::<String>::default()))
            .await?;

        let mut eps = Vec::new();
        for container in containers {
            let id = container.id.unwrap_or_default();
            let short_id = if id.len() > 12 { &id[..12] } else { id.as_str() };
            if let Some(labels) = &container.labels {
                eps.extend(endpoints_from_labels(short_id, labels));
            }
        }
        Ok(eps)
    }

    fn add_event_handler(&self, handler: EventHandler) {
        self.handlers.lock().push(handler);
    }
}
