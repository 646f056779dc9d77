//! external-dns-docker - keeps an authoritative DNS zone synchronized with
//! the set of running Docker containers on a host.
//!
//! Containers advertise desired DNS records via `external-dns.io/*` labels;
//! the daemon reconciles those desires against the DNS server's current
//! state over RFC2136, writing only records it owns (tracked with companion
//! TXT records) and leaving foreign records untouched.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     external-dns-docker                     │
//! │                                                             │
//! │  ┌───────────────┐  desired   ┌──────────────┐              │
//! │  │ DockerSource  │───────────▶│  Controller  │              │
//! │  │ (labels +     │  events    │ (debounce,   │              │
//! │  │  event watch) │───────────▶│  backoff)    │              │
//! │  └───────────────┘            └──────┬───────┘              │
//! │                                      │ Plan(desired,        │
//! │                                      │      current)        │
//! │                                      ▼                      │
//! │                               ┌──────────────┐              │
//! │                               │   Provider   │  AXFR/UPDATE │
//! │                               │ (rfc2136 or  │◀────────────────▶ DNS
//! │                               │  multi-zone) │ (TSIG-signed)│
//! │                               └──────────────┘              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each reconciliation cycle fetches the desired endpoints from the
//! source, the current records from the provider, computes a minimal
//! ownership-safe change set, and applies it. Cycles are driven by a
//! periodic timer and by debounced container events.

#![warn(missing_docs)]

pub mod config;
pub mod controller;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod metrics;
pub mod multizone;
pub mod plan;
pub mod provider;
pub mod rfc2136;
pub mod source;
pub mod telemetry;

// Re-export main types
pub use controller::{Controller, ControllerConfig};
pub use endpoint::{Endpoint, RecordType};
pub use error::Error;
pub use multizone::{MultiZoneProvider, ZoneConfig};
pub use plan::{Changes, Plan};
pub use provider::Provider;
pub use rfc2136::{Rfc2136Config, Rfc2136Provider};
pub use source::{DockerSource, Source};
