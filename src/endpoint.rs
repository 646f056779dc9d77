//! The [`Endpoint`] type representing one desired DNS record.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// TTL applied when none is specified.
pub const DEFAULT_TTL: u32 = 300;

/// DNS record types the daemon manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// IPv4 address record.
    A,
    /// IPv6 address record.
    Aaaa,
    /// Canonical name record.
    Cname,
    /// Text record.
    Txt,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Txt => "TXT",
        };
        f.write_str(s)
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::Aaaa),
            "CNAME" => Ok(RecordType::Cname),
            "TXT" => Ok(RecordType::Txt),
            other => Err(format!("unsupported record type {other:?}")),
        }
    }
}

/// A desired DNS record.
///
/// `dns_name` is stored without a trailing dot; providers add one on the
/// wire. Target order is not significant, two endpoints whose targets are
/// permutations of each other are considered equal by the plan engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Fully-qualified DNS name (e.g. "app.example.com"), trailing dot trimmed.
    pub dns_name: String,
    /// Values the record points to (IPs or hostnames).
    pub targets: Vec<String>,
    /// DNS record type.
    pub record_type: RecordType,
    /// Time-to-live in seconds.
    pub ttl: u32,
    /// Arbitrary metadata (e.g. ownership tracking).
    pub labels: HashMap<String, String>,
}

impl Endpoint {
    /// Create an endpoint, normalising the DNS name and defaulting the TTL.
    pub fn new(
        dns_name: impl Into<String>,
        targets: Vec<String>,
        record_type: RecordType,
        ttl: u32,
    ) -> Self {
        let dns_name = dns_name.into();
        let dns_name = dns_name.trim().trim_end_matches('.').to_string();
        Self {
            dns_name,
            targets,
            record_type,
            ttl: if ttl == 0 { DEFAULT_TTL } else { ttl },
            labels: HashMap::new(),
        }
    }

    /// The `(dns_name, record_type)` key used for indexing and diffing.
    pub fn key(&self) -> (&str, RecordType) {
        (self.dns_name.as_str(), self.record_type)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} (TTL {})",
            self.dns_name,
            self.record_type,
            self.targets.join(","),
            self.ttl
        )
    }
}

/// Infer the record type from a target value.
///
/// A valid IPv4 address maps to A, a valid IPv6 address to AAAA, anything
/// else is treated as a hostname and maps to CNAME.
pub fn infer_record_type(target: &str) -> RecordType {
    match target.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => RecordType::A,
        Ok(IpAddr::V6(_)) => RecordType::Aaaa,
        Err(_) => RecordType::Cname,
    }
}
