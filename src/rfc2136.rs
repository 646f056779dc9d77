//! RFC2136 provider: reads zone contents via AXFR and applies changes with
//! TSIG-signed dynamic UPDATE messages.
//!
//! The wire transport is a plain TCP exchange (2-byte length framing)
//! behind the [`DnsExchange`] seam so provider logic is testable without a
//! DNS server.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::dnssec::rdata::tsig::TsigAlgorithm;
use hickory_proto::rr::dnssec::tsig::TSigner;
use hickory_proto::rr::rdata::{CNAME, TXT};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType as WireRecordType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::endpoint::{Endpoint, RecordType};
use crate::error::Error;
use crate::plan::Changes;
use crate::provider::Provider;

/// DNS operation timeout applied when none is configured.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default DNS port.
const DEFAULT_PORT: u16 = 53;

/// TSIG fudge window in seconds.
const TSIG_FUDGE_SECS: u16 = 300;

/// Configuration for a single-zone RFC2136 provider.
#[derive(Debug, Clone, Default)]
pub struct Rfc2136Config {
    /// DNS server host.
    pub host: String,
    /// DNS server port; 0 uses 53.
    pub port: u16,
    /// Zone to manage (e.g. "example.com").
    pub zone: String,
    /// TSIG key name; empty disables signing.
    pub tsig_key: String,
    /// Base64-encoded TSIG secret.
    pub tsig_secret: String,
    /// TSIG algorithm (e.g. "hmac-sha256", trailing dot optional).
    pub tsig_alg: String,
    /// Minimum TTL enforced on outgoing records; 0 disables the floor.
    pub min_ttl: u32,
    /// Timeout for DNS operations (AXFR and UPDATE); zero uses 10s.
    pub timeout: Duration,
}

/// The wire transport used by [`Rfc2136Provider`]. Abstracted for tests.
#[async_trait]
pub trait DnsExchange: Send + Sync {
    /// Send one message and return the single response.
    async fn exchange(&self, msg: Message) -> Result<Message, Error>;

    /// Send a zone-transfer query and return all response messages, ending
    /// at the closing SOA record or a non-success response code.
    async fn transfer(&self, msg: Message) -> Result<Vec<Message>, Error>;
}

/// TCP transport with RFC-standard 2-byte length framing.
pub struct TcpExchange {
    server: String,
    timeout: Duration,
}

impl TcpExchange {
    /// Create an exchange against `server` ("host:port").
    pub fn new(server: String, timeout: Duration) -> Self {
        Self { server, timeout }
    }

    async fn round_trip(&self, msg: Message) -> Result<Message, Error> {
        let mut stream = TcpStream::connect(&self.server).await?;
        write_message(&mut stream, &msg).await?;
        read_message(&mut stream).await
    }

    async fn transfer_inner(&self, msg: Message) -> Result<Vec<Message>, Error> {
        let mut stream = TcpStream::connect(&self.server).await?;
        write_message(&mut stream, &msg).await?;

        // An AXFR stream starts and ends with the zone SOA; responses may
        // arrive split over any number of messages.
        let mut messages = Vec::new();
        let mut soa_seen = 0;
        loop {
            let response = read_message(&mut stream).await?;
            soa_seen += response
                .answers()
                .iter()
                .filter(|r| r.record_type() == WireRecordType::SOA)
                .count();
            let done = soa_seen >= 2 || response.response_code() != ResponseCode::NoError;
            messages.push(response);
            if done {
                return Ok(messages);
            }
        }
    }
}

#[async_trait]
impl DnsExchange for TcpExchange {
    async fn exchange(&self, msg: Message) -> Result<Message, Error> {
        tokio::time::timeout(self.timeout, self.round_trip(msg))
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
    }

    async fn transfer(&self, msg: Message) -> Result<Vec<Message>, Error> {
        tokio::time::timeout(self.timeout, self.transfer_inner(msg))
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
    }
}

async fn write_message(stream: &mut TcpStream, msg: &Message) -> Result<(), Error> {
    let wire = msg.to_vec()?;
    stream
        .write_all(&u16::try_from(wire.len()).unwrap_or(u16::MAX).to_be_bytes())
        .await?;
    stream.write_all(&wire).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_message(stream: &mut TcpStream) -> Result<Message, Error> {
    let mut len = [0u8; 2];
    stream.read_exact(&mut len).await?;
    let mut buf = vec![0u8; u16::from_be_bytes(len) as usize];
    stream.read_exact(&mut buf).await?;
    Ok(Message::from_vec(&buf)?)
}

/// TSIG key material held by the provider.
#[derive(Debug)]
struct TsigKey {
    name: Name,
    algorithm: TsigAlgorithm,
    secret: Vec<u8>,
}

impl TsigKey {
    fn new(key_name: &str, secret_b64: &str, alg: &str) -> Result<Self, Error> {
        let secret = BASE64
            .decode(secret_b64.trim())
            .map_err(|e| Error::config(format!("invalid base64 TSIG secret: {e}")))?;
        Ok(Self {
            name: fqdn(key_name)?,
            algorithm: parse_tsig_algorithm(alg)?,
            secret,
        })
    }

    fn signer(&self) -> Result<TSigner, Error> {
        Ok(TSigner::new(
            self.secret.clone(),
            self.algorithm.clone(),
            self.name.clone(),
            TSIG_FUDGE_SECS,
        )?)
    }
}

/// Map a TSIG algorithm name (trailing dot optional, case-insensitive) to
/// the wire algorithm. Empty uses hmac-sha256.
fn parse_tsig_algorithm(alg: &str) -> Result<TsigAlgorithm, Error> {
    match alg.trim().trim_end_matches('.').to_ascii_lowercase().as_str() {
        "" | "hmac-sha256" => Ok(TsigAlgorithm::HmacSha256),
        "hmac-md5" => Ok(TsigAlgorithm::HmacMd5),
        "hmac-sha1" => Ok(TsigAlgorithm::HmacSha1),
        "hmac-sha224" => Ok(TsigAlgorithm::HmacSha224),
        "hmac-sha384" => Ok(TsigAlgorithm::HmacSha384),
        "hmac-sha512" => Ok(TsigAlgorithm::HmacSha512),
        other => Err(Error::config(format!("unsupported TSIG algorithm {other:?}"))),
    }
}

/// Parse a name into its FQDN form (trailing dot added).
fn fqdn(name: &str) -> Result<Name, Error> {
    let trimmed = name.trim().trim_end_matches('.');
    Ok(Name::from_utf8(format!("{trimmed}."))?)
}

/// Strip the trailing dot from a wire name.
fn trim_dot(name: String) -> String {
    name.trim_end_matches('.').to_string()
}

/// A [`Provider`] backed by one RFC2136-capable DNS server and zone.
pub struct Rfc2136Provider {
    zone: Name,
    server: String,
    min_ttl: u32,
    tsig: Option<TsigKey>,
    exchange: Arc<dyn DnsExchange>,
}

impl std::fmt::Debug for Rfc2136Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rfc2136Provider")
            .field("zone", &self.zone)
            .field("server", &self.server)
            .field("min_ttl", &self.min_ttl)
            .field("tsig", &self.tsig)
            .finish_non_exhaustive()
    }
}

impl Rfc2136Provider {
    /// Create a provider with the standard TCP transport.
    pub fn new(cfg: Rfc2136Config) -> Result<Self, Error> {
        let port = if cfg.port == 0 { DEFAULT_PORT } else { cfg.port };
        let timeout = if cfg.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            cfg.timeout
        };
        let server = format!("{}:{}", cfg.host, port);
        let exchange = Arc::new(TcpExchange::new(server, timeout));
        Self::with_exchange(cfg, exchange)
    }

    /// Create a provider over an injected transport (used by tests).
    pub fn with_exchange(cfg: Rfc2136Config, exchange: Arc<dyn DnsExchange>) -> Result<Self, Error> {
        if cfg.zone.trim().is_empty() {
            return Err(Error::config("rfc2136 zone must not be empty"));
        }
        let port = if cfg.port == 0 { DEFAULT_PORT } else { cfg.port };
        let tsig = if cfg.tsig_key.is_empty() {
            None
        } else {
            Some(TsigKey::new(&cfg.tsig_key, &cfg.tsig_secret, &cfg.tsig_alg)?)
        };
        Ok(Self {
            zone: fqdn(&cfg.zone)?,
            server: format!("{}:{}", cfg.host, port),
            min_ttl: cfg.min_ttl,
            tsig,
            exchange,
        })
    }

    /// The zone this provider manages, in FQDN form.
    pub fn zone(&self) -> String {
        self.zone.to_utf8()
    }

    fn base_message(&self, op_code: OpCode, query_type: WireRecordType) -> Message {
        let mut msg = Message::new();
        msg.set_id(rand::random());
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(op_code);
        msg.set_recursion_desired(false);
        msg.add_query(Query::query(self.zone.clone(), query_type));
        msg
    }

    fn sign(&self, msg: &mut Message) -> Result<(), Error> {
        if let Some(key) = &self.tsig {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as u32;
            msg.finalize(&key.signer()?, now)?;
        }
        Ok(())
    }

    /// The TTL to use for an outgoing record, enforcing the floor.
    fn effective_ttl(&self, ttl: u32) -> u32 {
        if self.min_ttl > 0 && ttl < self.min_ttl {
            self.min_ttl
        } else {
            ttl
        }
    }

    /// Convert an endpoint to wire records, one per target.
    fn endpoint_to_records(&self, ep: &Endpoint) -> Result<Vec<Record>, Error> {
        let name = fqdn(&ep.dns_name)?;
        let ttl = self.effective_ttl(ep.ttl);
        let mut records = Vec::with_capacity(ep.targets.len());
        for target in &ep.targets {
            let rdata = match ep.record_type {
                RecordType::A => {
                    let ip: Ipv4Addr = target.parse().map_err(|_| {
                        Error::InvalidEndpoint(format!("invalid IPv4 address {target:?} for A record"))
                    })?;
                    RData::A(ip.into())
                }
                RecordType::Aaaa => {
                    let ip: Ipv6Addr = target.parse().map_err(|_| {
                        Error::InvalidEndpoint(format!(
                            "invalid IPv6 address {target:?} for AAAA record"
                        ))
                    })?;
                    RData::AAAA(ip.into())
                }
                RecordType::Cname => RData::CNAME(CNAME(fqdn(target)?)),
                RecordType::Txt => RData::TXT(TXT::new(vec![target.clone()])),
            };
            let mut record = Record::from_rdata(name.clone(), ttl, rdata);
            record.set_dns_class(DNSClass::IN);
            records.push(record);
        }
        Ok(records)
    }
}

/// Convert a wire record to an endpoint. Returns `None` for zone-metadata
/// and unsupported record types (SOA, NS, TSIG, ...).
fn record_to_endpoint(record: &Record) -> Option<Endpoint> {
    let name = trim_dot(record.name().to_utf8());
    let ttl = record.ttl();
    match record.data()? {
        RData::A(a) => Some(Endpoint::new(name, vec![a.to_string()], RecordType::A, ttl)),
        RData::AAAA(aaaa) => Some(Endpoint::new(
            name,
            vec![aaaa.to_string()],
            RecordType::Aaaa,
            ttl,
        )),
        RData::CNAME(cname) => Some(Endpoint::new(
            name,
            vec![trim_dot(cname.0.to_utf8())],
            RecordType::Cname,
            ttl,
        )),
        RData::TXT(txt) => Some(Endpoint::new(
            name,
            txt.txt_data()
                .iter()
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect(),
            RecordType::Txt,
            ttl,
        )),
        _ => None,
    }
}

#[async_trait]
impl Provider for Rfc2136Provider {
    async fn records(&self) -> Result<Vec<Endpoint>, Error> {
        let mut msg = self.base_message(OpCode::Query, WireRecordType::AXFR);
        self.sign(&mut msg)?;

        let responses = self.exchange.transfer(msg).await.map_err(|e| Error::Zone {
            zone: self.zone.to_utf8(),
            source: Box::new(e),
        })?;

        let mut endpoints = Vec::new();
        for response in &responses {
            if response.response_code() != ResponseCode::NoError {
                return Err(Error::ResponseCode {
                    op: "axfr",
                    server: self.server.clone(),
                    code: response.response_code(),
                });
            }
            endpoints.extend(response.answers().iter().filter_map(record_to_endpoint));
        }
        debug!(zone = %self.zone, records = endpoints.len(), "axfr complete");
        Ok(endpoints)
    }

    async fn apply(&self, changes: &Changes) -> Result<(), Error> {
        if changes.is_empty() {
            return Ok(());
        }

        // All operations are collected into a single UPDATE message so the
        // server applies them atomically.
        let mut msg = self.base_message(OpCode::Update, WireRecordType::SOA);

        // Deletes: remove the exact RRs (CLASS NONE, TTL 0).
        for ep in &changes.delete {
            match self.endpoint_to_records(ep) {
                Ok(records) => {
                    for mut record in records {
                        record.set_dns_class(DNSClass::NONE);
                        record.set_ttl(0);
                        msg.add_name_server(record);
                    }
                }
                Err(e) => warn!(endpoint = %ep, error = %e, "skipping delete: cannot convert endpoint"),
            }
        }

        // Updates: remove old, insert new.
        for (old, new) in changes.update_old.iter().zip(&changes.update_new) {
            let old_records = match self.endpoint_to_records(old) {
                Ok(records) => records,
                Err(e) => {
                    warn!(endpoint = %old, error = %e, "skipping update (remove): cannot convert endpoint");
                    continue;
                }
            };
            for mut record in old_records {
                record.set_dns_class(DNSClass::NONE);
                record.set_ttl(0);
                msg.add_name_server(record);
            }
            match self.endpoint_to_records(new) {
                Ok(records) => {
                    for record in records {
                        msg.add_name_server(record);
                    }
                }
                Err(e) => warn!(endpoint = %new, error = %e, "skipping update (insert): cannot convert endpoint"),
            }
        }

        // Creates: insert new RRs.
        for ep in &changes.create {
            match self.endpoint_to_records(ep) {
                Ok(records) => {
                    for record in records {
                        msg.add_name_server(record);
                    }
                }
                Err(e) => warn!(endpoint = %ep, error = %e, "skipping create: cannot convert endpoint"),
            }
        }

        self.sign(&mut msg)?;

        let response = self.exchange.exchange(msg).await?;
        if response.response_code() != ResponseCode::NoError {
            return Err(Error::ResponseCode {
                op: "dns update",
                server: self.server.clone(),
                code: response.response_code(),
            });
        }
        Ok(())
    }

    async fn preflight(&self) -> Result<(), Error> {
        let mut msg = self.base_message(OpCode::Query, WireRecordType::SOA);
        self.sign(&mut msg)?;

        let response = self.exchange.exchange(msg).await?;
        if response.response_code() != ResponseCode::NoError {
            return Err(Error::ResponseCode {
                op: "preflight SOA query",
                server: self.server.clone(),
                code: response.response_code(),
            });
        }
        Ok(())
    }
}
