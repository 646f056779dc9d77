//! The diff engine: computes the minimal, ownership-safe change set that
//! converges the DNS server's current state toward the desired state.
//!
//! Ownership is tracked with companion TXT records. A managed record named
//! `app.example.com` is accompanied by a TXT record named
//! `external-dns-docker-owner.app.example.com` whose value identifies the
//! owning daemon instance. Records without a matching ownership TXT are
//! never modified or deleted.

use std::collections::HashMap;

use crate::endpoint::{Endpoint, RecordType};

/// Prefix prepended to a managed record's DNS name to form the companion
/// ownership TXT record name.
pub const OWNER_PREFIX: &str = "external-dns-docker-owner.";

/// Owner ID used when none is configured.
pub const DEFAULT_OWNER_ID: &str = "external-dns-docker";

/// TTL assigned to ownership TXT records.
const OWNERSHIP_TTL: u32 = 300;

/// The TXT record value that identifies ownership for `owner_id`.
pub fn ownership_value(owner_id: &str) -> String {
    format!("heritage=external-dns-docker,external-dns-docker/owner={owner_id}")
}

/// The DNS name of the ownership TXT record for a managed name.
pub fn ownership_name(dns_name: &str) -> String {
    format!("{OWNER_PREFIX}{dns_name}")
}

/// The sets of DNS record operations to apply in a single reconciliation
/// cycle. `update_old` and `update_new` are parallel: `update_old[i]` is
/// replaced by `update_new[i]` and both share the same `(name, type)` key.
#[derive(Debug, Clone, Default)]
pub struct Changes {
    /// Endpoints to create.
    pub create: Vec<Endpoint>,
    /// Current (old) state of endpoints to be updated.
    pub update_old: Vec<Endpoint>,
    /// Desired (new) state of endpoints to be updated.
    pub update_new: Vec<Endpoint>,
    /// Endpoints to delete.
    pub delete: Vec<Endpoint>,
}

impl Changes {
    /// True when the change set has no operations.
    pub fn is_empty(&self) -> bool {
        self.create.is_empty()
            && self.update_old.is_empty()
            && self.update_new.is_empty()
            && self.delete.is_empty()
    }
}

/// Calculates DNS changes between a desired and current state, enforcing
/// ownership so that only records this daemon manages are ever modified.
#[derive(Debug, Clone)]
pub struct Plan {
    owner_id: String,
}

impl Plan {
    /// Create a plan with the given owner ID (empty uses [`DEFAULT_OWNER_ID`]).
    pub fn new(owner_id: &str) -> Self {
        let owner_id = if owner_id.is_empty() {
            DEFAULT_OWNER_ID
        } else {
            owner_id
        };
        Self {
            owner_id: owner_id.to_string(),
        }
    }

    /// Diff desired endpoints (from the source) against current endpoints
    /// (from the provider) and return the minimal change set needed to
    /// converge. Ownership TXT companions are created and deleted alongside
    /// their managed records.
    ///
    /// Pure: inputs are never mutated and the same inputs always produce
    /// the same output.
    pub fn calculate(&self, desired: &[Endpoint], current: &[Endpoint]) -> Changes {
        let owned = self.build_owned_set(current);

        let current_idx = index_endpoints(current.iter().filter(|ep| !is_ownership_txt(ep)));
        let desired_idx = index_endpoints(desired.iter());

        let mut changes = Changes::default();

        // Walk desired: create new records, update owned changed records.
        for (key, want) in &desired_idx {
            match current_idx.get(key) {
                None => {
                    changes.create.push((*want).clone());
                    changes.create.push(self.ownership_txt_for(&want.dns_name));
                }
                Some(have) => {
                    if !owned.contains(want.dns_name.as_str()) {
                        // Exists but is not owned by us, leave it alone.
                        continue;
                    }
                    if !endpoints_equal(have, want) {
                        changes.update_old.push((*have).clone());
                        changes.update_new.push((*want).clone());
                    }
                }
            }
        }

        // Walk current: delete owned records that are no longer desired.
        for (key, have) in &current_idx {
            if desired_idx.contains_key(key) {
                continue;
            }
            if !owned.contains(have.dns_name.as_str()) {
                continue;
            }
            changes.delete.push((*have).clone());
            changes.delete.push(self.ownership_txt_for(&have.dns_name));
        }

        changes
    }

    /// The set of DNS names whose ownership TXT records match this plan's
    /// owner ID.
    fn build_owned_set<'a>(&self, current: &'a [Endpoint]) -> std::collections::HashSet<&'a str> {
        let want = ownership_value(&self.owner_id);
        let mut owned = std::collections::HashSet::new();
        for ep in current {
            if ep.record_type != RecordType::Txt {
                continue;
            }
            let Some(managed_name) = ep.dns_name.strip_prefix(OWNER_PREFIX) else {
                continue;
            };
            if ep.targets.iter().any(|v| v == &want) {
                owned.insert(managed_name);
            }
        }
        owned
    }

    /// The ownership TXT endpoint companion for `dns_name`.
    fn ownership_txt_for(&self, dns_name: &str) -> Endpoint {
        Endpoint::new(
            ownership_name(dns_name),
            vec![ownership_value(&self.owner_id)],
            RecordType::Txt,
            OWNERSHIP_TTL,
        )
    }
}

/// True when `ep` is an ownership TXT record (ours or another instance's).
fn is_ownership_txt(ep: &Endpoint) -> bool {
    ep.record_type == RecordType::Txt && ep.dns_name.starts_with(OWNER_PREFIX)
}

/// Index endpoints by `(dns_name, record_type)`. Duplicate keys last-wins
/// (undefined provider behaviour).
fn index_endpoints<'a>(
    eps: impl Iterator<Item = &'a Endpoint>,
) -> HashMap<(&'a str, RecordType), &'a Endpoint> {
    let mut idx = HashMap::new();
    for ep in eps {
        idx.insert(ep.key(), ep);
    }
    idx
}

/// True when two endpoints with the same key have the same TTL and the same
/// target multiset. Name and type are assumed to already match.
fn endpoints_equal(a: &Endpoint, b: &Endpoint) -> bool {
    if a.ttl != b.ttl || a.targets.len() != b.targets.len() {
        return false;
    }
    let mut at = a.targets.clone();
    let mut bt = b.targets.clone();
    at.sort_unstable();
    bt.sort_unstable();
    at == bt
}
