//! Shared test infrastructure: in-memory source and provider fakes plus
//! endpoint builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use external_dns_docker::endpoint::{Endpoint, RecordType};
use external_dns_docker::error::Error;
use external_dns_docker::plan::{ownership_name, ownership_value, Changes};
use external_dns_docker::provider::Provider;
use external_dns_docker::source::{EventHandler, Source};

/// Build an endpoint from string targets.
pub fn ep(name: &str, targets: &[&str], rt: RecordType, ttl: u32) -> Endpoint {
    Endpoint::new(name, targets.iter().map(|t| t.to_string()).collect(), rt, ttl)
}

/// Build the ownership TXT sidecar for a managed name.
pub fn sidecar(name: &str, owner_id: &str) -> Endpoint {
    ep(
        &ownership_name(name),
        &[ownership_value(owner_id).as_str()],
        RecordType::Txt,
        300,
    )
}

/// An in-memory [`Source`] with scriptable failures and manual event
/// triggering.
pub struct FakeSource {
    endpoints: Mutex<Vec<Endpoint>>,
    handlers: Mutex<Vec<EventHandler>>,
    fail_next: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(endpoints: Vec<Endpoint>) -> Arc<Self> {
        Arc::new(Self {
            endpoints: Mutex::new(endpoints),
            handlers: Mutex::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    /// Replace the desired endpoint set.
    pub fn set_endpoints(&self, endpoints: Vec<Endpoint>) {
        *self.endpoints.lock() = endpoints;
    }

    /// Make the next `n` calls to `endpoints` fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of `endpoints` calls so far (failed ones included).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Invoke all registered event handlers, as the watcher would on a
    /// container event.
    pub fn fire_event(&self) {
        for handler in self.handlers.lock().iter() {
            handler();
        }
    }
}

#[async_trait]
impl Source for FakeSource {
    async fn endpoints(&self) -> Result<Vec<Endpoint>, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Config("source unavailable".into()));
        }
        Ok(self.endpoints.lock().clone())
    }

    fn add_event_handler(&self, handler: EventHandler) {
        self.handlers.lock().push(handler);
    }
}

/// An in-memory [`Provider`] that applies change sets to a keyed record
/// store and keeps a history of `apply` calls for assertions.
pub struct FakeProvider {
    records: Mutex<HashMap<(String, RecordType), Endpoint>>,
    history: Mutex<Vec<Changes>>,
    fail_records_next: AtomicUsize,
    fail_apply_next: AtomicUsize,
    preflights: AtomicUsize,
}

impl FakeProvider {
    pub fn new(initial: Vec<Endpoint>) -> Arc<Self> {
        let mut records = HashMap::new();
        for ep in initial {
            records.insert((ep.dns_name.clone(), ep.record_type), ep);
        }
        Arc::new(Self {
            records: Mutex::new(records),
            history: Mutex::new(Vec::new()),
            fail_records_next: AtomicUsize::new(0),
            fail_apply_next: AtomicUsize::new(0),
            preflights: AtomicUsize::new(0),
        })
    }

    /// Make the next `n` calls to `records` fail.
    pub fn fail_records_next(&self, n: usize) {
        self.fail_records_next.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` calls to `apply` fail.
    pub fn fail_apply_next(&self, n: usize) {
        self.fail_apply_next.store(n, Ordering::SeqCst);
    }

    /// Number of endpoints currently stored.
    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    /// A stored endpoint by name and type.
    pub fn get(&self, name: &str, rt: RecordType) -> Option<Endpoint> {
        self.records.lock().get(&(name.to_string(), rt)).cloned()
    }

    /// All `apply` calls so far, oldest first.
    pub fn history(&self) -> Vec<Changes> {
        self.history.lock().clone()
    }

    /// Number of preflight calls so far.
    pub fn preflight_count(&self) -> usize {
        self.preflights.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        let remaining = counter.load(Ordering::SeqCst);
        if remaining > 0 {
            counter.store(remaining - 1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn records(&self) -> Result<Vec<Endpoint>, Error> {
        if Self::take_failure(&self.fail_records_next) {
            return Err(Error::Config("dns server unavailable".into()));
        }
        Ok(self.records.lock().values().cloned().collect())
    }

    async fn apply(&self, changes: &Changes) -> Result<(), Error> {
        if Self::take_failure(&self.fail_apply_next) {
            return Err(Error::Config("update refused".into()));
        }

        let mut records = self.records.lock();
        for ep in &changes.create {
            records.insert((ep.dns_name.clone(), ep.record_type), ep.clone());
        }
        for (old, new) in changes.update_old.iter().zip(&changes.update_new) {
            records.remove(&(old.dns_name.clone(), old.record_type));
            records.insert((new.dns_name.clone(), new.record_type), new.clone());
        }
        for ep in &changes.delete {
            records.remove(&(ep.dns_name.clone(), ep.record_type));
        }
        drop(records);

        self.history.lock().push(changes.clone());
        Ok(())
    }

    async fn preflight(&self) -> Result<(), Error> {
        self.preflights.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
