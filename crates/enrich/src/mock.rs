//! Deterministic lookup clients for tests.
//!
//! Every call is counted, which is what lets cache-only behavior be
//! asserted rather than assumed: inject a recording client, run, and check
//! the counter stayed at zero.

use crate::error::{ErrorKind, Result};
use crate::hash_lookup::HashLookup;
use crate::title_lookup::TitleLookup;
use async_trait::async_trait;
use romsort_digest::Algorithm;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};

enum Behaviour {
    Return(Value),
    Miss,
    Fail,
}

fn respond(behaviour: &Behaviour) -> Result<Option<Value>> {
    match behaviour {
        Behaviour::Return(value) => Ok(Some(value.clone())),
        Behaviour::Miss => Ok(None),
        Behaviour::Fail => exn::bail!(ErrorKind::Network),
    }
}

/// Hash-lookup fake that counts calls.
pub struct RecordingHashLookup {
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl RecordingHashLookup {
    pub fn returning(value: Value) -> Self {
        Self { behaviour: Behaviour::Return(value), calls: AtomicUsize::new(0) }
    }

    pub fn missing() -> Self {
        Self { behaviour: Behaviour::Miss, calls: AtomicUsize::new(0) }
    }

    pub fn failing() -> Self {
        Self { behaviour: Behaviour::Fail, calls: AtomicUsize::new(0) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HashLookup for RecordingHashLookup {
    async fn lookup(&self, _algorithm: Algorithm, _digest: &str) -> Result<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        respond(&self.behaviour)
    }
}

/// Title-lookup fake that counts calls.
pub struct RecordingTitleLookup {
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl RecordingTitleLookup {
    pub fn returning(value: Value) -> Self {
        Self { behaviour: Behaviour::Return(value), calls: AtomicUsize::new(0) }
    }

    pub fn missing() -> Self {
        Self { behaviour: Behaviour::Miss, calls: AtomicUsize::new(0) }
    }

    pub fn failing() -> Self {
        Self { behaviour: Behaviour::Fail, calls: AtomicUsize::new(0) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TitleLookup for RecordingTitleLookup {
    async fn lookup(&self, _title: &str, _platform: Option<&str>) -> Result<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        respond(&self.behaviour)
    }
}
