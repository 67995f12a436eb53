//! In-process broker double.
//!
//! Records every publish in order so tests can assert on what left a component
//! and feed it back in as the next delivery, without a running broker.

use crate::broker::types::{Destination, Envelope, MessagePublisher};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Inner {
    published: Vec<(Destination, Envelope)>,
    failing: Vec<Destination>,
    remaining_failures: usize,
}

/// Shared handle; clones observe the same log
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish to `destination` fails until [`MemoryBroker::heal`] is called
    pub fn fail_destination(&self, destination: Destination) {
        self.lock().failing.push(destination);
    }

    /// The next `count` publishes fail, whatever their destination
    pub fn fail_next(&self, count: usize) {
        self.lock().remaining_failures = count;
    }

    pub fn heal(&self) {
        let mut inner = self.lock();
        inner.failing.clear();
        inner.remaining_failures = 0;
    }

    pub fn published(&self) -> Vec<(Destination, Envelope)> {
        self.lock().published.clone()
    }

    pub fn published_to(&self, destination: &Destination) -> Vec<Envelope> {
        self.lock()
            .published
            .iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, envelope)| envelope.clone())
            .collect()
    }

    /// Removes and returns the messages published to `destination`, oldest first
    pub fn take(&self, destination: &Destination) -> Vec<Envelope> {
        let mut inner = self.lock();
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.published)
            .into_iter()
            .partition(|(d, _)| d == destination);
        inner.published = kept;
        taken.into_iter().map(|(_, envelope)| envelope).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().published.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessagePublisher for MemoryBroker {
    async fn publish(&self, destination: &Destination, envelope: Envelope) -> Result<()> {
        let mut inner = self.lock();
        if inner.remaining_failures > 0 {
            inner.remaining_failures -= 1;
            bail!("Injected publish failure for {destination}");
        }
        if inner.failing.contains(destination) {
            bail!("{destination} is unavailable");
        }
        inner.published.push((destination.clone(), envelope));
        Ok(())
    }
}
