//! Shared proxy pool.
//!
//! A concurrency-safe multiset of egress credentials. Attempts borrow one
//! proxy at a time and must return it on every exit path; the lease returns
//! itself to the pool on drop, so the total pool size is constant across the
//! run even when an attempt unwinds early.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::types::Proxy;

struct PoolInner {
    available: Semaphore,
    queue: Mutex<VecDeque<Proxy>>,
    size: usize,
}

/// Blocking-acquire proxy pool. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct ProxyPool {
    inner: Arc<PoolInner>,
}

impl ProxyPool {
    pub fn new(proxies: Vec<Proxy>) -> Self {
        let size = proxies.len();
        Self {
            inner: Arc::new(PoolInner {
                available: Semaphore::new(size),
                queue: Mutex::new(proxies.into()),
                size,
            }),
        }
    }

    /// Total number of proxies owned by the pool. Constant for the
    /// lifetime of the process.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Number of proxies currently available for checkout.
    pub fn available(&self) -> usize {
        self.inner
            .queue
            .lock()
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    /// Check out a proxy, waiting until one is available. The returned
    /// lease gives the proxy back on drop.
    pub async fn acquire(&self) -> Result<ProxyLease> {
        let permit = self
            .inner
            .available
            .acquire()
            .await
            .context("Proxy pool closed")?;
        // The lease re-adds the permit on drop.
        permit.forget();

        let proxy = {
            let mut queue = self
                .inner
                .queue
                .lock()
                .map_err(|_| anyhow::anyhow!("Proxy pool poisoned"))?;
            queue.pop_front()
        }
        .context("Proxy pool empty despite available permit")?;

        debug!(proxy = %proxy, "Proxy checked out");
        Ok(ProxyLease {
            proxy: Some(proxy),
            inner: Arc::clone(&self.inner),
        })
    }
}

/// A checked-out proxy. Returned to the pool when dropped.
pub struct ProxyLease {
    proxy: Option<Proxy>,
    inner: Arc<PoolInner>,
}

impl ProxyLease {
    pub fn proxy(&self) -> &Proxy {
        // Only None after drop, which the borrow checker rules out.
        self.proxy.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for ProxyLease {
    fn drop(&mut self) {
        if let Some(proxy) = self.proxy.take() {
            if let Ok(mut queue) = self.inner.queue.lock() {
                debug!(proxy = %proxy, "Proxy returned");
                queue.push_back(proxy);
            }
            self.inner.available.add_permits(1);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
