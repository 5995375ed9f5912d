// =============================================================================
// QuoteCache — L1: latest-quote store with handle-refcounted subscriptions
// =============================================================================
//
// Holds the most recent Quote per RIC and a refcount table recording how many
// independent callers currently want updates for that RIC. putLatest/getLatest
// never block on the network; they only touch the in-memory map.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{Quote, Ric};

/// A caller's claim on a RIC's updates. Dropping the last handle for a RIC
/// releases the upstream handle and evicts the cached quote, so `subscribed()`
/// and `get_latest` both stop reporting the RIC together.
#[derive(Debug)]
pub struct SubscriptionHandle {
    ric: Ric,
    cache: Arc<QuoteCacheInner>,
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cache.close_handle(&self.ric);
    }
}

impl SubscriptionHandle {
    pub fn ric(&self) -> &Ric {
        &self.ric
    }
}

#[derive(Debug, Default)]
struct QuoteCacheInner {
    quotes: RwLock<HashMap<Ric, Quote>>,
    refcounts: RwLock<HashMap<Ric, u64>>,
    puts: AtomicU64,
}

impl QuoteCacheInner {
    fn close_handle(&self, ric: &Ric) {
        let mut refs = self.refcounts.write();
        if let Some(count) = refs.get_mut(ric) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                refs.remove(ric);
                self.quotes.write().remove(ric);
            }
        }
    }
}

/// L1 of the system: the quote cache and its handle table.
#[derive(Debug, Clone)]
pub struct QuoteCache {
    inner: Arc<QuoteCacheInner>,
}

impl Default for QuoteCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QuoteCacheInner::default()),
        }
    }

    /// Replace the stored quote for `quote.ric`. Always succeeds; there is
    /// no notion of "unknown RIC" at this layer — any RIC may be written.
    pub fn put_latest(&self, quote: Quote) {
        self.inner.quotes.write().insert(quote.ric.clone(), quote);
        self.inner.puts.fetch_add(1, Ordering::Relaxed);
    }

    /// Fetch the current quotes for the given RICs. RICs with no stored
    /// quote are simply absent from the result map.
    pub fn get_latest(&self, rics: &[Ric]) -> HashMap<Ric, Quote> {
        let quotes = self.inner.quotes.read();
        rics.iter()
            .filter_map(|r| quotes.get(r).map(|q| (r.clone(), q.clone())))
            .collect()
    }

    /// Open a subscription handle for `ric`, incrementing its refcount.
    /// Idempotent with respect to callers: opening a second handle for the
    /// same RIC is perfectly normal and yields an independent handle that
    /// must itself be closed.
    pub fn open_handle(&self, ric: Ric) -> SubscriptionHandle {
        *self.inner.refcounts.write().entry(ric.clone()).or_insert(0) += 1;
        SubscriptionHandle {
            ric,
            cache: self.inner.clone(),
        }
    }

    /// RICs with at least one open handle, i.e. the set a caller would want
    /// the upstream feed actively streaming.
    pub fn subscribed(&self) -> Vec<Ric> {
        self.inner.refcounts.read().keys().cloned().collect()
    }

    /// Current refcount for a RIC (0 if no handle is open).
    pub fn refcount(&self, ric: &Ric) -> u64 {
        self.inner.refcounts.read().get(ric).copied().unwrap_or(0)
    }

    pub fn puts_total(&self) -> u64 {
        self.inner.puts.load(Ordering::Relaxed)
    }
}
