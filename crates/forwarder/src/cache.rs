//! In-memory route cache
//!
//! Holds the last-fetched full rule set of the provider account so alias and
//! identity lookups don't need a round-trip. The provider has no reverse index
//! by description or expression, so lookups are linear scans over a snapshot.
//!
//! Snapshots are immutable and swapped wholesale; the lock is only held to
//! clone or replace the `Arc`, never across a provider call.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use mailbridge_shared::{
    aliases_overlap, match_recipient_expression, parse_match_recipient, RouteStore, RoutingRule,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::RefreshError;

/// Default page size for route listings (provider maximum)
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Default cap on page requests per refresh
const DEFAULT_MAX_PAGES: usize = 100;

/// Default wall-clock deadline for a whole refresh
const DEFAULT_REFRESH_DEADLINE: Duration = Duration::from_secs(30);

/// Paging and deadline settings for a refresh
#[derive(Debug, Clone)]
pub struct RefreshOptions {
    pub page_size: usize,
    pub max_pages: usize,
    pub deadline: Duration,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            deadline: DEFAULT_REFRESH_DEADLINE,
        }
    }
}

/// Immutable view of the provider's rule set at one point in time
#[derive(Debug, Default)]
pub struct RouteSnapshot {
    rules: Vec<RoutingRule>,
    generation: u64,
    refreshed_at: Option<Instant>,
}

impl RouteSnapshot {
    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Number of successful refreshes that led to this snapshot
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When the snapshot was fetched; `None` before the first refresh
    pub fn refreshed_at(&self) -> Option<Instant> {
        self.refreshed_at
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Shared route cache backed by a remote [`RouteStore`]
pub struct RouteCache {
    store: Arc<dyn RouteStore>,
    /// Description prefix marking rules owned by this instance
    prefix: String,
    domain: String,
    options: RefreshOptions,
    snapshot: RwLock<Arc<RouteSnapshot>>,
    /// Serializes refreshes so an older listing never replaces a newer one
    refresh_lock: Mutex<()>,
    /// Set while a triggered refresh is scheduled but not yet started
    refresh_pending: AtomicBool,
    consecutive_failures: AtomicU32,
}

impl RouteCache {
    /// Create an empty cache; call [`RouteCache::refresh`] before serving lookups
    pub fn new(
        store: Arc<dyn RouteStore>,
        prefix: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self::with_options(store, prefix, domain, RefreshOptions::default())
    }

    pub fn with_options(
        store: Arc<dyn RouteStore>,
        prefix: impl Into<String>,
        domain: impl Into<String>,
        options: RefreshOptions,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            domain: domain.into(),
            options,
            snapshot: RwLock::new(Arc::new(RouteSnapshot::default())),
            refresh_lock: Mutex::new(()),
            refresh_pending: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Description carried by the rule owned by `identifier`
    pub fn description_for(&self, identifier: &str) -> String {
        format!("{}{}", self.prefix, identifier)
    }

    /// Match expression selecting mail for `alias` on this domain
    pub fn expression_for(&self, alias: &str) -> String {
        match_recipient_expression(alias, &self.domain)
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Rule owned by `identifier`, if any
    pub fn lookup_by_identity(&self, identifier: &str) -> Option<RoutingRule> {
        let description = self.description_for(identifier);
        self.snapshot()
            .rules
            .iter()
            .find(|rule| rule.description == description)
            .cloned()
    }

    /// Rule forwarding `alias` on this domain, whoever owns it
    pub fn lookup_by_alias(&self, alias: &str) -> Option<RoutingRule> {
        let expression = self.expression_for(alias);
        self.snapshot()
            .rules
            .iter()
            .find(|rule| rule.expression == expression)
            .cloned()
    }

    /// Rules whose recipient pattern can match mail for `alias` on this domain
    ///
    /// Covers exact matches plus aliases that overlap once the provider
    /// expands `.` as a wildcard, in snapshot order.
    pub fn rules_overlapping_alias(&self, alias: &str) -> Vec<RoutingRule> {
        let expression = self.expression_for(alias);
        self.snapshot()
            .rules
            .iter()
            .filter(|rule| rule.expression == expression || self.recipient_overlaps(rule, alias))
            .cloned()
            .collect()
    }

    fn recipient_overlaps(&self, rule: &RoutingRule, alias: &str) -> bool {
        let Some((local, domain)) =
            parse_match_recipient(&rule.expression).and_then(|r| r.rsplit_once('@'))
        else {
            return false;
        };
        domain.eq_ignore_ascii_case(&self.domain) && aliases_overlap(local, alias)
    }

    /// Rules carrying this instance's description prefix
    pub fn owned_rules(&self) -> Vec<RoutingRule> {
        self.snapshot()
            .rules
            .iter()
            .filter(|rule| rule.description.starts_with(&self.prefix))
            .cloned()
            .collect()
    }

    /// Refetch the full rule set and swap it in
    ///
    /// Failures are logged and leave the previous snapshot in place. Returns
    /// whether the snapshot was replaced.
    pub async fn refresh(&self) -> bool {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Schedule a background refresh unless one is already waiting to start
    ///
    /// Only a refresh that has not yet started absorbs new requests; one may be
    /// running with another queued behind it, so this is looser than a strict
    /// single in-flight cap.
    ///
    /// Returns the task handle, or `None` when the request was coalesced into
    /// the pending one.
    pub fn schedule_refresh(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.refresh_pending.swap(true, Ordering::AcqRel) {
            debug!("Route refresh already pending, skipping");
            return None;
        }

        let cache = Arc::clone(self);
        Some(tokio::spawn(async move {
            let _guard = cache.refresh_lock.lock().await;
            // Cleared only once started so mutations landing mid-listing still get picked up
            cache.refresh_pending.store(false, Ordering::Release);
            cache.refresh_locked().await;
        }))
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let snapshot = self.snapshot();
        CacheStats {
            total_rules: snapshot.len(),
            owned_rules: snapshot
                .rules
                .iter()
                .filter(|rule| rule.description.starts_with(&self.prefix))
                .count(),
            generation: snapshot.generation,
            last_refreshed: snapshot.refreshed_at,
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
        }
    }

    async fn refresh_locked(&self) -> bool {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.options.deadline, self.fetch_all()).await {
            Ok(result) => result,
            Err(_) => Err(RefreshError::Timeout),
        };

        match result {
            Ok(rules) => {
                let count = rules.len();
                let generation = self.replace(rules);
                self.consecutive_failures.store(0, Ordering::Release);
                info!(
                    rules = count,
                    generation = generation,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Route cache refreshed"
                );
                true
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if matches!(e, RefreshError::Timeout) {
                    warn!(
                        deadline = ?self.options.deadline,
                        consecutive_failures = failures,
                        "Route refresh timed out, keeping previous snapshot"
                    );
                } else {
                    error!(
                        error = %e,
                        consecutive_failures = failures,
                        "Route refresh failed, keeping previous snapshot"
                    );
                }
                false
            }
        }
    }

    async fn fetch_all(&self) -> Result<Vec<RoutingRule>, RefreshError> {
        let mut rules = Vec::new();

        for _ in 0..self.options.max_pages {
            let page = self
                .store
                .list_routes(self.options.page_size, rules.len())
                .await?;

            let returned = page.items.len();
            rules.extend(page.items);

            // A zero total_count means the provider didn't report one
            let reached_total = page.total_count > 0 && rules.len() >= page.total_count;
            if returned < self.options.page_size || reached_total {
                return Ok(rules);
            }
        }

        Err(RefreshError::TooManyPages(self.options.max_pages))
    }

    fn replace(&self, rules: Vec<RoutingRule>) -> u64 {
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let generation = guard.generation + 1;
        *guard = Arc::new(RouteSnapshot {
            rules,
            generation,
            refreshed_at: Some(Instant::now()),
        });
        generation
    }
}

/// Cache statistics
#[derive(Default, Debug)]
pub struct CacheStats {
    pub total_rules: usize,
    pub owned_rules: usize,
    pub generation: u64,
    pub last_refreshed: Option<Instant>,
    pub consecutive_failures: u32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRouteStore;
    use mailbridge_shared::{NewRoute, RouteId};

    const PREFIX: &str = "mailbridge:";
    const DOMAIN: &str = "mg.example.org";

    fn rule(id: &str, description: &str, alias: &str, destination: &str) -> RoutingRule {
        RoutingRule::from_new(
            RouteId::new(id),
            NewRoute::forwarding(description.to_string(), alias, DOMAIN, destination),
        )
    }

    fn cache_with(store: Arc<InMemoryRouteStore>, options: RefreshOptions) -> Arc<RouteCache> {
        Arc::new(RouteCache::with_options(store, PREFIX, DOMAIN, options))
    }

    #[tokio::test]
    async fn test_cache_starts_empty() {
        let store = Arc::new(InMemoryRouteStore::new());
        store.insert(rule("r1", "mailbridge:U1", "jdoe", "a@b.c"));
        let cache = cache_with(store, RefreshOptions::default());

        // Nothing is visible until the first refresh
        assert!(cache.snapshot().is_empty());
        assert!(cache.lookup_by_identity("U1").is_none());
        assert_eq!(cache.snapshot().generation(), 0);

        assert!(cache.refresh().await);
        assert_eq!(cache.lookup_by_identity("U1").unwrap().id.as_str(), "r1");
        assert_eq!(cache.snapshot().generation(), 1);
        assert!(cache.snapshot().refreshed_at().is_some());
    }

    #[tokio::test]
    async fn test_lookups() {
        let store = Arc::new(InMemoryRouteStore::new());
        store.insert(rule("r1", "mailbridge:U1", "jdoe", "a@b.c"));
        store.insert(rule("r2", "mailbridge:U2", "asmith", "d@e.f"));
        store.insert(rule("r3", "catch-all", "postmaster", "ops@e.f"));
        let cache = cache_with(store, RefreshOptions::default());
        cache.refresh().await;

        assert_eq!(cache.lookup_by_alias("asmith").unwrap().id.as_str(), "r2");
        assert_eq!(cache.lookup_by_alias("postmaster").unwrap().id.as_str(), "r3");
        assert!(cache.lookup_by_alias("nobody").is_none());

        assert_eq!(cache.lookup_by_identity("U2").unwrap().id.as_str(), "r2");
        // Foreign rule is never attributed to an identity
        assert!(cache.lookup_by_identity("catch-all").is_none());
        assert!(cache.lookup_by_identity("U3").is_none());

        let owned = cache.owned_rules();
        assert_eq!(owned.len(), 2);

        let stats = cache.stats();
        assert_eq!(stats.total_rules, 3);
        assert_eq!(stats.owned_rules, 2);
    }

    #[tokio::test]
    async fn test_refresh_pages_through_listing() {
        let store = Arc::new(InMemoryRouteStore::new());
        for i in 0..7 {
            store.insert(rule(
                &format!("r{}", i),
                &format!("mailbridge:U{}", i),
                &format!("alias{}", i),
                "a@b.c",
            ));
        }
        let options = RefreshOptions {
            page_size: 3,
            ..RefreshOptions::default()
        };
        let cache = cache_with(Arc::clone(&store), options);

        assert!(cache.refresh().await);
        assert_eq!(cache.snapshot().len(), 7);
        // 3 + 3 + 1
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_refresh_without_total_count_reads_to_short_page() {
        let store = Arc::new(InMemoryRouteStore::new());
        for i in 0..6 {
            store.insert(rule(&format!("r{}", i), "x", &format!("a{}", i), "a@b.c"));
        }
        store.omit_total_count(true);
        let options = RefreshOptions {
            page_size: 3,
            ..RefreshOptions::default()
        };
        let cache = cache_with(Arc::clone(&store), options);

        assert!(cache.refresh().await);
        assert_eq!(cache.snapshot().len(), 6);
        // 3 + 3 + an empty page to confirm the end
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_overlapping_alias_lookup() {
        let store = Arc::new(InMemoryRouteStore::new());
        store.insert(rule("r1", "mailbridge:U1", "jxdoe", "a@b.c"));
        store.insert(rule("r2", "mailbridge:U2", "asmith", "d@e.f"));
        store.insert(RoutingRule::from_new(
            RouteId::new("r3"),
            NewRoute::forwarding("other".to_string(), "jydoe", "elsewhere.org", "g@h.i"),
        ));
        let cache = cache_with(store, RefreshOptions::default());
        cache.refresh().await;

        let ids = |alias: &str| -> Vec<String> {
            cache
                .rules_overlapping_alias(alias)
                .into_iter()
                .map(|r| r.id.to_string())
                .collect()
        };
        assert_eq!(ids("jxdoe"), vec!["r1"]);
        assert_eq!(ids("j.doe"), vec!["r1"]);
        assert_eq!(ids("ASMITH"), vec!["r2"]);
        assert!(ids("jdoe").is_empty());
    }

    #[tokio::test]
    async fn test_refresh_respects_page_cap() {
        let store = Arc::new(InMemoryRouteStore::new());
        for i in 0..10 {
            store.insert(rule(&format!("r{}", i), "x", &format!("a{}", i), "a@b.c"));
        }
        let options = RefreshOptions {
            page_size: 2,
            max_pages: 3,
            ..RefreshOptions::default()
        };
        let cache = cache_with(Arc::clone(&store), options);

        assert!(!cache.refresh().await);
        assert!(cache.snapshot().is_empty());
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let store = Arc::new(InMemoryRouteStore::new());
        store.insert(rule("r1", "mailbridge:U1", "jdoe", "a@b.c"));
        let cache = cache_with(Arc::clone(&store), RefreshOptions::default());
        assert!(cache.refresh().await);

        store.fail_listing(true);
        store.insert(rule("r2", "mailbridge:U2", "asmith", "d@e.f"));

        assert!(!cache.refresh().await);
        assert!(!cache.refresh().await);
        assert_eq!(cache.snapshot().len(), 1);
        assert_eq!(cache.snapshot().generation(), 1);
        assert_eq!(cache.stats().consecutive_failures, 2);

        store.fail_listing(false);
        assert!(cache.refresh().await);
        assert_eq!(cache.snapshot().len(), 2);
        assert_eq!(cache.stats().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_times_out() {
        let store = Arc::new(InMemoryRouteStore::new());
        store.insert(rule("r1", "mailbridge:U1", "jdoe", "a@b.c"));
        store.delay_listing(Some(Duration::from_secs(60)));
        let cache = cache_with(Arc::clone(&store), RefreshOptions::default());

        assert!(!cache.refresh().await);
        assert!(cache.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_survives_refresh() {
        let store = Arc::new(InMemoryRouteStore::new());
        store.insert(rule("r1", "mailbridge:U1", "jdoe", "a@b.c"));
        let cache = cache_with(Arc::clone(&store), RefreshOptions::default());
        cache.refresh().await;

        let before = cache.snapshot();
        store.insert(rule("r2", "mailbridge:U2", "asmith", "d@e.f"));
        cache.refresh().await;

        // Readers holding an old snapshot keep a consistent view
        assert_eq!(before.len(), 1);
        assert_eq!(cache.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_scheduled_refresh_is_coalesced() {
        let store = Arc::new(InMemoryRouteStore::new());
        store.insert(rule("r1", "mailbridge:U1", "jdoe", "a@b.c"));
        let cache = cache_with(Arc::clone(&store), RefreshOptions::default());

        let first = cache.schedule_refresh();
        let second = cache.schedule_refresh();
        assert!(first.is_some());
        assert!(second.is_none());

        first.unwrap().await.unwrap();
        assert_eq!(store.list_calls(), 1);
        assert_eq!(cache.snapshot().len(), 1);

        // Once the pending one has run, a new one can be scheduled
        cache.schedule_refresh().unwrap().await.unwrap();
        assert_eq!(store.list_calls(), 2);
    }
}
