//! In-memory route store
//!
//! A [`RouteStore`] that keeps rules and credentials in process memory. Used by
//! the test suites and for running the bot without a provider account.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use mailbridge_shared::{
    NewRoute, RouteId, RoutePage, RouteStore, RoutingRule, StoreError, StoreResult,
};

#[derive(Default)]
pub struct InMemoryRouteStore {
    routes: Mutex<Vec<RoutingRule>>,
    credentials: Mutex<HashMap<String, Vec<String>>>,
    next_id: AtomicU64,
    list_calls: AtomicUsize,
    fail_listing: AtomicBool,
    fail_mutations: AtomicBool,
    omit_total_count: AtomicBool,
    list_delay: Mutex<Option<Duration>>,
}

impl InMemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a rule as if it had been created out of band
    pub fn insert(&self, rule: RoutingRule) {
        self.lock_routes().push(rule);
    }

    /// All rules currently held, in listing order
    pub fn routes(&self) -> Vec<RoutingRule> {
        self.lock_routes().clone()
    }

    /// Most recent secret set for `login`
    pub fn credential(&self, login: &str) -> Option<String> {
        self.lock_credentials()
            .get(login)
            .and_then(|secrets| secrets.last().cloned())
    }

    /// Every secret ever set for `login`, oldest first
    pub fn credential_history(&self, login: &str) -> Vec<String> {
        self.lock_credentials()
            .get(login)
            .cloned()
            .unwrap_or_default()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Acquire)
    }

    /// Make every listing call fail until reset
    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::Release);
    }

    /// Make every create/update/delete/credential call fail until reset
    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::Release);
    }

    /// Report `total_count` as zero, like a listing that leaves it out
    pub fn omit_total_count(&self, omit: bool) {
        self.omit_total_count.store(omit, Ordering::Release);
    }

    /// Delay each listing call, to exercise refresh deadlines
    pub fn delay_listing(&self, delay: Option<Duration>) {
        *self.list_delay.lock().unwrap_or_else(|p| p.into_inner()) = delay;
    }

    fn lock_routes(&self) -> std::sync::MutexGuard<'_, Vec<RoutingRule>> {
        self.routes.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_credentials(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<String>>> {
        self.credentials.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn check_mutation(&self) -> StoreResult<()> {
        if self.fail_mutations.load(Ordering::Acquire) {
            return Err(StoreError::Api {
                status: 500,
                message: "injected mutation failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RouteStore for InMemoryRouteStore {
    async fn list_routes(&self, limit: usize, skip: usize) -> StoreResult<RoutePage> {
        self.list_calls.fetch_add(1, Ordering::AcqRel);

        let delay = *self.list_delay.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_listing.load(Ordering::Acquire) {
            return Err(StoreError::Transport("injected listing failure".to_string()));
        }

        let routes = self.lock_routes();
        let total_count = if self.omit_total_count.load(Ordering::Acquire) {
            0
        } else {
            routes.len()
        };
        Ok(RoutePage {
            total_count,
            items: routes.iter().skip(skip).take(limit).cloned().collect(),
        })
    }

    async fn create_route(&self, route: &NewRoute) -> StoreResult<RouteId> {
        self.check_mutation()?;

        let id = RouteId::new(format!(
            "route-{}",
            self.next_id.fetch_add(1, Ordering::AcqRel) + 1
        ));
        self.insert(RoutingRule::from_new(id.clone(), route.clone()));
        Ok(id)
    }

    async fn update_route(&self, id: &RouteId, route: &NewRoute) -> StoreResult<()> {
        self.check_mutation()?;

        let mut routes = self.lock_routes();
        let existing = routes
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        existing.priority = route.priority;
        existing.description = route.description.clone();
        existing.expression = route.expression.clone();
        existing.actions = route.actions.clone();
        Ok(())
    }

    async fn delete_route(&self, id: &RouteId) -> StoreResult<()> {
        self.check_mutation()?;

        let mut routes = self.lock_routes();
        let before = routes.len();
        routes.retain(|r| &r.id != id);
        if routes.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn create_credential(&self, login: &str, secret: &str) -> StoreResult<()> {
        self.check_mutation()?;

        self.lock_credentials()
            .entry(login.to_string())
            .or_default()
            .push(secret.to_string());
        Ok(())
    }
}
