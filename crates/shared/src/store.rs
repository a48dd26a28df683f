//! Remote routing store abstraction

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{NewRoute, RouteId, RoutePage};

/// Provider-side source of truth for routing rules and SMTP logins
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// List up to `limit` rules starting at offset `skip`
    async fn list_routes(&self, limit: usize, skip: usize) -> StoreResult<RoutePage>;

    /// Create a rule, returning the id the provider assigned
    async fn create_route(&self, route: &NewRoute) -> StoreResult<RouteId>;

    async fn update_route(&self, id: &RouteId, route: &NewRoute) -> StoreResult<()>;

    async fn delete_route(&self, id: &RouteId) -> StoreResult<()>;

    /// Create the SMTP login, or reset its password if it already exists
    async fn create_credential(&self, login: &str, secret: &str) -> StoreResult<()>;
}
