//! Mailgun routing API client
//!
//! Implements [`RouteStore`] against the Mailgun v3 REST API: route listing
//! and mutation, plus SMTP credential provisioning for a sending domain.

mod client;
mod credentials;
mod routes;

pub use client::{MailgunClient, MailgunConfig, DEFAULT_API_BASE, DEFAULT_REQUEST_TIMEOUT};

use async_trait::async_trait;
use mailbridge_shared::{NewRoute, RouteId, RoutePage, RouteStore, StoreResult};

#[async_trait]
impl RouteStore for MailgunClient {
    async fn list_routes(&self, limit: usize, skip: usize) -> StoreResult<RoutePage> {
        MailgunClient::list_routes(self, limit, skip).await
    }

    async fn create_route(&self, route: &NewRoute) -> StoreResult<RouteId> {
        MailgunClient::create_route(self, route).await
    }

    async fn update_route(&self, id: &RouteId, route: &NewRoute) -> StoreResult<()> {
        MailgunClient::update_route(self, id, route).await
    }

    async fn delete_route(&self, id: &RouteId) -> StoreResult<()> {
        MailgunClient::delete_route(self, id).await
    }

    async fn create_credential(&self, login: &str, secret: &str) -> StoreResult<()> {
        MailgunClient::create_credential(self, login, secret).await
    }
}
