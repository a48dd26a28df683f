//! Route endpoints

use mailbridge_shared::{NewRoute, RouteId, RoutePage, RoutingRule, StoreError, StoreResult};
use serde::Deserialize;
use tracing::{debug, info};

use crate::client::{transport_error, MailgunClient};

#[derive(Debug, Deserialize)]
struct CreateRouteResponse {
    route: RoutingRule,
}

/// Form fields for a create or update; one `action` field per action
fn route_form(route: &NewRoute) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("priority", route.priority.to_string()),
        ("description", route.description.clone()),
        ("expression", route.expression.clone()),
    ];
    form.extend(route.actions.iter().map(|a| ("action", a.clone())));
    form
}

impl MailgunClient {
    /// List one page of routes
    pub async fn list_routes(&self, limit: usize, skip: usize) -> StoreResult<RoutePage> {
        let request = self
            .get("routes")
            .query(&[("limit", limit.to_string()), ("skip", skip.to_string())]);

        let page: RoutePage = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        debug!(
            skip = skip,
            returned = page.items.len(),
            total = page.total_count,
            "Fetched route page"
        );

        Ok(page)
    }

    pub async fn create_route(&self, route: &NewRoute) -> StoreResult<RouteId> {
        let request = self.post("routes").form(&route_form(route));

        let created: CreateRouteResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        info!(
            route_id = %created.route.id,
            description = %route.description,
            expression = %route.expression,
            "Created route"
        );

        Ok(created.route.id)
    }

    pub async fn update_route(&self, id: &RouteId, route: &NewRoute) -> StoreResult<()> {
        let request = self
            .put(&format!("routes/{}", id))
            .form(&route_form(route));

        self.send(request).await.map_err(|e| not_found(e, id))?;

        info!(
            route_id = %id,
            description = %route.description,
            expression = %route.expression,
            "Updated route"
        );

        Ok(())
    }

    pub async fn delete_route(&self, id: &RouteId) -> StoreResult<()> {
        let request = self.delete(&format!("routes/{}", id));

        let response = self.send(request).await.map_err(|e| not_found(e, id))?;
        // Drain the body so the connection can be reused
        response.bytes().await.map_err(transport_error)?;

        info!(route_id = %id, "Deleted route");
        Ok(())
    }
}

fn not_found(err: StoreError, id: &RouteId) -> StoreError {
    match err {
        StoreError::Api { status: 404, .. } => StoreError::NotFound(id.to_string()),
        other => other,
    }
}
