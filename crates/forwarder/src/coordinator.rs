//! Forwarding coordinator
//!
//! Creates, moves and removes the forwarding rule of one identity, enforcing
//! that an alias is only ever held by one identity.
//!
//! The conflict check reads the cache and the mutation goes straight to the
//! provider with no conditional write, so two identities claiming the same
//! alias concurrently against a stale snapshot can both succeed. Nothing here
//! serializes Forward/Delete calls.
//!
//! The same gap applies within one identity: a second Forward issued before
//! the refresh triggered by the first has landed (a double-sent command, say)
//! still sees no rule for the identity and creates another one with the same
//! description. Lookups, updates and Delete only ever touch the first rule
//! found, so the duplicate stays at the provider until removed by hand.
//!
//! Aliases are compared as the provider evaluates them: `.` matches any
//! character, so an alias that overlaps one held by another identity is a
//! conflict even when the strings differ.

use std::sync::Arc;

use mailbridge_shared::{NewRoute, RouteStore, StoreError};
use tracing::{debug, info, warn};

use crate::cache::{RefreshOptions, RouteCache};
use crate::error::{ForwardError, ForwardResult};
use crate::secret::{generate_secret, SecretPolicy};

/// Prefix of the SMTP login provisioned for an identity
const LOGIN_PREFIX: &str = "d-";

/// Settings for a [`Forwarder`]
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Provider domain aliases and logins live on
    pub domain: String,
    /// Description prefix marking rules owned by this instance
    pub prefix: String,
    pub refresh: RefreshOptions,
    pub secret_policy: SecretPolicy,
}

impl ForwarderConfig {
    pub fn new(domain: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            prefix: prefix.into(),
            refresh: RefreshOptions::default(),
            secret_policy: SecretPolicy::SMTP,
        }
    }
}

/// Result of a successful Forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    /// Qualified SMTP login, `d-<identifier>@<domain>`
    pub mailbox: String,
    /// Freshly generated SMTP password
    pub secret: String,
}

/// Coordinates alias provisioning against the provider
pub struct Forwarder {
    store: Arc<dyn RouteStore>,
    cache: Arc<RouteCache>,
    config: ForwarderConfig,
}

impl Forwarder {
    /// Create a forwarder and populate its cache before returning
    pub async fn new(store: Arc<dyn RouteStore>, config: ForwarderConfig) -> Self {
        let forwarder = Self::without_initial_refresh(store, config);
        if !forwarder.cache.refresh().await {
            warn!("Initial route refresh failed, starting with an empty cache");
        }
        forwarder
    }

    /// Create a forwarder whose cache stays empty until refreshed
    pub fn without_initial_refresh(store: Arc<dyn RouteStore>, config: ForwarderConfig) -> Self {
        let cache = Arc::new(RouteCache::with_options(
            Arc::clone(&store),
            config.prefix.clone(),
            config.domain.clone(),
            config.refresh.clone(),
        ));

        Self {
            store,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<RouteCache> {
        &self.cache
    }

    pub fn domain(&self) -> &str {
        &self.config.domain
    }

    /// SMTP login name for `identifier`
    pub fn login_for(identifier: &str) -> String {
        format!("{}{}", LOGIN_PREFIX, identifier)
    }

    /// Point `alias` at `destination` for `identifier` and issue a new SMTP secret
    ///
    /// Any alias previously held by `identifier` is released. A cache refresh
    /// is scheduled whether or not the call succeeds.
    pub async fn forward(
        &self,
        alias: &str,
        destination: &str,
        identifier: &str,
    ) -> ForwardResult<Provisioned> {
        let result = self.apply_forward(alias, destination, identifier).await;
        self.cache.schedule_refresh();
        result
    }

    /// Remove the forwarding rule of `identifier`
    ///
    /// Returns `false` when there was nothing to remove. Does not refresh the
    /// cache, so the removed rule stays visible until the next refresh.
    pub async fn delete(&self, identifier: &str) -> ForwardResult<bool> {
        let Some(current) = self.cache.lookup_by_identity(identifier) else {
            debug!(identifier = %identifier, "No route to delete");
            return Ok(false);
        };

        match self.store.delete_route(&current.id).await {
            Ok(()) => {
                info!(identifier = %identifier, route_id = %current.id, "Deleted forwarding route");
                Ok(true)
            }
            Err(StoreError::NotFound(_)) => {
                debug!(
                    identifier = %identifier,
                    route_id = %current.id,
                    "Route already gone at provider"
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_forward(
        &self,
        alias: &str,
        destination: &str,
        identifier: &str,
    ) -> ForwardResult<Provisioned> {
        let description = self.cache.description_for(identifier);

        let held_elsewhere = self
            .cache
            .rules_overlapping_alias(alias)
            .into_iter()
            .find(|rule| rule.description != description);

        if let Some(current) = held_elsewhere {
            let owner = current
                .owner(self.cache.prefix())
                .unwrap_or(&current.description)
                .to_string();
            warn!(
                alias = %alias,
                identifier = %identifier,
                owner = %owner,
                "Alias already assigned to another identity"
            );
            return Err(ForwardError::Conflict {
                alias: alias.to_string(),
                owner,
            });
        }

        let route = NewRoute::forwarding(description, alias, &self.config.domain, destination);

        match self.cache.lookup_by_identity(identifier) {
            None => {
                let id = self.store.create_route(&route).await?;
                info!(identifier = %identifier, alias = %alias, route_id = %id, "Created forwarding route");
            }
            Some(current) => match self.store.update_route(&current.id, &route).await {
                Ok(()) => {
                    info!(
                        identifier = %identifier,
                        alias = %alias,
                        route_id = %current.id,
                        previous = %current.expression,
                        "Updated forwarding route"
                    );
                }
                Err(StoreError::NotFound(_)) => {
                    // Cached rule was removed at the provider since the last refresh
                    let id = self.store.create_route(&route).await?;
                    info!(
                        identifier = %identifier,
                        alias = %alias,
                        route_id = %id,
                        "Recreated forwarding route"
                    );
                }
                Err(e) => return Err(e.into()),
            },
        }

        let login = Self::login_for(identifier);
        let secret = generate_secret(&self.config.secret_policy)?;
        self.store.create_credential(&login, &secret).await?;

        Ok(Provisioned {
            mailbox: format!("{}@{}", login, self.config.domain),
            secret,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRouteStore;
    use mailbridge_shared::{RouteId, RoutingRule};

    const DOMAIN: &str = "mg.example.org";
    const PREFIX: &str = "mailbridge:";

    async fn setup() -> (Arc<InMemoryRouteStore>, Forwarder) {
        let store = Arc::new(InMemoryRouteStore::new());
        let forwarder = Forwarder::new(store.clone(), ForwarderConfig::new(DOMAIN, PREFIX)).await;
        (store, forwarder)
    }

    /// Let spawned refresh tasks run to completion
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_forward_creates_route_and_credential() {
        let (store, forwarder) = setup().await;

        let provisioned = forwarder
            .forward("jdoe", "jdoe@external.example", "U1")
            .await
            .unwrap();

        assert_eq!(provisioned.mailbox, "d-U1@mg.example.org");
        assert_eq!(provisioned.secret.len(), 16);
        assert_eq!(store.credential("d-U1"), Some(provisioned.secret.clone()));

        let routes = store.routes();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].description, "mailbridge:U1");
        assert_eq!(routes[0].expression, r#"match_recipient("jdoe@mg.example.org")"#);
        assert_eq!(routes[0].forward_destination(), Some("jdoe@external.example"));
        assert_eq!(routes[0].priority, 1337);
    }

    #[tokio::test]
    async fn test_alias_conflict_names_owner() {
        let (store, forwarder) = setup().await;

        forwarder.forward("x", "a@ext.example", "A").await.unwrap();
        forwarder.cache().refresh().await;

        let err = forwarder.forward("x", "b@ext.example", "B").await.unwrap_err();
        match err {
            ForwardError::Conflict { alias, owner } => {
                assert_eq!(alias, "x");
                assert_eq!(owner, "A");
            }
            other => panic!("expected Conflict, got {:?}", other),
        }

        // B got nothing
        assert_eq!(store.routes().len(), 1);
        assert!(store.credential("d-B").is_none());
    }

    #[tokio::test]
    async fn test_overlapping_alias_is_conflict() {
        let (store, forwarder) = setup().await;

        forwarder.forward("jxdoe", "a@ext.example", "A").await.unwrap();
        forwarder.cache().refresh().await;

        // `j.doe` would also receive mail sent to jxdoe
        let err = forwarder.forward("j.doe", "b@ext.example", "B").await.unwrap_err();
        assert!(matches!(err, ForwardError::Conflict { ref owner, .. } if owner == "A"));

        // Case variants address the same mailbox
        let err = forwarder.forward("JXDOE", "b@ext.example", "B").await.unwrap_err();
        assert!(err.is_conflict());

        assert_eq!(store.routes().len(), 1);
        assert!(store.credential("d-B").is_none());

        // The holder may still move to an overlapping pattern of its own
        forwarder.forward("j.doe", "a@ext.example", "A").await.unwrap();
    }

    #[tokio::test]
    async fn test_double_forward_before_refresh_duplicates_rule() {
        let (store, forwarder) = setup().await;

        forwarder.forward("x", "a@ext.example", "A").await.unwrap();
        // The cache has not seen the first rule yet
        forwarder.forward("x", "a@ext.example", "A").await.unwrap();

        let routes = store.routes();
        assert_eq!(routes.len(), 2);
        assert!(routes.iter().all(|r| r.description == "mailbridge:A"));

        forwarder.cache().refresh().await;
        assert!(forwarder.delete("A").await.unwrap());
        // Only the first rule is removed
        assert_eq!(store.routes().len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_rule_blocks_alias() {
        let store = Arc::new(InMemoryRouteStore::new());
        store.insert(RoutingRule::from_new(
            RouteId::new("ops"),
            NewRoute::forwarding("Ops catch".to_string(), "postmaster", DOMAIN, "ops@ext.example"),
        ));
        let forwarder = Forwarder::new(store.clone(), ForwarderConfig::new(DOMAIN, PREFIX)).await;

        let err = forwarder
            .forward("postmaster", "me@ext.example", "U1")
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::Conflict { ref owner, .. } if owner == "Ops catch"));
    }

    #[tokio::test]
    async fn test_same_identity_can_reforward_same_alias() {
        let (store, forwarder) = setup().await;

        forwarder.forward("x", "old@ext.example", "A").await.unwrap();
        forwarder.cache().refresh().await;
        forwarder.forward("x", "new@ext.example", "A").await.unwrap();

        let routes = store.routes();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].forward_destination(), Some("new@ext.example"));
        // A fresh secret each time, previous ones are not revoked
        assert_eq!(store.credential_history("d-A").len(), 2);
    }

    #[tokio::test]
    async fn test_reforward_moves_alias() {
        let (store, forwarder) = setup().await;

        forwarder.forward("x", "d1@ext.example", "A").await.unwrap();
        forwarder.cache().refresh().await;
        forwarder.forward("y", "d2@ext.example", "A").await.unwrap();
        forwarder.cache().refresh().await;

        assert_eq!(store.routes().len(), 1);
        assert!(forwarder.cache().lookup_by_alias("x").is_none());
        let rule = forwarder.cache().lookup_by_alias("y").unwrap();
        assert_eq!(rule.description, "mailbridge:A");

        // The released alias is free for someone else
        forwarder.forward("x", "b@ext.example", "B").await.unwrap();
    }

    #[tokio::test]
    async fn test_forward_schedules_refresh_even_on_conflict() {
        let (_store, forwarder) = setup().await;
        assert_eq!(forwarder.cache().snapshot().generation(), 1);

        forwarder.forward("x", "a@ext.example", "A").await.unwrap();
        settle().await;
        assert_eq!(forwarder.cache().snapshot().generation(), 2);
        assert!(forwarder.cache().lookup_by_identity("A").is_some());

        let result = forwarder.forward("x", "b@ext.example", "B").await;
        assert!(result.unwrap_err().is_conflict());
        settle().await;
        assert_eq!(forwarder.cache().snapshot().generation(), 3);
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let (store, forwarder) = setup().await;
        store.fail_mutations(true);

        let err = forwarder
            .forward("jdoe", "jdoe@ext.example", "U1")
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::Provider(_)));
        assert!(store.routes().is_empty());
    }

    #[tokio::test]
    async fn test_update_of_vanished_route_recreates_it() {
        let (store, forwarder) = setup().await;
        forwarder.forward("x", "a@ext.example", "A").await.unwrap();
        forwarder.cache().refresh().await;

        // Removed out of band; cache still lists it
        let id = store.routes()[0].id.clone();
        store.delete_route(&id).await.unwrap();

        forwarder.forward("y", "a@ext.example", "A").await.unwrap();
        let routes = store.routes();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].expression, r#"match_recipient("y@mg.example.org")"#);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_store, forwarder) = setup().await;

        assert!(!forwarder.delete("nobody").await.unwrap());
        assert!(!forwarder.delete("nobody").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_removes_route_without_refresh() {
        let (store, forwarder) = setup().await;
        forwarder.forward("x", "a@ext.example", "A").await.unwrap();
        settle().await;
        let generation = forwarder.cache().snapshot().generation();
        assert!(forwarder.cache().lookup_by_identity("A").is_some());

        assert!(forwarder.delete("A").await.unwrap());
        assert!(store.routes().is_empty());

        // Cache still shows the rule until the next refresh
        assert_eq!(forwarder.cache().snapshot().generation(), generation);
        assert!(forwarder.cache().lookup_by_identity("A").is_some());

        // Stale cache: provider says the route is already gone
        assert!(!forwarder.delete("A").await.unwrap());

        forwarder.cache().refresh().await;
        assert!(forwarder.cache().lookup_by_identity("A").is_none());
    }

    #[tokio::test]
    async fn test_delete_provider_error_propagates() {
        let (store, forwarder) = setup().await;
        forwarder.forward("x", "a@ext.example", "A").await.unwrap();
        forwarder.cache().refresh().await;

        store.fail_mutations(true);
        assert!(matches!(
            forwarder.delete("A").await,
            Err(ForwardError::Provider(_))
        ));
    }
}
