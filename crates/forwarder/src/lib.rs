//! mailbridge forwarding core
//!
//! Keeps a cached snapshot of every routing rule in the provider account and
//! coordinates alias provisioning against it:
//! - [`RouteCache`]: snapshot, lookups by identity and alias, refresh
//! - [`Forwarder`]: Forward/Delete with cross-identity alias exclusivity
//! - [`secret`]: SMTP password generation
//! - [`refresh`]: periodic background refresh

pub mod cache;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod refresh;
pub mod secret;

pub use cache::{CacheStats, RefreshOptions, RouteCache, RouteSnapshot};
pub use coordinator::{Forwarder, ForwarderConfig, Provisioned};
pub use error::{ForwardError, ForwardResult, RefreshError, SecretError};
pub use memory::InMemoryRouteStore;
pub use refresh::{spawn_refresh_worker, DEFAULT_REFRESH_INTERVAL};
pub use secret::{generate_secret, SecretPolicy};
