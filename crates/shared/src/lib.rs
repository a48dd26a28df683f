//! mailbridge shared types
//!
//! Routing rule model, the remote store abstraction and its error type,
//! shared by the provider client, the forwarder and the bot.

pub mod error;
pub mod store;
pub mod types;

pub use error::*;
pub use store::RouteStore;
pub use types::*;
