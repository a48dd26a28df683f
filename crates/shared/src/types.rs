//! Routing rule types used across mailbridge

use std::fmt;

use serde::{Deserialize, Serialize};

/// Priority assigned to every rule this system creates
pub const ROUTE_PRIORITY: i32 = 1337;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Provider-assigned routing rule ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(pub String);

impl RouteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RouteId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RouteId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// =============================================================================
// Routing Rules
// =============================================================================

/// A routing rule as held by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: RouteId,
    #[serde(default)]
    pub priority: i32,
    /// Owner tag, `<prefix><identifier>` for rules managed by mailbridge
    #[serde(default)]
    pub description: String,
    pub expression: String,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl RoutingRule {
    /// Build a stored rule from its contents and the id the store assigned
    pub fn from_new(id: RouteId, route: NewRoute) -> Self {
        Self {
            id,
            priority: route.priority,
            description: route.description,
            expression: route.expression,
            actions: route.actions,
            created_at: None,
        }
    }

    /// Destination of the first `forward(...)` action
    pub fn forward_destination(&self) -> Option<&str> {
        self.actions.iter().find_map(|a| parse_forward_action(a))
    }

    /// Identifier encoded in the description, if the rule carries `prefix`
    pub fn owner<'a>(&'a self, prefix: &str) -> Option<&'a str> {
        self.description.strip_prefix(prefix)
    }
}

/// Rule contents without an id, sent on create and update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoute {
    pub priority: i32,
    pub description: String,
    pub expression: String,
    pub actions: Vec<String>,
}

impl NewRoute {
    /// Rule forwarding `alias@domain` to `destination`, owned by `description`
    pub fn forwarding(description: String, alias: &str, domain: &str, destination: &str) -> Self {
        Self {
            priority: ROUTE_PRIORITY,
            description,
            expression: match_recipient_expression(alias, domain),
            actions: vec![forward_action(destination)],
        }
    }
}

/// One page of a route listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutePage {
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub items: Vec<RoutingRule>,
}

// =============================================================================
// Canonical Expressions
// =============================================================================

/// Canonical match expression selecting mail sent to `alias@domain`
///
/// The provider evaluates the argument as a regex, so a `.` in `alias` matches
/// any single character: `j.doe` also receives mail for `jxdoe`. Use
/// [`aliases_overlap`] to detect aliases that can capture each other's mail.
pub fn match_recipient_expression(alias: &str, domain: &str) -> String {
    format!(r#"match_recipient("{}@{}")"#, alias, domain)
}

/// Recipient pattern of a `match_recipient("...")` expression
pub fn parse_match_recipient(expression: &str) -> Option<&str> {
    expression
        .trim()
        .strip_prefix("match_recipient(\"")?
        .strip_suffix("\")")
}

/// Characters an alias pattern may hold for [`aliases_overlap`] to reason about it
fn is_plain_alias(alias: &str) -> bool {
    alias
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// Whether two alias patterns can match a common address
///
/// `.` matches any one character and letters compare case-insensitively.
/// Patterns using other regex syntax only overlap when they are equal.
pub fn aliases_overlap(a: &str, b: &str) -> bool {
    if !is_plain_alias(a) || !is_plain_alias(b) {
        return a.eq_ignore_ascii_case(b);
    }

    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .all(|(x, y)| x.eq_ignore_ascii_case(&y) || x == b'.' || y == b'.')
}

/// Canonical action forwarding mail to `destination`
pub fn forward_action(destination: &str) -> String {
    format!(r#"forward("{}")"#, destination)
}

/// Inverse of [`forward_action`]
pub fn parse_forward_action(action: &str) -> Option<&str> {
    action
        .trim()
        .strip_prefix("forward(\"")?
        .strip_suffix("\")")
}
