//! Authorization of incoming calls.
//!
//! Every registered operation declares [`Requirements`]. The [`Authorizer`]
//! evaluates them against the request headers before anything else about the
//! call is looked at; a denial means the arguments are never decoded and the
//! operation never runs.

use crate::envelope::{Headers, PRINCIPAL_HEADER};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Permissions a caller must hold to invoke an operation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Requirements {
    permissions: BTreeSet<String>,
}

impl Requirements {
    /// No requirements: every caller is allowed.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn permission(permission: impl Into<String>) -> Self {
        Self::none().and(permission)
    }

    pub fn and(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    pub fn permissions(&self) -> impl Iterator<Item = &str> {
        self.permissions.iter().map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    Deny { reason: Option<String> },
}

impl AuthDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        AuthDecision::Deny {
            reason: Some(reason.into()),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthDecision::Allow)
    }
}

/// Decides whether a call may proceed.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        target: &str,
        requirements: &Requirements,
        headers: &Headers,
    ) -> AuthDecision;
}

/// Allows everything. For trusted in-process hosts.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _: &str, _: &Requirements, _: &Headers) -> AuthDecision {
        AuthDecision::Allow
    }
}

/// Grants permissions per principal, read from the `principal` header.
#[derive(Clone, Debug, Default)]
pub struct RoleAuthorizer {
    grants: HashMap<String, HashSet<String>>,
}

impl RoleAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, principal: impl Into<String>, permission: impl Into<String>) -> Self {
        self.grants
            .entry(principal.into())
            .or_default()
            .insert(permission.into());
        self
    }
}

#[async_trait]
impl Authorizer for RoleAuthorizer {
    async fn authorize(
        &self,
        target: &str,
        requirements: &Requirements,
        headers: &Headers,
    ) -> AuthDecision {
        if requirements.is_empty() {
            return AuthDecision::Allow;
        }
        let Some(principal) = headers.get(PRINCIPAL_HEADER) else {
            return AuthDecision::deny(format!("`{}` requires an authenticated caller", target));
        };
        let granted = self.grants.get(principal);
        let missing = requirements
            .permissions()
            .find(|p| granted.map_or(true, |g| !g.contains(*p)));
        match missing {
            Some(permission) => {
                AuthDecision::deny(format!("`{}` lacks permission `{}`", principal, permission))
            }
            None => AuthDecision::Allow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(principal: Option<&str>) -> Headers {
        principal
            .map(|p| Headers::from([(PRINCIPAL_HEADER.to_string(), p.to_string())]))
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_role_authorizer() {
        let authorizer = RoleAuthorizer::new()
            .grant("alice", "orders.read")
            .grant("alice", "orders.write")
            .grant("bob", "orders.read");
        let write = Requirements::permission("orders.read").and("orders.write");

        let decision = authorizer.authorize("Order.save", &write, &headers(Some("alice"))).await;
        assert_eq!(decision, AuthDecision::Allow);

        let decision = authorizer.authorize("Order.save", &write, &headers(Some("bob"))).await;
        assert!(!decision.is_allowed());

        let decision = authorizer.authorize("Order.save", &write, &headers(None)).await;
        assert!(!decision.is_allowed());
    }

    #[tokio::test]
    async fn test_no_requirements_needs_no_principal() {
        let decision = RoleAuthorizer::new()
            .authorize("Health.ping", &Requirements::none(), &headers(None))
            .await;
        assert!(decision.is_allowed());
    }
}
