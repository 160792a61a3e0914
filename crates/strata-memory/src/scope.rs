//! Scope resolution: (scope, identifiers) -> namespace.

use crate::error::MemoryError;
use crate::model::{ContextScope, ScopeIds};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Concrete storage prefix for a scope. The global scope has an empty id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    pub scope: ContextScope,
    pub id: String,
}

impl Namespace {
    pub fn global() -> Self {
        Self {
            scope: ContextScope::Global,
            id: String::new(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.scope == ContextScope::Global
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global() {
            f.write_str("global")
        } else {
            write!(f, "{}:{}", self.scope, self.id)
        }
    }
}

/// Resolve the namespace for `scope`.
///
/// There is no fallback: a `user` scope without a `user_id` is an error even
/// if a tenant id is present.
pub fn resolve(scope: ContextScope, ids: &ScopeIds) -> Result<Namespace, MemoryError> {
    let (field, value) = match scope {
        ContextScope::Global => return Ok(Namespace::global()),
        ContextScope::Tenant => ("tenant_id", ids.tenant_id.as_deref()),
        ContextScope::User => ("user_id", ids.user_id.as_deref()),
        ContextScope::Session => ("session_id", ids.session_id.as_deref()),
        ContextScope::Agent => ("agent_id", ids.agent_id.as_deref()),
    };
    match value {
        Some(id) if !id.trim().is_empty() => Ok(Namespace {
            scope,
            id: id.to_string(),
        }),
        _ => Err(MemoryError::MissingIdentifier {
            scope: scope.as_str(),
            field,
        }),
    }
}

/// Resolve an explicit, caller-ordered chain of scopes.
///
/// Fails on the first scope whose identifier is missing so that a broken
/// chain is never silently shortened.
pub fn resolve_chain(
    scopes: &[ContextScope],
    ids: &ScopeIds,
) -> Result<Vec<Namespace>, MemoryError> {
    scopes.iter().map(|scope| resolve(*scope, ids)).collect()
}

#[cfg(test)]
mod tests {
    use super::{Namespace, resolve, resolve_chain};
    use crate::error::MemoryError;
    use crate::model::{ContextScope, ScopeIds};
    use pretty_assertions::assert_eq;

    #[test]
    fn global_ignores_identifiers() {
        let ns = resolve(ContextScope::Global, &ScopeIds::session("s1")).expect("global");
        assert_eq!(ns, Namespace::global());
        assert_eq!(ns.to_string(), "global");
    }

    #[test]
    fn scoped_namespace_uses_matching_id() {
        let ids = ScopeIds::tenant("acme").with_user("u1").with_session("s1");
        assert_eq!(
            resolve(ContextScope::User, &ids).expect("user").to_string(),
            "user:u1"
        );
        assert_eq!(
            resolve(ContextScope::Session, &ids).expect("session").to_string(),
            "session:s1"
        );
    }

    #[test]
    fn missing_or_blank_identifier_is_an_error() {
        let err = resolve(ContextScope::User, &ScopeIds::tenant("acme")).expect_err("user");
        assert!(matches!(
            err,
            MemoryError::MissingIdentifier {
                scope: "user",
                field: "user_id"
            }
        ));
        let err = resolve(ContextScope::Agent, &ScopeIds::agent("   ")).expect_err("agent");
        assert!(err.is_validation());
    }

    #[test]
    fn same_id_in_different_scopes_is_distinct() {
        let ids = ScopeIds::tenant("x").with_user("x");
        let tenant = resolve(ContextScope::Tenant, &ids).expect("tenant");
        let user = resolve(ContextScope::User, &ids).expect("user");
        assert_ne!(tenant, user);
    }

    #[test]
    fn chain_preserves_caller_order() {
        let ids = ScopeIds::tenant("acme").with_user("u1");
        let chain = resolve_chain(
            &[ContextScope::User, ContextScope::Tenant, ContextScope::Global],
            &ids,
        )
        .expect("chain");
        let rendered: Vec<String> = chain.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["user:u1", "tenant:acme", "global"]);

        assert!(resolve_chain(&[ContextScope::Session], &ids).is_err());
    }
}
