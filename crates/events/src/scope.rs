//! Per-item dependency scopes.
//!
//! Every scheduled item gets a scope of its own, created fresh when it is
//! scheduled and dropped when it resolves. Nothing created for one item
//! is visible to another.

/// Creates the scope one item runs in.
pub trait ScopeFactory: Send + Sync + 'static {
    type Scope: Send + 'static;

    fn create_scope(&self, label: &str) -> Self::Scope;
}

impl<F, S> ScopeFactory for F
where
    F: Fn(&str) -> S + Send + Sync + 'static,
    S: Send + 'static,
{
    type Scope = S;

    fn create_scope(&self, label: &str) -> S {
        self(label)
    }
}

/// Factory for work that needs no dependencies.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unscoped;

impl ScopeFactory for Unscoped {
    type Scope = ();

    fn create_scope(&self, _label: &str) {}
}
