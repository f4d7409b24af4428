//! Row-level access rules shared by a collection and its queries.
//!
//! An enforcer both rewrites outgoing queries (so the server filters) and checks every decoded
//! model (so direct reads cannot bypass the rule). Enforced-out documents surface as
//! `NoSuchEntity`. Both halves are required: ids, counts, bulk deletes and patches never decode
//! a model, so only the rewrite reaches them.

use crate::model::Model;
use crate::query::Query;
use serde_json::Value;
use std::marker::PhantomData;

/// A predicate over decoded models paired with the query rewrite expressing the same rule.
pub trait Enforcer<M: Model>: Send + Sync {
    /// Whether a decoded model may be returned to the caller.
    fn allows(&self, model: &M) -> bool;

    /// Adds the mandatory filter matching `allows` to a query before it is compiled.
    fn rewrite(&self, query: Query<M>) -> Query<M>;
}

/// Restricts access to documents whose `field` equals `value`.
pub struct FieldEquals<M, F> {
    field: String,
    value: Value,
    read: F,
    _model: PhantomData<fn(&M)>,
}

impl<M, F> FieldEquals<M, F>
where
    M: Model,
    F: Fn(&M) -> Value + Send + Sync,
{
    /// `read` extracts the field from a decoded model for comparison with `value`.
    pub fn new(field: &str, value: impl Into<Value>, read: F) -> Self {
        Self { field: field.to_string(), value: value.into(), read, _model: PhantomData }
    }
}

impl<M, F> Enforcer<M> for FieldEquals<M, F>
where
    M: Model,
    F: Fn(&M) -> Value + Send + Sync,
{
    fn allows(&self, model: &M) -> bool {
        (self.read)(model) == self.value
    }

    fn rewrite(&self, query: Query<M>) -> Query<M> {
        query.filter(&self.field, self.value.clone())
    }
}
