//! Typed query builder compiling to RQL.
//!
//! Builder methods consume the query and return it; `Clone` gives an independent copy. Every
//! remote call compiles the query first, letting the installed enforcers rewrite it.

mod exec;
mod order;
mod types;

pub use order::{OrderField, OrderKind};
pub use types::{QueryStats, Source};

pub(crate) use types::{BULK_CHUNK, CounterDetail, OperationIdResponse, QueryResponse};

use crate::database::Database;
use crate::enforcer::Enforcer;
use crate::filter::{Filter, Params, ToParam};
use crate::model::Model;
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Projection {
    Fields(Vec<String>),
    Expr(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Include {
    Path(String),
    AllCounters,
    Counter(String),
}

pub struct Query<M: Model> {
    db: Database,
    source: Source,
    root: Vec<Filter>,
    orders: Vec<OrderField>,
    random: Option<Option<String>>,
    offset: Option<usize>,
    limit: Option<usize>,
    projection: Option<Projection>,
    includes: Vec<Include>,
    enforcers: Vec<Arc<dyn Enforcer<M>>>,
    non_stale: bool,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Clone for Query<M> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            source: self.source.clone(),
            root: self.root.clone(),
            orders: self.orders.clone(),
            random: self.random.clone(),
            offset: self.offset,
            limit: self.limit,
            projection: self.projection.clone(),
            includes: self.includes.clone(),
            enforcers: self.enforcers.clone(),
            non_stale: self.non_stale,
            _model: PhantomData,
        }
    }
}

impl<M: Model> std::fmt::Debug for Query<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("source", &self.source)
            .field("rql", &self.rql().0)
            .field("enforcers", &self.enforcers.len())
            .finish_non_exhaustive()
    }
}

impl<M: Model> Query<M> {
    pub(crate) fn collection(db: Database, enforcers: Vec<Arc<dyn Enforcer<M>>>) -> Self {
        let mut query = Self::with_source(db, Source::Collection(M::collection()));
        query.enforcers = enforcers;
        query
    }

    pub(crate) fn index(db: Database, index: String) -> Self {
        Self::with_source(db, Source::Index(index))
    }

    fn with_source(db: Database, source: Source) -> Self {
        Self {
            db,
            source,
            root: Vec::new(),
            orders: Vec::new(),
            random: None,
            offset: None,
            limit: None,
            projection: None,
            includes: Vec::new(),
            enforcers: Vec::new(),
            non_stale: false,
            _model: PhantomData,
        }
    }

    #[must_use]
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Adds `expr value` to the implicit top-level AND. `expr` is a field optionally followed by
    /// one of `= != > >= < <=`.
    ///
    /// # Panics
    /// When `expr` holds a space not followed by a recognized operator.
    #[must_use]
    pub fn filter(self, expr: &str, value: impl ToParam) -> Self {
        self.filter_sub(Filter::direct(expr, value))
    }

    /// Adds an arbitrary filter tree to the implicit top-level AND.
    #[must_use]
    pub fn filter_sub(mut self, filter: Filter) -> Self {
        self.root.push(filter);
        self
    }

    #[must_use]
    pub fn filter_in<I, T>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToParam,
    {
        self.filter_sub(Filter::is_in(field, values))
    }

    #[must_use]
    pub fn filter_contains_all<I, T>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToParam,
    {
        self.filter_sub(Filter::contains_all(field, values))
    }

    #[must_use]
    pub fn filter_starts_with(self, field: &str, prefix: impl Into<String>) -> Self {
        self.filter_sub(Filter::starts_with(field, prefix))
    }

    #[must_use]
    pub fn filter_ends_with(self, field: &str, suffix: impl Into<String>) -> Self {
        self.filter_sub(Filter::ends_with(field, suffix))
    }

    #[must_use]
    pub fn filter_search(self, field: &str, terms: impl Into<String>) -> Self {
        self.filter_sub(Filter::search(field, terms))
    }

    #[must_use]
    pub fn filter_has_field(self, field: &str) -> Self {
        self.filter_sub(Filter::has_field(field))
    }

    #[must_use]
    pub fn filter_between(self, field: &str, low: impl ToParam, high: impl ToParam) -> Self {
        self.filter_sub(Filter::between(field, low, high))
    }

    /// Orders by a model field, choosing alphabetic or numeric ordering from its declared kind.
    /// A leading `-` sorts descending.
    ///
    /// # Panics
    /// On unknown or unorderable fields, on malformed field syntax and after `random_order`.
    #[must_use]
    pub fn order_by(self, field: &str) -> Self {
        let (name, descending) = order::parse_order(field);
        let kind = order::detect(M::collection(), M::fields(), &name);
        self.push_order(OrderField { field: name, kind, descending })
    }

    /// # Panics
    /// On malformed field syntax and after `random_order`.
    #[must_use]
    pub fn order_by_alpha(self, field: &str) -> Self {
        self.order_by_kind(field, OrderKind::Alpha)
    }

    /// Natural ordering: `Foo2` sorts before `Foo10`.
    ///
    /// # Panics
    /// On malformed field syntax and after `random_order`.
    #[must_use]
    pub fn order_by_alphanumeric(self, field: &str) -> Self {
        self.order_by_kind(field, OrderKind::AlphaNumeric)
    }

    /// # Panics
    /// On malformed field syntax and after `random_order`.
    #[must_use]
    pub fn order_by_numeric(self, field: &str) -> Self {
        self.order_by_kind(field, OrderKind::Double)
    }

    fn order_by_kind(self, field: &str, kind: OrderKind) -> Self {
        let (name, descending) = order::parse_order(field);
        self.push_order(OrderField { field: name, kind, descending })
    }

    fn push_order(mut self, order: OrderField) -> Self {
        if self.random.is_some() {
            panic!("cannot combine an explicit order with random_order on {}", self.source);
        }
        self.orders.push(order);
        self
    }

    /// # Panics
    /// When the query already has an explicit order.
    #[must_use]
    pub fn random_order(self) -> Self {
        self.set_random(None)
    }

    /// Random order that repeats for the same seed.
    ///
    /// # Panics
    /// When the query already has an explicit order.
    #[must_use]
    pub fn random_order_seeded(self, seed: impl Into<String>) -> Self {
        self.set_random(Some(seed.into()))
    }

    fn set_random(mut self, seed: Option<String>) -> Self {
        if !self.orders.is_empty() {
            panic!("cannot combine random_order with an explicit order on {}", self.source);
        }
        self.random = Some(seed);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns only the listed fields of each document.
    ///
    /// # Panics
    /// When a projection was already set.
    #[must_use]
    pub fn select(self, fields: &[&str]) -> Self {
        for field in fields {
            if field.is_empty() || field.contains(char::is_whitespace) || field.contains(',') {
                panic!("invalid select field {field:?}");
            }
        }
        self.set_projection(Projection::Fields(fields.iter().map(|f| (*f).to_string()).collect()))
    }

    /// Projects each document through a raw RQL `select` expression.
    ///
    /// # Panics
    /// When a projection was already set.
    #[must_use]
    pub fn project(self, expr: impl Into<String>) -> Self {
        self.set_projection(Projection::Expr(expr.into()))
    }

    fn set_projection(mut self, projection: Projection) -> Self {
        if self.projection.is_some() {
            panic!("select/project can only be called once per query on {}", self.source);
        }
        self.projection = Some(projection);
        self
    }

    /// Downloads the documents referenced by `path` together with the results. Read them back
    /// with `Session::load` after `get_all_in`.
    #[must_use]
    pub fn include(mut self, path: &str) -> Self {
        if path.is_empty() || path.contains(char::is_whitespace) {
            panic!("invalid include path {path:?}");
        }
        self.includes.push(Include::Path(path.to_string()));
        self
    }

    #[must_use]
    pub fn include_all_counters(mut self) -> Self {
        if !self.includes.contains(&Include::AllCounters) {
            self.includes.push(Include::AllCounters);
        }
        self
    }

    #[must_use]
    pub fn include_counter(mut self, name: impl Into<String>) -> Self {
        self.includes.push(Include::Counter(name.into()));
        self
    }

    /// Asks the server to wait for the index to catch up before answering.
    #[must_use]
    pub fn wait_for_non_stale(mut self) -> Self {
        self.non_stale = true;
        self
    }

    /// Adds an enforcer to this query only.
    #[must_use]
    pub fn enforce(mut self, enforcer: impl Enforcer<M> + 'static) -> Self {
        self.enforcers.push(Arc::new(enforcer));
        self
    }

    /// Compiles the query after applying every enforcer rewrite.
    #[must_use]
    pub fn rql(&self) -> (String, Params) {
        let mut query = self.clone();
        let enforcers = std::mem::take(&mut query.enforcers);
        for enforcer in &enforcers {
            query = enforcer.rewrite(query);
        }
        query.render()
    }

    /// CRC32 of the compiled query and its ordered parameters.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        let (rql, params) = self.rql();
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(rql.as_bytes());
        hasher.update(serde_json::to_string(&params).unwrap_or_default().as_bytes());
        hasher.finalize()
    }

    pub(crate) fn allows(&self, model: &M) -> bool {
        self.enforcers.iter().all(|e| e.allows(model))
    }

    fn render(&self) -> (String, Params) {
        let mut params = Params::new();
        let mut parts = vec![self.source.rql()];

        let conditions: Vec<String> =
            self.root.iter().map(|f| f.rql(&mut params)).filter(|s| !s.is_empty()).collect();
        if !conditions.is_empty() {
            parts.push(format!("where {}", conditions.join(" and ")));
        }

        if let Some(seed) = &self.random {
            match seed {
                Some(seed) => {
                    parts.push(format!("order by random({})", params.add(serde_json::Value::String(seed.clone()))));
                }
                None => parts.push("order by random()".to_string()),
            }
        } else if !self.orders.is_empty() {
            let orders: Vec<String> = self.orders.iter().map(OrderField::rql).collect();
            parts.push(format!("order by {}", orders.join(", ")));
        }

        match &self.projection {
            Some(Projection::Fields(fields)) => parts.push(format!("select {}", fields.join(", "))),
            Some(Projection::Expr(expr)) => parts.push(format!("select {expr}")),
            None => {}
        }

        if !self.includes.is_empty() {
            let includes: Vec<String> = self
                .includes
                .iter()
                .map(|inc| match inc {
                    Include::Path(path) => path.clone(),
                    Include::AllCounters => "counters()".to_string(),
                    Include::Counter(name) => {
                        format!("counters({})", params.add(serde_json::Value::String(name.clone())))
                    }
                })
                .collect();
            parts.push(format!("include {}", includes.join(", ")));
        }

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => parts.push(format!("limit {limit} offset {offset}")),
            (Some(limit), None) => parts.push(format!("limit {limit}")),
            (None, Some(offset)) => parts.push(format!("offset {offset}")),
            (None, None) => {}
        }

        (parts.join(" "), params)
    }
}
