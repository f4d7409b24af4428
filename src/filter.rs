//! Filter trees and their rendering to RQL with externalized parameters.

use crate::dates::{Date, DateTime, format_wire};
use chrono::{NaiveDate, TimeZone, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Value, json};
use std::fmt;

/// Conversion of a Rust value into a query parameter.
///
/// Calendar values are rendered with the fixed wire format so they compare with stored dates.
pub trait ToParam {
    fn to_param(&self) -> Value;
}

impl<T: ToParam + ?Sized> ToParam for &T {
    fn to_param(&self) -> Value {
        (**self).to_param()
    }
}

impl ToParam for Value {
    fn to_param(&self) -> Value {
        self.clone()
    }
}

impl ToParam for str {
    fn to_param(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl ToParam for String {
    fn to_param(&self) -> Value {
        Value::String(self.clone())
    }
}

macro_rules! to_param_via_json {
    ($($t:ty),*) => {
        $(impl ToParam for $t {
            fn to_param(&self) -> Value {
                json!(*self)
            }
        })*
    };
}

to_param_via_json!(bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl ToParam for Date {
    fn to_param(&self) -> Value {
        self.to_wire().map_or(Value::Null, Value::String)
    }
}

impl ToParam for DateTime {
    fn to_param(&self) -> Value {
        self.to_wire().map_or(Value::Null, Value::String)
    }
}

impl ToParam for chrono::DateTime<Utc> {
    fn to_param(&self) -> Value {
        Value::String(format_wire(self))
    }
}

impl ToParam for NaiveDate {
    fn to_param(&self) -> Value {
        self.and_hms_opt(0, 0, 0)
            .map_or(Value::Null, |n| Value::String(format_wire(&Utc.from_utc_datetime(&n))))
    }
}

impl<T: ToParam> ToParam for [T] {
    fn to_param(&self) -> Value {
        Value::Array(self.iter().map(ToParam::to_param).collect())
    }
}

impl<T: ToParam> ToParam for Vec<T> {
    fn to_param(&self) -> Value {
        self.as_slice().to_param()
    }
}

impl<T: ToParam> ToParam for Option<T> {
    fn to_param(&self) -> Value {
        self.as_ref().map_or(Value::Null, ToParam::to_param)
    }
}

/// Ordered accumulator of query parameters. Names are assigned sequentially: `p0`, `p1`, ...
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, Value)>,
}

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value and returns its placeholder (`$pN`).
    pub fn add(&mut self, value: Value) -> String {
        let name = format!("p{}", self.entries.len());
        let placeholder = format!("${name}");
        self.entries.push((name, value));
        placeholder
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Serialized as a JSON object in insertion order.
impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Operator {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "=" | "==" => Some(Self::Eq),
            "!=" => Some(Self::NotEq),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Gte),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Lte),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Splits `"Field op"` into the field name and its operator. A bare field means equality.
///
/// # Panics
/// When the field is empty or the expression contains a space not followed by a recognized
/// operator.
#[must_use]
pub fn parse_field_expr(expr: &str) -> (String, Operator) {
    let expr = expr.trim();
    match expr.rsplit_once(' ') {
        None => (check_field(expr), Operator::Eq),
        Some((field, op)) => {
            let field = field.trim();
            match Operator::parse(op) {
                Some(op) if !field.is_empty() && !field.contains(char::is_whitespace) => {
                    (field.to_string(), op)
                }
                _ => panic!(
                    "invalid filter expression {expr:?}: a space must be followed by one of = != > >= < <="
                ),
            }
        }
    }
}

fn check_field(field: &str) -> String {
    let field = field.trim();
    if field.is_empty() || field.contains(char::is_whitespace) {
        panic!("invalid filter field {field:?}");
    }
    field.to_string()
}

fn flatten<I, T>(values: I) -> Vec<Value>
where
    I: IntoIterator<Item = T>,
    T: ToParam,
{
    let mut out = Vec::new();
    for value in values {
        match value.to_param() {
            Value::Array(items) => out.extend(items),
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Direct { field: String, op: Operator, value: Value, exact: bool },
    In { field: String, values: Vec<Value> },
    ContainsAll { field: String, values: Vec<Value> },
    StartsWith { field: String, prefix: String },
    EndsWith { field: String, suffix: String },
    Search { field: String, terms: String },
    HasField { field: String },
    Between { field: String, low: Value, high: Value },
}

impl Filter {
    /// Comparison filter from an expression like `"Age >="` and a value.
    #[must_use]
    pub fn direct(expr: &str, value: impl ToParam) -> Self {
        let (field, op) = parse_field_expr(expr);
        Self::Direct { field, op, value: value.to_param(), exact: true }
    }

    #[must_use]
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    #[must_use]
    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    #[must_use]
    pub fn not(inner: Filter) -> Self {
        Self::Not(Box::new(inner))
    }

    /// Matches when the field equals any of the values. Nested lists are flattened.
    #[must_use]
    pub fn is_in<I, T>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToParam,
    {
        Self::In { field: check_field(field), values: flatten(values) }
    }

    /// Matches when the list field contains every value.
    #[must_use]
    pub fn contains_all<I, T>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToParam,
    {
        Self::ContainsAll { field: check_field(field), values: flatten(values) }
    }

    #[must_use]
    pub fn starts_with(field: &str, prefix: impl Into<String>) -> Self {
        Self::StartsWith { field: check_field(field), prefix: prefix.into() }
    }

    #[must_use]
    pub fn ends_with(field: &str, suffix: impl Into<String>) -> Self {
        Self::EndsWith { field: check_field(field), suffix: suffix.into() }
    }

    #[must_use]
    pub fn search(field: &str, terms: impl Into<String>) -> Self {
        Self::Search { field: check_field(field), terms: terms.into() }
    }

    #[must_use]
    pub fn has_field(field: &str) -> Self {
        Self::HasField { field: check_field(field) }
    }

    #[must_use]
    pub fn between(field: &str, low: impl ToParam, high: impl ToParam) -> Self {
        Self::Between { field: check_field(field), low: low.to_param(), high: high.to_param() }
    }

    /// Disables the exact (case-sensitive) match on a direct string comparison.
    #[must_use]
    pub fn not_exact(self) -> Self {
        match self {
            Self::Direct { field, op, value, .. } => Self::Direct { field, op, value, exact: false },
            other => other,
        }
    }

    /// Renders the filter, storing its values in `params`. Empty groups render as "".
    pub fn rql(&self, params: &mut Params) -> String {
        match self {
            Self::And(children) => render_group(children, " and ", params),
            Self::Or(children) => render_group(children, " or ", params),
            Self::Not(inner) => {
                let rendered = inner.rql(params);
                if rendered.is_empty() { rendered } else { format!("not ({rendered})") }
            }
            Self::Direct { field, op, value, exact } => {
                let p = params.add(value.clone());
                let exact = *exact && value.is_string() && matches!(op, Operator::Eq | Operator::NotEq);
                if exact { format!("exact({field} {op} {p})") } else { format!("{field} {op} {p}") }
            }
            Self::In { field, values } => {
                let p = params.add(Value::Array(values.clone()));
                format!("{field} in ({p})")
            }
            Self::ContainsAll { field, values } => {
                let p = params.add(Value::Array(values.clone()));
                format!("{field} all in ({p})")
            }
            Self::StartsWith { field, prefix } => {
                let p = params.add(Value::String(prefix.clone()));
                format!("startsWith({field}, {p})")
            }
            Self::EndsWith { field, suffix } => {
                let p = params.add(Value::String(suffix.clone()));
                format!("endsWith({field}, {p})")
            }
            Self::Search { field, terms } => {
                let p = params.add(Value::String(terms.clone()));
                format!("search({field}, {p})")
            }
            Self::HasField { field } => format!("exists({field})"),
            Self::Between { field, low, high } => {
                let lo = params.add(low.clone());
                let hi = params.add(high.clone());
                format!("{field} between {lo} and {hi}")
            }
        }
    }
}

fn render_group(children: &[Filter], joiner: &str, params: &mut Params) -> String {
    let rendered: Vec<String> =
        children.iter().map(|c| c.rql(params)).filter(|s| !s.is_empty()).collect();
    match rendered.len() {
        0 => String::new(),
        1 => rendered.into_iter().next().unwrap_or_default(),
        _ => format!("({})", rendered.join(joiner)),
    }
}
