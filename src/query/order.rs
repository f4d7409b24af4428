use crate::model::{FieldDescriptor, FieldKind, field_kind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Alpha,
    AlphaNumeric,
    Long,
    Double,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderField {
    pub field: String,
    pub kind: OrderKind,
    pub descending: bool,
}

impl OrderField {
    pub(crate) fn rql(&self) -> String {
        let mut out = self.field.clone();
        match self.kind {
            OrderKind::Alpha => {}
            OrderKind::AlphaNumeric => out.push_str(" as alphaNumeric"),
            OrderKind::Long => out.push_str(" as long"),
            OrderKind::Double => out.push_str(" as double"),
        }
        if self.descending {
            out.push_str(" desc");
        }
        out
    }
}

/// Splits a leading `-` off a field. Rejects whitespace and commas.
pub(crate) fn parse_order(spec: &str) -> (String, bool) {
    let (field, descending) = match spec.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (spec, false),
    };
    if field.is_empty() || field.contains(char::is_whitespace) || field.contains(',') {
        panic!("invalid order field {spec:?}: order by one field per call, prefixed with '-' for descending");
    }
    (field.to_string(), descending)
}

/// Chooses the ordering of a model field from its declared kind.
pub(crate) fn detect(collection: &str, fields: &[FieldDescriptor], field: &str) -> OrderKind {
    match field_kind(fields, field) {
        Some(FieldKind::String | FieldKind::Date | FieldKind::DateTime) => OrderKind::Alpha,
        Some(FieldKind::Integer) => OrderKind::Long,
        Some(FieldKind::Float) => OrderKind::Double,
        Some(kind) => panic!("cannot order {collection} by {field}: unsupported field kind {kind:?}"),
        None => panic!("cannot order {collection} by {field}: unknown field"),
    }
}
