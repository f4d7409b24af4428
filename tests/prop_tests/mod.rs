// Property suites for query compilation.
#[path = "prop_filter.rs"]
mod filter_props;
#[path = "prop_query.rs"]
mod query_props;
