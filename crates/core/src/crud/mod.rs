mod engine;
mod query_builder;
mod sql_to_json;

pub use engine::CrudEngine;
pub use query_builder::{BoundValue, BuiltQuery, QueryBuilder};
