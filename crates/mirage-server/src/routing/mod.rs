//! Route registration, lookup and duplicate disambiguation.

mod query;
mod table;

pub use query::{parse_query_string, stable_params};
pub use table::{to_router_pattern, ResolvedRoute, RouteTable};
