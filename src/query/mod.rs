//! Log query types and the query planner.

mod filter;
mod planner;

pub use filter::{LogQuery, TOPIC_POSITIONS, filter_logs};
pub use planner::{QueryKind, QueryPlanner};
