//! Query executor: filter grammar, index planning, hot/cold execution,
//! aggregation, ordering, and pagination.

pub mod aggregate;
pub mod exec;
pub mod filter;
pub mod plan;

pub use aggregate::{AggFunc, AggSpec, OrderKey};
pub use exec::{execute, QuerySpec};
pub use filter::{compare_values, like_matches, CmpOp, Filter};
pub use plan::{plan, Plan};
