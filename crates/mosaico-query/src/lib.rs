//! Client-side query planner: typed expressions over the catalog and the
//! ontology data, schema-driven field proxies whose operators emit validated
//! expressions, and the builders combining them into the wire payload.
mod expressions;
pub use expressions::*;

mod proxy;
pub use proxy::*;

mod builders;
pub use builders::*;

mod error;
pub use error::*;
