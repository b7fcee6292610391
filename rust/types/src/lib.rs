mod aggregation;
mod bucket;
mod eval;
mod query;
mod record;
mod stats;
mod value;

pub use aggregation::*;
pub use bucket::*;
pub use eval::*;
pub use query::*;
pub use record::*;
pub use stats::*;
pub use value::*;
