mod ordered_set;
mod table;

pub use ordered_set::OrderedSet;
pub use table::{RoutingTable, ServerRole};
