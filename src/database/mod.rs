pub mod manager;
pub mod scope;

pub use manager::{DatabaseError, DatabaseManager};
pub use scope::{Bind, Op, ScopedQuery};
