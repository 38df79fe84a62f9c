pub mod operations;
pub mod schema;


pub use operations::{Database, DbError};
pub use schema::{initialize_schema, run_migrations};
