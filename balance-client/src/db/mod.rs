pub mod reading_queries;

pub use reading_queries::{init_schema, insert_reading_if_absent, readings_since};
