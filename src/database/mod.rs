// Database module
// SQLite holds services, their embedding vectors and the expiring result cache

pub mod sqlite;

pub use sqlite::*;
