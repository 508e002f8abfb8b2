// Database layer module
// SQLite connection pool, embedded migrations and repositories

pub mod pool;
pub mod repositories;

pub use pool::DbPool;
