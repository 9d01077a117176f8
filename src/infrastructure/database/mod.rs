pub mod connection_pool;
pub mod mutation_log;

pub use connection_pool::ConnectionPool;
pub use mutation_log::SqliteMutationLog;
