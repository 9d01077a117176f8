pub mod channel;
pub mod database;
pub mod http;
