pub mod analyst_client;
pub mod database;
pub mod observability;

pub use analyst_client::HttpAnalystClient;
pub use database::*;
pub use observability::*;
