pub mod analyst_client;
pub mod repository;

pub use analyst_client::*;
pub use repository::*;
