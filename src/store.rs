pub mod dao;
pub mod models;

pub use dao::{ListingDao, MemoryDao, PgDao};
pub use models::CleanListing;
