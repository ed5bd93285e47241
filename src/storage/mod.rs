pub mod file_sink;
pub mod postgres_client;
pub mod trip_store;

pub use postgres_client::PostgresStorage;
pub use trip_store::TripStore;
