pub mod database;
pub mod error;
pub mod memory;
pub(crate) mod rows;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use database::Database;
pub use error::StoreError;
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use store::StateStore;
