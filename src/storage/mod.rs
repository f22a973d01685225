mod feeds;
mod schema;
mod store;
mod types;

pub use schema::Database;
pub use store::FeedStore;
pub use types::DatabaseError;
