//! MongoDB store. Wire documents are separate from the domain models so the
//! bson representation (bson dates, counter docs) never leaks upward.

mod models;
mod store;

pub use store::MongoStore;
