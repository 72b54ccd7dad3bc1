//! The SQLite-backed Gallery Store (spec §4.6): schema, PIN digesting, and the
//! `GalleryStore` implementation consumed by `voxkey-server`.

pub mod error;
pub mod pin;
pub mod schema;
pub mod store;

pub use error::PersistenceError;
pub use store::SqliteGalleryStore;
