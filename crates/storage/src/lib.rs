pub mod cancel;
pub mod config;
pub mod dependency;
pub mod descriptor;
pub mod error;
pub mod filter;
pub mod records;
pub mod repository;
pub mod schema;
pub mod store;

pub use cancel::Cancel;
pub use config::StoreConfig;
pub use descriptor::{Record, TableDescriptor};
pub use error::StoreError;
pub use filter::SearchFilter;
pub use repository::{Scope, ScopeMode};
pub use store::Store;
