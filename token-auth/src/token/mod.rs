//! Token persistence and refresh coordination.

mod coordinator;
mod data;
mod storage;
mod store;

pub use coordinator::RefreshCoordinator;
pub use data::TokenData;
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use store::TokenStore;
