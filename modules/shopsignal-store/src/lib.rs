pub mod error;
pub mod page_store;
#[cfg(any(test, feature = "test-utils"))]
pub mod testutil;

pub use error::{Result, StoreError};
pub use page_store::{PageStore, PgPageStore};
