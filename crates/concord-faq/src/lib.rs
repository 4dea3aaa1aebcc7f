pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{FaqError, Result};
pub use store::{FaqStore, RebuildTrigger};
pub use types::{FaqCreate, FaqRecord, FaqSlugStrategy, FaqUpdate};
