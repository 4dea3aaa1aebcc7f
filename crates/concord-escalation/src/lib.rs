pub mod db;
pub mod error;
pub mod repository;
pub mod types;

pub use error::{EscalationError, Result};
pub use repository::{DeliveryHandle, EscalationRepository, LearningSink};
pub use types::{
    AdminAction, EscalationCreate, EscalationFilter, EscalationRecord, EscalationStatus, FilterField,
    GeneratedFaq, LearningSignal,
};
