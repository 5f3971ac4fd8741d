pub mod config;
pub mod desire;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use desire::{Desire, DesireStatus, DesireUpdate, OutcomeReview, Plan, PlanStep, Verdict};
pub use error::{AnimaError, Result};
pub use event::EventBus;
pub use types::*;
