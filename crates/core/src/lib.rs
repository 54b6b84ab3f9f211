pub mod capabilities;
pub mod config;
pub mod error;
pub mod store;
pub mod types;
pub mod updates;

pub use config::AppConfig;
pub use error::{ApplyError, ApplyErrorKind, CampaignError, CampaignResult, RecommendationConflict};
pub use store::InMemoryStore;
pub use updates::RecommendationUpdate;
