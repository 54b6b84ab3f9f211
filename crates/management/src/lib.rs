//! Recommendation implementation — the bounded execution queue, its
//! background service and a sandbox advertising platform.

pub mod queue;
pub mod sandbox;
pub mod service;

pub use queue::{
    ChangePreview, ImplementationQueue, ImplementationResult, QueueItem, QueueOptions, QueueState,
};
pub use sandbox::{CampaignSettings, SandboxPlatform, StaticIdentityProvider};
pub use service::ImplementationService;
