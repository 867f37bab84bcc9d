pub mod config;
pub mod error;
pub mod invoker;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod persist;
pub mod preview;
pub mod resources;
pub mod seed;
#[cfg(feature = "server")]
pub mod server;
pub mod service;
pub mod stages;

pub use config::{Config, PreviewConfig, ResourceConfig};
pub use error::{CascadeError, Result};
pub use invoker::StageInvoker;
pub use models::*;
pub use orchestrator::GenerationOrchestrator;
pub use persist::OutputPersister;
pub use preview::{PreviewExtractor, PreviewSink, PreviewerWeights};
pub use resources::{Device, ResourceManager, ResourcePlan};
pub use seed::{RandomGenerator, Seed, SeedController};
pub use service::{CascadeService, ServiceState};
pub use stages::{DecoderStage, PriorSolver, PriorStage};
