pub mod backend;
pub mod bridge;
pub mod llama;
pub mod mock;
pub mod sampling;

pub use backend::{EngineBackend, GenerateRequest};
pub use bridge::{spawn_bridge, BridgeItem, EngineStream};
pub use llama::LlamaCppEngine;
pub use mock::MockEngine;
pub use sampling::{merge_sampling, ResolvedSampling};
