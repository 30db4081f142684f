pub mod agent;
pub mod cancel;
pub mod config;
pub mod error;

pub use agent::{load_agent_presets, AgentPreset, MemoryPolicy};
pub use cancel::CancelToken;
pub use config::Config;
pub use error::{Error, Result};
