pub mod ai;
pub mod config;
pub mod credential;
pub mod error;
pub mod image;
pub mod model;
pub mod relay;
pub mod state;

// Re-export main types for convenience
pub use ai::{CompletionClient, CompletionRequest, FragmentStream, OpenAIClient};
pub use config::{
    Config, GenerationConfig, DEFAULT_TEMPERATURE, MAX_TOKENS, TEMPERATURE_RANGE, TEMPERATURE_STEP,
};
pub use credential::{env_api_key, ApiKey, API_KEY_ENV, KEY_MARKER};
pub use error::{ChatError, Result};
pub use image::encode_image;
pub use model::Model;
pub use relay::{Relay, ReplyStream};
pub use state::{Conversation, ImageUrl, Message, Part, Role};
