use thiserror::Error;

/// Everything that can go wrong between the form and the provider.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("no OpenAI API key provided")]
    MissingCredential,

    #[error("API key does not look like an OpenAI key")]
    MalformedCredential,

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("temperature {0} is outside 0.0..=2.0")]
    InvalidTemperature(f32),

    #[error("unsupported image: {0}")]
    UnsupportedImage(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OpenAI API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("OpenAI stream error: {0}")]
    Stream(String),

    #[error("reply stream ended before completion")]
    StreamIncomplete,
}

impl ChatError {
    pub fn unsupported_image(msg: impl Into<String>) -> Self {
        Self::UnsupportedImage(msg.into())
    }

    /// Credential problems are caught before any network access.
    pub fn is_credential(&self) -> bool {
        matches!(self, Self::MissingCredential | Self::MalformedCredential)
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::UnknownModel(_) | Self::InvalidTemperature(_) | Self::UnsupportedImage(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
