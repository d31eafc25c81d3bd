/// Failures of a single scene. The `Display` text is what ends up in the scene's error field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("Scene prompt \"{prompt}\" does not mention any defined characters with a base image.")]
    NoReferencedCharacters { prompt: String },

    #[error("API did not return an image. Response: \"{text}\"")]
    TextInsteadOfImage { text: String },

    #[error("API did not return an image or text error.")]
    EmptyResponse,

    #[error("{message}")]
    Api { message: String },
}

pub const UNKNOWN_API_ERROR: &str = "An unknown error occurred with the API.";

impl GenerationError {
    /// Wraps an upstream message verbatim, falling back to a generic one when it is blank.
    pub fn api(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            Self::Api {
                message: UNKNOWN_API_ERROR.to_string(),
            }
        } else {
            Self::Api { message }
        }
    }

    /// Builds the "no image" failure from whatever text the API returned.
    pub fn missing_image(text: Option<&str>) -> Self {
        match text.map(str::trim).filter(|t| !t.is_empty()) {
            Some(text) => Self::TextInsteadOfImage {
                text: text.to_string(),
            },
            None => Self::EmptyResponse,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("A generation run is already in progress")]
    RunInProgress,
}
