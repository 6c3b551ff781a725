//! Boundary to the hosted generative-AI service.
//!
//! The controller only sees the traits in this module; error classification
//! happens once, here, so callers never inspect raw error payloads.

pub mod gemini;
#[cfg(test)]
pub mod scripted;

use async_trait::async_trait;
use thiserror::Error;

use crate::history::Turn;

pub use gemini::GeminiGateway;

pub const QUOTA_EXCEEDED_TEXT: &str =
    "You've exceeded your API quota. Please check your plan and billing details.";
pub const UNKNOWN_ERROR_TEXT: &str = "An unknown error occurred.";
pub const IMAGE_REFUSED_TEXT: &str =
    "Failed to generate images. The model may have refused the prompt.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The remote reported `RESOURCE_EXHAUSTED`.
    #[error("{}", QUOTA_EXCEEDED_TEXT)]
    QuotaExhausted,
    /// The remote returned an error envelope with a readable message.
    #[error("{0}")]
    Remote(String),
    /// Transport or local failure.
    #[error("{}", .0.as_deref().unwrap_or(UNKNOWN_ERROR_TEXT))]
    Generic(Option<String>),
}

impl GatewayError {
    pub fn generic(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            GatewayError::Generic(None)
        } else {
            GatewayError::Generic(Some(message))
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::generic(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub web_search: bool,
}

/// A source the model cited for a grounded answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub uri: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// A remote conversation that accumulates turns across sends.
#[async_trait]
pub trait ConversationContext: Send {
    /// Sends a prompt. On success both the prompt and the answer become part
    /// of the context; on failure the context is unchanged.
    async fn send(&mut self, prompt: &str, options: SendOptions) -> Result<Reply, GatewayError>;

    /// Turns the next request will carry.
    #[cfg(test)]
    fn turns(&self) -> &[Turn];
}

#[async_trait]
pub trait Gateway: Send + Sync {
    fn create_context(&self, prior_turns: Vec<Turn>) -> Box<dyn ConversationContext>;

    /// Returns base64 JPEG payloads. Never touches any conversation context.
    async fn generate_images(&self, prompt: &str) -> Result<Vec<String>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_text() {
        assert_eq!(GatewayError::QuotaExhausted.to_string(), QUOTA_EXCEEDED_TEXT);
        assert_eq!(
            GatewayError::Remote("Invalid prompt".into()).to_string(),
            "Invalid prompt"
        );
        assert_eq!(GatewayError::generic("").to_string(), UNKNOWN_ERROR_TEXT);
        assert_eq!(
            GatewayError::generic("connection reset").to_string(),
            "connection reset"
        );
    }
}
