use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Concept, Constraints, ImageRef};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("API key is missing")] MissingCredentials,
    #[error("HTTP error: {0}")] Http(String),
    #[error("status={status} body={body}")] Status { status: u16, body: String },
    #[error("malformed response: {0}")] Malformed(String),
    #[error("no image data in response")] NoImage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdeaRequest {
    Fresh { keyword: String, constraints: Constraints },
    /// `concept` never carries image references.
    Refine { concept: Concept, instruction: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStyle {
    Photo,
    Sketch,
}

impl ImageStyle {
    pub fn prompt_suffix(self) -> &'static str {
        match self {
            ImageStyle::Photo => ", high quality, professional food photography, 8k resolution, photorealistic, soft lighting, appetizing, patisserie style, elegant plating",
            ImageStyle::Sketch => ", simple black and white pencil sketch, hand drawn style, cookbook illustration, minimalist, white background, high contrast, line art only",
        }
    }

    pub fn aspect_ratio(self) -> &'static str { "1:1" }
}

/// Synthesizes a confection concept from a keyword or from an existing concept plus an instruction.
#[async_trait]
pub trait IdeaGenerator: Send + Sync {
    async fn generate_idea(&self, request: &IdeaRequest) -> Result<Concept, GenerationError>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, prompt: &str, style: ImageStyle) -> Result<ImageRef, GenerationError>;
}
