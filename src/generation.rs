use crate::error::ApiError;
use async_trait::async_trait;

/// Image attached to a prompt, sent inline.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub image: Option<InlineImage>,
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
            temperature: None,
        }
    }

    pub fn with_image(mut self, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.image = Some(InlineImage {
            mime_type: mime_type.into(),
            data,
        });
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A text generation service. Rate-limit responses must surface as
/// [`ApiError::RateLimited`] so callers can retry them.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ApiError>;
}

/// Strip a markdown code fence from model output before JSON parsing.
///
/// A ```` ```json ```` fence wins over a bare ```` ``` ```` one; text with no
/// fence is returned trimmed.
pub fn strip_json_fence(text: &str) -> &str {
    if let Some((_, rest)) = text.split_once("```json") {
        let body = rest.split_once("```").map_or(rest, |(body, _)| body);
        return body.trim();
    }
    let mut parts = text.split("```");
    match (parts.next(), parts.next()) {
        (Some(_), Some(body)) => body.trim(),
        _ => text.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fence() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nanything else";
        assert_eq!(strip_json_fence(text), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_bare_fence() {
        let text = "```\n[1, 2]\n```";
        assert_eq!(strip_json_fence(text), "[1, 2]");
    }

    #[test]
    fn test_unterminated_json_fence() {
        assert_eq!(strip_json_fence("```json {\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn test_no_fence_is_trimmed() {
        assert_eq!(strip_json_fence("  {\"a\": 1}\n"), "{\"a\": 1}");
    }

    #[test]
    fn test_request_builder() {
        let request = GenerationRequest::text("describe")
            .with_image("image/png", vec![1, 2, 3])
            .with_temperature(0.3);
        assert_eq!(request.prompt, "describe");
        assert_eq!(request.image.as_ref().unwrap().mime_type, "image/png");
        assert_eq!(request.temperature, Some(0.3));
    }
}
