//! Model that returns its prompt unchanged. Used for offline runs and tests.

use async_trait::async_trait;

use super::LanguageModel;
use crate::error::UpstreamError;

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoModel;

#[async_trait]
impl LanguageModel for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, prompt: &str, _model: &str) -> Result<String, UpstreamError> {
        Ok(prompt.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo() {
        let out = EchoModel.generate("[EMAIL:ABCDEFGH] hi", "any").await.unwrap();
        assert_eq!(out, "[EMAIL:ABCDEFGH] hi");
    }
}
