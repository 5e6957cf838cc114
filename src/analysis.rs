//! Downstream image analysis.
//!
//! The gate hands a validated base64 image to an [`Analyzer`] and relays the
//! resulting JSON object. With no API key configured a [`DemoAnalyzer`]
//! serves canned results instead.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::sync::LazyLock;
use std::time::Duration;

use crate::config::Config;
use crate::error::ProxyError;

pub type Analysis = Map<String, Value>;

const INSTRUCTIONS: &str = r#"Analyze this AI-generated image and provide:
1. The likely prompt used to generate it (be detailed)
2. Negative prompt (what was likely excluded)
3. The AI model used (Midjourney, DALL-E, Stable Diffusion, etc.)
4. Confidence percentage (0-100)
5. Art style
6. 3-5 relevant tags

Respond in JSON format:
{
  "prompt": "...",
  "negativePrompt": "...",
  "model": "...",
  "confidence": 90,
  "style": "...",
  "tags": ["...", "..."]
}"#;

static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid object pattern"));

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, image_base64: &str) -> Result<Analysis, ProxyError>;

    /// Whether results are canned rather than produced by the model.
    fn is_demo(&self) -> bool {
        false
    }
}

/// Gemini `generateContent` client.
pub struct GeminiAnalyzer {
    http: Client,
    api_base: String,
    model: String,
    api_key: String,
}

impl GeminiAnalyzer {
    pub fn new(api_key: &str, api_base: &str, model: &str, timeout: Duration) -> Result<Self, ProxyError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    fn request_body(image_base64: &str) -> Value {
        json!({
            "contents": [{
                "parts": [
                    { "text": INSTRUCTIONS },
                    { "inline_data": { "mime_type": "image/png", "data": image_base64 } }
                ]
            }]
        })
    }
}

#[async_trait]
impl Analyzer for GeminiAnalyzer {
    async fn analyze(&self, image_base64: &str) -> Result<Analysis, ProxyError> {
        let response = self
            .http
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::request_body(image_base64))
            .send()
            .await
            .map_err(|e| ProxyError::Internal(e.to_string()))?;

        let status = response.status();
        let data: Value = response
            .json()
            .await
            .map_err(|e| ProxyError::Downstream {
                error: "Gemini API error".to_string(),
                details: Some(e.to_string()),
            })?;

        if !status.is_success() {
            tracing::error!(status = status.as_u16(), body = %data, "Gemini API error");
            return Err(ProxyError::Downstream {
                error: "Gemini API error".to_string(),
                details: data["error"]["message"].as_str().map(str::to_string),
            });
        }

        parse_reply(&data)
    }
}

/// Pull the JSON object out of the model's text reply.
pub fn parse_reply(data: &Value) -> Result<Analysis, ProxyError> {
    let text = data["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ProxyError::downstream("No response from Gemini"))?;

    JSON_OBJECT
        .find(text)
        .and_then(|m| serde_json::from_str::<Analysis>(m.as_str()).ok())
        .ok_or_else(|| ProxyError::downstream("Could not parse Gemini response"))
}

/// Serves canned analyses when no model key is configured.
#[derive(Debug, Default)]
pub struct DemoAnalyzer;

impl DemoAnalyzer {
    fn samples() -> [Value; 3] {
        [
            json!({
                "prompt": "cinematic portrait of a cyberpunk street samurai, neon lights reflecting off rain-slicked streets, highly detailed, 8k resolution, octane render, unreal engine 5, volumetric lighting --ar 16:9 --v 5.2",
                "negativePrompt": "blurry, low quality, distorted, bad anatomy, watermark, text, signature",
                "model": "Midjourney v5.2",
                "confidence": 94,
                "style": "Cyberpunk, Cinematic",
                "tags": ["cyberpunk", "portrait", "neon", "cinematic"]
            }),
            json!({
                "prompt": "ethereal fantasy landscape with floating islands, bioluminescent plants, magical aurora in the sky, studio ghibli style, soft watercolor textures, dreamy atmosphere --ar 16:9 --v 5",
                "negativePrompt": "realistic, photograph, harsh lighting, modern elements",
                "model": "Midjourney v5",
                "confidence": 87,
                "style": "Fantasy, Anime",
                "tags": ["fantasy", "landscape", "ghibli", "magical"]
            }),
            json!({
                "prompt": "hyperrealistic close-up of a mechanical eye, intricate gears and circuits visible, golden and brass tones, macro photography style, dramatic lighting, steampunk aesthetic",
                "negativePrompt": "organic, blurry, low detail, cartoon",
                "model": "Stable Diffusion XL",
                "confidence": 91,
                "style": "Steampunk, Macro",
                "tags": ["steampunk", "macro", "mechanical", "detailed"]
            }),
        ]
    }
}

#[async_trait]
impl Analyzer for DemoAnalyzer {
    async fn analyze(&self, _image_base64: &str) -> Result<Analysis, ProxyError> {
        let samples = Self::samples();
        let sample = samples
            .choose(&mut rand::thread_rng())
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| ProxyError::Internal("no demo responses available".to_string()))?;
        Ok(sample)
    }

    fn is_demo(&self) -> bool {
        true
    }
}

/// Pick the analyzer for this deployment.
pub fn from_config(config: &Config) -> Result<Box<dyn Analyzer>, ProxyError> {
    match config.gemini_key() {
        Some(key) => Ok(Box::new(GeminiAnalyzer::new(
            key,
            &config.gemini_api_base,
            &config.gemini_model,
            config.analysis_timeout(),
        )?)),
        None => {
            tracing::warn!("GEMINI_API_KEY not set, serving demo responses");
            Ok(Box::new(DemoAnalyzer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(text: &str) -> Value {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
    }

    #[test]
    fn test_parse_fenced_json_reply() {
        let data = reply("Here you go:\n```json\n{\"prompt\": \"a cat\", \"confidence\": 80}\n```");
        let analysis = parse_reply(&data).unwrap();
        assert_eq!(analysis["prompt"], "a cat");
        assert_eq!(analysis["confidence"], 80);
    }

    #[test]
    fn test_missing_text() {
        let err = parse_reply(&json!({ "candidates": [] })).unwrap_err();
        assert_eq!(err.to_string(), "No response from Gemini");
    }

    #[test]
    fn test_unparsable_text() {
        let err = parse_reply(&reply("I cannot help with that.")).unwrap_err();
        assert_eq!(err.to_string(), "Could not parse Gemini response");

        let err = parse_reply(&reply("{not json}")).unwrap_err();
        assert_eq!(err.to_string(), "Could not parse Gemini response");
    }

    #[test]
    fn test_request_body_carries_image() {
        let body = GeminiAnalyzer::request_body("AAAA");
        assert_eq!(body["contents"][0]["parts"][1]["inline_data"]["data"], "AAAA");
        assert_eq!(body["contents"][0]["parts"][1]["inline_data"]["mime_type"], "image/png");
    }

    #[test]
    fn test_endpoint() {
        let analyzer = GeminiAnalyzer::new(
            "k",
            "https://generativelanguage.googleapis.com/v1beta/",
            "gemini-1.5-flash",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            analyzer.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[tokio::test]
    async fn test_demo_analyzer() {
        let analyzer = DemoAnalyzer;
        assert!(analyzer.is_demo());
        let analysis = analyzer.analyze("AAAA").await.unwrap();
        assert!(analysis.contains_key("prompt"));
        assert!(analysis.contains_key("tags"));
    }
}
