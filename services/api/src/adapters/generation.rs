//! services/api/src/adapters/generation.rs
//!
//! This module contains the adapter for the content-generation models.
//! It implements the `GenerationService` port from the core crate using an
//! OpenAI-compatible API: chat completions for text, image generation for pictures.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        chat::{
            ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
            CreateChatCompletionRequestArgs,
        },
        images::{CreateImageRequestArgs, Image, ImageModel, ImageResponseFormat, ImageSize},
    },
    Client,
};
use async_trait::async_trait;
use asset_history_core::{
    GenerationService, InteractionRequest, PortError, PortResult, ProductInfo, ScriptRequest,
};
use tracing::debug;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `GenerationService` using OpenAI-compatible models.
#[derive(Clone)]
pub struct OpenAiGenerationAdapter {
    client: Client<OpenAIConfig>,
    text_model: String,
    image_model: String,
}

impl OpenAiGenerationAdapter {
    /// Creates a new `OpenAiGenerationAdapter`.
    pub fn new(client: Client<OpenAIConfig>, text_model: String, image_model: String) -> Self {
        Self {
            client,
            text_model,
            image_model,
        }
    }

    /// Runs one system + user chat turn and returns the text of the first choice.
    async fn complete(&self, system: &str, user: String) -> PortResult<String> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(generation_error)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(generation_error)?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.text_model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(generation_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(generation_error)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Generation("Text model returned no content.".to_string())
            })
    }

    /// Generates one image and returns it as a URL or a data URL.
    async fn image(&self, prompt: String, size: ImageSize) -> PortResult<String> {
        let request = CreateImageRequestArgs::default()
            .prompt(prompt)
            .model(ImageModel::Other(self.image_model.clone()))
            .size(size)
            .response_format(ImageResponseFormat::B64Json)
            .n(1)
            .build()
            .map_err(generation_error)?;

        let response = self
            .client
            .images()
            .generate(request)
            .await
            .map_err(generation_error)?;

        match response.data.first().map(|image| image.as_ref()) {
            Some(Image::B64Json { b64_json, .. }) => Ok(format!("data:image/png;base64,{}", b64_json)),
            Some(Image::Url { url, .. }) => Ok(url.to_string()),
            None => Err(PortError::Generation(
                "Image model returned no images.".to_string(),
            )),
        }
    }
}

fn generation_error(e: OpenAIError) -> PortError {
    PortError::Generation(e.to_string())
}

//=========================================================================================
// Response Parsing
//=========================================================================================

/// Removes a surrounding Markdown code fence, if the model added one.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    // Drop an info string such as `json` on the opening fence line.
    match inner.split_once('\n') {
        Some((first, rest)) if !first.trim().starts_with(['{', '[']) => rest.trim(),
        _ => inner.trim(),
    }
}

fn parse_product(text: &str, pid: &str) -> PortResult<ProductInfo> {
    let mut product: ProductInfo = serde_json::from_str(strip_code_fence(text)).map_err(|e| {
        PortError::Generation(format!("Product analysis was not valid JSON: {}", e))
    })?;
    if product.pid.trim().is_empty() {
        product.pid = pid.to_string();
    }
    Ok(product)
}

/// Accepts a JSON array of strings, falling back to one point per non-empty line.
fn parse_points(text: &str) -> Vec<String> {
    let body = strip_code_fence(text);
    if let Ok(points) = serde_json::from_str::<Vec<String>>(body) {
        return points
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }
    body.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c == '-' || c == '*' || c == '•')
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

//=========================================================================================
// `GenerationService` Trait Implementation
//=========================================================================================

const ANALYST_PROMPT: &str = "You are an e-commerce product analyst. Respond with ONLY a JSON object with the string fields pid, introduction, brand, country, category, price and an images field holding an array of product image URLs. Use empty strings when a value is unknown.";

const COPYWRITER_PROMPT: &str = "You are a short-video e-commerce copywriter who writes for conversion.";

#[async_trait]
impl GenerationService for OpenAiGenerationAdapter {
    async fn analyze_product(&self, pid: &str) -> PortResult<ProductInfo> {
        let text = self
            .complete(
                ANALYST_PROMPT,
                format!(
                    "Analyze the e-commerce product with PID {}. Extract its name and description, brand, country, detailed category and estimated price.",
                    pid
                ),
            )
            .await?;
        parse_product(&text, pid)
    }

    async fn generate_three_view(&self, product: &ProductInfo) -> PortResult<String> {
        let prompt = format!(
            "A white-background three-view product sheet: front, back and side views arranged side by side. Photorealistic studio lighting. Product: {}",
            product.introduction
        );
        self.image(prompt, ImageSize::S1792x1024).await
    }

    async fn generate_interaction(
        &self,
        product: &ProductInfo,
        request: &InteractionRequest,
    ) -> PortResult<String> {
        if request.model_image.is_some() {
            // The image generation endpoint takes no reference images.
            debug!("Ignoring model reference image for interaction generation");
        }
        let prompt = match request.custom_prompt.as_deref().map(str::trim) {
            Some(custom) if !custom.is_empty() => {
                format!("{} (Reference product: {})", custom, product.introduction)
            }
            _ => format!(
                "A model naturally wearing or using this product in an everyday scene, vertical 9:16 snapshot. Product: {}",
                product.introduction
            ),
        };
        self.image(prompt, ImageSize::S1024x1792).await
    }

    async fn generate_selling_points(&self, product: &ProductInfo) -> PortResult<Vec<String>> {
        let text = self
            .complete(
                COPYWRITER_PROMPT,
                format!(
                    "List the 5 core selling points of this product as a JSON array of short strings, nothing else. Product: {}",
                    product.introduction
                ),
            )
            .await?;
        let points = parse_points(&text);
        if points.is_empty() {
            return Err(PortError::Generation(
                "Text model returned no selling points.".to_string(),
            ));
        }
        Ok(points)
    }

    async fn generate_script(
        &self,
        product: &ProductInfo,
        request: &ScriptRequest,
    ) -> PortResult<String> {
        let mut prompt = format!(
            "Write a TikTok selling script for the product {} built on these selling points: {}. Include a hook, the core content and a call to action.",
            product.introduction,
            request.points.join("; ")
        );
        if !request.assets.is_empty() {
            prompt.push_str(&format!(
                " The video will use these generated visuals: {}.",
                request.assets.len()
            ));
        }
        if let Some(custom) = request.custom_prompt.as_deref().map(str::trim) {
            if !custom.is_empty() {
                prompt.push_str(&format!(" Additional requirements: {}", custom));
            }
        }
        self.complete(COPYWRITER_PROMPT, prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fenced_json() {
        assert_eq!(strip_code_fence("```json\n[\"a\"]\n```"), "[\"a\"]");
        assert_eq!(strip_code_fence("```[\"a\"]```"), "[\"a\"]");
        assert_eq!(strip_code_fence("  {\"pid\":\"1\"} "), "{\"pid\":\"1\"}");
    }

    #[test]
    fn parses_points_from_json_or_lines() {
        assert_eq!(parse_points("[\"Light\", \" \", \"Cheap\"]"), vec!["Light", "Cheap"]);
        assert_eq!(
            parse_points("1. Light\n- Cheap\n\n• Durable"),
            vec!["Light", "Cheap", "Durable"]
        );
    }

    #[test]
    fn product_pid_falls_back_to_requested_pid() {
        let product = parse_product("```json\n{\"introduction\":\"Mug\",\"images\":[]}\n```", "77")
            .unwrap();
        assert_eq!(product.pid, "77");
        assert_eq!(product.introduction, "Mug");

        assert!(matches!(
            parse_product("not json", "77"),
            Err(PortError::Generation(_))
        ));
    }
}
