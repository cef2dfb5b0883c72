use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, error};

use crate::config::AppConfig;
use crate::generator::{GenerationError, IdeaGenerator, IdeaRequest, ImageGenerator, ImageStyle};
use crate::models::{Concept, ImageRef};

const PERSONA: &str = "You are a world-renowned pastry chef and business consultant.";

const OUTPUT_RULES: &str = "Respond in JSON with the following fields.
1. name: a catchy, delicious-sounding product name.
2. description: about 150 characters conveying the flavour, texture and visual appeal.
3. ingredients: approximate amounts and an estimated cost in Japanese yen per piece.
4. recipe: 6 to 8 concrete, detailed steps as a professional patissier would teach them. Each step has a description and an English prompt (visualPrompt) for a simple line-art sketch of that step.
5. totalCost: the sum of the ingredient costs.
6. suggestedPrice: follow the target price if one is given, otherwise aim for a cost ratio of 30% to 40%.
7. profitMargin: the resulting profit margin in percent.
8. visualPrompt: a detailed English prompt telling an image model what the finished confection looks like.";

// Replaces long base64 payloads so raw responses stay readable in debug logs.
fn redact_inline_data(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                match val {
                    Value::String(s) if key == "data" && s.chars().count() > 100 => {
                        let head: String = s.chars().take(50).collect();
                        *val = Value::String(format!("{}...[truncated {} chars]", head, s.chars().count() - 50));
                    }
                    _ => redact_inline_data(val),
                }
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(redact_inline_data),
        _ => {}
    }
}

/// Gemini `generateContent` client backing both the idea and the image generator.
pub struct GeminiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    text_model: String,
    image_model: String,
}

impl GeminiClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.api_base.clone(),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
        }
    }

    async fn generate_content(&self, model: &str, body: &Value) -> Result<GeminiResponse, GenerationError> {
        let api_key = self.api_key.as_deref().ok_or(GenerationError::MissingCredentials)?;
        let url = format!("{}/models/{}:generateContent?key={}", self.base_url, model, api_key);

        info!("🔗 Making request to: {}", url.replace(api_key, "***"));

        let response = self.client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::Http(e.to_string()))?;

        let status = response.status();
        let response_text = response.text().await
            .map_err(|e| GenerationError::Http(e.to_string()))?;

        if !status.is_success() {
            error!("❌ Gemini API error {}: {}", status, response_text);
            return Err(GenerationError::Status { status: status.as_u16(), body: response_text });
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            if let Ok(mut value) = serde_json::from_str::<Value>(&response_text) {
                redact_inline_data(&mut value);
                debug!("📥 Raw Gemini response: {}", value);
            }
        }

        serde_json::from_str(&response_text)
            .map_err(|e| GenerationError::Malformed(format!("response envelope: {e}")))
    }

    pub fn build_idea_prompt(request: &IdeaRequest) -> Result<String, GenerationError> {
        match request {
            IdeaRequest::Fresh { keyword, constraints } => {
                let mut constraint_lines = String::new();
                if let Some(cost) = &constraints.target_cost {
                    constraint_lines.push_str(&format!(
                        "\n- Target cost: around {cost} JPY. Adjust the ingredients so their total cost approaches this amount."
                    ));
                }
                if let Some(price) = &constraints.target_price {
                    constraint_lines.push_str(&format!("\n- Target price: around {price} JPY."));
                }
                if constraint_lines.is_empty() {
                    constraint_lines.push_str(" None");
                }
                Ok(format!(
                    "{PERSONA}\nCreate an original, appealing new confection based on the keyword \"{keyword}\".\n\n\
                     Constraints:{constraint_lines}\n\n\
                     Ingredient costs should approach the target cost when one is given.\n{OUTPUT_RULES}"
                ))
            }
            IdeaRequest::Refine { concept, instruction } => {
                let current = serde_json::to_string(concept)
                    .map_err(|e| GenerationError::Malformed(format!("serializing current concept: {e}")))?;
                Ok(format!(
                    "{PERSONA}\nImprove the existing confection below according to the client's request.\n\n\
                     Current confection:\n{current}\n\n\
                     Client request:\n\"{instruction}\"\n\n\
                     Update the data to reflect this request. Keep every related field consistent: \
                     name, description, ingredients, recipe, costs and image prompts. \
                     Recipe steps must stay concrete and detailed.\n{OUTPUT_RULES}"
                ))
            }
        }
    }

    pub fn idea_request_body(prompt: &str) -> Value {
        json!({
            "contents": [{
                "parts": [{"text": prompt}]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": concept_schema()
            }
        })
    }

    pub fn image_request_body(prompt: &str, style: ImageStyle) -> Value {
        json!({
            "contents": [{
                "parts": [{"text": format!("{prompt}{}", style.prompt_suffix())}]
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": { "aspectRatio": style.aspect_ratio() },
                "candidateCount": 1
            }
        })
    }
}

fn concept_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "name": { "type": "STRING" },
            "description": { "type": "STRING" },
            "ingredients": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": { "type": "STRING" },
                        "amount": { "type": "STRING" },
                        "cost": { "type": "NUMBER" }
                    },
                    "required": ["name", "amount", "cost"]
                }
            },
            "recipe": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "step": { "type": "INTEGER" },
                        "description": { "type": "STRING" },
                        "visualPrompt": { "type": "STRING" }
                    },
                    "required": ["step", "description", "visualPrompt"]
                }
            },
            "totalCost": { "type": "NUMBER" },
            "suggestedPrice": { "type": "NUMBER" },
            "profitMargin": { "type": "STRING" },
            "visualPrompt": { "type": "STRING" }
        },
        "required": ["name", "description", "ingredients", "recipe", "totalCost", "suggestedPrice", "profitMargin", "visualPrompt"]
    })
}

#[async_trait]
impl IdeaGenerator for GeminiClient {
    async fn generate_idea(&self, request: &IdeaRequest) -> Result<Concept, GenerationError> {
        let prompt = Self::build_idea_prompt(request)?;
        info!("🎯 Generating concept with prompt (truncated): {}", prompt.chars().take(120).collect::<String>());
        let response = self.generate_content(&self.text_model, &Self::idea_request_body(&prompt)).await?;
        let concept = parse_concept(&response)?;
        info!("✅ Concept '{}' generated ({} ingredients, {} steps)", concept.name, concept.ingredients.len(), concept.recipe.len());
        Ok(concept)
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    async fn generate_image(&self, prompt: &str, style: ImageStyle) -> Result<ImageRef, GenerationError> {
        let response = self.generate_content(&self.image_model, &Self::image_request_body(prompt, style)).await?;
        decode_image(&response)
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate { #[serde(default)] content: Content }

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData
    },
    Text { text: String },
    Other(Value)
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType", default)]
    mime_type: String,
}

fn first_candidate_text(resp: &GeminiResponse) -> Option<String> {
    let candidate = resp.candidates.first()?;
    let text: String = candidate.content.parts.iter()
        .filter_map(|p| match p { Part::Text { text } => Some(text.as_str()), _ => None })
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    }
}

fn parse_concept(resp: &GeminiResponse) -> Result<Concept, GenerationError> {
    let text = first_candidate_text(resp)
        .ok_or_else(|| GenerationError::Malformed("no text generated".into()))?;
    let concept: Concept = serde_json::from_str(strip_code_fence(&text))
        .map_err(|e| GenerationError::Malformed(format!("concept JSON: {e}")))?;
    concept.validate().map_err(GenerationError::Malformed)?;
    Ok(concept.without_images())
}

fn decode_image(resp: &GeminiResponse) -> Result<ImageRef, GenerationError> {
    let inline = resp.candidates.iter()
        .flat_map(|c| c.content.parts.iter())
        .find_map(|p| match p { Part::Inline { inline_data } => Some(inline_data), _ => None })
        .ok_or(GenerationError::NoImage)?;

    let bytes = base64::engine::general_purpose::STANDARD.decode(inline.data.trim())
        .map_err(|e| GenerationError::Malformed(format!("inline image is not base64: {e}")))?;
    let format = image::guess_format(&bytes)
        .map_err(|e| GenerationError::Malformed(format!("inline data is not a recognised image: {e}")))?;
    debug!("🖼️ Decoded {:?} image ({} bytes, declared {})", format, bytes.len(), inline.mime_type);

    Ok(ImageRef::from_base64(format.to_mime_type(), inline.data.trim()))
}
