use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::config::ModelConfig;
use crate::error::{PilotError, PilotResult};

/// One structured-output request: a system message, a user message of text
/// plus at most one image, and the JSON schema the reply must satisfy.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub system: String,
    pub user_text: String,
    pub image_jpeg: Option<Vec<u8>>,
    pub schema_name: String,
    pub schema: Value,
}

impl StructuredRequest {
    pub fn new<T: JsonSchema>(name: &str, system: String, user_text: String) -> Self {
        Self {
            system,
            user_text,
            image_jpeg: None,
            schema_name: name.to_string(),
            schema: schema_of::<T>(),
        }
    }

    pub fn with_image(mut self, jpeg: Option<Vec<u8>>) -> Self {
        self.image_jpeg = jpeg;
        self
    }
}

/// Schema for `T` in the shape strict structured output accepts: every
/// property required (optional ones are already nullable), no extra
/// properties, no `default` or `format` keywords.
pub fn schema_of<T: JsonSchema>() -> Value {
    let root = SchemaSettings::draft2019_09()
        .into_generator()
        .into_root_schema_for::<T>();
    let mut schema = serde_json::to_value(root).unwrap_or(Value::Null);
    make_strict(&mut schema);
    schema
}

fn make_strict(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            map.remove("default");
            map.remove("format");
            if let Some(Value::Object(properties)) = map.get("properties") {
                let names: Vec<Value> = properties.keys().cloned().map(Value::String).collect();
                map.insert("required".into(), Value::Array(names));
                map.insert("additionalProperties".into(), Value::Bool(false));
            }
            for (key, value) in map.iter_mut() {
                match (key.as_str(), value) {
                    // Maps of name to schema; the names themselves are not keywords.
                    ("properties" | "$defs", Value::Object(named)) => {
                        named.values_mut().for_each(make_strict);
                    }
                    (_, value) => make_strict(value),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(make_strict),
        _ => {}
    }
}

/// The inference collaborator. `Ok(None)` means the model produced nothing usable.
#[async_trait]
pub trait StructuredModel: Send + Sync {
    async fn generate(&self, request: StructuredRequest) -> PilotResult<Option<Value>>;
}

/// Runs `request` and deserializes the reply; a non-conformant reply is `None`.
pub async fn generate_object<T: DeserializeOwned>(
    model: &dyn StructuredModel,
    request: StructuredRequest,
) -> PilotResult<Option<T>> {
    let name = request.schema_name.clone();
    let Some(value) = model.generate(request).await? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(object) => Ok(Some(object)),
        Err(e) => {
            tracing::warn!(target: "pilot::llm", schema = %name, error = %e, "reply did not match schema");
            Ok(None)
        }
    }
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiModel {
    client: Client,
    config: ModelConfig,
}

impl OpenAiModel {
    pub fn new(config: ModelConfig) -> PilotResult<Self> {
        if config.api_key.is_empty() {
            return Err(PilotError::Config("OPENAI_API_KEY not set in environment".into()));
        }
        Ok(Self {
            client: Client::new(),
            config,
        })
    }

    fn body(&self, request: &StructuredRequest) -> Value {
        let mut user = vec![json!({ "type": "text", "text": request.user_text })];
        if let Some(jpeg) = &request.image_jpeg {
            let encoded = base64::engine::general_purpose::STANDARD.encode(jpeg);
            user.push(json!({
                "type": "image_url",
                "image_url": { "url": format!("data:image/jpeg;base64,{encoded}") }
            }));
        }

        json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": user },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "strict": true,
                    "schema": request.schema,
                }
            }
        })
    }
}

#[async_trait]
impl StructuredModel for OpenAiModel {
    async fn generate(&self, request: StructuredRequest) -> PilotResult<Option<Value>> {
        let url = format!("{}/chat/completions", self.config.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.body(&request))
            .send()
            .await?;

        let status = response.status();
        let reply: Value = response.json().await?;

        if !status.is_success() {
            let message = reply["error"]["message"].as_str().unwrap_or("unknown API error");
            return Err(PilotError::Model(format!("API error ({status}): {message}")));
        }

        let Some(content) = reply["choices"][0]["message"]["content"].as_str() else {
            tracing::warn!(target: "pilot::llm", "reply had no content");
            return Ok(None);
        };
        tracing::debug!(target: "pilot::llm", schema = %request.schema_name, %content, "model replied");
        Ok(parse_content(content))
    }
}

/// Parses a JSON reply, tolerating markdown fences around it.
pub fn parse_content(content: &str) -> Option<Value> {
    let cleaned = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if cleaned.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(cleaned) {
        Ok(value) if value.is_object() => Some(value),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(target: "pilot::llm", error = %e, "reply was not JSON");
            None
        }
    }
}
