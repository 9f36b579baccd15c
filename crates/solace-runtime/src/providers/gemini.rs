//! Google Gemini provider (Generative Language API, v1beta).
//!
//! Gemini is the primary dialogue vendor. Its error envelope carries a
//! canonical status string (`RESOURCE_EXHAUSTED`, `UNAVAILABLE`, ...) and
//! often a `RetryInfo` detail; both are mapped onto [`ProviderError`] here
//! so nothing downstream has to read error text.

use super::{
    classify_status, hint_from_secs, map_transport_error, parse_retry_after_header,
    retry_hint_from_message, secrets::ApiCredential, CompletionConfig, CompletionResponse,
    LlmProvider, ProviderError, ProviderFactory, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use solace_core::{Conversation, Role};
use std::sync::Arc;
use std::time::Duration;

pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Gemini REST client.
pub struct GeminiProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GeminiProvider {
    /// Build from JSON settings: `api_key` (or `GEMINI_API_KEY`) and an
    /// optional `base_url`.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            GEMINI_API_KEY_ENV,
            "Gemini API key",
        )?;

        let base_url = config["base_url"]
            .as_str()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            credential,
            base_url,
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: String,
        body: &B,
        timeout: Duration,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.credential.expose())
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, timeout))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after_header);
        let body = response.text().await.unwrap_or_default();

        Err(map_gemini_error(status.as_u16(), &body, retry_after))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CountRequest {
    generate_content_request: CountContentRequest,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CountContentRequest {
    model: String,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountResponse {
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

/// `name` is `models/<id>`.
#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<JsonValue>,
}

fn text_content(role: Option<&str>, text: &str) -> Content {
    Content {
        role: role.map(str::to_string),
        parts: vec![Part {
            text: Some(text.to_string()),
        }],
    }
}

/// Split a conversation into Gemini `contents` plus a system instruction.
///
/// System-role messages are folded into the instruction after the
/// conversation's own instruction.
fn to_gemini(conversation: &Conversation) -> (Vec<Content>, Option<Content>) {
    let mut system: Vec<&str> = conversation.system_instruction.iter().map(String::as_str).collect();
    let mut contents = Vec::with_capacity(conversation.messages.len());

    for message in &conversation.messages {
        match message.role {
            Role::System => system.push(&message.content),
            Role::User => contents.push(text_content(Some("user"), &message.content)),
            Role::Assistant => contents.push(text_content(Some("model"), &message.content)),
        }
    }

    let instruction = (!system.is_empty()).then(|| text_content(None, &system.join("\n\n")));
    (contents, instruction)
}

/// Translate a non-2xx Gemini response.
pub(crate) fn map_gemini_error(
    status: u16,
    body: &str,
    header_retry: Option<Duration>,
) -> ProviderError {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        let message: String = body.chars().take(300).collect();
        let retry = header_retry.or_else(|| retry_hint_from_message(&message));
        return classify_status(status, message, retry);
    };

    let ErrorBody {
        message,
        status: canonical,
        details,
    } = envelope.error;

    let retry_after = header_retry
        .or_else(|| details.iter().find_map(retry_delay))
        .or_else(|| retry_hint_from_message(&message));

    match canonical.as_deref() {
        Some("RESOURCE_EXHAUSTED") => ProviderError::RateLimited {
            retry_after,
            message,
        },
        Some("UNAVAILABLE") | Some("DEADLINE_EXCEEDED") => ProviderError::Unavailable {
            status,
            message,
        },
        Some("PERMISSION_DENIED") | Some("UNAUTHENTICATED") => ProviderError::AuthError(message),
        _ => classify_status(status, message, retry_after),
    }
}

/// `retryDelay` from a `google.rpc.RetryInfo` detail, e.g. `"37s"` or `"1.5s"`.
fn retry_delay(detail: &JsonValue) -> Option<Duration> {
    let raw = detail["retryDelay"].as_str()?;
    humantime::parse_duration(raw).ok().or_else(|| {
        raw.strip_suffix('s')?.parse::<f64>().ok().and_then(hint_from_secs)
    })
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn complete(
        &self,
        conversation: &Conversation,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let (contents, system_instruction) = to_gemini(conversation);
        let request = GenerateRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: config.temperature,
                max_output_tokens: config.max_tokens,
            },
        };

        let response = self
            .post(self.endpoint(&config.model, "generateContent"), &request, config.timeout)
            .await?;

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let usage = body.usage_metadata.unwrap_or_default();
        let candidate = body.candidates.into_iter().next();
        let stop_reason = candidate.as_ref().and_then(|c| c.finish_reason.clone());
        let content = candidate
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: usage.prompt_token_count,
                completion_tokens: usage.candidates_token_count,
            },
            model: body.model_version.unwrap_or_else(|| config.model.clone()),
            stop_reason,
        })
    }

    async fn count_tokens(
        &self,
        conversation: &Conversation,
        model: &str,
    ) -> Result<u32, ProviderError> {
        let (contents, system_instruction) = to_gemini(conversation);
        let request = CountRequest {
            generate_content_request: CountContentRequest {
                model: format!("models/{}", model),
                contents,
                system_instruction,
            },
        };

        let response = self
            .post(self.endpoint(model, "countTokens"), &request, HEALTH_TIMEOUT * 2)
            .await?;

        let body: CountResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        Ok(body.total_tokens)
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/models?pageSize=1", self.base_url))
            .header("x-goog-api-key", self.credential.expose())
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn list_models(&self) -> Result<Option<Vec<String>>, ProviderError> {
        let timeout = HEALTH_TIMEOUT * 2;
        let response = self
            .client
            .get(format!("{}/models?pageSize=1000", self.base_url))
            .header("x-goog-api-key", self.credential.expose())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_transport_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_gemini_error(status.as_u16(), &body, None));
        }

        let body: ModelList = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        Ok(Some(model_ids(body)))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

fn model_ids(list: ModelList) -> Vec<String> {
    list.models
        .into_iter()
        .map(|m| match m.name.strip_prefix("models/") {
            Some(id) => id.to_string(),
            None => m.name,
        })
        .collect()
}

/// Factory for `kind: gemini`.
///
/// ```json
/// { "api_key": "AIza...", "base_url": "https://generativelanguage.googleapis.com/v1beta" }
/// ```
pub struct GeminiProviderFactory;

impl ProviderFactory for GeminiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "gemini"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.validate_config(config)?;
        Ok(Arc::new(GeminiProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(config, "api_key", GEMINI_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "Gemini API key required: set 'api_key' in config or {} env",
                GEMINI_API_KEY_ENV
            )));
        }

        if let Some(url) = config["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "base_url": DEFAULT_BASE_URL })
    }

    fn description(&self) -> &'static str {
        "Google Gemini provider"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solace_core::ChatMessage;

    #[test]
    fn test_resource_exhausted_with_retry_info() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded for metric","status":"RESOURCE_EXHAUSTED",
            "details":[{"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"37s"}]}}"#;

        match map_gemini_error(429, body, None) {
            ProviderError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(37)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fractional_retry_delay() {
        let detail = serde_json::json!({"retryDelay": "1.5s"});
        assert_eq!(retry_delay(&detail), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_absurd_retry_delay_is_ignored() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED",
            "details":[{"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"1e30s"}]}}"#;

        match map_gemini_error(429, body, None) {
            ProviderError::RateLimited { retry_after, .. } => assert_eq!(retry_after, None),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_model_ids_drop_prefix() {
        let list: ModelList = serde_json::from_str(
            r#"{"models":[{"name":"models/gemini-2.5-flash"},{"name":"tunedModels/mine"}]}"#,
        )
        .unwrap();
        assert_eq!(model_ids(list), vec!["gemini-2.5-flash", "tunedModels/mine"]);
    }

    #[test]
    fn test_header_wins_over_body_hint() {
        let body = r#"{"error":{"message":"Please retry in 20s","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = map_gemini_error(429, body, Some(Duration::from_secs(3)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));

        let err = map_gemini_error(429, body, None);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_unavailable_and_permission_denied() {
        let overloaded = r#"{"error":{"code":503,"message":"The model is overloaded","status":"UNAVAILABLE"}}"#;
        assert!(map_gemini_error(503, overloaded, None).is_resource_exhausted());

        let denied = r#"{"error":{"code":403,"message":"Method doesn't allow unregistered callers","status":"PERMISSION_DENIED"}}"#;
        let err = map_gemini_error(403, denied, None);
        assert!(matches!(err, ProviderError::AuthError(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_unparseable_body_uses_status() {
        let err = map_gemini_error(502, "<html>Bad Gateway</html>", None);
        assert!(matches!(err, ProviderError::Unavailable { status: 502, .. }));

        let err = map_gemini_error(400, "garbage", None);
        assert!(matches!(err, ProviderError::BadRequest { .. }));
    }

    #[test]
    fn test_conversation_mapping() {
        let conversation = Conversation::new(vec![
            ChatMessage::system("Answer briefly."),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ])
        .with_system_instruction("You are kind.");

        let (contents, instruction) = to_gemini(&conversation);
        let roles: Vec<_> = contents.iter().map(|c| c.role.as_deref().unwrap()).collect();
        assert_eq!(roles, vec!["user", "model"]);

        let instruction = instruction.unwrap();
        assert_eq!(
            instruction.parts[0].text.as_deref(),
            Some("You are kind.\n\nAnswer briefly.")
        );
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let request = GenerateRequest {
            contents: vec![text_content(Some("user"), "hi")],
            system_instruction: None,
            generation_config: GenerationConfig {
                temperature: 0.8,
                max_output_tokens: Some(256),
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 256);
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_factory_validation() {
        let factory = GeminiProviderFactory;
        let bad_url = serde_json::json!({"api_key": "k", "base_url": "ftp://x"});
        assert!(factory.validate_config(&bad_url).is_err());

        let provider = factory.create(&serde_json::json!({"api_key": "k"})).unwrap();
        assert_eq!(provider.name(), "gemini");
        assert!(!format!("{:?}", GeminiProvider::from_config(&serde_json::json!({"api_key": "secret-k"})).unwrap()).contains("secret-k"));
    }
}
