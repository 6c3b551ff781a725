use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{
    Citation, ConversationContext, Gateway, GatewayError, Reply, SendOptions, IMAGE_REFUSED_TEXT,
};
use crate::config::GeminiConfig;
use crate::history::{Role, Turn};

const API_VERSION: &str = "v1beta";
const IMAGE_MIME_TYPE: &str = "image/jpeg";
const QUOTA_STATUS: &str = "RESOURCE_EXHAUSTED";
const MISSING_KEY_TEXT: &str =
    "API key not set. Export GEMINI_API_KEY or add api_key to the [gemini] section of config.toml.";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

impl Part {
    fn text(text: &str) -> Self {
        Part {
            text: Some(text.to_string()),
            thought: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl From<&Turn> for Content {
    fn from(turn: &Turn) -> Self {
        Content {
            role: Some(turn.role),
            parts: vec![Part::text(&turn.text)],
        }
    }
}

#[derive(Debug, Serialize)]
struct GoogleSearch {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebChunk {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebChunk>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateContentResponse {
    fn into_reply(self) -> Result<Reply, GatewayError> {
        let candidate = match self.candidates.into_iter().next() {
            Some(candidate) => candidate,
            None => {
                let reason = self.prompt_feedback.and_then(|f| f.block_reason);
                return Err(match reason {
                    Some(reason) => GatewayError::Remote(format!("The prompt was blocked ({}).", reason)),
                    None => GatewayError::generic("The model returned an empty response."),
                });
            }
        };

        let text: String = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.thought != Some(true))
            .filter_map(|p| p.text)
            .collect();

        if text.is_empty() {
            if let Some(reason) = candidate.finish_reason.filter(|r| r != "STOP") {
                return Err(GatewayError::Remote(format!(
                    "The response was stopped early ({}).",
                    reason
                )));
            }
        }

        let citations = candidate
            .grounding_metadata
            .map(|m| m.grounding_chunks)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|chunk| chunk.web)
            .filter_map(|web| match web.uri {
                Some(uri) if !uri.is_empty() => Some(Citation {
                    uri,
                    title: web.title.filter(|t| !t.is_empty()),
                }),
                _ => None,
            })
            .collect();

        Ok(Reply { text, citations })
    }
}

#[derive(Debug, Serialize)]
struct ImageInstance {
    prompt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputOptions {
    mime_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageParameters {
    sample_count: u32,
    aspect_ratio: String,
    output_options: OutputOptions,
}

#[derive(Debug, Serialize)]
struct PredictRequest {
    instances: Vec<ImageInstance>,
    parameters: ImageParameters,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    #[serde(default)]
    bytes_base64_encoded: Option<String>,
    #[serde(default)]
    rai_filtered_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

impl PredictResponse {
    fn into_payloads(self) -> Result<Vec<String>, GatewayError> {
        let mut filtered = None;
        let mut payloads = Vec::new();
        for prediction in self.predictions {
            match prediction.bytes_base64_encoded {
                Some(bytes) if !bytes.is_empty() => payloads.push(bytes),
                _ => filtered = filtered.or(prediction.rai_filtered_reason),
            }
        }

        if payloads.is_empty() {
            return Err(GatewayError::Remote(
                filtered.unwrap_or_else(|| IMAGE_REFUSED_TEXT.to_string()),
            ));
        }
        Ok(payloads)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

/// Maps a failed HTTP exchange onto the user-facing error taxonomy.
fn classify_error(http_status: u16, body: &str) -> GatewayError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error)
        .unwrap_or_default();

    if envelope.status.as_deref() == Some(QUOTA_STATUS) || http_status == 429 {
        return GatewayError::QuotaExhausted;
    }
    match envelope.message {
        Some(message) if !message.trim().is_empty() => GatewayError::Remote(message),
        _ => GatewayError::generic(format!("Request failed with HTTP status {}", http_status)),
    }
}

struct Endpoint {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    chat_model: String,
    image_model: String,
    image_count: u32,
    aspect_ratio: String,
    system_instruction: String,
}

impl Endpoint {
    fn url(&self, model: &str, method: &str) -> String {
        format!("{}/{}/models/{}:{}", self.base_url, API_VERSION, model, method)
    }

    async fn post<B, R>(&self, url: &str, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GatewayError::generic(MISSING_KEY_TEXT))?;

        tracing::debug!(url, "POST");
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), body = %body, "request failed");
            return Err(classify_error(status.as_u16(), &body));
        }

        Ok(response.json::<R>().await?)
    }

    fn system_instruction(&self) -> Option<Content> {
        if self.system_instruction.trim().is_empty() {
            return None;
        }
        Some(Content {
            role: None,
            parts: vec![Part::text(&self.system_instruction)],
        })
    }
}

pub struct GeminiGateway {
    endpoint: Arc<Endpoint>,
}

impl GeminiGateway {
    pub fn with_config(config: &GeminiConfig, api_key: Option<String>) -> Self {
        GeminiGateway {
            endpoint: Arc::new(Endpoint {
                client: reqwest::Client::new(),
                base_url: config.api_base.trim_end_matches('/').to_string(),
                api_key,
                chat_model: config.chat_model.clone(),
                image_model: config.image_model.clone(),
                image_count: config.image_count,
                aspect_ratio: config.aspect_ratio.clone(),
                system_instruction: config.system_instruction.clone(),
            }),
        }
    }
}

#[async_trait]
impl Gateway for GeminiGateway {
    fn create_context(&self, prior_turns: Vec<Turn>) -> Box<dyn ConversationContext> {
        Box::new(GeminiConversation {
            endpoint: self.endpoint.clone(),
            turns: prior_turns,
        })
    }

    async fn generate_images(&self, prompt: &str) -> Result<Vec<String>, GatewayError> {
        let endpoint = &self.endpoint;
        let request = PredictRequest {
            instances: vec![ImageInstance {
                prompt: prompt.to_string(),
            }],
            parameters: ImageParameters {
                sample_count: endpoint.image_count,
                aspect_ratio: endpoint.aspect_ratio.clone(),
                output_options: OutputOptions {
                    mime_type: IMAGE_MIME_TYPE.to_string(),
                },
            },
        };

        let url = endpoint.url(&endpoint.image_model, "predict");
        let result = match endpoint.post::<_, PredictResponse>(&url, &request).await {
            Ok(response) => response.into_payloads(),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::error!("Image generation failed: {}", e);
        }
        result
    }
}

pub struct GeminiConversation {
    endpoint: Arc<Endpoint>,
    turns: Vec<Turn>,
}

impl GeminiConversation {
    fn request(&self, prompt: &str, options: SendOptions) -> GenerateContentRequest {
        let mut contents: Vec<Content> = self.turns.iter().map(Content::from).collect();
        contents.push(Content::from(&Turn {
            role: Role::User,
            text: prompt.to_string(),
        }));

        GenerateContentRequest {
            contents,
            system_instruction: self.endpoint.system_instruction(),
            tools: options.web_search.then(|| {
                vec![Tool {
                    google_search: GoogleSearch {},
                }]
            }),
        }
    }
}

#[async_trait]
impl ConversationContext for GeminiConversation {
    async fn send(&mut self, prompt: &str, options: SendOptions) -> Result<Reply, GatewayError> {
        let request = self.request(prompt, options);
        let url = self.endpoint.url(&self.endpoint.chat_model, "generateContent");
        let reply = self
            .endpoint
            .post::<_, GenerateContentResponse>(&url, &request)
            .await?
            .into_reply()?;

        self.turns.push(Turn {
            role: Role::User,
            text: prompt.to_string(),
        });
        self.turns.push(Turn {
            role: Role::Model,
            text: reply.text.clone(),
        });
        Ok(reply)
    }

    #[cfg(test)]
    fn turns(&self) -> &[Turn] {
        &self.turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gateway(api_key: Option<&str>) -> GeminiGateway {
        let config = GeminiConfig {
            // Nothing listens here; tests never reach the network.
            api_base: "http://127.0.0.1:9/".to_string(),
            ..GeminiConfig::default()
        };
        GeminiGateway::with_config(&config, api_key.map(str::to_string))
    }

    #[test]
    fn test_chat_request_replays_prior_turns() {
        let gateway = gateway(Some("key"));
        let context = GeminiConversation {
            endpoint: gateway.endpoint.clone(),
            turns: vec![
                Turn { role: Role::User, text: "hi".into() },
                Turn { role: Role::Model, text: "hello".into() },
            ],
        };

        let body = serde_json::to_value(context.request("next", SendOptions::default())).unwrap();
        assert_eq!(
            body["contents"],
            json!([
                {"role": "user", "parts": [{"text": "hi"}]},
                {"role": "model", "parts": [{"text": "hello"}]},
                {"role": "user", "parts": [{"text": "next"}]},
            ])
        );
        assert!(body.get("tools").is_none());
        assert!(body["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("You are a helpful"));
    }

    #[test]
    fn test_search_request_enables_grounding() {
        let gateway = gateway(Some("key"));
        let context = GeminiConversation {
            endpoint: gateway.endpoint.clone(),
            turns: Vec::new(),
        };
        let body =
            serde_json::to_value(context.request("news", SendOptions { web_search: true })).unwrap();
        assert_eq!(body["tools"], json!([{"googleSearch": {}}]));
    }

    #[test]
    fn test_url_strips_trailing_slash() {
        let gateway = gateway(Some("key"));
        assert_eq!(
            gateway.endpoint.url("gemini-2.5-flash", "generateContent"),
            "http://127.0.0.1:9/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn test_reply_text_and_citations() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "internal", "thought": true},
                    {"text": "X"},
                    {"text": "Y"}
                ]},
                "finishReason": "STOP",
                "groundingMetadata": {"groundingChunks": [
                    {"web": {"uri": "http://a", "title": "A"}},
                    {"web": {"uri": "http://b"}},
                    {"web": {"title": "no uri"}},
                    {}
                ]}
            }]
        }))
        .unwrap();

        let reply = response.into_reply().unwrap();
        assert_eq!(reply.text, "XY");
        assert_eq!(
            reply.citations,
            vec![
                Citation { uri: "http://a".into(), title: Some("A".into()) },
                Citation { uri: "http://b".into(), title: None },
            ]
        );
    }

    #[test]
    fn test_blocked_prompt() {
        let response: GenerateContentResponse =
            serde_json::from_value(json!({"promptFeedback": {"blockReason": "SAFETY"}})).unwrap();
        assert_eq!(
            response.into_reply(),
            Err(GatewayError::Remote("The prompt was blocked (SAFETY).".into()))
        );
    }

    #[test]
    fn test_truncated_empty_reply() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "SAFETY"}]
        }))
        .unwrap();
        assert!(matches!(response.into_reply(), Err(GatewayError::Remote(_))));
    }

    #[test]
    fn test_classify_quota() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(classify_error(429, body), GatewayError::QuotaExhausted);
        assert_eq!(classify_error(429, ""), GatewayError::QuotaExhausted);
    }

    #[test]
    fn test_classify_remote_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(
            classify_error(400, body),
            GatewayError::Remote("API key not valid.".into())
        );
    }

    #[test]
    fn test_classify_unstructured_body() {
        assert_eq!(
            classify_error(502, "<html>Bad Gateway</html>").to_string(),
            "Request failed with HTTP status 502"
        );
    }

    #[test]
    fn test_predict_request_shape() {
        let request = PredictRequest {
            instances: vec![ImageInstance { prompt: "a cat".into() }],
            parameters: ImageParameters {
                sample_count: 2,
                aspect_ratio: "1:1".into(),
                output_options: OutputOptions { mime_type: IMAGE_MIME_TYPE.into() },
            },
        };
        assert_eq!(
            serde_json::to_value(request).unwrap(),
            json!({
                "instances": [{"prompt": "a cat"}],
                "parameters": {
                    "sampleCount": 2,
                    "aspectRatio": "1:1",
                    "outputOptions": {"mimeType": "image/jpeg"}
                }
            })
        );
    }

    #[test]
    fn test_predictions_to_payloads() {
        let response: PredictResponse = serde_json::from_value(json!({
            "predictions": [
                {"bytesBase64Encoded": "AAA", "mimeType": "image/jpeg"},
                {"raiFilteredReason": "filtered"},
                {"bytesBase64Encoded": "BBB", "mimeType": "image/jpeg"}
            ]
        }))
        .unwrap();
        assert_eq!(response.into_payloads().unwrap(), vec!["AAA", "BBB"]);
    }

    #[test]
    fn test_no_predictions_is_a_refusal() {
        let empty = PredictResponse::default();
        assert_eq!(
            empty.into_payloads(),
            Err(GatewayError::Remote(IMAGE_REFUSED_TEXT.into()))
        );

        let filtered: PredictResponse = serde_json::from_value(json!({
            "predictions": [{"raiFilteredReason": "Unsafe content"}]
        }))
        .unwrap();
        assert_eq!(
            filtered.into_payloads(),
            Err(GatewayError::Remote("Unsafe content".into()))
        );
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let gateway = gateway(None);
        let err = gateway.generate_images("a cat").await.unwrap_err();
        assert!(err.to_string().starts_with("API key not set"));

        let mut context = gateway.create_context(Vec::new());
        let err = context.send("hi", SendOptions::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Generic(Some(_))));
        assert!(context.turns().is_empty());
    }
}
