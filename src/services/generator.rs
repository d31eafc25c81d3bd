use crate::core::config::Config;
use crate::core::error::GenerationError;
use crate::core::state::Character;
use crate::services::composer::{compose_request, RequestPart, SceneRequest};
use crate::services::matcher::{has_reference_image, relevant_characters};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;
use url::Url;

// --- Config ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub gemini: Option<GeminiConfig>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            gemini: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_gemini_model(),
            base_url: default_gemini_base_url(),
            timeout_seconds: None,
        }
    }
}

impl GeminiConfig {
    /// Key from the config file, else `GEMINI_API_KEY`, else `API_KEY`.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| non_empty_env("GEMINI_API_KEY"))
            .or_else(|| non_empty_env("API_KEY"))
    }
}

pub const GEMINI_IMAGE_MODELS: &[&str] = &[
    "gemini-2.5-flash-image-preview",
    "gemini-2.5-flash-image",
    "gemini-3-pro-image-preview",
];

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_gemini_model() -> String {
    GEMINI_IMAGE_MODELS[0].to_string()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// --- Client trait ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

impl GeneratedImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

#[async_trait]
pub trait ImageGenerator: Send + Sync + Debug {
    /// One attempt, no retries.
    async fn generate(&self, request: &SceneRequest) -> Result<GeneratedImage, GenerationError>;
}

pub fn create_generator(config: &Config) -> Result<Box<dyn ImageGenerator>> {
    info!("Initializing image generator for provider: {}", config.generator.provider);
    match config.generator.provider.as_str() {
        "gemini" => {
            let cfg = config.generator.gemini.clone().unwrap_or_default();
            Ok(Box::new(GeminiClient::new(&cfg)?))
        }
        _ => Err(anyhow!("Unknown image provider: {}", config.generator.provider)),
    }
}

/// Matches characters, composes the request and runs it. Returns the image as a data URL.
pub async fn generate_scene_image(
    prompt: &str,
    characters: &[Character],
    generator: &dyn ImageGenerator,
) -> Result<String, GenerationError> {
    let matched = relevant_characters(prompt, characters);
    if !has_reference_image(&matched) {
        return Err(GenerationError::NoReferencedCharacters {
            prompt: prompt.to_string(),
        });
    }

    let request = compose_request(prompt, &matched);
    debug!(
        "Scene request: {} character(s), {} reference image(s)",
        matched.len(),
        request.image_count()
    );

    let image = generator.generate(&request).await?;
    Ok(image.data_url())
}

// --- Gemini ---

#[derive(Debug)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    endpoint: Url,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let api_key = config
            .resolve_api_key()
            .context("Gemini API key missing. Set generator.gemini.api_key or GEMINI_API_KEY")?;

        let endpoint = Url::parse(&format!(
            "{}/models/{}:generateContent",
            config.base_url.trim_end_matches('/'),
            config.model
        ))
        .with_context(|| format!("Invalid Gemini base URL: {}", config.base_url))?;

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            api_key,
            model: config.model.clone(),
            endpoint,
            client: builder.build()?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart<'a> {
    Image {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData<'a>,
    },
    Text {
        text: &'a str,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    response_modalities: Vec<&'static str>,
}

fn build_request_body(request: &SceneRequest) -> GeminiRequest<'_> {
    let parts = request
        .parts
        .iter()
        .map(|part| match part {
            RequestPart::InlineImage { mime_type, data } => GeminiPart::Image {
                inline_data: GeminiInlineData { mime_type, data },
            },
            RequestPart::Text(text) => GeminiPart::Text { text },
        })
        .collect();

    GeminiRequest {
        contents: vec![GeminiContent { parts }],
        generation_config: GeminiGenerationConfig {
            response_modalities: vec!["IMAGE", "TEXT"],
        },
    }
}

#[derive(Deserialize, Debug, Default)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    error: Option<GeminiError>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize, Debug)]
struct GeminiPartResponse {
    text: Option<String>,
    #[serde(rename = "inlineData", alias = "inline_data")]
    inline_data: Option<GeminiInlineDataResponse>,
}

#[derive(Deserialize, Debug)]
struct GeminiInlineDataResponse {
    #[serde(rename = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
    #[serde(default)]
    data: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize, Debug)]
struct GeminiErrorEnvelope {
    error: GeminiError,
}

fn extract_image(response: GeminiResponse) -> Result<GeneratedImage, GenerationError> {
    if let Some(err) = response.error {
        return Err(GenerationError::api(err.message));
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(GenerationError::EmptyResponse);
    };
    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();

    let mut text = String::new();
    for part in parts {
        if let Some(inline) = part.inline_data {
            if !inline.data.is_empty() {
                return Ok(GeneratedImage {
                    mime_type: inline.mime_type.unwrap_or_else(|| "image/png".to_string()),
                    data: inline.data,
                });
            }
        }
        if let Some(t) = part.text {
            text.push_str(&t);
        }
    }

    if text.trim().is_empty() {
        if let Some(reason) = candidate.finish_reason {
            debug!("Gemini returned no content, finish reason: {}", reason);
        }
    }
    Err(GenerationError::missing_image(Some(&text)))
}

/// Picks the most useful message out of a non-success response body.
fn error_message_from_body(body: &str) -> String {
    match serde_json::from_str::<GeminiErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.trim().is_empty() => envelope.error.message,
        _ => body.trim().to_string(),
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    async fn generate(&self, request: &SceneRequest) -> Result<GeneratedImage, GenerationError> {
        let body = build_request_body(request);
        debug!("POST {} (model {}, {} parts)", self.endpoint.path(), self.model, request.parts.len());

        let resp = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API call failed: {}", e);
                GenerationError::api(e.to_string())
            })?;

        let status = resp.status();
        let response_text = resp
            .text()
            .await
            .map_err(|e| GenerationError::api(e.to_string()))?;

        if !status.is_success() {
            error!("Gemini API error ({}): {}", status, response_text);
            return Err(GenerationError::api(error_message_from_body(&response_text)));
        }

        let result: GeminiResponse = serde_json::from_str(&response_text).map_err(|e| {
            GenerationError::api(format!("Failed to parse Gemini response: {}", e))
        })?;

        extract_image(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::BaseImage;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Debug)]
    struct MockGenerator {
        calls: Arc<Mutex<Vec<SceneRequest>>>,
    }

    #[async_trait]
    impl ImageGenerator for MockGenerator {
        async fn generate(&self, request: &SceneRequest) -> Result<GeneratedImage, GenerationError> {
            self.calls.lock().unwrap().push(request.clone());
            Ok(GeneratedImage {
                mime_type: "image/png".to_string(),
                data: "SU1H".to_string(),
            })
        }
    }

    fn character(name: &str, description: &str, with_image: bool) -> Character {
        let mut c = Character::new();
        c.name = name.to_string();
        c.description = description.to_string();
        if with_image {
            c.base_image = BaseImage {
                data: "RUxBUkE=".to_string(),
                mime_type: "image/png".to_string(),
                preview: "elara.png".to_string(),
            };
        }
        c
    }

    fn parse(value: serde_json::Value) -> GeminiResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_request_body_wire_shape() {
        let request = SceneRequest {
            parts: vec![
                RequestPart::InlineImage {
                    mime_type: "image/png".to_string(),
                    data: "AAAA".to_string(),
                },
                RequestPart::Text("Scene: Elara waves.".to_string()),
            ],
        };
        let value = serde_json::to_value(build_request_body(&request)).unwrap();
        assert_eq!(
            value,
            json!({
                "contents": [{
                    "parts": [
                        {"inlineData": {"mimeType": "image/png", "data": "AAAA"}},
                        {"text": "Scene: Elara waves."}
                    ]
                }],
                "generationConfig": {"responseModalities": ["IMAGE", "TEXT"]}
            })
        );
    }

    #[test]
    fn test_extract_image_finds_inline_data() {
        let response = parse(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Here you go"},
                    {"inlineData": {"mimeType": "image/jpeg", "data": "SU1H"}}
                ]}
            }]
        }));
        let image = extract_image(response).unwrap();
        assert_eq!(image.mime_type, "image/jpeg");
        assert_eq!(image.data_url(), "data:image/jpeg;base64,SU1H");
    }

    #[test]
    fn test_extract_image_text_only() {
        let response = parse(json!({
            "candidates": [{"content": {"parts": [{"text": " I can't create that image. "}]}}]
        }));
        assert_eq!(
            extract_image(response).unwrap_err().to_string(),
            "API did not return an image. Response: \"I can't create that image.\""
        );
    }

    #[test]
    fn test_extract_image_neither() {
        let response = parse(json!({
            "candidates": [{"finishReason": "SAFETY"}]
        }));
        assert_eq!(extract_image(response).unwrap_err(), GenerationError::EmptyResponse);
        assert_eq!(
            extract_image(parse(json!({}))).unwrap_err(),
            GenerationError::EmptyResponse
        );
    }

    #[test]
    fn test_error_message_from_body() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid. Please pass a valid API key.", "status": "INVALID_ARGUMENT"}}"#;
        assert_eq!(
            error_message_from_body(body),
            "API key not valid. Please pass a valid API key."
        );
        assert_eq!(error_message_from_body("Bad Gateway\n"), "Bad Gateway");
        assert_eq!(
            GenerationError::api(error_message_from_body("")).to_string(),
            crate::core::error::UNKNOWN_API_ERROR
        );
    }

    #[tokio::test]
    async fn test_generate_scene_image_success() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let generator = MockGenerator { calls: calls.clone() };
        let characters = vec![character("Elara", "A woman with warm brown eyes", true)];

        let url = generate_scene_image("Elara stands on a cliff.", &characters, &generator)
            .await
            .unwrap();
        assert_eq!(url, "data:image/png;base64,SU1H");

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].image_count(), 1);
        assert_eq!(
            calls[0].text(),
            Some("A woman with warm brown eyes. Scene: Elara stands on a cliff.")
        );
    }

    #[tokio::test]
    async fn test_generate_scene_image_precondition_skips_network() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let generator = MockGenerator { calls: calls.clone() };
        let characters = vec![
            character("Elara", "", true),
            character("Kael", "A rugged man", false),
        ];

        let err = generate_scene_image("A storm rolls in.", &characters, &generator)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GenerationError::NoReferencedCharacters {
                prompt: "A storm rolls in.".to_string()
            }
        );

        let err = generate_scene_image("Kael sleeps.", &characters, &generator)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("\"Kael sleeps.\""));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_gemini_client_endpoint() {
        let cfg = GeminiConfig {
            api_key: Some("key".to_string()),
            base_url: "http://localhost:8080/v1beta/".to_string(),
            ..GeminiConfig::default()
        };
        let client = GeminiClient::new(&cfg).unwrap();
        assert_eq!(
            client.endpoint().as_str(),
            "http://localhost:8080/v1beta/models/gemini-2.5-flash-image-preview:generateContent"
        );
    }

    /// Local HTTP stub: answers every connection with `status` and `body`, and keeps
    /// each raw request (lowercased) for inspection.
    async fn serve(status: &'static str, body: &'static str) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let raw = read_request(&mut socket).await;
                seen.lock().unwrap().push(raw.to_lowercase());
                let reply = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/v1beta", addr), requests)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn client_for(base_url: String) -> GeminiClient {
        GeminiClient::new(&GeminiConfig {
            api_key: Some("test-key".to_string()),
            base_url,
            ..GeminiConfig::default()
        })
        .unwrap()
    }

    fn scene_request() -> SceneRequest {
        let characters = vec![character("Elara", "A woman with warm brown eyes", true)];
        let matched = relevant_characters("Elara stands on a cliff.", &characters);
        compose_request("Elara stands on a cliff.", &matched)
    }

    #[tokio::test]
    async fn test_gemini_client_surfaces_api_error_message() {
        let (base_url, requests) =
            serve("400 Bad Request", r#"{"error":{"message":"API key not valid."}}"#).await;
        let client = client_for(base_url);

        let err = client.generate(&scene_request()).await.unwrap_err();
        assert_eq!(err.to_string(), "API key not valid.");

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0]
            .starts_with("post /v1beta/models/gemini-2.5-flash-image-preview:generatecontent "));
        assert!(requests[0].contains("x-goog-api-key: test-key"));
        assert!(requests[0].contains(r#""responsemodalities":["image","text"]"#));
        assert!(requests[0].contains(r#""inlinedata":{"mimetype":"image/png","data":"ruxbuke="}"#));
    }

    #[tokio::test]
    async fn test_gemini_client_text_only_reply() {
        let (base_url, requests) = serve(
            "200 OK",
            r#"{"candidates":[{"content":{"parts":[{"text":"I can't draw that."}]}}]}"#,
        )
        .await;
        let client = client_for(base_url);

        let err = client.generate(&scene_request()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "API did not return an image. Response: \"I can't draw that.\""
        );
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gemini_client_returns_inline_image() {
        let (base_url, requests) = serve(
            "200 OK",
            r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":"U0NFTkU="}}]}}]}"#,
        )
        .await;
        let client = client_for(base_url);

        let image = client.generate(&scene_request()).await.unwrap();
        assert_eq!(image.data_url(), "data:image/png;base64,U0NFTkU=");
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gemini_client_unparseable_body() {
        let (base_url, _requests) = serve("200 OK", "not json").await;
        let client = client_for(base_url);

        let err = client.generate(&scene_request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Api { .. }));
        assert!(err.to_string().starts_with("Failed to parse Gemini response"));
    }

    #[tokio::test]
    async fn test_gemini_client_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = client_for(format!("http://{}/v1beta", addr));

        let err = client.generate(&scene_request()).await.unwrap_err();
        let GenerationError::Api { message } = &err else {
            panic!("expected an API error, got {:?}", err);
        };
        assert!(!message.is_empty());
        assert_ne!(message, crate::core::error::UNKNOWN_API_ERROR);
    }

    #[test]
    fn test_create_generator_rejects_unknown_provider() {
        let mut config = Config::default();
        config.generator.provider = "dalle".to_string();
        let err = create_generator(&config).unwrap_err();
        assert!(err.to_string().contains("Unknown image provider"));
    }
}
