use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Default Workers AI vision model.
pub const DEFAULT_VISION_MODEL: &str = "@cf/meta/llama-4-scout-17b-16e-instruct";

/// A vision-capable completion endpoint.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Send `frames` with `prompt` and return the model's raw text answer.
    async fn analyze(&self, frames: &[Vec<u8>], prompt: &str) -> Result<String, VisionError>;
}

/// Client for Cloudflare Workers AI through its OpenAI-compatible chat endpoint.
pub struct WorkersAiClient {
    http: Client,
    account_id: String,
    api_token: String,
    model: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl WorkersAiClient {
    pub fn new(account_id: &str, api_token: &str, model: &str) -> Result<Self, VisionError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(180))
            .build()?;

        Ok(Self {
            http,
            account_id: account_id.to_string(),
            api_token: api_token.to_string(),
            model: model.to_string(),
            max_tokens: 4096,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/ai/v1/chat/completions",
            self.account_id
        )
    }
}

#[async_trait]
impl VisionModel for WorkersAiClient {
    async fn analyze(&self, frames: &[Vec<u8>], prompt: &str) -> Result<String, VisionError> {
        let mut content = Vec::with_capacity(frames.len() + 1);
        content.push(ContentPart::Text {
            text: prompt.to_string(),
        });
        for frame in frames {
            content.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: data_url(frame),
                },
            });
        }

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| VisionError::InvalidResponse("response carried no message content".to_string()))
    }
}

/// Encode a frame as a `data:` URL, sniffing its image type.
fn data_url(frame: &[u8]) -> String {
    let mime = image::guess_format(frame)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/jpeg");
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(frame)
    )
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("Vision model rate limited: {0}")]
    RateLimited(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Vision model returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected vision model response: {0}")]
    InvalidResponse(String),
}

impl VisionError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, VisionError::RateLimited(_))
    }
}
