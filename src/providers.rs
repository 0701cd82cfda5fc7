//! Dispatch to the hosted LLM platforms.
//!
//! Every adapter takes `(model, prompt)` and returns the completion text.
//! API keys come from the environment and are only required for the platform
//! a request actually selects. Most platforms speak the OpenAI chat
//! completions dialect; the rest get their own adapter.

use reqwest::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

const MAX_TOKENS: u32 = 4096;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const GROK_URL: &str = "https://api.x.ai/v1/chat/completions";
const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEEPSEEK_URL: &str = "https://api.deepseek.com/v1/chat/completions";
const QWEN_URL: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation";
const KIMI_URL: &str = "https://api.moonshot.cn/v1/chat/completions";
const ZAI_URL: &str = "https://api.z.ai/api/paas/v4/chat/completions";
const PERPLEXITY_URL: &str = "https://api.perplexity.ai/chat/completions";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown platform {0:?}")]
    UnknownPlatform(String),
    #[error("{0} is not set")]
    MissingApiKey(&'static str),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{platform} returned {status}: {body}")]
    Api {
        platform: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("unexpected {0} response: {1}")]
    Malformed(&'static str, String),
}

#[derive(Clone, Debug, Default)]
pub struct LlmClient {
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new() -> Self {
        LlmClient {
            http: reqwest::Client::new(),
        }
    }

    /// Run `prompt` against `model` on `platform` and return the trimmed
    /// completion text.
    pub async fn invoke(
        &self,
        platform: &str,
        model: &str,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let text = match platform.to_lowercase().as_str() {
            "openai" => self.openai(model, prompt).await?,
            "anthropic" => self.anthropic(model, prompt).await?,
            "gemini" => self.gemini(model, prompt).await?,
            "grok" => {
                self.chat_completions(
                    "grok",
                    GROK_URL,
                    "GROK_API_KEY",
                    model,
                    prompt,
                    json!({"stream": false, "max_tokens": MAX_TOKENS}),
                )
                .await?
            }
            "groq" => {
                self.chat_completions(
                    "groq",
                    GROQ_URL,
                    "GROQ_API_KEY",
                    model,
                    prompt,
                    json!({"max_tokens": MAX_TOKENS}),
                )
                .await?
            }
            "deepseek" => {
                self.chat_completions(
                    "deepseek",
                    DEEPSEEK_URL,
                    "DEEPSEEK_API_KEY",
                    model,
                    prompt,
                    json!({"max_tokens": MAX_TOKENS}),
                )
                .await?
            }
            "qwen" => self.qwen(model, prompt).await?,
            "kimi" => {
                self.chat_completions("kimi", KIMI_URL, "MOONSHOT_API_KEY", model, prompt, json!({}))
                    .await?
            }
            "zai" | "zhipu" => {
                self.chat_completions(
                    "zai",
                    ZAI_URL,
                    "ZAI_API_KEY",
                    model,
                    prompt,
                    json!({"max_tokens": MAX_TOKENS}),
                )
                .await?
            }
            "perplexity" => {
                self.chat_completions(
                    "perplexity",
                    PERPLEXITY_URL,
                    "PERPLEXITY_API_KEY",
                    model,
                    prompt,
                    json!({"max_tokens": MAX_TOKENS}),
                )
                .await?
            }
            other => return Err(ProviderError::UnknownPlatform(other.to_string())),
        };
        Ok(text.trim().to_string())
    }

    /// OpenAI proper. Some models reject an explicit temperature; when the
    /// API says so, the request is retried once without it.
    async fn openai(&self, model: &str, prompt: &str) -> Result<String, ProviderError> {
        let key = api_key("OPENAI_API_KEY")?;
        let request = |temperature: bool| {
            self.http
                .post(OPENAI_URL)
                .bearer_auth(&key)
                .json(&chat_body(model, prompt, temperature, &json!({})))
        };

        let body = match self.post("openai", request(true)).await {
            Ok(body) => body,
            Err(ProviderError::Api { ref body, .. }) if rejects_temperature(body) => {
                debug!("{model} rejects an explicit temperature, retrying without");
                self.post("openai", request(false)).await?
            }
            Err(e) => return Err(e),
        };
        parse_chat_completion("openai", &body)
    }

    async fn anthropic(&self, model: &str, prompt: &str) -> Result<String, ProviderError> {
        let key = api_key("ANTHROPIC_API_KEY")?;
        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0,
            "max_tokens": MAX_TOKENS,
        });
        let request = self
            .http
            .post(ANTHROPIC_URL)
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(&body);
        let body = self.post("anthropic", request).await?;
        parse_anthropic(&body)
    }

    async fn gemini(&self, model: &str, prompt: &str) -> Result<String, ProviderError> {
        let key = api_key("GEMINI_API_KEY")?;
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent?key={key}"
        );
        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {"temperature": 0, "maxOutputTokens": MAX_TOKENS},
        });
        let body = self.post("gemini", self.http.post(url).json(&body)).await?;
        parse_gemini(&body)
    }

    async fn qwen(&self, model: &str, prompt: &str) -> Result<String, ProviderError> {
        let key = api_key("QWEN_API_KEY")?;
        let body = json!({
            "model": model,
            "input": {"messages": [{"role": "user", "content": prompt}]},
            "parameters": {"temperature": 0, "max_tokens": MAX_TOKENS},
        });
        let request = self.http.post(QWEN_URL).bearer_auth(key).json(&body);
        let body = self.post("qwen", request).await?;
        parse_qwen(&body)
    }

    /// The OpenAI-compatible platforms only differ in endpoint, key and a few
    /// extra body fields.
    async fn chat_completions(
        &self,
        platform: &'static str,
        endpoint: &str,
        key_var: &'static str,
        model: &str,
        prompt: &str,
        extra: Value,
    ) -> Result<String, ProviderError> {
        let key = api_key(key_var)?;
        let request = self
            .http
            .post(endpoint)
            .bearer_auth(key)
            .json(&chat_body(model, prompt, true, &extra));
        let body = self.post(platform, request).await?;
        parse_chat_completion(platform, &body)
    }

    async fn post(
        &self,
        platform: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<String, ProviderError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Api {
                platform,
                status,
                body,
            });
        }
        Ok(body)
    }
}

fn api_key(var: &'static str) -> Result<String, ProviderError> {
    std::env::var(var).map_err(|_| ProviderError::MissingApiKey(var))
}

fn chat_body(model: &str, prompt: &str, temperature: bool, extra: &Value) -> Value {
    let mut body = json!({
        "model": model,
        "messages": [{"role": "user", "content": prompt}],
    });
    if temperature {
        body["temperature"] = json!(0);
    }
    if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            body.insert(key.clone(), value.clone());
        }
    }
    body
}

/// True for OpenAI's `unsupported_value` complaint about the `temperature`
/// parameter.
fn rejects_temperature(body: &str) -> bool {
    serde_json::from_str::<Value>(body).is_ok_and(|v| {
        v.pointer("/error/code").and_then(Value::as_str) == Some("unsupported_value")
            && v.pointer("/error/param").and_then(Value::as_str) == Some("temperature")
    })
}

fn parse_chat_completion(platform: &'static str, body: &str) -> Result<String, ProviderError> {
    extract(platform, body, "/choices/0/message/content")
}

fn parse_anthropic(body: &str) -> Result<String, ProviderError> {
    extract("anthropic", body, "/content/0/text")
}

fn parse_gemini(body: &str) -> Result<String, ProviderError> {
    extract("gemini", body, "/candidates/0/content/parts/0/text")
}

fn parse_qwen(body: &str) -> Result<String, ProviderError> {
    extract("qwen", body, "/output/text")
}

fn extract(platform: &'static str, body: &str, pointer: &str) -> Result<String, ProviderError> {
    serde_json::from_str::<Value>(body)
        .ok()
        .as_ref()
        .and_then(|v| v.pointer(pointer))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::Malformed(platform, snippet(body)))
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::{
        parse_anthropic, parse_chat_completion, parse_gemini, parse_qwen, rejects_temperature,
        LlmClient, ProviderError,
    };

    #[test]
    fn parses_chat_completion_body() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"42"}}]}"#;
        assert_eq!(parse_chat_completion("openai", body).unwrap(), "42");
    }

    #[test]
    fn parses_anthropic_body() {
        let body = r#"{"content":[{"type":"text","text":"hello"}],"model":"claude"}"#;
        assert_eq!(parse_anthropic(body).unwrap(), "hello");
    }

    #[test]
    fn parses_gemini_body() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"pong"}]}}]}"#;
        assert_eq!(parse_gemini(body).unwrap(), "pong");
    }

    #[test]
    fn parses_qwen_body() {
        let body = r#"{"output":{"text":"ok then"},"usage":{}}"#;
        assert_eq!(parse_qwen(body).unwrap(), "ok then");
    }

    #[test]
    fn rejects_malformed_bodies() {
        assert!(matches!(
            parse_chat_completion("openai", "not json"),
            Err(ProviderError::Malformed("openai", _))
        ));
        assert!(matches!(
            parse_chat_completion("openai", r#"{"choices":[]}"#),
            Err(ProviderError::Malformed("openai", _))
        ));
    }

    #[test]
    fn recognizes_temperature_complaints() {
        let complaint = r#"{"error":{"code":"unsupported_value","param":"temperature","message":"..."}}"#;
        assert!(rejects_temperature(complaint));

        let other = r#"{"error":{"code":"rate_limit_exceeded","param":null}}"#;
        assert!(!rejects_temperature(other));
        assert!(!rejects_temperature("busy"));
    }

    #[tokio::test]
    async fn unknown_platform_is_an_error() {
        let client = LlmClient::new();
        assert!(matches!(
            client.invoke("watson", "any", "hi").await,
            Err(ProviderError::UnknownPlatform(p)) if p == "watson"
        ));
    }

    #[tokio::test]
    async fn missing_key_is_an_error() {
        std::env::remove_var("PERPLEXITY_API_KEY");
        let client = LlmClient::new();
        assert!(matches!(
            client.invoke("perplexity", "sonar", "hi").await,
            Err(ProviderError::MissingApiKey("PERPLEXITY_API_KEY"))
        ));
    }
}
