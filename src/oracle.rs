//! LLM oracle boundary (`spec.md` §6.3): every point where the hub asks a
//! language model to interpret free text or draft text lives behind this
//! trait. `HttpLlmOracle` talks to either an Anthropic- or OpenAI-compatible
//! endpoint using the same reqwest client style as the teacher's webhook
//! dispatcher; `mock::MockLlmOracle` is canned for tests.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::OracleConfig;
use crate::error::{HubError, HubResult};

#[async_trait]
pub trait LlmOracle: Send + Sync {
    /// Interprets a free-text reply to a Session vote-request email. Expected
    /// shape: `{"votes": {"time": "Mon 10am", ...}, "new_options": {...}}`.
    async fn parse_human_reply(&self, proposals_json: &Value, reply_text: &str) -> HubResult<Value>;

    /// Interprets an inbound message addressed to the hub itself: creating a
    /// Room, scheduling a meeting, or neither. Expected shape:
    /// `{"intent": "create_room"|"schedule_meeting"|"unclear", "topic": ..., "participants": [...], "deadline": ..., "initial_proposal": ...}`.
    async fn parse_member_request(&self, command_text: &str) -> HubResult<Value>;

    /// Interprets a free-text reply to a Room CFP. Expected shape:
    /// `{"action": "accept"|"propose"|"amend"|"reject", "new_content": ...}`.
    async fn parse_amendment(&self, current_content: &str, reply_text: &str) -> HubResult<Value>;

    /// Merges this round's amendments into a single draft. Returns the
    /// aggregated content as plain text.
    async fn aggregate_amendments(&self, current_content: &str, amendments: &[String]) -> HubResult<String>;

    /// Drafts meeting minutes / a final summary from a Room's transcript.
    async fn generate_minutes(&self, topic: &str, transcript_json: &Value, final_content: &str) -> HubResult<String>;
}

/// Extracts a JSON value from model output: a fenced ```json block first,
/// else the first balanced `{...}` span. Mirrors the leniency of
/// `original_source/lib/negotiator.py::extract_json`, which assumes models
/// wrap or preface JSON with prose more often than not.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(v) = serde_json::from_str::<Value>(after[..end].trim()) {
                return Some(v);
            }
        }
    }

    let bytes = text.as_bytes();
    let mut start_idx = None;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'{' {
            start_idx = Some(i);
            break;
        }
    }
    let start_idx = start_idx?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (offset, &b) in bytes[start_idx..].iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start_idx + offset + 1;
                    return serde_json::from_str::<Value>(&text[start_idx..end]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

enum Backend {
    Anthropic,
    OpenAiCompatible,
}

pub struct HttpLlmOracle {
    client: reqwest::Client,
    config: OracleConfig,
    api_key: String,
    backend: Backend,
}

impl HttpLlmOracle {
    pub fn new(config: OracleConfig) -> HubResult<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| HubError::Config(format!("environment variable '{}' is not set", config.api_key_env)))?;
        let backend = match config.provider.as_str() {
            "anthropic" => Backend::Anthropic,
            "openai" | "openai-compatible" => Backend::OpenAiCompatible,
            other => return Err(HubError::Config(format!("unknown oracle provider '{other}'"))),
        };
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| HubError::Llm(e.to_string()))?;
        Ok(HttpLlmOracle { client, config, api_key, backend })
    }

    async fn complete(&self, system: &str, user: &str) -> HubResult<String> {
        match self.backend {
            Backend::Anthropic => self.complete_anthropic(system, user).await,
            Backend::OpenAiCompatible => self.complete_openai(system, user).await,
        }
    }

    async fn complete_anthropic(&self, system: &str, user: &str) -> HubResult<String> {
        let base = self.config.base_url.as_deref().unwrap_or("https://api.anthropic.com");
        let url = format!("{base}/v1/messages");
        let body = json!({
            "model": self.config.model,
            "max_tokens": 2048,
            "system": system,
            "messages": [{"role": "user", "content": user}],
        });
        let resp = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| HubError::Llm(e.to_string()))?
            .error_for_status()
            .map_err(|e| HubError::Llm(e.to_string()))?;
        let value: Value = resp.json().await.map_err(|e| HubError::Llm(e.to_string()))?;
        value
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("text"))
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| HubError::Llm("unexpected anthropic response shape".to_string()))
    }

    async fn complete_openai(&self, system: &str, user: &str) -> HubResult<String> {
        let base = self.config.base_url.as_deref().unwrap_or("https://api.openai.com");
        let url = format!("{base}/v1/chat/completions");
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| HubError::Llm(e.to_string()))?
            .error_for_status()
            .map_err(|e| HubError::Llm(e.to_string()))?;
        let value: Value = resp.json().await.map_err(|e| HubError::Llm(e.to_string()))?;
        value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| HubError::Llm("unexpected openai response shape".to_string()))
    }

    fn parse_json_reply(&self, raw: &str) -> HubResult<Value> {
        extract_json(raw).ok_or_else(|| HubError::Llm(format!("no JSON object found in model output: {raw}")))
    }
}

#[async_trait]
impl LlmOracle for HttpLlmOracle {
    async fn parse_human_reply(&self, proposals_json: &Value, reply_text: &str) -> HubResult<Value> {
        let system = "You interpret a human's free-text reply to a meeting scheduling request. \
            Given the current proposal options and the reply, return JSON with keys \
            `votes` (item name -> chosen option, only for items the reply clearly answers) \
            and `new_options` (item name -> new option text, only when the reply proposes \
            something not already listed). Return ONLY the JSON object.";
        let user = format!("Current proposals:\n{proposals_json}\n\nReply:\n{reply_text}");
        let raw = self.complete(system, &user).await?;
        self.parse_json_reply(&raw)
    }

    async fn parse_member_request(&self, command_text: &str) -> HubResult<Value> {
        let system = "You interpret a request from a Hub member. Classify it as \
            `create_room` (drafting/negotiating a document), `schedule_meeting` \
            (finding a time/place), or `unclear`. Return JSON with keys `intent`, \
            `topic`, `participants` (array of names or emails), `deadline` \
            (free text or null), and `initial_proposal` (free text or null). \
            Return ONLY the JSON object.";
        let raw = self.complete(system, command_text).await?;
        self.parse_json_reply(&raw)
    }

    async fn parse_amendment(&self, current_content: &str, reply_text: &str) -> HubResult<Value> {
        let system = "You interpret a reply to a document under negotiation in a Room. \
            Classify the reply's action as one of `PROPOSE`, `AMEND`, `ACCEPT`, or `REJECT` \
            (use exactly these uppercase labels). For `PROPOSE`/`AMEND` include the full new \
            document text under `new_content`. Return ONLY a JSON object with keys `action`, \
            `changes`, `reason`, and `new_content` (null unless PROPOSE/AMEND).";
        let user = format!("Current document:\n{current_content}\n\nReply:\n{reply_text}");
        let raw = self.complete(system, &user).await?;
        self.parse_json_reply(&raw)
    }

    async fn aggregate_amendments(&self, current_content: &str, amendments: &[String]) -> HubResult<String> {
        let system = "You merge multiple proposed amendments to a document into one \
            coherent draft that preserves every participant's substantive changes where \
            they don't conflict. Return only the merged document text, no commentary.";
        let user = format!(
            "Current document:\n{current_content}\n\nAmendments this round:\n{}",
            amendments.join("\n---\n")
        );
        self.complete(system, &user).await
    }

    async fn generate_minutes(&self, topic: &str, transcript_json: &Value, final_content: &str) -> HubResult<String> {
        let system = "You write concise meeting minutes from a negotiation transcript. \
            Summarize what was decided and note any outstanding dissent. Return only the \
            minutes text, no commentary.";
        let user = format!("Topic: {topic}\n\nTranscript:\n{transcript_json}\n\nFinal content:\n{final_content}");
        self.complete(system, &user).await
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Returns pre-seeded responses in FIFO order per method, defaulting to
    /// trivial passthrough answers when the queue is empty.
    #[derive(Default)]
    pub struct MockLlmOracle {
        pub human_reply_queue: Mutex<Vec<Value>>,
        pub member_request_queue: Mutex<Vec<Value>>,
        pub amendment_queue: Mutex<Vec<Value>>,
    }

    impl MockLlmOracle {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl LlmOracle for MockLlmOracle {
        async fn parse_human_reply(&self, _proposals_json: &Value, _reply_text: &str) -> HubResult<Value> {
            let mut q = self.human_reply_queue.lock().unwrap();
            Ok(if q.is_empty() { json!({"votes": {}, "new_options": {}}) } else { q.remove(0) })
        }

        async fn parse_member_request(&self, _command_text: &str) -> HubResult<Value> {
            let mut q = self.member_request_queue.lock().unwrap();
            Ok(if q.is_empty() { json!({"intent": "unclear"}) } else { q.remove(0) })
        }

        async fn parse_amendment(&self, _current_content: &str, _reply_text: &str) -> HubResult<Value> {
            let mut q = self.amendment_queue.lock().unwrap();
            Ok(if q.is_empty() { json!({"action": "ACCEPT", "new_content": null}) } else { q.remove(0) })
        }

        async fn aggregate_amendments(&self, current_content: &str, amendments: &[String]) -> HubResult<String> {
            Ok(amendments.last().cloned().unwrap_or_else(|| current_content.to_string()))
        }

        async fn generate_minutes(&self, topic: &str, _transcript_json: &Value, final_content: &str) -> HubResult<String> {
            Ok(format!("Minutes for {topic}:\n{final_content}"))
        }
    }

    /// Lets integration tests hand an `Arc<MockLlmOracle>` to `PollLoop`
    /// while keeping a handle of their own to push more canned responses
    /// onto the queues between ticks.
    #[async_trait]
    impl LlmOracle for std::sync::Arc<MockLlmOracle> {
        async fn parse_human_reply(&self, proposals_json: &Value, reply_text: &str) -> HubResult<Value> {
            self.as_ref().parse_human_reply(proposals_json, reply_text).await
        }

        async fn parse_member_request(&self, command_text: &str) -> HubResult<Value> {
            self.as_ref().parse_member_request(command_text).await
        }

        async fn parse_amendment(&self, current_content: &str, reply_text: &str) -> HubResult<Value> {
            self.as_ref().parse_amendment(current_content, reply_text).await
        }

        async fn aggregate_amendments(&self, current_content: &str, amendments: &[String]) -> HubResult<String> {
            self.as_ref().aggregate_amendments(current_content, amendments).await
        }

        async fn generate_minutes(&self, topic: &str, transcript_json: &Value, final_content: &str) -> HubResult<String> {
            self.as_ref().generate_minutes(topic, transcript_json, final_content).await
        }
    }
}
