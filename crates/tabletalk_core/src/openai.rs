use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

use crate::llm_protocol::{CycleDecision, CycleInput, LlmClient, LlmError, RunCodeArgs};
use crate::session::AgentConfig;

/// OpenAI-backed decision client using the Responses API with
/// `text.format.type = "json_object"` so the model returns a single JSON
/// decision object per cycle.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base: String,
}

impl OpenAiClient {
    pub fn new(cfg: &AgentConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: cfg.openai_api_key.clone(),
            model: cfg.openai_model.clone(),
            base: cfg
                .openai_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
        }
    }

    fn compact_prompt(input: &CycleInput) -> String {
        let mut prompt = String::new();
        prompt.push_str(&input.system_instructions);
        prompt.push_str("\n--- Transcript ---\n");
        for t in &input.transcript {
            prompt.push_str(&format!("[{}] {}\n", t.role, t.content));
        }
        prompt.push_str("\n--- Tool context ---\n");
        prompt.push_str(&input.tool_context.to_string());
        prompt.push_str("\n--- End ---\n");
        prompt
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    async fn decide(&self, input: &CycleInput) -> Result<CycleDecision, LlmError> {
        let url = format!("{}/v1/responses", self.base.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "input": [
                {"role": "system", "content": "Return only valid JSON for the given schema. No prose."},
                {"role": "user", "content": Self::compact_prompt(input)}
            ],
            "text": {
                "format": { "type": "json_object" }
            }
        });

        let resp = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{status}: {txt}")));
        }
        let v: serde_json::Value = resp.json().await.map_err(|e| LlmError::Http(e.to_string()))?;

        parse_decision(&v)
    }
}

/// The Responses API returns an `output` array whose items carry text
/// segments; concatenate them, then parse the decision with a lenient
/// fallback for the simpler shapes models emit without a strict schema.
fn parse_decision(v: &serde_json::Value) -> Result<CycleDecision, LlmError> {
    let mut buf = String::new();
    if let Some(items) = v.get("output").and_then(|x| x.as_array()) {
        for item in items {
            match item.get("type").and_then(|x| x.as_str()) {
                Some("message") => {
                    if let Some(content) = item.get("content").and_then(|x| x.as_array()) {
                        for block in content {
                            if block.get("type").and_then(|x| x.as_str()) == Some("output_text") {
                                if let Some(text) = block.get("text").and_then(|x| x.as_str()) {
                                    buf.push_str(text);
                                }
                            }
                        }
                    }
                }
                Some("output_text") => {
                    if let Some(text) = item.get("text").and_then(|x| x.as_str()) {
                        buf.push_str(text);
                    }
                }
                _ => {}
            }
        }
    } else if let Some(text) = v.pointer("/output_text").and_then(|x| x.as_str()) {
        buf.push_str(text);
    }

    match serde_json::from_str::<CycleDecision>(&buf) {
        Ok(d) => Ok(d),
        Err(e) => {
            if let Ok(obj) = serde_json::from_str::<serde_json::Value>(&buf) {
                if let Some(d) = lenient_decision(&obj) {
                    return Ok(d);
                }
            }
            Err(LlmError::Parse(format!("{e} (raw: {buf})")))
        }
    }
}

fn lenient_decision(obj: &serde_json::Value) -> Option<CycleDecision> {
    match obj.get("action").and_then(|x| x.as_str())? {
        "run_code" => {
            let code = obj
                .get("code")
                .or_else(|| obj.pointer("/args/code"))
                .and_then(|x| x.as_str())?
                .to_string();
            let user_message = obj
                .get("user_message")
                .or_else(|| obj.pointer("/args/user_message"))
                .and_then(|x| x.as_str())
                .map(|s| s.to_string());
            Some(CycleDecision::RunCode { args: RunCodeArgs { code, user_message } })
        }
        "final" => obj
            .get("user_output")
            .or_else(|| obj.get("answer"))
            .and_then(|x| x.as_str())
            .map(|s| CycleDecision::Final { user_output: s.to_string() }),
        _ => None,
    }
}
