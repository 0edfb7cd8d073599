//! Reasoner adapter (§C9): assemble a prompt, invoke a language model, and
//! parse its reply into a structured decision.
//!
//! Grounded on Reagent's `templates/template.rs` (`Template::compile`, a
//! `{{PLACEHOLDER}}` string-replace over a fixed data map) for prompt
//! assembly, and its `services/llm/client.rs` (`ModelClient`/`ClientConfig`)
//! for the shape of a single concrete HTTP-backed implementation — narrowed
//! to one provider, since the contract only asks for one working adapter.

use crate::error::{AgoError, AgoResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Everything the adapter needs to assemble one prompt: the agent's
/// identity/system prompt from its template, the custom section the
/// template injects (with placeholders already substituted by the caller),
/// the running scratchpad, and the latest observation (a tool result, an
/// incoming message, or nothing on the first turn).
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub role_identity: String,
    pub custom_section: String,
    pub scratchpad: String,
    pub latest_observation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReasonerResult {
    FinalAnswer { text: String },
    ToolCall { name: String, params: HashMap<String, String> },
}

/// Substitutes `{{AVAILABLE_TOOLS}}`/`{{AGENT_NETWORK}}` (and any other
/// `{{KEY}}` placeholder present in `data`) into a template's custom
/// section. Mirrors Reagent's `Template::compile`: plain string replacement,
/// no templating engine.
pub fn compile_custom_section(template: &str, data: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in data {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

const SUFFIX: &str = r#"
Respond with exactly one JSON object on a single line, matching one of:
{"type":"final_answer","text":"<your answer>"}
{"type":"tool_call","name":"<tool name>","params":{"<key>":"<value>", ...}}
No other text before or after the JSON object."#;

fn assemble_prompt(ctx: &PromptContext) -> String {
    let mut prompt = String::new();
    prompt.push_str(&ctx.role_identity);
    prompt.push_str("\n\n");
    prompt.push_str(&ctx.custom_section);
    if !ctx.scratchpad.is_empty() {
        prompt.push_str("\n\n# Scratchpad\n");
        prompt.push_str(&ctx.scratchpad);
    }
    if let Some(observation) = &ctx.latest_observation {
        prompt.push_str("\n\n# Latest observation\n");
        prompt.push_str(observation);
    }
    prompt.push_str("\n\n");
    prompt.push_str(SUFFIX);
    prompt
}

/// Narrow contract the worker's turn loop calls through. Single-call: the
/// adapter never loops on its own.
#[async_trait::async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason(&self, ctx: PromptContext) -> AgoResult<ReasonerResult>;
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawDecision {
    FinalAnswer { text: String },
    ToolCall { name: String, params: HashMap<String, String> },
}

/// Pull the first line that parses as a `RawDecision` out of a model's raw
/// text reply, tolerating a surrounding code fence or stray whitespace.
fn parse_decision(raw: &str) -> AgoResult<ReasonerResult> {
    for line in raw.lines() {
        let candidate = line.trim().trim_start_matches("```json").trim_start_matches("```").trim();
        if candidate.is_empty() {
            continue;
        }
        if let Ok(decision) = serde_json::from_str::<RawDecision>(candidate) {
            return Ok(match decision {
                RawDecision::FinalAnswer { text } => ReasonerResult::FinalAnswer { text },
                RawDecision::ToolCall { name, params } => ReasonerResult::ToolCall { name, params },
            });
        }
    }
    // The whole reply, not just one line, might be the (possibly
    // multi-line-pretty-printed) JSON object.
    if let Ok(decision) = serde_json::from_str::<RawDecision>(raw.trim()) {
        return Ok(match decision {
            RawDecision::FinalAnswer { text } => ReasonerResult::FinalAnswer { text },
            RawDecision::ToolCall { name, params } => ReasonerResult::ToolCall { name, params },
        });
    }
    Err(AgoError::ReasonerParseError(raw.to_string()))
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Default concrete adapter: one OpenAI-compatible chat-completions HTTP
/// endpoint, one request per `reason` call.
pub struct HttpReasoner {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpReasoner {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>, timeout: Duration) -> AgoResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgoError::ConfigInvalid { key: "reasoner.endpoint".to_string(), reason: e.to_string() })?;
        Ok(HttpReasoner { client, endpoint: endpoint.into(), model: model.into(), api_key })
    }
}

#[async_trait::async_trait]
impl Reasoner for HttpReasoner {
    async fn reason(&self, ctx: PromptContext) -> AgoResult<ReasonerResult> {
        let prompt = assemble_prompt(&ctx);
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: &prompt }],
            temperature: 0.2,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| AgoError::SpawnFailed {
            instance: "<reasoner>".to_string(),
            reason: format!("llm request failed: {e}"),
        })?;

        let response = response.error_for_status().map_err(|e| AgoError::SpawnFailed {
            instance: "<reasoner>".to_string(),
            reason: format!("llm endpoint returned an error status: {e}"),
        })?;

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            AgoError::ReasonerParseError(format!("malformed chat-completion envelope: {e}"))
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AgoError::ReasonerParseError("chat completion returned no choices".to_string()))?;

        parse_decision(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_custom_section_substitutes_placeholders() {
        let mut data = HashMap::new();
        data.insert("AVAILABLE_TOOLS".to_string(), "search, summarize".to_string());
        data.insert("AGENT_NETWORK".to_string(), "helper-aaaaaaaa".to_string());
        let out = compile_custom_section("Tools: {{AVAILABLE_TOOLS}}. Peers: {{AGENT_NETWORK}}.", &data);
        assert_eq!(out, "Tools: search, summarize. Peers: helper-aaaaaaaa.");
    }

    #[test]
    fn compile_custom_section_leaves_unknown_placeholders_untouched() {
        let data = HashMap::new();
        let out = compile_custom_section("Tools: {{AVAILABLE_TOOLS}}.", &data);
        assert_eq!(out, "Tools: {{AVAILABLE_TOOLS}}.");
    }

    #[test]
    fn parse_decision_reads_final_answer() {
        let raw = r#"{"type":"final_answer","text":"done"}"#;
        let decision = parse_decision(raw).unwrap();
        assert_eq!(decision, ReasonerResult::FinalAnswer { text: "done".to_string() });
    }

    #[test]
    fn parse_decision_reads_tool_call() {
        let raw = r#"{"type":"tool_call","name":"search","params":{"query":"rust"}}"#;
        let decision = parse_decision(raw).unwrap();
        match decision {
            ReasonerResult::ToolCall { name, params } => {
                assert_eq!(name, "search");
                assert_eq!(params.get("query"), Some(&"rust".to_string()));
            }
            _ => panic!("expected a tool call"),
        }
    }

    #[test]
    fn parse_decision_tolerates_a_surrounding_code_fence() {
        let raw = "```json\n{\"type\":\"final_answer\",\"text\":\"ok\"}\n```";
        let decision = parse_decision(raw).unwrap();
        assert_eq!(decision, ReasonerResult::FinalAnswer { text: "ok".to_string() });
    }

    #[test]
    fn parse_decision_rejects_unparseable_reply() {
        let err = parse_decision("I think the answer is 42.").unwrap_err();
        assert!(matches!(err, AgoError::ReasonerParseError(_)));
    }

    #[test]
    fn assembled_prompt_carries_all_segments() {
        let ctx = PromptContext {
            role_identity: "You are a researcher.".to_string(),
            custom_section: "Tools: search.".to_string(),
            scratchpad: "Step 1: searched for X.".to_string(),
            latest_observation: Some("search returned 3 results.".to_string()),
        };
        let prompt = assemble_prompt(&ctx);
        assert!(prompt.contains("You are a researcher."));
        assert!(prompt.contains("Tools: search."));
        assert!(prompt.contains("Step 1: searched for X."));
        assert!(prompt.contains("search returned 3 results."));
        assert!(prompt.contains("final_answer"));
    }
}
