use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tool::CodeTool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCodeArgs {
    pub code: String,
    // A short message to show the user explaining what will happen now.
    #[serde(default)]
    pub user_message: Option<String>,
}

/// One decision per cycle, returned by the model as a single JSON object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CycleDecision {
    // Execute analyst code through the code_interpreter tool.
    RunCode { args: RunCodeArgs },
    // Provide the final user-facing answer.
    Final { user_output: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptItem {
    pub role: String, // "user" | "assistant" | "tool"
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleInput {
    pub system_instructions: String,
    pub transcript: Vec<TranscriptItem>,
    pub tool_context: serde_json::Value,
}

/// Transport and API failures abort the request; parse failures are
/// recoverable inside the agent loop (the model gets a corrective turn).
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Http(String),
    #[error("LLM backend error: {0}")]
    Api(String),
    #[error("Failed to parse model JSON: {0}")]
    Parse(String),
}

/// The reasoning loop's view of the model: one decision per round trip.
/// Implemented by the OpenAI-backed client and by scripted test doubles.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn decide(&self, input: &CycleInput) -> Result<CycleDecision, LlmError>;
}

/// Instruction preamble for one session. The table's shape and column
/// names are embedded so the agent never tries to re-derive or reload the
/// data itself.
pub fn system_prompt(shape: (usize, usize), columns: &[String]) -> String {
    format!(
        r#"You are an expert data analyst equipped with a code interpreter.

On each turn choose exactly ONE of these actions and return ONLY JSON:
- run_code: execute rhai code through the `{tool}` tool. Required fields:
  {{"action":"run_code","args":{{"code":"...","user_message":"<short explanation for the user>"}}}}
- final: provide the final answer to the user after inspecting tool results.
  {{"action":"final","user_output":"<your complete answer to the user>"}}

TOOL GUIDANCE:
1. Your ONLY tool is `{tool}`. {description}
2. The tool returns a JSON object. Check its `type` key: "text" carries a
   result string, "plot" means an image was generated (its `caption`
   summarizes it), "error" carries the failure message of your code.
3. The user's table, `df`, is already loaded.
   - Shape: ({rows}, {cols})
   - Columns: [{columns}]
   - DO NOT try to load the data yourself.

CODE REFERENCE (rhai):
- Columns: df["name"], with .sum(), .mean(), .min(), .max(), .len()
- Frames: df.shape(), df.columns(), df.head(), df.head(n),
  df.select(["a","b"]), df.filter_gt("a", 1.0), df.filter_lt("a", 1.0),
  df.filter_eq("a", 1.0), df.sort_by("a", false), df.drop_column("a")
- Plots: plot(x_col, y_col), scatter(x_col, y_col), bar(labels, values),
  hist(col), hist(col, bins), title("..."), show()
- The value of the last expression is returned as the tool's text result.

Rules:
- ALWAYS use run_code for ANY calculation or data question; never answer
  from memory.
- If a tool result has type "error", fix your code and try again.
- Previous tool results are passed to you in `tool_context`; use them.
- Return only a valid JSON object; no prose outside JSON.

Begin!
"#,
        tool = CodeTool::NAME,
        description = CodeTool::DESCRIPTION,
        rows = shape.0,
        cols = shape.1,
        columns = columns.join(", "),
    )
}
