use std::sync::Arc;

use anyhow::{Context, Result};
use polars::prelude::DataFrame;
use serde_json::json;
use tracing::{info, warn};

use crate::llm_protocol::{system_prompt, CycleDecision, CycleInput, LlmClient, LlmError, TranscriptItem};
use crate::output::ToolOutput;
use crate::table::{schema_summary, shared};
use crate::tool::CodeTool;

/// Answer returned when the turn budget runs out before the model commits
/// to a final action.
pub const NO_OUTPUT_FALLBACK: &str = "No text output was generated.";

pub const DEFAULT_MAX_TURNS: usize = 15;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base: Option<String>,
    pub max_turns: usize,
}

impl AgentConfig {
    /// Reads LLM settings from the environment. A missing API key is fatal:
    /// the process must not start without one.
    pub fn from_env() -> Result<Self> {
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set.")?;
        Ok(Self {
            openai_api_key,
            openai_model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            openai_base: std::env::var("OPENAI_BASE").ok(),
            max_turns: std::env::var("TABLETALK_MAX_TURNS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_TURNS),
        })
    }
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub final_answer: String,
    /// Base64 PNG of the most recent plot produced during this query.
    pub plot: Option<String>,
}

/// One table, one conversational memory, one bound agent. Built fresh on
/// every upload; building a new session is the only way to swap the dataset
/// or clear the memory.
pub struct Session {
    tool: CodeTool,
    llm: Arc<dyn LlmClient>,
    memory: Vec<TranscriptItem>,
    preamble: String,
    max_turns: usize,
}

impl Session {
    pub fn new(df: DataFrame, llm: Arc<dyn LlmClient>, max_turns: usize) -> Self {
        let (shape, columns) = schema_summary(&df);
        let table = shared(df);
        Self {
            tool: CodeTool::new(table),
            llm,
            memory: Vec::new(),
            preamble: system_prompt(shape, &columns),
            max_turns,
        }
    }

    /// Prior turns fed back to the model on each cycle; append-only until
    /// the session is rebuilt.
    pub fn memory(&self) -> &[TranscriptItem] {
        &self.memory
    }

    /// Drives the reasoning loop for one question. The adapter may run
    /// zero or more times, strictly in sequence; one query at a time per
    /// session (the caller serializes).
    #[tracing::instrument(skip_all, fields(question = %question))]
    pub async fn query(&mut self, question: &str) -> Result<QueryOutcome> {
        self.memory.push(TranscriptItem { role: "user".into(), content: question.into() });

        let mut trace: Vec<(String, ToolOutput)> = Vec::new();
        let mut last_tool: Option<serde_json::Value> = None;
        let mut final_answer: Option<String> = None;

        for turn in 0..self.max_turns {
            let input = CycleInput {
                system_instructions: self.preamble.clone(),
                transcript: self.memory.clone(),
                tool_context: last_tool.clone().unwrap_or_else(|| json!({})),
            };

            let decision = match self.llm.decide(&input).await {
                Ok(d) => d,
                Err(LlmError::Parse(msg)) => {
                    // Malformed model output gets a corrective turn instead
                    // of failing the request.
                    warn!(turn, %msg, "unparseable model output, requesting a retry");
                    self.memory.push(TranscriptItem {
                        role: "tool".into(),
                        content: format!(
                            "Your last reply could not be parsed ({msg}). \
                             Reply with a single valid JSON decision object."
                        ),
                    });
                    continue;
                }
                Err(e) => return Err(e).context("agent decision failed"),
            };

            match decision {
                CycleDecision::RunCode { args } => {
                    if let Some(msg) = &args.user_message {
                        info!(turn, "{msg}");
                    }
                    let out = self.tool.execute(&args.code);
                    last_tool = Some(serde_json::to_value(&out)?);
                    self.memory.push(TranscriptItem {
                        role: "tool".into(),
                        content: format!("{} -> {}", CodeTool::NAME, serde_json::to_string(&out)?),
                    });
                    trace.push((args.code, out));
                }
                CycleDecision::Final { user_output } => {
                    self.memory.push(TranscriptItem { role: "assistant".into(), content: user_output.clone() });
                    final_answer = Some(user_output);
                    break;
                }
            }
        }

        // Scan the step trace from last to first: the most recent plot of
        // this query wins, earlier ones are discarded.
        let plot = trace.iter().rev().find_map(|(_, out)| match out {
            ToolOutput::Plot { data, .. } => Some(data.clone()),
            ToolOutput::Text { .. } | ToolOutput::Error { .. } => None,
        });

        Ok(QueryOutcome { final_answer: final_answer.unwrap_or_else(|| NO_OUTPUT_FALLBACK.to_string()), plot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_protocol::RunCodeArgs;
    use crate::table::{load_csv, tests::SAMPLE_CSV};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    enum Step {
        Run(&'static str),
        Final(&'static str),
        ParseFailure(&'static str),
        HttpFailure(&'static str),
    }

    /// Scripted stand-in for the hosted model: pops one step per cycle and
    /// records every input it was shown.
    struct ScriptedLlm {
        steps: Mutex<VecDeque<Step>>,
        seen: Mutex<Vec<CycleInput>>,
    }

    impl ScriptedLlm {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self { steps: Mutex::new(steps.into()), seen: Mutex::new(Vec::new()) })
        }

        fn seen(&self) -> Vec<CycleInput> {
            self.seen.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for ScriptedLlm {
        async fn decide(&self, input: &CycleInput) -> Result<CycleDecision, LlmError> {
            self.seen.lock().push(input.clone());
            match self.steps.lock().pop_front() {
                Some(Step::Run(code)) => Ok(CycleDecision::RunCode {
                    args: RunCodeArgs { code: code.into(), user_message: None },
                }),
                Some(Step::Final(text)) => Ok(CycleDecision::Final { user_output: text.into() }),
                Some(Step::ParseFailure(msg)) => Err(LlmError::Parse(msg.into())),
                Some(Step::HttpFailure(msg)) => Err(LlmError::Http(msg.into())),
                None => Err(LlmError::Api("script exhausted".into())),
            }
        }
    }

    fn session_with(steps: Vec<Step>) -> (Session, Arc<ScriptedLlm>) {
        let llm = ScriptedLlm::new(steps);
        let session = Session::new(load_csv(SAMPLE_CSV).unwrap(), llm.clone(), DEFAULT_MAX_TURNS);
        (session, llm)
    }

    fn plot_payload(code: &str) -> String {
        let tool = CodeTool::new(shared(load_csv(SAMPLE_CSV).unwrap()));
        match tool.execute(code) {
            ToolOutput::Plot { data, .. } => data,
            other => panic!("expected plot output, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn scripted_query_flows_through_the_tool() {
        let (mut session, llm) = session_with(vec![
            Step::Run(r#"df["a"].sum()"#),
            Step::Final("The sum of column a is 9."),
        ]);

        let outcome = session.query("what is the sum of column a?").await.unwrap();
        assert_eq!(outcome.final_answer, "The sum of column a is 9.");
        assert!(outcome.plot.is_none());

        // The second cycle saw the tool's normalized observation.
        let seen = llm.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].tool_context["type"], "text");
        assert_eq!(seen[1].tool_context["data"], "9");
        assert!(seen[1].system_instructions.contains("Shape: (3, 2)"));
    }

    #[tokio::test]
    async fn most_recent_plot_wins() {
        const FIRST: &str = r#"hist(df["a"])"#;
        const LAST: &str = r#"plot(df["a"], df["b"])"#;
        let (mut session, _) = session_with(vec![Step::Run(FIRST), Step::Run(LAST), Step::Final("two charts")]);

        let outcome = session.query("chart a and b").await.unwrap();
        let plot = outcome.plot.expect("plot expected");
        // Rendering is deterministic, so the winning payload must match a
        // fresh execution of the later snippet and not the earlier one.
        assert_eq!(plot, plot_payload(LAST));
        assert_ne!(plot, plot_payload(FIRST));
    }

    #[tokio::test]
    async fn tool_errors_are_observations_not_failures() {
        let (mut session, llm) = session_with(vec![
            Step::Run("definitely not rhai"),
            Step::Final("I could not compute that."),
        ]);

        let outcome = session.query("break please").await.unwrap();
        assert_eq!(outcome.final_answer, "I could not compute that.");
        let seen = llm.seen();
        assert_eq!(seen[1].tool_context["type"], "error");
    }

    #[tokio::test]
    async fn exhausted_turns_fall_back_to_placeholder() {
        let llm = ScriptedLlm::new(vec![Step::Run("1"), Step::Run("2"), Step::Run("3")]);
        let mut session = Session::new(load_csv(SAMPLE_CSV).unwrap(), llm, 2);

        let outcome = session.query("loop forever").await.unwrap();
        assert_eq!(outcome.final_answer, NO_OUTPUT_FALLBACK);
    }

    #[tokio::test]
    async fn parse_failures_get_a_corrective_turn() {
        let (mut session, llm) = session_with(vec![
            Step::ParseFailure("expected value"),
            Step::Final("recovered"),
        ]);

        let outcome = session.query("hello").await.unwrap();
        assert_eq!(outcome.final_answer, "recovered");
        let seen = llm.seen();
        assert!(seen[1]
            .transcript
            .iter()
            .any(|t| t.role == "tool" && t.content.contains("could not be parsed")));
    }

    #[tokio::test]
    async fn backend_failures_propagate() {
        let (mut session, _) = session_with(vec![Step::HttpFailure("connection refused")]);
        let err = session.query("hello").await.unwrap_err();
        assert!(format!("{err:#}").contains("connection refused"));
    }

    #[tokio::test]
    async fn memory_accumulates_until_the_session_is_rebuilt() {
        let (mut session, _) = session_with(vec![
            Step::Final("first answer"),
            Step::Final("second answer"),
        ]);

        session.query("first question").await.unwrap();
        session.query("second question").await.unwrap();
        let roles: Vec<&str> = session.memory().iter().map(|t| t.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user", "assistant"]);

        // Rebuilding is the reset: a new session starts with empty memory.
        let fresh = Session::new(load_csv(SAMPLE_CSV).unwrap(), ScriptedLlm::new(vec![]), DEFAULT_MAX_TURNS);
        assert!(fresh.memory().is_empty());
    }
}
