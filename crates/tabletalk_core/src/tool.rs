use base64::{engine::general_purpose::STANDARD, Engine as _};
use rhai::{Dynamic, Scope};
use tracing::{debug, warn};

use crate::output::ToolOutput;
use crate::sandbox::{build_engine, render_png, stringify, FigureSession, Frame};
use crate::table::SharedFrame;

/// The single capability exposed to the agent: run analyst code against the
/// session table and hand back a normalized observation. Execution failures
/// are data for the agent to react to, never errors of the surrounding
/// request.
pub struct CodeTool {
    table: SharedFrame,
}

impl CodeTool {
    pub const NAME: &'static str = "code_interpreter";
    pub const DESCRIPTION: &'static str = "Executes rhai code for data analysis or visualization. \
        It can inspect data, perform calculations, or generate plots. \
        The user's table is available as the `df` variable.";

    /// The table is bound once; swapping datasets means building a new tool.
    pub fn new(table: SharedFrame) -> Self {
        Self { table }
    }

    pub fn execute(&self, code: &str) -> ToolOutput {
        debug!(target: "sandbox", %code, "executing analyst code");

        // The figure session is created per call and dropped with this
        // frame, so figure state cannot survive into the next invocation
        // no matter how the evaluation ends.
        let figures = FigureSession::new();
        let engine = build_engine(&figures);
        let mut scope = Scope::new();
        scope.push("df", Frame::new(self.table.clone()));

        let value = match engine.eval_with_scope::<Dynamic>(&mut scope, code) {
            Ok(value) => value,
            Err(e) => {
                warn!(target: "sandbox", error = %e, "analyst code failed");
                return ToolOutput::Error { message: format!("Error executing code: {e}") };
            }
        };

        let rendered = stringify(&value);
        if figures.has_figure() {
            match render_png(&figures.take()) {
                Ok(png) => ToolOutput::Plot {
                    data: STANDARD.encode(png),
                    caption: if rendered.is_empty() { "Generated plot.".to_string() } else { rendered },
                },
                Err(e) => {
                    warn!(target: "sandbox", error = %e, "figure rendering failed");
                    ToolOutput::Error { message: format!("Error executing code: {e}") }
                }
            }
        } else {
            ToolOutput::Text { data: rendered }
        }
    }
}
