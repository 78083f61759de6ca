use std::sync::Arc;

use parking_lot::Mutex;

/// One drawable series on the pending figure.
#[derive(Debug, Clone, PartialEq)]
pub enum Trace {
    Line { x: Vec<f64>, y: Vec<f64> },
    Scatter { x: Vec<f64>, y: Vec<f64> },
    Bars { labels: Vec<String>, values: Vec<f64> },
    Hist { values: Vec<f64>, bins: usize },
}

#[derive(Debug, Default)]
pub struct FigureState {
    pub traces: Vec<Trace>,
    pub title: Option<String>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    touched: bool,
}

impl FigureState {
    fn touch(&mut self) {
        self.touched = true;
    }
}

/// The plotting capability handed to exactly one sandbox run. The script
/// calls into this instead of any real display; `show` is a no-op by
/// construction, so display suppression needs no global patching. All
/// figure state lives behind this handle and is dropped with it, which is
/// what guarantees a figure can never leak into a later invocation.
#[derive(Clone, Default)]
pub struct FigureSession {
    state: Arc<Mutex<FigureState>>,
}

impl FigureSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, trace: Trace) {
        let mut state = self.state.lock();
        state.touch();
        state.traces.push(trace);
    }

    pub fn set_title(&self, title: &str) {
        let mut state = self.state.lock();
        state.touch();
        state.title = Some(title.to_string());
    }

    pub fn set_x_label(&self, label: &str) {
        let mut state = self.state.lock();
        state.touch();
        state.x_label = Some(label.to_string());
    }

    pub fn set_y_label(&self, label: &str) {
        let mut state = self.state.lock();
        state.touch();
        state.y_label = Some(label.to_string());
    }

    /// Whether the running script created a figure during this call.
    pub fn has_figure(&self) -> bool {
        self.state.lock().touched
    }

    /// Takes the pending figure, leaving the session empty.
    pub fn take(&self) -> FigureState {
        std::mem::take(&mut *self.state.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_session_has_no_figure() {
        assert!(!FigureSession::new().has_figure());
    }

    #[test]
    fn any_figure_call_marks_the_session() {
        let fs = FigureSession::new();
        fs.set_title("t");
        assert!(fs.has_figure());

        let fs = FigureSession::new();
        fs.push(Trace::Line { x: vec![0.0], y: vec![1.0] });
        assert!(fs.has_figure());
    }

    #[test]
    fn take_drains_the_state() {
        let fs = FigureSession::new();
        fs.push(Trace::Hist { values: vec![1.0, 2.0], bins: 4 });
        let state = fs.take();
        assert_eq!(state.traces.len(), 1);
        assert!(!fs.has_figure());
    }
}
