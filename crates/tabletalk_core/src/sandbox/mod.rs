//! The analyst sandbox: a per-invocation rhai engine with the uploaded
//! table bound as `df` and a scoped plotting capability. Nothing here is a
//! security boundary; scripts have full access to the shared frame.

pub mod engine;
pub mod figure;
pub mod render;

pub use engine::{build_engine, stringify, Frame};
pub use figure::{FigureSession, FigureState, Trace};
pub use render::render_png;
