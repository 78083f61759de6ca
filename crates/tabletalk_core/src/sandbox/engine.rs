use polars::prelude::*;
use rhai::{Dynamic, Engine, EvalAltResult, Position};

use crate::table::SharedFrame;

use super::figure::{FigureSession, Trace};

/// Script-side handle to the session table. Cloning shares the underlying
/// frame, so in-place operations from analyst code write through to the
/// table the orchestrator holds (an accepted risk, see crate docs).
#[derive(Clone)]
pub struct Frame {
    inner: SharedFrame,
}

impl Frame {
    pub fn new(inner: SharedFrame) -> Self {
        Self { inner }
    }
}

/// Script-side handle to one column, detached from the frame.
#[derive(Clone)]
pub struct Col {
    series: Series,
}

fn script_err(e: impl std::fmt::Display) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(Dynamic::from(e.to_string()), Position::NONE))
}

fn numeric_values(series: &Series) -> Result<Vec<f64>, Box<EvalAltResult>> {
    let cast = series.cast(&DataType::Float64).map_err(script_err)?;
    let ca = cast.f64().map_err(script_err)?;
    Ok(ca.into_iter().flatten().collect())
}

fn label_values(series: &Series) -> Vec<String> {
    series.iter().map(|v| v.to_string().trim_matches('"').to_string()).collect()
}

/// Builds a single-use engine for one `execute` call. The plotting
/// capability is the given figure session; nothing script-visible touches
/// global state, so there is nothing to restore afterwards.
pub fn build_engine(figures: &FigureSession) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(10_000_000);
    engine.on_print(|text| tracing::info!(target: "sandbox", "{text}"));

    engine.register_type_with_name::<Frame>("Frame");
    engine.register_type_with_name::<Col>("Col");

    // df["a"] -> column handle
    engine.register_indexer_get(|f: &mut Frame, name: &str| -> Result<Col, Box<EvalAltResult>> {
        let df = f.inner.read();
        let series = df.column(name).map_err(script_err)?.clone();
        Ok(Col { series })
    });

    // Frame inspection
    engine.register_fn("shape", |f: &mut Frame| -> rhai::Array {
        let (rows, cols) = f.inner.read().shape();
        vec![Dynamic::from(rows as i64), Dynamic::from(cols as i64)]
    });
    engine.register_fn("columns", |f: &mut Frame| -> rhai::Array {
        f.inner.read().get_column_names().iter().map(|s| Dynamic::from(s.to_string())).collect()
    });
    engine.register_fn("head", |f: &mut Frame| format!("{}", f.inner.read().head(Some(5))));
    engine.register_fn("head", |f: &mut Frame, n: i64| {
        format!("{}", f.inner.read().head(Some(n.max(0) as usize)))
    });

    // Derived frames
    engine.register_fn("select", |f: &mut Frame, cols: rhai::Array| -> Result<Frame, Box<EvalAltResult>> {
        let names: Vec<String> = cols.into_iter().map(|c| c.to_string()).collect();
        let selected = f.inner.read().select(names).map_err(script_err)?;
        Ok(Frame::new(crate::table::shared(selected)))
    });
    engine.register_fn(
        "filter_gt",
        |f: &mut Frame, col: &str, value: f64| -> Result<Frame, Box<EvalAltResult>> {
            filter_numeric(f, col, |ca| ca.gt(value))
        },
    );
    engine.register_fn(
        "filter_lt",
        |f: &mut Frame, col: &str, value: f64| -> Result<Frame, Box<EvalAltResult>> {
            filter_numeric(f, col, |ca| ca.lt(value))
        },
    );
    engine.register_fn(
        "filter_eq",
        |f: &mut Frame, col: &str, value: f64| -> Result<Frame, Box<EvalAltResult>> {
            filter_numeric(f, col, |ca| ca.equal(value))
        },
    );
    engine.register_fn(
        "filter_eq",
        |f: &mut Frame, col: &str, value: &str| -> Result<Frame, Box<EvalAltResult>> {
            let df = f.inner.read();
            let cast = df.column(col).map_err(script_err)?.cast(&DataType::Utf8).map_err(script_err)?;
            let mask = cast.utf8().map_err(script_err)?.equal(value);
            let filtered = df.filter(&mask).map_err(script_err)?;
            Ok(Frame::new(crate::table::shared(filtered)))
        },
    );

    // In-place mutation of the shared table (deliberate, see crate docs).
    engine.register_fn(
        "sort_by",
        |f: &mut Frame, col: &str, descending: bool| -> Result<(), Box<EvalAltResult>> {
            let sorted = {
                let df = f.inner.read();
                let series = df.column(col).map_err(script_err)?;
                let idx = series.arg_sort(SortOptions { descending, ..Default::default() });
                df.take(&idx).map_err(script_err)?
            };
            *f.inner.write() = sorted;
            Ok(())
        },
    );
    engine.register_fn(
        "drop_column",
        |f: &mut Frame, col: &str| -> Result<(), Box<EvalAltResult>> {
            f.inner.write().drop_in_place(col).map(|_| ()).map_err(script_err)
        },
    );

    // Column statistics
    engine.register_fn("len", |c: &mut Col| c.series.len() as i64);
    engine.register_fn("name", |c: &mut Col| c.series.name().to_string());
    engine.register_fn("sum", |c: &mut Col| -> Result<f64, Box<EvalAltResult>> {
        Ok(numeric_values(&c.series)?.iter().sum())
    });
    engine.register_fn("mean", |c: &mut Col| -> Result<f64, Box<EvalAltResult>> {
        let values = numeric_values(&c.series)?;
        if values.is_empty() {
            return Err(script_err(format!("column '{}' has no numeric values", c.series.name())));
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    });
    engine.register_fn("min", |c: &mut Col| -> Result<f64, Box<EvalAltResult>> {
        let values = numeric_values(&c.series)?;
        values
            .iter()
            .copied()
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))
            .ok_or_else(|| script_err(format!("column '{}' has no numeric values", c.series.name())))
    });
    engine.register_fn("max", |c: &mut Col| -> Result<f64, Box<EvalAltResult>> {
        let values = numeric_values(&c.series)?;
        values
            .iter()
            .copied()
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
            .ok_or_else(|| script_err(format!("column '{}' has no numeric values", c.series.name())))
    });

    // Printable forms for scripts that build previews.
    engine.register_fn("to_string", |f: &mut Frame| format!("{}", f.inner.read()));
    engine.register_fn("to_string", |c: &mut Col| format!("{}", c.series));

    // Plotting capability, scoped to this call's figure session.
    register_figures(&mut engine, figures);

    engine
}

fn filter_numeric(
    f: &mut Frame,
    col: &str,
    cmp: impl Fn(&Float64Chunked) -> BooleanChunked,
) -> Result<Frame, Box<EvalAltResult>> {
    let df = f.inner.read();
    let cast = df.column(col).map_err(script_err)?.cast(&DataType::Float64).map_err(script_err)?;
    let mask = cmp(cast.f64().map_err(script_err)?);
    let filtered = df.filter(&mask).map_err(script_err)?;
    Ok(Frame::new(crate::table::shared(filtered)))
}

fn register_figures(engine: &mut Engine, figures: &FigureSession) {
    let fs = figures.clone();
    engine.register_fn("plot", move |x: Col, y: Col| -> Result<(), Box<EvalAltResult>> {
        fs.push(Trace::Line { x: numeric_values(&x.series)?, y: numeric_values(&y.series)? });
        Ok(())
    });
    let fs = figures.clone();
    engine.register_fn("plot", move |y: Col| -> Result<(), Box<EvalAltResult>> {
        let values = numeric_values(&y.series)?;
        let x = (0..values.len()).map(|i| i as f64).collect();
        fs.push(Trace::Line { x, y: values });
        Ok(())
    });
    let fs = figures.clone();
    engine.register_fn("scatter", move |x: Col, y: Col| -> Result<(), Box<EvalAltResult>> {
        fs.push(Trace::Scatter { x: numeric_values(&x.series)?, y: numeric_values(&y.series)? });
        Ok(())
    });
    let fs = figures.clone();
    engine.register_fn("bar", move |labels: Col, values: Col| -> Result<(), Box<EvalAltResult>> {
        fs.push(Trace::Bars {
            labels: label_values(&labels.series),
            values: numeric_values(&values.series)?,
        });
        Ok(())
    });
    let fs = figures.clone();
    engine.register_fn("hist", move |values: Col| -> Result<(), Box<EvalAltResult>> {
        fs.push(Trace::Hist { values: numeric_values(&values.series)?, bins: 10 });
        Ok(())
    });
    let fs = figures.clone();
    engine.register_fn("hist", move |values: Col, bins: i64| -> Result<(), Box<EvalAltResult>> {
        fs.push(Trace::Hist { values: numeric_values(&values.series)?, bins: bins.max(1) as usize });
        Ok(())
    });
    let fs = figures.clone();
    engine.register_fn("title", move |text: &str| fs.set_title(text));
    let fs = figures.clone();
    engine.register_fn("xlabel", move |text: &str| fs.set_x_label(text));
    let fs = figures.clone();
    engine.register_fn("ylabel", move |text: &str| fs.set_y_label(text));
    // Display is the capability itself; showing is a no-op rather than a
    // patched-out library call.
    engine.register_fn("show", || ());
}

/// User-facing string form of a script result. Unit results stringify to
/// the empty string; frames and columns use their tabular display.
pub fn stringify(value: &Dynamic) -> String {
    if value.is::<()>() {
        return String::new();
    }
    if let Ok(v) = value.as_float() {
        return format!("{v}");
    }
    if let Some(frame) = value.clone().try_cast::<Frame>() {
        return format!("{}", frame.inner.read());
    }
    if let Some(col) = value.clone().try_cast::<Col>() {
        return format!("{}", col.series);
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{load_csv, shared, tests::SAMPLE_CSV};
    use rhai::Scope;

    fn eval(code: &str) -> Dynamic {
        let table = shared(load_csv(SAMPLE_CSV).unwrap());
        let figures = FigureSession::new();
        let engine = build_engine(&figures);
        let mut scope = Scope::new();
        scope.push("df", Frame::new(table));
        engine.eval_with_scope::<Dynamic>(&mut scope, code).unwrap()
    }

    #[test]
    fn column_sum_through_indexer() {
        let value = eval(r#"df["a"].sum()"#);
        assert_eq!(stringify(&value), "9");
    }

    #[test]
    fn frame_shape_and_columns() {
        let value = eval("df.shape()");
        let arr = value.cast::<rhai::Array>();
        assert_eq!(arr[0].as_int().unwrap(), 3);
        assert_eq!(arr[1].as_int().unwrap(), 2);

        let value = eval("df.columns()");
        let names: Vec<String> = value.cast::<rhai::Array>().into_iter().map(|d| d.to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn filters_derive_a_new_frame() {
        let value = eval(r#"df.filter_gt("a", 1.0).shape()"#);
        let arr = value.cast::<rhai::Array>();
        assert_eq!(arr[0].as_int().unwrap(), 2);
    }

    #[test]
    fn sort_by_mutates_the_shared_frame() {
        let table = shared(load_csv(SAMPLE_CSV).unwrap());
        let figures = FigureSession::new();
        let engine = build_engine(&figures);
        let mut scope = Scope::new();
        scope.push("df", Frame::new(table.clone()));
        engine
            .eval_with_scope::<Dynamic>(&mut scope, r#"df.sort_by("a", true)"#)
            .unwrap();
        let first: f64 = table.read().column("a").unwrap().cast(&DataType::Float64).unwrap().f64().unwrap().get(0).unwrap();
        assert_eq!(first, 5.0);
    }

    #[test]
    fn missing_column_is_a_script_error() {
        let table = shared(load_csv(SAMPLE_CSV).unwrap());
        let figures = FigureSession::new();
        let engine = build_engine(&figures);
        let mut scope = Scope::new();
        scope.push("df", Frame::new(table));
        let err = engine
            .eval_with_scope::<Dynamic>(&mut scope, r#"df["nope"].sum()"#)
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn plot_calls_land_in_the_figure_session() {
        let table = shared(load_csv(SAMPLE_CSV).unwrap());
        let figures = FigureSession::new();
        let engine = build_engine(&figures);
        let mut scope = Scope::new();
        scope.push("df", Frame::new(table));
        engine
            .eval_with_scope::<Dynamic>(&mut scope, r#"plot(df["a"], df["b"]); show()"#)
            .unwrap();
        assert!(figures.has_figure());
        assert_eq!(figures.take().traces.len(), 1);
    }

    #[test]
    fn unit_results_stringify_to_empty() {
        let value = eval("let x = 1;");
        assert_eq!(stringify(&value), "");
    }
}
