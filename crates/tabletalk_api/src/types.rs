use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadResponse {
    pub status: String,
    pub message: String,
    pub filename: String,
    /// (rows, cols); serializes as a two-element array.
    pub shape: (usize, usize),
    pub columns: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct QueryRequest {
    pub input: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct QueryResponse {
    pub status: String,
    pub final_answer: String,
    /// Base64-encoded PNG, absent when the query produced no plot.
    pub generated_plot: Option<String>,
}

/// Error body shape for non-2xx responses.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorDetail {
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_serializes_as_array() {
        let resp = UploadResponse {
            status: "success".into(),
            message: "ok".into(),
            filename: "data.csv".into(),
            shape: (3, 2),
            columns: vec!["a".into(), "b".into()],
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["shape"], serde_json::json!([3, 2]));
        assert_eq!(v["columns"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn absent_plot_serializes_as_null() {
        let resp = QueryResponse { status: "success".into(), final_answer: "42".into(), generated_plot: None };
        let v = serde_json::to_value(&resp).unwrap();
        assert!(v["generated_plot"].is_null());
    }
}
