use serde::Deserialize;
use serde_json::Value;

/// Prediction object returned by create and get calls.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ReplicatePrediction {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) output: Option<Value>,
    /// Usually a string, occasionally a structured object.
    #[serde(default)]
    pub(crate) error: Option<Value>,
    #[serde(default)]
    pub(crate) logs: Option<String>,
    #[serde(default)]
    pub(crate) created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ReplicateModelList {
    #[serde(default)]
    pub(crate) results: Vec<ReplicateModel>,
    #[serde(default)]
    pub(crate) next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ReplicateModel {
    pub(crate) owner: String,
    pub(crate) name: String,
}
