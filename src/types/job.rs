use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of an upstream prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    /// Parses a vendor status string. Unrecognized values count as still running.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "starting" | "queued" | "pending" => Self::Starting,
            "succeeded" | "successful" | "completed" | "done" => Self::Succeeded,
            "failed" | "error" => Self::Failed,
            "canceled" | "cancelled" | "aborted" => Self::Canceled,
            _ => Self::Processing,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// Snapshot of a vendor job, replaced wholesale on each status fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionJob {
    pub id: String,
    pub status: JobStatus,
    /// Unix timestamp in seconds, when the vendor reports one.
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

impl PredictionJob {
    pub fn new(id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            id: id.into(),
            status,
            created_at: None,
            output: None,
            error: None,
            logs: None,
        }
    }

    /// Text accumulated so far in `output`.
    ///
    /// Language models stream output as an array of string fragments; a bare string
    /// is returned as-is and any other shape yields an empty string.
    pub fn output_text(&self) -> String {
        match &self.output {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => String::new(),
        }
    }

    /// Every URL found in `output`, in order.
    pub fn output_urls(&self) -> Vec<String> {
        match &self.output {
            Some(Value::String(url)) if url.starts_with("http") => vec![url.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|item| item.starts_with("http"))
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_parsing_is_total() {
        assert_eq!(JobStatus::parse("succeeded"), JobStatus::Succeeded);
        assert_eq!(JobStatus::parse("CANCELLED"), JobStatus::Canceled);
        assert_eq!(JobStatus::parse("weird"), JobStatus::Processing);
        assert!(!JobStatus::parse("starting").is_terminal());
    }

    #[test]
    fn output_text_concatenates_fragments() {
        let mut job = PredictionJob::new("j", JobStatus::Processing);
        job.output = Some(json!(["Hel", "lo", null]));
        assert_eq!(job.output_text(), "Hello");

        job.output = Some(json!(["https://cdn/x.png", "not a url"]));
        assert_eq!(job.output_urls(), vec!["https://cdn/x.png".to_string()]);
    }
}
