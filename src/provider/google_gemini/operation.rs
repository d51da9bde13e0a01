use async_trait::async_trait;
use serde_json::Value;

use crate::error::LLMError;
use crate::poller::JobSource;
use crate::provider::shared::{ProviderCore, parse_value};
use crate::types::{JobStatus, PredictionJob};

use super::types::GeminiOperation;

/// Status source for Veo `predictLongRunning` operations.
pub(crate) struct OperationSource {
    core: ProviderCore,
    api_base: String,
}

impl OperationSource {
    pub(crate) fn new(core: ProviderCore, api_base: String) -> Self {
        Self { core, api_base }
    }
}

#[async_trait]
impl JobSource for OperationSource {
    fn provider(&self) -> &'static str {
        self.core.name
    }

    async fn fetch(&self, job_id: &str) -> Result<PredictionJob, LLMError> {
        let value = self
            .core
            .get_job(format!("{}/{job_id}", self.api_base))
            .await?;
        let operation: GeminiOperation = parse_value(self.core.name, value)?;
        Ok(operation_to_job(operation))
    }
}

pub(crate) fn operation_to_job(operation: GeminiOperation) -> PredictionJob {
    if !operation.done {
        return PredictionJob::new(operation.name, JobStatus::Processing);
    }
    if let Some(error) = operation.error {
        let mut job = PredictionJob::new(operation.name, JobStatus::Failed);
        job.error = Some(
            error
                .message
                .unwrap_or_else(|| format!("operation failed with code {}", error.code.unwrap_or(0))),
        );
        return job;
    }

    let uris = operation
        .response
        .as_ref()
        .map(video_uris)
        .unwrap_or_default();
    let mut job = PredictionJob::new(operation.name, JobStatus::Succeeded);
    if uris.is_empty() {
        let filtered = operation
            .response
            .as_ref()
            .and_then(|r| r.pointer("/generateVideoResponse/raiMediaFilteredReasons/0"))
            .and_then(Value::as_str)
            .unwrap_or("operation finished without generated videos");
        job.status = JobStatus::Failed;
        job.error = Some(filtered.to_string());
    } else {
        job.output = Some(Value::Array(uris.into_iter().map(Value::String).collect()));
    }
    job
}

fn video_uris(response: &Value) -> Vec<String> {
    response
        .pointer("/generateVideoResponse/generatedSamples")
        .and_then(Value::as_array)
        .map(|samples| {
            samples
                .iter()
                .filter_map(|sample| sample.pointer("/video/uri").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn operation(value: Value) -> GeminiOperation {
        parse_value("google_gemini", value).expect("operation")
    }

    #[test]
    fn running_operation_is_processing() {
        let job = operation_to_job(operation(json!({"name": "models/veo/operations/1"})));
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.id, "models/veo/operations/1");
    }

    #[test]
    fn finished_operation_lists_video_uris() {
        let job = operation_to_job(operation(json!({
            "name": "op",
            "done": true,
            "response": {"generateVideoResponse": {"generatedSamples": [
                {"video": {"uri": "https://generativelanguage.googleapis.com/files/a:download"}},
                {"video": {"uri": "https://generativelanguage.googleapis.com/files/b:download"}}
            ]}}
        })));
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.output_urls().len(), 2);
    }

    #[test]
    fn error_and_filtered_results_fail() {
        let failed = operation_to_job(operation(json!({
            "name": "op", "done": true, "error": {"code": 3, "message": "bad prompt"}
        })));
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("bad prompt"));

        let filtered = operation_to_job(operation(json!({
            "name": "op", "done": true,
            "response": {"generateVideoResponse": {"raiMediaFilteredReasons": ["unsafe"]}}
        })));
        assert_eq!(filtered.status, JobStatus::Failed);
        assert_eq!(filtered.error.as_deref(), Some("unsafe"));
    }
}
