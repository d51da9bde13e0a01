use async_trait::async_trait;

use crate::error::LLMError;
use crate::poller::JobSource;
use crate::provider::shared::{ProviderCore, parse_value};
use crate::types::PredictionJob;

use super::response::prediction_to_job;
use super::types::ReplicatePrediction;

/// Status source for `GET /predictions/{id}`.
pub(crate) struct PredictionSource {
    core: ProviderCore,
    api_base: String,
}

impl PredictionSource {
    pub(crate) fn new(core: ProviderCore, api_base: String) -> Self {
        Self { core, api_base }
    }
}

#[async_trait]
impl JobSource for PredictionSource {
    fn provider(&self) -> &'static str {
        self.core.name
    }

    async fn fetch(&self, job_id: &str) -> Result<PredictionJob, LLMError> {
        let value = self
            .core
            .get_job(format!("{}/predictions/{job_id}", self.api_base))
            .await?;
        let prediction: ReplicatePrediction = parse_value(self.core.name, value)?;
        Ok(prediction_to_job(prediction))
    }
}
