use chrono::DateTime;
use serde_json::Value;

use crate::error::LLMError;
use crate::provider::shared::{now_unix, usage_or_estimate};
use crate::types::{
    ChatRequest, ChatResponse, Choice, FinishReason, ImageData, ImageResponse,
    ImageResponseFormat, JobStatus, Message, ModelInfo, PredictionJob, ProviderType, VideoData,
    VideoResponse,
};

use super::types::{ReplicateModelList, ReplicatePrediction};

pub(crate) fn prediction_to_job(prediction: ReplicatePrediction) -> PredictionJob {
    let mut job = PredictionJob::new(prediction.id, JobStatus::parse(&prediction.status));
    job.output = prediction.output.filter(|output| !output.is_null());
    job.error = prediction.error.and_then(|error| match error {
        Value::Null => None,
        Value::String(message) => Some(message),
        other => Some(other.to_string()),
    });
    job.logs = prediction.logs;
    job.created_at = prediction
        .created_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.timestamp());
    job
}

/// Language models report no token counters, so usage is always estimated.
pub(crate) fn map_chat(job: PredictionJob, request: &ChatRequest, alias: &str) -> ChatResponse {
    let text = job.output_text();
    let usage = usage_or_estimate(None, ProviderType::Generic, request, &text);
    ChatResponse {
        id: job.id,
        object: ChatResponse::OBJECT.to_string(),
        created: job.created_at.unwrap_or_else(now_unix),
        model: alias.to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message::assistant(text),
            finish_reason: FinishReason::Stop,
        }],
        usage,
    }
}

/// Output files as URLs; inline `data:` outputs are also exposed as base64.
pub(crate) fn map_images(
    provider: &'static str,
    job: PredictionJob,
    format: ImageResponseFormat,
) -> Result<ImageResponse, LLMError> {
    let data: Vec<ImageData> = output_files(&job)
        .into_iter()
        .map(|file| {
            let inline = file
                .strip_prefix("data:")
                .and_then(|rest| rest.split_once(";base64,"))
                .map(|(_, b64)| b64.to_string());
            match inline {
                Some(b64) => ImageData {
                    url: (format == ImageResponseFormat::Url).then_some(file),
                    b64_json: Some(b64),
                    ..ImageData::default()
                },
                None => ImageData {
                    url: Some(file),
                    ..ImageData::default()
                },
            }
        })
        .collect();
    if data.is_empty() {
        return Err(LLMError::decode(
            provider,
            format!("prediction {} finished without image output", job.id),
        ));
    }
    Ok(ImageResponse {
        created: job.created_at.unwrap_or_else(now_unix),
        data,
    })
}

pub(crate) fn map_video(
    provider: &'static str,
    job: PredictionJob,
) -> Result<VideoResponse, LLMError> {
    let data: Vec<VideoData> = output_files(&job)
        .into_iter()
        .map(|url| VideoData {
            url: Some(url),
            b64_json: None,
        })
        .collect();
    if data.is_empty() {
        return Err(LLMError::decode(
            provider,
            format!("prediction {} finished without video output", job.id),
        ));
    }
    Ok(VideoResponse {
        created: job.created_at.unwrap_or_else(now_unix),
        id: job.id,
        status: "succeeded".to_string(),
        data,
    })
}

fn output_files(job: &PredictionJob) -> Vec<String> {
    let is_file = |item: &str| item.starts_with("http") || item.starts_with("data:");
    match &job.output {
        Some(Value::String(item)) if is_file(item) => vec![item.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|item| is_file(item))
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn map_models(list: ReplicateModelList) -> Vec<ModelInfo> {
    list.results
        .into_iter()
        .map(|model| ModelInfo::new(format!("{}/{}", model.owner, model.name), model.owner))
        .collect()
}
