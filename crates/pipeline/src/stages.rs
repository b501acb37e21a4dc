//! CPU stages: waveform rendering and transcript analytics

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use transcribe_engine::{TaskContext, TaskFailure, TaskHandler};

use crate::{analytics, file_id_from_payload, waveform, PipelineDeps};

pub struct WaveformHandler {
    deps: Arc<PipelineDeps>,
}

impl WaveformHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl TaskHandler for WaveformHandler {
    async fn run(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskFailure> {
        let deps = &self.deps;
        let file_id = file_id_from_payload(&ctx.payload)?;
        let file = deps
            .files
            .get(file_id)
            .await?
            .ok_or_else(|| TaskFailure::new(format!("media file {file_id} not found")))?;

        ctx.report_progress(0.1).await;
        let body = deps.storage.get(&file.storage_path).await?;

        ctx.report_progress(0.5).await;
        let data = waveform::generate_from_wav(&body.data)?;
        let resolutions = data.as_object().map(|m| m.len()).unwrap_or(0);
        deps.files.set_waveform_data(file_id, data).await?;

        Ok(serde_json::json!({ "resolutions": resolutions }))
    }
}

pub struct AnalyticsHandler {
    deps: Arc<PipelineDeps>,
}

impl AnalyticsHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl TaskHandler for AnalyticsHandler {
    async fn run(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskFailure> {
        let deps = &self.deps;
        let file_id = file_id_from_payload(&ctx.payload)?;

        let segments = deps.segments.list_for_file(file_id).await?;
        if segments.is_empty() {
            return Err(TaskFailure::new("no transcript segments to analyze"));
        }
        ctx.report_progress(0.5).await;

        let speakers = deps.speakers.list_for_file(file_id).await?;
        let names: HashMap<i64, String> = speakers
            .iter()
            .map(|s| (s.id, s.resolved_name().to_string()))
            .collect();

        let result = analytics::compute(&segments, &names);
        Ok(serde_json::to_value(result).map_err(|e| TaskFailure::new(e.to_string()))?)
    }
}
