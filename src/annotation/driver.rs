//! Batch annotation: sample discovery, oracle calls, resumable per-scene logs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::{stream, StreamExt};
use tracing::{debug, error, info, warn};

use super::{AnnotationFields, AnnotationParser, FinishState, PromptBook, SceneAnnotation, Stage};
use crate::{
    error::{ProviderError, StoreError},
    providers::{image_part, VisionProvider},
    retry::RetryPolicy,
    scene::{Frame, SceneCategory},
    store::{self, FailedSample, JsonlSink},
    types::{ChatMessage, CompletionRequest, ContentPart},
};

/// One capture: its stable identifier and the frame files in capture order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub id: String,
    pub frames: Vec<PathBuf>,
}

impl Sample {
    pub fn start(&self) -> &Path {
        &self.frames[0]
    }

    /// File stem shared by all frames, e.g. `clip_03` for `clip_03_start.jpg`.
    pub fn base_name(&self) -> String {
        self.start()
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.trim_end_matches("_start.jpg").to_string())
            .unwrap_or_default()
    }
}

/// Finds every `<name>_start.jpg` under `<root>/<scene>` whose sibling frames exist.
pub fn discover_samples(root: &Path, scene: SceneCategory) -> Result<Vec<Sample>, StoreError> {
    let scene_dir = root.join(scene.as_str());
    if !scene_dir.is_dir() {
        warn!("scene directory not found: {}", scene_dir.display());
        return Ok(Vec::new());
    }

    let mut starts = Vec::new();
    collect_starts(&scene_dir, &mut starts)?;
    starts.sort();

    let samples = starts
        .into_iter()
        .filter_map(|start| {
            let start_name = start.file_name()?.to_str()?.to_string();
            let prefix = start_name.strip_suffix("_start.jpg")?;
            let frames: Vec<PathBuf> = scene
                .frames()
                .iter()
                .map(|frame| start.with_file_name(format!("{prefix}{}.jpg", frame.suffix())))
                .collect();
            if !frames.iter().all(|frame| frame.is_file()) {
                return None;
            }
            Some(Sample {
                id: sample_id(root, &start)?,
                frames,
            })
        })
        .collect();

    Ok(samples)
}

/// Runs [`discover_samples`] on the blocking pool.
pub async fn scan_samples(root: PathBuf, scene: SceneCategory) -> Result<Vec<Sample>, StoreError> {
    tokio::task::spawn_blocking(move || discover_samples(&root, scene)).await?
}

fn collect_starts(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| StoreError::io(dir, e))?.path();
        if path.is_dir() {
            collect_starts(&path, out)?;
        } else if path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with("_start.jpg"))
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Root-relative path of the start frame with `_start.jpg` replaced by `.jpg`, `/`-separated.
pub fn sample_id(root: &Path, start: &Path) -> Option<String> {
    let relative = start.strip_prefix(root).ok()?;
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    Some(joined.strip_suffix("_start.jpg")?.to_string() + ".jpg")
}

/// Relative frame path for an identifier, e.g. `a/b.jpg` + `Frame::End` -> `a/b_end.jpg`.
pub fn frame_path(id: &str, frame: Frame) -> String {
    let stem = id.strip_suffix(".jpg").unwrap_or(id);
    format!("{stem}{}.jpg", frame.suffix())
}

#[derive(Debug, Clone)]
pub struct AnnotatorOptions {
    pub image_dir: PathBuf,
    pub crop_dir: PathBuf,
    pub meta_dir: PathBuf,
    pub model: String,
    pub workers_per_scene: usize,
    pub max_scene_workers: usize,
}

impl AnnotatorOptions {
    pub fn new(image_dir: impl Into<PathBuf>, crop_dir: impl Into<PathBuf>, meta_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            crop_dir: crop_dir.into(),
            meta_dir: meta_dir.into(),
            model: String::new(),
            workers_per_scene: 64,
            max_scene_workers: 8,
        }
    }

    fn root_for(&self, scene: SceneCategory) -> &Path {
        if scene.reads_from_crops() {
            &self.crop_dir
        } else {
            &self.image_dir
        }
    }
}

/// Per-scene counts logged at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneReport {
    pub existing: usize,
    pub discovered: usize,
    pub pending: usize,
    pub annotated: usize,
    pub failed: usize,
}

pub struct Annotator {
    provider: Arc<dyn VisionProvider>,
    prompts: Arc<PromptBook>,
    parser: AnnotationParser,
    retry: RetryPolicy,
    options: AnnotatorOptions,
}

impl Annotator {
    pub fn new(provider: Arc<dyn VisionProvider>, options: AnnotatorOptions) -> Self {
        Self {
            provider,
            prompts: Arc::new(PromptBook::default()),
            parser: AnnotationParser::default(),
            retry: RetryPolicy::for_annotation(),
            options,
        }
    }

    pub fn with_prompts(mut self, prompts: PromptBook) -> Self {
        self.prompts = Arc::new(prompts);
        self
    }

    pub fn with_parser(mut self, parser: AnnotationParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn ask(&self, text: String, images: &[&Path]) -> Result<String, ProviderError> {
        let mut parts = vec![ContentPart::text(text)];
        for image in images {
            parts.push(image_part(image).await?);
        }
        let request = CompletionRequest::new(
            self.options.model.clone(),
            vec![ChatMessage::user_parts(parts)],
        );
        Ok(self.provider.complete(request).await?.text())
    }

    /// One attempt at annotating a sample: one call, or two for two-stage scenes.
    pub async fn annotate_sample(
        &self,
        scene: SceneCategory,
        sample: &Sample,
    ) -> Result<SceneAnnotation, ProviderError> {
        if !scene.needs_oracle() {
            return Ok(SceneAnnotation::new(sample.id.clone(), AnnotationFields::default()));
        }

        let prompt = self.prompts.annotation_prompt(scene)?.to_string();
        let images: Vec<&Path> = if scene.is_two_stage() {
            sample.frames.iter().take(2).map(PathBuf::as_path).collect()
        } else {
            sample.frames.iter().map(PathBuf::as_path).collect()
        };
        let response = self.ask(prompt, &images).await?;
        let mut fields = self.parser.parse(&response, scene, Stage::First);

        if scene.is_two_stage() {
            if let Some(structure) = self.second_stage(scene, sample, &fields).await? {
                fields.merge(structure);
            }
        }

        Ok(SceneAnnotation::new(sample.id.clone(), fields))
    }

    async fn second_stage(
        &self,
        scene: SceneCategory,
        sample: &Sample,
        first: &AnnotationFields,
    ) -> Result<Option<AnnotationFields>, ProviderError> {
        let suffix = match first.finish_state {
            Some(FinishState::Image1) => "_start.jpg",
            Some(FinishState::Image2) => "_end.jpg",
            _ => return Ok(None),
        };
        let crop = self
            .options
            .crop_dir
            .join(scene.as_str())
            .join(format!("{}{suffix}", sample.base_name()));
        if !crop.is_file() {
            debug!("no crop for {} at {}", sample.id, crop.display());
            return Ok(None);
        }
        let Some(objects) = first.object_list.as_deref() else {
            return Ok(None);
        };

        let prompt = self.prompts.structure_prompt(scene, objects)?;
        let response = self.ask(prompt, &[crop.as_path()]).await?;
        Ok(Some(self.parser.parse(&response, scene, Stage::Second)))
    }

    /// Retries a sample; on exhaustion records it in the failure log and returns the error.
    pub async fn annotate_with_retry(
        &self,
        scene: SceneCategory,
        sample: &Sample,
        failures: &JsonlSink,
    ) -> Result<SceneAnnotation, ProviderError> {
        let label = format!("{scene}/{}", sample.id);
        let result = self
            .retry
            .run(&label, || self.annotate_sample(scene, sample))
            .await;

        if let Err(err) = &result {
            error!("all {} attempts failed for {}", self.retry.max_attempts, sample.id);
            if let Err(store_err) = failures.append(&FailedSample::new(scene.as_str(), &sample.id, err)) {
                error!("could not record failure for {}: {store_err}", sample.id);
            }
        }
        result
    }

    /// Annotates every new sample of a scene, appending results to `<scene>_meta.jsonl`.
    pub async fn annotate_scene(&self, scene: SceneCategory) -> Result<SceneReport, StoreError> {
        let meta_path = store::meta_path(&self.options.meta_dir, scene);
        let existing = store::existing_keys(&meta_path, "image").await?;
        let samples = scan_samples(self.options.root_for(scene).to_path_buf(), scene).await?;
        let pending: Vec<Sample> = samples
            .iter()
            .filter(|sample| !existing.contains(&sample.id))
            .cloned()
            .collect();

        info!(
            "{scene}: {} existing, {}/{} new samples",
            existing.len(),
            pending.len(),
            samples.len()
        );

        let mut report = SceneReport {
            existing: existing.len(),
            discovered: samples.len(),
            pending: pending.len(),
            ..SceneReport::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }

        let results = JsonlSink::spawn(meta_path);
        let failures = JsonlSink::spawn(store::failed_path(&self.options.meta_dir, scene));

        let outcomes: Vec<bool> = stream::iter(pending.iter())
            .map(|sample| {
                let results = &results;
                let failures = &failures;
                async move {
                    match self.annotate_with_retry(scene, sample, failures).await {
                        Ok(annotation) => match results.append(&annotation) {
                            Ok(()) => true,
                            Err(err) => {
                                error!("failed to queue {}: {err}", sample.id);
                                false
                            }
                        },
                        Err(err) => {
                            error!("failed to process sample {}: {err}", sample.id);
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.options.workers_per_scene.max(1))
            .collect()
            .await;

        report.annotated = results.close().await?;
        failures.close().await?;
        report.failed = outcomes.iter().filter(|ok| !**ok).count();

        info!(
            "{scene}: annotated {}, failed {}",
            report.annotated, report.failed
        );
        Ok(report)
    }

    /// Runs several scenes concurrently; one failing scene does not stop the others.
    pub async fn annotate_all(
        &self,
        scenes: &[SceneCategory],
    ) -> Vec<(SceneCategory, Result<SceneReport, StoreError>)> {
        let outcomes: Vec<(SceneCategory, Result<SceneReport, StoreError>)> =
            stream::iter(scenes.iter().copied())
                .map(|scene| async move { (scene, self.annotate_scene(scene).await) })
                .buffer_unordered(self.options.max_scene_workers.max(1))
                .collect()
                .await;

        let succeeded = outcomes.iter().filter(|(_, r)| r.is_ok()).count();
        for (scene, outcome) in &outcomes {
            match outcome {
                Ok(_) => info!("scene {scene} done"),
                Err(err) => error!("scene {scene} failed: {err}"),
            }
        }
        info!("completed: {succeeded}/{} scenes successful", scenes.len());
        outcomes
    }
}
