//! Visibility pre-filter: asks the model whether every task object is clearly
//! visible in a start/end pair, and moves rejected samples aside.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    annotation::{scan_samples, PromptBook, Sample},
    error::{ProviderError, StoreError},
    providers::{image_part, VisionProvider},
    retry::RetryPolicy,
    scene::SceneCategory,
    store::{self, JsonlSink},
    types::{ChatMessage, CompletionRequest},
};

/// Scenes screened before annotation.
pub const FILTER_SCENES: [SceneCategory; 9] = [
    SceneCategory::AssembleDisassembleLegos,
    SceneCategory::BuildUnstackLego,
    SceneCategory::AssembleDisassembleSoftLegos,
    SceneCategory::StackUnstackBowls,
    SceneCategory::MakeSandwich,
    SceneCategory::InsertRemoveBookshelf,
    SceneCategory::PickPlaceFood,
    SceneCategory::SortBeads,
    SceneCategory::StackUnstackPlates,
];

/// One line of `<scene>_filter.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRecord {
    /// Sample key without extension, e.g. `sort_beads/day1/clip_03`.
    pub image: String,
    pub final_answer: Option<String>,
}

impl FilterRecord {
    pub fn rejected(&self) -> bool {
        self.final_answer
            .as_deref()
            .is_some_and(|answer| answer.trim().eq_ignore_ascii_case("no"))
    }
}

/// Value of the `#Final answer:` line. An empty value is taken from the next
/// line instead.
pub fn parse_final_answer(reply: &str) -> Option<String> {
    let lines: Vec<&str> = reply.lines().collect();
    let (index, line) = lines.iter().enumerate().find(|(_, line)| {
        let lower = line.trim().to_lowercase();
        lower.starts_with("#final answer:") || lower.starts_with("# final answer:")
    })?;

    let value = line.split_once(':').map(|(_, rest)| rest.trim()).unwrap_or_default();
    if !value.is_empty() {
        return Some(value.to_string());
    }
    lines
        .get(index + 1)
        .map(|next| next.trim())
        .filter(|next| !next.is_empty())
        .map(str::to_string)
}

fn sample_key(sample: &Sample) -> String {
    sample
        .id
        .strip_suffix(".jpg")
        .unwrap_or(&sample.id)
        .to_string()
}

#[derive(Debug, Clone)]
pub struct FilterOptions {
    pub image_dir: PathBuf,
    pub filter_dir: PathBuf,
    pub model: String,
    pub workers_per_scene: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterReport {
    pub existing: usize,
    pub checked: usize,
    pub rejected: usize,
    pub failed: usize,
}

pub struct SampleFilter {
    provider: Arc<dyn VisionProvider>,
    prompts: Arc<PromptBook>,
    retry: RetryPolicy,
    options: FilterOptions,
}

impl SampleFilter {
    pub fn new(provider: Arc<dyn VisionProvider>, options: FilterOptions) -> Self {
        Self {
            provider,
            prompts: Arc::new(PromptBook::default()),
            retry: RetryPolicy::for_annotation(),
            options,
        }
    }

    pub fn with_prompts(mut self, prompts: PromptBook) -> Self {
        self.prompts = Arc::new(prompts);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn ask(&self, scene: SceneCategory, sample: &Sample) -> Result<FilterRecord, ProviderError> {
        let start = sample.start();
        let end = sample.frames.last().map(PathBuf::as_path).unwrap_or(start);
        let parts = vec![image_part(start).await?, image_part(end).await?];
        let request = CompletionRequest::new(
            self.options.model.clone(),
            vec![
                ChatMessage::system(self.prompts.filter_prompt(scene)),
                ChatMessage::user_parts(parts),
            ],
        );
        let reply = self.provider.complete(request).await?.text();
        Ok(FilterRecord {
            image: sample_key(sample),
            final_answer: parse_final_answer(&reply),
        })
    }

    pub async fn filter_scene(&self, scene: SceneCategory) -> Result<FilterReport, StoreError> {
        let out_path = store::filter_path(&self.options.filter_dir, scene);
        let done = store::existing_keys(&out_path, "image").await?;
        let samples = scan_samples(self.options.image_dir.clone(), scene).await?;
        let pending: Vec<&Sample> = samples
            .iter()
            .filter(|sample| {
                let skip = done.contains(&sample_key(sample));
                if skip {
                    debug!("skip already processed: {}", sample_key(sample));
                }
                !skip
            })
            .collect();
        info!("{scene}: {} image pairs found, {} to check", samples.len(), pending.len());

        let mut report = FilterReport {
            existing: done.len(),
            ..FilterReport::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }

        let sink = JsonlSink::spawn(out_path);
        let outcomes: Vec<Option<bool>> = stream::iter(pending)
            .map(|sample| {
                let sink = &sink;
                async move {
                    let label = format!("{scene}/{}", sample.id);
                    match self.retry.run(&label, || self.ask(scene, sample)).await {
                        Ok(record) => {
                            info!("{} -> {:?}", record.image, record.final_answer);
                            let rejected = record.rejected();
                            match sink.append(&record) {
                                Ok(()) => Some(rejected),
                                Err(err) => {
                                    error!("failed to queue {}: {err}", record.image);
                                    None
                                }
                            }
                        }
                        Err(err) => {
                            error!("filter call failed for {}: {err}", sample.id);
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.options.workers_per_scene.max(1))
            .collect()
            .await;

        report.checked = sink.close().await?;
        report.rejected = outcomes.iter().filter(|o| **o == Some(true)).count();
        report.failed = outcomes.iter().filter(|o| o.is_none()).count();
        info!(
            "{scene}: checked {}, rejected {}, failed {}",
            report.checked, report.rejected, report.failed
        );
        Ok(report)
    }

    /// Runs every scene concurrently; a failing scene is logged and skipped.
    pub async fn filter_all(&self, scenes: &[SceneCategory]) -> Vec<(SceneCategory, Result<FilterReport, StoreError>)> {
        let outcomes: Vec<(SceneCategory, Result<FilterReport, StoreError>)> = stream::iter(scenes.iter().copied())
            .map(|scene| async move { (scene, self.filter_scene(scene).await) })
            .buffer_unordered(scenes.len().max(1))
            .collect()
            .await;
        for (scene, outcome) in &outcomes {
            match outcome {
                Ok(_) => info!("scene {scene} completed"),
                Err(err) => error!("scene {scene} failed: {err}"),
            }
        }
        outcomes
    }
}

fn frame_suffixes(key: &str) -> &'static [&'static str] {
    if key.contains(SceneCategory::AddRemoveLid.as_str()) {
        &["_start.jpg", "_medium1.jpg", "_medium2.jpg", "_end.jpg"]
    } else {
        &["_start.jpg", "_end.jpg", "_medium.jpg"]
    }
}

/// Moves every frame of each rejected sample from `image_dir` into `out_dir`,
/// keeping relative paths. Existing targets are left alone. Returns the
/// number of files moved.
pub fn move_rejected(filter_dir: &Path, image_dir: &Path, out_dir: &Path) -> Result<usize, StoreError> {
    std::fs::create_dir_all(out_dir).map_err(|e| StoreError::io(out_dir, e))?;
    let entries = std::fs::read_dir(filter_dir).map_err(|e| StoreError::io(filter_dir, e))?;

    let mut logs: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| StoreError::io(filter_dir, e))?.path();
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with("_filter.jsonl"))
        {
            logs.push(path);
        }
    }
    logs.sort();

    let mut moved = 0;
    for log in logs {
        info!("processing filter results: {}", log.display());
        let records: Vec<FilterRecord> = store::read_jsonl(&log)?;
        for record in records.iter().filter(|r| r.rejected() && !r.image.is_empty()) {
            for suffix in frame_suffixes(&record.image) {
                let relative = format!("{}{suffix}", record.image);
                let source = image_dir.join(&relative);
                let target = out_dir.join(&relative);
                if target.exists() {
                    debug!("already exists, skip: {}", target.display());
                    continue;
                }
                if !source.is_file() {
                    warn!("not found: {}", source.display());
                    continue;
                }
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
                }
                std::fs::rename(&source, &target).map_err(|e| StoreError::io(&source, e))?;
                debug!("moved {} -> {}", source.display(), target.display());
                moved += 1;
            }
        }
    }
    info!("moved {moved} filtered images");
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_answer_on_same_or_next_line() {
        assert_eq!(parse_final_answer("looks fine\n#Final answer: yes").as_deref(), Some("yes"));
        assert_eq!(parse_final_answer("# Final Answer:\n  no \n").as_deref(), Some("no"));
        assert_eq!(parse_final_answer("no verdict here"), None);
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"jpg").unwrap();
    }

    #[test]
    fn rejected_frames_move_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let (filter_dir, image_dir, out_dir) =
            (dir.path().join("f"), dir.path().join("img"), dir.path().join("out"));
        std::fs::create_dir_all(&filter_dir).unwrap();
        std::fs::write(
            filter_dir.join("sort_beads_filter.jsonl"),
            "{\"image\":\"sort_beads/a\",\"final_answer\":\"No\"}\n{\"image\":\"sort_beads/b\",\"final_answer\":\"yes\"}\n",
        )
        .unwrap();
        touch(&image_dir.join("sort_beads/a_start.jpg"));
        touch(&image_dir.join("sort_beads/a_end.jpg"));
        touch(&image_dir.join("sort_beads/b_start.jpg"));
        touch(&out_dir.join("sort_beads/a_end.jpg"));

        let moved = move_rejected(&filter_dir, &image_dir, &out_dir).unwrap();
        assert_eq!(moved, 1);
        assert!(out_dir.join("sort_beads/a_start.jpg").is_file());
        assert!(image_dir.join("sort_beads/a_end.jpg").is_file());
        assert!(image_dir.join("sort_beads/b_start.jpg").is_file());
    }
}
