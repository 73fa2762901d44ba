use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::report::{run_failed_path, run_log_path};
use crate::{
    annotation::PromptBook,
    error::{ProviderError, StoreError},
    providers::{image_part, VisionProvider},
    qa::QAItem,
    retry::RetryPolicy,
    store::{self, FailedSample, JsonlSink},
    types::{ChatMessage, CompletionRequest, ContentPart},
};

/// A question with the model's raw answer, one line of `eval_<model>.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    #[serde(flatten)]
    pub item: QAItem,
    #[serde(default)]
    pub idx: usize,
    #[serde(default)]
    pub assistant: String,
}

#[derive(Debug, Clone)]
pub struct EvalOptions {
    pub image_dir: PathBuf,
    pub result_dir: PathBuf,
    pub model: String,
    pub threads: usize,
}

impl EvalOptions {
    pub fn new(image_dir: impl Into<PathBuf>, result_dir: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            image_dir: image_dir.into(),
            result_dir: result_dir.into(),
            model: model.into(),
            threads: 32,
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub already_tested: usize,
    pub answered: usize,
    pub failed: usize,
}

pub struct EvalRunner {
    provider: Arc<dyn VisionProvider>,
    prompts: Arc<PromptBook>,
    retry: RetryPolicy,
    options: EvalOptions,
}

impl EvalRunner {
    pub fn new(provider: Arc<dyn VisionProvider>, options: EvalOptions) -> Self {
        Self {
            provider,
            prompts: Arc::new(PromptBook::default()),
            retry: RetryPolicy::for_evaluation(),
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

    pub fn run_log(&self) -> PathBuf {
        run_log_path(&self.options.result_dir, &self.options.model)
    }

    async fn ask(&self, item: &QAItem) -> Result<String, ProviderError> {
        let mut parts = vec![ContentPart::text(self.prompts.evaluation_prompt(&item.question)?)];
        for image in &item.images {
            parts.push(image_part(&self.options.image_dir.join(image)).await?);
        }
        let request = CompletionRequest::new(
            self.options.model.clone(),
            vec![ChatMessage::user_parts(parts)],
        );
        Ok(self.provider.complete(request).await?.text())
    }

    /// Answer for one item, or `None` once retries are exhausted. Failures are
    /// recorded in the failure log rather than returned.
    pub async fn evaluate_item(&self, idx: usize, item: &QAItem, failures: &JsonlSink) -> Option<EvalRecord> {
        let label = format!("item {}", idx + 1);
        match self.retry.run(&label, || self.ask(item)).await {
            Ok(assistant) => {
                info!("item {} completed", idx + 1);
                Some(EvalRecord {
                    item: item.clone(),
                    idx,
                    assistant,
                })
            }
            Err(err) => {
                error!("item {} failed after {} attempts: {err}", idx + 1, self.retry.max_attempts);
                let record = FailedSample::new(item.scene.as_str(), item.images.join(", "), &err);
                if let Err(store_err) = failures.append(&record) {
                    error!("could not record failure for item {}: {store_err}", idx + 1);
                }
                None
            }
        }
    }

    /// Asks the model every question not yet present in the run log.
    pub async fn run(&self, questions_file: &Path) -> Result<RunSummary, StoreError> {
        let items: Vec<QAItem> = store::load_json_array(questions_file).await?;
        let run_log = self.run_log();
        let tested: HashSet<String> = store::load_jsonl::<EvalRecord>(&run_log)
            .await?
            .iter()
            .map(|record| record.item.run_key())
            .collect();

        let pending: Vec<(usize, &QAItem)> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| !tested.contains(&item.run_key()))
            .collect();

        info!(
            "total: {}, tested: {}, to be tested: {}",
            items.len(),
            tested.len(),
            pending.len()
        );
        let mut summary = RunSummary {
            total: items.len(),
            already_tested: tested.len(),
            ..RunSummary::default()
        };
        if pending.is_empty() {
            info!("all items have been tested");
            return Ok(summary);
        }

        let results = JsonlSink::spawn(run_log);
        let failures = JsonlSink::spawn(run_failed_path(&self.options.result_dir, &self.options.model));

        let outcomes: Vec<bool> = stream::iter(pending)
            .map(|(idx, item)| {
                let results = &results;
                let failures = &failures;
                async move {
                    let Some(record) = self.evaluate_item(idx, item, failures).await else {
                        return false;
                    };
                    match results.append(&record) {
                        Ok(()) => true,
                        Err(err) => {
                            error!("failed to queue item {}: {err}", idx + 1);
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.options.threads.max(1))
            .collect()
            .await;

        summary.answered = results.close().await?;
        failures.close().await?;
        summary.failed = outcomes.iter().filter(|ok| !**ok).count();
        info!(
            "answered {}, failed {}, saved to {}",
            summary.answered,
            summary.failed,
            self.run_log().display()
        );
        Ok(summary)
    }
}
