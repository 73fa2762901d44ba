use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{runner::EvalRecord, score::score};
use crate::{
    error::StoreError,
    qa::TaskType,
    store,
};

/// Reporting groups over task types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskGroup {
    #[serde(rename = "Quantitative")]
    Quantitative,
    #[serde(rename = "Procedural_intermediate_state_recognition")]
    IntermediateStateRecognition,
    #[serde(rename = "Procedural_latent_action_reasoning")]
    LatentActionReasoning,
    #[serde(rename = "Procedural_transformation_planning")]
    TransformationPlanning,
    #[serde(rename = "Spatial_fine_grained")]
    SpatialFineGrained,
    #[serde(rename = "Spatial_global")]
    SpatialGlobal,
}

impl TaskGroup {
    pub const ALL: [TaskGroup; 6] = [
        TaskGroup::Quantitative,
        TaskGroup::IntermediateStateRecognition,
        TaskGroup::LatentActionReasoning,
        TaskGroup::TransformationPlanning,
        TaskGroup::SpatialFineGrained,
        TaskGroup::SpatialGlobal,
    ];

    pub fn for_task(task_type: TaskType) -> Option<Self> {
        match task_type {
            TaskType::Count => Some(TaskGroup::Quantitative),
            TaskType::ProceduralInterm => Some(TaskGroup::IntermediateStateRecognition),
            TaskType::ProceduralCausal => Some(TaskGroup::LatentActionReasoning),
            TaskType::ProceduralPlan => Some(TaskGroup::TransformationPlanning),
            TaskType::SpatialFineGrained => Some(TaskGroup::SpatialFineGrained),
            TaskType::SpatialGlobal => Some(TaskGroup::SpatialGlobal),
            TaskType::Other => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskGroup::Quantitative => "Quantitative",
            TaskGroup::IntermediateStateRecognition => "Procedural_intermediate_state_recognition",
            TaskGroup::LatentActionReasoning => "Procedural_latent_action_reasoning",
            TaskGroup::TransformationPlanning => "Procedural_transformation_planning",
            TaskGroup::SpatialFineGrained => "Spatial_fine_grained",
            TaskGroup::SpatialGlobal => "Spatial_global",
        }
    }
}

impl fmt::Display for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub total: usize,
    pub correct: usize,
}

impl Tally {
    pub fn record(&mut self, correct: bool) {
        self.total += 1;
        if correct {
            self.correct += 1;
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// One scored run-log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDetail {
    pub idx: usize,
    pub task_type: TaskType,
    pub scene: String,
    pub images: Vec<String>,
    pub question: String,
    pub label: String,
    pub pred: String,
    pub is_correct: bool,
    pub assistant: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scoreboard {
    pub overall: Tally,
    pub groups: BTreeMap<TaskGroup, Tally>,
    pub details: Vec<ScoreDetail>,
}

impl Scoreboard {
    /// Scores records in log order; `idx` counts from 1.
    pub fn from_records(records: &[EvalRecord]) -> Self {
        let mut board = Scoreboard::default();
        for (i, record) in records.iter().enumerate() {
            let item = &record.item;
            let (pred, is_correct) = score(&record.assistant, &item.label, item.task_type);
            board.overall.record(is_correct);
            if let Some(group) = TaskGroup::for_task(item.task_type) {
                board.groups.entry(group).or_default().record(is_correct);
            }
            board.details.push(ScoreDetail {
                idx: i + 1,
                task_type: item.task_type,
                scene: item.scene.clone(),
                images: item.images.clone(),
                question: item.question.clone(),
                label: item.label.clone(),
                pred,
                is_correct,
                assistant: record.assistant.clone(),
            });
        }
        board
    }

    pub fn log_summary(&self) {
        info!(
            "total: {}, correct: {}, overall accuracy: {:.2}%",
            self.overall.total,
            self.overall.correct,
            self.overall.accuracy() * 100.0
        );
        for group in TaskGroup::ALL {
            if let Some(tally) = self.groups.get(&group).filter(|t| t.total > 0) {
                info!(
                    "{group}: {}/{} ({:.2}%)",
                    tally.correct,
                    tally.total,
                    tally.accuracy() * 100.0
                );
            }
        }
    }

    pub fn result_row(&self, model: &str) -> ResultRow {
        ResultRow {
            model: model.to_string(),
            overall: percent(self.overall.accuracy()),
            groups: TaskGroup::ALL
                .into_iter()
                .map(|group| {
                    // Blank when the group had nothing to score.
                    let cell = self
                        .groups
                        .get(&group)
                        .filter(|t| t.total > 0)
                        .map(|t| percent(t.accuracy()))
                        .unwrap_or_default();
                    (group.as_str().to_string(), cell)
                })
                .collect(),
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

fn percent(accuracy: f64) -> String {
    format!("{:.2}%", accuracy * 100.0)
}

/// One model's row in `results.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub model: String,
    pub overall: String,
    pub groups: BTreeMap<String, String>,
    pub timestamp: String,
}

pub fn run_log_path(result_dir: &Path, model: &str) -> PathBuf {
    result_dir.join(format!("eval_{model}.jsonl"))
}

pub fn run_failed_path(result_dir: &Path, model: &str) -> PathBuf {
    result_dir.join(format!("eval_{model}_failed.jsonl"))
}

pub fn detail_path(result_dir: &Path, model: &str) -> PathBuf {
    result_dir.join(format!("eval_{model}_score_detail.json"))
}

pub fn results_path(result_dir: &Path) -> PathBuf {
    result_dir.join("results.json")
}

/// Replaces the row for `row.model`, or appends it.
pub fn upsert_result(path: &Path, row: ResultRow) -> Result<(), StoreError> {
    let mut rows: Vec<ResultRow> = if path.is_file() {
        store::read_json_array(path)?
    } else {
        Vec::new()
    };
    match rows.iter_mut().find(|existing| existing.model == row.model) {
        Some(existing) => *existing = row,
        None => rows.push(row),
    }
    store::write_json_array(path, &rows)
}

/// Scores `eval_<model>.jsonl`, writes the detail file and updates `results.json`.
pub fn score_run(result_dir: &Path, model: &str) -> Result<Scoreboard, StoreError> {
    let records: Vec<EvalRecord> = store::read_jsonl(&run_log_path(result_dir, model))?;
    info!("{model}: scoring {} records", records.len());

    let board = Scoreboard::from_records(&records);
    board.log_summary();

    let details = detail_path(result_dir, model);
    store::write_json_array(&details, &board.details)?;
    info!("detailed results saved to {}", details.display());

    upsert_result(&results_path(result_dir), board.result_row(model))?;
    Ok(board)
}
