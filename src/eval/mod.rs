//! Model evaluation over generated questions and accuracy reporting.

pub mod extract;
pub mod report;
pub mod runner;
pub mod score;

pub use extract::extract_answer;
pub use report::{score_run, ResultRow, ScoreDetail, Scoreboard, Tally, TaskGroup};
pub use runner::{EvalOptions, EvalRecord, EvalRunner, RunSummary};
pub use score::{compare_objects, extract_objects_from_text, normalize_answer, normalize_objects, score};
