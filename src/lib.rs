pub mod annotation;
pub mod config;
pub mod error;
pub mod eval;
pub mod filter;
pub mod logging;
pub mod providers;
pub mod qa;
pub mod retry;
pub mod scene;
pub mod store;
pub mod types;

pub use annotation::{
    AnnotationFields, AnnotationParser, Annotator, AnnotatorOptions, CompletedStructure, DiscBoard,
    DiscPolicy, FinishState, LayerRecord, ParserOptions, PromptBook, Relation, SceneAnnotation,
    SpatialRelation,
};
pub use config::{OracleConfig, SynthesisConfig};
pub use error::{PromptError, ProviderError, StoreError};
pub use eval::{score, EvalOptions, EvalRunner, Scoreboard, TaskGroup};
pub use filter::{move_rejected, SampleFilter};
pub use providers::VisionProvider;
pub use qa::{synthesize_all, QAItem, QuestionFamily, TaskType};
pub use retry::RetryPolicy;
pub use scene::{Frame, SceneCategory};
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, ContentPart, MessageRole};
