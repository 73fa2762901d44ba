//! Question synthesis: turns annotated scenes into benchmark items.
//!
//! Every generator takes the annotation(s) it reads, the synthesis config and
//! an injected random source, and returns zero or more [`QAItem`]s. Returning
//! nothing is the normal outcome when a sample cannot support an unambiguous
//! question.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::{
    annotation::{frame_path, FinishState, SceneAnnotation},
    config::SynthesisConfig,
    error::StoreError,
    scene::{Frame, SceneCategory},
    store,
};

pub mod causal;
pub mod choice;
pub mod count;
pub mod global;
pub mod interm;
pub mod layers;
pub mod plan;
pub mod spatial;

pub use choice::{letter, letter_index, Choice};
pub use layers::find_layer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Count,
    ProceduralCausal,
    ProceduralInterm,
    ProceduralPlan,
    SpatialFineGrained,
    SpatialGlobal,
    #[serde(other)]
    Other,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Count => "count",
            TaskType::ProceduralCausal => "procedural_causal",
            TaskType::ProceduralInterm => "procedural_interm",
            TaskType::ProceduralPlan => "procedural_plan",
            TaskType::SpatialFineGrained => "spatial_fine_grained",
            TaskType::SpatialGlobal => "spatial_global",
            TaskType::Other => "other",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of a procedure a planning question asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMask {
    First,
    Last,
}

impl PlanMask {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanMask::First => "first",
            PlanMask::Last => "last",
        }
    }
}

/// One benchmark question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QAItem {
    pub task_type: TaskType,
    /// Image references in the order the question text refers to them.
    pub images: Vec<String>,
    pub scene: String,
    pub question: String,
    /// Option letter, integer count, or a sorted comma-joined name list.
    #[serde(deserialize_with = "label_text")]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<PlanMask>,
}

impl QAItem {
    pub fn new(
        task_type: TaskType,
        scene: SceneCategory,
        images: Vec<String>,
        question: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            task_type,
            images,
            scene: scene.as_str().to_string(),
            question: question.into(),
            label: label.into(),
            mask: None,
        }
    }

    pub fn with_mask(mut self, mask: PlanMask) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Identity used to resume evaluation runs: question text plus image list.
    pub fn run_key(&self) -> String {
        format!("{}{:?}", self.question, self.images)
    }
}

// Older question files store count labels as JSON numbers.
fn label_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// A group of related generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuestionFamily {
    Count,
    Causal,
    Intermediate,
    PlanOperation,
    PlanObject,
    SpatialLayer,
    SpatialEnumeration,
    SpatialGlobal,
}

impl QuestionFamily {
    pub const ALL: [QuestionFamily; 8] = [
        QuestionFamily::Count,
        QuestionFamily::Causal,
        QuestionFamily::Intermediate,
        QuestionFamily::PlanOperation,
        QuestionFamily::PlanObject,
        QuestionFamily::SpatialLayer,
        QuestionFamily::SpatialEnumeration,
        QuestionFamily::SpatialGlobal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QuestionFamily::Count => "count",
            QuestionFamily::Causal => "causal",
            QuestionFamily::Intermediate => "interm",
            QuestionFamily::PlanOperation => "plan-operation",
            QuestionFamily::PlanObject => "plan-object",
            QuestionFamily::SpatialLayer => "spatial-layer",
            QuestionFamily::SpatialEnumeration => "spatial-enumeration",
            QuestionFamily::SpatialGlobal => "spatial-global",
        }
    }

    pub fn task_type(self) -> TaskType {
        match self {
            QuestionFamily::Count => TaskType::Count,
            QuestionFamily::Causal => TaskType::ProceduralCausal,
            QuestionFamily::Intermediate => TaskType::ProceduralInterm,
            QuestionFamily::PlanOperation | QuestionFamily::PlanObject => TaskType::ProceduralPlan,
            QuestionFamily::SpatialLayer | QuestionFamily::SpatialEnumeration => {
                TaskType::SpatialFineGrained
            }
            QuestionFamily::SpatialGlobal => TaskType::SpatialGlobal,
        }
    }

    /// Scenes this family reads, in processing order.
    pub fn scenes(self) -> &'static [SceneCategory] {
        use SceneCategory::*;
        match self {
            QuestionFamily::Count => &[PickPlaceFood, SortBeads],
            QuestionFamily::Causal => &[
                AssembleDisassembleLegos,
                BuildUnstackLego,
                StackUnstackBowls,
                MakeSandwich,
                PlayResetConnectFour,
            ],
            QuestionFamily::Intermediate => &[
                AssembleDisassembleLegos,
                BuildUnstackLego,
                InsertRemoveCupsFromRack,
                PlayResetConnectFour,
                StackUnstackBowls,
            ],
            QuestionFamily::PlanOperation => {
                &[AssembleDisassembleLegos, BuildUnstackLego, MakeSandwich]
            }
            QuestionFamily::PlanObject => &[MakeSandwich, SetupCleanupTable],
            QuestionFamily::SpatialLayer => &[
                AssembleDisassembleLegos,
                BuildUnstackLego,
                StackUnstackBowls,
                InsertRemoveBookshelf,
                InsertRemoveCupsFromRack,
            ],
            QuestionFamily::SpatialEnumeration => &[
                AssembleDisassembleLegos,
                BuildUnstackLego,
                StackUnstackBowls,
                MakeSandwich,
                InsertRemoveCupsFromRack,
            ],
            QuestionFamily::SpatialGlobal => &[InsertRemoveBookshelf],
        }
    }

    /// Runs the family over every annotation of one scene.
    pub fn synthesize<R: Rng + ?Sized>(
        self,
        scene: SceneCategory,
        annotations: &[SceneAnnotation],
        config: &SynthesisConfig,
        rng: &mut R,
    ) -> Vec<QAItem> {
        if !self.scenes().contains(&scene) {
            return Vec::new();
        }
        if self == QuestionFamily::Intermediate {
            return interm::questions(scene, annotations, rng);
        }

        let mut items = Vec::new();
        for annotation in annotations {
            let produced = match self {
                QuestionFamily::Count => count::questions(scene, annotation, config, rng),
                QuestionFamily::Causal => causal::questions(scene, annotation, rng),
                QuestionFamily::PlanOperation => plan::operation_questions(scene, annotation, config, rng),
                QuestionFamily::PlanObject => plan::object_questions(scene, annotation, rng),
                QuestionFamily::SpatialLayer => spatial::layer_questions(scene, annotation, config, rng),
                QuestionFamily::SpatialEnumeration => {
                    spatial::enumeration_questions(scene, annotation, config, rng)
                }
                QuestionFamily::SpatialGlobal => global::questions(scene, annotation, config, rng),
                QuestionFamily::Intermediate => Vec::new(),
            };
            items.extend(produced);
        }
        items
    }
}

impl fmt::Display for QuestionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        QuestionFamily::ALL
            .into_iter()
            .find(|family| family.as_str() == wanted)
            .ok_or_else(|| format!("unknown question family `{s}`"))
    }
}

/// Reads `<scene>_meta.jsonl` for each scene. Scenes without a log are left out.
pub fn load_annotations(
    meta_dir: &Path,
    scenes: &[SceneCategory],
) -> Result<BTreeMap<SceneCategory, Vec<SceneAnnotation>>, StoreError> {
    let mut by_scene = BTreeMap::new();
    for &scene in scenes {
        let path = store::meta_path(meta_dir, scene);
        if !path.is_file() {
            warn!("meta file not found for {scene}: {}", path.display());
            continue;
        }
        let records: Vec<SceneAnnotation> = store::read_jsonl(&path)?;
        let loaded = records.len();
        let annotations = latest_per_image(records);
        if annotations.len() < loaded {
            warn!("{scene}: dropped {} repeated records", loaded - annotations.len());
        }
        info!("{scene}: loaded {} annotations", annotations.len());
        by_scene.insert(scene, annotations);
    }
    Ok(by_scene)
}

/// One record per image, in first-seen order. A later record for the same
/// image replaces the earlier one.
pub fn latest_per_image(records: Vec<SceneAnnotation>) -> Vec<SceneAnnotation> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<SceneAnnotation> = Vec::with_capacity(records.len());
    for record in records {
        match position.get(&record.image) {
            Some(&at) => kept[at] = record,
            None => {
                position.insert(record.image.clone(), kept.len());
                kept.push(record);
            }
        }
    }
    kept
}

/// Runs `families` in order over every scene they support. Output order is
/// fixed for a given seed.
pub fn synthesize_all<R: Rng + ?Sized>(
    annotations: &BTreeMap<SceneCategory, Vec<SceneAnnotation>>,
    families: &[QuestionFamily],
    config: &SynthesisConfig,
    rng: &mut R,
) -> Vec<QAItem> {
    let mut items = Vec::new();
    for &family in families {
        let before = items.len();
        for &scene in family.scenes() {
            let Some(scene_annotations) = annotations.get(&scene) else {
                continue;
            };
            let produced = family.synthesize(scene, scene_annotations, config, rng);
            info!("{family}/{scene}: {} questions", produced.len());
            items.extend(produced);
        }
        info!("{family}: {} questions in total", items.len() - before);
    }
    items
}

pub(crate) fn frame(annotation: &SceneAnnotation, frame: Frame) -> String {
    frame_path(&annotation.image, frame)
}

/// `[initial, final]` frames. A per-image completed structure names the final
/// frame; otherwise `finish_state == image1` swaps start and end.
pub(crate) fn image_order(annotation: &SceneAnnotation) -> Vec<String> {
    let final_is_start = match annotation.per_image_structure_frame() {
        Some(n) => n == 1,
        None => annotation.finish_state() == FinishState::Image1,
    };
    let (start, end) = (frame(annotation, Frame::Start), frame(annotation, Frame::End));
    if final_is_start {
        vec![end, start]
    } else {
        vec![start, end]
    }
}

/// `[initial, final]` for generators that need a reported finish state.
pub(crate) fn completed_order(annotation: &SceneAnnotation) -> Option<Vec<String>> {
    let (start, end) = (frame(annotation, Frame::Start), frame(annotation, Frame::End));
    match annotation.finish_state() {
        FinishState::Image2 => Some(vec![start, end]),
        FinishState::Image1 => Some(vec![end, start]),
        FinishState::None => None,
    }
}

/// Fills `{}` placeholders left to right.
pub(crate) fn fill(template: &str, args: &[&str]) -> String {
    let mut pieces = template.split("{}");
    let mut out = String::with_capacity(template.len() + 32);
    if let Some(head) = pieces.next() {
        out.push_str(head);
    }
    for (i, piece) in pieces.enumerate() {
        out.push_str(args.get(i).copied().unwrap_or_default());
        out.push_str(piece);
    }
    out
}

pub(crate) fn name_counts(names: &[String]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for name in names {
        *counts.entry(name.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Keeps a low-information sample with probability `ratio`.
pub(crate) fn keep<R: Rng + ?Sized>(rng: &mut R, ratio: f64) -> bool {
    rng.gen_bool(ratio.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::AnnotationFields;

    #[test]
    fn label_accepts_numbers_and_strings() {
        let item: QAItem = serde_json::from_str(
            r#"{"task_type":"count","images":["a_start.jpg","a_end.jpg"],"scene":"pick_place_food","question":"q","label":3}"#,
        )
        .unwrap();
        assert_eq!(item.label, "3");
        assert!(item.mask.is_none());

        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains(r#""label":"3""#));
        assert!(!json.contains("mask"));
    }

    #[test]
    fn unknown_task_types_read_as_other() {
        let item: QAItem = serde_json::from_str(
            r#"{"task_type":"where_q2","images":[],"scene":"x","question":"q","label":"A"}"#,
        )
        .unwrap();
        assert_eq!(item.task_type, TaskType::Other);
    }

    #[test]
    fn families_parse_from_cli_names() {
        assert_eq!("plan_operation".parse::<QuestionFamily>(), Ok(QuestionFamily::PlanOperation));
        assert_eq!("interm".parse::<QuestionFamily>(), Ok(QuestionFamily::Intermediate));
        assert!("everything".parse::<QuestionFamily>().is_err());
    }

    #[test]
    fn image_order_follows_finish_state_and_per_image_structure() {
        let mut fields = AnnotationFields {
            finish_state: Some(FinishState::Image1),
            ..Default::default()
        };
        let a = SceneAnnotation::new("s/x.jpg", fields.clone());
        assert_eq!(image_order(&a), vec!["s/x_end.jpg", "s/x_start.jpg"]);

        fields.completed_structure_image2 = Some(vec!["cup".into()]);
        let b = SceneAnnotation::new("s/x.jpg", fields);
        assert_eq!(image_order(&b), vec!["s/x_start.jpg", "s/x_end.jpg"]);

        let none = SceneAnnotation::new("s/x.jpg", AnnotationFields::default());
        assert!(completed_order(&none).is_none());
    }

    #[test]
    fn repeated_images_keep_the_latest_record() {
        let groups = |image: &str, n: u32| {
            SceneAnnotation::new(
                image,
                AnnotationFields {
                    number_of_groups: Some(n),
                    ..Default::default()
                },
            )
        };
        let kept = latest_per_image(vec![groups("a.jpg", 1), groups("b.jpg", 2), groups("a.jpg", 3)]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].image, "a.jpg");
        assert_eq!(kept[0].fields.number_of_groups, Some(3));
        assert_eq!(kept[1].image, "b.jpg");
    }

    #[test]
    fn fill_replaces_placeholders_in_order() {
        assert_eq!(fill("Place the {} on the {}.", &["cup", "plate"]), "Place the cup on the plate.");
        assert_eq!(fill("Put the {} on the surface", &["{}"]), "Put the {} on the surface");
    }
}
