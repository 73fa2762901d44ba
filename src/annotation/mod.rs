//! Typed scene facts extracted from oracle responses.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod discs;
pub mod driver;
pub mod parser;
pub mod prompts;

pub use discs::{Cell, DiscBoard, DiscColor, DiscPolicy};
pub use driver::{discover_samples, frame_path, scan_samples, Annotator, AnnotatorOptions, Sample, SceneReport};
pub use parser::{AnnotationParser, ParserOptions, Stage};
pub use prompts::PromptBook;

/// Which captured frame shows the completed task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishState {
    Image1,
    Image2,
    None,
}

/// Compass relation of a subject relative to a reference object, from the camera's viewpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpatialRelation {
    Left,
    Right,
    Top,
    Bottom,
    LeftTop,
    RightTop,
    LeftBottom,
    RightBottom,
}

impl SpatialRelation {
    pub fn as_str(self) -> &'static str {
        match self {
            SpatialRelation::Left => "left",
            SpatialRelation::Right => "right",
            SpatialRelation::Top => "top",
            SpatialRelation::Bottom => "bottom",
            SpatialRelation::LeftTop => "left-top",
            SpatialRelation::RightTop => "right-top",
            SpatialRelation::LeftBottom => "left-bottom",
            SpatialRelation::RightBottom => "right-bottom",
        }
    }

    /// Phrase used inside question text, e.g. "to the left and above".
    pub fn describe(self) -> &'static str {
        match self {
            SpatialRelation::Left => "to the left of",
            SpatialRelation::Right => "to the right of",
            SpatialRelation::Top => "above",
            SpatialRelation::Bottom => "below",
            SpatialRelation::LeftTop => "to the left and above",
            SpatialRelation::RightTop => "to the right and above",
            SpatialRelation::LeftBottom => "to the left and below",
            SpatialRelation::RightBottom => "to the right and below",
        }
    }
}

impl fmt::Display for SpatialRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpatialRelation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "left" => Ok(SpatialRelation::Left),
            "right" => Ok(SpatialRelation::Right),
            "top" => Ok(SpatialRelation::Top),
            "bottom" => Ok(SpatialRelation::Bottom),
            "left-top" => Ok(SpatialRelation::LeftTop),
            "right-top" => Ok(SpatialRelation::RightTop),
            "left-bottom" => Ok(SpatialRelation::LeftBottom),
            "right-bottom" => Ok(SpatialRelation::RightBottom),
            _ => Err(s.trim().to_string()),
        }
    }
}

/// `(subject, relation, reference)`: the subject lies in `relation` direction of the reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    #[serde(rename = "object1")]
    pub subject: String,
    pub relation: SpatialRelation,
    #[serde(rename = "object2")]
    pub reference: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPosition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closest: Option<String>,
}

impl ObjectPosition {
    pub fn is_empty(&self) -> bool {
        self.right.is_none() && self.left.is_none() && self.closest.is_none()
    }
}

/// One object of a layered structure with its direct contacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRecord {
    #[serde(rename = "Object")]
    pub object: String,
    #[serde(rename = "Layer")]
    pub layer: u32,
    /// Objects resting directly on this one.
    #[serde(rename = "Above", default)]
    pub above: Vec<String>,
    /// Objects directly supporting this one.
    #[serde(rename = "Below", default)]
    pub below: Vec<String>,
}

/// Final arrangement: a single top-to-bottom stack or an explicit contact graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompletedStructure {
    Flat(Vec<String>),
    Layered(Vec<LayerRecord>),
}

impl CompletedStructure {
    pub fn len(&self) -> usize {
        match self {
            CompletedStructure::Flat(names) => names.len(),
            CompletedStructure::Layered(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_layer(&self) -> u32 {
        match self {
            CompletedStructure::Flat(names) => names.len() as u32,
            CompletedStructure::Layered(records) => {
                records.iter().map(|r| r.layer).max().unwrap_or(0)
            }
        }
    }

    /// Every `(a, b)` where one side lists the other as a contact and the
    /// counterpart edge is missing. `Below` edges come first, then `Above`.
    pub fn contact_inconsistencies(&self) -> Vec<(String, String)> {
        let CompletedStructure::Layered(records) = self else {
            return Vec::new();
        };

        let mut above: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        let mut below: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        for record in records {
            above
                .entry(record.object.as_str())
                .or_default()
                .extend(record.above.iter().map(String::as_str));
            below
                .entry(record.object.as_str())
                .or_default()
                .extend(record.below.iter().map(String::as_str));
        }

        let mut issues = Vec::new();
        for record in records {
            for support in &record.below {
                let listed = above
                    .get(support.as_str())
                    .is_some_and(|set| set.contains(record.object.as_str()));
                if !listed {
                    issues.push((record.object.clone(), support.clone()));
                }
            }
        }
        for record in records {
            for top in &record.above {
                let listed = below
                    .get(top.as_str())
                    .is_some_and(|set| set.contains(record.object.as_str()));
                if !listed {
                    issues.push((record.object.clone(), top.clone()));
                }
            }
        }
        issues.dedup();
        issues
    }
}

/// Fields extracted from one or two oracle calls. Absent means "not reported".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_state: Option<FinishState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hands_covered: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surface_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_list: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_position: Option<ObjectPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_graph: Option<Vec<Relation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_graph_image1: Option<Vec<Relation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_graph_image2: Option<Vec<Relation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_structure: Option<CompletedStructure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_structure_image1: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_structure_image2: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate_contents_image1: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate_contents_image2: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_groups: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disc_positions_image1: Option<DiscBoard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disc_positions_image2: Option<DiscBoard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disc_positions_image3: Option<DiscBoard>,
}

macro_rules! fill_missing {
    ($target:expr, $source:expr, $($field:ident),+ $(,)?) => {
        $(
            if $target.$field.is_none() {
                $target.$field = $source.$field;
            }
        )+
    };
}

impl AnnotationFields {
    /// Adds every field of `other` that is still absent here. Present fields are kept.
    pub fn merge(&mut self, other: AnnotationFields) {
        fill_missing!(
            self,
            other,
            finish_state,
            hands_covered,
            surface_type,
            object_list,
            object_position,
            scene_graph,
            scene_graph_image1,
            scene_graph_image2,
            completed_structure,
            completed_structure_image1,
            completed_structure_image2,
            plate_contents_image1,
            plate_contents_image2,
            number_of_groups,
            disc_positions_image1,
            disc_positions_image2,
            disc_positions_image3,
        );
    }

    pub fn is_empty(&self) -> bool {
        *self == AnnotationFields::default()
    }
}

/// One annotated sample, keyed by its relative image identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneAnnotation {
    pub image: String,
    #[serde(flatten)]
    pub fields: AnnotationFields,
}

impl SceneAnnotation {
    pub fn new(image: impl Into<String>, fields: AnnotationFields) -> Self {
        Self {
            image: image.into(),
            fields,
        }
    }

    pub fn finish_state(&self) -> FinishState {
        self.fields.finish_state.unwrap_or(FinishState::None)
    }

    pub fn object_list(&self) -> &[String] {
        self.fields.object_list.as_deref().unwrap_or(&[])
    }

    /// Occurrences of `name` in `object_list` (exact match).
    pub fn name_count(&self, name: &str) -> usize {
        self.object_list().iter().filter(|n| n.as_str() == name).count()
    }

    /// True when `name` may anchor a question. Names missing from an empty
    /// object list are not penalised.
    pub fn is_unique_anchor(&self, name: &str) -> bool {
        self.name_count(name) <= 1
    }

    /// Scene graph and structure for the frame the structure describes: the
    /// sample-wide fields, or the first per-image pair when those are absent.
    pub fn relation_view(&self) -> Option<(&[Relation], CompletedStructure)> {
        let f = &self.fields;
        if let (Some(graph), Some(structure)) = (&f.scene_graph, &f.completed_structure) {
            if !graph.is_empty() && !structure.is_empty() {
                return Some((graph.as_slice(), structure.clone()));
            }
        }

        let graph = f
            .scene_graph_image1
            .as_ref()
            .or(f.scene_graph_image2.as_ref())?;
        let structure = f
            .completed_structure_image1
            .as_ref()
            .or(f.completed_structure_image2.as_ref())?;
        if graph.is_empty() || structure.is_empty() {
            return None;
        }
        Some((graph.as_slice(), CompletedStructure::Flat(structure.clone())))
    }

    /// Which frame (1 or 2) a per-image completed structure describes.
    pub fn per_image_structure_frame(&self) -> Option<u8> {
        if self.fields.completed_structure_image1.is_some() {
            Some(1)
        } else if self.fields.completed_structure_image2.is_some() {
            Some(2)
        } else {
            None
        }
    }
}
