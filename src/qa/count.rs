//! Counting questions. The label is an integer rendered as a string.

use rand::Rng;

use super::{frame, keep, QAItem, TaskType};
use crate::{
    annotation::{FinishState, SceneAnnotation},
    config::SynthesisConfig,
    scene::{Frame, SceneCategory},
};

const FOOD_RETURNED: &str = "How many food items are placed back into the basket?";
const FOOD_ADDED: &str = "How many food items are in the plate now that were not there before?";
const BEAD_GROUPS: &str =
    "How many new groups consisting of beads with the same color have been formed after the transformation?";

pub fn questions<R: Rng + ?Sized>(
    scene: SceneCategory,
    annotation: &SceneAnnotation,
    config: &SynthesisConfig,
    rng: &mut R,
) -> Vec<QAItem> {
    match scene {
        SceneCategory::PickPlaceFood => plate_difference(annotation, config, rng).into_iter().collect(),
        SceneCategory::SortBeads => bead_groups(annotation, config),
        _ => Vec::new(),
    }
}

/// Difference in plate item counts between the two frames.
fn plate_difference<R: Rng + ?Sized>(
    annotation: &SceneAnnotation,
    config: &SynthesisConfig,
    rng: &mut R,
) -> Option<QAItem> {
    let before = annotation.fields.plate_contents_image1.as_ref()?.len();
    let after = annotation.fields.plate_contents_image2.as_ref()?.len();
    let diff = before.abs_diff(after);
    if diff <= 1 && !keep(rng, config.low_difference_keep_ratio) {
        return None;
    }

    let question = if after > before { FOOD_ADDED } else { FOOD_RETURNED };
    Some(QAItem::new(
        TaskType::Count,
        SceneCategory::PickPlaceFood,
        vec![frame(annotation, Frame::Start), frame(annotation, Frame::End)],
        question,
        diff.to_string(),
    ))
}

fn bead_groups(annotation: &SceneAnnotation, config: &SynthesisConfig) -> Vec<QAItem> {
    if annotation.fields.surface_type.as_deref() != Some(config.beads_surface.as_str()) {
        return Vec::new();
    }
    let Some(groups) = annotation.fields.number_of_groups else {
        return Vec::new();
    };

    let item = |images: Vec<String>| {
        QAItem::new(TaskType::Count, SceneCategory::SortBeads, images, BEAD_GROUPS, groups.to_string())
    };
    let (start, medium, end) = (
        frame(annotation, Frame::Start),
        frame(annotation, Frame::Medium),
        frame(annotation, Frame::End),
    );

    if annotation.finish_state() == FinishState::Image1 {
        vec![item(vec![end, start])]
    } else {
        vec![item(vec![start, end.clone()]), item(vec![medium, end])]
    }
}
