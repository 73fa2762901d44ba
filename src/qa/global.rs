//! Global arrangement: did the left-to-right order of three books change?

use rand::Rng;

use super::{frame, Choice, QAItem, TaskType};
use crate::{
    annotation::{CompletedStructure, SceneAnnotation},
    config::SynthesisConfig,
    scene::{Frame, SceneCategory},
};

const QUESTION: &str =
    "Has the relative left-to-right position of the three books (left, middle, right) changed?";

fn unchanged(arrangement: &str) -> String {
    format!("No, the relative positions remain unchanged; the arrangement is: {arrangement}.")
}

fn changed(from: &str, to: &str) -> String {
    format!("Yes, the relative positions have changed; the arrangement changed from {from} to {to}.")
}

/// `[left, middle, right]` before and the first three shelf entries after.
fn arrangements(annotation: &SceneAnnotation) -> Option<([String; 3], [String; 3])> {
    let positions = annotation.fields.object_position.as_ref()?;
    let Some(CompletedStructure::Flat(books)) = annotation.fields.completed_structure.as_ref() else {
        return None;
    };
    if books.len() < 3 {
        return None;
    }

    let left = positions.left.as_deref()?.trim().to_lowercase();
    let right = positions.right.as_deref()?.trim().to_lowercase();
    if left.is_empty() || right.is_empty() {
        return None;
    }
    let middle = books
        .iter()
        .map(|b| b.trim().to_lowercase())
        .find(|b| *b != left && *b != right)?;

    let after = [
        books[0].trim().to_lowercase(),
        books[1].trim().to_lowercase(),
        books[2].trim().to_lowercase(),
    ];
    Some(([left, middle, right], after))
}

pub fn questions<R: Rng + ?Sized>(
    scene: SceneCategory,
    annotation: &SceneAnnotation,
    config: &SynthesisConfig,
    rng: &mut R,
) -> Vec<QAItem> {
    if scene != SceneCategory::InsertRemoveBookshelf
        || annotation.fields.surface_type.as_deref() != Some(config.bookshelf_surface.as_str())
    {
        return Vec::new();
    }
    let Some((before, after)) = arrangements(annotation) else {
        return Vec::new();
    };

    let initial = before.join(", ");
    let (correct, distractors) = if before == after {
        let swapped = [&before[1], &before[0], &before[2]].map(String::as_str).join(", ");
        (
            unchanged(&initial),
            vec![
                unchanged(&swapped),
                changed(&initial, &swapped),
                changed(&swapped, &initial),
            ],
        )
    } else {
        let fin = after.join(", ");
        let rotated = [&before[1], &before[2], &before[0]].map(String::as_str).join(", ");
        (
            changed(&initial, &fin),
            vec![unchanged(&initial), unchanged(&fin), changed(&rotated, &fin)],
        )
    };

    let Some(choice) = Choice::shuffled(correct, distractors, rng) else {
        return Vec::new();
    };
    vec![QAItem::new(
        TaskType::SpatialGlobal,
        scene,
        vec![frame(annotation, Frame::Start), frame(annotation, Frame::End)],
        format!("{QUESTION}\n{}", choice.lines()),
        choice.label(),
    )]
}
