//! Fine-grained spatial questions: the final layer of an anchored object, and
//! every object above or below it.

use std::collections::HashMap;

use rand::{seq::SliceRandom, Rng};

use super::{
    image_order, keep,
    layers::{find_layer, layered_names, objects_above, objects_below},
    name_counts, Choice, QAItem, TaskType,
};
use crate::{
    annotation::{CompletedStructure, ObjectPosition, Relation, SceneAnnotation},
    config::SynthesisConfig,
    scene::SceneCategory,
};

const BOOKEND_OPTIONS: [&str; 3] = [
    "the far left of the bookend",
    "the middle of the bookend",
    "the far right of the bookend",
];

const LAYER_OPTIONS: usize = 4;

/// Anchor positions with the phrase used in layer and enumeration questions.
const POSITIONS: [(Anchor, &str); 3] = [
    (Anchor::Left, "leftmost"),
    (Anchor::Right, "rightmost"),
    (Anchor::Closest, "closest-to-camera"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Left,
    Right,
    Closest,
}

impl Anchor {
    fn resolve(self, positions: &ObjectPosition) -> Option<&str> {
        let name = match self {
            Anchor::Left => positions.left.as_deref(),
            Anchor::Right => positions.right.as_deref(),
            Anchor::Closest => positions.closest.as_deref(),
        }?;
        let name = name.trim();
        (!name.is_empty() && !name.to_lowercase().contains("none")).then_some(name)
    }
}

/// True when no other triple puts a different subject in the same direction
/// of the same reference, so "the object originally left of X" names one object.
fn names_one_subject(relations: &[Relation], relation: &Relation) -> bool {
    !relations.iter().any(|other| {
        other.relation == relation.relation
            && other.reference == relation.reference
            && other.subject != relation.subject
    })
}

fn spatial_item(scene: SceneCategory, annotation: &SceneAnnotation, question: String, label: String) -> QAItem {
    QAItem::new(TaskType::SpatialFineGrained, scene, image_order(annotation), question, label)
}

/// Layer numbers 1..max(5, max_layer + 2) around the correct one, ascending.
fn layer_choice<R: Rng + ?Sized>(correct: u32, max_layer: u32, rng: &mut R) -> Option<Choice> {
    let upper = (max_layer + 2).max(5);
    let pool: Vec<u32> = (1..upper).filter(|l| *l != correct).collect();
    let mut picked: Vec<u32> = pool.choose_multiple(rng, LAYER_OPTIONS - 1).copied().collect();
    picked.push(correct);
    picked.sort_unstable();
    let answer = picked.iter().position(|l| *l == correct)?;
    let options = picked
        .iter()
        .map(|l| format!("Layer {l} (from the bottom)"))
        .collect();
    Choice::ordered(options, answer)
}

/// "Which layer" questions, plus bookend placement for the bookshelf.
pub fn layer_questions<R: Rng + ?Sized>(
    scene: SceneCategory,
    annotation: &SceneAnnotation,
    config: &SynthesisConfig,
    rng: &mut R,
) -> Vec<QAItem> {
    if scene == SceneCategory::InsertRemoveBookshelf {
        return bookend_questions(annotation, config);
    }

    let mut items = Vec::new();
    if let (Some(positions), Some(structure)) = (
        annotation.fields.object_position.as_ref(),
        annotation.fields.completed_structure.as_ref(),
    ) {
        let layered = matches!(structure, CompletedStructure::Layered(_));
        for (anchor, phrase) in POSITIONS {
            if layered && anchor == Anchor::Closest {
                continue;
            }
            let Some(name) = anchor.resolve(positions) else {
                continue;
            };
            if !annotation.is_unique_anchor(name) {
                continue;
            }
            let Some(layer) = find_layer(name, structure) else {
                continue;
            };
            let Some(choice) = layer_choice(layer, structure.max_layer(), rng) else {
                continue;
            };
            let question = format!(
                "After the transformation, which layer is the object originally at the {phrase} position now located in?\n{}",
                choice.lines()
            );
            items.push(spatial_item(scene, annotation, question, choice.label()));
        }
    }

    if let Some((relations, structure)) = annotation.relation_view() {
        for relation in relations {
            if !annotation.is_unique_anchor(&relation.subject)
                || !annotation.is_unique_anchor(&relation.reference)
                || !names_one_subject(relations, relation)
            {
                continue;
            }
            let Some(layer) = find_layer(&relation.subject, &structure) else {
                continue;
            };
            let Some(choice) = layer_choice(layer, structure.max_layer(), rng) else {
                continue;
            };
            let question = format!(
                "From the camera's viewpoint, after the transformation, which layer did the object that was originally {} {} move to?\n{}",
                relation.relation.describe(),
                relation.reference,
                choice.lines()
            );
            items.push(spatial_item(scene, annotation, question, choice.label()));
        }
    }
    items
}

/// Where each anchored book ends up between the bookends. Options keep their
/// fixed left-to-right order.
fn bookend_questions(annotation: &SceneAnnotation, config: &SynthesisConfig) -> Vec<QAItem> {
    if annotation.fields.surface_type.as_deref() != Some(config.bookshelf_surface.as_str()) {
        return Vec::new();
    }
    let (Some(positions), Some(CompletedStructure::Flat(books))) = (
        annotation.fields.object_position.as_ref(),
        annotation.fields.completed_structure.as_ref(),
    ) else {
        return Vec::new();
    };
    if books.is_empty() {
        return Vec::new();
    }

    let shelf: Vec<String> = books.iter().map(|b| b.trim().to_lowercase()).collect();
    let anchors = [
        (Anchor::Left, "leftmost"),
        (Anchor::Right, "rightmost"),
        (Anchor::Closest, "closest to the camera"),
    ];

    let mut items = Vec::new();
    for (anchor, phrase) in anchors {
        let Some(name) = anchor.resolve(positions) else {
            continue;
        };
        if !annotation.is_unique_anchor(name) {
            continue;
        }
        let Some(index) = shelf.iter().position(|b| *b == name.to_lowercase()) else {
            continue;
        };
        let answer = if index == 0 {
            0
        } else if index + 1 == shelf.len() {
            2
        } else {
            1
        };
        let Some(choice) = Choice::ordered(BOOKEND_OPTIONS.map(String::from).to_vec(), answer) else {
            continue;
        };
        let question = format!(
            "After the transformation, where is the object originally at the {phrase} position now located?\n{}",
            choice.lines()
        );
        items.push(spatial_item(SceneCategory::InsertRemoveBookshelf, annotation, question, choice.label()));
    }
    items
}

/// Names offered to the model: each name that appears exactly once, shuffled.
/// Sandwiches read the final stack since their object list repeats slices.
fn vocabulary<R: Rng + ?Sized>(
    scene: SceneCategory,
    annotation: &SceneAnnotation,
    rng: &mut R,
) -> Vec<String> {
    let source: Vec<String> = match (scene, annotation.fields.completed_structure.as_ref()) {
        (SceneCategory::MakeSandwich, Some(structure)) => {
            layered_names(structure).into_iter().map(|(n, _)| n).collect()
        }
        _ => annotation.object_list().to_vec(),
    };
    let counts = name_counts(&source);
    let mut names: Vec<String> = source
        .iter()
        .filter(|n| counts.get(n.as_str()) == Some(&1))
        .cloned()
        .collect();
    names.shuffle(rng);
    names
}

/// Open-ended label for one side of the anchor. `None` when no name survives
/// or a lone name loses the keep draw.
fn enumeration_label<R: Rng + ?Sized>(
    related: &[String],
    annotation: &SceneAnnotation,
    vocabulary: &[String],
    config: &SynthesisConfig,
    rng: &mut R,
) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in related {
        *counts.entry(name.as_str()).or_insert(0) += 1;
    }
    let mut valid: Vec<&str> = related
        .iter()
        .map(String::as_str)
        .filter(|n| counts.get(n) == Some(&1) && annotation.is_unique_anchor(n))
        .filter(|n| vocabulary.iter().any(|v| v == n))
        .collect();
    if valid.is_empty() {
        return None;
    }
    if valid.len() == 1 && !keep(rng, config.single_label_keep_ratio) {
        return None;
    }
    valid.sort_unstable();
    valid.dedup();
    Some(valid.join(", "))
}

fn enumeration_suffix(vocabulary: &[String]) -> String {
    format!(
        ", whether or not they are in direct contact. Only select from the given object list: {}. Do not add or infer any new objects.",
        vocabulary.join(", ")
    )
}

/// "List every object above/below the anchor" questions with comma-joined labels.
pub fn enumeration_questions<R: Rng + ?Sized>(
    scene: SceneCategory,
    annotation: &SceneAnnotation,
    config: &SynthesisConfig,
    rng: &mut R,
) -> Vec<QAItem> {
    let vocabulary = vocabulary(scene, annotation, rng);
    if vocabulary.is_empty() {
        return Vec::new();
    }
    let suffix = enumeration_suffix(&vocabulary);
    let mut items = Vec::new();

    if let (Some(positions), Some(structure)) = (
        annotation.fields.object_position.as_ref(),
        annotation.fields.completed_structure.as_ref(),
    ) {
        if structure.len() >= 4 {
            let mut order = POSITIONS;
            order.shuffle(rng);
            for (anchor, phrase) in order {
                let Some(name) = anchor.resolve(positions) else {
                    continue;
                };
                if !annotation.is_unique_anchor(name) {
                    continue;
                }
                let Some(layer) = find_layer(name, structure) else {
                    continue;
                };
                for (side, related) in [
                    ("above", objects_above(structure, layer)),
                    ("below", objects_below(structure, layer)),
                ] {
                    let Some(label) = enumeration_label(&related, annotation, &vocabulary, config, rng) else {
                        continue;
                    };
                    let question = format!(
                        "After the transformation, list all objects that are positioned {side} the object that was originally {phrase}{suffix}"
                    );
                    items.push(spatial_item(scene, annotation, question, label));
                }
            }
        }
    }

    if let Some((relations, structure)) = annotation.relation_view() {
        for relation in relations {
            if !annotation.is_unique_anchor(&relation.subject)
                || !annotation.is_unique_anchor(&relation.reference)
                || !names_one_subject(relations, relation)
            {
                continue;
            }
            let Some(layer) = find_layer(&relation.subject, &structure) else {
                continue;
            };
            for (side, related) in [
                ("above", objects_above(&structure, layer)),
                ("below", objects_below(&structure, layer)),
            ] {
                let Some(label) = enumeration_label(&related, annotation, &vocabulary, config, rng) else {
                    continue;
                };
                let question = format!(
                    "From the camera's viewpoint, after the transformation, list all objects that are positioned {side} the object that was originally {} {}{suffix}",
                    relation.relation.describe(),
                    relation.reference,
                );
                items.push(spatial_item(scene, annotation, question, label));
            }
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{AnnotationFields, FinishState, SpatialRelation};
    use crate::qa::{frame, letter_index};
    use crate::scene::Frame;
    use rand::{rngs::StdRng, SeedableRng};

    fn bowls(structure: &[&str], positions: ObjectPosition) -> SceneAnnotation {
        let names: Vec<String> = structure.iter().map(|s| s.to_string()).collect();
        SceneAnnotation::new(
            "stack_unstack_bowls/s.jpg",
            AnnotationFields {
                finish_state: Some(FinishState::Image2),
                object_list: Some(names.clone()),
                object_position: Some(positions),
                completed_structure: Some(CompletedStructure::Flat(names)),
                ..Default::default()
            },
        )
    }

    fn answer_line(item: &QAItem) -> String {
        let idx = letter_index(&item.label).unwrap();
        item.question.lines().nth(idx + 1).unwrap()[3..].to_string()
    }

    #[test]
    fn layer_options_are_ascending_and_labelled() {
        let annotation = bowls(
            &["green bowl", "red bowl", "blue bowl"],
            ObjectPosition {
                left: Some("green bowl".into()),
                right: Some("blue bowl".into()),
                closest: None,
            },
        );
        let mut rng = StdRng::seed_from_u64(5);
        let items = layer_questions(SceneCategory::StackUnstackBowls, &annotation, &SynthesisConfig::default(), &mut rng);
        assert_eq!(items.len(), 2);
        assert_eq!(answer_line(&items[0]), "Layer 3 (from the bottom)");
        assert_eq!(answer_line(&items[1]), "Layer 1 (from the bottom)");
        assert_eq!(items[0].images[0], frame(&annotation, Frame::Start));

        let layers: Vec<u32> = items[0]
            .question
            .lines()
            .skip(1)
            .map(|l| l[9..].split(' ').next().unwrap().parse().unwrap())
            .collect();
        assert_eq!(layers.len(), 4);
        assert!(layers.windows(2).all(|w| w[0] < w[1]));
        assert!(layers.iter().all(|l| (1..5).contains(l)));
    }

    #[test]
    fn duplicated_anchor_is_skipped() {
        let annotation = bowls(
            &["red bowl", "red bowl", "blue bowl"],
            ObjectPosition {
                left: Some("red bowl".into()),
                ..Default::default()
            },
        );
        let mut rng = StdRng::seed_from_u64(1);
        assert!(layer_questions(SceneCategory::StackUnstackBowls, &annotation, &SynthesisConfig::default(), &mut rng)
            .is_empty());
    }

    #[test]
    fn relation_anchor_names_reference_object() {
        let mut annotation = bowls(&["green bowl", "red bowl", "blue bowl"], ObjectPosition::default());
        annotation.fields.scene_graph = Some(vec![Relation {
            subject: "red bowl".into(),
            relation: SpatialRelation::Left,
            reference: "blue bowl".into(),
        }]);
        let mut rng = StdRng::seed_from_u64(3);
        let items = layer_questions(SceneCategory::StackUnstackBowls, &annotation, &SynthesisConfig::default(), &mut rng);
        assert_eq!(items.len(), 1);
        assert!(items[0].question.contains("originally to the left of blue bowl move to?"));
        assert_eq!(answer_line(&items[0]), "Layer 2 (from the bottom)");
    }

    #[test]
    fn shared_relation_and_reference_is_not_an_anchor() {
        let mut annotation = bowls(&["green bowl", "red bowl", "blue bowl"], ObjectPosition::default());
        let triple = |subject: &str, relation, reference: &str| Relation {
            subject: subject.into(),
            relation,
            reference: reference.into(),
        };
        annotation.fields.scene_graph = Some(vec![
            triple("red bowl", SpatialRelation::Left, "blue bowl"),
            triple("green bowl", SpatialRelation::Left, "blue bowl"),
            triple("green bowl", SpatialRelation::Top, "red bowl"),
        ]);
        let mut rng = StdRng::seed_from_u64(3);
        let items = layer_questions(SceneCategory::StackUnstackBowls, &annotation, &SynthesisConfig::default(), &mut rng);
        assert_eq!(items.len(), 1);
        assert!(items[0].question.contains("originally above red bowl"));
        assert_eq!(answer_line(&items[0]), "Layer 3 (from the bottom)");

        let config = SynthesisConfig {
            single_label_keep_ratio: 1.0,
            ..Default::default()
        };
        let listed = enumeration_questions(SceneCategory::StackUnstackBowls, &annotation, &config, &mut rng);
        assert!(listed.iter().all(|item| !item.question.contains("left of blue bowl")));
    }

    #[test]
    fn bookend_placement_uses_fixed_options() {
        let annotation = SceneAnnotation::new(
            "insert_remove_bookshelf/b.jpg",
            AnnotationFields {
                surface_type: Some("dark blue bed".into()),
                object_position: Some(ObjectPosition {
                    left: Some("Red Book".into()),
                    right: Some("green book".into()),
                    closest: Some("blue book".into()),
                }),
                completed_structure: Some(CompletedStructure::Flat(
                    ["green book", "blue book", "red book"].map(String::from).to_vec(),
                )),
                ..Default::default()
            },
        );
        let mut rng = StdRng::seed_from_u64(0);
        let items = layer_questions(SceneCategory::InsertRemoveBookshelf, &annotation, &SynthesisConfig::default(), &mut rng);
        let labels: Vec<&str> = items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["C", "A", "B"]);
        assert!(items[2].question.contains("closest to the camera position"));
    }

    #[test]
    fn enumeration_lists_sorted_objects_above_anchor() {
        let annotation = bowls(
            &["white bowl", "green bowl", "red bowl", "blue bowl"],
            ObjectPosition {
                left: Some("blue bowl".into()),
                ..Default::default()
            },
        );
        let config = SynthesisConfig {
            single_label_keep_ratio: 0.0,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(6);
        let items = enumeration_questions(SceneCategory::StackUnstackBowls, &annotation, &config, &mut rng);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].label, "green bowl, red bowl, white bowl");
        assert!(items[0].question.contains("positioned above the object that was originally leftmost"));
        assert!(items[0].question.ends_with("Do not add or infer any new objects."));
    }

    #[test]
    fn short_stacks_have_no_position_enumeration() {
        let annotation = bowls(
            &["green bowl", "red bowl", "blue bowl"],
            ObjectPosition {
                left: Some("blue bowl".into()),
                ..Default::default()
            },
        );
        let mut rng = StdRng::seed_from_u64(6);
        assert!(enumeration_questions(SceneCategory::StackUnstackBowls, &annotation, &SynthesisConfig::default(), &mut rng)
            .is_empty());
    }
}
