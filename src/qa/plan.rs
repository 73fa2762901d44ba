//! Transformation planning: the first or last operation, and the first or last
//! object to handle.

use std::collections::HashSet;

use rand::{
    seq::{IteratorRandom, SliceRandom},
    Rng,
};

use super::{
    choice::pick_distractors, completed_order, fill, frame, name_counts, Choice, PlanMask, QAItem,
    TaskType,
};
use crate::{
    annotation::{CompletedStructure, FinishState, LayerRecord, SceneAnnotation},
    config::SynthesisConfig,
    scene::{Frame, SceneCategory},
};

const OPERATION_QUESTION: &str =
    "what is the most likely operation in the [MASK] step to achieve this transformation?";
const FIRST_OBJECT_QUESTION: &str =
    "Which of the following objects should be manipulated first in the transformation process?";
const LAST_OBJECT_QUESTION: &str =
    "Which of the following objects should be manipulated last in the transformation process?";

const FIRST_PHRASES: [&str; 3] = [
    "Place the {} on the surface",
    "Add the {} to the surface",
    "Put the {} on the surface",
];
const LAST_PHRASES: [&str; 3] = [
    "Place the {} on the {}",
    "Add the {} to the {}",
    "Put the {} on the {}",
];

const OPTION_TARGET: usize = 4;

fn operation_item(
    scene: SceneCategory,
    images: Vec<String>,
    mask: PlanMask,
    choice: Choice,
) -> QAItem {
    let question = OPERATION_QUESTION.replace("[MASK]", mask.as_str());
    QAItem::new(
        TaskType::ProceduralPlan,
        scene,
        images,
        format!("{question}\n{}", choice.inline()),
        choice.label(),
    )
    .with_mask(mask)
}

/// First/last operation questions for lego (layered) and sandwich (flat) stacks.
pub fn operation_questions<R: Rng + ?Sized>(
    scene: SceneCategory,
    annotation: &SceneAnnotation,
    config: &SynthesisConfig,
    rng: &mut R,
) -> Vec<QAItem> {
    let Some(images) = completed_order(annotation) else {
        return Vec::new();
    };
    let item = match annotation.fields.completed_structure.as_ref() {
        Some(CompletedStructure::Layered(records)) if records.len() >= 2 => {
            let first = rng.gen_bool(config.lego_first_weight.clamp(0.0, 1.0));
            let built = if first {
                layered_first(records, rng).map(|c| (PlanMask::First, c))
            } else {
                layered_last(records, rng).map(|c| (PlanMask::Last, c))
            };
            built.map(|(mask, choice)| operation_item(scene, images, mask, choice))
        }
        Some(CompletedStructure::Flat(names)) => {
            let mask = if rng.gen_bool(0.5) { PlanMask::First } else { PlanMask::Last };
            flat_operation(names, mask, rng).map(|choice| operation_item(scene, images, mask, choice))
        }
        _ => None,
    };
    item.into_iter().collect()
}

fn unique_objects(records: &[LayerRecord]) -> HashSet<&str> {
    let objects: Vec<String> = records.iter().map(|r| r.object.clone()).collect();
    let counts = name_counts(&objects);
    records
        .iter()
        .map(|r| r.object.as_str())
        .filter(|name| counts.get(name) == Some(&1))
        .collect()
}

/// Correct: a layer-1 object goes down first. Distractors: objects from higher layers.
fn layered_first<R: Rng + ?Sized>(records: &[LayerRecord], rng: &mut R) -> Option<Choice> {
    let unique = unique_objects(records);
    let base: Vec<&str> = records
        .iter()
        .filter(|r| r.layer == 1 && unique.contains(r.object.as_str()))
        .map(|r| r.object.as_str())
        .collect();
    let object = *base.choose(rng)?;
    let correct = fill(FIRST_PHRASES.choose(rng)?, &[object]);

    let mut higher: Vec<&str> = records
        .iter()
        .filter(|r| r.layer > 1 && r.object != object)
        .map(|r| r.object.as_str())
        .collect();
    higher.sort_unstable();
    higher.dedup();
    if higher.is_empty() {
        return None;
    }

    let needed = higher.len().min(OPTION_TARGET - 1);
    let mut distractors = Vec::with_capacity(needed);
    for name in higher.choose_multiple(rng, needed) {
        let text = fill(FIRST_PHRASES.choose(rng)?, &[*name]);
        if !distractors.contains(&text) {
            distractors.push(text);
        }
    }
    Choice::shuffled(correct, distractors, rng)
}

/// Every `(object, support)` pair that could be the final placement: a
/// top-layer object resting on any of its supports.
fn final_placements(records: &[LayerRecord], max_layer: u32) -> HashSet<(&str, &str)> {
    records
        .iter()
        .filter(|r| r.layer == max_layer)
        .flat_map(|r| r.below.iter().map(move |b| (r.object.as_str(), b.as_str())))
        .collect()
}

/// Correct: the top-layer object goes onto one of its supports. Distractors
/// prefer other contacting pairs, then any ordered pair of objects; no
/// distractor may be another valid final placement.
fn layered_last<R: Rng + ?Sized>(records: &[LayerRecord], rng: &mut R) -> Option<Choice> {
    let unique = unique_objects(records);
    let max_layer = records.iter().map(|r| r.layer).max()?;
    let top = records.iter().find(|r| r.layer == max_layer)?;
    let support = top.below.first()?;
    if !unique.contains(top.object.as_str()) || !unique.contains(support.as_str()) {
        return None;
    }
    let correct = fill(LAST_PHRASES.choose(rng)?, &[&top.object, support]);
    let valid = final_placements(records, max_layer);
    let is_answer = |a: &str, b: &str| valid.contains(&(a, b));

    let needed = OPTION_TARGET - 1;
    let mut distractors: Vec<String> = Vec::with_capacity(needed);
    let offer = |a: &str, b: &str, rng: &mut R, distractors: &mut Vec<String>| {
        if distractors.len() >= needed || is_answer(a, b) || a == b {
            return;
        }
        if let Some(template) = LAST_PHRASES.iter().choose(rng) {
            let text = fill(template, &[a, b]);
            if text != correct && !distractors.contains(&text) {
                distractors.push(text);
            }
        }
    };

    let mut contacts: Vec<(&str, &str)> = records
        .iter()
        .flat_map(|r| {
            r.below
                .iter()
                .filter(|b| !b.is_empty())
                .map(move |b| (r.object.as_str(), b.as_str()))
        })
        .collect();
    contacts.shuffle(rng);
    for (a, b) in contacts {
        offer(a, b, rng, &mut distractors);
    }

    let names: Vec<&str> = records.iter().map(|r| r.object.as_str()).collect();
    let mut any_pair: Vec<(&str, &str)> = names
        .iter()
        .flat_map(|a| names.iter().map(move |b| (*a, *b)))
        .collect();
    any_pair.shuffle(rng);
    for (a, b) in any_pair {
        offer(a, b, rng, &mut distractors);
    }

    if distractors.len() < needed {
        return None;
    }
    Choice::shuffled(correct, distractors, rng)
}

/// Sandwich-style stacks of three or four layers, listed top to bottom.
fn flat_operation<R: Rng + ?Sized>(names: &[String], mask: PlanMask, rng: &mut R) -> Option<Choice> {
    let n = names.len();
    if !(3..=4).contains(&n) {
        return None;
    }
    if names.iter().any(|name| {
        let lower = name.to_lowercase();
        lower.contains("paper") || lower.contains("crayon")
    }) {
        return None;
    }
    let counts = name_counts(names);
    let unique = |name: &str| counts.get(name) == Some(&1);
    let needed = n - 1;

    match mask {
        PlanMask::First => {
            let bottom = names[n - 1].as_str();
            if !unique(bottom) {
                return None;
            }
            let correct = fill(FIRST_PHRASES.choose(rng)?, &[bottom]);
            let candidates = names[..n - 1]
                .iter()
                .filter(|name| name.as_str() != bottom)
                .flat_map(|name| FIRST_PHRASES.iter().map(move |t| fill(t, &[name.as_str()])));
            let distractors = pick_distractors(&correct, candidates, needed, rng)?;
            Choice::shuffled(correct, distractors, rng)
        }
        PlanMask::Last => {
            let (top, below) = (names[0].as_str(), names[1].as_str());
            if !unique(top) || !unique(below) {
                return None;
            }
            let correct = fill(LAST_PHRASES.choose(rng)?, &[top, below]);
            let rest: Vec<&str> = names[2..].iter().map(String::as_str).collect();

            let mut pairs: Vec<(&str, &str)> = Vec::new();
            for &other in &rest {
                pairs.push((top, other));
                pairs.push((other, top));
                pairs.push((other, below));
                for &second in &rest {
                    pairs.push((other, second));
                }
            }
            let candidates = pairs
                .into_iter()
                .filter(|(a, b)| a != b && (*a, *b) != (top, below))
                .flat_map(|(a, b)| LAST_PHRASES.iter().map(move |t| fill(t, &[a, b])));
            let distractors = pick_distractors(&correct, candidates, needed, rng)?;
            Choice::shuffled(correct, distractors, rng)
        }
    }
}

fn object_item(
    scene: SceneCategory,
    annotation: &SceneAnnotation,
    mask: PlanMask,
    choice: Choice,
) -> QAItem {
    let question = match mask {
        PlanMask::First => FIRST_OBJECT_QUESTION,
        PlanMask::Last => LAST_OBJECT_QUESTION,
    };
    QAItem::new(
        TaskType::ProceduralPlan,
        scene,
        vec![frame(annotation, Frame::Start), frame(annotation, Frame::End)],
        format!("{question}\n{}", choice.lines()),
        choice.label(),
    )
    .with_mask(mask)
}

/// First/last object questions for sandwiches and table setup.
pub fn object_questions<R: Rng + ?Sized>(
    scene: SceneCategory,
    annotation: &SceneAnnotation,
    rng: &mut R,
) -> Vec<QAItem> {
    match scene {
        SceneCategory::MakeSandwich => sandwich_objects(annotation, rng),
        SceneCategory::SetupCleanupTable => table_objects(annotation, rng),
        _ => Vec::new(),
    }
}

/// Ingredients between the outer slices, listed in manipulation order. The
/// latest-listed option is handled first, the earliest-listed last.
fn sandwich_objects<R: Rng + ?Sized>(annotation: &SceneAnnotation, rng: &mut R) -> Vec<QAItem> {
    let objects = annotation.object_list();
    if objects.len() < 3 {
        return Vec::new();
    }
    let inner: Vec<&str> = objects[1..objects.len() - 1]
        .iter()
        .map(String::as_str)
        .filter(|name| annotation.name_count(name) == 1)
        .collect();
    if inner.len() < 2 {
        return Vec::new();
    }

    let sampled: Vec<&str> = if inner.len() <= OPTION_TARGET {
        inner
    } else {
        inner.choose_multiple(rng, OPTION_TARGET).copied().collect()
    };
    let position = |name: &str| objects.iter().position(|o| o == name).unwrap_or(0);

    let mut items = Vec::new();
    for mask in [PlanMask::First, PlanMask::Last] {
        let answer = match mask {
            PlanMask::First => sampled.iter().copied().max_by_key(|n| position(n)),
            PlanMask::Last => sampled.iter().copied().min_by_key(|n| position(n)),
        };
        let Some(answer) = answer else { continue };
        let distractors = sampled
            .iter()
            .filter(|n| **n != answer)
            .map(|n| n.to_string())
            .collect();
        if let Some(choice) = Choice::shuffled(answer.to_string(), distractors, rng) {
            items.push(object_item(SceneCategory::MakeSandwich, annotation, mask, choice));
        }
    }
    items
}

/// The tablecloth goes down before anything else is set on it and comes off
/// after everything else is cleared.
fn table_objects<R: Rng + ?Sized>(annotation: &SceneAnnotation, rng: &mut R) -> Vec<QAItem> {
    let setting_up = match annotation.fields.finish_state {
        None | Some(FinishState::Image2) => true,
        Some(FinishState::Image1) => false,
        Some(FinishState::None) => return Vec::new(),
    };

    let objects = annotation.object_list();
    let Some(cloth) = objects.iter().find(|o| o.contains("tablecloth")) else {
        return Vec::new();
    };
    let mut others: Vec<&str> = objects
        .iter()
        .filter(|o| !o.contains("tablecloth"))
        .map(String::as_str)
        .collect();
    others.sort_unstable();
    others.dedup();
    let Some(&single) = others.choose(rng) else {
        return Vec::new();
    };

    let wide: Vec<String> = others
        .choose_multiple(rng, OPTION_TARGET - 1)
        .map(|o| o.to_string())
        .collect();
    let cloth_among_many = Choice::shuffled(cloth.clone(), wide, rng);
    let other_against_cloth = Choice::shuffled(single.to_string(), vec![cloth.clone()], rng);

    let (first, last) = if setting_up {
        (cloth_among_many, other_against_cloth)
    } else {
        (other_against_cloth, cloth_among_many)
    };

    let mut items = Vec::new();
    if let Some(choice) = first {
        items.push(object_item(SceneCategory::SetupCleanupTable, annotation, PlanMask::First, choice));
    }
    if let Some(choice) = last {
        items.push(object_item(SceneCategory::SetupCleanupTable, annotation, PlanMask::Last, choice));
    }
    items
}
