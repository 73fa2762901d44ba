//! Intermediate-state recognition: pick the true middle frame among four.

use std::collections::BTreeSet;

use rand::{seq::SliceRandom, Rng};

use super::{frame, Choice, QAItem, TaskType};
use crate::{
    annotation::SceneAnnotation,
    scene::{Frame, SceneCategory},
};

const QUESTION: &str = "Provide additional <image3>, <image4>, <image5>, and <image6>, which represents a possible intermediate state during a manipulation task. Which one is a reasonable intermediate state during the task? \n\n Consider whether the object configuration in each candidate image reflects a plausible transition toward the finish state (<image2>). Evaluate if the operation sequence is reasonable;\nPay attention to whether any image contains structural or object states that conflict with the final state\nA. <image3>\nB. <image4>\nC. <image5>\nD. <image6>";

fn object_set(annotation: &SceneAnnotation) -> Option<BTreeSet<&str>> {
    let names = annotation.fields.object_list.as_ref()?;
    Some(names.iter().map(String::as_str).collect())
}

/// Whether `other`'s middle frame can stand in as a wrong answer for `sample`.
fn comparable(scene: SceneCategory, sample: &SceneAnnotation, other: &SceneAnnotation) -> bool {
    if other.image == sample.image || other.fields.surface_type != sample.fields.surface_type {
        return false;
    }
    if scene == SceneCategory::StackUnstackBowls {
        return match (object_set(sample), object_set(other)) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => false,
        };
    }
    true
}

/// One question per sample with at least three comparable samples in the same scene.
pub fn questions<R: Rng + ?Sized>(
    scene: SceneCategory,
    annotations: &[SceneAnnotation],
    rng: &mut R,
) -> Vec<QAItem> {
    let mut items = Vec::new();
    for sample in annotations {
        let truth = frame(sample, Frame::Medium);
        // A resumed log may hold the same sample more than once.
        let wrong: Vec<String> = annotations
            .iter()
            .filter(|other| comparable(scene, sample, other))
            .map(|other| frame(other, Frame::Medium))
            .filter(|medium| *medium != truth)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if wrong.len() < 3 {
            continue;
        }

        let picked: Vec<String> = wrong.choose_multiple(rng, 3).cloned().collect();
        let Some(choice) = Choice::shuffled(truth, picked, rng) else {
            continue;
        };

        let mut images = vec![frame(sample, Frame::Start), frame(sample, Frame::End)];
        images.extend(choice.options.iter().cloned());
        items.push(QAItem::new(
            TaskType::ProceduralInterm,
            scene,
            images,
            QUESTION,
            choice.label(),
        ));
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::AnnotationFields;
    use crate::qa::letter_index;
    use rand::{rngs::StdRng, SeedableRng};

    fn sample(id: &str, surface: &str, objects: &[&str]) -> SceneAnnotation {
        SceneAnnotation::new(
            format!("stack_unstack_bowls/{id}.jpg"),
            AnnotationFields {
                surface_type: Some(surface.into()),
                object_list: Some(objects.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn true_medium_sits_at_label_position() {
        let annotations = vec![
            sample("a", "white table", &["red bowl", "blue bowl"]),
            sample("b", "white table", &["blue bowl", "red bowl"]),
            sample("c", "white table", &["red bowl", "blue bowl"]),
            sample("d", "white table", &["red bowl", "blue bowl"]),
            sample("e", "grey table", &["red bowl", "blue bowl"]),
        ];
        let mut rng = StdRng::seed_from_u64(9);
        let items = questions(SceneCategory::StackUnstackBowls, &annotations, &mut rng);

        // "e" has no comparable samples.
        assert_eq!(items.len(), 4);
        for item in &items {
            assert_eq!(item.images.len(), 6);
            let idx = letter_index(&item.label).unwrap();
            let stem = item.images[0].trim_end_matches("_start.jpg");
            assert_eq!(item.images[2 + idx], format!("{stem}_medium.jpg"));
            assert!(item.images[2..].iter().all(|m| !m.contains("/e_")));
        }
    }

    #[test]
    fn bowls_require_matching_object_sets() {
        let annotations = vec![
            sample("a", "white table", &["red bowl"]),
            sample("b", "white table", &["blue bowl"]),
            sample("c", "white table", &["blue bowl"]),
            sample("d", "white table", &["blue bowl"]),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        assert!(questions(SceneCategory::StackUnstackBowls, &annotations, &mut rng).is_empty());
        assert_eq!(questions(SceneCategory::BuildUnstackLego, &annotations, &mut rng).len(), 4);
    }

    #[test]
    fn repeated_log_records_do_not_cost_a_question() {
        let annotations = vec![
            sample("a", "white table", &["red bowl"]),
            sample("b", "white table", &["red bowl"]),
            sample("c", "white table", &["red bowl"]),
            sample("b", "white table", &["red bowl"]),
            sample("d", "white table", &["red bowl"]),
        ];
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let items = questions(SceneCategory::StackUnstackBowls, &annotations, &mut rng);
            let for_a = items
                .iter()
                .filter(|item| item.images[0] == "stack_unstack_bowls/a_start.jpg")
                .count();
            assert_eq!(for_a, 1, "seed {seed}");
        }
    }
}
