//! "Which operation happened" questions for stacks and the connect-four board.

use std::collections::{BTreeSet, HashMap};

use rand::{
    seq::{IteratorRandom, SliceRandom},
    Rng,
};

use super::{choice::pick_distractors, completed_order, fill, frame, Choice, QAItem, TaskType};
use crate::{
    annotation::{Cell, CompletedStructure, DiscBoard, DiscColor, SceneAnnotation},
    scene::{Frame, SceneCategory},
};

const STACK_PROMPT: &str = "Identify which of the following operations is most likely to occur during the transformation process from the <image1> to the <image2>.";
const BOARD_PROMPT: &str = "Identify which of the following operations is most likely to occur during the transformation process from <image1> to <image2>.\n(Row 1 is the bottom row; Column 1 is the leftmost column.)";

/// Verb phrases per scene family. `above` puts the first object on the second,
/// `below` puts it underneath.
struct Phrases {
    above: &'static [&'static str],
    below: &'static [&'static str],
}

impl Phrases {
    fn all(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.above.iter().chain(self.below).copied()
    }
}

const BOWL_PHRASES: Phrases = Phrases {
    above: &[
        "Place the {} on the {}.",
        "Stack the {} on top of the {}.",
        "Nest the {} above the {}.",
    ],
    below: &["Place the {} underneath the {}.", "Add the {} beneath the {}"],
};

const LEGO_PHRASES: Phrases = Phrases {
    above: &[
        "Place the {} on top of the {}.",
        "Stack the {} over the {}.",
        "Add the {} piece as the next layer above the {}.",
    ],
    below: &["Insert the {} underneath the {}.", "Add the {} beneath the {}"],
};

const SANDWICH_PHRASES: Phrases = Phrases {
    above: &["Place the {} on top of the {}.", "Stack the {} over the {}."],
    below: &["Place the {} underneath the {}."],
};

fn phrases_for(scene: SceneCategory) -> &'static Phrases {
    match scene {
        SceneCategory::StackUnstackBowls | SceneCategory::StackUnstackPlates => &BOWL_PHRASES,
        SceneCategory::MakeSandwich => &SANDWICH_PHRASES,
        _ => &LEGO_PHRASES,
    }
}

pub fn questions<R: Rng + ?Sized>(
    scene: SceneCategory,
    annotation: &SceneAnnotation,
    rng: &mut R,
) -> Vec<QAItem> {
    let item = match scene {
        SceneCategory::PlayResetConnectFour => board_question(annotation, rng),
        _ => stack_question(scene, annotation, rng),
    };
    item.into_iter().collect()
}

/// Names of the structure and its direct support pairs `(top, bottom)`.
fn support_pairs(structure: &CompletedStructure) -> (Vec<String>, Vec<(String, String)>) {
    match structure {
        CompletedStructure::Flat(names) => {
            let pairs = names
                .windows(2)
                .map(|w| (w[0].clone(), w[1].clone()))
                .collect();
            (names.clone(), pairs)
        }
        CompletedStructure::Layered(records) => {
            let names: Vec<String> = records.iter().map(|r| r.object.clone()).collect();
            let pairs = records
                .iter()
                .flat_map(|r| {
                    r.below
                        .iter()
                        .filter(|b| names.contains(b))
                        .map(move |b| (r.object.clone(), b.clone()))
                })
                .collect();
            (names, pairs)
        }
    }
}

fn stack_question<R: Rng + ?Sized>(
    scene: SceneCategory,
    annotation: &SceneAnnotation,
    rng: &mut R,
) -> Option<QAItem> {
    let images = completed_order(annotation)?;
    let structure = annotation.fields.completed_structure.as_ref()?;
    let (names, pairs) = support_pairs(structure);

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in &names {
        *counts.entry(name.as_str()).or_insert(0) += 1;
    }
    let unique = |name: &str| counts.get(name) == Some(&1) && annotation.is_unique_anchor(name);

    let distinct: Vec<&str> = names
        .iter()
        .map(String::as_str)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if distinct.len() < 2 {
        return None;
    }

    let support: BTreeSet<(&str, &str)> = pairs
        .iter()
        .map(|(top, bottom)| (top.as_str(), bottom.as_str()))
        .filter(|(top, bottom)| top != bottom)
        .collect();
    let anchored: Vec<(&str, &str)> = support
        .iter()
        .copied()
        .filter(|(top, bottom)| unique(*top) && unique(*bottom))
        .collect();

    let phrases = phrases_for(scene);
    let &(top, bottom) = anchored.choose(rng)?;
    let correct = if rng.gen_bool(0.5) {
        fill(phrases.above.choose(rng)?, &[top, bottom])
    } else {
        fill(phrases.below.choose(rng)?, &[bottom, top])
    };

    let mut pool: Vec<(&str, &str)> = distinct
        .iter()
        .flat_map(|a| distinct.iter().map(move |b| (*a, *b)))
        .filter(|(a, b)| a != b && !support.contains(&(*a, *b)) && !support.contains(&(*b, *a)))
        .collect();
    pool.shuffle(rng);

    let needed = distinct.len().min(4) - 1;
    let mut distractors: Vec<String> = Vec::with_capacity(needed);
    for (a, b) in pool {
        if distractors.len() >= needed {
            break;
        }
        let Some(template) = phrases.all().choose(rng) else {
            break;
        };
        let text = fill(template, &[a, b]);
        if text != correct && !distractors.contains(&text) {
            distractors.push(text);
        }
    }
    if distractors.len() < needed {
        return None;
    }

    let choice = Choice::shuffled(correct, distractors, rng)?;
    Some(QAItem::new(
        TaskType::ProceduralCausal,
        scene,
        images,
        format!("{STACK_PROMPT}\n{}", choice.inline()),
        choice.label(),
    ))
}

fn disc_move(color: DiscColor, cell: Cell) -> String {
    format!(
        "Place a {} disc in row {}, column {}.",
        color.as_str(),
        cell.row,
        cell.col
    )
}

fn neighbours(cell: Cell) -> impl Iterator<Item = Cell> {
    [(-1i16, 0i16), (1, 0), (0, -1), (0, 1)]
        .into_iter()
        .filter_map(move |(dr, dc)| {
            let row = u8::try_from(cell.row as i16 + dr).ok()?;
            let col = u8::try_from(cell.col as i16 + dc).ok()?;
            let next = Cell::new(row, col);
            next.is_on_board().then_some(next)
        })
}

/// Boards indexed by frame: image 1 is start, 2 is medium, 3 is end.
fn boards(annotation: &SceneAnnotation) -> [(Frame, Option<&DiscBoard>); 3] {
    let f = &annotation.fields;
    [
        (Frame::Start, f.disc_positions_image1.as_ref()),
        (Frame::Medium, f.disc_positions_image2.as_ref()),
        (Frame::End, f.disc_positions_image3.as_ref()),
    ]
}

fn board_question<R: Rng + ?Sized>(annotation: &SceneAnnotation, rng: &mut R) -> Option<QAItem> {
    let frames = boards(annotation);
    let mut transitions = Vec::new();
    for (i, (from_frame, from)) in frames.iter().enumerate() {
        for (j, (to_frame, to)) in frames.iter().enumerate() {
            if let (true, Some(from), Some(to)) = (i != j, from, to) {
                if from.total() < to.total() {
                    transitions.push((*from_frame, *from, *to_frame, *to));
                }
            }
        }
    }

    let &(from_frame, earlier, to_frame, later) = transitions.choose(rng)?;
    let (distractors, correct) = board_move(earlier, later, rng)?;
    let choice = Choice::shuffled(correct, distractors, rng)?;

    Some(QAItem::new(
        TaskType::ProceduralCausal,
        SceneCategory::PlayResetConnectFour,
        vec![frame(annotation, from_frame), frame(annotation, to_frame)],
        format!("{BOARD_PROMPT}\n{}", choice.inline()),
        choice.label(),
    ))
}

/// Picks one disc added between `earlier` and `later` and three plausible wrong moves.
pub(crate) fn board_move<R: Rng + ?Sized>(
    earlier: &DiscBoard,
    later: &DiscBoard,
    rng: &mut R,
) -> Option<(Vec<String>, String)> {
    let added = later.added_since(earlier);
    let &(color, cell) = added.choose(rng)?;
    let correct = disc_move(color, cell);

    let free = |c: Cell| !earlier.occupied(c) && !later.occupied(c);
    let mut pool = BTreeSet::new();

    // Discs that were already on the board.
    for disc_color in DiscColor::BOTH {
        for &existing in earlier.cells(disc_color) {
            pool.insert(disc_move(disc_color, existing));
        }
    }

    for &(added_color, added_cell) in &added {
        let flipped = added_color.other();
        // Right cell, wrong colour.
        pool.insert(disc_move(flipped, added_cell));
        for near in neighbours(added_cell).filter(|c| free(*c)) {
            pool.insert(disc_move(flipped, near));
            pool.insert(disc_move(added_color, near));
        }
    }
    for &(added_color, added_cell) in &added {
        pool.remove(&disc_move(added_color, added_cell));
    }

    let distractors = pick_distractors(&correct, pool, 3, rng)?;
    Some((distractors, correct))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{AnnotationFields, FinishState, LayerRecord};
    use crate::qa::letter_index;
    use rand::{rngs::StdRng, SeedableRng};

    fn flat(names: &[&str], finish: FinishState) -> SceneAnnotation {
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        SceneAnnotation::new(
            "stack_unstack_bowls/s.jpg",
            AnnotationFields {
                finish_state: Some(finish),
                object_list: Some(names.clone()),
                completed_structure: Some(CompletedStructure::Flat(names)),
                ..Default::default()
            },
        )
    }

    fn options(item: &QAItem) -> Vec<String> {
        let line = item.question.lines().last().unwrap();
        let mut out = Vec::new();
        let mut rest = line;
        for next in ["B. ", "C. ", "D. "] {
            if let Some(at) = rest.find(&format!(" {next}")) {
                out.push(rest[3..at].to_string());
                rest = &rest[at + 1..];
            }
        }
        out.push(rest[3..].to_string());
        out
    }

    #[test]
    fn stack_question_labels_a_true_support_relation() {
        let annotation = flat(&["red bowl", "green bowl", "blue bowl", "white bowl"], FinishState::Image2);
        for seed in 0..30 {
            let mut rng = StdRng::seed_from_u64(seed);
            let items = questions(SceneCategory::StackUnstackBowls, &annotation, &mut rng);
            let item = &items[0];
            assert_eq!(item.images, vec!["stack_unstack_bowls/s_start.jpg", "stack_unstack_bowls/s_end.jpg"]);

            let opts = options(item);
            assert_eq!(opts.len(), 4);
            let correct = &opts[letter_index(&item.label).unwrap()];
            let supported = [("red bowl", "green bowl"), ("green bowl", "blue bowl"), ("blue bowl", "white bowl")]
                .iter()
                .any(|(top, bottom)| {
                    correct.contains(top) && correct.contains(bottom)
                });
            assert!(supported, "{correct}");
        }
    }

    #[test]
    fn no_question_without_finish_state() {
        let annotation = flat(&["a", "b", "c"], FinishState::None);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(questions(SceneCategory::StackUnstackBowls, &annotation, &mut rng).is_empty());
    }

    #[test]
    fn duplicated_names_never_anchor() {
        // Only support pair is between two indistinguishable bowls.
        let annotation = flat(&["red bowl", "red bowl"], FinishState::Image1);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(questions(SceneCategory::StackUnstackBowls, &annotation, &mut rng).is_empty());
    }

    #[test]
    fn layered_support_pairs_come_from_below_edges() {
        let structure = CompletedStructure::Layered(vec![
            LayerRecord { object: "a".into(), layer: 1, above: vec!["b".into()], below: vec![] },
            LayerRecord { object: "b".into(), layer: 2, above: vec![], below: vec!["a".into(), "ghost".into()] },
        ]);
        let (_, pairs) = support_pairs(&structure);
        assert_eq!(pairs, vec![("b".to_string(), "a".to_string())]);
    }

    #[test]
    fn board_move_finds_the_added_disc() {
        let earlier = DiscBoard { red: vec![Cell::new(1, 1)], yellow: vec![] };
        let later = DiscBoard { red: vec![Cell::new(1, 1), Cell::new(2, 3)], yellow: vec![] };

        for seed in 0..10 {
            let mut rng = StdRng::seed_from_u64(seed);
            let (distractors, correct) = board_move(&earlier, &later, &mut rng).unwrap();
            assert_eq!(correct, "Place a red disc in row 2, column 3.");
            assert_eq!(distractors.len(), 3);
            assert!(!distractors.contains(&correct));
        }
    }

    #[test]
    fn board_move_offers_the_correct_cell_in_the_other_colour() {
        let earlier = DiscBoard { red: vec![Cell::new(1, 1)], yellow: vec![] };
        let later = DiscBoard { red: vec![Cell::new(1, 1), Cell::new(2, 3)], yellow: vec![] };
        let flipped = "Place a yellow disc in row 2, column 3.".to_string();

        let offered = (0..200).any(|seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let (distractors, _) = board_move(&earlier, &later, &mut rng).unwrap();
            distractors.contains(&flipped)
        });
        assert!(offered);
    }

    #[test]
    fn board_move_never_offers_another_added_disc() {
        let earlier = DiscBoard { red: vec![Cell::new(1, 1)], yellow: vec![] };
        let later = DiscBoard {
            red: vec![Cell::new(1, 1), Cell::new(1, 2)],
            yellow: vec![Cell::new(2, 1)],
        };
        let moves = [
            "Place a red disc in row 1, column 2.".to_string(),
            "Place a yellow disc in row 2, column 1.".to_string(),
        ];
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let (distractors, correct) = board_move(&earlier, &later, &mut rng).unwrap();
            assert!(moves.contains(&correct));
            assert!(moves.iter().all(|m| !distractors.contains(m)));
        }
    }

    #[test]
    fn board_question_uses_frames_of_the_transition() {
        let annotation = SceneAnnotation::new(
            "play_reset_connect_four/g.jpg",
            AnnotationFields {
                disc_positions_image1: Some(DiscBoard { red: vec![Cell::new(1, 1)], yellow: vec![] }),
                disc_positions_image3: Some(DiscBoard {
                    red: vec![Cell::new(1, 1), Cell::new(2, 3)],
                    yellow: vec![],
                }),
                ..Default::default()
            },
        );
        let mut rng = StdRng::seed_from_u64(5);
        let items = questions(SceneCategory::PlayResetConnectFour, &annotation, &mut rng);
        assert_eq!(
            items[0].images,
            vec!["play_reset_connect_four/g_start.jpg", "play_reset_connect_four/g_end.jpg"]
        );
        assert!(items[0].question.contains("(Row 1 is the bottom row"));
    }
}
