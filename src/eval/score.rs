//! Answer normalisation and correctness per task type.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::extract::extract_answer;
use crate::qa::TaskType;

static BRACKETS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\[\](){}]").unwrap());

const CHOICE_LETTERS: [&str; 4] = ["A", "B", "C", "D"];

/// Leading option letter (`"b. the middle"` -> `"B"`), otherwise the whole
/// trimmed answer uppercased.
pub fn normalize_answer(answer: &str) -> String {
    let answer = answer.trim();
    if let Some(first) = answer.chars().next() {
        let upper = first.to_ascii_uppercase();
        if ('A'..='D').contains(&upper) {
            return upper.to_string();
        }
    }
    answer.to_uppercase()
}

/// Comma-separated names with bracket characters removed.
pub fn extract_objects_from_text(text: &str) -> Vec<String> {
    BRACKETS
        .replace_all(text, "")
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Deduplicated and sorted.
pub fn normalize_objects<S: AsRef<str>>(objects: &[S]) -> Vec<String> {
    objects
        .iter()
        .map(|o| o.as_ref().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Same names regardless of order or repetition.
pub fn compare_objects<A: AsRef<str>, B: AsRef<str>>(predicted: &[A], label: &[B]) -> bool {
    normalize_objects(predicted) == normalize_objects(label)
}

fn is_choice_label(label: &str) -> bool {
    let upper = label.to_uppercase();
    CHOICE_LETTERS.contains(&upper.as_str())
}

/// Extracted prediction and whether it matches `label`.
pub fn score(output: &str, label: &str, task_type: TaskType) -> (String, bool) {
    let extracted = extract_answer(output);

    if task_type == TaskType::Count {
        let correct = extracted == label;
        return (extracted, correct);
    }

    if is_choice_label(label) {
        let predicted = normalize_answer(&extracted);
        let correct = predicted == label.to_uppercase();
        return (predicted, correct);
    }

    let predicted = extract_objects_from_text(&extracted);
    let correct = compare_objects(&predicted, &extract_objects_from_text(label));
    (predicted.join(", "), correct)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_letter_is_the_answer() {
        assert_eq!(normalize_answer(" b. the middle of the bookend"), "B");
        assert_eq!(normalize_answer("none"), "NONE");
        assert_eq!(normalize_answer(""), "");
    }

    #[test]
    fn object_lists_ignore_order_and_repeats() {
        assert!(compare_objects(&["b", "a", "a"], &["a", "b"]));
        let once = normalize_objects(&["c", "a", "c"]);
        assert_eq!(normalize_objects(&once), once);
        assert_eq!(extract_objects_from_text("[red cup, (blue cup), ]"), vec!["red cup", "blue cup"]);
    }

    #[test]
    fn scoring_branches_by_task() {
        assert_eq!(score("<answer>B</answer>", "B", TaskType::ProceduralCausal), ("B".into(), true));
        assert_eq!(score("<answer>3</answer>", "3", TaskType::Count), ("3".into(), true));
        assert_eq!(score("<answer>03</answer>", "3", TaskType::Count).1, false);

        let label = "blue cup, red cup";
        assert!(score("<answer>red cup, blue cup</answer>", label, TaskType::SpatialFineGrained).1);
        assert!(!score("<answer>red cup</answer>", label, TaskType::SpatialFineGrained).1);
    }

    #[test]
    fn lowercase_choice_label_still_matches() {
        assert!(score("Final answer: c", "c", TaskType::SpatialGlobal).1);
    }
}
