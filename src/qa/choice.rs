//! Lettered option sets.

use std::collections::HashSet;

use rand::{seq::SliceRandom, Rng};

const LETTERS: [&str; 6] = ["A", "B", "C", "D", "E", "F"];

pub fn letter(index: usize) -> Option<&'static str> {
    LETTERS.get(index).copied()
}

/// Position a label letter refers to; `"b"` and `"B"` both give 1.
pub fn letter_index(label: &str) -> Option<usize> {
    let label = label.trim().to_uppercase();
    LETTERS.iter().position(|l| *l == label)
}

/// Options with exactly one correct entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub options: Vec<String>,
    pub answer: usize,
}

impl Choice {
    /// Correct option and distractors in random order. `None` when any two
    /// options render the same or there are more options than letters.
    pub fn shuffled<R: Rng + ?Sized>(
        correct: String,
        distractors: Vec<String>,
        rng: &mut R,
    ) -> Option<Self> {
        let mut options = Vec::with_capacity(distractors.len() + 1);
        options.push(correct.clone());
        options.extend(distractors);
        if !all_distinct(&options) || options.len() > LETTERS.len() {
            return None;
        }

        options.shuffle(rng);
        let answer = options.iter().position(|o| *o == correct)?;
        Some(Self { options, answer })
    }

    /// Options in a fixed presentation order.
    pub fn ordered(options: Vec<String>, answer: usize) -> Option<Self> {
        if answer >= options.len() || !all_distinct(&options) || options.len() > LETTERS.len() {
            return None;
        }
        Some(Self { options, answer })
    }

    pub fn correct(&self) -> &str {
        &self.options[self.answer]
    }

    pub fn label(&self) -> String {
        LETTERS[self.answer].to_string()
    }

    /// `A. first B. second`
    pub fn inline(&self) -> String {
        self.rendered().collect::<Vec<_>>().join(" ")
    }

    /// One option per line.
    pub fn lines(&self) -> String {
        self.rendered().collect::<Vec<_>>().join("\n")
    }

    fn rendered(&self) -> impl Iterator<Item = String> + '_ {
        self.options
            .iter()
            .zip(LETTERS)
            .map(|(option, letter)| format!("{letter}. {option}"))
    }
}

fn all_distinct(options: &[String]) -> bool {
    let mut seen = HashSet::new();
    options.iter().all(|o| seen.insert(o.as_str()))
}

/// Samples `needed` distractors from `candidates` after dropping repeats and
/// anything equal to `correct`. `None` when too few remain.
pub fn pick_distractors<R: Rng + ?Sized>(
    correct: &str,
    candidates: impl IntoIterator<Item = String>,
    needed: usize,
    rng: &mut R,
) -> Option<Vec<String>> {
    let mut seen = HashSet::new();
    let pool: Vec<String> = candidates
        .into_iter()
        .filter(|c| c != correct && seen.insert(c.clone()))
        .collect();
    if pool.len() < needed {
        return None;
    }
    Some(pool.choose_multiple(rng, needed).cloned().collect())
}
