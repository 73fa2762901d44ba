//! Answer extraction from free-form model output.
//!
//! Extractors run in priority order and the first match wins. Each one is a
//! plain function so it can be tested on its own.

use once_cell::sync::Lazy;
use regex::Regex;

static ANSWER_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<answer>\s*(.*?)\s*</answer>").unwrap());
static BOX_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<\|begin_of_box\|>\s*(.*?)\s*<\|end_of_box\|>").unwrap());
static FINAL_ANSWER_BOX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\*\*Final answer\*\*:\s*<\|begin_of_box\|>\s*(.*?)\s*<\|end_of_box\|>").unwrap()
});
static FINAL_ANSWER_BOLD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\*\*Final answer\*\*:\s*(.*)").unwrap());
static FINAL_ANSWER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)Final Answer:\s*(.*)").unwrap());
static FINAL_ANSER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)Final Anser:\s*(.*)").unwrap());
static BBOX_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<start bbox>\s*(.*?)\s*</start bbox>").unwrap());
static FINAL_ANSWER_BBOX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\*\*Final answer\*\*:\s*<start bbox>\s*(.*?)\s*</start bbox>").unwrap()
});

type Extractor = fn(&str) -> Option<String>;

const EXTRACTORS: [Extractor; 9] = [
    answer_tag,
    box_tag,
    final_answer_box,
    final_answer_bold,
    final_answer_line,
    final_anser_line,
    bbox_tag,
    final_answer_bbox,
    short_last_line,
];

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

pub fn answer_tag(text: &str) -> Option<String> {
    capture(&ANSWER_TAG, text)
}

pub fn box_tag(text: &str) -> Option<String> {
    capture(&BOX_TAG, text)
}

pub fn final_answer_box(text: &str) -> Option<String> {
    capture(&FINAL_ANSWER_BOX, text)
}

pub fn final_answer_bold(text: &str) -> Option<String> {
    capture(&FINAL_ANSWER_BOLD, text)
}

pub fn final_answer_line(text: &str) -> Option<String> {
    capture(&FINAL_ANSWER_LINE, text)
}

/// Common misspelling seen in some model outputs.
pub fn final_anser_line(text: &str) -> Option<String> {
    capture(&FINAL_ANSER_LINE, text)
}

pub fn bbox_tag(text: &str) -> Option<String> {
    capture(&BBOX_TAG, text)
}

pub fn final_answer_bbox(text: &str) -> Option<String> {
    capture(&FINAL_ANSWER_BBOX, text)
}

/// Last line of the output when it is short and looks like a number, a
/// letter A-D or a comma list.
pub fn short_last_line(text: &str) -> Option<String> {
    let last = text.trim().lines().last()?.trim();
    if last.chars().count() > 10 {
        return None;
    }
    let numeric = !last.is_empty() && last.chars().all(|c| c.is_ascii_digit());
    let letter = matches!(last.to_uppercase().as_str(), "A" | "B" | "C" | "D");
    (numeric || letter || last.contains(',')).then(|| last.to_string())
}

/// Extracted answer, or an empty string when nothing matches.
pub fn extract_answer(text: &str) -> String {
    EXTRACTORS
        .iter()
        .find_map(|extract| extract(text))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_tag_wins_over_later_patterns() {
        let text = "<think>Final Answer: C</think>\n<answer> B </answer>";
        assert_eq!(extract_answer(text), "B");
    }

    #[test]
    fn box_delimiters_are_recognised() {
        assert_eq!(extract_answer("**Final answer**: <|begin_of_box|>4<|end_of_box|>"), "4");
        assert_eq!(extract_answer("so <start bbox> red cup </start bbox>"), "red cup");
    }

    #[test]
    fn final_answer_line_takes_the_rest() {
        assert_eq!(extract_answer("reasoning...\nFinal answer: A"), "A");
        assert_eq!(extract_answer("Final Anser: 12"), "12");
    }

    #[test]
    fn fallback_reads_short_last_line_only() {
        assert_eq!(extract_answer("I think it is\nc"), "c");
        assert_eq!(extract_answer("counting\n13"), "13");
        assert_eq!(extract_answer("objects\ncup, bowl"), "cup, bowl");
        assert_eq!(extract_answer("probably the red block"), "");
        assert_eq!(extract_answer(""), "");
    }
}
