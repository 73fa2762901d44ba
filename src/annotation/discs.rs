//! Connect-four disc positions: `"red": [{"row": 1, "col": 2}, ...], "yellow": [...]`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const ROWS: u8 = 6;
pub const COLS: u8 = 7;

/// Grid cell; row 1 is the bottom row, column 1 the leftmost column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub row: u8,
    pub col: u8,
}

impl Cell {
    pub fn new(row: u8, col: u8) -> Self {
        Self { row, col }
    }

    pub fn is_on_board(self) -> bool {
        (1..=ROWS).contains(&self.row) && (1..=COLS).contains(&self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiscColor {
    Red,
    Yellow,
}

impl DiscColor {
    pub const BOTH: [DiscColor; 2] = [DiscColor::Red, DiscColor::Yellow];

    pub fn as_str(self) -> &'static str {
        match self {
            DiscColor::Red => "red",
            DiscColor::Yellow => "yellow",
        }
    }

    pub fn other(self) -> DiscColor {
        match self {
            DiscColor::Red => DiscColor::Yellow,
            DiscColor::Yellow => DiscColor::Red,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscBoard {
    #[serde(default)]
    pub red: Vec<Cell>,
    #[serde(default)]
    pub yellow: Vec<Cell>,
}

impl DiscBoard {
    pub fn cells(&self, color: DiscColor) -> &[Cell] {
        match color {
            DiscColor::Red => &self.red,
            DiscColor::Yellow => &self.yellow,
        }
    }

    pub fn total(&self) -> usize {
        self.red.len() + self.yellow.len()
    }

    pub fn contains(&self, color: DiscColor, cell: Cell) -> bool {
        self.cells(color).contains(&cell)
    }

    pub fn occupied(&self, cell: Cell) -> bool {
        self.red.contains(&cell) || self.yellow.contains(&cell)
    }

    /// Colored cells present here but not in `earlier`.
    pub fn added_since(&self, earlier: &DiscBoard) -> Vec<(DiscColor, Cell)> {
        DiscColor::BOTH
            .iter()
            .flat_map(|&color| {
                self.cells(color)
                    .iter()
                    .filter(move |&&cell| !earlier.contains(color, cell))
                    .map(move |&cell| (color, cell))
            })
            .collect()
    }
}

/// What to do with a disc record that neither decoder accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscPolicy {
    /// Drop the record, keep the rest of the board, log a warning.
    #[default]
    DropInvalid,
    /// Treat the whole per-image board as absent.
    RejectField,
}

static SECTION_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)#\s*Disc positions\s*\(\s*Image\s*(\d)\s*\)\s*:").unwrap());
static RED_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']red["']\s*:\s*\[(.*?)\]"#).unwrap());
static YELLOW_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']yellow["']\s*:\s*\[(.*?)\]"#).unwrap());
static RECORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{.*?\}").unwrap());
static BARE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:").unwrap());
static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*\}").unwrap());

/// Splits a response into its per-image disc sections, indexed by image number 1..=3.
pub fn parse_sections(text: &str, policy: DiscPolicy) -> [Option<DiscBoard>; 3] {
    let headers: Vec<(usize, usize, usize)> = SECTION_HEADER
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let image: usize = caps.get(1)?.as_str().parse().ok()?;
            Some((image, whole.start(), whole.end()))
        })
        .collect();

    let mut boards: [Option<DiscBoard>; 3] = [None, None, None];
    for (i, &(image, _, body_start)) in headers.iter().enumerate() {
        if !(1..=3).contains(&image) || boards[image - 1].is_some() {
            continue;
        }
        let body_end = headers.get(i + 1).map_or(text.len(), |next| next.1);
        boards[image - 1] = parse_board(&text[body_start..body_end], policy);
    }
    boards
}

/// Parses one dict-like literal. A color with no list is an empty set.
pub fn parse_board(text: &str, policy: DiscPolicy) -> Option<DiscBoard> {
    let flattened = text.replace(['\n', '\r', '\t'], " ");
    let red = parse_color(&RED_LIST, &flattened, policy)?;
    let yellow = parse_color(&YELLOW_LIST, &flattened, policy)?;
    Some(DiscBoard { red, yellow })
}

fn parse_color(list: &Regex, text: &str, policy: DiscPolicy) -> Option<Vec<Cell>> {
    let Some(items) = list.captures(text).and_then(|caps| caps.get(1)) else {
        return Some(Vec::new());
    };

    let mut cells = Vec::new();
    for record in RECORD.find_iter(items.as_str()) {
        match decode_record(record.as_str()) {
            Some(cell) => {
                if !cells.contains(&cell) {
                    cells.push(cell);
                }
            }
            None => match policy {
                DiscPolicy::DropInvalid => {
                    warn!("dropping undecodable disc record `{}`", record.as_str());
                }
                DiscPolicy::RejectField => {
                    warn!("rejecting disc field over record `{}`", record.as_str());
                    return None;
                }
            },
        }
    }
    Some(cells)
}

#[derive(Deserialize)]
struct RawCell {
    row: serde_json::Value,
    col: serde_json::Value,
}

fn decode_record(raw: &str) -> Option<Cell> {
    let parsed = serde_json::from_str::<RawCell>(raw)
        .ok()
        .or_else(|| serde_json::from_str::<RawCell>(&relax_literal(raw)).ok())?;

    let cell = Cell::new(coordinate(&parsed.row)?, coordinate(&parsed.col)?);
    cell.is_on_board().then_some(cell)
}

/// Rewrites a Python-style literal (`{'row': 1, col: 2,}`) into JSON.
fn relax_literal(raw: &str) -> String {
    let quoted = raw.replace('\'', "\"");
    let keyed = BARE_KEY.replace_all(&quoted, "$1\"$2\":");
    TRAILING_COMMA.replace_all(&keyed, "}").into_owned()
}

fn coordinate(value: &serde_json::Value) -> Option<u8> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|v| u8::try_from(v).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_split_by_image_header() {
        let text = r#"# Surface type: yellow table
# Disc positions(Image 1): "red": [{"row": 1, "col": 1}],"yellow": []
# Disc positions(Image 2): "red": [{"row": 1, "col": 1}, {"row": 2, "col": 3}],
"yellow": [{"row": 1, "col": 4}]
# Disc positions(Image 3): "red": [], "yellow": []"#;

        let [one, two, three] = parse_sections(text, DiscPolicy::DropInvalid);
        assert_eq!(one.unwrap().red, vec![Cell::new(1, 1)]);
        let two = two.unwrap();
        assert_eq!(two.red, vec![Cell::new(1, 1), Cell::new(2, 3)]);
        assert_eq!(two.yellow, vec![Cell::new(1, 4)]);
        assert_eq!(three.unwrap().total(), 0);
    }

    #[test]
    fn permissive_decoder_accepts_python_literals() {
        let board = parse_board("'red': [{'row': 2, 'col': 5}, {row: 3, col: 5,}], 'yellow': []", DiscPolicy::DropInvalid)
            .unwrap();
        assert_eq!(board.red, vec![Cell::new(2, 5), Cell::new(3, 5)]);
    }

    #[test]
    fn invalid_records_follow_policy() {
        let text = r#""red": [{"row": 1, "col": 1}, {"row": 9, "col": 1}, {"row": one}], "yellow": []"#;

        let dropped = parse_board(text, DiscPolicy::DropInvalid).unwrap();
        assert_eq!(dropped.red, vec![Cell::new(1, 1)]);

        assert!(parse_board(text, DiscPolicy::RejectField).is_none());
    }

    #[test]
    fn duplicate_cells_collapse() {
        let board = parse_board(
            r#""red": [{"row": 1, "col": 2}, {"row": 1, "col": 2}]"#,
            DiscPolicy::DropInvalid,
        )
        .unwrap();
        assert_eq!(board.red.len(), 1);
        assert!(board.yellow.is_empty());
    }

    #[test]
    fn added_since_lists_new_colored_cells() {
        let before = DiscBoard {
            red: vec![Cell::new(1, 1)],
            yellow: vec![],
        };
        let after = DiscBoard {
            red: vec![Cell::new(1, 1), Cell::new(2, 3)],
            yellow: vec![],
        };
        assert_eq!(after.added_since(&before), vec![(DiscColor::Red, Cell::new(2, 3))]);
    }
}
