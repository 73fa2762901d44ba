//! Tolerant extraction of tagged sections from oracle responses.
//!
//! Each field has its own extractor returning `Option`; a missing or malformed
//! section simply leaves the field absent.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    discs::{self, DiscPolicy},
    AnnotationFields, CompletedStructure, FinishState, LayerRecord, ObjectPosition, Relation,
};
use crate::scene::{SceneCategory, StructureGrammar};

/// Which call of a (possibly two-stage) annotation produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Full scene description from the image pair.
    First,
    /// Structure-only description of the cropped completed frame.
    Second,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserOptions {
    #[serde(default)]
    pub disc_policy: DiscPolicy,
}

static FINISH_STATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)#\s*Completed image:\s*Image\s*(\d+)").unwrap());
static HANDS_COVERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)#\s*Hands_covered:\s*(yes|no)\b").unwrap());
static SURFACE_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)#\s*Surface type:[ \t]*([^\n]*)").unwrap());
static OBJECT_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)#\s*Object list:\s*\[(.*?)\]").unwrap());
static POSITION_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)#\s*Position:([^\n]*)").unwrap());
static POSITION_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(right|left|closest)\s*:\s*([^,]*)").unwrap());
static SCENE_GRAPH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)#\s*Scene graph\s*:").unwrap());
static SCENE_GRAPH_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)#\s*Scene graph\s*\(\s*Image\s*([12])\s*\)\s*:").unwrap());
static TRIPLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([^,]+),\s*([^,]+),\s*([^)]+)\)").unwrap());
static NEXT_SECTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*#").unwrap());
static COMPLETED_STRUCTURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)#\s*Completed structure:[ \t]*([^\n]*)").unwrap());
static COMPLETED_STRUCTURE_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)#\s*Completed structure\s*\(\s*Image\s*([12])\s*\)\s*:\s*\[(.*?)\]").unwrap()
});
static LEGO_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)#\s*Completed lego structure:").unwrap());
static OBJECT_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^[ \t]*-\s*Object:").unwrap());
static BLOCK_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(Layer|Above|Below)\s*:(.*)$").unwrap());
static PLATE_CONTENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)#\s*Plate contents\s*\(\s*Image\s*([12])\s*\)\s*:\s*\[(.*?)\]").unwrap()
});
static NUMBER_OF_GROUPS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)#\s*Number of groups:\s*(\d+)").unwrap());

#[derive(Debug, Clone, Default)]
pub struct AnnotationParser {
    options: ParserOptions,
}

impl AnnotationParser {
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> ParserOptions {
        self.options
    }

    /// Extracts every recognisable field. Never fails; unrecognised text yields empty fields.
    pub fn parse(&self, text: &str, scene: SceneCategory, stage: Stage) -> AnnotationFields {
        let mut fields = AnnotationFields::default();

        if stage == Stage::First {
            fields.finish_state = finish_state(text);
            fields.hands_covered = hands_covered(text);
            fields.surface_type = surface_type(text);
            fields.object_list = object_list(text);
            fields.object_position = object_position(text);
            fields.scene_graph = scene_graph(text);
            fields.scene_graph_image1 = scene_graph_for_image(text, 1);
            fields.scene_graph_image2 = scene_graph_for_image(text, 2);
            fields.plate_contents_image1 = plate_contents(text, 1);
            fields.plate_contents_image2 = plate_contents(text, 2);
            fields.number_of_groups = number_of_groups(text);

            let [one, two, three] = discs::parse_sections(text, self.options.disc_policy);
            fields.disc_positions_image1 = one;
            fields.disc_positions_image2 = two;
            fields.disc_positions_image3 = three;
        }

        fields.completed_structure = completed_structure(text, scene.structure_grammar());
        fields.completed_structure_image1 = completed_structure_for_image(text, 1);
        fields.completed_structure_image2 = completed_structure_for_image(text, 2);

        fields
    }
}

/// Comma list with surrounding whitespace and quote characters removed.
pub fn split_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().trim_matches(|c| c == '\'' || c == '"').trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_none_value(value: &str) -> bool {
    let value = value.trim().trim_matches(|c| c == '\'' || c == '"' || c == '`');
    value.is_empty() || value.eq_ignore_ascii_case("none")
}

/// Text following `header` up to the next `#` line.
fn section_after<'t>(text: &'t str, start: usize) -> &'t str {
    let rest = &text[start..];
    match NEXT_SECTION.find(rest) {
        Some(next) => &rest[..next.start()],
        None => rest,
    }
}

pub fn finish_state(text: &str) -> Option<FinishState> {
    let caps = FINISH_STATE.captures(text)?;
    match caps.get(1)?.as_str() {
        "1" => Some(FinishState::Image1),
        "2" => Some(FinishState::Image2),
        _ => None,
    }
}

pub fn hands_covered(text: &str) -> Option<String> {
    let caps = HANDS_COVERED.captures(text)?;
    Some(caps.get(1)?.as_str().to_lowercase())
}

pub fn surface_type(text: &str) -> Option<String> {
    let caps = SURFACE_TYPE.captures(text)?;
    let value = caps.get(1)?.as_str().trim().trim_matches(|c| c == '\'' || c == '"' || c == '`');
    (!value.is_empty()).then(|| value.to_string())
}

pub fn object_list(text: &str) -> Option<Vec<String>> {
    let caps = OBJECT_LIST.captures(text)?;
    let names = split_names(caps.get(1)?.as_str());
    (!names.is_empty()).then_some(names)
}

pub fn object_position(text: &str) -> Option<ObjectPosition> {
    let line = POSITION_LINE.captures(text)?.get(1)?.as_str();
    let mut position = ObjectPosition::default();

    for caps in POSITION_KEY.captures_iter(line) {
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if is_none_value(value.as_str()) {
            continue;
        }
        let value = Some(
            value
                .as_str()
                .trim()
                .trim_matches(|c| c == '\'' || c == '"')
                .to_string(),
        );
        match key.as_str().to_lowercase().as_str() {
            "right" if position.right.is_none() => position.right = value,
            "left" if position.left.is_none() => position.left = value,
            "closest" if position.closest.is_none() => position.closest = value,
            _ => {}
        }
    }

    (!position.is_empty()).then_some(position)
}

/// Positional `(A, relation, B)` triples. Unknown relation words are dropped.
pub fn parse_triples(section: &str) -> Vec<Relation> {
    TRIPLE
        .captures_iter(section)
        .filter_map(|caps| {
            let subject = caps.get(1)?.as_str().trim();
            let relation = caps.get(2)?.as_str();
            let reference = caps.get(3)?.as_str().trim();
            match relation.parse() {
                Ok(relation) => Some(Relation {
                    subject: subject.to_string(),
                    relation,
                    reference: reference.to_string(),
                }),
                Err(unknown) => {
                    debug!("ignoring relation `{unknown}` between {subject} and {reference}");
                    None
                }
            }
        })
        .collect()
}

fn graph_from_section(section: &str) -> Option<Vec<Relation>> {
    if is_none_value(section) {
        return None;
    }
    Some(parse_triples(section))
}

pub fn scene_graph(text: &str) -> Option<Vec<Relation>> {
    let header = SCENE_GRAPH.find(text)?;
    graph_from_section(section_after(text, header.end()))
}

pub fn scene_graph_for_image(text: &str, image: u8) -> Option<Vec<Relation>> {
    let header = SCENE_GRAPH_IMAGE
        .captures_iter(text)
        .find(|caps| caps.get(1).map(|m| m.as_str()) == Some(if image == 1 { "1" } else { "2" }))?;
    let end = header.get(0)?.end();
    graph_from_section(section_after(text, end))
}

/// Reads the structure with the scene's own grammar only. A response written
/// in the other grammar leaves the field absent.
pub fn completed_structure(text: &str, grammar: StructureGrammar) -> Option<CompletedStructure> {
    match grammar {
        StructureGrammar::Layered => layered_structure(text).map(CompletedStructure::Layered),
        StructureGrammar::Flat => flat_structure(text).map(CompletedStructure::Flat),
    }
}

/// `# Completed structure: [top, ..., bottom]`; the brackets are optional.
pub fn flat_structure(text: &str) -> Option<Vec<String>> {
    let line = COMPLETED_STRUCTURE.captures(text)?.get(1)?.as_str().trim();
    let inner = match (line.find('['), line.rfind(']')) {
        (Some(open), Some(close)) if open < close => &line[open + 1..close],
        _ => line,
    };
    if is_none_value(inner) {
        return None;
    }
    let names = split_names(inner);
    (!names.is_empty()).then_some(names)
}

pub fn completed_structure_for_image(text: &str, image: u8) -> Option<Vec<String>> {
    let wanted = if image == 1 { "1" } else { "2" };
    let caps = COMPLETED_STRUCTURE_IMAGE
        .captures_iter(text)
        .find(|caps| caps.get(1).map(|m| m.as_str()) == Some(wanted))?;
    let names = split_names(caps.get(2)?.as_str());
    (!names.is_empty()).then_some(names)
}

/// `- Object:` blocks, after a `# Completed lego structure:` header when one is present.
pub fn layered_structure(text: &str) -> Option<Vec<LayerRecord>> {
    let body = match LEGO_HEADER.find(text) {
        Some(header) => &text[header.end()..],
        None => text,
    };

    let starts: Vec<(usize, usize)> = OBJECT_ENTRY
        .find_iter(body)
        .map(|m| (m.start(), m.end()))
        .collect();
    if starts.is_empty() {
        return None;
    }

    let records: Vec<LayerRecord> = starts
        .iter()
        .enumerate()
        .filter_map(|(i, &(_, name_start))| {
            let block_end = starts.get(i + 1).map_or(body.len(), |next| next.0);
            parse_layer_block(&body[name_start..block_end])
        })
        .collect();

    (!records.is_empty()).then_some(records)
}

fn parse_layer_block(block: &str) -> Option<LayerRecord> {
    let mut lines = block.lines();
    let object = lines.next()?.trim().trim_matches(|c| c == '\'' || c == '"').to_string();
    if object.is_empty() {
        return None;
    }

    let mut layer = None;
    let mut above = Vec::new();
    let mut below = Vec::new();

    for line in lines {
        let Some(caps) = BLOCK_KEY.captures(line) else {
            continue;
        };
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let value = strip_comment(value.as_str());
        match key.as_str().to_lowercase().as_str() {
            "layer" => layer = value.trim().parse::<u32>().ok().filter(|&l| l >= 1),
            "above" => above = contact_list(value),
            "below" => below = contact_list(value),
            _ => {}
        }
    }

    match layer {
        Some(layer) => Some(LayerRecord {
            object,
            layer,
            above,
            below,
        }),
        None => {
            debug!("dropping structure entry `{object}` without a usable layer");
            None
        }
    }
}

fn strip_comment(value: &str) -> &str {
    match value.find('#') {
        Some(idx) => &value[..idx],
        None => value,
    }
}

fn contact_list(value: &str) -> Vec<String> {
    if is_none_value(value) {
        Vec::new()
    } else {
        split_names(value)
    }
}

pub fn plate_contents(text: &str, image: u8) -> Option<Vec<String>> {
    let wanted = if image == 1 { "1" } else { "2" };
    let caps = PLATE_CONTENTS
        .captures_iter(text)
        .find(|caps| caps.get(1).map(|m| m.as_str()) == Some(wanted))?;
    Some(split_names(caps.get(2)?.as_str()))
}

pub fn number_of_groups(text: &str) -> Option<u32> {
    NUMBER_OF_GROUPS.captures(text)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::SpatialRelation;

    fn parse(text: &str, scene: SceneCategory) -> AnnotationFields {
        AnnotationParser::default().parse(text, scene, Stage::First)
    }

    #[test]
    fn scene_graph_triples_are_positional() {
        let fields = parse(
            "# Scene graph: (red block, right, blue block), (yellow block, top, blue block)",
            SceneCategory::BuildUnstackLego,
        );
        let graph = fields.scene_graph.unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph[0].subject, "red block");
        assert_eq!(graph[0].relation, SpatialRelation::Right);
        assert_eq!(graph[0].reference, "blue block");
        assert_eq!(graph[1].subject, "yellow block");
        assert_eq!(graph[1].relation, SpatialRelation::Top);
    }

    #[test]
    fn layered_block_maps_none_to_empty() {
        let records = layered_structure("- Object:lego_a\n  Layer:1\n  Above:lego_b\n  Below:none").unwrap();
        assert_eq!(
            records,
            vec![LayerRecord {
                object: "lego_a".into(),
                layer: 1,
                above: vec!["lego_b".into()],
                below: vec![],
            }]
        );
    }

    #[test]
    fn full_lego_response_parses_every_block() {
        let text = "# Completed lego structure:\n\
- Object: yellow block\n  Layer: 1\n  Above: red block, blue block\n  Below: none\n\
- Object: red block\n  Layer: 2\n  Above: none\n  Below: yellow block\n\
- Object: blue block\n  Layer: two\n  Above: none\n  Below: yellow block\n";
        let fields = AnnotationParser::default().parse(text, SceneCategory::AssembleDisassembleLegos, Stage::Second);
        let Some(CompletedStructure::Layered(records)) = fields.completed_structure else {
            panic!("expected layered structure");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].above, vec!["red block", "blue block"]);
        assert_eq!(records[1].below, vec!["yellow block"]);
        assert!(fields.object_list.is_none());
    }

    #[test]
    fn first_stage_header_fields() {
        let text = "# Completed image: Image 2  \n\
# Surface type: dark blue bed  \n\
# Object list: ['orange bowl', \"light purple bowl\", light teal bowl]  \n\
# Position: right:orange bowl, left:None, closest:light teal bowl  \n\
# Scene graph: (orange bowl, right, light purple bowl)";
        let fields = parse(text, SceneCategory::StackUnstackBowls);
        assert_eq!(fields.finish_state, Some(FinishState::Image2));
        assert_eq!(fields.surface_type.as_deref(), Some("dark blue bed"));
        assert_eq!(
            fields.object_list.unwrap(),
            vec!["orange bowl", "light purple bowl", "light teal bowl"]
        );
        let position = fields.object_position.unwrap();
        assert_eq!(position.right.as_deref(), Some("orange bowl"));
        assert_eq!(position.left, None);
        assert_eq!(position.closest.as_deref(), Some("light teal bowl"));
        assert_eq!(fields.scene_graph.unwrap().len(), 1);
    }

    #[test]
    fn missing_sections_stay_absent() {
        let fields = parse("I cannot see the images clearly.", SceneCategory::MakeSandwich);
        assert!(fields.is_empty());
    }

    #[test]
    fn scene_graph_none_is_absent_and_section_stops_at_next_tag() {
        let text = "# Scene graph: none\n# Completed structure: [bread, cheese, bread]";
        let fields = parse(text, SceneCategory::MakeSandwich);
        assert!(fields.scene_graph.is_none());
        assert_eq!(
            fields.completed_structure,
            Some(CompletedStructure::Flat(vec!["bread".into(), "cheese".into(), "bread".into()]))
        );
    }

    #[test]
    fn per_image_fields_and_counts() {
        let text = "# Surface type: no brown pillow\n\
# Object list: [blue cup, red cup]\n\
# Completed structure (Image 2): [blue cup, red cup]\n\
# Scene graph (Image 1): (blue cup, left-bottom, red cup)\n\
# Plate contents (Image 1): [apple]\n\
# Plate contents (Image 2): [apple, banana, 'corn']\n\
# Number of groups: 4";
        let fields = parse(text, SceneCategory::InsertRemoveCupsFromRack);
        assert_eq!(fields.completed_structure_image2.unwrap(), vec!["blue cup", "red cup"]);
        assert!(fields.completed_structure_image1.is_none());
        assert_eq!(
            fields.scene_graph_image1.unwrap()[0].relation,
            SpatialRelation::LeftBottom
        );
        assert!(fields.completed_structure.is_none());
        assert_eq!(fields.plate_contents_image2.unwrap().len(), 3);
        assert_eq!(fields.number_of_groups, Some(4));
    }

    #[test]
    fn bracketless_flat_structure_from_second_stage() {
        let fields = AnnotationParser::default().parse(
            "# Completed structure: blue plate, green plate, red plate",
            SceneCategory::StackUnstackPlates,
            Stage::Second,
        );
        assert_eq!(
            fields.completed_structure,
            Some(CompletedStructure::Flat(vec![
                "blue plate".into(),
                "green plate".into(),
                "red plate".into()
            ]))
        );
    }

    #[test]
    fn structure_grammar_follows_the_scene() {
        let flat = "# Completed structure: [red block, yellow block]";
        let layered = "- Object: red block\n  Layer: 1\n  Above: none\n  Below: none";

        assert_eq!(completed_structure(flat, StructureGrammar::Layered), None);
        assert_eq!(completed_structure(layered, StructureGrammar::Flat), None);

        let fields = AnnotationParser::default().parse(flat, SceneCategory::BuildUnstackLego, Stage::Second);
        assert!(fields.completed_structure.is_none());
        let fields = AnnotationParser::default().parse(layered, SceneCategory::StackUnstackBowls, Stage::Second);
        assert!(fields.completed_structure.is_none());
        let fields = AnnotationParser::default().parse(layered, SceneCategory::BuildUnstackLego, Stage::Second);
        assert!(matches!(fields.completed_structure, Some(CompletedStructure::Layered(_))));
    }

    #[test]
    fn unknown_relations_are_dropped() {
        let graph = parse_triples("(a, behind, b), (c, left, d)");
        assert_eq!(graph.len(), 1);
        assert_eq!(graph[0].subject, "c");
    }
}
