use std::collections::HashMap;
use std::path::Path;

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    error::{PromptError, StoreError},
    scene::SceneCategory,
};

const PAIR_INTRO: &str = "You are a multimodal reasoning assistant. I will give you a pair of images (Image 1 and Image 2) showing two moments of a manipulation task.";

const COMPLETION_RULE: &str = "Determine which image shows the completed state: the structure is fully assembled and stable, not an empty setup and not mid-task.";

const RELATIONS: &str = "Describe each relation with exactly one of these camera-view directions (origin at the upper left corner of the image):
left, right, top, bottom, left-top, right-top, left-bottom, right-bottom.
Report (A, relation, B) only when A is the single adjacent object in that direction of B; B is the reference object. Skip ambiguous, distant or overlapping pairs. If a name appears more than once in the object list, report no relation involving it. Precise is better than many.";

const POSITION_RULE: &str = "In the non-completed image report the leftmost object, the rightmost object and the object closest to the camera. Write none when a position is ambiguous.";

const BOWL_NAMES: &str = "light teal bowl, pale sage green bowl, light purple bowl, dark forest green bowl, orange bowl";

const EVALUATION: &str = "I will show you two images:

<image1>: Initial state (scene before the task)
<image2>: Transformed state (final state after task completion)

Your job is to understand the visual transformation between the two images and answer the question.

There are 3 types of questions:
1. Multiple choice: output only the option letter (e.g. A, B, C).
2. Open-ended numeric: output only the number (e.g. 2, 5, 13).
3. Object enumeration: output only a comma-separated list of object names (e.g. red block, green cup). If no object matches, answer none.

Think first, then answer. Enclose the reasoning in <think>...</think> and the final answer in <answer>...</answer>.

{{question}}";

const FILTER_OTHER: &str = "You will see the start and end frames of a tabletop manipulation task. Decide whether every object involved in the task is clearly visible in both frames (not cut off, not hidden by hands, not blurred).
Explain briefly, then finish with:
#Final answer: yes / no";

/// Prompt texts per scene. Stage-two and evaluation prompts are handlebars templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptBook {
    pub annotation: HashMap<SceneCategory, String>,
    pub structure: HashMap<SceneCategory, String>,
    pub filter: HashMap<SceneCategory, String>,
    pub filter_fallback: String,
    pub evaluation: String,
}

/// Partial prompt book read from YAML; present entries replace the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PromptOverrides {
    annotation: HashMap<SceneCategory, String>,
    structure: HashMap<SceneCategory, String>,
    filter: HashMap<SceneCategory, String>,
    filter_fallback: Option<String>,
    evaluation: Option<String>,
}

impl Default for PromptBook {
    fn default() -> Self {
        let annotation = SceneCategory::all()
            .iter()
            .filter_map(|&scene| default_annotation_prompt(scene).map(|p| (scene, p)))
            .collect();
        let structure = SceneCategory::all()
            .iter()
            .filter_map(|&scene| default_structure_prompt(scene).map(|p| (scene, p.to_string())))
            .collect();
        let filter = SceneCategory::all()
            .iter()
            .filter_map(|&scene| default_filter_prompt(scene).map(|p| (scene, p)))
            .collect();

        Self {
            annotation,
            structure,
            filter,
            filter_fallback: FILTER_OTHER.to_string(),
            evaluation: EVALUATION.to_string(),
        }
    }
}

impl PromptBook {
    /// Defaults with any entries from the YAML file layered on top.
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self, PromptError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        let overrides: PromptOverrides =
            serde_yaml::from_str(&raw).map_err(|source| StoreError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;

        let mut book = Self::default();
        book.annotation.extend(overrides.annotation);
        book.structure.extend(overrides.structure);
        book.filter.extend(overrides.filter);
        if let Some(fallback) = overrides.filter_fallback {
            book.filter_fallback = fallback;
        }
        if let Some(evaluation) = overrides.evaluation {
            book.evaluation = evaluation;
        }
        Ok(book)
    }

    pub fn annotation_prompt(&self, scene: SceneCategory) -> Result<&str, PromptError> {
        self.annotation
            .get(&scene)
            .map(String::as_str)
            .ok_or_else(|| PromptError::MissingPrompt(scene.to_string()))
    }

    /// Stage-two prompt with the first-stage object list substituted.
    pub fn structure_prompt(&self, scene: SceneCategory, object_list: &[String]) -> Result<String, PromptError> {
        let template = self
            .structure
            .get(&scene)
            .ok_or_else(|| PromptError::MissingPrompt(format!("{scene} (structure)")))?;
        render(template, &json!({ "object_list": format!("[{}]", object_list.join(", ")) }))
    }

    pub fn evaluation_prompt(&self, question: &str) -> Result<String, PromptError> {
        render(&self.evaluation, &json!({ "question": question }))
    }

    pub fn filter_prompt(&self, scene: SceneCategory) -> &str {
        self.filter
            .get(&scene)
            .map(String::as_str)
            .unwrap_or(&self.filter_fallback)
    }
}

fn render(template: &str, data: &serde_json::Value) -> Result<String, PromptError> {
    let mut hb = Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);
    Ok(hb.render_template(template, data)?)
}

fn default_annotation_prompt(scene: SceneCategory) -> Option<String> {
    use SceneCategory::*;

    let prompt = match scene {
        StackUnstackBowls => format!(
            "{PAIR_INTRO}\n\n1. {COMPLETION_RULE}\n2. Is the task on a dark blue bed or a dark green bed?\n3. In the non-completed image list every bowl using only these names: {BOWL_NAMES}.\n4. {POSITION_RULE}\n5. Build a scene graph of the non-completed image.\n{RELATIONS}\n\nOutput format:\n# Completed image: Image 1 / Image 2\n# Surface type: dark blue bed / dark green bed\n# Object list: [object_1, object_2, ...]\n# Position: right:object_1/none, left:object_2/none, closest:object_3/none\n# Scene graph: (object_1, spatial_relation, object_2),..."
        ),
        StackUnstackPlates => format!(
            "{PAIR_INTRO}\n\n1. {COMPLETION_RULE}\n2. Is there a brown pillow in the scene?\n3. In the non-completed image list every plate using only: blue plate, green plate, red plate, yellow plate.\n4. {POSITION_RULE}\n5. Build a scene graph of the non-completed image.\n{RELATIONS}\n\nOutput format:\n# Completed image: Image 1 / Image 2\n# Surface type: has brown pillow / no brown pillow\n# Object list: [object_1, object_2, ...]\n# Position: right:object_1/none, left:object_2/none, closest:object_3/none\n# Scene graph: (object_1, spatial_relation, object_2),..."
        ),
        AssembleDisassembleLegos => format!(
            "{PAIR_INTRO}\n\n1. {COMPLETION_RULE}\n2. Is the task on a dark blue bed or a dark green bed?\n3. In the non-completed image list every block as \"<color> block\", repeating duplicates.\n4. In the non-completed image report the leftmost and rightmost objects, or none.\n5. Build a scene graph of the non-completed image.\n{RELATIONS}\n\nOutput format:\n# Completed image: Image 1 / Image 2\n# Surface type: dark blue bed / dark green bed\n# Object list: [object_1, object_2, ...]\n# Position: right:object_1/none, left:object_2/none\n# Scene graph: (object_1, spatial_relation, object_2),..."
        ),
        BuildUnstackLego | AssembleDisassembleSoftLegos => format!(
            "{PAIR_INTRO}\n\n1. {COMPLETION_RULE}\n2. In the non-completed image list every block as \"<color> block\", repeating duplicates.\n3. In the non-completed image report the leftmost and rightmost objects, or none.\n4. Build a scene graph of the non-completed image.\n{RELATIONS}\n5. Describe the completed structure block by block: its layer (1 touches the surface), the blocks directly on top of it and the blocks directly under it, none when empty.\n\nOutput format:\n# Completed image: Image 1 / Image 2\n# Object list: [object_1, object_2, ...]\n# Position: right:object_1/none, left:object_2/none\n# Scene graph: (object_1, spatial_relation, object_2),...\n# Completed lego structure:\n- Object: object_name\n  Layer: N\n  Above: object_name, ... or none\n  Below: object_name, ... or none"
        ),
        InsertRemoveCupsFromRack => format!(
            "{PAIR_INTRO}\n\n1. Is there a brown pillow in the scene?\n2. List every cup in the non-completed image using: blue cup, green cup, pink cup, yellow cup.\n3. For each image, either list the stacked cups from top to bottom or, when nothing is stacked, build a scene graph.\n{RELATIONS}\n\nOutput format:\n# Surface type: has brown pillow / no brown pillow\n# Object list: [object_1, object_2, ...]\nFor each image X:\n# Completed structure (Image X): [top_object, ..., bottom_object]\nor\n# Scene graph (Image X): (object_1, spatial_relation, object_2), ..."
        ),
        MakeSandwich => format!(
            "{PAIR_INTRO}\n\n1. Determine which image shows the completed sandwich.\n2. Is the task on a blue bed or a beige bed?\n3. List every food component of the non-completed image in lowercase color-and-type phrases.\n4. Build a scene graph of the non-completed image.\n{RELATIONS}\n5. From the completed image list the ingredients from top to bottom, keeping only items whose vertical order is certain.\n\nOutput format:\n# Completed image: Image 1 / Image 2\n# Surface type: blue bed / beige bed\n# Object list: [object_1, object_2, ...]\n# Scene graph: (object_1, spatial_relation, object_2),...\n# Completed structure: [top_object, ..., bottom_object]"
        ),
        SetupCleanupTable => format!(
            "{PAIR_INTRO}\n\n1. Determine which image shows the completed table setup: tablecloth unfolded and every object neatly placed on it.\n2. List the manipulated objects with short descriptors (e.g. red tablecloth).\n\nOutput format:\n# Completed image: Image 1 / Image 2\n# Object list: [object_1, object_2, ...]"
        ),
        InsertRemoveBookshelf => format!(
            "{PAIR_INTRO}\n\n1. Determine which image shows every book upright inside the bookend.\n2. Is the task on a dark blue bed or a yellow table?\n3. In the non-completed image report the leftmost book, the rightmost book and the book closest to the camera (red book, green book, blue book), or none.\n4. In the completed image list the books inside the bookend from left to right.\n\nOutput format:\n# Completed image: Image 1 / Image 2\n# Surface type: dark blue bed / yellow table\n# Position: right:book_1/none, left:book_2/none, closest:book_3/none\n# Completed structure: [book_1, book_2, ...]"
        ),
        PickPlaceFood => format!(
            "{PAIR_INTRO}\n\nFor each image independently, list the food items resting on the right-side plate. Ignore items outside the plate.\n\nOutput format:\n# Plate contents (Image 1): [item_1, item_2, ...]\n# Plate contents (Image 2): [item_1, item_2, ...]"
        ),
        SortBeads => format!(
            "{PAIR_INTRO}\n\n1. Determine which image shows the finished grouping: beads separated into distinct, intentional groups.\n2. Is the task on a red bed or a yellow table?\n3. In the completed image count the groups of same-colored beads. Ignore scattered single beads.\n\nOutput format:\n# Completed image: Image 1 / Image 2\n# Surface type: red bed / yellow table\n# Number of groups: integer"
        ),
        PlayResetConnectFour => "You are given 3 images of a Connect Four board on a table.
1. Is the task on a yellow table or a green table?
2. For each image list the discs fully inside the blue grid. Rows are numbered 1 (bottom) to 6 (top), columns 1 (left) to 7 (right). Assign columns by dividing the grid width into 7 equal slices.

Output format:
# Surface type: yellow table / green table
# Disc positions(Image 1): \"red\": [{\"row\": <number>, \"col\": <number>},...],\"yellow\": [{\"row\": <number>, \"col\": <number>},...]
# Disc positions(Image 2):
# Disc positions(Image 3):"
            .to_string(),
        ScrewUnscrewFingersFixture | AddRemoveLid => return None,
    };
    Some(prompt)
}

fn default_structure_prompt(scene: SceneCategory) -> Option<&'static str> {
    match scene {
        SceneCategory::StackUnstackBowls => Some(
            "Identify the stacked bowls in the image. For each bowl in {{object_list}}, list the bowls from top to bottom by physical stacking order. Use the given names unchanged.

Output format:
# Completed structure: [top_object, ..., bottom_object]",
        ),
        SceneCategory::StackUnstackPlates => Some(
            "Identify the stacked plates in the image. For each plate in {{object_list}}, list the plates from top to bottom by physical stacking order. Use the given names unchanged.

Output format:
# Completed structure: [top_object, ..., bottom_object]",
        ),
        SceneCategory::AssembleDisassembleLegos => Some(
            "Describe every block of the assembled structure. For each object in {{object_list}} give its layer (1 touches the surface), the blocks resting directly on it (Above) and the blocks directly supporting it (Below). Describe duplicates separately, skip blocks not in the structure, write none when a list is empty, and only report contacts that are clearly visible.

Output format:
# Completed lego structure:
- Object: object_name
  Layer: N
  Above: object_name, object_name, ... or none
  Below: object_name, object_name, ... or none",
        ),
        _ => None,
    }
}

fn default_filter_prompt(scene: SceneCategory) -> Option<String> {
    use SceneCategory::*;

    let subject = match scene {
        PickPlaceFood => "every food item and both plates",
        InsertRemoveBookshelf => "every book and the bookend",
        AssembleDisassembleLegos | BuildUnstackLego | AssembleDisassembleSoftLegos => "every block",
        StackUnstackBowls => "every bowl",
        MakeSandwich => "every sandwich ingredient",
        _ => return None,
    };
    Some(format!(
        "You will see the start and end frames of a tabletop manipulation task. Decide whether {subject} is clearly visible in both frames (not cut off, not hidden by hands, not blurred).\nExplain briefly, then finish with:\n#Final answer: yes / no"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn every_oracle_scene_has_a_prompt() {
        let book = PromptBook::default();
        for scene in SceneCategory::all() {
            assert_eq!(book.annotation_prompt(*scene).is_ok(), scene.needs_oracle(), "{scene}");
        }
        for scene in SceneCategory::all().iter().filter(|s| s.is_two_stage()) {
            assert!(book.structure.contains_key(scene));
        }
    }

    #[test]
    fn structure_prompt_inlines_object_list_unescaped() {
        let book = PromptBook::default();
        let prompt = book
            .structure_prompt(
                SceneCategory::StackUnstackBowls,
                &["orange bowl".to_string(), "light purple bowl".to_string()],
            )
            .unwrap();
        assert!(prompt.contains("[orange bowl, light purple bowl]"));
        assert!(!prompt.contains("{{"));
    }

    #[test]
    fn evaluation_prompt_ends_with_question() {
        let prompt = PromptBook::default()
            .evaluation_prompt("Which <image3> is \"right\"?")
            .unwrap();
        assert!(prompt.ends_with("Which <image3> is \"right\"?"));
    }

    #[test]
    fn yaml_overrides_replace_single_entries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "annotation:\n  sort_beads: count the beads\nevaluation: \"Q: {{{{question}}}}\"").unwrap();

        let book = PromptBook::load_yaml(file.path()).unwrap();
        assert_eq!(book.annotation_prompt(SceneCategory::SortBeads).unwrap(), "count the beads");
        assert!(book.annotation_prompt(SceneCategory::MakeSandwich).is_ok());
        assert_eq!(book.evaluation_prompt("why?").unwrap(), "Q: why?");
    }

    #[test]
    fn unlisted_scenes_use_fallback_filter_prompt() {
        let book = PromptBook::default();
        assert_eq!(book.filter_prompt(SceneCategory::SortBeads), FILTER_OTHER);
        assert!(book.filter_prompt(SceneCategory::MakeSandwich).contains("sandwich"));
    }
}
