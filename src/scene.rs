use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Recorded manipulation scenes. The wire form is the snake_case directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneCategory {
    StackUnstackBowls,
    StackUnstackPlates,
    SetupCleanupTable,
    InsertRemoveBookshelf,
    PickPlaceFood,
    SortBeads,
    InsertRemoveCupsFromRack,
    AssembleDisassembleLegos,
    AssembleDisassembleSoftLegos,
    MakeSandwich,
    BuildUnstackLego,
    PlayResetConnectFour,
    ScrewUnscrewFingersFixture,
    AddRemoveLid,
}

/// How `completed_structure` is written for a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureGrammar {
    /// Bracketed top-to-bottom name list.
    Flat,
    /// `- Object:` / `Layer:` / `Above:` / `Below:` blocks.
    Layered,
}

/// Frame suffixes of one sample, in capture order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Start,
    Medium,
    End,
}

impl Frame {
    pub fn suffix(self) -> &'static str {
        match self {
            Frame::Start => "_start",
            Frame::Medium => "_medium",
            Frame::End => "_end",
        }
    }
}

impl SceneCategory {
    pub const ALL: [SceneCategory; 14] = [
        SceneCategory::StackUnstackBowls,
        SceneCategory::StackUnstackPlates,
        SceneCategory::SetupCleanupTable,
        SceneCategory::InsertRemoveBookshelf,
        SceneCategory::PickPlaceFood,
        SceneCategory::SortBeads,
        SceneCategory::InsertRemoveCupsFromRack,
        SceneCategory::AssembleDisassembleLegos,
        SceneCategory::AssembleDisassembleSoftLegos,
        SceneCategory::MakeSandwich,
        SceneCategory::BuildUnstackLego,
        SceneCategory::PlayResetConnectFour,
        SceneCategory::ScrewUnscrewFingersFixture,
        SceneCategory::AddRemoveLid,
    ];

    pub fn all() -> &'static [SceneCategory] {
        &Self::ALL
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SceneCategory::StackUnstackBowls => "stack_unstack_bowls",
            SceneCategory::StackUnstackPlates => "stack_unstack_plates",
            SceneCategory::SetupCleanupTable => "setup_cleanup_table",
            SceneCategory::InsertRemoveBookshelf => "insert_remove_bookshelf",
            SceneCategory::PickPlaceFood => "pick_place_food",
            SceneCategory::SortBeads => "sort_beads",
            SceneCategory::InsertRemoveCupsFromRack => "insert_remove_cups_from_rack",
            SceneCategory::AssembleDisassembleLegos => "assemble_disassemble_legos",
            SceneCategory::AssembleDisassembleSoftLegos => "assemble_disassemble_soft_legos",
            SceneCategory::MakeSandwich => "make_sandwich",
            SceneCategory::BuildUnstackLego => "build_unstack_lego",
            SceneCategory::PlayResetConnectFour => "play_reset_connect_four",
            SceneCategory::ScrewUnscrewFingersFixture => "screw_unscrew_fingers_fixture",
            SceneCategory::AddRemoveLid => "add_remove_lid",
        }
    }

    /// Scenes annotated with a second, structure-only call on the cropped final frame.
    pub fn is_two_stage(self) -> bool {
        matches!(
            self,
            SceneCategory::AssembleDisassembleLegos
                | SceneCategory::StackUnstackBowls
                | SceneCategory::StackUnstackPlates
        )
    }

    /// Scenes whose annotation is just the sample identifier.
    pub fn needs_oracle(self) -> bool {
        !matches!(
            self,
            SceneCategory::ScrewUnscrewFingersFixture | SceneCategory::AddRemoveLid
        )
    }

    pub fn structure_grammar(self) -> StructureGrammar {
        match self {
            SceneCategory::AssembleDisassembleLegos
            | SceneCategory::BuildUnstackLego
            | SceneCategory::AssembleDisassembleSoftLegos => StructureGrammar::Layered,
            _ => StructureGrammar::Flat,
        }
    }

    pub fn frames(self) -> &'static [Frame] {
        match self {
            SceneCategory::PlayResetConnectFour => &[Frame::Start, Frame::Medium, Frame::End],
            _ => &[Frame::Start, Frame::End],
        }
    }

    /// Connect-four samples live under the crop directory rather than the raw image root.
    pub fn reads_from_crops(self) -> bool {
        self == SceneCategory::PlayResetConnectFour
    }
}

impl fmt::Display for SceneCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownScene(pub String);

impl fmt::Display for UnknownScene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown scene category `{}`", self.0)
    }
}

impl std::error::Error for UnknownScene {}

impl FromStr for SceneCategory {
    type Err = UnknownScene;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|scene| scene.as_str() == needle)
            .ok_or_else(|| UnknownScene(needle.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for scene in SceneCategory::all() {
            let json = serde_json::to_string(scene).expect("serialize");
            assert_eq!(json, format!("\"{}\"", scene.as_str()));
            assert_eq!(scene.as_str().parse::<SceneCategory>().expect("parse"), *scene);
        }
    }

    #[test]
    fn lego_scenes_use_layered_grammar() {
        assert_eq!(
            SceneCategory::BuildUnstackLego.structure_grammar(),
            StructureGrammar::Layered
        );
        assert_eq!(
            SceneCategory::MakeSandwich.structure_grammar(),
            StructureGrammar::Flat
        );
        assert!(SceneCategory::StackUnstackPlates.is_two_stage());
        assert!(!SceneCategory::AddRemoveLid.needs_oracle());
        assert_eq!(SceneCategory::PlayResetConnectFour.frames().len(), 3);
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert!("juggle_balls".parse::<SceneCategory>().is_err());
    }
}
