use manipqa::{
    annotation::Stage, AnnotationParser, CompletedStructure, QuestionFamily, SceneAnnotation,
    SceneCategory, SynthesisConfig,
};
use rand::{rngs::StdRng, SeedableRng};

const FIRST_STAGE: &str = "# Completed image: Image 2\n\
# Object list: [yellow block, red block, blue block]\n\
# Position: right:red block, left:yellow block, closest:none\n\
# Scene graph: (red block, right, yellow block)";

const SECOND_STAGE: &str = "# Completed lego structure:\n\
- Object: yellow block\n  Layer: 1\n  Above: red block, blue block\n  Below: none\n\
- Object: red block\n  Layer: 2\n  Above: none\n  Below: yellow block\n\
- Object: blue block\n  Layer: 2\n  Above: none\n  Below: yellow block\n";

fn annotation() -> SceneAnnotation {
    let scene = SceneCategory::AssembleDisassembleLegos;
    let parser = AnnotationParser::default();
    let mut fields = parser.parse(FIRST_STAGE, scene, Stage::First);
    fields.merge(parser.parse(SECOND_STAGE, scene, Stage::Second));
    SceneAnnotation::new("assemble_disassemble_legos/l.jpg", fields)
}

#[test]
fn two_stage_responses_merge_into_a_consistent_structure() {
    let annotation = annotation();
    let Some(structure) = annotation.fields.completed_structure.as_ref() else {
        panic!("structure missing");
    };
    assert!(matches!(structure, CompletedStructure::Layered(records) if records.len() == 3));
    assert_eq!(structure.max_layer(), 2);
    assert!(structure.contact_inconsistencies().is_empty());
    assert_eq!(annotation.object_list().len(), 3);
}

#[test]
fn layer_questions_label_the_anchor_layer() {
    let annotation = annotation();
    let mut rng = StdRng::seed_from_u64(5);
    let items = QuestionFamily::SpatialLayer.synthesize(
        SceneCategory::AssembleDisassembleLegos,
        std::slice::from_ref(&annotation),
        &SynthesisConfig::default(),
        &mut rng,
    );

    // leftmost, rightmost, then the scene-graph relation; closest is not reported
    assert_eq!(items.len(), 3);
    for (item, layer) in items.iter().zip([1, 2, 2]) {
        let expected = format!("{}. Layer {layer} (from the bottom)", item.label);
        assert!(item.question.contains(&expected), "{}", item.question);
        assert_eq!(
            item.images,
            vec![
                "assemble_disassemble_legos/l_start.jpg",
                "assemble_disassemble_legos/l_end.jpg"
            ]
        );
    }
}
