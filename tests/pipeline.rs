use std::path::Path;
use std::sync::Arc;

use manipqa::{
    eval::{report::results_path, ResultRow},
    providers::scripted::ScriptedProvider,
    qa::{letter_index, load_annotations},
    store, synthesize_all, EvalOptions, EvalRunner, QAItem, QuestionFamily, RetryPolicy, SceneCategory,
    SynthesisConfig, TaskGroup, TaskType,
};
use rand::{rngs::StdRng, SeedableRng};

const FOOD_META: &str = r#"{"image":"pick_place_food/p.jpg","plate_contents_image1":["apple"],"plate_contents_image2":["apple","banana","corn","grape"]}"#;
const SANDWICH_META: &str = r#"{"image":"make_sandwich/s.jpg","finish_state":"image2","object_list":["bread","lettuce","cheese","tomato","ham"],"completed_structure":["bread","lettuce","cheese","tomato","ham"],"scene_graph":[{"object1":"lettuce","relation":"top","object2":"cheese"}]}"#;

fn write_meta(dir: &Path, scene: SceneCategory, line: &str) {
    std::fs::write(store::meta_path(dir, scene), format!("{line}\n")).unwrap();
}

fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"jpg").unwrap();
}

fn synthesize(meta_dir: &Path, seed: u64) -> Vec<QAItem> {
    let annotations = load_annotations(meta_dir, SceneCategory::all()).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    synthesize_all(&annotations, &QuestionFamily::ALL, &SynthesisConfig::default(), &mut rng)
}

#[test]
fn synthesis_is_reproducible_and_letter_labels_name_a_rendered_option() {
    let dir = tempfile::tempdir().unwrap();
    write_meta(dir.path(), SceneCategory::PickPlaceFood, FOOD_META);
    write_meta(dir.path(), SceneCategory::MakeSandwich, SANDWICH_META);

    let items = synthesize(dir.path(), 42);
    assert_eq!(items, synthesize(dir.path(), 42));

    let counts: Vec<&QAItem> = items.iter().filter(|i| i.task_type == TaskType::Count).collect();
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].label, "3");

    for item in &items {
        // Intermediate-state options are the images themselves.
        let text_options = item.task_type != TaskType::ProceduralInterm;
        if text_options && item.label.len() == 1 && letter_index(&item.label).is_some() {
            assert!(
                item.question.contains(&format!("{}. ", item.label)),
                "label {} missing from: {}",
                item.label,
                item.question
            );
        }
        assert!(!item.images.is_empty());
    }
}

#[tokio::test]
async fn evaluation_resumes_and_scores_into_results_table() {
    let dir = tempfile::tempdir().unwrap();
    let (meta_dir, image_dir, result_dir) = (
        dir.path().join("meta"),
        dir.path().join("img"),
        dir.path().join("results"),
    );
    std::fs::create_dir_all(&meta_dir).unwrap();
    std::fs::create_dir_all(&result_dir).unwrap();
    write_meta(&meta_dir, SceneCategory::PickPlaceFood, FOOD_META);
    touch(&image_dir.join("pick_place_food/p_start.jpg"));
    touch(&image_dir.join("pick_place_food/p_end.jpg"));

    let questions_file = dir.path().join("questions.json");
    store::write_json_array(&questions_file, &synthesize(&meta_dir, 1)).unwrap();

    let provider = Arc::new(ScriptedProvider::from_texts(["Counting the plate.\n<answer>3</answer>"]));
    let options = EvalOptions::new(&image_dir, &result_dir, "test-model").with_threads(1);
    let runner = EvalRunner::new(provider.clone(), options.clone()).with_retry(RetryPolicy::immediate(1));

    let summary = runner.run(&questions_file).await.unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.answered, 1);
    assert_eq!(summary.failed, 0);

    let request = &provider.requests()[0];
    assert_eq!(request.model, "test-model");

    let rerun = EvalRunner::new(Arc::new(ScriptedProvider::new()), options)
        .with_retry(RetryPolicy::immediate(1))
        .run(&questions_file)
        .await
        .unwrap();
    assert_eq!(rerun.already_tested, 1);
    assert_eq!(rerun.answered, 0);

    let board = manipqa::eval::score_run(&result_dir, "test-model").unwrap();
    assert_eq!(board.overall.correct, 1);
    assert_eq!(board.groups[&TaskGroup::Quantitative].total, 1);

    let rows: Vec<ResultRow> = store::read_json_array(&results_path(&result_dir)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].overall, "100.00%");
}

#[tokio::test]
async fn exhausted_items_go_to_the_failure_log() {
    let dir = tempfile::tempdir().unwrap();
    let result_dir = dir.path().join("results");
    std::fs::create_dir_all(&result_dir).unwrap();

    let item = QAItem::new(
        TaskType::SpatialGlobal,
        SceneCategory::InsertRemoveBookshelf,
        vec!["insert_remove_bookshelf/missing_start.jpg".into()],
        "Which arrangement?",
        "A",
    );
    let questions_file = dir.path().join("questions.json");
    store::write_json_array(&questions_file, &[item]).unwrap();

    let runner = EvalRunner::new(
        Arc::new(ScriptedProvider::new()),
        EvalOptions::new(dir.path().join("img"), &result_dir, "m"),
    )
    .with_retry(RetryPolicy::immediate(2));
    let summary = runner.run(&questions_file).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.answered, 0);

    let failed: Vec<serde_json::Value> =
        store::read_jsonl(&result_dir.join("eval_m_failed.jsonl")).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["scene_type"], "insert_remove_bookshelf");
}
