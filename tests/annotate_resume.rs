use std::path::Path;
use std::sync::Arc;

use manipqa::{
    providers::scripted::{ScriptedProvider, ScriptedReply},
    store, Annotator, AnnotatorOptions, FinishState, RetryPolicy, SceneAnnotation, SceneCategory,
};

const BEADS_REPLY: &str = "# Completed image: Image 2\n# Number of groups: 3";

fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"jpg").unwrap();
}

fn annotator(provider: ScriptedProvider, root: &Path) -> Annotator {
    let mut options = AnnotatorOptions::new(root.join("img"), root.join("crop"), root.join("meta"));
    options.model = "test-model".into();
    options.workers_per_scene = 1;
    Annotator::new(Arc::new(provider), options).with_retry(RetryPolicy::immediate(1))
}

#[tokio::test]
async fn failed_samples_are_logged_and_picked_up_on_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let scene_dir = dir.path().join("img").join("sort_beads").join("day1");
    for name in ["a", "b"] {
        touch(&scene_dir.join(format!("{name}_start.jpg")));
        touch(&scene_dir.join(format!("{name}_end.jpg")));
    }
    std::fs::create_dir_all(dir.path().join("meta")).unwrap();

    let first = annotator(
        ScriptedProvider::from_replies(vec![
            ScriptedReply::Text(BEADS_REPLY.into()),
            ScriptedReply::Fail("rate limited".into()),
        ]),
        dir.path(),
    );
    let report = first.annotate_scene(SceneCategory::SortBeads).await.unwrap();
    assert_eq!(report.discovered, 2);
    assert_eq!(report.annotated, 1);
    assert_eq!(report.failed, 1);

    let meta_path = store::meta_path(&dir.path().join("meta"), SceneCategory::SortBeads);
    let saved: Vec<SceneAnnotation> = store::read_jsonl(&meta_path).unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].image, "sort_beads/day1/a.jpg");
    assert_eq!(saved[0].finish_state(), FinishState::Image2);
    assert_eq!(saved[0].fields.number_of_groups, Some(3));

    let failed: Vec<serde_json::Value> =
        store::read_jsonl(&store::failed_path(&dir.path().join("meta"), SceneCategory::SortBeads)).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["image_path"], "sort_beads/day1/b.jpg");
    assert_eq!(failed[0]["scene_type"], "sort_beads");

    let second = annotator(ScriptedProvider::from_texts([BEADS_REPLY]), dir.path());
    let report = second.annotate_scene(SceneCategory::SortBeads).await.unwrap();
    assert_eq!(report.existing, 1);
    assert_eq!(report.pending, 1);
    assert_eq!(report.annotated, 1);

    let saved: Vec<SceneAnnotation> = store::read_jsonl(&meta_path).unwrap();
    assert_eq!(saved.len(), 2);
}

#[tokio::test]
async fn scenes_without_oracle_record_only_the_identifier() {
    let dir = tempfile::tempdir().unwrap();
    let scene_dir = dir.path().join("img").join("add_remove_lid");
    touch(&scene_dir.join("x_start.jpg"));
    touch(&scene_dir.join("x_end.jpg"));
    std::fs::create_dir_all(dir.path().join("meta")).unwrap();

    let lid = annotator(ScriptedProvider::new(), dir.path());
    let report = lid.annotate_scene(SceneCategory::AddRemoveLid).await.unwrap();
    assert_eq!(report.annotated, 1);

    let saved: Vec<serde_json::Value> =
        store::read_jsonl(&store::meta_path(&dir.path().join("meta"), SceneCategory::AddRemoveLid)).unwrap();
    assert_eq!(saved[0], serde_json::json!({ "image": "add_remove_lid/x.jpg" }));
}
