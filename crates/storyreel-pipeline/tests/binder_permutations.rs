//! Binding results do not depend on arrival order.

use std::collections::BTreeSet;
use std::path::PathBuf;

use tokio::sync::mpsc;

use storyreel_models::{
    AudioWithImageBackground, BackgroundImage, Segment, SegmentId, SegmentWithMediaFile, StoryId,
};
use storyreel_pipeline::{CancelToken, MediaBinder, PipelineError, TaskDispatcher, UnmatchedPolicy};

const DEFAULT_BACKGROUND: &str = "default.jpg";

fn image(id: &str, ordinal: u32) -> SegmentWithMediaFile {
    SegmentWithMediaFile {
        segment: Segment::image(SegmentId::from(id), StoryId::from("s"), id, ordinal),
        file_name: PathBuf::from(format!("{}.png", id)),
    }
}

fn audio(id: &str, ordinal: u32, background: BackgroundImage) -> SegmentWithMediaFile {
    SegmentWithMediaFile {
        segment: Segment::audio(SegmentId::from(id), StoryId::from("s"), id, ordinal, background),
        file_name: PathBuf::from(format!("{}.mp3", id)),
    }
}

fn on(id: &str) -> BackgroundImage {
    BackgroundImage::Segment(SegmentId::from(id))
}

fn inputs() -> Vec<SegmentWithMediaFile> {
    vec![
        image("forest", 0),
        image("river", 1),
        audio("a0", 0, BackgroundImage::Default),
        audio("a1", 1, on("forest")),
        audio("a2", 2, on("forest")),
        audio("a3", 3, on("river")),
    ]
}

/// Every ordering of `items` (Heap's algorithm).
fn permutations<T: Clone>(items: Vec<T>) -> Vec<Vec<T>> {
    fn heap<T: Clone>(k: usize, items: &mut [T], out: &mut Vec<Vec<T>>) {
        if k <= 1 {
            out.push(items.to_vec());
            return;
        }
        for i in 0..k - 1 {
            heap(k - 1, items, out);
            if k % 2 == 0 {
                items.swap(i, k - 1);
            } else {
                items.swap(0, k - 1);
            }
        }
        heap(k - 1, items, out);
    }

    let mut items = items;
    let mut out = Vec::new();
    let k = items.len();
    heap(k, &mut items, &mut out);
    out
}

fn queue(items: Vec<SegmentWithMediaFile>) -> mpsc::Receiver<SegmentWithMediaFile> {
    let (tx, rx) = mpsc::channel(items.len().max(1));
    for item in items {
        tx.try_send(item).unwrap();
    }
    rx
}

fn summary(pairs: &[AudioWithImageBackground]) -> BTreeSet<(String, PathBuf)> {
    pairs
        .iter()
        .map(|p| (p.audio.segment.id.to_string(), p.background_image_file_name.clone()))
        .collect()
}

fn expected() -> BTreeSet<(String, PathBuf)> {
    [
        ("a0", DEFAULT_BACKGROUND),
        ("a1", "forest.png"),
        ("a2", "forest.png"),
        ("a3", "river.png"),
    ]
    .into_iter()
    .map(|(a, f)| (a.to_string(), PathBuf::from(f)))
    .collect()
}

#[tokio::test]
async fn test_every_arrival_order_binds_identically() {
    let binder = MediaBinder::new(PathBuf::from(DEFAULT_BACKGROUND));
    let orders = permutations(inputs());
    assert_eq!(orders.len(), 720);

    for order in orders {
        let pairs = binder
            .bind_all(&StoryId::from("s"), queue(order), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(pairs.len(), 4);
        assert_eq!(summary(&pairs), expected());
        let ordinals: Vec<u32> = pairs.iter().map(|p| p.ordinal()).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3]);
    }
}

#[tokio::test]
async fn test_streaming_form_matches_collecting_form() {
    let dispatcher = TaskDispatcher::new(8, 32);
    let binder = MediaBinder::new(PathBuf::from(DEFAULT_BACKGROUND));

    for order in permutations(inputs()).into_iter().step_by(37) {
        let mut output = binder.bind_stream(&dispatcher, &StoryId::from("s"), queue(order), CancelToken::new());
        let mut pairs = Vec::new();
        while let Some(pair) = output.values.recv().await {
            pairs.push(pair);
        }
        assert!(output.errors.recv().await.is_none());
        assert_eq!(summary(&pairs), expected());
    }
}

#[tokio::test]
async fn test_default_background_coupled_once() {
    let binder = MediaBinder::new(PathBuf::from(DEFAULT_BACKGROUND));
    let items = vec![
        audio("a0", 0, BackgroundImage::Default),
        image("forest", 0),
        image("river", 1),
    ];

    let pairs = binder
        .bind_all(&StoryId::from("s"), queue(items), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].background_image_file_name, PathBuf::from(DEFAULT_BACKGROUND));
}

#[tokio::test]
async fn test_unmatched_audio_uses_default_background() {
    let dispatcher = TaskDispatcher::new(8, 32);
    let binder = MediaBinder::new(PathBuf::from(DEFAULT_BACKGROUND));
    let items = vec![audio("a0", 0, on("never")), image("forest", 0)];

    let mut output = binder.bind_stream(&dispatcher, &StoryId::from("s"), queue(items), CancelToken::new());
    let pair = output.values.recv().await.unwrap();
    assert_eq!(pair.background_image_file_name, PathBuf::from(DEFAULT_BACKGROUND));
    assert!(output.values.recv().await.is_none());
    assert!(output.errors.recv().await.is_none());
}

#[tokio::test]
async fn test_strict_streaming_reports_unmatched_audio() {
    let dispatcher = TaskDispatcher::new(8, 32);
    let cancel = CancelToken::new();
    let binder = MediaBinder::new(PathBuf::from(DEFAULT_BACKGROUND)).with_policy(UnmatchedPolicy::Fail);
    let items = vec![audio("a0", 0, on("never"))];

    let mut output = binder.bind_stream(&dispatcher, &StoryId::from("s"), queue(items), cancel.clone());
    assert!(output.values.recv().await.is_none());

    let err = output.errors.recv().await.unwrap();
    assert!(matches!(err, PipelineError::Unmatched { .. }));
    assert_eq!(err.kind(), storyreel_pipeline::ErrorKind::Association);
    assert!(cancel.is_cancelled());
}
