//! Artifact cache tests against a temporary directory

use chrono::{DateTime, Duration, Utc};
use lotline_backend::services::artifact_cache::{ArtifactCache, LOT_LABELS, LOT_QC_REPORT};
use lotline_backend::AppResult;
use std::sync::atomic::{AtomicUsize, Ordering};

fn token() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-02-19T08:30:00.123456Z")
        .unwrap()
        .with_timezone(&Utc)
}

#[tokio::test]
async fn test_get_after_put_returns_same_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path());

    assert!(cache.get(LOT_LABELS, "1", token()).await.unwrap().is_none());
    let path = cache.put(LOT_LABELS, "1", token(), b"%PDF-1.3 a").await.unwrap();
    assert!(path.starts_with(dir.path()));
    assert_eq!(
        cache.get(LOT_LABELS, "1", token()).await.unwrap().as_deref(),
        Some(&b"%PDF-1.3 a"[..])
    );
}

#[tokio::test]
async fn test_new_token_misses() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path());
    cache.put(LOT_LABELS, "1", token(), b"old").await.unwrap();

    let newer = token() + Duration::microseconds(1);
    assert!(cache.get(LOT_LABELS, "1", newer).await.unwrap().is_none());
}

#[tokio::test]
async fn test_put_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path());
    let first = cache.put(LOT_LABELS, "1", token(), b"same").await.unwrap();
    let second = cache.put(LOT_LABELS, "1", token(), b"same").await.unwrap();

    assert_eq!(first, second);
    let files = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(files, 1, "no temp files are left behind");
}

#[tokio::test]
async fn test_invalidate_sweeps_every_token_of_the_entity_only() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path());
    let older = token() - Duration::hours(1);

    cache.put(LOT_LABELS, "1", older, b"a").await.unwrap();
    cache.put(LOT_LABELS, "1", token(), b"b").await.unwrap();
    cache.put(LOT_LABELS, "12", token(), b"c").await.unwrap();
    cache.put(LOT_QC_REPORT, "1", token(), b"d").await.unwrap();

    assert_eq!(cache.invalidate(LOT_LABELS, "1").await.unwrap(), 2);
    assert!(cache.get(LOT_LABELS, "1", older).await.unwrap().is_none());
    assert!(cache.get(LOT_LABELS, "1", token()).await.unwrap().is_none());
    assert!(cache.get(LOT_LABELS, "12", token()).await.unwrap().is_some());
    assert!(cache.get(LOT_QC_REPORT, "1", token()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_invalidate_without_cache_dir() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path().join("missing"));
    assert_eq!(cache.invalidate(LOT_LABELS, "1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_get_or_render_renders_once_per_token() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path());
    let counter = AtomicUsize::new(0);
    let renders = &counter;
    let render = move || async move {
        renders.fetch_add(1, Ordering::SeqCst);
        AppResult::Ok(b"rendered".to_vec())
    };

    let first = cache.get_or_render(LOT_LABELS, "3", token(), render).await.unwrap();
    let second = cache.get_or_render(LOT_LABELS, "3", token(), render).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(renders.load(Ordering::SeqCst), 1);

    let newer = token() + Duration::seconds(1);
    cache.get_or_render(LOT_LABELS, "3", newer, render).await.unwrap();
    assert_eq!(renders.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_long_entity_ids_are_hashed() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path());
    let long_id = "lot/".repeat(40);

    let path = cache.put(LOT_LABELS, &long_id, token(), b"x").await.unwrap();
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.len() < 120);
    assert!(cache.get(LOT_LABELS, &long_id, token()).await.unwrap().is_some());
}
