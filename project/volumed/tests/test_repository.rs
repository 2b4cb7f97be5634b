use std::fs;
use std::sync::Arc;

use tempfile::tempdir;
use tokio::io::AsyncReadExt;

use volumed::error::VolumeError;
use volumed::storage::archive;
use volumed::storage::driver::naive::NaiveDriver;
use volumed::storage::paths::PathManager;
use volumed::volume::repository::Repository;
use volumed::volume::strategy::Strategy;
use volumed::volume::Properties;

mod common;
use common::{create_empty, props, repository};

#[tokio::test]
async fn test_create_then_get_round_trips() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;

    let created = repo
        .create_volume(
            "some-volume",
            Strategy::Empty,
            props(&[("k", "v")]),
            60,
            false,
        )
        .await
        .unwrap();
    assert_eq!(created.handle, "some-volume");
    assert!(created.path.is_dir());

    let fetched = repo.get_volume("some-volume").await.unwrap();
    assert_eq!(fetched.properties, props(&[("k", "v")]));
    assert_eq!(fetched.ttl, 60);
    assert!(!fetched.privileged);
    assert_eq!(fetched.parent_handle, None);

    // sidecar sits next to the payload, not inside it
    assert!(root.path().join("live/some-volume.meta.json").is_file());
    assert!(!root.path().join("live/some-volume/.meta.json").exists());
}

#[tokio::test]
async fn test_duplicate_handle_is_rejected() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;

    create_empty(&repo, "dup", 0).await;
    let err = repo
        .create_volume("dup", Strategy::Empty, Properties::new(), 0, false)
        .await
        .unwrap_err();
    assert!(matches!(err, VolumeError::HandleAlreadyExists(_)));
}

#[tokio::test]
async fn test_empty_property_name_is_rejected() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;

    let err = repo
        .create_volume("vol", Strategy::Empty, props(&[("", "v")]), 0, false)
        .await
        .unwrap_err();
    assert!(matches!(err, VolumeError::BadRequest(_)));

    // a failed creation leaves nothing behind
    assert!(repo.get_volume("vol").await.is_err());
    assert!(!root.path().join("live/vol").exists());
}

#[tokio::test]
async fn test_cow_from_missing_parent_unwinds() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;

    let err = repo
        .create_volume(
            "child",
            Strategy::CowFrom {
                parent_handle: "does-not-exist".into(),
            },
            Properties::new(),
            0,
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, VolumeError::ParentNotFound(_)));
    assert!(!root.path().join("live/child").exists());

    // the handle is free again
    create_empty(&repo, "child", 0).await;
}

#[tokio::test]
async fn test_cow_child_sees_parent_contents() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;

    create_empty(&repo, "parent", 0).await;
    fs::write(root.path().join("live/parent/file"), "hello").unwrap();

    let child = repo
        .create_volume(
            "child",
            Strategy::CowFrom {
                parent_handle: "parent".into(),
            },
            Properties::new(),
            0,
            false,
        )
        .await
        .unwrap();
    assert_eq!(child.parent_handle.as_deref(), Some("parent"));
    assert_eq!(
        fs::read_to_string(root.path().join("live/child/file")).unwrap(),
        "hello"
    );
}

#[tokio::test]
async fn test_import_seeds_volume_from_host_path() {
    let root = tempdir().unwrap();
    let host = tempdir().unwrap();
    fs::write(host.path().join("seed.txt"), "imported").unwrap();

    let repo = repository(root.path()).await;
    repo.create_volume(
        "imported",
        Strategy::Import {
            host_path: host.path().to_path_buf(),
        },
        Properties::new(),
        0,
        false,
    )
    .await
    .unwrap();

    assert_eq!(
        fs::read_to_string(root.path().join("live/imported/seed.txt")).unwrap(),
        "imported"
    );
}

#[tokio::test]
async fn test_destroy_removes_everything() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;

    create_empty(&repo, "vol", 0).await;
    repo.destroy_volume("vol").await.unwrap();

    assert!(matches!(
        repo.get_volume("vol").await.unwrap_err(),
        VolumeError::NotFound(_)
    ));
    assert!(!root.path().join("live/vol").exists());
    assert!(!root.path().join("live/vol.meta.json").exists());

    // destroy is NotFound afterwards, not an internal error
    assert!(matches!(
        repo.destroy_volume("vol").await.unwrap_err(),
        VolumeError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_destroy_with_live_children_fails_on_plain_backend() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;

    create_empty(&repo, "parent", 0).await;
    repo.create_volume(
        "child",
        Strategy::CowFrom {
            parent_handle: "parent".into(),
        },
        Properties::new(),
        0,
        false,
    )
    .await
    .unwrap();

    let err = repo.destroy_volume("parent").await.unwrap_err();
    assert!(matches!(err, VolumeError::HasChildren(_)));
    assert!(repo.get_volume("parent").await.is_ok());

    repo.destroy_volume("child").await.unwrap();
    repo.destroy_volume("parent").await.unwrap();
}

#[tokio::test]
async fn test_list_filters_by_property_superset() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;

    repo.create_volume("a", Strategy::Empty, props(&[("k", "v")]), 0, false)
        .await
        .unwrap();
    repo.create_volume("b", Strategy::Empty, props(&[("k", "w")]), 0, false)
        .await
        .unwrap();
    repo.create_volume("c", Strategy::Empty, props(&[("k", "v"), ("x", "y")]), 0, false)
        .await
        .unwrap();

    let all = repo.list_volumes(&Properties::new()).await;
    let handles: Vec<&str> = all.iter().map(|v| v.handle.as_str()).collect();
    assert_eq!(handles, vec!["a", "b", "c"]);

    let matched = repo.list_volumes(&props(&[("k", "v")])).await;
    let handles: Vec<&str> = matched.iter().map(|v| v.handle.as_str()).collect();
    assert_eq!(handles, vec!["a", "c"]);

    let matched = repo.list_volumes(&props(&[("k", "v"), ("x", "y")])).await;
    let handles: Vec<&str> = matched.iter().map(|v| v.handle.as_str()).collect();
    assert_eq!(handles, vec!["c"]);
}

#[tokio::test]
async fn test_set_property_is_idempotent_and_persisted() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;

    create_empty(&repo, "vol", 0).await;
    repo.set_property("vol", "k", "v").await.unwrap();
    repo.set_property("vol", "k", "v").await.unwrap();

    let volume = repo.get_volume("vol").await.unwrap();
    assert_eq!(volume.properties, props(&[("k", "v")]));

    assert!(matches!(
        repo.set_property("vol", "", "v").await.unwrap_err(),
        VolumeError::BadRequest(_)
    ));
    assert!(matches!(
        repo.set_property("missing", "k", "v").await.unwrap_err(),
        VolumeError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_set_ttl_is_reflected() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;

    create_empty(&repo, "vol", 0).await;
    repo.set_ttl("vol", 120).await.unwrap();
    assert_eq!(repo.get_volume("vol").await.unwrap().ttl, 120);
}

#[tokio::test]
async fn test_stats_reports_payload_size() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;

    create_empty(&repo, "vol", 0).await;
    fs::write(root.path().join("live/vol/data"), vec![0u8; 4096]).unwrap();

    let volume = repo.get_volume_stats("vol").await.unwrap();
    assert_eq!(volume.size_in_bytes, Some(4096));
}

#[tokio::test]
async fn test_stream_round_trip() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;
    create_empty(&repo, "vol", 0).await;

    let staging = tempdir().unwrap();
    fs::write(staging.path().join("file"), "hello").unwrap();
    fs::create_dir(staging.path().join("dir")).unwrap();
    fs::write(staging.path().join("dir/nested"), "world").unwrap();

    let mut payload = Vec::new();
    archive::pack(staging.path(), &mut payload).unwrap();

    repo.stream_in("vol", "", payload.as_slice()).await.unwrap();
    assert_eq!(
        fs::read_to_string(root.path().join("live/vol/file")).unwrap(),
        "hello"
    );

    let mut archive_file = repo.stream_out("vol", "").await.unwrap();
    let mut streamed = Vec::new();
    archive_file.read_to_end(&mut streamed).await.unwrap();

    let unpacked = tempdir().unwrap();
    archive::unpack(streamed.as_slice(), unpacked.path(), false).unwrap();
    assert_eq!(
        fs::read_to_string(unpacked.path().join("file")).unwrap(),
        "hello"
    );
    assert_eq!(
        fs::read_to_string(unpacked.path().join("dir/nested")).unwrap(),
        "world"
    );
}

#[tokio::test]
async fn test_stream_in_into_sub_path_creates_it() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;
    create_empty(&repo, "vol", 0).await;

    let staging = tempdir().unwrap();
    fs::write(staging.path().join("file"), "nested content").unwrap();
    let mut payload = Vec::new();
    archive::pack(staging.path(), &mut payload).unwrap();

    repo.stream_in("vol", "some/depth", payload.as_slice())
        .await
        .unwrap();
    assert_eq!(
        fs::read_to_string(root.path().join("live/vol/some/depth/file")).unwrap(),
        "nested content"
    );
}

#[tokio::test]
async fn test_stream_in_rejects_escaping_sub_path() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;
    create_empty(&repo, "vol", 0).await;

    let err = repo
        .stream_in("vol", "../etc", b"does not matter".as_slice())
        .await
        .unwrap_err();
    assert!(matches!(err, VolumeError::StreamMalformed(_)));

    // nothing was written anywhere
    assert_eq!(fs::read_dir(root.path().join("live/vol")).unwrap().count(), 0);
    assert!(!root.path().join("etc").exists());
}

#[tokio::test]
async fn test_stream_in_rejects_garbage_payload() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;
    create_empty(&repo, "vol", 0).await;

    let err = repo
        .stream_in("vol", "", b"this is not a gzipped tar".as_slice())
        .await
        .unwrap_err();
    assert!(matches!(err, VolumeError::StreamMalformed(_)));
}

#[tokio::test]
async fn test_stream_out_of_missing_sub_path() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;
    create_empty(&repo, "vol", 0).await;

    let err = repo.stream_out("vol", "nope").await.unwrap_err();
    assert!(matches!(err, VolumeError::SubPathNotFound(_)));

    let err = repo.stream_out("missing", "").await.unwrap_err();
    assert!(matches!(err, VolumeError::NotFound(_)));
}

#[tokio::test]
async fn test_stream_out_of_single_file() {
    let root = tempdir().unwrap();
    let repo = repository(root.path()).await;
    create_empty(&repo, "vol", 0).await;
    fs::write(root.path().join("live/vol/file.txt"), "solo").unwrap();

    let mut archive_file = repo.stream_out("vol", "file.txt").await.unwrap();
    let mut streamed = Vec::new();
    archive_file.read_to_end(&mut streamed).await.unwrap();

    let unpacked = tempdir().unwrap();
    archive::unpack(streamed.as_slice(), unpacked.path(), false).unwrap();
    assert_eq!(
        fs::read_to_string(unpacked.path().join("file.txt")).unwrap(),
        "solo"
    );
}

#[tokio::test]
async fn test_recovery_reconciles_disk_state() {
    let root = tempdir().unwrap();
    {
        let repo = repository(root.path()).await;
        repo.create_volume("kept", Strategy::Empty, props(&[("k", "v")]), 300, false)
            .await
            .unwrap();
    }

    // a payload directory without a sidecar, and a sidecar without a payload
    fs::create_dir(root.path().join("live/orphan-dir")).unwrap();
    fs::write(root.path().join("live/orphan-dir/junk"), "junk").unwrap();
    fs::write(root.path().join("live/ghost.meta.json"), "{}").unwrap();

    let repo = Arc::new(
        Repository::recover(Arc::new(NaiveDriver), PathManager::new(root.path()))
            .await
            .unwrap(),
    );

    let kept = repo.get_volume("kept").await.unwrap();
    assert_eq!(kept.properties, props(&[("k", "v")]));
    assert_eq!(kept.ttl, 300);

    assert!(repo.get_volume("orphan-dir").await.is_err());
    assert!(!root.path().join("live/orphan-dir").exists());
    assert!(!root.path().join("live/ghost.meta.json").exists());
}
