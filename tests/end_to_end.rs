use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use scene_index::{
    BuildMode, Catalog, Error, Filters, MetadataRecord, Sampling, SidecarCodec, XmpCodec,
};
use tempfile::TempDir;

fn library() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    (dir, root)
}

fn image(root: &Path, name: &str) -> PathBuf {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, b"not really an image").unwrap();
    path
}

fn query(catalog: &Catalog, filters: Filters) -> Vec<PathBuf> {
    catalog
        .query(&filters, Sampling::All, &mut StdRng::seed_from_u64(0))
        .unwrap()
        .into_iter()
        .map(|e| e.path)
        .collect()
}

#[test]
fn three_images_two_sidecars() {
    let (_dir, root) = library();
    let mountain = image(&root, "mountain.jpg");
    let city = image(&root, "city.png");
    let _bare = image(&root, "bare.jpg");

    XmpCodec
        .write(
            &mountain,
            &MetadataRecord::new()
                .with_tags(["peaceful", "mountain"])
                .with_dimensions(3840, 2160)
                .unwrap(),
        )
        .unwrap();
    XmpCodec
        .write(&city, &MetadataRecord::new().with_tags(["urban"]))
        .unwrap();

    let db_dir = tempfile::tempdir().unwrap();
    let mut catalog = Catalog::open(&db_dir.path().join("index.db")).unwrap();

    let report = catalog.build(&root, true, BuildMode::Rebuild).unwrap();
    assert_eq!(report.added, 2);
    assert_eq!(catalog.store().len().unwrap(), 2);

    let peaceful = catalog
        .query(
            &Filters::new().with_tag("peaceful"),
            Sampling::All,
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap();
    assert_eq!(peaceful.len(), 1);
    assert_eq!(peaceful[0].path, mountain);
    assert_eq!(peaceful[0].record.recommended_screen(), Some("4K"));

    let urban = catalog
        .query(
            &Filters::new().with_tag("urban"),
            Sampling::All,
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap();
    assert_eq!(urban.len(), 1);
    assert_eq!(urban[0].path, city);
    assert_eq!(urban[0].record.recommended_screen(), None);

    catalog.close().unwrap();
}

#[test]
fn incremental_build_is_idempotent_and_persistent() {
    let (_dir, root) = library();
    for name in ["a.jpg", "nested/b.jpg", "nested/deeper/c.webp"] {
        let media = image(&root, name);
        XmpCodec
            .write(&media, &MetadataRecord::new().with_tags([name]))
            .unwrap();
    }
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("index.db");

    let mut catalog = Catalog::open(&db_path).unwrap();
    let first = catalog.build(&root, true, BuildMode::Incremental).unwrap();
    assert_eq!(first.added, 3);
    catalog.close().unwrap();

    let mut catalog = Catalog::open(&db_path).unwrap();
    let second = catalog.build(&root, true, BuildMode::Incremental).unwrap();
    assert_eq!((second.added, second.updated, second.removed), (0, 0, 0));
    assert_eq!(second.unchanged, 3);

    let mut record = MetadataRecord::new().with_tags(["a.jpg"]);
    record.mood = Some("Calm".into());
    catalog.put_metadata(&root.join("a.jpg"), &record, true).unwrap();

    let third = catalog.build(&root, true, BuildMode::Incremental).unwrap();
    assert_eq!(third.updated, 1);
    assert_eq!(
        query(&catalog, Filters::new().with_mood("calm")),
        vec![root.join("a.jpg")]
    );
}

#[test]
fn prune_removes_only_deleted_media() {
    let (_dir, root) = library();
    let names = ["1.jpg", "2.jpg", "3.jpg", "4.jpg", "5.jpg"];
    for name in names {
        let media = image(&root, name);
        XmpCodec.write(&media, &MetadataRecord::new()).unwrap();
    }
    let mut catalog = Catalog::open_in_memory().unwrap();
    catalog.build(&root, true, BuildMode::Rebuild).unwrap();

    fs::remove_file(root.join("2.jpg")).unwrap();
    fs::remove_file(root.join("4.jpg")).unwrap();

    let report = catalog.build(&root, true, BuildMode::Prune).unwrap();
    assert_eq!(report.removed, 2);
    assert_eq!(
        query(&catalog, Filters::new()),
        vec![root.join("1.jpg"), root.join("3.jpg"), root.join("5.jpg")]
    );

    let again = catalog.build(&root, true, BuildMode::Prune).unwrap();
    assert_eq!(again.removed, 0);
}

#[test]
fn malformed_sidecar_is_skipped() {
    let (_dir, root) = library();
    let good = image(&root, "good.jpg");
    let bad = image(&root, "bad.jpg");
    XmpCodec
        .write(&good, &MetadataRecord::new().with_tags(["ok"]))
        .unwrap();
    fs::write(XmpCodec.sidecar_path(&bad), b"<x:xmpmeta><rdf:RDF>").unwrap();

    let mut catalog = Catalog::open_in_memory().unwrap();
    let report = catalog.build(&root, true, BuildMode::Incremental).unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(report.skipped_malformed, 1);
    assert_eq!(query(&catalog, Filters::new()), vec![good]);
}

#[test]
fn missing_root_fails_without_touching_index() {
    let (_dir, root) = library();
    let media = image(&root, "a.jpg");
    XmpCodec.write(&media, &MetadataRecord::new()).unwrap();

    let mut catalog = Catalog::open_in_memory().unwrap();
    catalog.build(&root, true, BuildMode::Incremental).unwrap();

    let err = catalog
        .build(&root.join("nope"), true, BuildMode::Rebuild)
        .unwrap_err();
    assert!(matches!(err, Error::RootNotFound(_)));
    assert_eq!(catalog.store().len().unwrap(), 1);
}

#[test]
fn cleanup_removes_orphan_sidecar() {
    let (_dir, root) = library();
    let kept = image(&root, "kept.jpg");
    XmpCodec.write(&kept, &MetadataRecord::new()).unwrap();
    let orphan = XmpCodec
        .write(&root.join("orphan.jpg"), &MetadataRecord::new().with_tags(["gone"]))
        .unwrap();
    assert_eq!(orphan, root.join("orphan.jpg.xmp"));

    let catalog = Catalog::open_in_memory().unwrap();

    let preview = catalog.cleanup(&root, true, true).unwrap();
    assert!(preview.dry_run);
    assert_eq!(preview.deleted, vec![orphan.clone()]);
    assert!(preview.bytes > 0);
    assert!(orphan.exists());

    let report = catalog.cleanup(&root, true, false).unwrap();
    assert_eq!(report.deleted, vec![orphan.clone()]);
    assert!(report.failed.is_empty());
    assert!(!orphan.exists());
    assert!(XmpCodec.sidecar_path(&kept).exists());
}

#[test]
fn stats_reflect_indexed_entries() {
    let (_dir, root) = library();
    for (name, style, w, h) in [
        ("a.jpg", "photograph", 3840, 2160),
        ("b.jpg", "photograph", 1920, 1080),
        ("c.jpg", "painting", 3840, 2160),
    ] {
        let media = image(&root, name);
        let mut record = MetadataRecord::new()
            .with_tags(["nature"])
            .with_dimensions(w, h)
            .unwrap();
        record.style = Some(style.into());
        XmpCodec.write(&media, &record).unwrap();
    }

    let mut catalog = Catalog::open_in_memory().unwrap();
    catalog.build(&root, true, BuildMode::Rebuild).unwrap();

    let stats = catalog.stats().unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.with_description, 0);
    assert_eq!(stats.by_style[0].value, "photograph");
    assert_eq!(stats.by_style[0].count, 2);
    assert_eq!(stats.by_screen[0].value, "4K");
    assert_eq!(stats.by_screen[0].count, 2);
    assert_eq!(stats.top_tags[0].value, "nature");
    assert_eq!(stats.top_tags[0].count, 3);
}

#[test]
fn seeded_sampling_is_reproducible() {
    let (_dir, root) = library();
    for i in 0..10 {
        let media = image(&root, &format!("{:02}.jpg", i));
        XmpCodec
            .write(&media, &MetadataRecord::new().with_tags(["sky"]))
            .unwrap();
    }
    let mut catalog = Catalog::open_in_memory().unwrap();
    catalog.build(&root, true, BuildMode::Rebuild).unwrap();

    let pick = |seed| {
        catalog
            .query(
                &Filters::new().with_tag("sky"),
                Sampling::Random(4),
                &mut StdRng::seed_from_u64(seed),
            )
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect::<Vec<_>>()
    };
    let a = pick(7);
    assert_eq!(a.len(), 4);
    assert_eq!(a, pick(7));

    let single = catalog
        .query(
            &Filters::new().with_tag("nothing"),
            Sampling::Single,
            &mut StdRng::seed_from_u64(7),
        )
        .unwrap();
    assert!(single.is_empty());
}
