use super::*;
use std::collections::HashSet;
use std::fs;

fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("datadash-paths-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

#[test]
fn conflict_path_should_insert_counter_before_extension() {
    let dir = temp_dir();
    let target = dir.join("photo.jpg");
    assert_eq!(resolve_conflict_path(&target), target);

    fs::write(&target, b"1").expect("write first");
    assert_eq!(resolve_conflict_path(&target), dir.join("photo (1).jpg"));

    fs::write(dir.join("photo (1).jpg"), b"2").expect("write second");
    assert_eq!(resolve_conflict_path(&target), dir.join("photo (2).jpg"));
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn writing_same_name_repeatedly_should_never_overwrite() {
    let dir = temp_dir();
    let target = dir.join("notes.txt");
    let mut written = HashSet::new();
    for round in 0..5u8 {
        let path = resolve_conflict_path(&target);
        fs::write(&path, [round]).expect("write round");
        assert!(written.insert(path));
    }

    assert_eq!(written.len(), 5);
    for (round, path) in [
        "notes.txt",
        "notes (1).txt",
        "notes (2).txt",
        "notes (3).txt",
        "notes (4).txt",
    ]
    .iter()
    .enumerate()
    {
        assert_eq!(fs::read(dir.join(path)).expect("read"), vec![round as u8]);
    }
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn conflict_dir_should_append_counter_after_name() {
    let dir = temp_dir();
    let target = dir.join("album.v2");
    fs::create_dir_all(&target).expect("create existing");

    assert_eq!(resolve_conflict_dir(&target), dir.join("album.v2 (1)"));
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn wire_components_should_normalize_separators() {
    assert_eq!(
        wire_components("sub\\deep/./b.txt").expect("valid"),
        vec!["sub".to_string(), "deep".to_string(), "b.txt".to_string()]
    );
}

#[test]
fn wire_components_should_reject_escaping_names() {
    for name in ["../etc/passwd", "a/../../b", "C:/windows", "", "/"] {
        let error = wire_components(name).expect_err("must reject");
        assert_eq!(error.code, "protocol_path_invalid", "name {name:?}");
    }
}

#[test]
fn relative_wire_path_should_use_forward_slashes() {
    let root = Path::new("/data/photos");
    let nested = root.join("2024").join("a.jpg");
    assert_eq!(
        relative_wire_path(root, &nested).as_deref(),
        Some("2024/a.jpg")
    );
    assert_eq!(relative_wire_path(root, root), None);
}
