use super::*;

fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("datadash-select-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn sample_folder(parent: &Path) -> PathBuf {
    let root = parent.join("trip");
    fs::create_dir_all(root.join("sub")).expect("create sub");
    fs::create_dir_all(root.join("sub2")).expect("create sub2");
    fs::write(root.join("a.txt"), [1u8; 10]).expect("write a");
    fs::write(root.join("sub").join("b.txt"), [2u8; 20]).expect("write b");
    root
}

#[test]
fn folder_plan_should_list_files_directories_and_sentinel_name() {
    let dir = temp_dir();
    let root = sample_folder(&dir);

    let plan = plan_selection(std::slice::from_ref(&root)).expect("plan folder");

    assert!(plan.is_folder());
    assert_eq!(plan.metadata.base_folder_name.as_deref(), Some("trip"));
    assert_eq!(plan.total_bytes, 30);
    assert_eq!(plan.files_total(), 2);
    assert_eq!(
        plan.metadata.entries,
        vec![
            TransferEntry::file("a.txt", 10),
            TransferEntry::directory("sub"),
            TransferEntry::file("sub/b.txt", 20),
            TransferEntry::directory("sub2"),
        ]
    );
    assert_eq!(plan.files[1].wire_path, "sub/b.txt");
    assert_eq!(plan.files[1].source, root.join("sub").join("b.txt"));
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn empty_folder_plan_should_only_carry_the_folder_name() {
    let dir = temp_dir();
    let root = dir.join("empty");
    fs::create_dir_all(&root).expect("create empty");

    let plan = plan_selection(&[root]).expect("plan");
    assert!(plan.metadata.entries.is_empty());
    assert!(plan.metadata.is_folder_transfer());
    assert_eq!(plan.files_total(), 0);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn loose_files_should_travel_under_their_basenames() {
    let dir = temp_dir();
    let first = dir.join("one.bin");
    let second = dir.join("two.bin");
    fs::write(&first, [0u8; 4]).expect("write one");
    fs::write(&second, b"").expect("write two");

    let plan = plan_selection(&[first, second]).expect("plan files");

    assert!(!plan.is_folder());
    assert_eq!(plan.total_bytes, 4);
    assert_eq!(
        plan.metadata.entries,
        vec![TransferEntry::file("one.bin", 4), TransferEntry::file("two.bin", 0)]
    );
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn mixed_or_empty_selection_should_be_rejected() {
    let dir = temp_dir();
    let root = sample_folder(&dir);
    let file = dir.join("loose.txt");
    fs::write(&file, b"x").expect("write loose");

    let mixed = plan_selection(&[root, file]).expect_err("mixed");
    assert_eq!(mixed.code, "filesystem_selection_invalid");

    let empty = plan_selection(&[]).expect_err("empty");
    assert_eq!(empty.code, "filesystem_selection_invalid");

    let missing = plan_selection(&[dir.join("ghost.txt")]).expect_err("missing");
    assert_eq!(missing.code, "filesystem_selection_invalid");
    let _ = fs::remove_dir_all(dir);
}
