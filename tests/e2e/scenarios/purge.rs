use crate::harness::{Assertion, Scenario};

#[test]
fn test_purge_drops_path_from_history() {
    Scenario::new("purge_secrets")
        .with_include("*.py")
        .write("keep.py", b"keep\n")
        .write("secrets.txt", b"hunter2\n")
        .add(&["keep.py", "secrets.txt"])
        .commit("everything")
        .write("keep.py", b"keep v2\n")
        .commit("more")
        .purge(&["secrets.txt"])
        .assert(Assertion::TreeLacksPath {
            path: "/code/secrets.txt".into(),
        })
        .assert(Assertion::TreeHasPath {
            path: "/code/keep.py".into(),
        })
        .run()
        .unwrap();
}

#[test]
fn test_purge_undo_restores_old_heads() {
    Scenario::new("purge_undo")
        .with_include("*.py")
        .write("keep.py", b"keep\n")
        .write("secrets.txt", b"hunter2\n")
        .add(&["keep.py", "secrets.txt"])
        .commit("everything")
        .purge(&["secrets.txt"])
        .assert(Assertion::TreeLacksPath {
            path: "/code/secrets.txt".into(),
        })
        .undo()
        .assert(Assertion::TreeHasPath {
            path: "/code/secrets.txt".into(),
        })
        .run()
        .unwrap();
}

#[test]
fn test_purged_file_left_on_disk_untracked() {
    Scenario::new("purge_leaves_disk")
        .with_include("*.py")
        .write("secrets.txt", b"hunter2\n")
        .add(&["secrets.txt"])
        .commit("oops")
        .purge(&["secrets.txt"])
        .assert_file("secrets.txt", b"hunter2\n")
        .run()
        .unwrap();
}
