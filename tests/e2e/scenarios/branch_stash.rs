use crate::harness::{Assertion, Scenario};
use vex_core::PathStatus;

#[test]
fn test_saveas_keeps_uncommitted_edits() {
    Scenario::new("saveas_keeps_edits")
        .with_include("*.py")
        .write("a.py", b"v1\n")
        .add(&["a.py"])
        .commit("base")
        .write("a.py", b"v2 uncommitted\n")
        .branch_saveas("feature")
        .assert_file("a.py", b"v2 uncommitted\n")
        .assert(Assertion::BranchExists {
            name: "feature".into(),
        })
        .run()
        .unwrap();
}

#[test]
fn test_branch_switch_stash_roundtrip() {
    // Uncommitted work survives switching away and back: stashed on the
    // branch it belongs to, restored from the stash on return.
    Scenario::new("stash_roundtrip")
        .with_include("*.py")
        .write("a.py", b"v1\n")
        .add(&["a.py"])
        .commit("base")
        .write("a.py", b"v2 uncommitted\n")
        .branch_saveas("feature")
        .branch_open("latest")
        .assert_file("a.py", b"v1\n")
        .branch_open("feature")
        .assert_file("a.py", b"v2 uncommitted\n")
        .run()
        .unwrap();
}

#[test]
fn test_branches_have_independent_heads() {
    Scenario::new("independent_heads")
        .with_include("*.py")
        .write("a.py", b"shared\n")
        .add(&["a.py"])
        .commit("base")
        .branch_new("feature")
        .write("f.py", b"feature work\n")
        .add(&["f.py"])
        .commit("feature commit")
        .assert_head_message("feature commit")
        .branch_open("latest")
        .assert_head_message("base")
        .assert_file_absent("f.py")
        .branch_open("feature")
        .assert_head_message("feature commit")
        .assert_file("f.py", b"feature work\n")
        .run()
        .unwrap();
}

#[test]
fn test_branch_open_undo_restores_stashed_work() {
    Scenario::new("open_undo")
        .with_include("*.py")
        .write("a.py", b"v1\n")
        .add(&["a.py"])
        .commit("base")
        .write("a.py", b"working\n")
        .branch_saveas("feature")
        .branch_open("latest")
        .assert_file("a.py", b"v1\n")
        .undo()
        .assert_file("a.py", b"working\n")
        .assert_status("/code/a.py", PathStatus::Modified)
        .run()
        .unwrap();
}
