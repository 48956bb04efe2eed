use crate::harness::{Assertion, Scenario};
use vex_core::PathStatus;

#[test]
fn test_add_undo_redo() {
    Scenario::new("add_undo_redo")
        .with_include("*.py")
        .write("hello.py", b"print('hi')\n")
        .add(&["hello.py"])
        .assert_status("/code/hello.py", PathStatus::Added)
        .undo()
        .assert_status("/code/hello.py", PathStatus::Untracked)
        .redo()
        .assert_status("/code/hello.py", PathStatus::Added)
        .run()
        .unwrap();
}

#[test]
fn test_amend_undo_restores_message() {
    Scenario::new("amend_undo")
        .with_include("*.py")
        .write("a.py", b"a\n")
        .add(&["a.py"])
        .commit("m1")
        .amend("m2")
        .assert_head_message("m2")
        .undo()
        .assert_head_message("m1")
        .run()
        .unwrap();
}

#[test]
fn test_undo_commit_leaves_working_copy_alone() {
    Scenario::new("undo_commit")
        .with_include("*.py")
        .write("a.py", b"contents\n")
        .add(&["a.py"])
        .commit("one")
        .undo()
        // Pointers moved back; the file is untouched and shows as
        // uncommitted again.
        .assert_file("a.py", b"contents\n")
        .assert_status("/code/a.py", PathStatus::Added)
        .run()
        .unwrap();
}

#[test]
fn test_undo_to_empty_then_redo_everything() {
    Scenario::new("full_rewind")
        .with_include("*.py")
        .write("a.py", b"a\n")
        .add(&["a.py"])
        .commit("one")
        .undo() // commit
        .undo() // add
        .assert_status("/code/a.py", PathStatus::Untracked)
        .redo() // add
        .redo() // commit
        .assert_head_message("one")
        .assert_status("/code/a.py", PathStatus::Tracked)
        .run()
        .unwrap();
}

#[test]
fn test_divergent_edit_keeps_redo_alternatives() {
    // add b, undo, add c: the redo stack keeps both lines as siblings,
    // and re-applying the undone add replays it on top of the new state.
    Scenario::new("redo_branching")
        .with_include("*.py")
        .write("a.py", b"a\n")
        .add(&["a.py"])
        .commit("base")
        .write("b.py", b"b\n")
        .add(&["b.py"])
        .undo()
        .assert(Assertion::RedoChoices { len: 1 })
        .write("c.py", b"c\n")
        .add(&["c.py"])
        .assert(Assertion::RedoChoices { len: 2 })
        .redo_choice(1)
        .assert_status("/code/b.py", PathStatus::Added)
        .assert_status("/code/c.py", PathStatus::Added)
        .run()
        .unwrap();
}

#[test]
fn test_remove_undo_rewrites_file() {
    Scenario::new("remove_undo")
        .with_include("*.py")
        .write("doomed.py", b"precious bytes\n")
        .add(&["doomed.py"])
        .remove(&["doomed.py"])
        .assert_file_absent("doomed.py")
        .undo()
        .assert_file("doomed.py", b"precious bytes\n")
        .assert_status("/code/doomed.py", PathStatus::Added)
        .run()
        .unwrap();
}

#[test]
fn test_restore_undo_brings_edits_back() {
    Scenario::new("restore_undo")
        .with_include("*.py")
        .write("work.py", b"committed\n")
        .add(&["work.py"])
        .commit("base")
        .write("work.py", b"half-finished thought\n")
        .restore(&["work.py"])
        .assert_file("work.py", b"committed\n")
        .undo()
        .assert_file("work.py", b"half-finished thought\n")
        .run()
        .unwrap();
}

#[test]
fn test_switch_undo_restores_previous_checkout() {
    Scenario::new("switch_undo")
        .with_include("*.py")
        .write("top.py", b"top\n")
        .write("sub/inner.py", b"inner\n")
        .add(&["top.py", "sub"])
        .commit("layout")
        .switch("/code/sub")
        .assert_file_absent("top.py")
        .undo()
        .assert_file("top.py", b"top\n")
        .assert_file("sub/inner.py", b"inner\n")
        .run()
        .unwrap();
}

#[test]
fn test_undo_depth_matches_history() {
    Scenario::new("undo_depth")
        .with_include("*.py")
        .write("a.py", b"a\n")
        .add(&["a.py"])
        .commit("one")
        .assert(Assertion::UndoDepth { len: 3 }) // init, add, commit
        .undo()
        .assert(Assertion::UndoDepth { len: 2 })
        .run()
        .unwrap();
}
