use crate::harness::{Assertion, Scenario};
use vex_core::PathStatus;

#[test]
fn test_add_commit_settles_status() {
    Scenario::new("add_commit")
        .with_include("*.py")
        .write("hello.py", b"print('hello')\n")
        .add(&["hello.py"])
        .assert_status("/code/hello.py", PathStatus::Added)
        .commit("first")
        .assert_status("/code/hello.py", PathStatus::Tracked)
        .assert_head_message("first")
        .assert(Assertion::TreeHasPath {
            path: "/code/hello.py".into(),
        })
        .run()
        .unwrap();
}

#[test]
fn test_modify_shows_and_commits() {
    Scenario::new("modify_commit")
        .with_include("*.py")
        .write("hello.py", b"v1\n")
        .add(&["hello.py"])
        .commit("v1")
        .write("hello.py", b"v2\n")
        .assert_status("/code/hello.py", PathStatus::Modified)
        .commit("v2")
        .assert_status("/code/hello.py", PathStatus::Tracked)
        .assert_head_message("v2")
        .run()
        .unwrap();
}

#[test]
fn test_forget_untracks_without_touching_disk() {
    Scenario::new("forget")
        .with_include("*.py")
        .write("kept.py", b"still here\n")
        .add(&["kept.py"])
        .forget(&["kept.py"])
        .assert_status("/code/kept.py", PathStatus::Untracked)
        .assert_file("kept.py", b"still here\n")
        .run()
        .unwrap();
}

#[test]
fn test_remove_deletes_from_disk() {
    Scenario::new("remove")
        .with_include("*.py")
        .write("gone.py", b"bye\n")
        .add(&["gone.py"])
        .remove(&["gone.py"])
        .assert_file_absent("gone.py")
        .run()
        .unwrap();
}

#[test]
fn test_restore_overwrites_local_edits() {
    Scenario::new("restore")
        .with_include("*.py")
        .write("work.py", b"committed\n")
        .add(&["work.py"])
        .commit("base")
        .write("work.py", b"scratch edits\n")
        .restore(&["work.py"])
        .assert_file("work.py", b"committed\n")
        .assert_status("/code/work.py", PathStatus::Tracked)
        .run()
        .unwrap();
}

#[test]
fn test_deleted_file_noticed_and_committed() {
    Scenario::new("delete_commit")
        .with_include("*.py")
        .write("doomed.py", b"x\n")
        .add(&["doomed.py"])
        .commit("with file")
        .delete("doomed.py")
        .assert_status("/code/doomed.py", PathStatus::Deleted)
        .commit("without file")
        .assert(Assertion::TreeLacksPath {
            path: "/code/doomed.py".into(),
        })
        .run()
        .unwrap();
}

#[test]
fn test_ignore_rules_hide_files() {
    Scenario::new("ignored")
        .with_include("*.py")
        .with_ignore("secret*")
        .write("open.py", b"x\n")
        .write("secret.py", b"x\n")
        .assert_status("/code/open.py", PathStatus::Untracked)
        .assert(Assertion::StatusAbsent {
            path: "/code/secret.py".into(),
        })
        .run()
        .unwrap();
}

#[test]
fn test_switch_materializes_subtree() {
    Scenario::new("switch_prefix")
        .with_include("*.py")
        .write("top.py", b"top\n")
        .write("sub/inner.py", b"inner\n")
        .add(&["top.py", "sub"])
        .commit("layout")
        .switch("/code/sub")
        .assert_file("inner.py", b"inner\n")
        .assert_file_absent("top.py")
        .switch("/code")
        .assert_file("top.py", b"top\n")
        .assert_file("sub/inner.py", b"inner\n")
        .run()
        .unwrap();
}
