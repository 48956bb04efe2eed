use crate::harness::{Assertion, Scenario};
use vex_core::PathStatus;

#[test]
fn test_kill_between_install_and_head_swap_rolls_back() {
    // The commit point is the action-log-head swap. A process killed
    // after the CAS installs but before the swap must leave the old
    // head in place, with the uncommitted changes still pending.
    Scenario::new("kill_before_commit_point")
        .with_include("*.py")
        .write("a.py", b"a\n")
        .add(&["a.py"])
        .commit("one")
        .write("b.py", b"b\n")
        .add(&["b.py"])
        .crash()
        .interrupted_commit_on_disk()
        .restart()
        .assert(Assertion::RecoveredRolledBack)
        .assert(Assertion::CleanTransactionState)
        .assert_head_message("one")
        .assert_status("/code/b.py", PathStatus::Added)
        .run()
        .unwrap();
}

#[test]
fn test_plain_crash_needs_no_recovery() {
    Scenario::new("clean_crash")
        .with_include("*.py")
        .write("a.py", b"a\n")
        .add(&["a.py"])
        .commit("one")
        .crash()
        .restart()
        .assert(Assertion::CleanTransactionState)
        .assert_head_message("one")
        .assert_status("/code/a.py", PathStatus::Tracked)
        .run()
        .unwrap();
}

#[test]
fn test_repository_usable_after_rollback() {
    Scenario::new("work_after_rollback")
        .with_include("*.py")
        .write("a.py", b"a\n")
        .add(&["a.py"])
        .commit("one")
        .crash()
        .interrupted_commit_on_disk()
        .restart()
        .assert(Assertion::RecoveredRolledBack)
        .write("c.py", b"c\n")
        .add(&["c.py"])
        .commit("after recovery")
        .assert_head_message("after recovery")
        .run()
        .unwrap();
}

#[test]
fn test_undo_still_works_after_recovery() {
    Scenario::new("undo_after_recovery")
        .with_include("*.py")
        .write("a.py", b"a\n")
        .add(&["a.py"])
        .commit("one")
        .crash()
        .interrupted_commit_on_disk()
        .restart()
        .assert(Assertion::RecoveredRolledBack)
        .undo()
        .assert_status("/code/a.py", PathStatus::Added)
        .run()
        .unwrap();
}
