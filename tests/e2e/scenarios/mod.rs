mod branch_stash;
mod crash_recovery;
mod happy_path;
mod purge;
mod undo_redo;
