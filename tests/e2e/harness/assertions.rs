use vex_core::PathStatus;

/// Assertions a scenario can make between steps.
#[derive(Debug)]
pub enum Assertion {
    /// A repository path reports the given status.
    StatusIs {
        path: String,
        status: PathStatus,
    },
    /// A repository path appears nowhere in the status report.
    StatusAbsent { path: String },
    /// A working-copy file holds exactly these bytes.
    FileContains { path: String, content: Vec<u8> },
    /// A working-copy file does not exist.
    FileAbsent { path: String },
    /// The newest applied commit's message.
    HeadMessage { message: String },
    /// Number of commits `log --all` reports.
    LogLen { len: usize },
    /// The head commit's tree contains a repository path.
    TreeHasPath { path: String },
    /// The head commit's tree lacks a repository path.
    TreeLacksPath { path: String },
    /// Number of alternatives `redo:list` reports.
    RedoChoices { len: usize },
    /// Number of actions `undo:list` reports.
    UndoDepth { len: usize },
    /// A branch with this name exists.
    BranchExists { name: String },
    /// Recovery ran on the last restart and rolled back.
    RecoveredRolledBack,
    /// Recovery ran on the last restart and rolled forward.
    RecoveredRolledForward,
    /// No interrupted-transaction leftovers on disk.
    CleanTransactionState,
}
