use super::assertions::Assertion;
use super::runner::ScenarioRunner;
use super::steps::ScenarioStep;
use std::collections::HashMap;
use std::time::Duration;
use vex_core::PathStatus;

/// Fluent DSL for building test scenarios.
pub struct Scenario {
    name: String,
    initial_files: HashMap<String, Vec<u8>>,
    include: Vec<String>,
    ignore: Vec<String>,
    steps: Vec<ScenarioStep>,
}

impl Scenario {
    /// A fresh scenario initializing a repository at prefix `/code`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            initial_files: HashMap::new(),
            include: vec![],
            ignore: vec![],
            steps: Vec::new(),
        }
    }

    // ===== initial setup =====

    /// Seeds a file before `init` runs.
    pub fn with_file(mut self, path: &str, content: &[u8]) -> Self {
        self.initial_files
            .insert(path.to_string(), content.to_vec());
        self
    }

    /// Adds an include pattern to the `init` settings.
    pub fn with_include(mut self, pattern: &str) -> Self {
        self.include.push(pattern.to_string());
        self
    }

    /// Adds an ignore pattern to the `init` settings.
    pub fn with_ignore(mut self, pattern: &str) -> Self {
        self.ignore.push(pattern.to_string());
        self
    }

    // ===== working-copy edits =====

    pub fn write(mut self, path: &str, content: &[u8]) -> Self {
        self.steps.push(ScenarioStep::WriteFile {
            path: path.to_string(),
            content: content.to_vec(),
        });
        self
    }

    pub fn delete(mut self, path: &str) -> Self {
        self.steps.push(ScenarioStep::DeleteFile {
            path: path.to_string(),
        });
        self
    }

    // ===== commands =====

    pub fn add(mut self, files: &[&str]) -> Self {
        self.steps.push(ScenarioStep::Add {
            files: files.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn forget(mut self, files: &[&str]) -> Self {
        self.steps.push(ScenarioStep::Forget {
            files: files.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn remove(mut self, files: &[&str]) -> Self {
        self.steps.push(ScenarioStep::Remove {
            files: files.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn restore(mut self, files: &[&str]) -> Self {
        self.steps.push(ScenarioStep::Restore {
            files: files.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn commit(mut self, message: &str) -> Self {
        self.steps.push(ScenarioStep::Commit {
            message: message.to_string(),
        });
        self
    }

    pub fn prepare(mut self) -> Self {
        self.steps.push(ScenarioStep::Prepare);
        self
    }

    pub fn amend(mut self, message: &str) -> Self {
        self.steps.push(ScenarioStep::Amend {
            message: message.to_string(),
        });
        self
    }

    pub fn switch(mut self, prefix: &str) -> Self {
        self.steps.push(ScenarioStep::Switch {
            prefix: prefix.to_string(),
        });
        self
    }

    pub fn branch_new(mut self, name: &str) -> Self {
        self.steps.push(ScenarioStep::BranchNew {
            name: name.to_string(),
        });
        self
    }

    pub fn branch_open(mut self, name: &str) -> Self {
        self.steps.push(ScenarioStep::BranchOpen {
            name: name.to_string(),
        });
        self
    }

    pub fn branch_saveas(mut self, name: &str) -> Self {
        self.steps.push(ScenarioStep::BranchSaveas {
            name: name.to_string(),
        });
        self
    }

    pub fn purge(mut self, paths: &[&str]) -> Self {
        self.steps.push(ScenarioStep::Purge {
            paths: paths.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn undo(mut self) -> Self {
        self.steps.push(ScenarioStep::Undo);
        self
    }

    pub fn redo(mut self) -> Self {
        self.steps.push(ScenarioStep::Redo { choice: None });
        self
    }

    pub fn redo_choice(mut self, choice: usize) -> Self {
        self.steps.push(ScenarioStep::Redo {
            choice: Some(choice),
        });
        self
    }

    // ===== time and failure =====

    pub fn wait(mut self, duration: Duration) -> Self {
        self.steps.push(ScenarioStep::Wait { duration });
        self
    }

    pub fn crash(mut self) -> Self {
        self.steps.push(ScenarioStep::Crash);
        self
    }

    pub fn interrupted_commit_on_disk(mut self) -> Self {
        self.steps.push(ScenarioStep::InterruptedCommitOnDisk);
        self
    }

    pub fn restart(mut self) -> Self {
        self.steps.push(ScenarioStep::Restart);
        self
    }

    // ===== assertions =====

    pub fn assert(mut self, assertion: Assertion) -> Self {
        self.steps.push(ScenarioStep::Assert { assertion });
        self
    }

    pub fn assert_status(self, path: &str, status: PathStatus) -> Self {
        self.assert(Assertion::StatusIs {
            path: path.to_string(),
            status,
        })
    }

    pub fn assert_file(self, path: &str, content: &[u8]) -> Self {
        self.assert(Assertion::FileContains {
            path: path.to_string(),
            content: content.to_vec(),
        })
    }

    pub fn assert_file_absent(self, path: &str) -> Self {
        self.assert(Assertion::FileAbsent {
            path: path.to_string(),
        })
    }

    pub fn assert_head_message(self, message: &str) -> Self {
        self.assert(Assertion::HeadMessage {
            message: message.to_string(),
        })
    }

    // ===== execution =====

    /// Runs the scenario, reporting the failing step on error.
    pub fn run(self) -> ScenarioResult {
        let mut runner =
            match ScenarioRunner::new(self.initial_files.clone(), self.include, self.ignore) {
                Ok(runner) => runner,
                Err(e) => {
                    return ScenarioResult {
                        name: self.name,
                        success: false,
                        failure_step: Some(0),
                        error: Some(format!("failed to create runner: {:#}", e)),
                    }
                }
            };

        match runner.execute(&self.steps) {
            Ok(()) => ScenarioResult {
                name: self.name,
                success: true,
                failure_step: None,
                error: None,
            },
            Err(e) => ScenarioResult {
                name: self.name,
                success: false,
                failure_step: Some(runner.current_step()),
                error: Some(format!("{:#}", e)),
            },
        }
    }
}

/// Outcome of one scenario run.
#[derive(Debug)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub failure_step: Option<usize>,
    pub error: Option<String>,
}

impl ScenarioResult {
    /// Panics with a step-level message if the scenario failed.
    pub fn unwrap(self) {
        if !self.success {
            panic!(
                "scenario '{}' failed at step {}: {}",
                self.name,
                self.failure_step.unwrap_or(0),
                self.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }
}
