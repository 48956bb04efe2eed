use super::assertions::Assertion;
use super::clock::MockClock;
use super::steps::ScenarioStep;
use super::workspace::TestWorkspace;
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use vex_core::{Commit, Project, Recovery};

/// Executes scenario steps against a real repository.
pub struct ScenarioRunner {
    workspace: TestWorkspace,
    project: Option<Project>,
    clock: MockClock,
    crashed: bool,
    last_recovery: Option<Recovery>,
    current_step: usize,
}

impl ScenarioRunner {
    /// Initializes a repository over the seeded files.
    pub fn new(
        initial_files: HashMap<String, Vec<u8>>,
        include: Vec<String>,
        ignore: Vec<String>,
    ) -> Result<Self> {
        let workspace = TestWorkspace::with_files(initial_files)?;
        let clock = MockClock::new();
        let project = workspace
            .init_vex(include, ignore)?
            .with_time_provider(clock.as_provider());

        Ok(Self {
            workspace,
            project: Some(project),
            clock,
            crashed: false,
            last_recovery: None,
            current_step: 0,
        })
    }

    /// Index of the step currently executing.
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Runs every step in order.
    pub fn execute(&mut self, steps: &[ScenarioStep]) -> Result<()> {
        for (i, step) in steps.iter().enumerate() {
            self.current_step = i;
            self.execute_step(step)
                .with_context(|| format!("step {}: {:?}", i, step))?;
        }
        Ok(())
    }

    fn project(&self) -> Result<&Project> {
        self.project
            .as_ref()
            .ok_or_else(|| anyhow!("repository not available (crashed?)"))
    }

    fn paths(files: &[String]) -> Vec<PathBuf> {
        files.iter().map(PathBuf::from).collect()
    }

    fn execute_step(&mut self, step: &ScenarioStep) -> Result<()> {
        match step {
            ScenarioStep::WriteFile { path, content } => self.workspace.write_file(path, content),
            ScenarioStep::DeleteFile { path } => {
                fs::remove_file(self.workspace.path().join(path))?;
                Ok(())
            }

            ScenarioStep::Add { files } => {
                self.project()?.add(&Self::paths(files))?;
                Ok(())
            }
            ScenarioStep::Forget { files } => {
                self.project()?.forget(&Self::paths(files))?;
                Ok(())
            }
            ScenarioStep::Remove { files } => {
                self.project()?.remove(&Self::paths(files))?;
                Ok(())
            }
            ScenarioStep::Restore { files } => {
                self.project()?.restore(&Self::paths(files))?;
                Ok(())
            }
            ScenarioStep::Commit { message } => {
                self.project()?.commit(Some(message.clone()))?;
                Ok(())
            }
            ScenarioStep::Prepare => {
                self.project()?.prepare()?;
                Ok(())
            }
            ScenarioStep::Amend { message } => {
                self.project()?.amend(Some(message.clone()))?;
                Ok(())
            }
            ScenarioStep::Switch { prefix } => {
                self.project()?.switch(prefix)?;
                Ok(())
            }
            ScenarioStep::BranchNew { name } => {
                self.project()?.branch_new(name)?;
                Ok(())
            }
            ScenarioStep::BranchOpen { name } => {
                self.project()?.branch_open(name)?;
                Ok(())
            }
            ScenarioStep::BranchSaveas { name } => {
                self.project()?.branch_saveas(name)?;
                Ok(())
            }
            ScenarioStep::Purge { paths } => {
                self.project()?.purge(&Self::paths(paths))?;
                Ok(())
            }

            ScenarioStep::Undo => {
                self.project()?
                    .undo()?
                    .ok_or_else(|| anyhow!("nothing to undo"))?;
                Ok(())
            }
            ScenarioStep::Redo { choice } => {
                self.project()?
                    .redo(*choice)?
                    .ok_or_else(|| anyhow!("nothing to redo"))?;
                Ok(())
            }

            ScenarioStep::Wait { duration } => {
                self.clock.advance(*duration);
                Ok(())
            }

            ScenarioStep::Crash => {
                self.project = None;
                self.crashed = true;
                Ok(())
            }
            ScenarioStep::InterruptedCommitOnDisk => self.fabricate_interrupted_commit(),
            ScenarioStep::Restart => {
                let project = self
                    .workspace
                    .open_vex()?
                    .with_time_provider(self.clock.as_provider());
                self.last_recovery = project.recovered();
                self.project = Some(project);
                self.crashed = false;
                Ok(())
            }

            ScenarioStep::Assert { assertion } => self.check(assertion),
        }
    }

    /// Leaves the on-disk shape of a commit killed between its CAS
    /// installs and the action-log-head swap: staged files in `pending/`
    /// and a plan whose head entry was never applied.
    fn fabricate_interrupted_commit(&mut self) -> Result<()> {
        if self.project.is_some() {
            return Err(anyhow!("crash the process before fabricating its leftovers"));
        }
        let vex_dir = self.workspace.path().join(".vex");
        let head_path = vex_dir.join("scratch/action_log_head");
        let old_head = fs::read_to_string(&head_path)?.trim().to_string();

        fs::create_dir_all(vex_dir.join("pending"))?;
        fs::write(
            vex_dir.join("pending").join("f".repeat(64)),
            b"staged object bytes",
        )?;
        let plan = serde_json::json!([
            { "name": "action_log_head", "old": old_head, "new": "f".repeat(64) },
            { "name": "sessions/dead", "old": null, "new": "e".repeat(64) },
        ]);
        fs::write(vex_dir.join("plan"), serde_json::to_vec(&plan)?)?;
        Ok(())
    }

    fn check(&self, assertion: &Assertion) -> Result<()> {
        match assertion {
            Assertion::StatusIs { path, status } => {
                let report = self.project()?.status()?;
                let actual = report
                    .entries
                    .get(path)
                    .ok_or_else(|| anyhow!("{} not in status report", path))?;
                if actual != status {
                    return Err(anyhow!(
                        "status of {}: expected {}, got {}",
                        path,
                        status,
                        actual
                    ));
                }
                Ok(())
            }
            Assertion::StatusAbsent { path } => {
                let report = self.project()?.status()?;
                if report.entries.contains_key(path) {
                    return Err(anyhow!("{} unexpectedly in status report", path));
                }
                Ok(())
            }
            Assertion::FileContains { path, content } => {
                let actual = self.workspace.read_file(path)?;
                if &actual != content {
                    return Err(anyhow!(
                        "{} holds {:?}, expected {:?}",
                        path,
                        String::from_utf8_lossy(&actual),
                        String::from_utf8_lossy(content)
                    ));
                }
                Ok(())
            }
            Assertion::FileAbsent { path } => {
                if self.workspace.file_exists(path) {
                    return Err(anyhow!("{} unexpectedly exists", path));
                }
                Ok(())
            }
            Assertion::HeadMessage { message } => {
                let log = self.project()?.log(false, 1)?;
                let head = log.first().ok_or_else(|| anyhow!("empty log"))?;
                if &head.message != message {
                    return Err(anyhow!(
                        "head message is '{}', expected '{}'",
                        head.message,
                        message
                    ));
                }
                Ok(())
            }
            Assertion::LogLen { len } => {
                let log = self.project()?.log(true, 1000)?;
                if log.len() != *len {
                    return Err(anyhow!("log has {} entries, expected {}", log.len(), len));
                }
                Ok(())
            }
            Assertion::TreeHasPath { path } => self.tree_check(path, true),
            Assertion::TreeLacksPath { path } => self.tree_check(path, false),
            Assertion::RedoChoices { len } => {
                let choices = self.project()?.redo_list()?;
                if choices.len() != *len {
                    return Err(anyhow!(
                        "{} redo choices, expected {}",
                        choices.len(),
                        len
                    ));
                }
                Ok(())
            }
            Assertion::UndoDepth { len } => {
                let entries = self.project()?.undo_list(1000)?;
                if entries.len() != *len {
                    return Err(anyhow!(
                        "undo depth {}, expected {}",
                        entries.len(),
                        len
                    ));
                }
                Ok(())
            }
            Assertion::BranchExists { name } => {
                let branches = self.project()?.branches()?;
                if !branches.iter().any(|b| &b.name == name) {
                    return Err(anyhow!("no branch named {}", name));
                }
                Ok(())
            }
            Assertion::RecoveredRolledBack => match self.last_recovery {
                Some(Recovery::RolledBack) => Ok(()),
                other => Err(anyhow!("expected rolled-back recovery, got {:?}", other)),
            },
            Assertion::RecoveredRolledForward => match self.last_recovery {
                Some(Recovery::RolledForward) => Ok(()),
                other => Err(anyhow!("expected rolled-forward recovery, got {:?}", other)),
            },
            Assertion::CleanTransactionState => {
                let status = self.project()?.debug_status()?;
                if status.pending || status.plan {
                    return Err(anyhow!("interrupted transaction leftovers on disk"));
                }
                Ok(())
            }
        }
    }

    fn tree_check(&self, path: &str, expect_present: bool) -> Result<()> {
        let project = self.project()?;
        let log = project.log(false, 1)?;
        let head = log.first().ok_or_else(|| anyhow!("empty log"))?;
        let commit: Commit = project.store().get_typed(head.id)?;
        let flat = vex_core::tree::flatten(project.store(), commit.root_tree)?;
        let present = flat.contains_key(path);
        if present != expect_present {
            return Err(anyhow!(
                "{} {} in the head tree",
                path,
                if present { "unexpectedly" } else { "not" }
            ));
        }
        Ok(())
    }
}
