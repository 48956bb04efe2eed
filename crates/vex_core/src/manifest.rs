//! Working-manifest bookkeeping: refresh against the filesystem and
//! include/ignore pattern matching.

use crate::error::{Result, VexError};
use crate::types::{Tracked, TrackedKind, TrackedState};
use glob::Pattern;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Files whose mtime is within this many seconds of "now" are re-checked
/// on the next refresh instead of being trusted; a write can land in the
/// same clock second as the stat that recorded it.
pub const MTIME_GRACE_SECONDS: i64 = 2;

/// Compiled include/ignore rules.
///
/// Ignore rules win. A rule starting with `/` matches a full repository
/// path; any other rule matches the file name. An empty include list
/// includes everything.
#[derive(Debug)]
pub struct Matcher {
    include: Vec<Rule>,
    ignore: Vec<Rule>,
}

#[derive(Debug)]
enum Rule {
    Path(String),
    Name(Pattern),
}

impl Matcher {
    /// Compiles rule lists, rejecting malformed patterns.
    pub fn new(include: &[String], ignore: &[String]) -> Result<Self> {
        Ok(Self {
            include: compile(include)?,
            ignore: compile(ignore)?,
        })
    }

    /// Whether a file at `repo_path` (with final component `name`) is
    /// picked up by `add`.
    pub fn includes_file(&self, repo_path: &str, name: &str) -> bool {
        if self.is_ignored(repo_path, name) {
            return false;
        }
        if self.include.is_empty() {
            return true;
        }
        self.include.iter().any(|rule| rule.matches(repo_path, name))
    }

    /// Whether a directory may be descended into.
    pub fn enters_dir(&self, repo_path: &str, name: &str) -> bool {
        !self.is_ignored(repo_path, name)
    }

    fn is_ignored(&self, repo_path: &str, name: &str) -> bool {
        self.ignore.iter().any(|rule| rule.matches(repo_path, name))
    }
}

impl Rule {
    fn matches(&self, repo_path: &str, name: &str) -> bool {
        match self {
            Rule::Path(path) => path == repo_path,
            Rule::Name(pattern) => pattern.matches(name),
        }
    }
}

fn compile(rules: &[String]) -> Result<Vec<Rule>> {
    rules
        .iter()
        .map(|rule| {
            if let Some(stripped) = rule.strip_prefix('/') {
                Ok(Rule::Path(format!("/{}", stripped)))
            } else {
                Pattern::new(rule)
                    .map(Rule::Name)
                    .map_err(|e| VexError::domain(format!("bad pattern '{}': {}", rule, e)))
            }
        })
        .collect()
}

/// What a stat-based refresh concluded about one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Nothing moved.
    Unchanged,
    /// The entry's state was updated (modified, deleted, replaced).
    Changed,
    /// The stats were inconclusive (no recorded mtime to compare): the
    /// caller must compare contents before trusting `tracked`.
    Probe,
}

/// Re-derives one tracked entry's state from the file behind it.
///
/// Stat-based: a `tracked` entry whose observed mtime/size/mode moved
/// becomes `modified`. An entry with no recorded stats returns
/// [`Refresh::Probe`] and the caller decides by hashing.
pub fn refresh_entry(tracked: &mut Tracked, path: &Path, now: i64) -> Refresh {
    if !tracked.working || tracked.kind == TrackedKind::Ignored {
        return Refresh::Unchanged;
    }
    if tracked.state == TrackedState::Deleted {
        return Refresh::Unchanged;
    }

    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(_) => {
            tracked.state = TrackedState::Deleted;
            tracked.mtime = None;
            tracked.size = None;
            tracked.mode = None;
            return Refresh::Changed;
        }
    };

    match tracked.kind {
        TrackedKind::File => {
            if meta.is_dir() {
                tracked.state = TrackedState::Replaced;
                tracked.kind = TrackedKind::Dir;
                tracked.id = None;
                return Refresh::Changed;
            }
            let size = meta.len();
            let mtime = mtime_seconds(&meta);
            let mode = mode_bits(&meta);

            let verdict = if tracked.state == TrackedState::Tracked {
                match (tracked.mtime, tracked.size, tracked.mode) {
                    (Some(m), Some(s), Some(md)) => {
                        if m < mtime || s != size || md != mode {
                            tracked.state = TrackedState::Modified;
                            Refresh::Changed
                        } else {
                            Refresh::Unchanged
                        }
                    }
                    _ => Refresh::Probe,
                }
            } else {
                Refresh::Unchanged
            };

            tracked.size = Some(size);
            tracked.mode = Some(mode);
            // Do not trust an mtime captured in the same clock second.
            if now - mtime >= MTIME_GRACE_SECONDS {
                tracked.mtime = Some(mtime);
            } else {
                tracked.mtime = None;
            }
            verdict
        }
        TrackedKind::Dir => {
            if !meta.is_dir() {
                tracked.state = TrackedState::Replaced;
                tracked.kind = TrackedKind::File;
                tracked.id = None;
                Refresh::Changed
            } else {
                Refresh::Unchanged
            }
        }
        TrackedKind::Ignored => Refresh::Unchanged,
    }
}

fn mtime_seconds(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(unix)]
fn mode_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn mode_bits(_meta: &fs::Metadata) -> u32 {
    0
}

/// True when the executable bit is set in the mode.
pub fn is_executable(mode: u32) -> bool {
    mode & 0o100 != 0
}

/// Walks a directory tree, returning `(relative path, is_dir)` pairs for
/// everything the matcher lets through. Relative paths use `/` separators.
pub fn walk_dir(root: &Path, matcher: &Matcher, repo_prefix: &str) -> Result<Vec<(String, bool)>> {
    let mut out = Vec::new();
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == ".vex" {
                continue;
            }
            let rel = path
                .strip_prefix(root)
                .expect("walked paths stay under the root")
                .to_string_lossy()
                .replace('\\', "/");
            let repo_path = if repo_prefix == "/" {
                format!("/{}", rel)
            } else {
                format!("{}/{}", repo_prefix, rel)
            };

            if path.is_dir() {
                if matcher.enters_dir(&repo_path, name) {
                    out.push((rel.clone(), true));
                    stack.push(path);
                }
            } else if path.is_file() && matcher.includes_file(&repo_path, name) {
                out.push((rel, false));
            }
        }
    }

    out.sort();
    Ok(out)
}

/// Per-path status line for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStatus {
    /// Tracked and unchanged.
    Tracked,
    /// Added, not yet committed.
    Added,
    /// Modified since the last commit.
    Modified,
    /// Deleted from the working copy.
    Deleted,
    /// Replaced by an entry of a different kind.
    Replaced,
    /// Matched an ignore rule.
    Ignored,
    /// Present on disk but not tracked.
    Untracked,
}

impl std::fmt::Display for PathStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            PathStatus::Tracked => "tracked",
            PathStatus::Added => "added",
            PathStatus::Modified => "modified",
            PathStatus::Deleted => "deleted",
            PathStatus::Replaced => "replaced",
            PathStatus::Ignored => "ignored",
            PathStatus::Untracked => "untracked",
        };
        f.write_str(text)
    }
}

impl From<(TrackedKind, TrackedState)> for PathStatus {
    fn from((kind, state): (TrackedKind, TrackedState)) -> Self {
        if kind == TrackedKind::Ignored {
            return PathStatus::Ignored;
        }
        match state {
            TrackedState::Tracked => PathStatus::Tracked,
            TrackedState::Added => PathStatus::Added,
            TrackedState::Modified => PathStatus::Modified,
            TrackedState::Deleted => PathStatus::Deleted,
            TrackedState::Replaced => PathStatus::Replaced,
        }
    }
}

/// A working-copy status report.
#[derive(Debug, Default)]
pub struct StatusReport {
    /// Status per tracked repository path.
    pub entries: BTreeMap<String, PathStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Props;
    use tempfile::TempDir;

    fn tracked_file() -> Tracked {
        Tracked {
            kind: TrackedKind::File,
            state: TrackedState::Tracked,
            id: None,
            properties: Props::new(),
            working: true,
            mtime: Some(0),
            size: Some(5),
            mode: Some(0o100644),
            stash: None,
        }
    }

    #[test]
    fn test_matcher_include_by_name() {
        let m = Matcher::new(&["*.py".into()], &[]).unwrap();
        assert!(m.includes_file("/code/hello.py", "hello.py"));
        assert!(!m.includes_file("/code/hello.rs", "hello.rs"));
    }

    #[test]
    fn test_matcher_ignore_wins() {
        let m = Matcher::new(&["*.py".into()], &["secret*".into()]).unwrap();
        assert!(!m.includes_file("/code/secret.py", "secret.py"));
        assert!(m.includes_file("/code/open.py", "open.py"));
    }

    #[test]
    fn test_matcher_path_rule() {
        let m = Matcher::new(&[], &["/code/vendor".into()]).unwrap();
        assert!(!m.enters_dir("/code/vendor", "vendor"));
        assert!(m.enters_dir("/code/src", "src"));
    }

    #[test]
    fn test_empty_include_means_everything() {
        let m = Matcher::new(&[], &[]).unwrap();
        assert!(m.includes_file("/anything", "anything"));
    }

    #[test]
    fn test_bad_pattern_is_domain_error() {
        let err = Matcher::new(&["[".into()], &[]).unwrap_err();
        assert!(matches!(err, VexError::Domain(_)));
    }

    #[test]
    fn test_refresh_missing_file_becomes_deleted() {
        let tmp = TempDir::new().unwrap();
        let mut entry = tracked_file();
        let verdict = refresh_entry(&mut entry, &tmp.path().join("gone.txt"), 1_000_000);
        assert_eq!(verdict, Refresh::Changed);
        assert_eq!(entry.state, TrackedState::Deleted);
    }

    #[test]
    fn test_refresh_size_change_marks_modified() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.txt");
        fs::write(&path, b"longer than five").unwrap();

        let mut entry = tracked_file();
        let verdict = refresh_entry(&mut entry, &path, 2_000_000_000);
        assert_eq!(verdict, Refresh::Changed);
        assert_eq!(entry.state, TrackedState::Modified);
        assert_eq!(entry.size, Some(16));
    }

    #[test]
    fn test_refresh_unknown_stats_asks_for_probe() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.txt");
        fs::write(&path, b"hello").unwrap();

        let mut entry = tracked_file();
        entry.mtime = None;
        let verdict = refresh_entry(&mut entry, &path, 2_000_000_000);
        // No recorded stats to compare against: the caller must hash.
        assert_eq!(verdict, Refresh::Probe);
        assert_eq!(entry.state, TrackedState::Tracked);
    }

    #[test]
    fn test_refresh_dir_replaced_by_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("was_dir");
        fs::write(&path, b"now a file").unwrap();

        let mut entry = tracked_file();
        entry.kind = TrackedKind::Dir;
        entry.id = None;
        let verdict = refresh_entry(&mut entry, &path, 2_000_000_000);
        assert_eq!(verdict, Refresh::Changed);
        assert_eq!(entry.state, TrackedState::Replaced);
        assert_eq!(entry.kind, TrackedKind::File);
    }

    #[test]
    fn test_walk_dir_applies_matcher() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.py"), b"x").unwrap();
        fs::write(tmp.path().join("b.rs"), b"x").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/c.py"), b"x").unwrap();
        fs::create_dir(tmp.path().join(".vex")).unwrap();
        fs::write(tmp.path().join(".vex/ignore_me"), b"x").unwrap();

        let m = Matcher::new(&["*.py".into()], &[]).unwrap();
        let found = walk_dir(tmp.path(), &m, "/").unwrap();
        assert_eq!(
            found,
            vec![
                ("a.py".to_string(), false),
                ("sub".to_string(), true),
                ("sub/c.py".to_string(), false),
            ]
        );
    }
}
