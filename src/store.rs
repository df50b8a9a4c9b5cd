use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Id = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcsSystem {
    pub id: Id,
    pub project_id: Id,
    pub url: String,
    /// Path of a gzipped tar archive of the repository, when one is stored.
    #[serde(default)]
    pub repository_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueSystem {
    pub id: Id,
    pub project_id: Id,
    pub url: String,
}

impl IssueSystem {
    pub fn is_jira(&self) -> bool {
        self.url.contains("jira")
    }

    /// The tracker project key, taken from the `?project=<KEY>` url suffix.
    pub fn jira_project_key(&self) -> &str {
        match self.url.rsplit_once("project=") {
            Some((_, key)) => key,
            None => &self.url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: Id,
    pub issue_system_id: Id,
    pub external_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub affects_versions: Vec<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub issue_type: Option<String>,
    #[serde(default)]
    pub issue_type_verified: Option<String>,
}

impl Issue {
    /// Whether the tracker considers the issue closed with a fix.
    pub fn is_resolved_and_fixed(&self) -> bool {
        let resolved = self
            .status
            .as_deref()
            .is_some_and(|status| {
                status.eq_ignore_ascii_case("resolved") || status.eq_ignore_ascii_case("closed")
            });
        let fixed = self
            .resolution
            .as_deref()
            .is_some_and(|resolution| resolution.eq_ignore_ascii_case("fixed"));
        resolved && fixed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: Id,
    pub vcs_system_id: Id,
    pub revision_hash: String,
    #[serde(default)]
    pub parents: Vec<String>,
    pub committer_date: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeMap<String, bool>,
    #[serde(default)]
    pub fixed_issue_ids: Vec<Id>,
    #[serde(default)]
    pub szz_issue_ids: Vec<Id>,
    #[serde(default)]
    pub linked_issue_ids: Vec<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: Id,
    pub vcs_system_id: Id,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionMode {
    A,
    M,
    D,
    R,
    C,
    T,
    I,
    U,
    X,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InducingRecord {
    pub change_file_action_id: Id,
    pub szz_type: SzzType,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SzzType {
    Inducing,
    /// Transient first-pass value, refined before anything is persisted.
    Suspect,
    HardSuspect,
    WeakSuspect,
    PartialFix,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAction {
    pub id: Id,
    pub commit_id: Id,
    pub file_id: Id,
    pub mode: ActionMode,
    #[serde(default)]
    pub induces: Vec<InducingRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hunk {
    pub id: Id,
    pub file_action_id: Id,
    pub new_start: usize,
    pub new_lines: usize,
    pub old_start: usize,
    pub old_lines: usize,
    pub content: String,
    /// Manually validated hunk-relative line indices, keyed by tag
    /// (e.g. "bugfix").
    #[serde(default)]
    pub lines_verified: BTreeMap<String, Vec<usize>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefactoringHunk {
    pub hunk_id: Id,
    pub mode: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refactoring {
    pub id: Id,
    pub commit_id: Id,
    pub detection_tool: String,
    #[serde(default)]
    pub hunks: Vec<RefactoringHunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: Id,
    pub vcs_system_id: Id,
    pub name: String,
    pub revision_hash: String,
    /// Corrected hash for tags broken by VCS migrations.
    #[serde(default)]
    pub corrected_revision: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub vcs_systems: Vec<VcsSystem>,
    #[serde(default)]
    pub issue_systems: Vec<IssueSystem>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub commits: Vec<Commit>,
    #[serde(default)]
    pub files: Vec<File>,
    #[serde(default)]
    pub file_actions: Vec<FileAction>,
    #[serde(default)]
    pub hunks: Vec<Hunk>,
    #[serde(default)]
    pub refactorings: Vec<Refactoring>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// The project metadata the miner consumes, with read-modify-write access to
/// `FileAction.induces`. Backed by a single serialized dataset file.
pub struct Store {
    path: Option<PathBuf>,
    data: Dataset,
}

impl Store {
    pub fn load(path: &Path) -> Result<Store> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("could not read dataset {}", path.display()))?;
        let data = serde_json::from_str(&raw)
            .with_context(|| format!("could not parse dataset {}", path.display()))?;
        Ok(Store {
            path: Some(path.to_path_buf()),
            data,
        })
    }

    /// An unbacked store, used by tests; `save` is a no-op.
    pub fn from_dataset(data: Dataset) -> Store {
        Store { path: None, data }
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let raw = serde_json::to_string_pretty(&self.data)?;
        fs::write(path, raw).with_context(|| format!("could not write dataset {}", path.display()))
    }

    pub fn project_by_name(&self, name: &str) -> Option<&Project> {
        self.data.projects.iter().find(|project| project.name == name)
    }

    pub fn vcs_for_project(&self, project_id: Id, url: Option<&str>) -> Option<&VcsSystem> {
        self.data
            .vcs_systems
            .iter()
            .find(|vcs| vcs.project_id == project_id && url.map_or(true, |url| vcs.url == url))
    }

    pub fn issue_system_for_project(&self, project_id: Id) -> Option<&IssueSystem> {
        self.data
            .issue_systems
            .iter()
            .find(|its| its.project_id == project_id)
    }

    pub fn issue(&self, id: Id) -> Option<&Issue> {
        self.data.issues.iter().find(|issue| issue.id == id)
    }

    pub fn issues_for_system(&self, issue_system_id: Id) -> impl Iterator<Item = &Issue> {
        self.data
            .issues
            .iter()
            .filter(move |issue| issue.issue_system_id == issue_system_id)
    }

    pub fn commit(&self, id: Id) -> Option<&Commit> {
        self.data.commits.iter().find(|commit| commit.id == id)
    }

    pub fn commit_by_revision(&self, vcs_system_id: Id, revision_hash: &str) -> Option<&Commit> {
        self.data
            .commits
            .iter()
            .find(|commit| commit.vcs_system_id == vcs_system_id && commit.revision_hash == revision_hash)
    }

    pub fn commits_for_vcs(&self, vcs_system_id: Id) -> impl Iterator<Item = &Commit> {
        self.data
            .commits
            .iter()
            .filter(move |commit| commit.vcs_system_id == vcs_system_id)
    }

    pub fn file(&self, id: Id) -> Option<&File> {
        self.data.files.iter().find(|file| file.id == id)
    }

    pub fn file_action(&self, id: Id) -> Option<&FileAction> {
        self.data.file_actions.iter().find(|fa| fa.id == id)
    }

    pub fn file_action_mut(&mut self, id: Id) -> Option<&mut FileAction> {
        self.data.file_actions.iter_mut().find(|fa| fa.id == id)
    }

    pub fn file_actions_for_commit(&self, commit_id: Id) -> impl Iterator<Item = &FileAction> {
        self.data
            .file_actions
            .iter()
            .filter(move |fa| fa.commit_id == commit_id)
    }

    pub fn hunk(&self, id: Id) -> Option<&Hunk> {
        self.data.hunks.iter().find(|hunk| hunk.id == id)
    }

    pub fn hunks_for_file_action(&self, file_action_id: Id) -> impl Iterator<Item = &Hunk> {
        self.data
            .hunks
            .iter()
            .filter(move |hunk| hunk.file_action_id == file_action_id)
    }

    pub fn refactorings_for_commit(&self, commit_id: Id) -> impl Iterator<Item = &Refactoring> {
        self.data
            .refactorings
            .iter()
            .filter(move |refactoring| refactoring.commit_id == commit_id)
    }

    pub fn tags_for_vcs(&self, vcs_system_id: Id) -> Vec<&Tag> {
        self.data
            .tags
            .iter()
            .filter(|tag| tag.vcs_system_id == vcs_system_id)
            .collect()
    }
}
