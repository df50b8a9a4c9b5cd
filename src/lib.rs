#[macro_use]
extern crate slog;
use anyhow::{anyhow, bail, Result};

mod archive;
pub mod collect;
mod diff_filter;
pub mod store;
pub mod versions;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use store::{ActionMode, Id, SzzType};

/// Which deleted lines of a bug fix become blame candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Every non-empty deleted line.
    All,
    /// Deleted lines that survive the comment and whitespace filters.
    CodeOnly,
}

/// Which label marks a commit as a bug fix, and which linked-issue list
/// provides the issue links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    ValidatedBugfix,
    AdjustedszzBugfix,
    IssueonlyBugfix,
    IssuefasttextBugfix,
}

impl Label {
    pub fn key(self) -> &'static str {
        match self {
            Label::ValidatedBugfix => "validated_bugfix",
            Label::AdjustedszzBugfix => "adjustedszz_bugfix",
            Label::IssueonlyBugfix => "issueonly_bugfix",
            Label::IssuefasttextBugfix => "issuefasttext_bugfix",
        }
    }

    fn issue_ids(self, commit: &store::Commit) -> &[Id] {
        match self {
            Label::ValidatedBugfix => &commit.fixed_issue_ids,
            Label::AdjustedszzBugfix => &commit.szz_issue_ids,
            Label::IssueonlyBugfix | Label::IssuefasttextBugfix => &commit.linked_issue_ids,
        }
    }

    // the automatic labels link issues of any type, so the tracker type has
    // to be checked; the validated label checks the verified type instead
    fn requires_bug_type(self) -> bool {
        !matches!(self, Label::ValidatedBugfix)
    }

    fn requires_verified_bug(self) -> bool {
        matches!(self, Label::ValidatedBugfix)
    }
}

/// Parameters of one labelled classification run.
#[derive(Debug, Clone, Copy)]
pub struct RunParams {
    pub label: Label,
    pub strategy: Strategy,
    pub java_only: bool,
    pub affected_versions: bool,
    pub ignore_refactorings: bool,
    pub only_validated_lines: bool,
    /// The label stamped onto the emitted records.
    pub name: &'static str,
}

/// The standard battery of runs, from plain SZZ over issue-linked variants
/// up to validated labels with refactoring and affected-version handling.
pub const STANDARD_RUNS: &[RunParams] = &[
    RunParams {
        label: Label::AdjustedszzBugfix,
        strategy: Strategy::All,
        java_only: false,
        affected_versions: false,
        ignore_refactorings: false,
        only_validated_lines: false,
        name: "SZZ",
    },
    RunParams {
        label: Label::IssueonlyBugfix,
        strategy: Strategy::CodeOnly,
        java_only: true,
        affected_versions: false,
        ignore_refactorings: true,
        only_validated_lines: false,
        name: "JL+R",
    },
    RunParams {
        label: Label::ValidatedBugfix,
        strategy: Strategy::All,
        java_only: false,
        affected_versions: false,
        ignore_refactorings: false,
        only_validated_lines: false,
        name: "JLMIV",
    },
    RunParams {
        label: Label::ValidatedBugfix,
        strategy: Strategy::CodeOnly,
        java_only: true,
        affected_versions: false,
        ignore_refactorings: false,
        only_validated_lines: false,
        name: "JLMIV+",
    },
    RunParams {
        label: Label::ValidatedBugfix,
        strategy: Strategy::CodeOnly,
        java_only: true,
        affected_versions: true,
        ignore_refactorings: false,
        only_validated_lines: false,
        name: "JLMIV+AV",
    },
    RunParams {
        label: Label::ValidatedBugfix,
        strategy: Strategy::CodeOnly,
        java_only: true,
        affected_versions: true,
        ignore_refactorings: true,
        only_validated_lines: false,
        name: "JLMIV+RAV",
    },
    RunParams {
        label: Label::ValidatedBugfix,
        strategy: Strategy::CodeOnly,
        java_only: true,
        affected_versions: false,
        ignore_refactorings: true,
        only_validated_lines: false,
        name: "JLMIV+R",
    },
    RunParams {
        label: Label::ValidatedBugfix,
        strategy: Strategy::CodeOnly,
        java_only: true,
        affected_versions: false,
        ignore_refactorings: false,
        only_validated_lines: true,
        name: "JLMIVLV",
    },
    RunParams {
        label: Label::IssuefasttextBugfix,
        strategy: Strategy::CodeOnly,
        java_only: true,
        affected_versions: false,
        ignore_refactorings: true,
        only_validated_lines: false,
        name: "JLIP+R",
    },
];

pub struct Config<'a> {
    /// Path of the metadata dataset file.
    pub database: &'a str,
    pub project: &'a str,
    pub repository_url: Option<&'a str>,
    /// Path of a checked-out repository; when absent the repository archive
    /// is extracted from the store into a temporary directory.
    pub input: Option<&'a str>,
}

pub fn run(logger: &slog::Logger, config: &Config) -> Result<()> {
    let store = store::Store::load(Path::new(config.database))?;
    run_with_store(logger, config, store)
}

fn run_with_store(logger: &slog::Logger, config: &Config, store: store::Store) -> Result<()> {
    let mut miner = InducingMiner::new(
        logger,
        store,
        config.project,
        config.repository_url,
        config.input.map(Path::new),
    )?;
    miner.collect()?;
    for params in STANDARD_RUNS {
        miner.write_bug_inducing(params)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct ChangeEntry {
    change_file_action_id: Id,
    inducing_file_action: Id,
    szz_type: SzzType,
}

/// Mines inducing commits for the bug fixes of one project and writes them
/// into the `induces` lists of the inducing file actions.
pub struct InducingMiner {
    logger: slog::Logger,
    store: store::Store,
    repo: collect::RepoIndex,
    project_name: String,
    vcs_id: Id,
    its_id: Id,
    jira_key: String,
    parsed_tags: Vec<versions::ParsedTag>,
    version_dates: HashMap<Vec<u32>, Vec<DateTime<Utc>>>,
    // keeps an extracted repository alive for the miner's lifetime
    _extracted: Option<tempfile::TempDir>,
}

impl InducingMiner {
    pub fn new(
        logger: &slog::Logger,
        store: store::Store,
        project_name: &str,
        vcs_url: Option<&str>,
        input: Option<&Path>,
    ) -> Result<InducingMiner> {
        let (vcs_id, its_id, jira_key, vcs_url, repository_file) = {
            let project = store
                .project_by_name(project_name)
                .ok_or_else(|| anyhow!("project {} not found", project_name))?;
            let vcs = store
                .vcs_for_project(project.id, vcs_url)
                .ok_or_else(|| anyhow!("no VCS system for project {}", project_name))?;
            let its = store
                .issue_system_for_project(project.id)
                .ok_or_else(|| anyhow!("no issue system for project {}", project_name))?;
            if !its.is_jira() {
                bail!("only jira issue systems are supported, got {}", its.url);
            }
            (
                vcs.id,
                its.id,
                its.jira_project_key().to_string(),
                vcs.url.clone(),
                vcs.repository_file.clone(),
            )
        };

        let (repo_path, extracted) = match input {
            Some(path) => (path.to_path_buf(), None),
            None => {
                let archive_file = repository_file.ok_or_else(|| {
                    anyhow!("no repository archive stored for project {}", project_name)
                })?;
                let dir = tempfile::tempdir()?;
                archive::extract_archive(Path::new(&archive_file), dir.path())?;
                let checkout: PathBuf = dir.path().join(archive::repository_name(&vcs_url));
                info!(logger, "using extracted repository";
                      "path" => checkout.display().to_string());
                (checkout, Some(dir))
            }
        };

        let repo = collect::RepoIndex::open(logger, &repo_path)?;

        Ok(InducingMiner {
            logger: logger.clone(),
            store,
            repo,
            project_name: project_name.to_string(),
            vcs_id,
            its_id,
            jira_key,
            parsed_tags: Vec::new(),
            version_dates: HashMap::new(),
            _extracted: extracted,
        })
    }

    /// Index the repository, resolve version dates, and reset the inducing
    /// records of every file action belonging to this repository.
    pub fn collect(&mut self) -> Result<()> {
        self.repo.collect()?;
        debug!(self.logger, "repository indexed";
               "change_map" => self.repo.change_map_len());

        {
            let tags = self.store.tags_for_vcs(self.vcs_id);
            self.parsed_tags =
                versions::filter_tags(&self.project_name, &tags, &versions::TagFilter::default());
        }
        self.version_dates = self.collect_version_dates();
        self.clear_inducing();
        Ok(())
    }

    fn clear_inducing(&mut self) {
        info!(self.logger, "clearing inducing records"; "vcs_system" => self.vcs_id);
        let commit_ids: Vec<Id> = self
            .store
            .commits_for_vcs(self.vcs_id)
            .map(|commit| commit.id)
            .collect();
        for commit_id in commit_ids {
            let file_action_ids: Vec<Id> = self
                .store
                .file_actions_for_commit(commit_id)
                .map(|fa| fa.id)
                .collect();
            for file_action_id in file_action_ids {
                if let Some(fa) = self.store.file_action_mut(file_action_id) {
                    fa.induces.clear();
                }
            }
        }
        info!(self.logger, "finished clearing inducing records");
    }

    /// Match the affected versions used in the issue tracker against the
    /// parsed tag versions: `3.0.0` matches exactly, `3.0` matches every
    /// `3.0.x` tag.
    fn collect_version_dates(&self) -> HashMap<Vec<u32>, Vec<DateTime<Utc>>> {
        let mut tag_versions: HashMap<Vec<u32>, DateTime<Utc>> = HashMap::new();
        for tag in &self.parsed_tags {
            // a tag can point at a revision with a broken date (faulty
            // subversion migrations); prefer the corrected hash
            let revision = tag.corrected_revision.as_deref().unwrap_or(&tag.revision);
            let Some(commit) = self.store.commit_by_revision(self.vcs_id, revision) else {
                warn!(self.logger, "tag revision not known to the store";
                      "tag" => tag.original.as_str(), "revision" => revision);
                continue;
            };
            tag_versions.insert(tag.version.clone(), commit.committer_date);
        }

        let mut affected: HashSet<Vec<u32>> = HashSet::new();
        for issue in self.store.issues_for_system(self.its_id) {
            for raw in &issue.affects_versions {
                if let Some(version) =
                    versions::affected_version(raw, &self.project_name, &self.jira_key)
                {
                    affected.insert(version);
                }
            }
        }

        let mut version_dates: HashMap<Vec<u32>, Vec<DateTime<Utc>>> = HashMap::new();
        for affected_version in affected {
            for (tag_version, date) in &tag_versions {
                if versions::prefix_matches(tag_version, &affected_version) {
                    version_dates
                        .entry(affected_version.clone())
                        .or_default()
                        .push(*date);
                }
            }
        }
        version_dates
    }

    /// The suspect boundary of a fix: the latest creation date of its linked
    /// bug reports, pulled back to the earliest affected-version date when
    /// that policy is enabled. `None` when no linked issue has a usable
    /// reporting date.
    fn find_boundary_date(
        &self,
        logger: &slog::Logger,
        issues: &[&store::Issue],
        use_affected_versions: bool,
    ) -> Option<DateTime<Utc>> {
        let mut issue_dates = Vec::new();
        let mut affected_version_dates: Vec<DateTime<Utc>> = Vec::new();

        for issue in issues {
            let Some(created_at) = issue.created_at else {
                warn!(logger, "no reporting date for issue, ignoring it";
                      "issue" => issue.external_id.as_str(), "id" => issue.id);
                continue;
            };

            // direct match between the raw version string and a tag name
            for raw in &issue.affects_versions {
                for tag in &self.parsed_tags {
                    if raw.to_lowercase() == tag.original.to_lowercase() {
                        let revision = tag.corrected_revision.as_deref().unwrap_or(&tag.revision);
                        if let Some(commit) = self.store.commit_by_revision(self.vcs_id, revision)
                        {
                            affected_version_dates.push(commit.committer_date);
                            debug!(logger, "direct link between tag and affected version";
                                   "tag" => tag.original.as_str(), "version" => raw.as_str());
                        }
                    }
                }
            }

            // prefix matches through the parsed version map
            for raw in &issue.affects_versions {
                let Some(version) =
                    versions::affected_version(raw, &self.project_name, &self.jira_key)
                else {
                    continue;
                };
                match self.version_dates.get(&version) {
                    Some(dates) => {
                        for date in dates {
                            if !affected_version_dates.contains(date) {
                                affected_version_dates.push(*date);
                            }
                        }
                    }
                    None => {
                        warn!(logger, "affected version not found in git tags, skipping";
                              "version" => format!("{:?}", version));
                    }
                }
            }

            issue_dates.push(created_at);
        }

        // the latest linked bug report marks the point where the bug was
        // certainly known
        let mut boundary = issue_dates.into_iter().max()?;

        if use_affected_versions {
            if let Some(min_affected) = affected_version_dates.into_iter().min() {
                boundary = boundary.min(min_affected);
            }
        }
        Some(boundary)
    }

    /// Deleted-side line ranges of this file action that rMiner detected as
    /// refactorings.
    fn refactoring_lines(&self, commit_id: Id, file_action_id: Id) -> Vec<(usize, usize)> {
        let mut lines = Vec::new();
        for refactoring in self.store.refactorings_for_commit(commit_id) {
            if refactoring.detection_tool != "rMiner" {
                continue;
            }
            for hunk in &refactoring.hunks {
                // added-side refactoring positions cannot be blamed
                if hunk.mode.eq_ignore_ascii_case("a") {
                    continue;
                }
                let Some(stored) = self.store.hunk(hunk.hunk_id) else {
                    continue;
                };
                if stored.file_action_id == file_action_id {
                    lines.push((hunk.start_line, hunk.end_line));
                }
            }
        }
        lines
    }

    /// Old-side line numbers of this file action that were manually
    /// validated as bug-fixing.
    fn bug_fixing_lines(&self, file_action_id: Id) -> HashSet<usize> {
        let mut lines = HashSet::new();
        for hunk in self.store.hunks_for_file_action(file_action_id) {
            let (_added, deleted) = Self::verified_hunk_lines(hunk);
            lines.extend(deleted);
        }
        lines
    }

    /// Map the hunk-relative validated line indices of a stored hunk to file
    /// line numbers on both diff sides.
    fn verified_hunk_lines(hunk: &store::Hunk) -> (Vec<usize>, Vec<usize>) {
        let verified = hunk.lines_verified.get("bugfix");
        let mut added = Vec::new();
        let mut deleted = Vec::new();

        let mut del_line = hunk.old_start;
        let mut add_line = hunk.new_start;
        for (hunk_line, line) in hunk.content.split('\n').enumerate() {
            if line.starts_with('+') {
                if verified.is_some_and(|lines| lines.contains(&hunk_line)) {
                    added.push(add_line);
                }
                add_line += 1;
            } else if line.starts_with('-') {
                if verified.is_some_and(|lines| lines.contains(&hunk_line)) {
                    deleted.push(del_line);
                }
                del_line += 1;
            } else {
                del_line += 1;
                add_line += 1;
            }
        }
        (added, deleted)
    }

    /// Classify the inducing commits for every bug fix carrying the run's
    /// label and append the results to the inducing file actions.
    ///
    /// The first pass blames each fix and types every `(fix file action,
    /// inducing file action)` pair against the fix's suspect boundary; the
    /// second pass splits suspects into hard and weak ones.
    pub fn write_bug_inducing(&mut self, params: &RunParams) -> Result<()> {
        info!(self.logger, "starting inducing run";
              "name" => params.name,
              "label" => params.label.key(),
              "strategy" => format!("{:?}", params.strategy),
              "java_only" => params.java_only,
              "affected_versions" => params.affected_versions,
              "ignore_refactorings" => params.ignore_refactorings);

        let label_key = params.label.key();

        // materialized up front; iterating the store while blaming would
        // pin its borrow for the whole run
        let bugfix_commit_ids: Vec<Id> = self
            .store
            .commits_for_vcs(self.vcs_id)
            .filter(|commit| commit.labels.get(label_key).copied().unwrap_or(false))
            .filter(|commit| commit.parents.len() < 2)
            .filter(|commit| !params.label.issue_ids(commit).is_empty())
            .map(|commit| commit.id)
            .collect();

        let mut all_changes: BTreeMap<(Id, Id), ChangeEntry> = BTreeMap::new();

        for bugfix_commit_id in bugfix_commit_ids {
            let Some(bugfix) = self.store.commit(bugfix_commit_id) else {
                continue;
            };
            let fix_revision = bugfix.revision_hash.clone();
            let issue_ids = params.label.issue_ids(bugfix).to_vec();
            let commit_logger = self.logger.new(o!("commit" => fix_revision.clone()));

            let mut issues: Vec<&store::Issue> = Vec::new();
            for issue_id in &issue_ids {
                let Some(issue) = self.store.issue(*issue_id) else {
                    continue;
                };
                if params.label.requires_bug_type()
                    && !issue
                        .issue_type
                        .as_deref()
                        .is_some_and(|kind| kind.eq_ignore_ascii_case("bug"))
                {
                    continue;
                }
                if !issue.is_resolved_and_fixed() {
                    continue;
                }
                if params.label.requires_verified_bug()
                    && !issue
                        .issue_type_verified
                        .as_deref()
                        .is_some_and(|kind| kind.eq_ignore_ascii_case("bug"))
                {
                    continue;
                }
                issues.push(issue);
            }
            if issues.is_empty() {
                warn!(commit_logger, "skipping commit, none of its issues are closed/fixed/resolved";
                      "issues" => format!("{:?}", issue_ids));
                continue;
            }

            let Some(boundary) =
                self.find_boundary_date(&commit_logger, &issues, params.affected_versions)
            else {
                warn!(commit_logger, "no usable reporting date on any linked issue, skipping");
                continue;
            };

            // only in-place modifications can delete the lines a fix removes
            let modified: Vec<(Id, Id)> = self
                .store
                .file_actions_for_commit(bugfix_commit_id)
                .filter(|fa| fa.mode == ActionMode::M)
                .map(|fa| (fa.id, fa.file_id))
                .collect();

            for (fix_fa_id, file_id) in modified {
                let Some(file) = self.store.file(file_id) else {
                    continue;
                };
                let path = file.path.clone();
                if params.java_only && !is_java_file(&path) {
                    continue;
                }

                let ignore_lines = if params.ignore_refactorings {
                    Some(self.refactoring_lines(bugfix_commit_id, fix_fa_id))
                } else {
                    None
                };
                let validated_lines = if params.only_validated_lines {
                    Some(self.bug_fixing_lines(fix_fa_id))
                } else {
                    None
                };

                let blamed = self.repo.blame(
                    &fix_revision,
                    &path,
                    params.strategy,
                    ignore_lines.as_deref(),
                    validated_lines.as_ref(),
                )?;

                for (blame_revision, original_path) in blamed {
                    let Some(blame_commit) =
                        self.store.commit_by_revision(self.vcs_id, &blame_revision)
                    else {
                        warn!(commit_logger, "blamed commit not known to the store";
                              "revision" => blame_revision.as_str());
                        continue;
                    };

                    // everything before the boundary induced the bug; later
                    // commits are suspects, or partial fixes when they carry
                    // the same bug-fix label themselves
                    let szz_type = if blame_commit.committer_date < boundary {
                        SzzType::Inducing
                    } else if blame_commit.labels.get(label_key).copied().unwrap_or(false) {
                        SzzType::PartialFix
                    } else {
                        SzzType::Suspect
                    };
                    debug!(commit_logger, "classified blamed commit";
                           "blamed" => blame_revision.as_str(),
                           "blame_date" => blame_commit.committer_date.to_rfc3339(),
                           "boundary" => boundary.to_rfc3339(),
                           "szz_type" => format!("{:?}", szz_type));

                    let inducing_fas: Vec<(Id, Id)> = self
                        .store
                        .file_actions_for_commit(blame_commit.id)
                        .map(|fa| (fa.id, fa.file_id))
                        .collect();
                    for (inducing_fa_id, inducing_file_id) in inducing_fas {
                        let Some(inducing_file) = self.store.file(inducing_file_id) else {
                            continue;
                        };
                        if inducing_file.path != original_path {
                            continue;
                        }
                        all_changes
                            .entry((fix_fa_id, inducing_fa_id))
                            .or_insert(ChangeEntry {
                                change_file_action_id: fix_fa_id,
                                inducing_file_action: inducing_fa_id,
                                szz_type,
                            });
                    }
                }
            }
        }

        info!(self.logger, "size of all changes"; "entries" => all_changes.len());

        // second pass: a suspect corroborated by a non-suspect record
        // against the same inducing file action is only weakly suspect
        debug!(self.logger, "starting second pass to distinguish hard and weak suspects");
        let mut new_types: HashMap<(Id, Id), SzzType> = HashMap::new();
        for (key, entry) in &all_changes {
            if entry.szz_type != SzzType::Suspect {
                continue;
            }
            let mut refined = SzzType::HardSuspect;
            for (other_key, other) in &all_changes {
                if key == other_key {
                    continue;
                }
                if other.inducing_file_action == entry.inducing_file_action
                    && other.szz_type != SzzType::Suspect
                {
                    refined = SzzType::WeakSuspect;
                }
            }
            new_types.insert(*key, refined);
        }

        debug!(self.logger, "writing results");
        for (key, entry) in &all_changes {
            let szz_type = if entry.szz_type == SzzType::Suspect {
                new_types[key]
            } else {
                entry.szz_type
            };
            let record = store::InducingRecord {
                change_file_action_id: entry.change_file_action_id,
                szz_type,
                label: params.name.to_string(),
            };
            let Some(fa) = self.store.file_action_mut(entry.inducing_file_action) else {
                continue;
            };
            if !fa.induces.contains(&record) {
                fa.induces.push(record);
            }
        }

        info!(self.logger, "finished inducing run"; "name" => params.name);
        self.store.save()
    }
}

fn is_java_file(path: &str) -> bool {
    path.to_lowercase().ends_with(".java")
}
