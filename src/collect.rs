use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::diff_filter;
use crate::Strategy;

const SIMILARITY_THRESHOLD: u16 = 50;

/// One hunk of a commit's diff against a parent, in unified-diff body form
/// with `+`/`-`/context prefixes.
#[derive(Debug, Clone)]
pub struct ChangeHunk {
    pub header: String,
    pub new_file: String,
    pub new_start: usize,
    pub new_lines: usize,
    pub old_start: usize,
    pub old_lines: usize,
    pub content: String,
}

/// One file touched by a commit, relative to one parent.
#[derive(Debug, Clone)]
pub struct FileChange {
    pub mode: char,
    pub new_path: String,
    /// The pre-change path for renames and copies.
    pub old_path: Option<String>,
    pub lines_added: usize,
    pub lines_deleted: usize,
    pub changeset_size: usize,
    pub parent: Option<String>,
}

pub struct CommitInfo {
    pub author_name: String,
    pub author_email: String,
    pub committer_name: String,
    pub committer_email: String,
    pub committer_date_utc: DateTime<Utc>,
    pub committer_date: i64,
    pub committer_date_offset: i32,
    pub message: String,
    pub file_actions: Vec<FileChange>,
}

/// In-memory view of a repository: per-commit hunks and file actions keyed
/// by revision hash, plus the commit DAG. Everything is held in RAM, which
/// does not scale to huge histories.
pub struct RepoIndex {
    logger: slog::Logger,
    repo: git2::Repository,
    hunks: HashMap<String, Vec<ChangeHunk>>,
    file_actions: HashMap<String, Vec<FileChange>>,
    msgs: HashMap<String, String>,
    commit_days: HashMap<String, String>,
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

fn ensure_node(
    graph: &mut DiGraph<String, ()>,
    nodes: &mut HashMap<String, NodeIndex>,
    revision: &str,
) -> NodeIndex {
    match nodes.get(revision) {
        Some(index) => *index,
        None => {
            let index = graph.add_node(revision.to_string());
            nodes.insert(revision.to_string(), index);
            index
        }
    }
}

impl RepoIndex {
    pub fn open(logger: &slog::Logger, path: &Path) -> Result<RepoIndex> {
        let repo = git2::Repository::open(path)?;
        debug!(logger, "repository opened"; "path" => repo.path().to_str());
        Ok(RepoIndex {
            logger: logger.clone(),
            repo,
            hunks: HashMap::new(),
            file_actions: HashMap::new(),
            msgs: HashMap::new(),
            commit_days: HashMap::new(),
            graph: DiGraph::new(),
            nodes: HashMap::new(),
        })
    }

    /// Walk every branch and tag and record hunks, file actions, metadata
    /// and the commit DAG for all reachable commits.
    pub fn collect(&mut self) -> Result<()> {
        let mut targets: Vec<(String, git2::Oid)> = Vec::new();

        for branch in self.repo.branches(None)? {
            let (branch, _kind) = branch?;
            let reference = branch.get();
            let name = reference.name().unwrap_or("<unnamed>").to_string();
            match reference.target() {
                Some(oid) => targets.push((name, oid)),
                None => debug!(self.logger, "skipping symbolic branch"; "branch" => name),
            }
        }

        for reference in self.repo.references()? {
            let reference = reference?;
            if !reference.is_tag() {
                continue;
            }
            let name = reference.name().unwrap_or("<unnamed>").to_string();
            match reference.peel_to_commit() {
                Ok(commit) => targets.push((name.clone(), commit.id())),
                Err(err) => {
                    debug!(self.logger, "skipping tag that does not peel to a commit";
                           "tag" => name, "err" => err.to_string());
                }
            }
        }

        for (name, target) in targets {
            if let Err(err) = self.index_ref(target) {
                warn!(self.logger, "skipping unwalkable ref";
                      "ref" => name, "err" => err.to_string());
            }
        }

        debug!(self.logger, "repository collected";
               "commits" => self.nodes.len(),
               "with_hunks" => self.hunks.len());
        Ok(())
    }

    fn index_ref(&mut self, target: git2::Oid) -> Result<()> {
        let oids: Vec<git2::Oid> = {
            let mut walk = self.repo.revwalk()?;
            walk.push(target)?;
            walk.collect::<std::result::Result<_, _>>()?
        };

        for oid in oids {
            let revision = oid.to_string();
            let commit = self.repo.find_commit(oid)?;

            let node = ensure_node(&mut self.graph, &mut self.nodes, &revision);
            for parent in commit.parent_ids() {
                let parent_node =
                    ensure_node(&mut self.graph, &mut self.nodes, &parent.to_string());
                self.graph.update_edge(parent_node, node, ());
            }

            // hunks and file actions only need to be computed once per
            // commit, no matter how many refs reach it
            if self.msgs.contains_key(&revision) {
                continue;
            }

            self.msgs.insert(
                revision.clone(),
                String::from_utf8_lossy(commit.message_bytes()).into_owned(),
            );
            let when = Utc
                .timestamp_opt(commit.time().seconds(), 0)
                .single()
                .ok_or_else(|| anyhow!("out-of-range commit time on {}", revision))?;
            self.commit_days
                .insert(revision.clone(), when.date_naive().to_string());

            let (actions, hunks) = Self::changed_files(&self.repo, &self.logger, &commit)?;
            if !hunks.is_empty() {
                self.hunks.insert(revision.clone(), hunks);
            }
            self.file_actions.insert(revision, actions);
        }
        Ok(())
    }

    fn changed_files(
        repo: &git2::Repository,
        logger: &slog::Logger,
        commit: &git2::Commit,
    ) -> Result<(Vec<FileChange>, Vec<ChangeHunk>)> {
        let mut actions = Vec::new();
        let mut hunks = Vec::new();

        let mut diff_options = git2::DiffOptions::new();
        diff_options.context_lines(0).interhunk_lines(1);

        let initial = commit.parent_count() == 0;
        let mut diffs: Vec<(Option<String>, git2::Diff)> = Vec::new();
        if initial {
            // a root commit has no parent to diff against; diff its tree
            // against the empty tree and flip the result back around below
            let diff =
                repo.diff_tree_to_tree(Some(&commit.tree()?), None, Some(&mut diff_options))?;
            diffs.push((None, diff));
        }
        for parent in commit.parents() {
            let mut diff = repo.diff_tree_to_tree(
                Some(&parent.tree()?),
                Some(&commit.tree()?),
                Some(&mut diff_options),
            )?;
            let mut find_options = git2::DiffFindOptions::new();
            find_options
                .renames(true)
                .copies(true)
                .rename_threshold(SIMILARITY_THRESHOLD)
                .copy_threshold(SIMILARITY_THRESHOLD);
            diff.find_similar(Some(&mut find_options))?;
            diffs.push((Some(parent.id().to_string()), diff));
        }

        for (parent, diff) in &diffs {
            let changeset_size = diff.deltas().len();
            let mut checked_paths = HashSet::new();
            for delta_idx in 0..changeset_size {
                let Some(mut patch) = git2::Patch::from_diff(diff, delta_idx)? else {
                    // binary deltas carry no text hunks
                    continue;
                };

                let (new_path, old_path, status) = {
                    let delta = patch.delta();
                    let Some(new_path) = delta.new_file().path_bytes() else {
                        continue;
                    };
                    (
                        String::from_utf8_lossy(new_path).into_owned(),
                        delta
                            .old_file()
                            .path_bytes()
                            .map(|path| String::from_utf8_lossy(path).into_owned()),
                        delta.status(),
                    )
                };
                if !checked_paths.insert(new_path.clone()) {
                    warn!(logger, "duplicate path in parent diff";
                          "commit" => commit.id().to_string(), "path" => new_path.as_str());
                    continue;
                }

                let mut mode = match status {
                    git2::Delta::Added => 'A',
                    git2::Delta::Deleted => 'D',
                    git2::Delta::Modified => 'M',
                    git2::Delta::Renamed => 'R',
                    git2::Delta::Copied => 'C',
                    git2::Delta::Ignored => 'I',
                    git2::Delta::Untracked => 'U',
                    git2::Delta::Typechange => 'T',
                    _ => 'X',
                };
                // the inverted empty-tree diff reports deletions
                if initial {
                    mode = 'A';
                }

                for hunk_idx in 0..patch.num_hunks() {
                    let (header, new_start, new_lines, old_start, old_lines) = {
                        let (hunk, _size) = patch.hunk(hunk_idx)?;
                        let header = String::from_utf8_lossy(hunk.header()).into_owned();
                        if initial {
                            // swap sides so consumers always see the
                            // added/deleted convention of a forward diff
                            (
                                header,
                                hunk.old_start(),
                                hunk.old_lines(),
                                hunk.new_start(),
                                hunk.new_lines(),
                            )
                        } else {
                            (
                                header,
                                hunk.new_start(),
                                hunk.new_lines(),
                                hunk.old_start(),
                                hunk.old_lines(),
                            )
                        }
                    };

                    let mut content = String::new();
                    for line_idx in 0..patch.num_lines_in_hunk(hunk_idx)? {
                        let line = patch.line_in_hunk(hunk_idx, line_idx)?;
                        match line.origin() {
                            '+' | '-' | ' ' => {
                                content.push(if initial { '+' } else { line.origin() });
                                content.push_str(&String::from_utf8_lossy(line.content()));
                            }
                            // end-of-file newline markers carry no diff body
                            _ => {}
                        }
                    }

                    hunks.push(ChangeHunk {
                        header,
                        new_file: new_path.clone(),
                        new_start: new_start as usize,
                        new_lines: new_lines as usize,
                        old_start: old_start as usize,
                        old_lines: old_lines as usize,
                        content,
                    });
                }

                let (_context, additions, deletions) = patch.line_stats()?;
                let (lines_added, lines_deleted) = if initial {
                    (deletions, additions)
                } else {
                    (additions, deletions)
                };
                let old_path = match mode {
                    'R' | 'C' => old_path,
                    _ => None,
                };
                actions.push(FileChange {
                    mode,
                    new_path,
                    old_path,
                    lines_added,
                    lines_deleted,
                    changeset_size,
                    parent: parent.clone(),
                });
            }
        }

        Ok((actions, hunks))
    }

    /// Deleted lines of `revision` in `filepath` that survive the strategy,
    /// validation and ignore filters, as `(old_line_number, text)` pairs.
    fn blame_lines(
        &self,
        revision: &str,
        filepath: &str,
        strategy: Strategy,
        ignore_lines: Option<&[(usize, usize)]>,
        validated_lines: Option<&HashSet<usize>>,
    ) -> Vec<(usize, String)> {
        let mut changed = Vec::new();
        let Some(hunks) = self.hunks.get(revision) else {
            return changed;
        };

        for hunk in hunks {
            if hunk.new_file != filepath {
                continue;
            }
            if strategy == Strategy::CodeOnly && diff_filter::comment_only_change(&hunk.content) {
                debug!(self.logger, "whitespace or comment only change";
                       "commit" => revision, "file" => filepath);
                continue;
            }

            let (_added, deleted) =
                diff_filter::changed_lines(hunk.old_start, hunk.new_start, &hunk.content);
            for (lineno, text) in deleted {
                if text.is_empty() {
                    continue;
                }
                if strategy == Strategy::CodeOnly && !diff_filter::is_code_line(&text) {
                    continue;
                }
                if let Some(validated) = validated_lines {
                    if !validated.contains(&lineno) {
                        continue;
                    }
                }
                if let Some(ranges) = ignore_lines {
                    if ranges.iter().any(|(start, end)| *start <= lineno && lineno <= *end) {
                        continue;
                    }
                }
                if changed.iter().any(|(l, t)| *l == lineno && *t == text) {
                    continue;
                }
                changed.push((lineno, text));
            }
        }
        changed
    }

    /// Attribute the deleted lines of a fix commit to the commits that last
    /// touched them, by blaming `filepath` at the fix's parent.
    ///
    /// Returns de-duplicated `(inducing_revision, original_path)` pairs.
    /// Unknown revisions, merge commits and fixes without surviving deleted
    /// lines yield an empty result.
    pub fn blame(
        &self,
        revision: &str,
        filepath: &str,
        strategy: Strategy,
        ignore_lines: Option<&[(usize, usize)]>,
        validated_lines: Option<&HashSet<usize>>,
    ) -> Result<Vec<(String, String)>> {
        let Some(node) = self.nodes.get(revision) else {
            return Ok(Vec::new());
        };

        let parents = self
            .graph
            .neighbors_directed(*node, Direction::Incoming)
            .count();
        if parents > 1 {
            debug!(self.logger, "skipping blame on merge commit"; "commit" => revision);
            return Ok(Vec::new());
        }

        let changed = self.blame_lines(revision, filepath, strategy, ignore_lines, validated_lines);
        if changed.is_empty() {
            return Ok(Vec::new());
        }

        let commit = self.repo.find_commit(git2::Oid::from_str(revision)?)?;
        let parent = commit.parent(0)?;

        let mut options = git2::BlameOptions::new();
        options
            .track_copies_same_file(true)
            .newest_commit(parent.id());
        let blame = self.repo.blame_file(Path::new(filepath), Some(&mut options))?;

        let mut commits = BTreeSet::new();
        for (lineno, _text) in &changed {
            // out of bounds here means the hunk map and the parent disagree,
            // which is not recoverable
            let hunk = blame.get_line(*lineno).ok_or_else(|| {
                anyhow!(
                    "blame lookup out of range for file: {}, line: {}, revision: {}",
                    filepath,
                    lineno,
                    revision
                )
            })?;
            let original_path = match hunk.path() {
                Some(path) => path.to_string_lossy().into_owned(),
                None => filepath.to_string(),
            };
            commits.insert((hunk.orig_commit_id().to_string(), original_path));
        }

        Ok(commits.into_iter().collect())
    }

    pub fn file_actions(&self, revision: &str) -> &[FileChange] {
        self.file_actions
            .get(revision)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn hunks(&self, revision: &str) -> &[ChangeHunk] {
        self.hunks.get(revision).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of revisions currently held in the in-memory hunk map.
    pub fn change_map_len(&self) -> usize {
        self.hunks.len()
    }

    pub fn contains(&self, revision: &str) -> bool {
        self.nodes.contains_key(revision)
    }

    pub fn committer_day(&self, revision: &str) -> Option<&str> {
        self.commit_days.get(revision).map(String::as_str)
    }

    pub fn message(&self, revision: &str) -> Option<&str> {
        self.msgs.get(revision).map(String::as_str)
    }

    /// All tag references of the repository as `(name, revision)` pairs,
    /// peeled to the tagged commit.
    pub fn tags(&self) -> Result<Vec<(String, String)>> {
        let mut tags = Vec::new();
        for reference in self.repo.references()? {
            let reference = reference?;
            if !reference.is_tag() {
                continue;
            }
            let Some(name) = reference.name() else {
                continue;
            };
            let name = name.trim_start_matches("refs/tags/").to_string();
            match reference.peel_to_commit() {
                Ok(commit) => tags.push((name, commit.id().to_string())),
                Err(_) => continue,
            }
        }
        Ok(tags)
    }

    pub fn commit_information(&self, revision: &str) -> Result<CommitInfo> {
        let commit = self.repo.find_commit(git2::Oid::from_str(revision)?)?;
        let committer_date_utc = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .ok_or_else(|| anyhow!("out-of-range commit time on {}", revision))?;
        let info = CommitInfo {
            author_name: commit.author().name().unwrap_or("").to_string(),
            author_email: commit.author().email().unwrap_or("").to_string(),
            committer_name: commit.committer().name().unwrap_or("").to_string(),
            committer_email: commit.committer().email().unwrap_or("").to_string(),
            committer_date_utc,
            committer_date: commit.time().seconds(),
            committer_date_offset: commit.time().offset_minutes(),
            message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
            file_actions: self.file_actions(revision).to_vec(),
        };
        Ok(info)
    }
}
