use std::path::{Path, PathBuf};

pub struct Context {
    pub repo: git2::Repository,
    pub dir: tempfile::TempDir,
}

impl Context {
    pub fn join(&self, path: &Path) -> PathBuf {
        self.dir.path().join(path)
    }
}

/// Prepare a fresh, empty git repository with a default author.
pub fn init_repo() -> Context {
    let dir = tempfile::tempdir().unwrap();
    let repo = git2::Repository::init_opts(
        dir.path(),
        git2::RepositoryInitOptions::new().initial_head("master"),
    )
    .unwrap();
    become_author(&repo, "nobody", "nobody@example.com");
    Context { repo, dir }
}

/// Become a new author - set the user.name and user.email config options.
pub fn become_author(repo: &git2::Repository, name: &str, email: &str) {
    let mut config = repo.config().unwrap();
    config.set_str("user.name", name).unwrap();
    config.set_str("user.email", email).unwrap();
}

/// Stage the changes made to `path` and return the resulting tree.
pub fn add<'r>(repo: &'r git2::Repository, path: &Path) -> git2::Tree<'r> {
    let mut index = repo.index().unwrap();
    index.add_path(path).unwrap();
    index.write().unwrap();

    let tree_id = index.write_tree_to(repo).unwrap();
    repo.find_tree(tree_id).unwrap()
}

/// Write `content` to `path` and commit the result on HEAD.
pub fn commit_file(ctx: &Context, path: &Path, content: &str, message: &str) -> git2::Oid {
    std::fs::write(ctx.join(path), content).unwrap();
    let tree = add(&ctx.repo, path);
    let signature = ctx.repo.signature().unwrap();
    let head = ctx
        .repo
        .head()
        .ok()
        .map(|head| head.peel_to_commit().unwrap());
    let parents: Vec<&git2::Commit> = head.iter().collect();
    ctx.repo
        .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
        .unwrap()
}

/// Commit `content` at `path` with explicit parents, without moving HEAD.
pub fn commit_file_with_parents(
    ctx: &Context,
    path: &Path,
    content: &str,
    message: &str,
    parents: &[git2::Oid],
) -> git2::Oid {
    std::fs::write(ctx.join(path), content).unwrap();
    let tree = add(&ctx.repo, path);
    let signature = ctx.repo.signature().unwrap();
    let parent_commits: Vec<git2::Commit> = parents
        .iter()
        .map(|oid| ctx.repo.find_commit(*oid).unwrap())
        .collect();
    let parent_refs: Vec<&git2::Commit> = parent_commits.iter().collect();
    ctx.repo
        .commit(None, &signature, &signature, message, &tree, &parent_refs)
        .unwrap()
}

/// Create a two-parent merge commit on HEAD, reusing the first parent's tree.
pub fn merge_commits(ctx: &Context, ours: git2::Oid, theirs: git2::Oid, message: &str) -> git2::Oid {
    let signature = ctx.repo.signature().unwrap();
    let ours = ctx.repo.find_commit(ours).unwrap();
    let theirs = ctx.repo.find_commit(theirs).unwrap();
    let tree = ours.tree().unwrap();
    ctx.repo
        .commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &[&ours, &theirs],
        )
        .unwrap()
}

/// Rename a tracked file and commit the result on HEAD.
pub fn rename_file(ctx: &Context, from: &Path, to: &Path, message: &str) -> git2::Oid {
    std::fs::rename(ctx.join(from), ctx.join(to)).unwrap();
    let mut index = ctx.repo.index().unwrap();
    index.remove_path(from).unwrap();
    index.add_path(to).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree_to(&ctx.repo).unwrap();
    let tree = ctx.repo.find_tree(tree_id).unwrap();

    let signature = ctx.repo.signature().unwrap();
    let head = ctx.repo.head().unwrap().peel_to_commit().unwrap();
    ctx.repo
        .commit(Some("HEAD"), &signature, &signature, message, &tree, &[&head])
        .unwrap()
}

/// Create a lightweight tag named `name` pointing at `target`.
pub fn tag(ctx: &Context, name: &str, target: git2::Oid) {
    let object = ctx.repo.find_object(target, None).unwrap();
    ctx.repo.tag_lightweight(name, &object, false).unwrap();
}
