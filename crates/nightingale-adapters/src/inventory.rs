//! Repository file inventory
//!
//! The denominator for blast radius. Tracked files of HEAD when the root is a
//! git repository, otherwise every regular file outside VCS metadata.

use crate::util::{is_vcs_dir, relative_slash_path};
use anyhow::{Context, Result};
use git2::{ObjectType, Repository, TreeWalkMode, TreeWalkResult};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventorySource {
    GitHead,
    Filesystem,
}

impl InventorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventorySource::GitHead => "git HEAD",
            InventorySource::Filesystem => "filesystem",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RepoInventory {
    pub root: PathBuf,
    /// Sorted repository-relative paths with forward slashes.
    pub files: Vec<String>,
    pub source: InventorySource,
}

impl RepoInventory {
    pub fn scan(root: &Path) -> Result<Self> {
        if let Ok(repo) = Repository::open(root) {
            match head_files(&repo) {
                Ok(files) => {
                    tracing::debug!(root = %root.display(), count = files.len(), "inventory from git HEAD");
                    return Ok(Self {
                        root: root.to_path_buf(),
                        files,
                        source: InventorySource::GitHead,
                    });
                }
                Err(err) => {
                    tracing::debug!(root = %root.display(), "no usable HEAD, walking files: {:#}", err);
                }
            }
        }

        let files = walk_files(root)?;
        tracing::debug!(root = %root.display(), count = files.len(), "inventory from filesystem");
        Ok(Self {
            root: root.to_path_buf(),
            files,
            source: InventorySource::Filesystem,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn head_files(repo: &Repository) -> Result<Vec<String>> {
    let tree = repo
        .head()
        .context("Failed to get HEAD")?
        .peel_to_tree()
        .context("HEAD does not point at a tree")?;

    let mut files = Vec::new();
    tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
        if entry.kind() == Some(ObjectType::Blob) {
            if let Some(name) = entry.name() {
                files.push(format!("{}{}", dir, name));
            }
        }
        TreeWalkResult::Ok
    })
    .context("Failed to walk HEAD tree")?;
    files.sort();
    Ok(files)
}

fn walk_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir() && e.file_name().to_str().is_some_and(is_vcs_dir))
        })
    {
        let entry =
            entry.with_context(|| format!("Failed to walk repository '{}'", root.display()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        if let Some(rel) = relative_slash_path(root, entry.path()) {
            files.push(rel);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use std::fs;
    use tempfile::tempdir;

    fn commit_all(repo: &Repository) {
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("Nightingale Test", "nightingale@test.local").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();
    }

    #[test]
    fn walks_plain_directories_without_vcs_metadata() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join(".hg")).unwrap();
        fs::write(dir.path().join("src/app.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("README.md"), "hi\n").unwrap();
        fs::write(dir.path().join(".hg/store"), "meta").unwrap();

        let inventory = RepoInventory::scan(dir.path()).unwrap();
        assert_eq!(inventory.source, InventorySource::Filesystem);
        assert_eq!(inventory.files, vec!["README.md", "src/app.py"]);
    }

    #[test]
    fn uses_tracked_files_of_head() {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/mod.py"), "pass\n").unwrap();
        fs::write(dir.path().join("main.py"), "pass\n").unwrap();
        commit_all(&repo);
        fs::write(dir.path().join("untracked.py"), "pass\n").unwrap();

        let inventory = RepoInventory::scan(dir.path()).unwrap();
        assert_eq!(inventory.source, InventorySource::GitHead);
        assert_eq!(inventory.files, vec!["main.py", "pkg/mod.py"]);
    }

    #[test]
    fn unborn_repository_falls_back_to_walk() {
        let dir = tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        fs::write(dir.path().join("a.py"), "pass\n").unwrap();

        let inventory = RepoInventory::scan(dir.path()).unwrap();
        assert_eq!(inventory.source, InventorySource::Filesystem);
        assert_eq!(inventory.files, vec!["a.py"]);
    }
}
