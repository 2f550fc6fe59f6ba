//! Git-backed project/branch workspace.
//!
//! Layout on disk: `workdir_root/<project>/<branch>/` is a working tree
//! with its own `.git`; `main` is the canonical branch. Cross-branch moves
//! go through a transient local remote (add, fetch, merge, remove) so no
//! network is ever involved.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use kestrel_domain::error::{Error, Result};

use crate::naming::generate_name;

const GIT_EMAIL: &str = "kestrel@ocotillo.ai";
const GIT_NAME: &str = "Kestrel Agent";

pub struct Workspace {
    root: PathBuf,
}

async fn git(dir: &Path, args: &[&str]) -> Result<()> {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| Error::Git(format!("failed to run git: {e}")))?;
    if !out.status.success() {
        return Err(Error::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    Ok(())
}

/// Like [`git`] but failures are ignored (remote cleanup paths).
async fn git_lenient(dir: &Path, args: &[&str]) {
    let _ = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await;
}

async fn configure_identity(dir: &Path) -> Result<()> {
    git(dir, &["config", "user.email", GIT_EMAIL]).await?;
    git(dir, &["config", "user.name", GIT_NAME]).await
}

/// Recursive file copy, skipping the transcript directory.
fn copy_contents(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == ".kestrel" || name == "sessions" {
            continue;
        }
        let dest_path = dst.join(&name);
        if entry.file_type()?.is_dir() {
            std::fs::create_dir_all(&dest_path)?;
            copy_contents(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), dest_path)?;
        }
    }
    Ok(())
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join(project)
    }

    pub fn branch_dir(&self, project: &str, branch: &str) -> PathBuf {
        self.root.join(project).join(branch)
    }

    // ── Listing ────────────────────────────────────────────────────

    /// Projects are directories whose `main` branch exists.
    pub fn list_projects(&self) -> Vec<String> {
        let Ok(read_dir) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut projects: Vec<String> = read_dir
            .flatten()
            .filter(|e| e.path().is_dir() && e.path().join("main").exists())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        projects.sort();
        projects
    }

    /// Branches are subdirectories carrying a `.git`.
    pub fn list_branches(&self, project: &str) -> Vec<String> {
        let Ok(read_dir) = std::fs::read_dir(self.project_dir(project)) else {
            return Vec::new();
        };
        let mut branches: Vec<String> = read_dir
            .flatten()
            .filter(|e| e.path().is_dir() && e.path().join(".git").exists())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        branches.sort();
        branches
    }

    // ── Creation ───────────────────────────────────────────────────

    /// Create a brand-new project: `workdir_root/<name>/main` with an
    /// initialized repo and an initial commit. Returns `(name, main_dir)`.
    pub async fn init_project(&self) -> Result<(String, PathBuf)> {
        let project = generate_name();
        let main_dir = self.branch_dir(&project, "main");
        if main_dir.exists() {
            return Err(Error::Workspace(format!(
                "destination {} already exists",
                main_dir.display()
            )));
        }
        std::fs::create_dir_all(&main_dir).map_err(Error::Io)?;

        if let Err(e) = async {
            git(&main_dir, &["init"]).await?;
            configure_identity(&main_dir).await?;
            git(&main_dir, &["add", "."]).await?;
            git(
                &main_dir,
                &["commit", "--allow-empty", "-m", "Initial commit by Kestrel"],
            )
            .await
        }
        .await
        {
            tracing::error!(error = %e, project = %project, "git init failed");
        }

        tracing::info!(project = %project, dir = %main_dir.display(), "created project");
        Ok((project, main_dir))
    }

    /// Clone `source` into a new branch directory under the same project.
    /// When git clone fails (source is not a repo), falls back to a plain
    /// file copy. Returns `(branch_name, branch_dir)`.
    pub async fn clone_into_branch(&self, source: &Path) -> Result<(String, PathBuf)> {
        if !source.exists() {
            return Err(Error::Workspace(format!(
                "source path {} does not exist",
                source.display()
            )));
        }
        let project_dir = source
            .parent()
            .ok_or_else(|| Error::Workspace("source path has no parent".into()))?;

        let branch = generate_name();
        let branch_dir = project_dir.join(&branch);
        if branch_dir.exists() {
            return Err(Error::Workspace(format!(
                "destination {} already exists",
                branch_dir.display()
            )));
        }

        tracing::info!(src = %source.display(), dst = %branch_dir.display(), "cloning branch");
        match self.git_clone_branch(source, &branch_dir, &branch).await {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(error = %e, "git clone failed, falling back to file copy");
                std::fs::create_dir_all(&branch_dir).map_err(Error::Io)?;
                copy_contents(source, &branch_dir).map_err(Error::Io)?;
            }
        }

        Ok((branch, branch_dir))
    }

    async fn git_clone_branch(&self, source: &Path, dest: &Path, branch: &str) -> Result<()> {
        git(
            source.parent().unwrap_or(Path::new(".")),
            &[
                "clone",
                &source.to_string_lossy(),
                &dest.to_string_lossy(),
            ],
        )
        .await?;
        configure_identity(dest).await?;
        git(dest, &["checkout", "-b", branch]).await
    }

    /// Create a named branch from `source_branch` (default `main`).
    pub async fn create_branch(
        &self,
        project: &str,
        branch: Option<&str>,
        source_branch: &str,
    ) -> Result<String> {
        let source_dir = self.branch_dir(project, source_branch);
        if !source_dir.exists() {
            return Err(Error::Workspace(format!(
                "source branch {source_branch} does not exist"
            )));
        }

        let branch = branch
            .map(str::to_string)
            .unwrap_or_else(generate_name);
        let branch_dir = self.branch_dir(project, &branch);
        if branch_dir.exists() {
            return Err(Error::Workspace(format!(
                "destination {} already exists",
                branch_dir.display()
            )));
        }

        git(
            &self.project_dir(project),
            &[
                "clone",
                &source_dir.to_string_lossy(),
                &branch_dir.to_string_lossy(),
            ],
        )
        .await?;
        configure_identity(&branch_dir).await?;
        git(&branch_dir, &["checkout", "-b", &branch]).await?;

        Ok(branch)
    }

    // ── Deletion ───────────────────────────────────────────────────

    pub fn delete_project(&self, project: &str) -> bool {
        let dir = self.project_dir(project);
        if !dir.exists() {
            return false;
        }
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            tracing::error!(error = %e, project, "failed to delete project");
            return false;
        }
        tracing::info!(project, "deleted project");
        true
    }

    pub fn delete_branch(&self, project: &str, branch: &str) -> bool {
        let dir = self.branch_dir(project, branch);
        if !dir.exists() {
            return false;
        }
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            tracing::error!(error = %e, project, branch, "failed to delete branch");
            return false;
        }
        tracing::info!(project, branch, "deleted branch");
        true
    }

    // ── Merging ────────────────────────────────────────────────────

    /// Merge a branch's commits into `main` via a transient local remote.
    pub async fn merge_branch_into_main(&self, project: &str, branch: &str) -> Result<()> {
        if branch == "main" {
            return Err(Error::Workspace("cannot merge main into itself".into()));
        }
        let main_dir = self.branch_dir(project, "main");
        let branch_dir = self.branch_dir(project, branch);
        if !main_dir.exists() {
            return Err(Error::Workspace(format!(
                "main branch does not exist for project {project}"
            )));
        }
        if !branch_dir.exists() {
            return Err(Error::Workspace(format!("branch {branch} does not exist")));
        }

        let remote = format!("kestrel_{branch}");
        git_lenient(&main_dir, &["remote", "remove", &remote]).await;
        git(&main_dir, &["remote", "add", &remote, &branch_dir.to_string_lossy()]).await?;
        let result = async {
            git(&main_dir, &["fetch", &remote, branch]).await?;
            git(&main_dir, &["merge", "--no-edit", "FETCH_HEAD"]).await
        }
        .await;
        git_lenient(&main_dir, &["remote", "remove", &remote]).await;
        result
    }

    /// Bring a branch up to date with `main` (reverse direction).
    pub async fn sync_branch_from_main(&self, project: &str, branch: &str) -> Result<()> {
        if branch == "main" {
            return Err(Error::Workspace("main is already up to date".into()));
        }
        let main_dir = self.branch_dir(project, "main");
        let branch_dir = self.branch_dir(project, branch);
        if !main_dir.exists() {
            return Err(Error::Workspace(format!(
                "main branch does not exist for project {project}"
            )));
        }
        if !branch_dir.exists() {
            return Err(Error::Workspace(format!("branch {branch} does not exist")));
        }

        let remote = "kestrel_main";
        git_lenient(&branch_dir, &["remote", "remove", remote]).await;
        git(&branch_dir, &["remote", "add", remote, &main_dir.to_string_lossy()]).await?;
        let result = async {
            git(&branch_dir, &["fetch", remote, "main"]).await?;
            git(&branch_dir, &["merge", "--no-edit", "FETCH_HEAD"]).await
        }
        .await;
        git_lenient(&branch_dir, &["remote", "remove", remote]).await;
        result
    }
}
