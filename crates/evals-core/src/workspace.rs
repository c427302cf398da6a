//! Scenario workspace construction.
//!
//! A workspace is a fresh temporary directory seeded from the fixture store:
//! the base fixture (a directory tree or a single file) plus any overlay
//! files written at workspace-relative paths. Every fixture is resolved and
//! every overlay path validated before the directory is allocated, and the
//! temporary directory is only handed back once fully populated; on any
//! failure it is removed when dropped.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info};

use crate::domain::{BaseFixture, EvalError, FixtureRef, Overlay, Result, Scenario};

const WORKSPACE_PREFIX: &str = "evals-ws-";

/// Read-only fixture store laid out as `<root>/<category>/<name>`.
#[derive(Debug, Clone)]
pub struct FixtureStore {
    root: PathBuf,
}

impl FixtureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a fixture to its on-disk path, failing if it does not exist.
    pub fn resolve(&self, fixture: &FixtureRef) -> Result<PathBuf> {
        for part in [&fixture.category, &fixture.name] {
            if !is_safe_relative(Path::new(part)) {
                return Err(EvalError::InvalidScenario(format!(
                    "fixture reference {fixture} escapes the fixture store"
                )));
            }
        }
        let path = self.root.join(&fixture.category).join(&fixture.name);
        if !path.exists() {
            return Err(EvalError::FixtureNotFound {
                category: fixture.category.clone(),
                name: fixture.name.clone(),
                path,
            });
        }
        Ok(path)
    }
}

/// An isolated, exclusively owned workspace directory.
#[derive(Debug)]
pub struct Workspace {
    dir: WorkspaceDir,
}

#[derive(Debug)]
enum WorkspaceDir {
    Temp(TempDir),
    Kept(PathBuf),
}

impl Workspace {
    pub fn path(&self) -> &Path {
        match &self.dir {
            WorkspaceDir::Temp(dir) => dir.path(),
            WorkspaceDir::Kept(path) => path,
        }
    }

    /// Whether the directory outlives this value.
    pub fn is_kept(&self) -> bool {
        matches!(self.dir, WorkspaceDir::Kept(_))
    }

    /// Detach the directory from this value so it is not deleted on drop.
    pub fn keep(self) -> PathBuf {
        match self.dir {
            WorkspaceDir::Temp(dir) => dir.keep(),
            WorkspaceDir::Kept(path) => path,
        }
    }
}

/// Builds a [`Workspace`] from a base fixture and overlays.
#[derive(Debug)]
pub struct WorkspaceBuilder<'a> {
    store: &'a FixtureStore,
    base: BaseFixture,
    overlays: Vec<Overlay>,
    keep: bool,
}

impl<'a> WorkspaceBuilder<'a> {
    pub fn new(store: &'a FixtureStore, base: FixtureRef) -> Self {
        Self {
            store,
            base: BaseFixture {
                fixture: base,
                dest: None,
            },
            overlays: Vec::new(),
            keep: false,
        }
    }

    /// Builder pre-populated with a scenario's fixtures.
    pub fn for_scenario(store: &'a FixtureStore, scenario: &Scenario) -> Self {
        Self {
            store,
            base: scenario.base.clone(),
            overlays: scenario.overlays.clone(),
            keep: false,
        }
    }

    /// Place the base fixture under a workspace-relative directory.
    pub fn base_dest(mut self, dest: impl Into<PathBuf>) -> Self {
        self.base.dest = Some(dest.into());
        self
    }

    pub fn overlay(mut self, path: impl Into<PathBuf>, fixture: FixtureRef) -> Self {
        self.overlays.push(Overlay {
            path: path.into(),
            fixture,
        });
        self
    }

    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Materialize the workspace.
    ///
    /// # Errors
    ///
    /// - `FixtureNotFound` when the base or an overlay fixture is missing.
    /// - `WorkspaceIo` on invalid destination paths or any filesystem failure.
    pub fn build(self) -> Result<Workspace> {
        let base_src = self.store.resolve(&self.base.fixture)?;
        let base_dest = match &self.base.dest {
            Some(dest) => Some(checked_relative(dest)?),
            None => None,
        };

        let mut overlays = Vec::with_capacity(self.overlays.len());
        for overlay in &self.overlays {
            let src = self.store.resolve(&overlay.fixture)?;
            if !src.is_file() {
                return Err(EvalError::WorkspaceIo {
                    path: src,
                    reason: "overlay fixture must be a file".to_string(),
                });
            }
            overlays.push((checked_relative(&overlay.path)?, src));
        }

        let tmp = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir()
            .map_err(|e| io_error(&std::env::temp_dir(), e))?;
        let root = tmp.path().to_path_buf();

        let base_root = match &base_dest {
            Some(dest) => root.join(dest),
            None => root.clone(),
        };
        if base_src.is_dir() {
            copy_tree(&base_src, &base_root)?;
        } else {
            let file_name = base_src.file_name().ok_or_else(|| EvalError::WorkspaceIo {
                path: base_src.clone(),
                reason: "base fixture has no file name".to_string(),
            })?;
            write_file(&base_src, &base_root.join(file_name))?;
        }

        for (rel, src) in &overlays {
            write_file(src, &root.join(rel))?;
            debug!(overlay = %rel.display(), "overlay written");
        }

        let dir = if self.keep {
            let path = tmp.keep();
            info!(workspace = %path.display(), "workspace kept for debugging");
            WorkspaceDir::Kept(path)
        } else {
            WorkspaceDir::Temp(tmp)
        };
        let workspace = Workspace { dir };
        info!(
            workspace = %workspace.path().display(),
            base = %self.base.fixture,
            overlays = overlays.len(),
            "workspace built"
        );
        Ok(workspace)
    }
}

fn is_safe_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn checked_relative(path: &Path) -> Result<PathBuf> {
    if !is_safe_relative(path) {
        return Err(EvalError::WorkspaceIo {
            path: path.to_path_buf(),
            reason: "path must be relative and stay inside the workspace".to_string(),
        });
    }
    Ok(path.to_path_buf())
}

fn io_error(path: &Path, err: std::io::Error) -> EvalError {
    EvalError::WorkspaceIo {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn write_file(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    fs::copy(src, dest).map_err(|e| io_error(dest, e))?;
    Ok(())
}

fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| io_error(dest, e))?;
    let entries = fs::read_dir(src).map_err(|e| io_error(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_error(src, e))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|e| io_error(&to, e))?;
        }
    }
    Ok(())
}
