//! Workspace discovery and the module map.
//!
//! A workspace is a directory tree whose root `slipway.toml` carries a
//! `[workspace]` section; each module below it is a directory with a
//! `slipway.plan` and an optional `[module]` config section declaring
//! module-level `requires`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::WorkspaceError;
use crate::plan::parse_plan_file_simple;
use crate::resolver::is_native_extension;
use crate::{CONFIG_FILE, PLAN_FILE};

/// Everything the resolver and orchestrator need to know about one
/// module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Module directory (holds the plan and script trees).
    pub path: PathBuf,
    /// Module-level dependencies: other module names or native
    /// extensions.
    pub requires: Vec<String>,
}

/// Module name to its info, for every module in a workspace.
pub type ModuleMap = BTreeMap<String, ModuleInfo>;

/// One entry of a resolved module closure, in install order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosureEntry {
    /// A native extension, satisfied by `CREATE EXTENSION`.
    Extension(String),
    /// A workspace module, satisfied by deploying its changes.
    Module(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    workspace: Option<WorkspaceSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    module: Option<ModuleSection>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WorkspaceSection {
    /// Directories scanned (recursively) for module plans. Empty means
    /// the whole workspace tree.
    #[serde(default)]
    modules: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ModuleSection {
    /// Overrides the plan's `%project` as the module name.
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    requires: Vec<String>,
}

/// A loaded workspace: root directory plus the module map.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub modules: ModuleMap,
}

impl Workspace {
    /// Find the workspace root at or above `dir` and scan its modules.
    pub fn load(dir: &Path) -> Result<Workspace, WorkspaceError> {
        let root = find_root(dir).ok_or_else(|| WorkspaceError::NotFound(dir.to_path_buf()))?;
        let config = read_config(&root.join(CONFIG_FILE))?;
        let scan_dirs: Vec<PathBuf> = match config.workspace {
            Some(ws) if !ws.modules.is_empty() => {
                ws.modules.iter().map(|m| root.join(m)).collect()
            }
            _ => vec![root.clone()],
        };

        let mut modules = ModuleMap::new();
        for scan in scan_dirs {
            if scan.is_dir() {
                scan_modules(&scan, &mut modules)?;
            }
        }
        Ok(Workspace { root, modules })
    }

    /// A single-module pseudo-workspace rooted at the module directory,
    /// for modules living outside any workspace.
    pub fn standalone(dir: &Path) -> Result<Workspace, WorkspaceError> {
        let mut modules = ModuleMap::new();
        scan_modules(dir, &mut modules)?;
        Ok(Workspace { root: dir.to_path_buf(), modules })
    }

    pub fn module(&self, name: &str) -> Result<&ModuleInfo, WorkspaceError> {
        self.modules
            .get(name)
            .ok_or_else(|| WorkspaceError::UnknownModule(name.to_string()))
    }

    /// Resolve a module's full dependency closure, dependencies first,
    /// the target module last. Extensions and modules keep their
    /// positions relative to the `requires` lists that introduce them.
    pub fn module_closure(&self, target: &str) -> Result<Vec<ClosureEntry>, WorkspaceError> {
        self.module(target)?;
        let mut seen: HashSet<String> = HashSet::new();
        let mut active: HashSet<String> = HashSet::new();
        let mut order = Vec::new();
        self.visit_closure(target, &mut seen, &mut active, &mut order)?;
        Ok(order)
    }

    fn visit_closure(
        &self,
        name: &str,
        seen: &mut HashSet<String>,
        active: &mut HashSet<String>,
        order: &mut Vec<ClosureEntry>,
    ) -> Result<(), WorkspaceError> {
        if !seen.insert(name.to_string()) {
            return Ok(());
        }
        active.insert(name.to_string());
        let info = self.module(name)?;
        for req in &info.requires {
            if active.contains(req) {
                return Err(WorkspaceError::CircularReference {
                    from: name.to_string(),
                    to: req.clone(),
                });
            }
            if self.modules.contains_key(req) {
                self.visit_closure(req, seen, active, order)?;
            } else if seen.insert(req.clone()) {
                order.push(ClosureEntry::Extension(req.clone()));
            }
        }
        active.remove(name);
        order.push(ClosureEntry::Module(name.to_string()));
        Ok(())
    }

    /// Rewrite a module's `requires` list. Self-references and edges
    /// that would close a module cycle are rejected before anything is
    /// written.
    pub fn write_requires(&mut self, module: &str, requires: &[String]) -> Result<(), WorkspaceError> {
        let path = self.module(module)?.path.clone();
        for req in requires {
            if req == module {
                return Err(WorkspaceError::CircularReference {
                    from: module.to_string(),
                    to: req.clone(),
                });
            }
            if self.modules.contains_key(req) && self.reaches(req, module) {
                return Err(WorkspaceError::CircularReference {
                    from: module.to_string(),
                    to: req.clone(),
                });
            }
        }

        let config_path = path.join(CONFIG_FILE);
        let mut config = if config_path.exists() {
            read_config(&config_path)?
        } else {
            ConfigFile::default()
        };
        let section = config.module.get_or_insert_with(ModuleSection::default);
        section.requires = requires.to_vec();
        let text = toml::to_string_pretty(&config).map_err(|source| WorkspaceError::ConfigWrite {
            path: config_path.clone(),
            source,
        })?;
        std::fs::write(&config_path, text).map_err(|source| WorkspaceError::Io {
            path: config_path,
            source,
        })?;

        if let Some(info) = self.modules.get_mut(module) {
            info.requires = requires.to_vec();
        }
        Ok(())
    }

    /// Does `from`'s existing requires chain reach `to`?
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from.to_string()];
        let mut seen = HashSet::new();
        while let Some(cur) = stack.pop() {
            if cur == to {
                return true;
            }
            if !seen.insert(cur.clone()) {
                continue;
            }
            if let Some(info) = self.modules.get(&cur) {
                stack.extend(info.requires.iter().cloned());
            }
        }
        false
    }

    /// Module names that are not known modules and not native
    /// extensions — configuration mistakes worth reporting early.
    pub fn unknown_requires(&self) -> Vec<(String, String)> {
        let mut unknown = Vec::new();
        for (name, info) in &self.modules {
            for req in &info.requires {
                if !self.modules.contains_key(req) && !is_native_extension(req) {
                    unknown.push((name.clone(), req.clone()));
                }
            }
        }
        unknown
    }
}

/// Where a command was invoked from, computed once by filesystem
/// probing. Context-specific operations take this value instead of
/// re-probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectContext {
    /// Neither a workspace nor a module.
    Outside,
    /// Inside a workspace tree, not at a module.
    Workspace { root: PathBuf },
    /// A standalone module with no surrounding workspace.
    Module { dir: PathBuf, project: String },
    /// A module below a workspace root.
    ModuleInsideWorkspace {
        root: PathBuf,
        dir: PathBuf,
        project: String,
    },
}

impl ProjectContext {
    pub fn probe(cwd: &Path) -> Result<ProjectContext, WorkspaceError> {
        let plan_path = cwd.join(PLAN_FILE);
        let project = if plan_path.exists() {
            Some(parse_plan_file_simple(&plan_path)?.project)
        } else {
            None
        };
        let root = find_root(cwd);
        Ok(match (root, project) {
            (Some(root), Some(project)) if root != cwd => ProjectContext::ModuleInsideWorkspace {
                root,
                dir: cwd.to_path_buf(),
                project,
            },
            (Some(root), _) => ProjectContext::Workspace { root },
            (None, Some(project)) => ProjectContext::Module {
                dir: cwd.to_path_buf(),
                project,
            },
            (None, None) => ProjectContext::Outside,
        })
    }

    /// The project this context implies, when any.
    pub fn project(&self) -> Option<&str> {
        match self {
            ProjectContext::Module { project, .. }
            | ProjectContext::ModuleInsideWorkspace { project, .. } => Some(project),
            _ => None,
        }
    }
}

/// Nearest ancestor (including `dir`) whose config carries a
/// `[workspace]` section.
fn find_root(dir: &Path) -> Option<PathBuf> {
    let mut cur = Some(dir);
    while let Some(d) = cur {
        let candidate = d.join(CONFIG_FILE);
        if candidate.exists() {
            if let Ok(config) = read_config(&candidate) {
                if config.workspace.is_some() {
                    return Some(d.to_path_buf());
                }
            }
        }
        cur = d.parent();
    }
    None
}

fn read_config(path: &Path) -> Result<ConfigFile, WorkspaceError> {
    let text = std::fs::read_to_string(path).map_err(|source| WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| WorkspaceError::Config {
        path: path.to_path_buf(),
        source,
    })
}

/// Recursively collect module directories (those holding a plan file).
fn scan_modules(dir: &Path, modules: &mut ModuleMap) -> Result<(), WorkspaceError> {
    let plan_path = dir.join(PLAN_FILE);
    if plan_path.exists() {
        let plan = parse_plan_file_simple(&plan_path)?;
        let config_path = dir.join(CONFIG_FILE);
        let (name, requires) = if config_path.exists() {
            let config = read_config(&config_path)?;
            match config.module {
                Some(section) => (section.name.unwrap_or(plan.project), section.requires),
                None => (plan.project, Vec::new()),
            }
        } else {
            (plan.project, Vec::new())
        };
        modules.insert(name, ModuleInfo { path: dir.to_path_buf(), requires });
        return Ok(());
    }
    let entries = std::fs::read_dir(dir).map_err(|source| WorkspaceError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut dirs: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    for sub in dirs {
        // Hidden directories and script trees are never module roots.
        if sub
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'))
        {
            continue;
        }
        scan_modules(&sub, modules)?;
    }
    Ok(())
}
