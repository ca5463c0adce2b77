//! Dependency resolution.
//!
//! Builds a dependency graph for one module — from its plan file or from
//! `-- requires:` headers inside its deploy scripts — classifies every
//! reference as local, cross-module, or external-native, optionally
//! resolves tag references to concrete change names, and emits a stable
//! topological order.
//!
//! Cross-module references are kept as symbolic edges and never expanded
//! here; the orchestrator resolves each referenced module's own graph and
//! installs it first.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::PLAN_FILE;
use crate::error::ResolveError;
use crate::plan::{Plan, parse_plan_file_simple};
use crate::reference::ChangeRef;
use crate::script::requires_from_script;
use crate::workspace::ModuleMap;

/// How tag references are rewritten during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagResolution {
    /// Pass tag tokens through untouched; the caller handles them.
    #[default]
    None,
    /// Substitute each tag with the change it marks. Same-project
    /// references lose their prefix; cross-module ones keep it.
    Internal,
    /// Like `Internal`, and additionally record every original tag
    /// reference with its fully qualified resolution.
    Resolve,
}

/// Where dependency edges are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencySource {
    /// The plan file's bracketed dependency lists.
    #[default]
    Plan,
    /// `-- requires:` header comments inside each deploy script.
    Sql,
}

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub tag_resolution: TagResolution,
    pub source: DependencySource,
    /// Load cross-module plan files eagerly so cross-project tag
    /// references can be substituted.
    pub load_plan_files: bool,
    /// Workspace module map. Empty means standalone: cross-module
    /// references stay symbolic instead of erroring.
    pub modules: ModuleMap,
}

/// Output of resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyResult {
    /// Local change names in dependency order, ties in plan order.
    pub resolved: Vec<String>,
    /// Native extension names, deduplicated, in first-seen order.
    pub external: Vec<String>,
    /// Canonical script key (`/deploy/<name>.sql`) to its normalized
    /// direct dependency list.
    pub deps: BTreeMap<String, Vec<String>>,
    /// Original tag reference to its `project:change` resolution.
    /// Populated only in [`TagResolution::Resolve`] mode.
    pub resolved_tags: BTreeMap<String, String>,
}

/// Extensions satisfied by the database rather than a module.
pub const NATIVE_EXTENSIONS: &[&str] = &[
    "plpgsql",
    "uuid-ossp",
    "pgcrypto",
    "citext",
    "hstore",
    "ltree",
    "pg_trgm",
    "btree_gin",
    "btree_gist",
    "intarray",
    "unaccent",
    "tablefunc",
    "postgis",
];

pub fn is_native_extension(name: &str) -> bool {
    NATIVE_EXTENSIONS.contains(&name)
}

struct Node {
    name: String,
    raw_deps: Vec<String>,
}

/// Resolve a module on disk. `module_dir` must hold a `slipway.plan`
/// (and, for [`DependencySource::Sql`], a `deploy/` tree).
pub fn resolve_dependencies(
    module_dir: &Path,
    module_name: &str,
    opts: &ResolveOptions,
) -> Result<DependencyResult, ResolveError> {
    let plan_path = module_dir.join(PLAN_FILE);
    let plan = if plan_path.exists() {
        Some(parse_plan_file_simple(&plan_path)?)
    } else {
        None
    };

    let nodes = match opts.source {
        DependencySource::Plan => {
            let plan = plan.as_ref().ok_or_else(|| ResolveError::EmptyModule {
                module: module_name.to_string(),
                path: module_dir.to_path_buf(),
            })?;
            plan.changes
                .iter()
                .map(|c| Node {
                    name: c.name.clone(),
                    raw_deps: c.dependencies.clone(),
                })
                .collect()
        }
        DependencySource::Sql => scan_deploy_scripts(module_dir, module_name)?,
    };

    let cross_plans = if opts.load_plan_files {
        load_cross_plans(&nodes, module_name, opts)?
    } else {
        BTreeMap::new()
    };

    resolve_nodes(nodes, module_name, plan.as_ref(), &cross_plans, opts)
}

/// Resolve an in-memory plan. Cross-module plans, when already loaded,
/// are passed in keyed by project name.
pub fn resolve_plan(
    plan: &Plan,
    module_name: &str,
    cross_plans: &BTreeMap<String, Plan>,
    opts: &ResolveOptions,
) -> Result<DependencyResult, ResolveError> {
    let nodes = plan
        .changes
        .iter()
        .map(|c| Node {
            name: c.name.clone(),
            raw_deps: c.dependencies.clone(),
        })
        .collect();
    resolve_nodes(nodes, module_name, Some(plan), cross_plans, opts)
}

/// Walk `deploy/` collecting one node per script, names relative to the
/// deploy root without the `.sql` suffix. Directory entries are sorted
/// at every level so enumeration order is deterministic.
fn scan_deploy_scripts(module_dir: &Path, module_name: &str) -> Result<Vec<Node>, ResolveError> {
    let deploy_dir = module_dir.join("deploy");
    let mut nodes = Vec::new();
    if deploy_dir.is_dir() {
        walk_sorted(&deploy_dir, &deploy_dir, &mut nodes)?;
    }
    if nodes.is_empty() {
        return Err(ResolveError::EmptyModule {
            module: module_name.to_string(),
            path: module_dir.to_path_buf(),
        });
    }
    Ok(nodes)
}

fn walk_sorted(root: &Path, dir: &Path, nodes: &mut Vec<Node>) -> Result<(), ResolveError> {
    let read = |p: &Path| {
        std::fs::read_dir(p).map_err(|source| ResolveError::Io {
            path: p.to_path_buf(),
            source,
        })
    };
    let mut entries: Vec<_> = read(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            walk_sorted(root, &path, nodes)?;
        } else if path.extension().is_some_and(|e| e == "sql") {
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            let name = rel.with_extension("").to_string_lossy().replace('\\', "/");
            let sql = std::fs::read_to_string(&path).map_err(|source| ResolveError::Io {
                path: path.clone(),
                source,
            })?;
            nodes.push(Node {
                name,
                raw_deps: requires_from_script(&sql),
            });
        }
    }
    Ok(())
}

/// Pre-load plans of every module referenced by a cross-project tag, so
/// those tags can be substituted during normalization.
fn load_cross_plans(
    nodes: &[Node],
    module_name: &str,
    opts: &ResolveOptions,
) -> Result<BTreeMap<String, Plan>, ResolveError> {
    let mut plans = BTreeMap::new();
    for node in nodes {
        for raw in &node.raw_deps {
            let Some(ChangeRef::CrossModuleTag { project, .. }) = ChangeRef::parse(raw) else {
                continue;
            };
            if project == module_name || plans.contains_key(&project) {
                continue;
            }
            if let Some(info) = opts.modules.get(&project) {
                plans.insert(project, parse_plan_file_simple(&info.path.join(PLAN_FILE))?);
            }
        }
    }
    Ok(plans)
}

fn resolve_nodes(
    nodes: Vec<Node>,
    module_name: &str,
    plan: Option<&Plan>,
    cross_plans: &BTreeMap<String, Plan>,
    opts: &ResolveOptions,
) -> Result<DependencyResult, ResolveError> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.name.as_str(), i))
        .collect();

    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut result = DependencyResult::default();

    for (i, node) in nodes.iter().enumerate() {
        let mut normalized = Vec::with_capacity(node.raw_deps.len());
        for raw in &node.raw_deps {
            let reference = ChangeRef::parse(raw)
                .ok_or_else(|| ResolveError::InvalidReference(raw.clone()))?;
            // Same-project qualified references collapse to their bare form.
            let reference = match reference {
                ChangeRef::CrossModule { project, name } if project == module_name => {
                    ChangeRef::Local { name }
                }
                ChangeRef::CrossModuleTag { project, tag } if project == module_name => {
                    ChangeRef::Tag { tag }
                }
                other => other,
            };

            match reference {
                ChangeRef::Local { name } => {
                    if let Some(&dep_idx) = index.get(name.as_str()) {
                        edges[i].push(dep_idx);
                        normalized.push(name);
                    } else if opts.modules.contains_key(&name) {
                        // A bare module name: module-level edge, ordered by
                        // the orchestrator, not by this graph.
                        normalized.push(name);
                    } else if is_native_extension(&name) {
                        if !result.external.contains(&name) {
                            result.external.push(name.clone());
                        }
                        normalized.push(name);
                    } else {
                        return Err(module_not_found(&name, &index, opts));
                    }
                }
                ChangeRef::Tag { tag } => {
                    let target = local_tag_target(plan, module_name, &tag)?;
                    if let Some(&dep_idx) = index.get(target.as_str()) {
                        edges[i].push(dep_idx);
                    }
                    match opts.tag_resolution {
                        TagResolution::None => normalized.push(raw.clone()),
                        TagResolution::Internal => normalized.push(target.clone()),
                        TagResolution::Resolve => {
                            result
                                .resolved_tags
                                .insert(raw.clone(), format!("{module_name}:{target}"));
                            normalized.push(target.clone());
                        }
                    }
                }
                ChangeRef::CrossModule { project, name } => {
                    if !opts.modules.is_empty() && !opts.modules.contains_key(&project) {
                        return Err(module_not_found(&format!("{project}:{name}"), &index, opts));
                    }
                    normalized.push(format!("{project}:{name}"));
                }
                ChangeRef::CrossModuleTag { project, tag } => {
                    if !opts.modules.is_empty() && !opts.modules.contains_key(&project) {
                        return Err(module_not_found(&format!("{project}:@{tag}"), &index, opts));
                    }
                    match (opts.tag_resolution, cross_plans.get(&project)) {
                        (TagResolution::None, _) | (_, None) => normalized.push(raw.clone()),
                        (mode, Some(cross)) => {
                            let target = cross.tagged_change(&tag).map(|c| c.name.clone()).ok_or(
                                ResolveError::TagNotFound {
                                    project: project.clone(),
                                    tag: tag.clone(),
                                },
                            )?;
                            let qualified = format!("{project}:{target}");
                            if mode == TagResolution::Resolve {
                                result.resolved_tags.insert(raw.clone(), qualified.clone());
                            }
                            normalized.push(qualified);
                        }
                    }
                }
            }
        }
        result.deps.insert(format!("/deploy/{}.sql", node.name), normalized);
    }

    result.resolved = toposort(&nodes, &edges)?;
    Ok(result)
}

fn local_tag_target(
    plan: Option<&Plan>,
    module_name: &str,
    tag: &str,
) -> Result<String, ResolveError> {
    plan.and_then(|p| p.tagged_change(tag))
        .map(|c| c.name.clone())
        .ok_or_else(|| ResolveError::TagNotFound {
            project: module_name.to_string(),
            tag: tag.to_string(),
        })
}

fn module_not_found(
    reference: &str,
    local: &HashMap<&str, usize>,
    opts: &ResolveOptions,
) -> ResolveError {
    let candidates = local
        .keys()
        .copied()
        .chain(opts.modules.keys().map(|s| s.as_str()))
        .chain(NATIVE_EXTENSIONS.iter().copied());
    let best = candidates
        .map(|c| (c, strsim::jaro_winkler(reference, c)))
        .filter(|(_, score)| *score > 0.85)
        .max_by(|a, b| a.1.total_cmp(&b.1));
    let suggestion = match best {
        Some((name, _)) => format!(" Did you mean \"{name}\"?"),
        None => String::new(),
    };
    ResolveError::ModuleNotFound {
        reference: reference.to_string(),
        suggestion,
    }
}

/// Depth-first topological sort. Nodes are visited in enumeration order
/// and dependency lists in written order, so independent nodes keep their
/// plan order and reruns are deterministic.
fn toposort(nodes: &[Node], edges: &[Vec<usize>]) -> Result<Vec<String>, ResolveError> {
    const UNSEEN: u8 = 0;
    const ACTIVE: u8 = 1;
    const DONE: u8 = 2;

    fn visit(
        at: usize,
        nodes: &[Node],
        edges: &[Vec<usize>],
        state: &mut [u8],
        order: &mut Vec<String>,
    ) -> Result<(), ResolveError> {
        state[at] = ACTIVE;
        for &dep in &edges[at] {
            match state[dep] {
                DONE => {}
                ACTIVE => {
                    return Err(ResolveError::CircularReference {
                        from: nodes[at].name.clone(),
                        to: nodes[dep].name.clone(),
                    });
                }
                _ => visit(dep, nodes, edges, state, order)?,
            }
        }
        state[at] = DONE;
        order.push(nodes[at].name.clone());
        Ok(())
    }

    let mut state = vec![UNSEEN; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());
    for i in 0..nodes.len() {
        if state[i] == UNSEEN {
            visit(i, nodes, edges, &mut state, &mut order)?;
        }
    }
    Ok(order)
}
