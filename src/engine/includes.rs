//! Include resolution engine.
//!
//! Recursively fetches and merges externally referenced configuration
//! fragments. Resolution is strictly depth-first in declaration order: a
//! nested include's entire subtree is fully resolved before the next sibling
//! begins. That sequential discipline is load-bearing: the cycle-detection
//! chain and the content cache are plain unsynchronized maps.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use log::{debug, warn};
use serde_yaml::{Mapping, Value};

use crate::adapters::{normalize_path, FileSystem, HttpFetcher, RegistryApi};
use crate::config::ParserOptions;
use crate::document::{self, LineIndex};
use crate::error::CigraphError;
use crate::model::builder::extract_includes;
use crate::model::{
    codes, CircularDependency, CycleKind, FailedInclude, Include, ResolvedInclude,
};

/// Outcome of resolving one document's include list.
#[derive(Debug, Default)]
pub struct IncludeResolution {
    pub resolved: Vec<ResolvedInclude>,
    pub failed: Vec<FailedInclude>,
    pub circular: Vec<CircularDependency>,
    /// All resolved documents deep-merged in discovery order
    pub merged: Mapping,
}

/// What a single include target fetches through.
enum Fetch {
    File(PathBuf),
    Http(String),
    Api {
        project: String,
        file: String,
        ref_: Option<String>,
    },
    /// Capability disabled by policy; carries the explanation
    Disabled(String),
    /// Include kind that can never resolve; carries error + code
    Unsupported(String, &'static str),
}

/// One canonical fetch target derived from an include directive. A single
/// directive can fan out into several targets (`file:` and `project:` take
/// path sequences).
struct Target {
    /// Normalized cycle-detection and cache key
    key: String,
    /// Path or URL as reported in results
    display: String,
    fetch: Fetch,
}

/// Resolves the include graph of one root document.
///
/// The cache is append-only and monotonic for the lifetime of one resolver;
/// callers reusing a resolver across independent parses should
/// [`clear_cache`](Self::clear_cache) between them.
pub struct IncludeResolver<'a> {
    options: &'a ParserOptions,
    fs: &'a dyn FileSystem,
    http: &'a dyn HttpFetcher,
    api: &'a dyn RegistryApi,
    /// Repository root all local include paths resolve against
    base_dir: PathBuf,
    /// Ordered ancestor keys currently being resolved
    chain: Vec<String>,
    /// Canonical key -> raw fetched content
    cache: HashMap<String, String>,
}

impl<'a> IncludeResolver<'a> {
    pub fn new(
        options: &'a ParserOptions,
        fs: &'a dyn FileSystem,
        http: &'a dyn HttpFetcher,
        api: &'a dyn RegistryApi,
        root_file: &Path,
    ) -> Self {
        let root = normalize_path(root_file);
        let base_dir = root.parent().map(Path::to_path_buf).unwrap_or_default();
        let root_key = canonical(&root.to_string_lossy());

        Self {
            options,
            fs,
            http,
            api,
            base_dir,
            chain: vec![root_key],
            cache: HashMap::new(),
        }
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Resolves every include of the root document, recursively following
    /// nested includes up to the configured depth.
    pub async fn resolve_all(&mut self, includes: &[Include]) -> IncludeResolution {
        let mut out = IncludeResolution::default();
        for include in includes {
            self.resolve_include(include.clone(), 0, &mut out).await;
        }
        debug!(
            "Include resolution finished: {} resolved, {} failed, {} circular",
            out.resolved.len(),
            out.failed.len(),
            out.circular.len()
        );
        out
    }

    /// Boxed for async recursion through nested includes.
    fn resolve_include<'b>(
        &'b mut self,
        include: Include,
        depth: usize,
        out: &'b mut IncludeResolution,
    ) -> Pin<Box<dyn Future<Output = ()> + 'b>> {
        Box::pin(async move {
            for target in self.targets_for(&include) {
                self.resolve_target(&include, target, depth, out).await;
            }
        })
    }

    async fn resolve_target(
        &mut self,
        include: &Include,
        target: Target,
        depth: usize,
        out: &mut IncludeResolution,
    ) {
        // Cycle check against the ordered ancestor chain; a match aborts
        // only this branch, siblings continue independently.
        if self.chain.contains(&target.key) {
            warn!("Circular include detected at {}", target.display);
            out.circular.push(CircularDependency {
                path: target.display,
                chain: self.chain.clone(),
                kind: CycleKind::Include,
            });
            return;
        }

        // Policy gates come before any I/O.
        match &target.fetch {
            Fetch::Disabled(reason) => {
                out.resolved.push(ResolvedInclude {
                    include: include.clone(),
                    resolved_path: target.display,
                    content: None,
                    document: None,
                    depth,
                    error: Some(reason.clone()),
                });
                return;
            }
            Fetch::Unsupported(reason, code) => {
                out.failed.push(FailedInclude {
                    include: include.clone(),
                    attempted_path: target.display,
                    error: reason.clone(),
                    code: *code,
                    depth,
                });
                return;
            }
            _ => {}
        }

        let content = if let Some(cached) = self.cache.get(&target.key) {
            debug!("Include cache hit: {}", target.key);
            cached.clone()
        } else {
            let fetched = match &target.fetch {
                Fetch::File(path) => {
                    if self.fs.exists(path).await {
                        self.fs.read_file(path).await
                    } else {
                        Err(CigraphError::Config(format!(
                            "include file not found: {}",
                            path.display()
                        )))
                    }
                }
                Fetch::Http(url) => self.http.fetch(url).await,
                Fetch::Api {
                    project,
                    file,
                    ref_,
                } => {
                    self.api
                        .fetch_project_file(project, file, ref_.as_deref())
                        .await
                }
                Fetch::Disabled(_) | Fetch::Unsupported(..) => unreachable!(),
            };
            match fetched {
                Ok(content) => {
                    self.cache.insert(target.key.clone(), content.clone());
                    content
                }
                Err(err) => {
                    out.failed.push(FailedInclude {
                        include: include.clone(),
                        attempted_path: target.display,
                        error: err.to_string(),
                        code: codes::INCLUDE_RESOLUTION_FAILED,
                        depth,
                    });
                    return;
                }
            }
        };

        let doc = match document::parse(&content, self.options.strict_yaml) {
            Ok(doc) => doc,
            Err(err) => {
                out.failed.push(FailedInclude {
                    include: include.clone(),
                    attempted_path: target.display,
                    error: format!("included document failed to parse: {err}"),
                    code: codes::INCLUDE_RESOLUTION_FAILED,
                    depth,
                });
                return;
            }
        };

        // Merge in discovery order: this document first, nested ones after
        // (later documents override earlier values).
        if let Some(mapping) = doc.as_mapping() {
            deep_merge(&mut out.merged, mapping);
        }

        let nested = match doc.get("include") {
            Some(value) => {
                let index = LineIndex::new(&content);
                extract_includes(value, &target.display, &index)
            }
            None => Vec::new(),
        };

        out.resolved.push(ResolvedInclude {
            include: include.clone(),
            resolved_path: target.display.clone(),
            content: Some(content),
            document: Some(doc),
            depth,
            error: None,
        });

        if nested.is_empty() {
            return;
        }

        if depth >= self.options.max_include_depth {
            for nested_include in nested {
                out.failed.push(FailedInclude {
                    attempted_path: nested_include.descriptor(),
                    include: nested_include,
                    error: format!(
                        "maximum include depth {} exceeded",
                        self.options.max_include_depth
                    ),
                    code: codes::MAX_DEPTH_EXCEEDED,
                    depth: depth + 1,
                });
            }
            return;
        }

        self.chain.push(target.key);
        for nested_include in nested {
            self.resolve_include(nested_include, depth + 1, out).await;
        }
        self.chain.pop();
    }

    /// Fans an include directive out into its canonical fetch targets.
    fn targets_for(&self, include: &Include) -> Vec<Target> {
        match include {
            Include::Local { path, .. } => vec![self.local_target(path)],
            Include::File { paths, .. } => {
                paths.iter().map(|path| self.local_target(path)).collect()
            }
            Include::Remote { url, .. } => vec![self.remote_target(url.clone())],
            Include::Template { name, .. } => {
                let url = format!(
                    "{}/{}",
                    self.options.template_base_url.trim_end_matches('/'),
                    name
                );
                vec![self.remote_target(url)]
            }
            Include::Project {
                project,
                files,
                ref_,
                ..
            } => {
                if files.is_empty() {
                    return vec![Target {
                        key: canonical(project),
                        display: project.clone(),
                        fetch: Fetch::Unsupported(
                            "project include declares no file".to_string(),
                            codes::INCLUDE_RESOLUTION_FAILED,
                        ),
                    }];
                }
                files
                    .iter()
                    .map(|file| {
                        let display = format!(
                            "{}@{}:{}",
                            project,
                            ref_.as_deref().unwrap_or("HEAD"),
                            file
                        );
                        let fetch = if self.options.resolve_project {
                            Fetch::Api {
                                project: project.clone(),
                                file: file.clone(),
                                ref_: ref_.clone(),
                            }
                        } else {
                            Fetch::Disabled(
                                "project include resolution is disabled (enable resolve-project)"
                                    .to_string(),
                            )
                        };
                        Target {
                            key: canonical(&display),
                            display,
                            fetch,
                        }
                    })
                    .collect()
            }
            Include::Component { component, .. } => vec![Target {
                key: canonical(component),
                display: component.clone(),
                fetch: Fetch::Unsupported(
                    "component includes are not supported".to_string(),
                    codes::COMPONENT_UNSUPPORTED,
                ),
            }],
        }
    }

    fn local_target(&self, path: &str) -> Target {
        // Local include paths are repository-root relative.
        let resolved = self
            .fs
            .resolve_path(&self.base_dir, path.trim_start_matches('/'));
        Target {
            key: canonical(&resolved.to_string_lossy()),
            display: resolved.to_string_lossy().into_owned(),
            fetch: Fetch::File(resolved),
        }
    }

    fn remote_target(&self, url: String) -> Target {
        let fetch = if self.options.resolve_remote {
            Fetch::Http(url.clone())
        } else {
            Fetch::Disabled(
                "remote include resolution is disabled (enable resolve-remote)".to_string(),
            )
        };
        Target {
            key: canonical(&url),
            display: url,
            fetch,
        }
    }
}

/// Case-folded key used for cycle detection and content caching.
fn canonical(key: &str) -> String {
    key.to_lowercase()
}

/// Deep merge: mapping keys merge recursively, any other value from the
/// overlay overrides the base.
pub fn deep_merge(base: &mut Mapping, overlay: &Mapping) {
    for (key, value) in overlay {
        let merged_nested = match (base.get_mut(key), value) {
            (Some(Value::Mapping(base_nested)), Value::Mapping(overlay_nested)) => {
                deep_merge(base_nested, overlay_nested);
                true
            }
            _ => false,
        };
        if !merged_nested {
            base.insert(key.clone(), value.clone());
        }
    }
}
