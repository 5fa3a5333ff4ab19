//! The server build artifact and how it is loaded.
//!
//! The build is produced by a separate build step and consumed as-is. A
//! [`BuildLoader`] is injected wherever a build is needed; [`BuildSource`]
//! adds the per-mode caching policy on top.

use crate::error::BuildError;
use crate::mode::Mode;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// One route of the compiled route tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteManifest {
    pub id: String,
    pub parent_id: Option<String>,
    pub path: Option<String>,
    #[serde(default)]
    pub index: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    /// Module implementing the route.
    #[serde(default)]
    pub module: String,
}

/// Default render entry point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EntryModule {
    pub module: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AssetsEntry {
    pub module: String,
    #[serde(default)]
    pub imports: Vec<String>,
}

/// Client bundle manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AssetsManifest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub entry: AssetsEntry,
}

/// The compiled server build.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerBuild {
    #[serde(default)]
    pub routes: BTreeMap<String, RouteManifest>,
    #[serde(default)]
    pub entry: EntryModule,
    #[serde(default)]
    pub assets: AssetsManifest,
    #[serde(default = "default_basename")]
    pub basename: String,
    #[serde(default = "default_public_path")]
    pub public_path: String,
    #[serde(default)]
    pub assets_build_directory: String,
    /// Feature flags.
    #[serde(default)]
    pub future: BTreeMap<String, bool>,
    #[serde(default)]
    pub is_spa_mode: bool,
}

impl Default for ServerBuild {
    fn default() -> Self {
        Self {
            routes: BTreeMap::new(),
            entry: EntryModule::default(),
            assets: AssetsManifest::default(),
            basename: default_basename(),
            public_path: default_public_path(),
            assets_build_directory: String::new(),
            future: BTreeMap::new(),
            is_spa_mode: false,
        }
    }
}

fn default_basename() -> String {
    "/".to_string()
}

fn default_public_path() -> String {
    "/".to_string()
}

/// Resolves the server build.
#[async_trait]
pub trait BuildLoader: Send + Sync {
    async fn load(&self) -> Result<ServerBuild, BuildError>;
}

/// Reads the build manifest from disk on every call.
#[derive(Debug, Clone)]
pub struct FileBuildLoader {
    path: PathBuf,
}

impl FileBuildLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl BuildLoader for FileBuildLoader {
    async fn load(&self) -> Result<ServerBuild, BuildError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| BuildError::Io {
                path: self.path.clone(),
                source,
            })?;
        serde_json::from_slice(&bytes).map_err(|source| BuildError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

/// Always returns the same in-memory build.
#[derive(Debug, Clone, Default)]
pub struct StaticBuildLoader {
    build: ServerBuild,
}

impl StaticBuildLoader {
    pub fn new(build: ServerBuild) -> Self {
        Self { build }
    }
}

#[async_trait]
impl BuildLoader for StaticBuildLoader {
    async fn load(&self) -> Result<ServerBuild, BuildError> {
        Ok(self.build.clone())
    }
}

/// A loader plus the caching policy of the current mode: resolved once in
/// production, re-resolved on every request otherwise so rebuilds show up.
#[derive(Clone)]
pub struct BuildSource {
    loader: Arc<dyn BuildLoader>,
    mode: Mode,
    cached: Arc<OnceCell<Arc<ServerBuild>>>,
}

impl BuildSource {
    pub fn new(loader: Arc<dyn BuildLoader>, mode: Mode) -> Self {
        Self {
            loader,
            mode,
            cached: Arc::new(OnceCell::new()),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub async fn resolve(&self) -> Result<Arc<ServerBuild>, BuildError> {
        if !self.mode.is_production() {
            debug!(mode = %self.mode, "reloading server build");
            return Ok(Arc::new(self.loader.load().await?));
        }
        self.cached
            .get_or_try_init(|| async { self.loader.load().await.map(Arc::new) })
            .await
            .map(Arc::clone)
    }
}

impl std::fmt::Debug for BuildSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildSource")
            .field("mode", &self.mode)
            .field("cached", &self.cached.initialized())
            .finish_non_exhaustive()
    }
}
