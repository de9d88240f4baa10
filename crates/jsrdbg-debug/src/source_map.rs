use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{DebugError, DebugResult};
use crate::server_source::{LocalPosition, ServerSource};

/// A local file (or a synthetic, path-less source) backing a remote script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalSource {
    pub path: Option<PathBuf>,
    pub name: String,
    /// Names a remote path may use for this file: the base name with and
    /// without its extension.
    pub aliases: Vec<String>,
    /// `0` resolves through `path`; anything else is a handle the client
    /// passes back to fetch the content.
    pub source_reference: u32,
}

impl LocalSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            aliases: aliases_for(&path),
            path: Some(path),
            name,
            source_reference: 0,
        }
    }

    /// A source with no local file. [`SourceMap::set_source`] assigns its
    /// handle.
    pub fn synthetic(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            aliases: aliases_for(Path::new(&name)),
            path: None,
            name,
            source_reference: 0,
        }
    }

    pub fn read_lines(&self) -> DebugResult<Vec<String>> {
        let Some(path) = &self.path else {
            return Err(DebugError::SourceRead {
                path: self.name.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "source has no local file",
                ),
            });
        };
        let text = std::fs::read_to_string(path).map_err(|source| DebugError::SourceRead {
            path: path.display().to_string(),
            source,
        })?;
        Ok(text.lines().map(str::to_owned).collect())
    }
}

fn aliases_for(path: &Path) -> Vec<String> {
    let mut aliases = Vec::new();
    if let Some(name) = path.file_name() {
        aliases.push(name.to_string_lossy().into_owned());
    }
    if let Some(stem) = path.file_stem() {
        let stem = stem.to_string_lossy().into_owned();
        if !aliases.contains(&stem) {
            aliases.push(stem);
        }
    }
    aliases
}

/// Remote script names to local sources, plus the active merged
/// [`ServerSource`].
#[derive(Debug, Default)]
pub struct SourceMap {
    sources: BTreeMap<String, LocalSource>,
    server_source: Option<ServerSource>,
    next_reference: u32,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` under `remote_name`, replacing any previous entry.
    /// Path-less sources receive a fresh positive `source_reference`.
    pub fn set_source(&mut self, remote_name: impl Into<String>, mut source: LocalSource) {
        if source.path.is_none() && source.source_reference == 0 {
            self.next_reference = self.next_reference.saturating_add(1);
            source.source_reference = self.next_reference;
        }
        self.sources.insert(remote_name.into(), source);
    }

    pub fn remove(&mut self, remote_name: &str) -> Option<LocalSource> {
        self.sources.remove(remote_name)
    }

    pub fn clear(&mut self) {
        self.sources.clear();
        self.server_source = None;
    }

    pub fn get_local(&self, remote_name: &str) -> Option<&LocalSource> {
        self.sources.get(remote_name)
    }

    pub fn by_source_reference(&self, reference: u32) -> Option<(&str, &LocalSource)> {
        if reference == 0 {
            return None;
        }
        self.sources
            .iter()
            .find(|(_, source)| source.source_reference == reference)
            .map(|(name, source)| (name.as_str(), source))
    }

    /// The remote name for a local file.
    ///
    /// Tries an exact path match, then the file's base name against every
    /// source's aliases, then gives up and returns the path itself.
    pub fn to_remote_name(&self, local_path: &Path) -> String {
        if let Some((name, _)) = self
            .sources
            .iter()
            .find(|(_, source)| source.path.as_deref() == Some(local_path))
        {
            return name.clone();
        }

        let wanted = aliases_for(local_path);
        if let Some((name, _)) = self.sources.iter().find(|(_, source)| {
            source
                .aliases
                .iter()
                .any(|alias| wanted.iter().any(|w| w == alias))
        }) {
            tracing::debug!(
                target: "jsrdbg.debug",
                path = %local_path.display(),
                remote = %name,
                "matched local source by alias"
            );
            return name.clone();
        }

        tracing::warn!(
            target: "jsrdbg.debug",
            path = %local_path.display(),
            "no remote source for local file; using its path"
        );
        local_path.display().to_string()
    }

    pub fn server_source(&self) -> Option<&ServerSource> {
        self.server_source.as_ref()
    }

    pub fn set_server_source(&mut self, server_source: ServerSource) {
        self.server_source = Some(server_source);
    }

    /// Where a server line lives locally. Without a merged server source the
    /// line is already local to `remote_name`.
    pub fn to_local_position(&self, remote_name: &str, server_line: usize) -> LocalPosition {
        match &self.server_source {
            Some(server_source) => server_source.to_local_position(server_line),
            None => LocalPosition::new(remote_name, server_line),
        }
    }

    pub fn to_remote_line(&self, position: &LocalPosition) -> usize {
        match &self.server_source {
            Some(server_source) => server_source.to_remote_line(position),
            None => position.line,
        }
    }
}
