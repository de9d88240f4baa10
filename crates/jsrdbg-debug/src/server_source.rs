//! Line mapping between the merged source the engine executes and the local
//! files it was assembled from.
//!
//! The engine concatenates the main script with its imports, separating them
//! with marker comments of the form `//# <offset> <name>`. Server lines are
//! 1-based; chunk starts are 0-based indices of the line preceding the chunk's
//! first line, so `server_line - start` is the chunk-local line.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub name: String,
    pub start: usize,
    pub len: usize,
}

/// A line within one local file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalPosition {
    pub name: String,
    pub line: usize,
}

impl LocalPosition {
    pub fn new(name: impl Into<String>, line: usize) -> Self {
        Self {
            name: name.into(),
            line,
        }
    }
}

/// Ordered, non-overlapping chunks of a merged server source. Never empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerSource {
    chunks: Vec<Chunk>,
}

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*//#\s*(\d+)\s+([\w\-.#]+)").expect("valid regex"))
}

impl ServerSource {
    /// Split `lines` at marker comments.
    ///
    /// `main_name` names the synthetic leading chunk. With
    /// `debug_statement_injected`, the engine has placed one extra statement
    /// after each marker, so imported chunks begin one line later; the main
    /// chunk is unaffected.
    pub fn from_sources<S: AsRef<str>>(
        main_name: &str,
        lines: &[S],
        debug_statement_injected: bool,
    ) -> Self {
        let re = marker_regex();
        let skip = if debug_statement_injected { 2 } else { 1 };

        let mut chunks = vec![Chunk {
            name: main_name.to_owned(),
            start: 0,
            len: 0,
        }];

        for (index, line) in lines.iter().enumerate() {
            let Some(caps) = re.captures(line.as_ref()) else {
                continue;
            };
            if let Some(last) = chunks.last_mut() {
                last.len = index.saturating_sub(last.start);
            }
            chunks.push(Chunk {
                name: caps[2].to_owned(),
                start: index + skip,
                len: 0,
            });
        }

        if let Some(last) = chunks.last_mut() {
            last.len = lines.len().saturating_sub(last.start);
        }

        tracing::debug!(
            target: "jsrdbg.debug",
            main = main_name,
            chunks = chunks.len(),
            "parsed server source"
        );
        Self { chunks }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn main_name(&self) -> &str {
        &self.chunks[0].name
    }

    /// Map a server line to the file and line it came from.
    ///
    /// The first line of a chunk is reported as line 1, never 0. A line no
    /// chunk covers maps to line 1 of the main chunk.
    pub fn to_local_position(&self, server_line: usize) -> LocalPosition {
        let found = self
            .chunks
            .iter()
            .find(|chunk| chunk.start <= server_line && server_line <= chunk.start + chunk.len);

        match found {
            Some(chunk) => LocalPosition::new(chunk.name.clone(), (server_line - chunk.start).max(1)),
            None => {
                tracing::warn!(
                    target: "jsrdbg.debug",
                    server_line,
                    chunks = self.chunks.len(),
                    "server line is outside every chunk; reporting main chunk line 1"
                );
                LocalPosition::new(self.main_name(), 1)
            }
        }
    }

    /// Map a local position back to a server line. Unknown files keep their
    /// line unchanged.
    pub fn to_remote_line(&self, position: &LocalPosition) -> usize {
        match self.chunks.iter().find(|chunk| chunk.name == position.name) {
            Some(chunk) => chunk.start + position.line,
            None => {
                tracing::warn!(
                    target: "jsrdbg.debug",
                    name = %position.name,
                    line = position.line,
                    "no chunk for source; using the local line"
                );
                position.line
            }
        }
    }
}
