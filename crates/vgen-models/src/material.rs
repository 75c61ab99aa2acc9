//! Source footage descriptors.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A candidate piece of source footage.
///
/// Produced by a search provider, or built from a local file. `local_path` is
/// filled in once the footage is on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MaterialInfo {
    /// Provider name ("pexels", "pixabay", "local")
    pub provider: String,

    /// Remote URL, or the original path for local materials
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,

    /// Duration in seconds
    #[serde(default)]
    pub duration: f64,

    /// Offset into the source in seconds
    #[serde(default)]
    pub start_time: f64,

    /// Search term that produced this material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_term: Option<String>,
}

impl MaterialInfo {
    /// A material found by a remote search provider.
    pub fn remote(provider: impl Into<String>, url: impl Into<String>, duration: f64) -> Self {
        Self {
            provider: provider.into(),
            url: url.into(),
            local_path: None,
            duration,
            start_time: 0.0,
            search_term: None,
        }
    }

    /// A material that already lives on the local filesystem.
    pub fn local(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            provider: "local".to_string(),
            url: path.to_string_lossy().to_string(),
            local_path: Some(path.to_path_buf()),
            duration: 0.0,
            start_time: 0.0,
            search_term: None,
        }
    }

    pub fn with_search_term(mut self, term: impl Into<String>) -> Self {
        self.search_term = Some(term.into());
        self
    }

    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    pub fn is_local(&self) -> bool {
        self.provider == "local"
    }
}

/// A duration-bounded window of a source file, ready to be normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoSegment {
    source_path: PathBuf,
    start_time: f64,
    duration: f64,
}

impl VideoSegment {
    pub fn new(source_path: impl Into<PathBuf>, start_time: f64, duration: f64) -> Self {
        Self {
            source_path: source_path.into(),
            start_time,
            duration,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Offset into the source in seconds.
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Segment length in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_material() {
        let m = MaterialInfo::local("/data/clip.mp4");
        assert!(m.is_local());
        assert_eq!(m.local_path.as_deref(), Some(Path::new("/data/clip.mp4")));
    }

    #[test]
    fn test_segment_bounds() {
        let seg = VideoSegment::new("/tmp/a.mp4", 5.0, 3.5);
        assert!((seg.end_time() - 8.5).abs() < f64::EPSILON);
        assert_eq!(seg.source_path(), Path::new("/tmp/a.mp4"));
    }
}
