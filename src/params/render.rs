//! Window, frame and shader-source configuration.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ShaderError;

/// Rendering configuration
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Window width (pixels)
    pub window_width: u32,

    /// Window height (pixels)
    pub window_height: u32,

    pub title: String,

    /// Clear colour (linear RGBA)
    pub clear_color: [f64; 4],

    /// Wait for vblank when presenting
    pub vsync: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            window_width: 800,
            window_height: 600,
            title: "wavetap".to_string(),
            clear_color: [0.2, 0.3, 0.3, 1.0],
            vsync: true,
        }
    }
}

/// Locations of the vertex and fragment shader files.
///
/// Both files are read wholesale and handed to the graphics backend verbatim;
/// there is no include or preprocessing step.
#[derive(Debug, Clone)]
pub struct ShaderSources {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderSources {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/default.vert.wgsl"),
            fragment: PathBuf::from("shaders/default.frag.wgsl"),
        }
    }
}

impl ShaderSources {
    /// Read both stages, returning `(vertex, fragment)` source text
    pub fn read(&self) -> Result<(String, String), ShaderError> {
        Ok((read_source(&self.vertex)?, read_source(&self.fragment)?))
    }
}

fn read_source(path: &Path) -> Result<String, ShaderError> {
    fs::read_to_string(path).map_err(|source| ShaderError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_missing_source_reports_path() {
        let sources = ShaderSources {
            vertex: PathBuf::from("does/not/exist.vert.wgsl"),
            fragment: PathBuf::from("does/not/exist.frag.wgsl"),
        };

        match sources.read() {
            Err(ShaderError::Read { path, .. }) => {
                assert_eq!(path, PathBuf::from("does/not/exist.vert.wgsl"));
            }
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[test]
    fn test_read_returns_verbatim_text() {
        let dir = tempfile::tempdir().unwrap();
        let vertex = dir.path().join("a.vert.wgsl");
        let fragment = dir.path().join("a.frag.wgsl");
        fs::write(&vertex, "// vertex\n").unwrap();
        fs::write(&fragment, "// fragment\r\n").unwrap();

        let (vs, fs_src) = ShaderSources { vertex, fragment }.read().unwrap();
        assert_eq!(vs, "// vertex\n");
        assert_eq!(fs_src, "// fragment\r\n");
    }
}
