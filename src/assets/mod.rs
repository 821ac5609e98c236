//! Mesh file loading
//!
//! Two on-disk formats produce the same flat vertex/index arrays:
//! - `.obj` text files (positions, uvs, normals, triangle faces)
//! - `.mesh` binary files with a declared attribute layout

pub mod mesh_file;
pub mod obj;

use bytemuck::{Pod, Zeroable};
use std::path::Path;
use thiserror::Error;

pub use mesh_file::VertexAttribute;
pub use obj::ObjectBufferData;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("Line {line}: {kind} index {index} out of range ({available} available)")]
    IndexOutOfRange {
        line: usize,
        kind: &'static str,
        index: i64,
        available: usize,
    },
    #[error("Unknown vertex attribute kind {0}")]
    UnknownAttribute(u8),
    #[error("Mesh data truncated: {0}")]
    Truncated(&'static str),
    #[error("Unsupported vertex layout {0:?}, expected position/uv/normal")]
    UnsupportedLayout(Vec<VertexAttribute>),
    #[error("Index {index} out of range ({vertex_count} vertices)")]
    IndexBeyondVertices { index: u32, vertex_count: usize },
    #[error("{what} of {count} does not fit the mesh header")]
    TooLarge { what: &'static str, count: usize },
    #[error("Unrecognized mesh file extension: {0:?}")]
    UnknownExtension(String),
}

/// Interleaved vertex matching the pipeline's single vertex binding
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
}

/// Load a mesh by extension: `.obj` as text, `.mesh` as binary
pub fn load_mesh_asset(path: &Path) -> Result<ObjectBufferData, MeshError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match extension.as_str() {
        "obj" => obj::load_obj_file(path),
        "mesh" => mesh_file::load_mesh_file(path)?.into_object_data(),
        other => Err(MeshError::UnknownExtension(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::mesh_file::{MeshBufferData, INTERLEAVED_LAYOUT};
    use std::fs::{self, File};
    use std::path::PathBuf;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("orbit-viewer-{}-{}", std::process::id(), name))
    }

    #[test]
    fn shipped_cube_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/cube.obj");
        let data = load_mesh_asset(&path).unwrap();
        // 6 faces x 4 corners, each with its own face normal
        assert_eq!(data.vertices.len(), 24);
        assert_eq!(data.indices.len(), 36);
    }

    #[test]
    fn mesh_extension_loads_binary_file() {
        let mesh = MeshBufferData {
            attributes: INTERLEAVED_LAYOUT.to_vec(),
            vertices: vec![
                0.0, 0.5, 0.0, 0.5, 0.0, 0.0, 0.0, 1.0, //
                -0.5, -0.5, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, //
                0.5, -0.5, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0,
            ],
            indices: vec![0, 1, 2],
        };
        let path = scratch_path("triangle.mesh");
        mesh.write_to(File::create(&path).unwrap()).unwrap();

        let loaded = load_mesh_asset(&path);
        fs::remove_file(&path).unwrap();

        let data = loaded.unwrap();
        assert_eq!(data.vertices.len(), 3);
        assert_eq!(data.vertices[2].position, [0.5, -0.5, 0.0]);
        assert_eq!(data.indices, vec![0, 1, 2]);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_mesh_asset(&scratch_path("absent.obj")).unwrap_err();
        assert!(matches!(err, MeshError::Io(_)));
    }

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::align_of::<Vertex>(), 4);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = load_mesh_asset(Path::new("model.fbx")).unwrap_err();
        assert!(matches!(err, MeshError::UnknownExtension(ref e) if e == "fbx"));
    }
}
