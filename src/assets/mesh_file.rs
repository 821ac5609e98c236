//! Binary `.mesh` format
//!
//! Layout, all little-endian:
//! ```text
//! u8            attribute count
//! u8 * count    attribute kinds (0 = position, 1 = uv, 2 = normal)
//! u32           vertex count
//! u32           index count
//! f32 * (vertex count * stride)
//! u32 * index count
//! ```
//! where stride is the summed component count of the declared attributes.

use super::{MeshError, ObjectBufferData, Vertex};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

/// Header counts are untrusted; reserve at most this many elements up front
const MAX_RESERVE: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VertexAttribute {
    Position = 0,
    Uv = 1,
    Normal = 2,
}

impl VertexAttribute {
    pub fn components(self) -> usize {
        match self {
            VertexAttribute::Position => 3,
            VertexAttribute::Uv => 2,
            VertexAttribute::Normal => 3,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, MeshError> {
        match byte {
            0 => Ok(VertexAttribute::Position),
            1 => Ok(VertexAttribute::Uv),
            2 => Ok(VertexAttribute::Normal),
            other => Err(MeshError::UnknownAttribute(other)),
        }
    }
}

/// The layout the fixed pipeline consumes
pub const INTERLEAVED_LAYOUT: [VertexAttribute; 3] = [
    VertexAttribute::Position,
    VertexAttribute::Uv,
    VertexAttribute::Normal,
];

/// Flat float vertex stream with its declared attribute layout
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MeshBufferData {
    pub attributes: Vec<VertexAttribute>,
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
}

impl MeshBufferData {
    /// Floats per vertex
    pub fn stride(&self) -> usize {
        stride_of(&self.attributes)
    }

    pub fn vertex_count(&self) -> usize {
        match self.stride() {
            0 => 0,
            stride => self.vertices.len() / stride,
        }
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, MeshError> {
        let attribute_count = read_array::<_, 1>(&mut reader, "attribute count")?[0];

        let mut kinds = vec![0u8; attribute_count as usize];
        read_exact(&mut reader, &mut kinds, "attribute kinds")?;
        let attributes = kinds
            .into_iter()
            .map(VertexAttribute::from_byte)
            .collect::<Result<Vec<_>, _>>()?;

        let vertex_count = u32::from_le_bytes(read_array(&mut reader, "vertex count")?) as usize;
        let index_count = u32::from_le_bytes(read_array(&mut reader, "index count")?) as usize;

        let float_count = vertex_count
            .checked_mul(stride_of(&attributes))
            .ok_or(MeshError::TooLarge { what: "vertex data", count: vertex_count })?;
        let mut vertices = Vec::with_capacity(float_count.min(MAX_RESERVE));
        for _ in 0..float_count {
            vertices.push(f32::from_le_bytes(read_array(&mut reader, "vertex data")?));
        }

        let mut indices = Vec::with_capacity(index_count.min(MAX_RESERVE));
        for _ in 0..index_count {
            indices.push(u32::from_le_bytes(read_array(&mut reader, "index data")?));
        }

        Ok(Self { attributes, vertices, indices })
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), MeshError> {
        let stride = self.stride();
        if stride == 0 || self.vertices.len() % stride != 0 {
            return Err(MeshError::Parse {
                line: 0,
                message: format!(
                    "{} floats do not divide into stride {}",
                    self.vertices.len(),
                    stride
                ),
            });
        }

        let attribute_count = u8::try_from(self.attributes.len())
            .map_err(|_| MeshError::TooLarge { what: "attribute count", count: self.attributes.len() })?;
        let vertex_count = u32::try_from(self.vertex_count())
            .map_err(|_| MeshError::TooLarge { what: "vertex count", count: self.vertex_count() })?;
        let index_count = u32::try_from(self.indices.len())
            .map_err(|_| MeshError::TooLarge { what: "index count", count: self.indices.len() })?;

        writer.write_all(&[attribute_count])?;
        for &attribute in &self.attributes {
            writer.write_all(&[attribute as u8])?;
        }
        writer.write_all(&vertex_count.to_le_bytes())?;
        writer.write_all(&index_count.to_le_bytes())?;
        for value in &self.vertices {
            writer.write_all(&value.to_le_bytes())?;
        }
        for index in &self.indices {
            writer.write_all(&index.to_le_bytes())?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), MeshError> {
        self.write_to(BufWriter::new(File::create(path)?))?;
        log::info!(
            "Wrote {:?}: {} vertices, {} indices",
            path,
            self.vertex_count(),
            self.indices.len()
        );
        Ok(())
    }

    /// Reinterpret as interleaved vertices; only the pipeline layout qualifies
    /// and every index must land inside the vertex stream.
    pub fn into_object_data(self) -> Result<ObjectBufferData, MeshError> {
        if self.attributes != INTERLEAVED_LAYOUT {
            return Err(MeshError::UnsupportedLayout(self.attributes));
        }

        let vertex_count = self.vertex_count();
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(MeshError::IndexBeyondVertices { index, vertex_count });
        }

        let vertices = self
            .vertices
            .chunks_exact(self.stride())
            .map(|v| Vertex {
                position: [v[0], v[1], v[2]],
                uv: [v[3], v[4]],
                normal: [v[5], v[6], v[7]],
            })
            .collect();

        Ok(ObjectBufferData { vertices, indices: self.indices })
    }
}

impl From<&ObjectBufferData> for MeshBufferData {
    fn from(object: &ObjectBufferData) -> Self {
        let vertices = object
            .vertices
            .iter()
            .flat_map(|v| v.position.into_iter().chain(v.uv).chain(v.normal))
            .collect();
        Self {
            attributes: INTERLEAVED_LAYOUT.to_vec(),
            vertices,
            indices: object.indices.clone(),
        }
    }
}

pub fn load_mesh_file(path: &Path) -> Result<MeshBufferData, MeshError> {
    let file = File::open(path)?;
    let data = MeshBufferData::read_from(BufReader::new(file))?;
    log::info!(
        "Loaded {:?}: {:?}, {} vertices, {} indices",
        path,
        data.attributes,
        data.vertex_count(),
        data.indices.len()
    );
    Ok(data)
}

fn stride_of(attributes: &[VertexAttribute]) -> usize {
    attributes.iter().map(|a| a.components()).sum()
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &'static str) -> Result<(), MeshError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => MeshError::Truncated(what),
        _ => MeshError::Io(e),
    })
}

fn read_array<R: Read, const N: usize>(reader: &mut R, what: &'static str) -> Result<[u8; N], MeshError> {
    let mut buf = [0u8; N];
    read_exact(reader, &mut buf, what)?;
    Ok(buf)
}
