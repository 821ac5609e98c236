//! Wavefront-style OBJ loader
//!
//! Only `v`, `vt`, `vn` and `f` lines are read; faces must reference all
//! three attributes as `pos/uv/normal`. Identical triplets share one vertex.

use super::{MeshError, Vertex};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Deduplicated interleaved vertices plus triangle indices
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ObjectBufferData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

pub fn load_obj_file(path: &Path) -> Result<ObjectBufferData, MeshError> {
    let file = File::open(path)?;
    let data = parse_obj(BufReader::new(file))?;
    log::info!(
        "Loaded {:?}: {} vertices, {} indices",
        path,
        data.vertices.len(),
        data.indices.len()
    );
    Ok(data)
}

pub fn parse_obj<R: BufRead>(reader: R) -> Result<ObjectBufferData, MeshError> {
    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut tex_coords: Vec<[f32; 2]> = Vec::new();
    let mut normals: Vec<[f32; 3]> = Vec::new();

    let mut data = ObjectBufferData::default();
    let mut lookup: HashMap<(usize, usize, usize), u32> = HashMap::new();

    for (line_index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = line_index + 1;
        let mut parts = line.split_whitespace();

        match parts.next() {
            Some("v") => positions.push(parse_floats(&mut parts, line_no)?),
            Some("vt") => tex_coords.push(parse_floats(&mut parts, line_no)?),
            Some("vn") => normals.push(parse_floats(&mut parts, line_no)?),
            Some("f") => {
                let corners = parts
                    .map(|token| parse_triplet(token, line_no))
                    .collect::<Result<Vec<_>, _>>()?;
                if corners.len() < 3 {
                    return Err(MeshError::Parse {
                        line: line_no,
                        message: format!("face has {} corners, need 3", corners.len()),
                    });
                }

                // Fan-triangulate anything larger than a triangle
                for i in 1..corners.len() - 1 {
                    for &(p, t, n) in &[corners[0], corners[i], corners[i + 1]] {
                        let key = (
                            resolve(p, positions.len(), "position", line_no)?,
                            resolve(t, tex_coords.len(), "uv", line_no)?,
                            resolve(n, normals.len(), "normal", line_no)?,
                        );

                        let index = match lookup.get(&key) {
                            Some(&index) => index,
                            None => {
                                let index = data.vertices.len() as u32;
                                data.vertices.push(Vertex {
                                    position: positions[key.0],
                                    uv: tex_coords[key.1],
                                    normal: normals[key.2],
                                });
                                lookup.insert(key, index);
                                index
                            }
                        };
                        data.indices.push(index);
                    }
                }
            }
            // Comments, groups, materials, smoothing: not needed here
            _ => {}
        }
    }

    Ok(data)
}

fn parse_floats<'a, const N: usize>(
    parts: &mut impl Iterator<Item = &'a str>,
    line: usize,
) -> Result<[f32; N], MeshError> {
    let mut out = [0.0f32; N];
    for slot in out.iter_mut() {
        let token = parts.next().ok_or_else(|| MeshError::Parse {
            line,
            message: format!("expected {} components", N),
        })?;
        *slot = token.parse().map_err(|_| MeshError::Parse {
            line,
            message: format!("invalid number {:?}", token),
        })?;
    }
    Ok(out)
}

fn parse_triplet(token: &str, line: usize) -> Result<(i64, i64, i64), MeshError> {
    let invalid = || MeshError::Parse {
        line,
        message: format!("face corner {:?} is not pos/uv/normal", token),
    };

    let mut fields = token.split('/');
    let mut next = || -> Result<i64, MeshError> {
        fields
            .next()
            .filter(|f| !f.is_empty())
            .and_then(|f| f.parse().ok())
            .ok_or_else(invalid)
    };
    let triplet = (next()?, next()?, next()?);

    if fields.next().is_some() {
        return Err(invalid());
    }
    Ok(triplet)
}

/// 1-based OBJ index to 0-based, bounds checked
fn resolve(index: i64, available: usize, kind: &'static str, line: usize) -> Result<usize, MeshError> {
    if index >= 1 && (index as usize) <= available {
        Ok(index as usize - 1)
    } else {
        Err(MeshError::IndexOutOfRange { line, kind, index, available })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Cursor;

    const CUBE: &str = "\
# unit cube, 8 shared corners
v -1 -1 -1
v  1 -1 -1
v  1  1 -1
v -1  1 -1
v -1 -1  1
v  1 -1  1
v  1  1  1
v -1  1  1
vt 0 0
vn 0 0 1
f 1/1/1 2/1/1 3/1/1
f 1/1/1 3/1/1 4/1/1
f 5/1/1 6/1/1 7/1/1
f 5/1/1 7/1/1 8/1/1
f 1/1/1 2/1/1 6/1/1
f 1/1/1 6/1/1 5/1/1
f 4/1/1 3/1/1 7/1/1
f 4/1/1 7/1/1 8/1/1
f 1/1/1 4/1/1 8/1/1
f 1/1/1 8/1/1 5/1/1
f 2/1/1 3/1/1 7/1/1
f 2/1/1 7/1/1 6/1/1
";

    fn parse(text: &str) -> Result<ObjectBufferData, MeshError> {
        parse_obj(Cursor::new(text))
    }

    #[test]
    fn cube_shares_corners() {
        let data = parse(CUBE).unwrap();
        assert_eq!(data.vertices.len(), 8);
        assert_eq!(data.indices.len(), 36);
        assert!(data.indices.iter().all(|&i| (i as usize) < data.vertices.len()));
    }

    #[test]
    fn cube_file_loads_from_disk() {
        let path = std::env::temp_dir()
            .join(format!("orbit-viewer-{}-cube.obj", std::process::id()));
        std::fs::write(&path, CUBE).unwrap();

        let loaded = load_obj_file(&path);
        std::fs::remove_file(&path).unwrap();

        let data = loaded.unwrap();
        assert_eq!(data.vertices.len(), 8);
        assert_eq!(data.indices.len(), 36);
    }

    #[test]
    fn repeated_triplet_in_one_face_is_one_vertex() {
        let text = "v 0 0 0\nv 1 0 0\nvt 0 0\nvn 0 0 1\nf 1/1/1 2/1/1 1/1/1\n";
        let data = parse(text).unwrap();
        assert_eq!(data.vertices.len(), 2);
        assert_eq!(data.indices, vec![0, 1, 0]);
        assert_eq!(data.indices[0], data.indices[2]);
    }

    #[test]
    fn attributes_are_interleaved() {
        let text = "v 1 2 3\nv 4 5 6\nv 7 8 9\nvt 0.25 0.75\nvn 0 1 0\nf 3/1/1 1/1/1 2/1/1\n";
        let data = parse(text).unwrap();
        let first = data.vertices[0];
        assert_eq!(first.position, [7.0, 8.0, 9.0]);
        assert_relative_eq!(first.uv[0], 0.25);
        assert_relative_eq!(first.uv[1], 0.75);
        assert_eq!(first.normal, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn quads_are_fan_triangulated() {
        let text = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvt 0 0\nvn 0 0 1\nf 1/1/1 2/1/1 3/1/1 4/1/1\n";
        let data = parse(text).unwrap();
        assert_eq!(data.vertices.len(), 4);
        assert_eq!(data.indices, vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn ignores_unknown_lines() {
        let text = "o cube\ns off\nusemtl none\nv 0 0 0\nvt 0 0\nvn 0 0 1\nf 1/1/1 1/1/1 1/1/1\n";
        let data = parse(text).unwrap();
        assert_eq!(data.vertices.len(), 1);
        assert_eq!(data.indices, vec![0, 0, 0]);
    }

    #[test]
    fn out_of_range_index_is_reported_with_line() {
        let text = "v 0 0 0\nvt 0 0\nvn 0 0 1\nf 1/1/1 2/1/1 1/1/1\n";
        match parse(text).unwrap_err() {
            MeshError::IndexOutOfRange { line, kind, index, available } => {
                assert_eq!((line, kind, index, available), (4, "position", 2, 1));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn malformed_lines_are_parse_errors() {
        assert!(matches!(parse("v 0 zero 0\n"), Err(MeshError::Parse { line: 1, .. })));
        assert!(matches!(parse("v 0 0\n"), Err(MeshError::Parse { line: 1, .. })));
        let missing_uv = "v 0 0 0\nvn 0 0 1\nf 1//1 1//1 1//1\n";
        assert!(matches!(parse(missing_uv), Err(MeshError::Parse { line: 3, .. })));
        let short_face = "v 0 0 0\nvt 0 0\nvn 0 0 1\nf 1/1/1 1/1/1\n";
        assert!(matches!(parse(short_face), Err(MeshError::Parse { line: 4, .. })));
    }
}
