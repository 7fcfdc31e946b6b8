//! CPU-side triangle mesh data.
//!
//! [`Mesh`] holds flat attribute streams with one unified index stream: a
//! vertex is one position plus, when present, one normal and one texcoord
//! at the same vertex index. Multi-index corner streams (the OBJ layout,
//! where a face corner picks its position, normal, and texcoord
//! independently) are converted up front by [`Mesh::weld`], which
//! deduplicates corners into unified vertices. Downstream consumers never
//! see per-corner indexing.

use crate::{Error, Result};
use std::collections::HashMap;

/// A triangle mesh with unified per-vertex attributes.
///
/// `positions` is `xyz` per vertex; `normals` is `xyz`, `texcoords` is
/// `uv`, `colors` is `rgb`. Attribute streams are either empty or sized to
/// the vertex count. `indices` holds three vertex indices per triangle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub texcoords: Vec<f32>,
    pub colors: Vec<f32>,
    pub indices: Vec<u32>,
}

/// One face corner of a multi-index stream, referencing attribute arrays
/// independently. Indices are per attribute element, not per float.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Corner {
    pub position: u32,
    pub normal: Option<u32>,
    pub texcoord: Option<u32>,
}

impl Mesh {
    pub fn vertex_count(&self) -> u32 {
        (self.positions.len() / 3) as u32
    }

    pub fn triangle_count(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyGeometry`] when there are no indices
    /// - [`Error::MalformedMesh`] for a non-multiple-of-3 index count,
    ///   out-of-range indices, or attribute streams whose length disagrees
    ///   with the vertex count
    pub fn validate(&self) -> Result<()> {
        if self.indices.is_empty() {
            return Err(Error::EmptyGeometry);
        }
        if self.indices.len() % 3 != 0 {
            return Err(Error::MalformedMesh(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        if self.positions.is_empty() || self.positions.len() % 3 != 0 {
            return Err(Error::MalformedMesh(format!(
                "position stream of {} floats is not a multiple of 3",
                self.positions.len()
            )));
        }
        let vertex_count = self.vertex_count();
        for (stream, len, components) in [
            ("normal", self.normals.len(), 3),
            ("texcoord", self.texcoords.len(), 2),
            ("color", self.colors.len(), 3),
        ] {
            if len != 0 && len != vertex_count as usize * components {
                return Err(Error::MalformedMesh(format!(
                    "{stream} stream of {len} floats disagrees with {vertex_count} vertices"
                )));
            }
        }
        if let Some(&index) = self.indices.iter().find(|&&index| index >= vertex_count) {
            return Err(Error::MalformedMesh(format!(
                "index {index} out of range for {vertex_count} vertices"
            )));
        }
        Ok(())
    }

    /// Builds a unified mesh from a multi-index corner stream.
    ///
    /// Corners with identical `(position, normal, texcoord)` index triples
    /// collapse into one vertex; corners that share a position but differ in
    /// any other index stay distinct so that every attribute is valid per
    /// vertex.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyGeometry`] for an empty corner stream;
    /// [`Error::MalformedMesh`] when the corner count is not a multiple of
    /// 3, an index is out of range, or attribute presence is inconsistent
    /// across corners.
    pub fn weld(
        positions: &[f32],
        normals: &[f32],
        texcoords: &[f32],
        corners: &[Corner],
    ) -> Result<Self> {
        if corners.is_empty() {
            return Err(Error::EmptyGeometry);
        }
        if corners.len() % 3 != 0 {
            return Err(Error::MalformedMesh(format!(
                "corner count {} is not a multiple of 3",
                corners.len()
            )));
        }
        let has_normals = corners[0].normal.is_some();
        let has_texcoords = corners[0].texcoord.is_some();

        let mut mesh = Mesh::default();
        let mut dedup: HashMap<Corner, u32> = HashMap::new();
        for &corner in corners {
            if corner.normal.is_some() != has_normals
                || corner.texcoord.is_some() != has_texcoords
            {
                return Err(Error::MalformedMesh(
                    "attribute presence differs between corners".to_owned(),
                ));
            }
            let vertex = match dedup.get(&corner) {
                Some(&vertex) => vertex,
                None => {
                    let vertex = (mesh.positions.len() / 3) as u32;
                    mesh.positions
                        .extend_from_slice(fetch(positions, corner.position, 3, "position")?);
                    if let Some(normal) = corner.normal {
                        mesh.normals
                            .extend_from_slice(fetch(normals, normal, 3, "normal")?);
                    }
                    if let Some(texcoord) = corner.texcoord {
                        mesh.texcoords
                            .extend_from_slice(fetch(texcoords, texcoord, 2, "texcoord")?);
                    }
                    dedup.insert(corner, vertex);
                    vertex
                }
            };
            mesh.indices.push(vertex);
        }
        Ok(mesh)
    }
}

fn fetch<'a>(
    stream: &'a [f32],
    index: u32,
    components: usize,
    name: &str,
) -> Result<&'a [f32]> {
    let start = index as usize * components;
    stream.get(start..start + components).ok_or_else(|| {
        Error::MalformedMesh(format!(
            "{name} index {index} out of range for {} elements",
            stream.len() / components
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Mesh {
        Mesh {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            indices: vec![0, 1, 2],
            ..Default::default()
        }
    }

    #[test]
    fn valid_triangle() {
        assert!(triangle().validate().is_ok());
    }

    #[test]
    fn empty_indices_are_empty_geometry() {
        let mut mesh = triangle();
        mesh.indices.clear();
        assert!(matches!(mesh.validate(), Err(Error::EmptyGeometry)));
    }

    #[test]
    fn partial_triangle_rejected() {
        let mut mesh = triangle();
        mesh.indices.push(0);
        assert!(matches!(mesh.validate(), Err(Error::MalformedMesh(_))));
    }

    #[test]
    fn out_of_range_index_rejected() {
        let mut mesh = triangle();
        mesh.indices[2] = 3;
        assert!(matches!(mesh.validate(), Err(Error::MalformedMesh(_))));
    }

    #[test]
    fn short_attribute_stream_rejected() {
        let mut mesh = triangle();
        mesh.normals = vec![0.0, 0.0, 1.0];
        assert!(matches!(mesh.validate(), Err(Error::MalformedMesh(_))));
    }

    #[test]
    fn weld_deduplicates_shared_corners() {
        // A quad as two triangles; corners 0-2-3 and 0-2 repeat exactly.
        let positions = [
            0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, //
            1.0, 1.0, 0.0, //
            0.0, 1.0, 0.0,
        ];
        let corner = |position| Corner {
            position,
            normal: None,
            texcoord: None,
        };
        let corners = [0, 1, 2, 0, 2, 3].map(corner);
        let mesh = Mesh::weld(&positions, &[], &[], &corners).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn weld_splits_position_shared_across_normals() {
        // Two triangles of a hard edge: position 0 appears with two
        // different normals and must become two vertices.
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let normals = [0.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        let corner = |position, normal| Corner {
            position,
            normal: Some(normal),
            texcoord: None,
        };
        let corners = [
            corner(0, 0),
            corner(1, 0),
            corner(2, 0),
            corner(0, 1),
            corner(2, 1),
            corner(1, 1),
        ];
        let mesh = Mesh::weld(&positions, &normals, &[], &corners).unwrap();
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(mesh.normals.len(), 18);
        // The two copies of position 0 carry different normals.
        assert_eq!(mesh.positions[0..3], mesh.positions[9..12]);
        assert_ne!(mesh.normals[0..3], mesh.normals[9..12]);
    }

    #[test]
    fn weld_rejects_mixed_attribute_presence() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let normals = [0.0, 0.0, 1.0];
        let corners = [
            Corner {
                position: 0,
                normal: Some(0),
                texcoord: None,
            },
            Corner {
                position: 1,
                normal: None,
                texcoord: None,
            },
            Corner {
                position: 2,
                normal: Some(0),
                texcoord: None,
            },
        ];
        assert!(matches!(
            Mesh::weld(&positions, &normals, &[], &corners),
            Err(Error::MalformedMesh(_))
        ));
    }

    #[test]
    fn weld_rejects_out_of_range_position() {
        let positions = [0.0, 0.0, 0.0];
        let corners = [0u32, 1, 2].map(|position| Corner {
            position,
            normal: None,
            texcoord: None,
        });
        assert!(matches!(
            Mesh::weld(&positions, &[], &[], &corners),
            Err(Error::MalformedMesh(_))
        ));
    }
}
