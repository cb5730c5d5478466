use egfr_common::vecmath::{tet_centroid, tet_volume, triangle_area, Vec3};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

pub type TetId = usize;
pub type FaceId = usize;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("failed to read mesh '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported mesh format '{extension}', expected an Abaqus .inp file")]
    UnsupportedFormat { extension: String },

    #[error("line {line}: {detail}")]
    Parse { line: usize, detail: String },

    #[error("tet {tet} references missing node {node}")]
    DanglingNode { tet: usize, node: usize },

    #[error("group '{group}' references missing tet {tet}")]
    DanglingGroupMember { group: String, tet: usize },

    #[error("face {nodes:?} is shared by more than two tets")]
    NonManifoldFace { nodes: [usize; 3] },

    #[error("mesh contains no tetrahedra")]
    Empty,
}

/// A triangle of the mesh with the one or two tets it bounds.
#[derive(Debug, Clone)]
pub struct Face {
    /// Node indices, sorted ascending.
    pub nodes: [usize; 3],
    /// First neighbouring tet, and the second one unless the face lies on the mesh hull.
    pub tets: (TetId, Option<TetId>),
}

impl Face {
    /// The neighbour on the other side of `tet`, if any.
    pub fn opposite(&self, tet: TetId) -> Option<TetId> {
        if self.tets.0 == tet {
            self.tets.1
        } else {
            Some(self.tets.0)
        }
    }

    pub fn neighbours(&self) -> impl Iterator<Item = TetId> + '_ {
        std::iter::once(self.tets.0).chain(self.tets.1)
    }
}

/// Per-element view handed to geometric predicates.
#[derive(Debug, Clone, Copy)]
pub struct TetRef {
    pub id: TetId,
    pub centroid: Vec3,
    pub volume: f64,
}

/// Immutable tetrahedral mesh with named tet groups and face adjacency.
#[derive(Debug, Clone)]
pub struct TetMesh {
    nodes: Vec<Vec3>,
    tets: Vec<[usize; 4]>,
    centroids: Vec<Vec3>,
    volumes: Vec<f64>,
    faces: Vec<Face>,
    tet_faces: Vec<[FaceId; 4]>,
    groups: BTreeMap<String, ElementSubset>,
}

impl TetMesh {
    /// Builds the mesh, its per-tet geometry and the face table.
    ///
    /// Node coordinates must already be in their final physical units.
    pub fn from_parts(
        nodes: Vec<Vec3>,
        tets: Vec<[usize; 4]>,
        groups: BTreeMap<String, Vec<TetId>>,
    ) -> Result<Self, MeshError> {
        if tets.is_empty() {
            return Err(MeshError::Empty);
        }
        for (tet_idx, tet) in tets.iter().enumerate() {
            if let Some(&node) = tet.iter().find(|&&n| n >= nodes.len()) {
                return Err(MeshError::DanglingNode { tet: tet_idx, node });
            }
        }

        let mut group_sets = BTreeMap::new();
        for (name, members) in groups {
            if let Some(&tet) = members.iter().find(|&&t| t >= tets.len()) {
                return Err(MeshError::DanglingGroupMember { group: name, tet });
            }
            group_sets.insert(name, members.into_iter().collect::<ElementSubset>());
        }

        // Per-tet geometry is independent, compute it in parallel.
        let (centroids, volumes): (Vec<Vec3>, Vec<f64>) = tets
            .par_iter()
            .map(|t| {
                let [a, b, c, d] = t.map(|n| nodes[n]);
                (tet_centroid(a, b, c, d), tet_volume(a, b, c, d))
            })
            .unzip();

        // Face table is built serially so face ids are deterministic.
        let mut faces: Vec<Face> = Vec::with_capacity(tets.len() * 2);
        let mut tet_faces = Vec::with_capacity(tets.len());
        let mut face_lookup: HashMap<[usize; 3], FaceId> = HashMap::with_capacity(tets.len() * 2);
        for (tet_idx, tet) in tets.iter().enumerate() {
            let mut local = [0; 4];
            for (slot, skip) in (0..4).enumerate() {
                let mut key = [0usize; 3];
                let mut k = 0;
                for (i, &n) in tet.iter().enumerate() {
                    if i != skip {
                        key[k] = n;
                        k += 1;
                    }
                }
                key.sort_unstable();
                let face_id = match face_lookup.get(&key) {
                    Some(&existing) => {
                        let face = &mut faces[existing];
                        if face.tets.1.is_some() {
                            return Err(MeshError::NonManifoldFace { nodes: key });
                        }
                        face.tets.1 = Some(tet_idx);
                        existing
                    }
                    None => {
                        let id = faces.len();
                        faces.push(Face { nodes: key, tets: (tet_idx, None) });
                        face_lookup.insert(key, id);
                        id
                    }
                };
                local[slot] = face_id;
            }
            tet_faces.push(local);
        }

        Ok(TetMesh {
            nodes,
            tets,
            centroids,
            volumes,
            faces,
            tet_faces,
            groups: group_sets,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_tets(&self) -> usize {
        self.tets.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn tet(&self, id: TetId) -> TetRef {
        TetRef {
            id,
            centroid: self.centroids[id],
            volume: self.volumes[id],
        }
    }

    #[cfg(test)]
    pub fn centroid(&self, id: TetId) -> Vec3 {
        self.centroids[id]
    }

    pub fn volume(&self, id: TetId) -> f64 {
        self.volumes[id]
    }

    pub fn face(&self, id: FaceId) -> &Face {
        &self.faces[id]
    }

    pub fn tet_faces(&self, id: TetId) -> &[FaceId; 4] {
        &self.tet_faces[id]
    }

    pub fn face_area(&self, id: FaceId) -> f64 {
        let [a, b, c] = self.faces[id].nodes.map(|n| self.nodes[n]);
        triangle_area(a, b, c)
    }

    /// Tets tagged with `name`, if the group exists.
    pub fn group(&self, name: &str) -> Option<&ElementSubset> {
        self.groups.get(name)
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Whether `tet` belongs to group `name`. Unknown groups contain nothing.
    #[cfg(test)]
    pub fn in_group(&self, tet: TetId, name: &str) -> bool {
        self.groups.get(name).is_some_and(|g| g.contains(tet))
    }

    /// Total mesh volume.
    pub fn total_volume(&self) -> f64 {
        self.volumes.iter().sum()
    }
}

/// Unordered set of tet ids. Backed by a `BTreeSet` so iteration order is
/// the same on every worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementSubset(BTreeSet<TetId>);

impl ElementSubset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, tet: TetId) -> bool {
        self.0.contains(&tet)
    }

    pub fn insert(&mut self, tet: TetId) -> bool {
        self.0.insert(tet)
    }

    pub fn iter(&self) -> impl Iterator<Item = TetId> + '_ {
        self.0.iter().copied()
    }

    pub fn difference(&self, other: &ElementSubset) -> ElementSubset {
        ElementSubset(self.0.difference(&other.0).copied().collect())
    }

    pub fn union(&self, other: &ElementSubset) -> ElementSubset {
        ElementSubset(self.0.union(&other.0).copied().collect())
    }

    pub fn intersection(&self, other: &ElementSubset) -> ElementSubset {
        ElementSubset(self.0.intersection(&other.0).copied().collect())
    }

    pub fn is_disjoint(&self, other: &ElementSubset) -> bool {
        self.0.is_disjoint(&other.0)
    }

    /// Faces bounding the subset: faces with exactly one neighbouring tet inside it.
    pub fn surface(&self, mesh: &TetMesh) -> FaceSubset {
        let mut out = FaceSubset::new();
        for tet in self.iter() {
            for &face_id in mesh.tet_faces(tet) {
                let inside_other = mesh
                    .face(face_id)
                    .opposite(tet)
                    .is_some_and(|o| self.contains(o));
                if !inside_other {
                    out.insert(face_id);
                }
            }
        }
        out
    }

    pub fn volume(&self, mesh: &TetMesh) -> f64 {
        self.iter().map(|t| mesh.volume(t)).sum()
    }
}

impl FromIterator<TetId> for ElementSubset {
    fn from_iter<I: IntoIterator<Item = TetId>>(iter: I) -> Self {
        ElementSubset(iter.into_iter().collect())
    }
}

/// Unordered set of face ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaceSubset(BTreeSet<FaceId>);

impl FaceSubset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, face: FaceId) -> bool {
        self.0.contains(&face)
    }

    pub fn insert(&mut self, face: FaceId) -> bool {
        self.0.insert(face)
    }

    pub fn iter(&self) -> impl Iterator<Item = FaceId> + '_ {
        self.0.iter().copied()
    }

    pub fn intersection(&self, other: &FaceSubset) -> FaceSubset {
        FaceSubset(self.0.intersection(&other.0).copied().collect())
    }

    pub fn area(&self, mesh: &TetMesh) -> f64 {
        self.iter().map(|f| mesh.face_area(f)).sum()
    }
}

impl FromIterator<FaceId> for FaceSubset {
    fn from_iter<I: IntoIterator<Item = FaceId>>(iter: I) -> Self {
        FaceSubset(iter.into_iter().collect())
    }
}
