//! Small synthetic meshes shared by the unit tests.

use crate::mesh::TetMesh;
use egfr_common::vecmath::Vec3;
use std::collections::BTreeMap;

const AXIS_ORDERS: [[usize; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

/// `nx * ny * nz` cubes centred on the origin, each split into six tets along
/// its main diagonal (Freudenthal split), so neighbouring cubes share faces.
/// `group_of` tags each tet by its centroid.
pub fn cube_grid<F>(nx: usize, ny: usize, nz: usize, spacing: f64, group_of: F) -> TetMesh
where
    F: Fn(Vec3) -> Option<&'static str>,
{
    let node_index = |i: usize, j: usize, k: usize| i + (nx + 1) * (j + (ny + 1) * k);
    let mut nodes = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
    for k in 0..=nz {
        for j in 0..=ny {
            for i in 0..=nx {
                nodes.push(Vec3::new(
                    (i as f64 - nx as f64 / 2.0) * spacing,
                    (j as f64 - ny as f64 / 2.0) * spacing,
                    (k as f64 - nz as f64 / 2.0) * spacing,
                ));
            }
        }
    }

    let mut tets = Vec::with_capacity(nx * ny * nz * 6);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                for order in AXIS_ORDERS {
                    let mut corner = [i, j, k];
                    let mut tet = [node_index(i, j, k); 4];
                    for (step, &axis) in order.iter().enumerate() {
                        corner[axis] += 1;
                        tet[step + 1] = node_index(corner[0], corner[1], corner[2]);
                    }
                    tets.push(tet);
                }
            }
        }
    }

    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (id, tet) in tets.iter().enumerate() {
        let centre = tet.iter().fold(Vec3::zero(), |acc, &n| acc + nodes[n]) / 4.0;
        if let Some(name) = group_of(centre) {
            groups.entry(name.to_string()).or_default().push(id);
        }
    }

    TetMesh::from_parts(nodes, tets, groups).unwrap()
}

/// One free-standing tet per centre with exactly that centroid; no faces are shared.
pub fn isolated_tets(centres: &[Vec3], half_edge: f64, groups: &[(&str, Vec<usize>)]) -> TetMesh {
    let h = half_edge;
    let offsets = [
        Vec3::new(h, h, h),
        Vec3::new(h, -h, -h),
        Vec3::new(-h, h, -h),
        Vec3::new(-h, -h, h),
    ];
    let mut nodes = Vec::with_capacity(centres.len() * 4);
    let mut tets = Vec::with_capacity(centres.len());
    for &c in centres {
        let base = nodes.len();
        nodes.extend(offsets.iter().map(|&o| c + o));
        tets.push([base, base + 1, base + 2, base + 3]);
    }
    let groups = groups
        .iter()
        .map(|(name, members)| (name.to_string(), members.clone()))
        .collect();
    TetMesh::from_parts(nodes, tets, groups).unwrap()
}
