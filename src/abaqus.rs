//! Reader for the Abaqus `.inp` meshes written by Gmsh.
//!
//! Only what the setup needs is read: `*NODE` coordinates, tetrahedral
//! `*ELEMENT` blocks (C3D4, or the corner nodes of C3D10) and element sets,
//! either from the `ELSET=` parameter of an element block or from `*ELSET`
//! sections. Surface and line elements are skipped, and sets are restricted to
//! their tetrahedral members.

use crate::mesh::{MeshError, TetMesh};
use egfr_common::vecmath::Vec3;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

enum Section {
    None,
    Node,
    Element { tets: bool, elset: Option<String> },
    Elset { name: String, generate: bool },
    Other,
}

/// Loads a tetrahedral mesh, multiplying every coordinate by `scale`.
pub fn load_mesh(path: &Path, scale: f64) -> Result<TetMesh, MeshError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if extension != "inp" {
        return Err(MeshError::UnsupportedFormat { extension });
    }
    let file = File::open(path).map_err(|source| MeshError::Io {
        path: path.display().to_string(),
        source,
    })?;
    info!("Loading Abaqus mesh '{}' (scale {:e})", path.display(), scale);
    let mesh = parse_abaqus(BufReader::new(file), scale)?;
    info!(
        "Mesh loaded: {} nodes, {} tets, {} faces, groups: [{}]",
        mesh.num_nodes(),
        mesh.num_tets(),
        mesh.num_faces(),
        mesh.group_names().collect::<Vec<_>>().join(", ")
    );
    Ok(mesh)
}

/// Parses Abaqus input from any buffered reader.
pub fn parse_abaqus<R: BufRead>(reader: R, scale: f64) -> Result<TetMesh, MeshError> {
    let mut nodes: Vec<Vec3> = Vec::new();
    let mut node_index: HashMap<usize, usize> = HashMap::new();
    let mut raw_tets: Vec<(usize, [usize; 4])> = Vec::new();
    let mut tet_index: HashMap<usize, usize> = HashMap::new();
    let mut sets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut section = Section::None;

    for (line_idx, line) in reader.lines().enumerate() {
        let line_no = line_idx + 1;
        let line = line.map_err(|e| MeshError::Parse { line: line_no, detail: e.to_string() })?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("**") {
            continue;
        }

        if let Some(keyword_line) = trimmed.strip_prefix('*') {
            section = parse_keyword(keyword_line);
            continue;
        }

        match &section {
            Section::Node => {
                let fields = split_fields(trimmed);
                if fields.len() < 4 {
                    return Err(parse_error(line_no, "node line needs an id and three coordinates"));
                }
                let id = parse_id(fields[0], line_no)?;
                let mut coords = [0.0; 3];
                for (c, field) in coords.iter_mut().zip(&fields[1..4]) {
                    *c = field
                        .parse::<f64>()
                        .map_err(|_| parse_error(line_no, format!("bad coordinate '{}'", field)))?;
                }
                if node_index.insert(id, nodes.len()).is_some() {
                    return Err(parse_error(line_no, format!("duplicate node id {}", id)));
                }
                nodes.push(Vec3::new(coords[0], coords[1], coords[2]) * scale);
            }
            Section::Element { tets: true, elset } => {
                let fields = split_fields(trimmed);
                if fields.len() < 5 {
                    return Err(parse_error(line_no, "tet element line needs an id and four nodes"));
                }
                let id = parse_id(fields[0], line_no)?;
                let mut corners = [0usize; 4];
                for (c, field) in corners.iter_mut().zip(&fields[1..5]) {
                    *c = parse_id(field, line_no)?;
                }
                if tet_index.insert(id, raw_tets.len()).is_some() {
                    return Err(parse_error(line_no, format!("duplicate element id {}", id)));
                }
                raw_tets.push((id, corners));
                if let Some(name) = elset {
                    sets.entry(name.clone()).or_default().push(id);
                }
            }
            Section::Elset { name, generate } => {
                let ids = split_fields(trimmed)
                    .into_iter()
                    .map(|f| parse_id(f, line_no))
                    .collect::<Result<Vec<_>, _>>()?;
                let members = sets.entry(name.clone()).or_default();
                if *generate {
                    if ids.len() < 2 {
                        return Err(parse_error(line_no, "GENERATE needs start and end"));
                    }
                    let step = ids.get(2).copied().unwrap_or(1).max(1);
                    members.extend((ids[0]..=ids[1]).step_by(step));
                } else {
                    members.extend(ids);
                }
            }
            Section::Element { tets: false, .. } | Section::Other | Section::None => {}
        }
    }

    let mut tets = Vec::with_capacity(raw_tets.len());
    for (element_id, corners) in &raw_tets {
        let mut mapped = [0usize; 4];
        for (m, node_id) in mapped.iter_mut().zip(corners) {
            *m = *node_index
                .get(node_id)
                .ok_or(MeshError::DanglingNode { tet: *element_id, node: *node_id })?;
        }
        tets.push(mapped);
    }

    let mut groups = BTreeMap::new();
    for (name, members) in sets {
        let tet_members: Vec<usize> = members.iter().filter_map(|id| tet_index.get(id).copied()).collect();
        if tet_members.is_empty() {
            debug!("Element set '{}' has no tetrahedra, skipping", name);
            continue;
        }
        groups.insert(name, tet_members);
    }

    TetMesh::from_parts(nodes, tets, groups)
}

fn parse_keyword(keyword_line: &str) -> Section {
    let mut parts = keyword_line.split(',').map(str::trim);
    let keyword = parts.next().unwrap_or_default().to_ascii_uppercase();
    let mut params: HashMap<String, String> = HashMap::new();
    for part in parts {
        match part.split_once('=') {
            Some((k, v)) => {
                params.insert(k.trim().to_ascii_uppercase(), v.trim().to_string());
            }
            None => {
                params.insert(part.to_ascii_uppercase(), String::new());
            }
        }
    }

    match keyword.as_str() {
        "NODE" => Section::Node,
        "ELEMENT" => {
            let kind = params.get("TYPE").map(|t| t.to_ascii_uppercase()).unwrap_or_default();
            Section::Element {
                tets: kind == "C3D4" || kind == "C3D10",
                elset: params.remove("ELSET"),
            }
        }
        "ELSET" => match params.remove("ELSET") {
            Some(name) => Section::Elset {
                name,
                generate: params.contains_key("GENERATE"),
            },
            None => Section::Other,
        },
        _ => Section::Other,
    }
}

fn split_fields(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim).filter(|f| !f.is_empty()).collect()
}

fn parse_id(field: &str, line: usize) -> Result<usize, MeshError> {
    field
        .parse::<usize>()
        .map_err(|_| parse_error(line, format!("bad id '{}'", field)))
}

fn parse_error(line: usize, detail: impl Into<String>) -> MeshError {
    MeshError::Parse { line, detail: detail.into() }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Two tets sharing the face (2, 3, 4), plus a surface triangle Gmsh also writes.
    const TWO_TETS: &str = "\
*Heading
 two_tets.msh
*Node
1, 0, 0, 0
2, 1, 0, 0
3, 0, 1, 0
4, 0, 0, 1
5, 1, 1, 1
******* E L E M E N T S *************
*Element, type=CPS3, ELSET=Surface1
1, 2, 3, 4
*Element, type=C3D4, ELSET=Volume1
10, 1, 2, 3, 4
*Element, type=C3D4, ELSET=Volume2
11, 2, 3, 4, 5
*ELSET,ELSET=Cell
10, 11,
*ELSET,ELSET=Surfaces
1,
";

    #[test]
    fn reads_nodes_tets_and_groups() {
        let mesh = parse_abaqus(TWO_TETS.as_bytes(), 1e-6).unwrap();
        assert_eq!(mesh.num_nodes(), 5);
        assert_eq!(mesh.num_tets(), 2);
        assert_eq!(mesh.num_faces(), 7);
        assert_eq!(mesh.group("Volume1").unwrap().len(), 1);
        assert!(mesh.in_group(1, "Volume2"));
        assert_eq!(mesh.group("Cell").unwrap().len(), 2);
        // Sets with only surface elements do not become tet groups.
        assert!(mesh.group("Surfaces").is_none());
        assert!(mesh.group("Surface1").is_none());
    }

    #[test]
    fn coordinates_are_scaled() {
        let mesh = parse_abaqus(TWO_TETS.as_bytes(), 1e-6).unwrap();
        assert!((mesh.volume(0) - 1e-18 / 6.0).abs() < 1e-30);
    }

    #[test]
    fn generate_expands_ranges() {
        let input = "\
*NODE
1, 0, 0, 0
2, 1, 0, 0
3, 0, 1, 0
4, 0, 0, 1
5, 1, 1, 1
*ELEMENT, TYPE=C3D4
1, 1, 2, 3, 4
2, 2, 3, 4, 5
*ELSET, ELSET=All, GENERATE
1, 2, 1
";
        let mesh = parse_abaqus(input.as_bytes(), 1.0).unwrap();
        assert_eq!(mesh.group("All").unwrap().len(), 2);
    }

    #[test]
    fn missing_node_is_reported() {
        let input = "*Node\n1, 0, 0, 0\n*Element, type=C3D4\n1, 1, 2, 3, 4\n";
        let err = parse_abaqus(input.as_bytes(), 1.0).unwrap_err();
        assert!(matches!(err, MeshError::DanglingNode { tet: 1, node: 2 }));
    }

    #[test]
    fn bad_coordinate_names_the_line() {
        let input = "*Node\n1, 0, zero, 0\n";
        let err = parse_abaqus(input.as_bytes(), 1.0).unwrap_err();
        assert!(matches!(err, MeshError::Parse { line: 2, .. }));
    }

    #[test]
    fn only_inp_files_are_loaded() {
        let err = load_mesh(Path::new("mesh.xml"), 1.0).unwrap_err();
        assert!(matches!(err, MeshError::UnsupportedFormat { .. }));
    }

    #[test]
    fn quadratic_tets_keep_their_corner_nodes() {
        // Unit corner tet with its six edge midpoints as nodes 5-10.
        let input = "\
*NODE
1, 0, 0, 0
2, 2, 0, 0
3, 0, 2, 0
4, 0, 0, 2
5, 1, 0, 0
6, 1, 1, 0
7, 0, 1, 0
8, 0, 0, 1
9, 1, 0, 1
10, 0, 1, 1
*ELEMENT, TYPE=C3D10, ELSET=Volume2
1, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10
";
        let mesh = parse_abaqus(input.as_bytes(), 1.0).unwrap();
        assert_eq!(mesh.num_nodes(), 10);
        assert_eq!(mesh.num_tets(), 1);
        assert_eq!(mesh.num_faces(), 4);
        assert!((mesh.volume(0) - 8.0 / 6.0).abs() < 1e-12);
        let centroid = mesh.tet(0).centroid;
        assert!((centroid.x - 0.5).abs() < 1e-12 && (centroid.y - 0.5).abs() < 1e-12);
        assert!(mesh.in_group(0, "Volume2"));
    }
}
