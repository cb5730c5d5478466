//! Splits a loaded mesh into the nucleus, cytoplasm and extracellular
//! compartments and finds the membranes between them.
//!
//! All operations are pure set arithmetic over [`ElementSubset`] /
//! [`FaceSubset`], so every worker derives identical regions from the same
//! mesh. Geometric thresholds are compared against coordinates as stored,
//! which means the mesh must already be scaled to metres.

use crate::error::ConfigurationError;
use crate::mesh::{ElementSubset, FaceId, FaceSubset, TetId, TetMesh, TetRef};
use egfr_common::config::{CompartmentNames, NucleusSource, RegionConfig};
use egfr_common::vecmath::Vec3;
use log::{debug, info, warn};

/// Per-element geometric tests that can be set from the configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeometricPredicate {
    /// Centroid strictly closer than `radius` to `center`.
    WithinRadius { center: Vec3, radius: f64 },
    /// Centroid coordinate on `axis` strictly greater than `above`.
    HalfSpace { axis: usize, above: f64 },
}

impl GeometricPredicate {
    pub fn within_radius(center: Vec3, radius: f64) -> Result<Self, ConfigurationError> {
        if !(radius > 0.0) || !radius.is_finite() {
            return Err(ConfigurationError::InvalidPredicate {
                detail: format!("radius must be positive, got {}", radius),
            });
        }
        Ok(GeometricPredicate::WithinRadius { center, radius })
    }

    pub fn half_space(axis: usize, above: f64) -> Result<Self, ConfigurationError> {
        if axis > 2 {
            return Err(ConfigurationError::InvalidPredicate {
                detail: format!("axis must be 0, 1 or 2, got {}", axis),
            });
        }
        Ok(GeometricPredicate::HalfSpace { axis, above })
    }

    pub fn matches(&self, tet: &TetRef) -> bool {
        match *self {
            GeometricPredicate::WithinRadius { center, radius } => tet.centroid.distance(center) < radius,
            GeometricPredicate::HalfSpace { axis, above } => {
                tet.centroid.component(axis).is_some_and(|v| v > above)
            }
        }
    }
}

/// All tets tagged with `group_name`.
pub fn select_group(mesh: &TetMesh, group_name: &str) -> Result<ElementSubset, ConfigurationError> {
    mesh.group(group_name)
        .cloned()
        .ok_or_else(|| ConfigurationError::MissingGroup { group: group_name.to_string() })
}

/// Candidates whose element view satisfies `predicate`.
pub fn select_by_predicate<P>(mesh: &TetMesh, candidates: &ElementSubset, predicate: P) -> ElementSubset
where
    P: Fn(&TetRef) -> bool,
{
    candidates.iter().filter(|&t| predicate(&mesh.tet(t))).collect()
}

/// Candidate region minus the nucleus, so no volume is counted twice.
pub fn derive_cytoplasm(candidate_region: &ElementSubset, nucleus_region: &ElementSubset) -> ElementSubset {
    candidate_region.difference(nucleus_region)
}

/// Tets of `region` that touch its boundary: for every boundary face, the
/// face's neighbours inside `region`. A tet touching several boundary faces
/// appears once.
pub fn derive_membrane_adjacent(mesh: &TetMesh, region: &ElementSubset) -> ElementSubset {
    let mut shell = ElementSubset::new();
    for face_id in region.surface(mesh).iter() {
        for tet in mesh.face(face_id).neighbours() {
            if region.contains(tet) {
                shell.insert(tet);
            }
        }
    }
    shell
}

/// Faces on the boundary of both regions with one neighbour in each, i.e. the
/// interface between them. Empty for `region_a == region_b`.
pub fn derive_shared_surface(mesh: &TetMesh, region_a: &ElementSubset, region_b: &ElementSubset) -> FaceSubset {
    let surface_a = region_a.surface(mesh);
    let surface_b = region_b.surface(mesh);
    surface_a
        .intersection(&surface_b)
        .iter()
        .filter(|&f| match mesh.face(f).tets {
            (t0, Some(t1)) => {
                (region_a.contains(t0) && region_b.contains(t1)) || (region_a.contains(t1) && region_b.contains(t0))
            }
            (_, None) => false,
        })
        .collect()
}

/// A cut through a region along the boundary of one of its halves.
#[derive(Debug, Clone, Default)]
pub struct CrossSection {
    /// Tets of the region on the selected side of the cut.
    pub half: ElementSubset,
    /// Faces between `half` and the rest of the region.
    pub faces: FaceSubset,
    /// Tets on either side of each cut face, with the face they touch.
    pub tets: Vec<(FaceId, TetId)>,
}

/// Splits `region` by `predicate` and returns the interface between the
/// selected half and the remainder.
pub fn derive_cross_section<P>(mesh: &TetMesh, region: &ElementSubset, predicate: P) -> CrossSection
where
    P: Fn(&TetRef) -> bool,
{
    let half = select_by_predicate(mesh, region, predicate);
    let rest = region.difference(&half);
    let faces = derive_shared_surface(mesh, &half, &rest);
    let tets = faces
        .iter()
        .flat_map(|f| mesh.face(f).neighbours().map(move |t| (f, t)))
        .collect();
    CrossSection { half, faces, tets }
}

/// Cuts the cytoplasm and, when there is one, the nucleus with the same
/// predicate. Sections come back in that order, keyed by compartment name.
pub fn derive_compartment_sections<P>(
    mesh: &TetMesh,
    partition: &Partition,
    names: &CompartmentNames,
    predicate: P,
) -> Vec<(String, CrossSection)>
where
    P: Fn(&TetRef) -> bool,
{
    let mut sections = vec![(
        names.cytoplasm.clone(),
        derive_cross_section(mesh, &partition.cytoplasm, &predicate),
    )];
    if let Some(nucleus) = &partition.nucleus {
        sections.push((names.nucleus.clone(), derive_cross_section(mesh, nucleus, &predicate)));
    }
    sections
}

/// Regions derived from the mesh groups for one run.
#[derive(Debug, Clone)]
pub struct Partition {
    pub extracellular: ElementSubset,
    /// Cell region before the nucleus is removed.
    pub candidate: ElementSubset,
    /// `None` when no nucleus source is configured.
    pub nucleus: Option<ElementSubset>,
    pub cytoplasm: ElementSubset,
    /// Approximate one-tet shell of the candidate region along its boundary.
    pub membrane_adjacent: ElementSubset,
    /// Interface between cytoplasm and extracellular space.
    pub membrane: FaceSubset,
    /// Interface between nucleus and cytoplasm; empty without a nucleus.
    pub envelope: FaceSubset,
}

/// Derives every region the model needs from the configured groups.
pub fn partition_mesh(mesh: &TetMesh, config: &RegionConfig) -> Result<Partition, ConfigurationError> {
    let extracellular = select_group(mesh, &config.extracellular_group)?;
    let mut candidate = select_group(mesh, &config.cell_group)?;

    let nucleus = match &config.nucleus {
        NucleusSource::None => None,
        NucleusSource::Group { name } => {
            let nucleus = select_group(mesh, name)?;
            // Meshers write the nucleus either nested in the cell group or as a
            // separate volume; either way it must sit inside the candidate.
            if !nucleus.difference(&candidate).is_empty() {
                debug!("Nucleus group '{}' lies outside '{}', merging it into the cell region", name, config.cell_group);
                candidate = candidate.union(&nucleus);
            }
            Some(nucleus)
        }
        NucleusSource::Radius { radius, center } => {
            let predicate =
                GeometricPredicate::within_radius(Vec3::new(center[0], center[1], center[2]), *radius)?;
            Some(select_by_predicate(mesh, &candidate, |t| predicate.matches(t)))
        }
    };

    if !extracellular.is_disjoint(&candidate) {
        warn!(
            "Groups '{}' and '{}' overlap in {} tets",
            config.extracellular_group,
            config.cell_group,
            extracellular.intersection(&candidate).len()
        );
    }

    let cytoplasm = match &nucleus {
        Some(n) => derive_cytoplasm(&candidate, n),
        None => candidate.clone(),
    };
    let membrane_adjacent = derive_membrane_adjacent(mesh, &candidate);
    let membrane = derive_shared_surface(mesh, &cytoplasm, &extracellular);
    let envelope = nucleus
        .as_ref()
        .map(|n| derive_shared_surface(mesh, n, &cytoplasm))
        .unwrap_or_default();

    info!(
        "Partition: extracellular {} tets, cell {} tets (nucleus {}, cytoplasm {}), membrane {} faces, envelope {} faces",
        extracellular.len(),
        candidate.len(),
        nucleus.as_ref().map_or(0, ElementSubset::len),
        cytoplasm.len(),
        membrane.len(),
        envelope.len()
    );

    Ok(Partition {
        extracellular,
        candidate,
        nucleus,
        cytoplasm,
        membrane_adjacent,
        membrane,
        envelope,
    })
}

#[derive(Debug, Clone)]
pub struct CompartmentSpec {
    pub name: String,
    pub tets: ElementSubset,
}

#[derive(Debug, Clone)]
pub struct PatchSpec {
    pub name: String,
    pub faces: FaceSubset,
    pub inner: String,
    pub outer: String,
}

#[derive(Debug, Clone)]
pub struct BoundarySpec {
    pub name: String,
    pub faces: FaceSubset,
}

/// Named compartments, patches and diffusion boundaries handed to the engine.
#[derive(Debug, Clone, Default)]
pub struct Geometry {
    pub compartments: Vec<CompartmentSpec>,
    pub patches: Vec<PatchSpec>,
    pub boundaries: Vec<BoundarySpec>,
}

impl Geometry {
    pub fn compartment(&self, name: &str) -> Option<&CompartmentSpec> {
        self.compartments.iter().find(|c| c.name == name)
    }

    pub fn patch(&self, name: &str) -> Option<&PatchSpec> {
        self.patches.iter().find(|p| p.name == name)
    }

    /// Names of everything that can hold molecules: compartments, then patches.
    pub fn region_names(&self) -> Vec<String> {
        self.compartments
            .iter()
            .map(|c| c.name.clone())
            .chain(self.patches.iter().map(|p| p.name.clone()))
            .collect()
    }
}

/// Turns a partition into named compartments. Fails when a required
/// compartment or the cell membrane ends up empty.
pub fn build_geometry(partition: &Partition, names: &CompartmentNames) -> Result<Geometry, ConfigurationError> {
    let mut geometry = Geometry::default();

    if let Some(nucleus) = &partition.nucleus {
        geometry.compartments.push(required_compartment(&names.nucleus, nucleus)?);
    }
    geometry.compartments.push(required_compartment(&names.cytoplasm, &partition.cytoplasm)?);
    geometry.compartments.push(required_compartment(&names.extracellular, &partition.extracellular)?);

    if partition.membrane.is_empty() {
        return Err(ConfigurationError::EmptyRegion { region: names.membrane.clone() });
    }
    geometry.patches.push(PatchSpec {
        name: names.membrane.clone(),
        faces: partition.membrane.clone(),
        inner: names.cytoplasm.clone(),
        outer: names.extracellular.clone(),
    });

    if partition.nucleus.is_some() {
        if partition.envelope.is_empty() {
            warn!("Nucleus does not touch the cytoplasm, no '{}' boundary created", names.envelope);
        } else {
            geometry.boundaries.push(BoundarySpec {
                name: names.envelope.clone(),
                faces: partition.envelope.clone(),
            });
        }
    }

    Ok(geometry)
}

fn required_compartment(name: &str, tets: &ElementSubset) -> Result<CompartmentSpec, ConfigurationError> {
    if tets.is_empty() {
        return Err(ConfigurationError::EmptyRegion { region: name.to_string() });
    }
    Ok(CompartmentSpec { name: name.to_string(), tets: tets.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{cube_grid, isolated_tets};

    fn max_norm(c: Vec3) -> f64 {
        c.x.abs().max(c.y.abs()).max(c.z.abs())
    }

    /// 6x6x6 unit cubes: a 4x4x4 cell block ("Volume2") inside extracellular space ("Volume1").
    fn cell_in_box() -> TetMesh {
        cube_grid(6, 6, 6, 1.0, |c| if max_norm(c) < 2.0 { Some("Volume2") } else { Some("Volume1") })
    }

    fn radius_config(radius: f64) -> RegionConfig {
        RegionConfig {
            nucleus: NucleusSource::Radius { radius, center: [0.0; 3] },
            ..RegionConfig::default()
        }
    }

    #[test]
    fn missing_group_is_named() {
        let mesh = cell_in_box();
        let err = select_group(&mesh, "Volume3").unwrap_err();
        assert_eq!(err, ConfigurationError::MissingGroup { group: "Volume3".into() });
    }

    #[test]
    fn ninety_of_a_hundred_cell_tets_are_cytoplasm() {
        // 10 tets within 5 um of the origin, 90 further out, 20 extracellular.
        let mut centres = Vec::new();
        for i in 0..10 {
            centres.push(Vec3::new(0.4e-6 * i as f64, 0.0, 0.0));
        }
        for i in 0..90 {
            let r = 6e-6 + 0.1e-6 * i as f64;
            centres.push(Vec3::new(0.0, r, 0.0));
        }
        for i in 0..20 {
            centres.push(Vec3::new(0.0, 0.0, 30e-6 + 1e-6 * i as f64));
        }
        let mesh = isolated_tets(
            &centres,
            1e-8,
            &[("Volume1", (100..120).collect()), ("Volume2", (0..100).collect())],
        );

        let cell = select_group(&mesh, "Volume2").unwrap();
        assert_eq!(cell.len(), 100);
        let nucleus = select_by_predicate(&mesh, &cell, |t| t.centroid.length() < 5e-6);
        assert_eq!(nucleus.len(), 10);
        let cytoplasm = derive_cytoplasm(&cell, &nucleus);
        assert_eq!(cytoplasm.len(), 90);
        assert!(cytoplasm.is_disjoint(&nucleus));
        assert_eq!(cytoplasm.union(&nucleus), cell);
        assert_eq!(nucleus.len() + cytoplasm.len(), cell.len());
    }

    #[test]
    fn cytoplasm_and_nucleus_always_partition_the_candidate() {
        let mesh = cell_in_box();
        let cell = select_group(&mesh, "Volume2").unwrap();
        for radius in [0.0, 0.5, 0.95, 1.5, 2.5, 100.0] {
            let nucleus = select_by_predicate(&mesh, &cell, |t| t.centroid.length() < radius);
            let cytoplasm = derive_cytoplasm(&cell, &nucleus);
            assert!(cytoplasm.is_disjoint(&nucleus), "radius {}", radius);
            assert_eq!(cytoplasm.union(&nucleus), cell, "radius {}", radius);
        }
    }

    #[test]
    fn half_space_predicate() {
        let mesh = cube_grid(2, 1, 1, 1.0, |_| Some("Volume2"));
        let cell = select_group(&mesh, "Volume2").unwrap();
        let right = GeometricPredicate::half_space(0, 0.0).unwrap();
        assert_eq!(select_by_predicate(&mesh, &cell, |t| right.matches(t)).len(), 6);
        assert!(GeometricPredicate::half_space(3, 0.0).is_err());
        assert!(GeometricPredicate::within_radius(Vec3::zero(), 0.0).is_err());
    }

    #[test]
    fn region_shares_no_surface_with_itself() {
        let mesh = cell_in_box();
        let regions = [
            select_group(&mesh, "Volume1").unwrap(),
            select_group(&mesh, "Volume2").unwrap(),
            (0..mesh.num_tets()).collect::<ElementSubset>(),
            ElementSubset::new(),
        ];
        for region in &regions {
            assert!(derive_shared_surface(&mesh, region, region).is_empty());
        }
    }

    #[test]
    fn two_cubes_share_one_square() {
        let mesh = cube_grid(2, 1, 1, 1.0, |c| if c.x < 0.0 { Some("Left") } else { Some("Right") });
        let left = select_group(&mesh, "Left").unwrap();
        let right = select_group(&mesh, "Right").unwrap();
        let shared = derive_shared_surface(&mesh, &left, &right);
        assert_eq!(shared.len(), 2);
        assert!((shared.area(&mesh) - 1.0).abs() < 1e-12);
        assert_eq!(shared, derive_shared_surface(&mesh, &right, &left));
    }

    #[test]
    fn membrane_shell_touches_the_boundary_only() {
        let mesh = cube_grid(3, 3, 3, 1.0, |_| Some("Volume2"));
        let cell = select_group(&mesh, "Volume2").unwrap();
        let shell = derive_membrane_adjacent(&mesh, &cell);
        let surface = cell.surface(&mesh);

        assert!(shell.difference(&cell).is_empty());
        // The centre cube does not reach the hull.
        let centre: ElementSubset = cell.iter().filter(|&t| max_norm(mesh.centroid(t)) < 0.5).collect();
        assert_eq!(centre.len(), 6);
        assert!(shell.is_disjoint(&centre));
        for tet in shell.iter() {
            assert!(mesh.tet_faces(tet).iter().any(|&f| surface.contains(f)));
        }
        // Every boundary face contributes its inner tet, without duplicates.
        assert!(shell.len() <= surface.len());
    }

    #[test]
    fn membrane_shell_of_isolated_tets_is_every_tet() {
        let centres = [Vec3::zero(), Vec3::new(1.0, 0.0, 0.0)];
        let mesh = isolated_tets(&centres, 0.1, &[("Volume2", vec![0, 1])]);
        let cell = select_group(&mesh, "Volume2").unwrap();
        assert_eq!(derive_membrane_adjacent(&mesh, &cell), cell);
    }

    #[test]
    fn radius_nucleus_partition() {
        let mesh = cell_in_box();
        let partition = partition_mesh(&mesh, &radius_config(1.0)).unwrap();
        let nucleus = partition.nucleus.as_ref().unwrap();
        assert_eq!(partition.candidate.len(), 384);
        // Freudenthal centroids are not symmetric about the origin, so the
        // ball picks 36 tets from the eight inner cubes and their neighbours.
        assert_eq!(nucleus.len(), 36);
        assert!(nucleus.iter().all(|t| mesh.tet(t).centroid.length() < 1.0));
        assert_eq!(partition.cytoplasm.len(), 348);
        // Outer surface of the 4x4x4 block: 6 sides of 16 squares, 2 triangles each.
        assert_eq!(partition.membrane.len(), 192);
        assert_eq!(partition.envelope.len(), 36);
        assert_eq!(partition.envelope, derive_shared_surface(&mesh, nucleus, &partition.cytoplasm));
        assert!(partition.extracellular.is_disjoint(&partition.candidate));
    }

    #[test]
    fn group_nucleus_outside_cell_group_is_merged() {
        let mesh = cube_grid(6, 6, 6, 1.0, |c| {
            let n = max_norm(c);
            if n < 1.0 {
                Some("Volume3")
            } else if n < 2.0 {
                Some("Volume2")
            } else {
                Some("Volume1")
            }
        });
        let config = RegionConfig {
            nucleus: NucleusSource::Group { name: "Volume3".into() },
            ..RegionConfig::default()
        };
        let partition = partition_mesh(&mesh, &config).unwrap();
        assert_eq!(partition.candidate.len(), 384);
        assert_eq!(partition.cytoplasm, select_group(&mesh, "Volume2").unwrap());
        assert_eq!(partition.envelope.len(), 48);
        assert_eq!(partition.membrane.len(), 192);
    }

    #[test]
    fn no_nucleus_leaves_whole_cell_as_cytoplasm() {
        let mesh = cell_in_box();
        let config = RegionConfig { nucleus: NucleusSource::None, ..RegionConfig::default() };
        let partition = partition_mesh(&mesh, &config).unwrap();
        assert!(partition.nucleus.is_none());
        assert_eq!(partition.cytoplasm, partition.candidate);
        assert!(partition.envelope.is_empty());
    }

    #[test]
    fn geometry_names_and_patch_sides() {
        let mesh = cell_in_box();
        let partition = partition_mesh(&mesh, &radius_config(1.0)).unwrap();
        let geometry = build_geometry(&partition, &CompartmentNames::default()).unwrap();
        assert_eq!(geometry.region_names(), vec!["nuc", "cyt", "exo", "cell_surface"]);
        let patch = geometry.patch("cell_surface").unwrap();
        assert_eq!((patch.inner.as_str(), patch.outer.as_str()), ("cyt", "exo"));
        assert_eq!(geometry.boundaries.len(), 1);
        assert_eq!(geometry.boundaries[0].name, "nuc_mem");
    }

    #[test]
    fn empty_nucleus_fails_geometry() {
        // No tet centroid lies closer than sqrt(3/8) ~ 0.61 to the origin.
        let mesh = cell_in_box();
        let partition = partition_mesh(&mesh, &radius_config(0.5)).unwrap();
        assert!(partition.nucleus.as_ref().unwrap().is_empty());
        let err = build_geometry(&partition, &CompartmentNames::default()).unwrap_err();
        assert_eq!(err, ConfigurationError::EmptyRegion { region: "nuc".into() });
    }

    #[test]
    fn swallowed_cytoplasm_fails_geometry() {
        let mesh = cell_in_box();
        let partition = partition_mesh(&mesh, &radius_config(100.0)).unwrap();
        assert!(partition.cytoplasm.is_empty());
        let err = build_geometry(&partition, &CompartmentNames::default()).unwrap_err();
        assert_eq!(err, ConfigurationError::EmptyRegion { region: "cyt".into() });
    }

    #[test]
    fn cross_section_through_two_cubes() {
        let mesh = cube_grid(2, 1, 1, 1.0, |_| Some("Volume2"));
        let cell = select_group(&mesh, "Volume2").unwrap();
        let cut = GeometricPredicate::half_space(0, 0.0).unwrap();
        let section = derive_cross_section(&mesh, &cell, |t| cut.matches(t));
        assert_eq!(section.half.len(), 6);
        assert_eq!(section.faces.len(), 2);
        assert_eq!(section.tets.len(), 4);
        assert!(section.tets.iter().all(|(f, _)| section.faces.contains(*f)));
    }

    #[test]
    fn nucleus_and_cytoplasm_are_cut_separately() {
        let mesh = cell_in_box();
        let config = radius_config(1.0);
        let partition = partition_mesh(&mesh, &config).unwrap();
        let cut = GeometricPredicate::half_space(0, 0.0).unwrap();
        let sections = derive_compartment_sections(&mesh, &partition, &config.names, |t| cut.matches(t));

        let names: Vec<&str> = sections.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["cyt", "nuc"]);
        let (_, cyt) = &sections[0];
        let (_, nuc) = &sections[1];
        assert_eq!((cyt.half.len(), cyt.faces.len(), cyt.tets.len()), (174, 24, 48));
        assert_eq!((nuc.half.len(), nuc.faces.len(), nuc.tets.len()), (18, 8, 16));
        // Together the two cuts cover the 4x4 squares of the x = 0 plane.
        assert_eq!(cyt.faces.intersection(&nuc.faces).len(), 0);
        assert_eq!(cyt.faces.len() + nuc.faces.len(), 32);

        let no_nucleus = RegionConfig { nucleus: NucleusSource::None, ..RegionConfig::default() };
        let partition = partition_mesh(&mesh, &no_nucleus).unwrap();
        assert_eq!(derive_compartment_sections(&mesh, &partition, &no_nucleus.names, |t| cut.matches(t)).len(), 1);
    }
}
