use serde::{Serialize, Deserialize};

/// Everything the setup stage derived for one run, written next to the
/// engine's own results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupSummary {
    /// Path of the mesh the regions were derived from.
    pub mesh_path: String,
    /// Number of tetrahedra in the mesh.
    pub total_tets: usize,
    /// Volumetric compartments (nucleus, cytoplasm, extracellular).
    pub regions: Vec<RegionSummary>,
    /// Membrane patches and diffusion boundaries.
    pub patches: Vec<PatchSummary>,
    /// Tets of the cytoplasm candidate region that touch its boundary.
    pub membrane_adjacent_tets: usize,
    /// Factor applied to every initial value (configured factor times volume ratio).
    pub effective_factor: f64,
    /// Per-species recording targets taken from the table's selector column.
    pub selections: Vec<SelectionSummary>,
    /// One record per replicate run.
    pub replicates: Vec<ReplicateRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSummary {
    pub name: String,
    pub tet_count: usize,
    /// Total volume in m^3.
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchSummary {
    pub name: String,
    pub face_count: usize,
    /// Total area in m^2.
    pub area: f64,
    /// Compartment on the inner side; `None` for diffusion boundaries.
    pub inner: Option<String>,
    pub outer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionSummary {
    pub species: String,
    /// "TRIS" or "TETS".
    pub kind: String,
    /// Region the counts are summed over.
    pub target: String,
    pub target_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateRecord {
    pub run_id: u32,
    /// Seed handed to the stochastic engine for this replicate.
    pub seed: u64,
    pub assigned: usize,
    pub skipped_unsupported: usize,
    /// Non-zero counts after initialisation.
    pub counts: Vec<AssignedCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedCount {
    pub compartment: String,
    pub species: String,
    pub count: f64,
}
