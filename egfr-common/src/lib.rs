pub mod config;
pub mod summary;
pub mod units;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{SetupConfig, MeshConfig, RegionConfig, NucleusSource, InitialValuesConfig, TableUnit, RunConfig, OutputConfig};
pub use summary::{SetupSummary, RegionSummary, PatchSummary, ReplicateRecord, AssignedCount, SelectionSummary};
pub use units::{molar_to_molecules, volume_ratio, AVOGADRO};
pub use vecmath::{Vec3, tet_centroid, tet_volume, triangle_area};
