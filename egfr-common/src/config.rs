use serde::{Deserialize, Serialize};
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// Mesh input, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MeshConfig {
    pub path: PathBuf,
    // Multiplier from file units to metres (meshes are authored in micrometres)
    #[serde(default = "default_scale")]
    pub scale: f64,
}

// How the nucleus is carved out of the cell candidate region
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum NucleusSource {
    /// No nucleus compartment; the whole candidate region is cytoplasm.
    None,
    /// Explicit tet group written by the mesher.
    Group { name: String },
    /// Tets whose centroid lies strictly closer than `radius` to `center`.
    Radius {
        radius: f64,
        #[serde(default)]
        center: [f64; 3],
    },
}

// Names the engine knows the compartments, patch and boundary by
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CompartmentNames {
    #[serde(default = "default_nucleus_name")]
    pub nucleus: String,
    #[serde(default = "default_cytoplasm_name")]
    pub cytoplasm: String,
    #[serde(default = "default_extracellular_name")]
    pub extracellular: String,
    #[serde(default = "default_membrane_name")]
    pub membrane: String,
    #[serde(default = "default_envelope_name")]
    pub envelope: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CrossSectionConfig {
    /// 0 = x, 1 = y, 2 = z
    pub axis: usize,
    #[serde(default)]
    pub above: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RegionConfig {
    #[serde(default = "default_extracellular_group")]
    pub extracellular_group: String,
    #[serde(default = "default_cell_group")]
    pub cell_group: String,
    #[serde(default = "default_nucleus_source")]
    pub nucleus: NucleusSource,
    #[serde(default)]
    pub names: CompartmentNames,
    // Optional cut through the cytoplasm, reported in the summary
    #[serde(default)]
    pub cross_section: Option<CrossSectionConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TableUnit {
    /// Values are molecule counts.
    Count,
    /// Values are molar concentrations, converted with each compartment's volume.
    Molar,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct InitialValuesConfig {
    pub table: PathBuf,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_table_unit")]
    pub unit: TableUnit,
    // When set, factor is multiplied by cytoplasm volume / this volume
    #[serde(default)]
    pub reference_cytoplasm_volume_m3: Option<f64>,
    // Species to assign, in order; defaults to every row of the table
    #[serde(default)]
    pub species: Option<Vec<String>>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RunConfig {
    #[serde(default = "default_replicates")]
    pub replicates: u32,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_end_time")]
    pub end_time_s: f64,
    #[serde(default = "default_time_step")]
    pub time_step_s: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
    #[serde(default)]
    pub save_region_csv: bool,
    // Overwrite an existing summary instead of refusing to start
    #[serde(default)]
    pub replace: bool,
}

// Main setup configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SetupConfig {
    pub mesh: MeshConfig,
    #[serde(default)]
    pub regions: RegionConfig,
    pub initial_values: InitialValuesConfig,
    // Extra compartment -> species participation on top of the table's diffusion columns
    #[serde(default)]
    pub capabilities: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub run: RunConfig,
    pub output: OutputConfig,
    // Directory relative paths are resolved against; set by `load`
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for CompartmentNames {
    fn default() -> Self {
        CompartmentNames {
            nucleus: default_nucleus_name(),
            cytoplasm: default_cytoplasm_name(),
            extracellular: default_extracellular_name(),
            membrane: default_membrane_name(),
            envelope: default_envelope_name(),
        }
    }
}

impl Default for RegionConfig {
    fn default() -> Self {
        RegionConfig {
            extracellular_group: default_extracellular_group(),
            cell_group: default_cell_group(),
            nucleus: default_nucleus_source(),
            names: CompartmentNames::default(),
            cross_section: None,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            replicates: default_replicates(),
            seed: default_seed(),
            end_time_s: default_end_time(),
            time_step_s: default_time_step(),
        }
    }
}

impl SetupConfig {
    /// Loads the setup configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let mut config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;
        config.base_dir = path_ref.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    /// Parses and validates a configuration held in memory.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: SetupConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(self.mesh.scale > 0.0) {
            anyhow::bail!("mesh.scale must be positive.");
        }
        if !self.initial_values.factor.is_finite() || self.initial_values.factor < 0.0 {
            anyhow::bail!("initial_values.factor must be a non-negative number.");
        }
        if let Some(reference) = self.initial_values.reference_cytoplasm_volume_m3 {
            if !(reference > 0.0) {
                anyhow::bail!("initial_values.reference_cytoplasm_volume_m3 must be positive.");
            }
        }
        if let NucleusSource::Radius { radius, .. } = self.regions.nucleus {
            if !(radius > 0.0) {
                anyhow::bail!("regions.nucleus.radius must be positive.");
            }
        }
        if let Some(cut) = &self.regions.cross_section {
            if cut.axis > 2 {
                anyhow::bail!("regions.cross_section.axis must be 0, 1 or 2.");
            }
        }
        if !self.run.time_step_s.is_finite() || self.run.time_step_s <= 0.0 {
            anyhow::bail!("run.time_step_s must be a positive number.");
        }
        if !self.run.end_time_s.is_finite() || self.run.end_time_s <= 0.0 {
            anyhow::bail!("run.end_time_s must be a positive number.");
        }
        if self.run.replicates == 0 {
            anyhow::bail!("run.replicates must be greater than 0.");
        }
        if self.output.base_filename.trim().is_empty() {
            anyhow::bail!("output.base_filename must not be empty.");
        }
        Ok(())
    }

    /// Resolves a configured path against the directory of the config file.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

fn default_scale() -> f64 {
    1e-6
}

fn default_extracellular_group() -> String {
    "Volume1".to_string()
}

fn default_cell_group() -> String {
    "Volume2".to_string()
}

fn default_nucleus_source() -> NucleusSource {
    NucleusSource::Radius { radius: 5e-6, center: [0.0; 3] }
}

fn default_nucleus_name() -> String {
    "nuc".to_string()
}

fn default_cytoplasm_name() -> String {
    "cyt".to_string()
}

fn default_extracellular_name() -> String {
    "exo".to_string()
}

fn default_membrane_name() -> String {
    "cell_surface".to_string()
}

fn default_envelope_name() -> String {
    "nuc_mem".to_string()
}

fn default_factor() -> f64 {
    1.0
}

fn default_table_unit() -> TableUnit {
    TableUnit::Count
}

fn default_replicates() -> u32 {
    1
}

fn default_seed() -> u64 {
    2903
}

fn default_end_time() -> f64 {
    5.0
}

fn default_time_step() -> f64 {
    0.01
}
