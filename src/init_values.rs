//! Species-by-compartment initial values and their assignment onto a live
//! simulation.
//!
//! The table is a CSV export of the species sheet: one row per species with a
//! `Species` column, `"<compartment> init count"` columns, optional
//! `"<compartment> DC"` diffusion constants and an optional `resultsselector`
//! column. Blank and `NaN` cells mean "no value".

use crate::error::ConfigurationError;
use crate::partition::Geometry;
use crate::simulation::{AssignError, CapabilityTable, Simulation};
use egfr_common::config::{CompartmentNames, InitialValuesConfig};
use egfr_common::summary::SelectionSummary;
use egfr_common::units::{molar_to_molecules, volume_ratio};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

const SPECIES_COLUMN: &str = "Species";
const INIT_SUFFIX: &str = " init count";
const DC_SUFFIX: &str = " DC";
const VOLUME_SUFFIX: &str = " Volume";
const SELECTOR_COLUMN: &str = "resultsselector";

/// How a species is recorded by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    /// Summed over the membrane triangles.
    Tris,
    /// Summed over the cytoplasm tets.
    Tets,
}

impl SelectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorKind::Tris => "TRIS",
            SelectorKind::Tets => "TETS",
        }
    }
}

#[derive(Debug, Clone)]
struct SpeciesRow {
    species: String,
    init: BTreeMap<String, f64>,
    diffusion: BTreeMap<String, f64>,
    selector: Option<SelectorKind>,
}

enum ColumnRole {
    Species,
    Init(String),
    Diffusion(String),
    Selector,
    Ignored,
}

/// Initial values keyed by (species, compartment).
#[derive(Debug, Clone)]
pub struct InitialValueTable {
    init_columns: Vec<String>,
    diffusion_columns: Vec<String>,
    rows: Vec<SpeciesRow>,
    index: HashMap<String, usize>,
}

impl InitialValueTable {
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let file = File::open(path).map_err(|e| {
            ConfigurationError::table(SPECIES_COLUMN, None, format!("cannot open '{}': {}", path.display(), e))
        })?;
        let table = Self::from_reader(file)?;
        info!(
            "Loaded initial value table '{}': {} species, compartments [{}]",
            path.display(),
            table.rows.len(),
            table.init_columns.join(", ")
        );
        Ok(table)
    }

    /// Parses the whole table; any malformed cell fails the load.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigurationError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader
            .headers()
            .map_err(|e| ConfigurationError::table(SPECIES_COLUMN, None, format!("unreadable header: {}", e)))?
            .clone();

        let mut species_col = None;
        let mut roles = Vec::with_capacity(headers.len());
        let mut init_columns: Vec<String> = Vec::new();
        let mut diffusion_columns: Vec<String> = Vec::new();
        for (col, header) in headers.iter().enumerate() {
            let role = classify_header(header);
            match &role {
                ColumnRole::Species => {
                    if species_col.replace(col).is_some() {
                        return Err(ConfigurationError::table(header, None, "duplicate column"));
                    }
                }
                ColumnRole::Init(compartment) => {
                    if init_columns.contains(compartment) {
                        return Err(ConfigurationError::table(header, None, "duplicate column"));
                    }
                    init_columns.push(compartment.clone());
                }
                ColumnRole::Diffusion(compartment) => {
                    if diffusion_columns.contains(compartment) {
                        return Err(ConfigurationError::table(header, None, "duplicate column"));
                    }
                    diffusion_columns.push(compartment.clone());
                }
                ColumnRole::Selector => {}
                ColumnRole::Ignored => debug!("Ignoring table column '{}'", header),
            }
            roles.push(role);
        }
        let species_col =
            species_col.ok_or_else(|| ConfigurationError::table(SPECIES_COLUMN, None, "missing column"))?;

        let mut rows = Vec::new();
        let mut index = HashMap::new();
        for (row_idx, record) in csv_reader.records().enumerate() {
            let row_no = row_idx + 1;
            let record = record.map_err(|e| record_error(&e, &headers, row_no))?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            let species = record.get(species_col).unwrap_or_default().to_string();
            if species.is_empty() {
                return Err(ConfigurationError::table(SPECIES_COLUMN, Some(row_no), "blank species name"));
            }

            let mut row = SpeciesRow {
                species: species.clone(),
                init: BTreeMap::new(),
                diffusion: BTreeMap::new(),
                selector: None,
            };
            for ((role, cell), header) in roles.iter().zip(record.iter()).zip(headers.iter()) {
                match role {
                    ColumnRole::Init(compartment) => {
                        if let Some(v) = parse_cell(cell, header, row_no)? {
                            row.init.insert(compartment.clone(), v);
                        }
                    }
                    ColumnRole::Diffusion(compartment) => {
                        if let Some(v) = parse_cell(cell, header, row_no)? {
                            row.diffusion.insert(compartment.clone(), v);
                        }
                    }
                    ColumnRole::Selector => row.selector = parse_selector(cell, header, row_no)?,
                    ColumnRole::Species | ColumnRole::Ignored => {}
                }
            }

            if index.insert(species.clone(), rows.len()).is_some() {
                return Err(ConfigurationError::table(
                    SPECIES_COLUMN,
                    Some(row_no),
                    format!("duplicate species '{}'", species),
                ));
            }
            rows.push(row);
        }

        Ok(InitialValueTable { init_columns, diffusion_columns, rows, index })
    }

    /// Compartments with an init count column, in header order.
    pub fn compartments(&self) -> &[String] {
        &self.init_columns
    }

    pub fn has_column(&self, compartment: &str) -> bool {
        self.init_columns.iter().any(|c| c == compartment)
    }

    /// Species in table order.
    pub fn species(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.species.as_str())
    }

    /// `None` when the table has no column for `compartment`; otherwise the
    /// value, with blank cells and unknown species reading as 0.
    pub fn value(&self, species: &str, compartment: &str) -> Option<f64> {
        if !self.has_column(compartment) {
            return None;
        }
        Some(
            self.row(species)
                .and_then(|r| r.init.get(compartment).copied())
                .unwrap_or(0.0),
        )
    }

    pub fn diffusion_constant(&self, species: &str, compartment: &str) -> Option<f64> {
        self.row(species).and_then(|r| r.diffusion.get(compartment).copied())
    }

    pub fn selector(&self, species: &str) -> Option<SelectorKind> {
        self.row(species).and_then(|r| r.selector)
    }

    /// Species diffusing in each compartment. A species that diffuses in a
    /// compartment takes part in its reaction network.
    pub fn diffusion_capabilities(&self) -> CapabilityTable {
        let mut table = CapabilityTable::new();
        for compartment in &self.diffusion_columns {
            table.add_compartment(compartment);
        }
        for row in &self.rows {
            for compartment in row.diffusion.keys() {
                table.allow(compartment, [row.species.clone()]);
            }
        }
        table
    }

    /// Converts molar concentrations to molecule counts using each
    /// compartment's volume in m^3. A column for one of the `surfaces` fails
    /// the conversion, as a surface has no volume to convert with. Columns
    /// naming nothing live are left as-is; the mapper skips them.
    pub fn to_counts(
        &self,
        volumes: &BTreeMap<String, f64>,
        surfaces: &[String],
    ) -> Result<InitialValueTable, ConfigurationError> {
        for column in &self.init_columns {
            if surfaces.contains(column) {
                return Err(ConfigurationError::table(
                    format!("{}{}", column, INIT_SUFFIX),
                    None,
                    format!("molar values cannot be converted on surface '{}'", column),
                ));
            }
            if !volumes.contains_key(column) {
                warn!("No volume for column '{}', keeping its values unconverted", column);
            }
        }
        let mut converted = self.clone();
        for row in &mut converted.rows {
            for (compartment, value) in row.init.iter_mut() {
                if let Some(&volume) = volumes.get(compartment) {
                    *value = molar_to_molecules(*value, volume);
                }
            }
        }
        Ok(converted)
    }

    fn row(&self, species: &str) -> Option<&SpeciesRow> {
        self.index.get(species).map(|&i| &self.rows[i])
    }
}

/// Names the first column a short record is missing; longer records and
/// other read errors are charged to the species column.
fn record_error(err: &csv::Error, headers: &csv::StringRecord, row: usize) -> ConfigurationError {
    if let csv::ErrorKind::UnequalLengths { expected_len, len, .. } = err.kind() {
        let column = usize::try_from(*len)
            .ok()
            .and_then(|i| headers.get(i))
            .unwrap_or(SPECIES_COLUMN);
        return ConfigurationError::table(
            column,
            Some(row),
            format!("record has {} fields, header has {}", len, expected_len),
        );
    }
    ConfigurationError::table(SPECIES_COLUMN, Some(row), err.to_string())
}

fn classify_header(header: &str) -> ColumnRole {
    if header.eq_ignore_ascii_case(SPECIES_COLUMN) {
        ColumnRole::Species
    } else if header.eq_ignore_ascii_case(SELECTOR_COLUMN) {
        ColumnRole::Selector
    } else if let Some(prefix) = strip_suffix_ignore_case(header, INIT_SUFFIX) {
        ColumnRole::Init(prefix.trim().to_string())
    } else if let Some(prefix) = header.strip_suffix(DC_SUFFIX) {
        let prefix = strip_suffix_ignore_case(prefix, VOLUME_SUFFIX).unwrap_or(prefix);
        ColumnRole::Diffusion(prefix.trim().to_string())
    } else {
        ColumnRole::Ignored
    }
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let split = s.len().checked_sub(suffix.len())?;
    if s.is_char_boundary(split) && s[split..].eq_ignore_ascii_case(suffix) {
        Some(&s[..split])
    } else {
        None
    }
}

fn parse_cell(cell: &str, column: &str, row: usize) -> Result<Option<f64>, ConfigurationError> {
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    let value: f64 = cell
        .parse()
        .map_err(|_| ConfigurationError::table(column, Some(row), format!("not a number: '{}'", cell)))?;
    if value.is_nan() {
        return Ok(None);
    }
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigurationError::table(
            column,
            Some(row),
            format!("value must be finite and non-negative, got {}", cell),
        ));
    }
    Ok(Some(value))
}

fn parse_selector(cell: &str, column: &str, row: usize) -> Result<Option<SelectorKind>, ConfigurationError> {
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        Ok(None)
    } else if cell.eq_ignore_ascii_case("TRIS") {
        Ok(Some(SelectorKind::Tris))
    } else if cell.eq_ignore_ascii_case("TETS") {
        Ok(Some(SelectorKind::Tets))
    } else {
        Err(ConfigurationError::table(column, Some(row), format!("expected TRIS or TETS, got '{}'", cell)))
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Assignment(#[from] AssignError),
}

/// What one call of [`apply_initial_values`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentReport {
    pub assigned: usize,
    /// Pairs skipped because the species is not part of the compartment.
    pub skipped_unsupported: usize,
    /// Table columns with no live compartment.
    pub unknown_columns: Vec<String>,
    /// Live compartments the table has no column for.
    pub untouched_compartments: Vec<String>,
}

/// Sets `factor * table[species, compartment]` as the absolute count of every
/// species in every live compartment that has a table column.
///
/// Pairs the capability table excludes, or that the simulation refuses with
/// [`AssignError::UnsupportedSpecies`], are skipped; any other refusal aborts
/// the call. Assignments are absolute, so repeating a call with the same
/// inputs leaves the same state.
pub fn apply_initial_values<S>(
    simulation: &mut S,
    species_names: &[String],
    compartments: &CapabilityTable,
    table: &InitialValueTable,
    factor: f64,
) -> Result<AssignmentReport, ApplyError>
where
    S: Simulation + ?Sized,
{
    if !factor.is_finite() || factor < 0.0 {
        return Err(ConfigurationError::InvalidFactor { factor }.into());
    }

    let mut report = AssignmentReport::default();
    for column in table.compartments() {
        if !compartments.has_compartment(column) {
            warn!("Table column '{}{}' matches no compartment, skipping it", column, INIT_SUFFIX);
            report.unknown_columns.push(column.clone());
        }
    }

    for compartment in compartments.compartments() {
        if !table.has_column(compartment) {
            debug!("No initial values for compartment '{}'", compartment);
            report.untouched_compartments.push(compartment.to_string());
            continue;
        }
        for species in species_names {
            if !compartments.supports(compartment, species) {
                debug!("Skipping '{}' in '{}': not part of its reaction network", species, compartment);
                report.skipped_unsupported += 1;
                continue;
            }
            let count = table.value(species, compartment).unwrap_or(0.0) * factor;
            match simulation.set_count(compartment, species, count) {
                Ok(()) => {
                    debug!("{}.{} = {}", compartment, species, count);
                    report.assigned += 1;
                }
                Err(AssignError::UnsupportedSpecies { .. }) => {
                    debug!("Simulation rejected '{}' in '{}', skipping", species, compartment);
                    report.skipped_unsupported += 1;
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    Ok(report)
}

/// Configured factor, scaled by the cytoplasm volume relative to the
/// reference volume when one is configured.
pub fn effective_factor(config: &InitialValuesConfig, cytoplasm_volume: f64) -> f64 {
    match config.reference_cytoplasm_volume_m3 {
        Some(reference) => config.factor * volume_ratio(cytoplasm_volume, reference),
        None => config.factor,
    }
}

/// Recording targets for every species with a selector.
pub fn result_selections(
    table: &InitialValueTable,
    geometry: &Geometry,
    names: &CompartmentNames,
) -> Vec<SelectionSummary> {
    table
        .species()
        .filter_map(|species| {
            let kind = table.selector(species)?;
            let (target, target_size) = match kind {
                SelectorKind::Tris => (&names.membrane, geometry.patch(&names.membrane).map_or(0, |p| p.faces.len())),
                SelectorKind::Tets => (
                    &names.cytoplasm,
                    geometry.compartment(&names.cytoplasm).map_or(0, |c| c.tets.len()),
                ),
            };
            Some(SelectionSummary {
                species: species.to_string(),
                kind: kind.as_str().to_string(),
                target: target.clone(),
                target_size,
            })
        })
        .collect()
}
