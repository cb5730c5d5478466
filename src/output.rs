use crate::mesh::TetMesh;
use crate::partition::Geometry;
use anyhow::{bail, Context, Result};
use egfr_common::summary::{PatchSummary, RegionSummary, SetupSummary};
use log::{debug, error, info};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Bincode,
    MessagePack,
}

impl OutputFormat {
    /// Unknown names fall back to JSON.
    pub fn from_name(name: Option<&str>) -> Self {
        match name.unwrap_or("json") {
            "json" => OutputFormat::Json,
            "bincode" => OutputFormat::Bincode,
            "messagepack" => OutputFormat::MessagePack,
            other => {
                error!("Unknown output format: {}. Using JSON instead.", other);
                OutputFormat::Json
            }
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Bincode => "bin",
            OutputFormat::MessagePack => "msgpack",
        }
    }
}

pub fn summary_path(base_filename: &Path, format: OutputFormat) -> PathBuf {
    let mut name = base_filename.as_os_str().to_os_string();
    name.push(format!("_setup.{}", format.extension()));
    PathBuf::from(name)
}

pub fn region_csv_path(base_filename: &Path) -> PathBuf {
    let mut name = base_filename.as_os_str().to_os_string();
    name.push("_regions.csv");
    PathBuf::from(name)
}

/// Clears the way for one output file. Every rank creates the output
/// directory and refuses to clobber an existing file unless `replace` is set.
/// Only the coordinating rank (0) deletes old results; other ranks overwrite
/// their own file when they write it.
pub fn prepare_output(path: &Path, replace: bool, rank: usize) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory '{}'", parent.display()))?;
    }
    if !path.exists() {
        return Ok(());
    }
    if !replace {
        bail!(
            "Output '{}' already exists; set output.replace = true to overwrite it",
            path.display()
        );
    }
    if rank == 0 {
        fs::remove_file(path).with_context(|| format!("Failed to remove old output '{}'", path.display()))?;
        info!("Removed previous output '{}'", path.display());
    } else {
        debug!("Rank {} will overwrite '{}'", rank, path.display());
    }
    Ok(())
}

pub fn write_summary(summary: &SetupSummary, path: &Path, format: OutputFormat) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Error creating summary file '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);
    match format {
        OutputFormat::Json => serde_json::to_writer_pretty(&mut writer, summary)
            .with_context(|| format!("Error serializing summary to JSON '{}'", path.display()))?,
        OutputFormat::Bincode => bincode::serialize_into(&mut writer, summary)
            .with_context(|| format!("Error serializing summary to bincode '{}'", path.display()))?,
        OutputFormat::MessagePack => rmp_serde::encode::write(&mut writer, summary)
            .with_context(|| format!("Error serializing summary to MessagePack '{}'", path.display()))?,
    }
    writer.flush()?;
    info!("Setup summary saved to {} ({:?} format)", path.display(), format);
    Ok(())
}

#[derive(Serialize)]
struct RegionRow<'a> {
    region: &'a str,
    tet: usize,
    x: f64,
    y: f64,
    z: f64,
    volume: f64,
}

/// One row per tet of every compartment, for plotting outside the pipeline.
pub fn write_region_csv<W: Write>(writer: W, mesh: &TetMesh, geometry: &Geometry) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for compartment in &geometry.compartments {
        for tet in compartment.tets.iter() {
            let t = mesh.tet(tet);
            csv_writer.serialize(RegionRow {
                region: &compartment.name,
                tet: t.id,
                x: t.centroid.x,
                y: t.centroid.y,
                z: t.centroid.z,
                volume: t.volume,
            })?;
        }
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn region_summaries(mesh: &TetMesh, geometry: &Geometry) -> Vec<RegionSummary> {
    geometry
        .compartments
        .iter()
        .map(|c| RegionSummary {
            name: c.name.clone(),
            tet_count: c.tets.len(),
            volume: c.tets.volume(mesh),
        })
        .collect()
}

/// Patches first, then diffusion boundaries (which have no sides).
pub fn patch_summaries(mesh: &TetMesh, geometry: &Geometry) -> Vec<PatchSummary> {
    let patches = geometry.patches.iter().map(|p| PatchSummary {
        name: p.name.clone(),
        face_count: p.faces.len(),
        area: p.faces.area(mesh),
        inner: Some(p.inner.clone()),
        outer: Some(p.outer.clone()),
    });
    let boundaries = geometry.boundaries.iter().map(|b| PatchSummary {
        name: b.name.clone(),
        face_count: b.faces.len(),
        area: b.faces.area(mesh),
        inner: None,
        outer: None,
    });
    patches.chain(boundaries).collect()
}
