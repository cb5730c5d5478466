use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use log::{debug, error, info, LevelFilter};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

mod abaqus;
mod error;
mod init_values;
mod mesh;
mod output;
mod partition;
mod replicate;
mod simulation;

#[cfg(test)]
mod fixtures;

use egfr_common::config::{SetupConfig, TableUnit};
use egfr_common::summary::{AssignedCount, ReplicateRecord, SetupSummary};
use init_values::{apply_initial_values, effective_factor, result_selections, InitialValueTable};
use output::OutputFormat;
use partition::{build_geometry, derive_compartment_sections, partition_mesh, GeometricPredicate};
use replicate::ReplicatePlan;
use simulation::{CapabilityTable, InMemorySimulation, Simulation};

#[derive(Parser, Debug)]
#[command(author, version, about = "Prepares the EGFR cell model: regions, initial values and replicate seeds", long_about = None)]
struct Args {
    /// Setup configuration (TOML)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Rank of this worker; rank 0 coordinates output
    #[arg(long, default_value_t = 0)]
    rank: usize,

    /// Number of workers the replicates are dealt over
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Derive regions and validate the table, but run no replicates and write nothing
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    Builder::from_default_env()
        .filter(None, LevelFilter::Info)
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("Setup failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    info!("Starting EGFR model setup (rank {} of {})...", args.rank, args.workers.max(1));
    let start_time = Instant::now();
    if args.rank >= args.workers.max(1) {
        anyhow::bail!("--rank {} is out of range for {} workers", args.rank, args.workers);
    }

    // --- Load Configuration ---
    let config = SetupConfig::load(&args.config)?;
    debug!("Setup configuration: {:#?}", config);

    let format = OutputFormat::from_name(config.output.format.as_deref());
    let base_filename = config.resolve_path(Path::new(&config.output.base_filename));
    let summary_paths: Vec<PathBuf> = (0..args.workers.max(1))
        .map(|rank| output::summary_path(&rank_base(&base_filename, rank, args.workers), format))
        .collect();
    let region_csv = output::region_csv_path(&base_filename);
    if !args.dry_run {
        output::prepare_output(&summary_paths[args.rank], config.output.replace, args.rank)?;
        if config.output.save_region_csv && args.rank == 0 {
            output::prepare_output(&region_csv, config.output.replace, args.rank)?;
        }
    }

    // --- Mesh and regions ---
    let mesh_path = config.resolve_path(&config.mesh.path);
    let mesh = abaqus::load_mesh(&mesh_path, config.mesh.scale)
        .with_context(|| format!("Failed to load mesh '{}'", mesh_path.display()))?;
    info!("Mesh volume {:.4e} m^3", mesh.total_volume());
    let partition = partition_mesh(&mesh, &config.regions)?;
    let geometry = build_geometry(&partition, &config.regions.names)?;
    for compartment in &geometry.compartments {
        info!(
            "Compartment '{}': {} tets, {:.4e} m^3",
            compartment.name,
            compartment.tets.len(),
            compartment.tets.volume(&mesh)
        );
    }
    info!(
        "Membrane-adjacent shell: {} of {} cell tets",
        partition.membrane_adjacent.len(),
        partition.candidate.len()
    );

    if let Some(cut) = &config.regions.cross_section {
        let predicate = GeometricPredicate::half_space(cut.axis, cut.above)?;
        let sections =
            derive_compartment_sections(&mesh, &partition, &config.regions.names, |t| predicate.matches(t));
        for (name, section) in &sections {
            info!(
                "Cross-section of '{}' (axis {}, above {:e}): {} tets on the cut side, {} faces, {} adjacent tets",
                name,
                cut.axis,
                cut.above,
                section.half.len(),
                section.faces.len(),
                section.tets.len()
            );
        }
    }

    // --- Initial values ---
    let table_path = config.resolve_path(&config.initial_values.table);
    let mut table = InitialValueTable::load(&table_path)?;
    if config.initial_values.unit == TableUnit::Molar {
        let volumes: BTreeMap<String, f64> = geometry
            .compartments
            .iter()
            .map(|c| (c.name.clone(), c.tets.volume(&mesh)))
            .collect();
        let surfaces: Vec<String> = geometry.patches.iter().map(|p| p.name.clone()).collect();
        table = table.to_counts(&volumes, &surfaces)?;
        info!("Converted molar initial values to molecule counts");
    }

    let species_names: Vec<String> = match &config.initial_values.species {
        Some(list) => list.clone(),
        None => table.species().map(str::to_string).collect(),
    };

    let mut capabilities = table.diffusion_capabilities();
    let mut configured = CapabilityTable::new();
    for (compartment, species) in &config.capabilities {
        configured.allow(compartment, species.iter().cloned());
    }
    capabilities.merge(&configured);
    let mut sim = InMemorySimulation::new(&geometry, &capabilities);
    for compartment in capabilities.compartments() {
        for species in capabilities.species(compartment) {
            match table.diffusion_constant(species, compartment) {
                Some(dc) => debug!("{} diffuses in '{}' at {:e} m^2/s", species, compartment, dc),
                None => debug!("{} is configured in '{}' without a diffusion constant", species, compartment),
            }
        }
    }

    let cytoplasm_volume = partition.cytoplasm.volume(&mesh);
    let factor = effective_factor(&config.initial_values, cytoplasm_volume);
    info!(
        "Initial value factor {} (configured {}), {} species",
        factor,
        config.initial_values.factor,
        species_names.len()
    );
    let selections = result_selections(&table, &geometry, &config.regions.names);

    if args.dry_run {
        let live = sim.capabilities();
        let report = apply_initial_values(&mut sim, &species_names, &live, &table, factor)?;
        info!(
            "Dry run: {} assignments, {} skipped, {} unknown table columns. Nothing written.",
            report.assigned,
            report.skipped_unsupported,
            report.unknown_columns.len()
        );
        return Ok(());
    }

    // --- Replicates ---
    let plan = ReplicatePlan::new(config.run.seed, config.run.replicates);
    let engine_steps = (config.run.end_time_s / config.run.time_step_s).ceil() as u64;
    info!(
        "Preparing {} of {} replicates ({} engine steps of {} s each)",
        plan.for_rank(args.rank, args.workers).count(),
        plan.len(),
        engine_steps,
        config.run.time_step_s
    );

    let mut records = Vec::new();
    for replicate in plan.for_rank(args.rank, args.workers) {
        sim.new_run();
        let live = sim.capabilities();
        let report = apply_initial_values(&mut sim, &species_names, &live, &table, factor)
            .with_context(|| format!("Failed to initialise replicate {}", replicate.run_id))?;
        let counts = assigned_counts(&sim, &live)?;
        info!(
            "Replicate {} (seed {}): {} assigned, {} skipped",
            replicate.run_id, replicate.seed, report.assigned, report.skipped_unsupported
        );
        records.push(ReplicateRecord {
            run_id: replicate.run_id,
            seed: replicate.seed,
            assigned: report.assigned,
            skipped_unsupported: report.skipped_unsupported,
            counts,
        });
    }

    // --- Save ---
    let summary = SetupSummary {
        mesh_path: mesh_path.display().to_string(),
        total_tets: mesh.num_tets(),
        regions: output::region_summaries(&mesh, &geometry),
        patches: output::patch_summaries(&mesh, &geometry),
        membrane_adjacent_tets: partition.membrane_adjacent.len(),
        effective_factor: factor,
        selections,
        replicates: records,
    };
    output::write_summary(&summary, &summary_paths[args.rank], format)?;

    if config.output.save_region_csv && args.rank == 0 {
        let file = File::create(&region_csv)
            .with_context(|| format!("Error creating region file '{}'", region_csv.display()))?;
        output::write_region_csv(BufWriter::new(file), &mesh, &geometry)?;
        info!("Region listing saved to {}", region_csv.display());
    } else if !config.output.save_region_csv {
        info!("Skipping region listing as per config (save_region_csv is false).");
    }

    let total_duration = start_time.elapsed();
    info!("Setup finished in {:.3} seconds.", total_duration.as_secs_f64());
    Ok(())
}

/// Non-zero counts of every supported pair, read back through the engine seam.
fn assigned_counts<S: Simulation + ?Sized>(sim: &S, capabilities: &CapabilityTable) -> Result<Vec<AssignedCount>> {
    let mut counts = Vec::new();
    for compartment in capabilities.compartments() {
        for species in capabilities.species(compartment) {
            let count = sim.count(compartment, species)?;
            if count > 0.0 {
                counts.push(AssignedCount {
                    compartment: compartment.to_string(),
                    species: species.to_string(),
                    count,
                });
            }
        }
    }
    Ok(counts)
}

/// Base filename for a rank's results; single-worker runs keep the plain name.
fn rank_base(base_filename: &Path, rank: usize, workers: usize) -> PathBuf {
    if workers <= 1 {
        return base_filename.to_path_buf();
    }
    let mut name = base_filename.as_os_str().to_os_string();
    name.push(format!("_rank{}", rank));
    PathBuf::from(name)
}
