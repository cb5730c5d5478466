use crate::partition::Geometry;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Why a single count assignment was refused.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AssignError {
    /// The species takes no part in the compartment's reaction network.
    /// Expected and recoverable; callers skip the pair.
    #[error("species '{species}' is not part of compartment '{compartment}'")]
    UnsupportedSpecies { compartment: String, species: String },

    #[error("no compartment or patch named '{compartment}'")]
    UnknownCompartment { compartment: String },

    #[error("invalid count {count} for '{species}' in '{compartment}'")]
    InvalidCount { compartment: String, species: String, count: f64 },
}

/// Species each live compartment or patch supports, computed once from the
/// model before any assignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityTable {
    regions: BTreeMap<String, BTreeSet<String>>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a compartment, possibly with no species.
    pub fn add_compartment(&mut self, compartment: &str) {
        self.regions.entry(compartment.to_string()).or_default();
    }

    pub fn allow<I, S>(&mut self, compartment: &str, species: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.regions
            .entry(compartment.to_string())
            .or_default()
            .extend(species.into_iter().map(Into::into));
    }

    pub fn has_compartment(&self, compartment: &str) -> bool {
        self.regions.contains_key(compartment)
    }

    pub fn supports(&self, compartment: &str, species: &str) -> bool {
        self.regions.get(compartment).is_some_and(|s| s.contains(species))
    }

    pub fn compartments(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }

    pub fn species(&self, compartment: &str) -> impl Iterator<Item = &str> {
        self.regions.get(compartment).into_iter().flatten().map(String::as_str)
    }

    /// Adds every entry of `other`.
    pub fn merge(&mut self, other: &CapabilityTable) {
        for (compartment, species) in &other.regions {
            self.allow(compartment, species.iter().cloned());
        }
    }

    /// Keeps only compartments present in the geometry.
    pub fn restrict_to(&mut self, names: &[String]) {
        self.regions.retain(|name, _| {
            let keep = names.iter().any(|n| n == name);
            if !keep {
                debug!("Dropping capabilities for '{}', no such compartment in the geometry", name);
            }
            keep
        });
    }
}

/// The seam to the stochastic engine: per-compartment species counts that
/// can be set before each replicate.
pub trait Simulation {
    /// Live compartments and patches with the species each supports.
    fn capabilities(&self) -> CapabilityTable;

    /// Sets the absolute count of `species` in `compartment`.
    fn set_count(&mut self, compartment: &str, species: &str, count: f64) -> Result<(), AssignError>;

    fn count(&self, compartment: &str, species: &str) -> Result<f64, AssignError>;

    /// Resets state for a new replicate.
    fn new_run(&mut self);
}

/// Engine stand-in holding whole-molecule counts.
///
/// Counts are stored as integers: a fractional request is truncated toward
/// zero (2.9 becomes 2). Negative and non-finite requests are rejected.
#[derive(Debug, Clone)]
pub struct InMemorySimulation {
    capabilities: CapabilityTable,
    counts: BTreeMap<(String, String), u64>,
}

impl InMemorySimulation {
    /// Creates a simulation over the geometry's compartments and patches.
    /// Capabilities for names not in the geometry are dropped.
    pub fn new(geometry: &Geometry, capabilities: &CapabilityTable) -> Self {
        let names = geometry.region_names();
        let mut table = capabilities.clone();
        table.restrict_to(&names);
        for name in &names {
            table.add_compartment(name);
        }
        InMemorySimulation { capabilities: table, counts: BTreeMap::new() }
    }

    /// Creates a simulation directly from a capability table.
    #[cfg(test)]
    pub fn from_capabilities(capabilities: CapabilityTable) -> Self {
        InMemorySimulation { capabilities, counts: BTreeMap::new() }
    }

    /// All non-zero counts, ordered by compartment then species.
    #[cfg(test)]
    pub fn nonzero_counts(&self) -> impl Iterator<Item = (&str, &str, u64)> {
        self.counts
            .iter()
            .filter(|&(_, &n)| n > 0)
            .map(|((c, s), &n)| (c.as_str(), s.as_str(), n))
    }

    fn check(&self, compartment: &str, species: &str) -> Result<(), AssignError> {
        if !self.capabilities.has_compartment(compartment) {
            return Err(AssignError::UnknownCompartment { compartment: compartment.to_string() });
        }
        if !self.capabilities.supports(compartment, species) {
            return Err(AssignError::UnsupportedSpecies {
                compartment: compartment.to_string(),
                species: species.to_string(),
            });
        }
        Ok(())
    }
}

impl Simulation for InMemorySimulation {
    fn capabilities(&self) -> CapabilityTable {
        self.capabilities.clone()
    }

    fn set_count(&mut self, compartment: &str, species: &str, count: f64) -> Result<(), AssignError> {
        self.check(compartment, species)?;
        if !count.is_finite() || count < 0.0 {
            return Err(AssignError::InvalidCount {
                compartment: compartment.to_string(),
                species: species.to_string(),
                count,
            });
        }
        self.counts
            .insert((compartment.to_string(), species.to_string()), count.trunc() as u64);
        Ok(())
    }

    fn count(&self, compartment: &str, species: &str) -> Result<f64, AssignError> {
        self.check(compartment, species)?;
        Ok(self
            .counts
            .get(&(compartment.to_string(), species.to_string()))
            .copied()
            .unwrap_or(0) as f64)
    }

    fn new_run(&mut self) {
        self.counts.clear();
    }
}
