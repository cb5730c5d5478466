/// Avogadro constant (1/mol).
pub const AVOGADRO: f64 = 6.022_140_76e23;

/// Number of molecules at molar concentration `molar` (mol/L) in `volume_m3` cubic metres.
/// One mol/L is 1000 mol/m^3.
pub fn molar_to_molecules(molar: f64, volume_m3: f64) -> f64 {
    molar * AVOGADRO * volume_m3 * 1e3
}

/// Ratio of a mesh volume to a reference volume, used to keep initial
/// concentrations constant across meshes of different size.
/// Returns 1.0 when the reference volume is not positive.
pub fn volume_ratio(volume_m3: f64, reference_m3: f64) -> f64 {
    if reference_m3 > 0.0 {
        volume_m3 / reference_m3
    } else {
        1.0
    }
}
