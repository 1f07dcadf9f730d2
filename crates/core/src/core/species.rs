//! Species identifiers: periodic-table index with hydrogen = 0.
//!
//! The server maps atom names it does not recognise to 0, so unknown atoms
//! show up as hydrogen.

/// Radius used for elements without a tabulated van der Waals radius (Å).
pub const FALLBACK_RADIUS_ANGSTROM: f32 = 2.0;

const SYMBOLS: [&str; 118] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl",
    "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am", "Cm", "Bk",
    "Cf", "Es", "Fm", "Md", "No", "Lr", "Rf", "Db", "Sg", "Bh", "Hs", "Mt", "Ds", "Rg", "Cn", "Nh",
    "Fl", "Mc", "Lv", "Ts", "Og",
];

// van der Waals radii in Å, H through W.
const VDW_RADII: [f32; 74] = [
    1.20, 1.40, 1.82, 1.53, 1.92, 1.70, 1.55, 1.52, 1.47, 1.54, // H..Ne
    2.27, 1.73, 1.84, 2.10, 1.80, 1.80, 1.75, 1.88, // Na..Ar
    2.75, 2.31, 2.11, 1.87, 1.79, 1.89, 1.97, 1.94, 1.92, 1.63, 1.40, 1.39, // K..Zn
    1.87, 2.11, 1.85, 1.90, 1.85, 2.02, // Ga..Kr
    3.03, 2.49, 2.32, 2.23, 2.18, 2.17, 2.16, 2.13, 2.10, 1.63, 1.72, 1.58, // Rb..Cd
    1.93, 2.17, 2.06, 2.06, 1.98, 2.16, // In..Xe
    3.43, 2.68, 2.43, 2.42, 2.40, 2.39, 2.38, 2.36, 2.35, 2.34, 2.33, 2.31, 2.30, 2.29, 2.27,
    2.26, 2.24, // Cs..Lu
    2.23, 2.22, 2.18, // Hf..W
];

/// Element symbol, or `"X"` past the end of the table.
pub fn symbol(species: u8) -> &'static str {
    SYMBOLS.get(species as usize).copied().unwrap_or("X")
}

/// Display radius in Å.
pub fn radius_angstrom(species: u8) -> f32 {
    VDW_RADII
        .get(species as usize)
        .copied()
        .unwrap_or(FALLBACK_RADIUS_ANGSTROM)
}

/// Display radius in nm, the unit trajectories are stored in.
pub fn radius_nm(species: u8) -> f32 {
    radius_angstrom(species) / 10.0
}
