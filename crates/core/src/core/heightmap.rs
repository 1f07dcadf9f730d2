//! Surface height map and roughness of a deposited film.
//!
//! The substrate footprint is periodic in x and z. Every particle is binned
//! into a `bins x bins` grid over that footprint and each bin keeps the top of
//! the highest particle (`y + radius`) that landed in it. Roughness is the
//! population standard deviation of the bin heights.
//!
//! Bins nobody landed in stay at 0 and take part in the mean and the
//! roughness. With many bins and few particles this understates roughness.

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::Serialize;

use crate::species;
use crate::trajectory::{AnalysisFrame, Position};

/// Particles higher than this multiple of the mean height are taken to be in the gas phase.
pub const GAS_PHASE_FACTOR: f64 = 5.0;

/// Periodic footprint of the simulated substrate, in nm, renderer axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Footprint {
    pub lx: f32,
    pub lz: f32,
}

impl Footprint {
    /// Graphene substrate box. Simulation y maps to x, simulation x maps to z.
    pub const SUBSTRATE: Footprint = Footprint {
        lx: 3.9352,
        lz: 4.2600,
    };
}

impl Default for Footprint {
    fn default() -> Self {
        Self::SUBSTRATE
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeightMap {
    bins: usize,
    /// Row-major by x bin: `heights[bx * bins + bz]`.
    heights: Vec<f32>,
    mean: f32,
    min: f32,
    roughness: f32,
}

#[derive(Debug, Serialize)]
pub struct HeightMapReport<'a> {
    pub bins: usize,
    pub heights: &'a [f32],
    pub mean: f32,
    pub min: f32,
    pub roughness: f32,
    pub film_thickness: f32,
}

impl HeightMap {
    /// Height map of an analysis frame over the substrate, using tabulated radii.
    pub fn from_frame(frame: &AnalysisFrame, bins: usize) -> Option<Self> {
        compute_height_map(
            frame.positions(),
            &frame.species,
            species::radius_nm,
            bins,
            Footprint::SUBSTRATE,
        )
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    pub fn height(&self, bx: usize, bz: usize) -> Option<f32> {
        if bx >= self.bins || bz >= self.bins {
            return None;
        }
        self.heights.get(bx * self.bins + bz).copied()
    }

    pub fn mean(&self) -> f32 {
        self.mean
    }

    /// Lowest particle top among the particles that were binned.
    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn roughness(&self) -> f32 {
        self.roughness
    }

    /// Mean film thickness as displayed: mean surface height above the lowest particle top.
    pub fn film_thickness(&self) -> f32 {
        self.mean - self.min
    }

    pub fn report(&self) -> HeightMapReport<'_> {
        HeightMapReport {
            bins: self.bins,
            heights: &self.heights,
            mean: self.mean,
            min: self.min,
            roughness: self.roughness,
            film_thickness: self.film_thickness(),
        }
    }
}

/// Compute the height map of one frame.
///
/// `radius` maps a species to its radius in the same unit as the positions.
/// Returns `None` when there is nothing to analyse: no particles, `bins == 0`,
/// or every particle excluded as gas phase.
pub fn compute_height_map<R>(
    positions: &[Position],
    species: &[u8],
    radius: R,
    bins: usize,
    footprint: Footprint,
) -> Option<HeightMap>
where
    R: Fn(u8) -> f32 + Sync,
{
    if positions.is_empty() || bins == 0 {
        return None;
    }
    let cells = bins.checked_mul(bins)?;

    let mean_y =
        positions.iter().map(|p| p.y as f64).sum::<f64>() / positions.len() as f64;
    let cutoff = mean_y * GAS_PHASE_FACTOR;
    let scale_x = bins as f64 / footprint.lx as f64;
    let scale_z = bins as f64 / footprint.lz as f64;

    let contribution = |i: usize, p: &Position| -> Option<(usize, f32)> {
        if p.y as f64 > cutoff {
            return None;
        }
        let bx = periodic_bin(p.x as f64 * scale_x, bins);
        let bz = periodic_bin(p.z as f64 * scale_z, bins);
        let r = species.get(i).map(|&s| radius(s)).unwrap_or(0.0);
        Some((bx * bins + bz, p.y + r))
    };

    #[cfg(not(feature = "parallel"))]
    let (heights, min) = {
        let mut grid = Grid::new(cells);
        for (i, p) in positions.iter().enumerate() {
            if let Some((idx, ht)) = contribution(i, p) {
                grid.add(idx, ht);
            }
        }
        grid.finish()?
    };

    #[cfg(feature = "parallel")]
    let (heights, min) = positions
        .par_iter()
        .enumerate()
        .filter_map(|(i, p)| contribution(i, p))
        .fold(
            || Grid::new(cells),
            |mut grid, (idx, ht)| {
                grid.add(idx, ht);
                grid
            },
        )
        .reduce(|| Grid::new(cells), Grid::merge)
        .finish()?;

    let n = cells as f64;
    let mean = heights.iter().map(|&h| h as f64).sum::<f64>() / n;
    let sq_dev = heights
        .iter()
        .map(|&h| {
            let d = h as f64 - mean;
            d * d
        })
        .sum::<f64>();
    let roughness = (sq_dev / n).sqrt();

    Some(HeightMap {
        bins,
        heights,
        mean: mean as f32,
        min,
        roughness: roughness as f32,
    })
}

/// Wrap a scaled coordinate into `[0, bins)`.
fn periodic_bin(scaled: f64, bins: usize) -> usize {
    let b = scaled.floor() as i64;
    b.rem_euclid(bins as i64) as usize
}

struct Grid {
    heights: Vec<f32>,
    min: f32,
    contributed: bool,
}

impl Grid {
    fn new(cells: usize) -> Self {
        Self {
            heights: vec![0.0; cells],
            min: f32::MAX,
            contributed: false,
        }
    }

    fn add(&mut self, idx: usize, ht: f32) {
        if self.heights[idx] < ht {
            self.heights[idx] = ht;
        }
        if ht < self.min {
            self.min = ht;
        }
        self.contributed = true;
    }

    #[cfg(feature = "parallel")]
    fn merge(mut self, other: Self) -> Self {
        for (h, o) in self.heights.iter_mut().zip(other.heights) {
            if *h < o {
                *h = o;
            }
        }
        self.min = self.min.min(other.min);
        self.contributed |= other.contributed;
        self
    }

    fn finish(self) -> Option<(Vec<f32>, f32)> {
        self.contributed.then_some((self.heights, self.min))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FP: Footprint = Footprint::SUBSTRATE;

    fn no_radius(_: u8) -> f32 {
        0.0
    }

    /// One particle at the centre of every bin, all at height `y`.
    fn bin_centres(bins: usize, y: f32) -> Vec<Position> {
        let mut out = Vec::new();
        for bx in 0..bins {
            for bz in 0..bins {
                out.push(Position::new(
                    (bx as f32 + 0.5) * FP.lx / bins as f32,
                    y,
                    (bz as f32 + 0.5) * FP.lz / bins as f32,
                ));
            }
        }
        out
    }

    #[test]
    fn flat_film_has_zero_roughness() {
        let positions = bin_centres(4, 2.0);
        let species = vec![0; positions.len()];
        let hm = compute_height_map(&positions, &species, no_radius, 4, FP).unwrap();
        assert_eq!(hm.roughness(), 0.0);
        assert_eq!(hm.mean(), hm.min());
        assert_eq!(hm.mean(), 2.0);
        assert_eq!(hm.film_thickness(), 0.0);
    }

    #[test]
    fn single_particle_single_bin() {
        let positions = [Position::new(FP.lx / 2.0, 5.0, FP.lz / 2.0)];
        let hm = compute_height_map(&positions, &[0], no_radius, 1, FP).unwrap();
        assert_eq!(hm.heights(), &[5.0]);
        assert_eq!(hm.mean(), 5.0);
        assert_eq!(hm.min(), 5.0);
        assert_eq!(hm.roughness(), 0.0);
    }

    #[test]
    fn gas_phase_outlier_is_ignored() {
        let cluster = bin_centres(4, 1.0);
        let mut with_outlier = cluster.clone();
        with_outlier.push(Position::new(FP.lx * 0.1, 100.0, FP.lz * 0.1));

        let a = compute_height_map(&cluster, &[6; 16], no_radius, 4, FP).unwrap();
        let b = compute_height_map(&with_outlier, &[6; 17], no_radius, 4, FP).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn bins_wrap_periodically() {
        // One footprint to the left and one to the right land in the same bins.
        let positions = [
            Position::new(-FP.lx * 0.85, 1.0, FP.lz * 1.15),
            Position::new(FP.lx * 1.15, 3.0, -FP.lz * 0.85),
        ];
        let hm = compute_height_map(&positions, &[0, 0], no_radius, 10, FP).unwrap();
        assert_eq!(hm.height(1, 1), Some(3.0));
        assert_eq!(hm.min(), 1.0);
        assert_eq!(periodic_bin(-0.5, 10), 9);
        assert_eq!(periodic_bin(10.0, 10), 0);
    }

    #[test]
    fn bin_keeps_highest_top_including_radius() {
        let positions = [
            Position::new(0.1, 1.0, 0.1),
            Position::new(0.2, 1.1, 0.2),
            Position::new(0.15, 1.05, 0.15),
        ];
        let species = [5, 0, 7];
        let radius = |s: u8| if s == 5 { 0.5 } else { 0.0 };
        let hm = compute_height_map(&positions, &species, radius, 1, FP).unwrap();
        assert_eq!(hm.heights(), &[1.5]);
        assert_eq!(hm.min(), 1.05);
    }

    #[test]
    fn empty_bins_count_towards_mean() {
        let positions = [Position::new(0.1, 4.0, 0.1)];
        let hm = compute_height_map(&positions, &[0], no_radius, 2, FP).unwrap();
        assert_eq!(hm.mean(), 1.0);
        assert_eq!(hm.min(), 4.0);
        // Deviations: 3 and three times -1.
        assert!((hm.roughness() - 3.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn nothing_to_analyse() {
        assert!(compute_height_map(&[], &[], no_radius, 4, FP).is_none());
        let positions = [Position::new(0.0, 1.0, 0.0)];
        assert!(compute_height_map(&positions, &[0], no_radius, 0, FP).is_none());
        // Negative mean puts the cutoff below every particle.
        let sunk = [Position::new(0.0, -1.0, 0.0)];
        assert!(compute_height_map(&sunk, &[0], no_radius, 2, FP).is_none());
    }

    #[test]
    fn report_carries_thickness() {
        let positions = [Position::new(0.1, 4.0, 0.1)];
        let hm = compute_height_map(&positions, &[0], no_radius, 2, FP).unwrap();
        let json = serde_json::to_value(hm.report()).unwrap();
        assert_eq!(json["bins"], 2);
        assert_eq!(json["film_thickness"], -3.0);
    }
}
