//! Removal of soil from a segmentation mask.
//!
//! Soil shows up in tomography scans as compact clumps that are denser, and
//! therefore brighter, than the material of interest. Foreground voxels are
//! grouped into 6-connected components; a component is treated as soil when
//! it is large enough not to be speckle and its mean intensity sits in the
//! upper part of the foreground intensity distribution.

use std::collections::VecDeque;

use crate::error::{Result, SegmentError};
use crate::volume::{Mask, Volume};

use log::debug;
use ndarray::{Array3, Zip};
use rayon::prelude::*;

/// Tunable constants of the soil heuristic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoilConfig {
    /// Components with fewer voxels are never removed.
    pub min_component_size: usize,
    /// Fraction of foreground voxels whose intensity lies below the soil cutoff.
    pub intensity_percentile: f64,
}

impl SoilConfig {
    pub const DEFAULT_MIN_COMPONENT_SIZE: usize = 64;
    pub const DEFAULT_INTENSITY_PERCENTILE: f64 = 0.75;

    pub fn validate(&self) -> Result<()> {
        if self.min_component_size == 0 {
            return Err(SegmentError::InvalidParameter(
                "soil minimum component size must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.intensity_percentile) {
            return Err(SegmentError::InvalidParameter(format!(
                "soil intensity percentile {} is outside [0, 1]",
                self.intensity_percentile
            )));
        }
        Ok(())
    }
}

impl Default for SoilConfig {
    fn default() -> Self {
        Self {
            min_component_size: Self::DEFAULT_MIN_COMPONENT_SIZE,
            intensity_percentile: Self::DEFAULT_INTENSITY_PERCENTILE,
        }
    }
}

/// Size and intensity of one connected foreground component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Component {
    pub size: usize,
    pub mean_intensity: f64,
}

/// What a soil pass found and removed.
#[derive(Debug, Clone, PartialEq)]
pub struct SoilReport {
    pub components: usize,
    pub removed_components: usize,
    pub removed_voxels: usize,
    pub intensity_cutoff: u16,
}

pub struct SoilRemover {
    config: SoilConfig,
}

impl SoilRemover {
    pub fn new(config: SoilConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SoilConfig {
        &self.config
    }

    /// Clear soil components from `mask`.
    ///
    /// Voxels are only ever cleared, never set.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::Processing`] if the volume and mask dimensions differ
    pub fn remove(&self, volume: &Volume, mask: Mask) -> Result<(Mask, SoilReport)> {
        if volume.dim() != mask.dim() {
            return Err(SegmentError::Processing(format!(
                "volume is {:?} but its mask is {:?}",
                volume.dim(),
                mask.dim()
            )));
        }

        let cutoff = self.intensity_cutoff(volume, &mask);
        let (labels, components) = label_components(volume, &mask);

        // Label 0 is background; component `i` carries label `i + 1`.
        let soil: Vec<bool> = std::iter::once(false)
            .chain(components.iter().map(|component| {
                component.size >= self.config.min_component_size
                    && component.mean_intensity >= f64::from(cutoff)
            }))
            .collect();

        let removed_voxels: usize = components
            .iter()
            .zip(&soil[1..])
            .filter(|(_, is_soil)| **is_soil)
            .map(|(component, _)| component.size)
            .sum();
        let report = SoilReport {
            components: components.len(),
            removed_components: soil.iter().filter(|&&s| s).count(),
            removed_voxels,
            intensity_cutoff: cutoff,
        };
        debug!("soil pass: {report:?}");

        let data = Zip::from(mask.data())
            .and(&labels)
            .par_map_collect(|&foreground, &label| foreground && !soil[label as usize]);
        Ok((Mask::new(data), report))
    }

    /// Intensity at the configured percentile of all foreground voxels.
    fn intensity_cutoff(&self, volume: &Volume, mask: &Mask) -> u16 {
        let bins = volume.bit_depth().max_value() as usize + 1;
        let histogram = Zip::from(volume.data())
            .and(mask.data())
            .into_par_iter()
            .fold(
                || vec![0u64; bins],
                |mut histogram, (&v, &foreground)| {
                    if foreground {
                        histogram[v as usize] += 1;
                    }
                    histogram
                },
            )
            .reduce(
                || vec![0u64; bins],
                |mut a, b| {
                    a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                    a
                },
            );
        percentile(&histogram, self.config.intensity_percentile)
    }
}

/// Smallest value whose cumulative share of `histogram` reaches `fraction`.
fn percentile(histogram: &[u64], fraction: f64) -> u16 {
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0;
    }
    let target = ((total as f64 * fraction).ceil() as u64).max(1);
    let mut cumulative = 0;
    for (value, &count) in histogram.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return value as u16;
        }
    }
    (histogram.len() - 1) as u16
}

/// Label 6-connected foreground components with breadth-first flood fill.
///
/// Returns the label volume (0 for background) and the statistics of each
/// component in label order.
pub fn label_components(volume: &Volume, mask: &Mask) -> (Array3<u32>, Vec<Component>) {
    let (depth, height, width) = mask.dim();
    let mut labels = Array3::<u32>::zeros((depth, height, width));
    let mut components = Vec::new();
    let mut queue = VecDeque::new();

    let foreground = mask.data();
    let intensities = volume.data();

    for z in 0..depth {
        for y in 0..height {
            for x in 0..width {
                if !foreground[[z, y, x]] || labels[[z, y, x]] != 0 {
                    continue;
                }

                let label = components.len() as u32 + 1;
                let mut size = 0usize;
                let mut sum = 0u64;
                labels[[z, y, x]] = label;
                queue.push_back((z, y, x));

                while let Some((cz, cy, cx)) = queue.pop_front() {
                    size += 1;
                    sum += u64::from(intensities[[cz, cy, cx]]);

                    for (nz, ny, nx) in neighbours((cz, cy, cx), (depth, height, width)) {
                        if foreground[[nz, ny, nx]] && labels[[nz, ny, nx]] == 0 {
                            labels[[nz, ny, nx]] = label;
                            queue.push_back((nz, ny, nx));
                        }
                    }
                }

                components.push(Component {
                    size,
                    mean_intensity: sum as f64 / size as f64,
                });
            }
        }
    }

    (labels, components)
}

fn neighbours(
    (z, y, x): (usize, usize, usize),
    (depth, height, width): (usize, usize, usize),
) -> impl Iterator<Item = (usize, usize, usize)> {
    let candidates = [
        (z.checked_sub(1), Some(y), Some(x)),
        ((z + 1 < depth).then_some(z + 1), Some(y), Some(x)),
        (Some(z), y.checked_sub(1), Some(x)),
        (Some(z), (y + 1 < height).then_some(y + 1), Some(x)),
        (Some(z), Some(y), x.checked_sub(1)),
        (Some(z), Some(y), (x + 1 < width).then_some(x + 1)),
    ];
    candidates
        .into_iter()
        .filter_map(|(z, y, x)| Some((z?, y?, x?)))
}
