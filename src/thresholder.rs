use std::fmt;
use std::str::FromStr;

use crate::enums::BitDepth;
use crate::error::{Result, SegmentError};
use crate::volume::{Mask, Volume};

use ndarray::{Axis, Zip};
use rayon::prelude::*;

/// Inclusive intensity bounds; a voxel is foreground iff `min <= v <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threshold {
    min: u16,
    max: u16,
}

impl Threshold {
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidParameter`] unless `min < max`
    pub fn new(min: u16, max: u16) -> Result<Self> {
        if min >= max {
            return Err(SegmentError::InvalidParameter(format!(
                "lower bound ({min}) must be smaller than the upper bound ({max})"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u16 {
        self.min
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    #[inline]
    pub fn contains(&self, value: u16) -> bool {
        self.min <= value && value <= self.max
    }

    fn check_bit_depth(&self, bit_depth: BitDepth) -> Result<()> {
        if self.max > bit_depth.max_value() {
            return Err(SegmentError::InvalidParameter(format!(
                "upper bound {} exceeds the {bit_depth} maximum of {}",
                self.max,
                bit_depth.max_value()
            )));
        }
        Ok(())
    }
}

/// Intensity 0 is reserved for undefined voxels, so the default range starts at 1.
impl Default for Threshold {
    fn default() -> Self {
        Self { min: 1, max: 255 }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Threshold as given on the command line, where either side may be left open.
///
/// Open sides are filled in once the volume's bit depth is known: the lower
/// bound becomes 1, the upper bound the largest representable sample.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdBounds {
    pub min: Option<u16>,
    pub max: Option<u16>,
}

impl ThresholdBounds {
    pub fn new(min: Option<u16>, max: Option<u16>) -> Self {
        Self { min, max }
    }

    /// Reject bounds that cannot be valid at any bit depth.
    pub fn validate(&self) -> Result<()> {
        let min = self.min.unwrap_or(Threshold::default().min);
        match self.max {
            Some(max) => Threshold::new(min, max).map(|_| ()),
            None if min >= u16::MAX => Err(SegmentError::InvalidParameter(format!(
                "lower bound ({min}) leaves no room for an upper bound"
            ))),
            None => Ok(()),
        }
    }

    pub fn resolve(self, bit_depth: BitDepth) -> Result<Threshold> {
        let threshold = Threshold::new(
            self.min.unwrap_or(Threshold::default().min),
            self.max.unwrap_or(bit_depth.max_value()),
        )?;
        threshold.check_bit_depth(bit_depth)?;
        Ok(threshold)
    }
}

impl From<Threshold> for ThresholdBounds {
    fn from(threshold: Threshold) -> Self {
        Self::new(Some(threshold.min), Some(threshold.max))
    }
}

/// Parses `LO,HI`, `LO,`, `,HI` or a single `LO` (same as `LO,`).
impl FromStr for ThresholdBounds {
    type Err = SegmentError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SegmentError::InvalidParameter(format!("invalid thresholds: {s:?}"));
        let parse_bound = |bound: &str| -> Result<Option<u16>> {
            let bound = bound.trim();
            if bound.is_empty() {
                return Ok(None);
            }
            if bound.starts_with('-') {
                return Err(SegmentError::InvalidParameter(format!(
                    "{bound:?} cannot be a negative number"
                )));
            }
            bound.parse().map(Some).map_err(|_| invalid())
        };

        let bounds = match s.split(',').collect::<Vec<_>>().as_slice() {
            [single] => Self::new(parse_bound(*single)?, None),
            [lower, upper] => Self::new(parse_bound(*lower)?, parse_bound(*upper)?),
            _ => return Err(invalid()),
        };
        bounds.validate()?;
        Ok(bounds)
    }
}

pub struct Thresholder;

impl Thresholder {
    /// Segment `volume` with the given bounds, or with bounds picked from its
    /// histogram when `threshold` is `None`
    pub fn segment(volume: &Volume, threshold: Option<Threshold>) -> Result<Mask> {
        let threshold = match threshold {
            Some(threshold) => threshold,
            None => Self::auto_threshold(volume)?,
        };
        Self::apply(volume, threshold)
    }

    /// Mark every voxel inside `threshold` as foreground
    pub fn apply(volume: &Volume, threshold: Threshold) -> Result<Mask> {
        Threshold::new(threshold.min, threshold.max)?;
        threshold.check_bit_depth(volume.bit_depth())?;

        let data = Zip::from(volume.data()).par_map_collect(|&v| threshold.contains(v));
        Ok(Mask::new(data))
    }

    /// Intensity histogram with one bin per representable sample value
    pub fn histogram(volume: &Volume) -> Vec<u64> {
        let bins = volume.bit_depth().max_value() as usize + 1;
        volume
            .data()
            .axis_iter(Axis(0))
            .into_par_iter()
            .fold(
                || vec![0u64; bins],
                |mut histogram, slice| {
                    for &v in slice.iter() {
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
            )
    }

    /// Pick bounds isolating the bright population of a bimodal histogram.
    ///
    /// Zero-valued voxels are ignored. The valley `t` maximizes Otsu's
    /// between-class variance of the dim `[1, t]` and bright `[t + 1, max]`
    /// classes, and the result is `[t + 1, 2^bits - 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::Processing`] when fewer than two distinct
    /// non-zero intensities exist or no valid bounds remain above the valley
    pub fn auto_threshold(volume: &Volume) -> Result<Threshold> {
        let histogram = Self::histogram(volume);
        let limit = volume.bit_depth().max_value();

        let populated = histogram[1..].iter().filter(|&&count| count > 0).count();
        if populated < 2 {
            return Err(SegmentError::Processing(format!(
                "cannot pick a threshold: histogram has {populated} distinct non-zero intensities"
            )));
        }

        let total: f64 = histogram[1..].iter().map(|&c| c as f64).sum();
        let sum_total: f64 = histogram
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, &c)| i as f64 * c as f64)
            .sum();

        let mut weight_background = 0.0;
        let mut sum_background = 0.0;
        let mut max_variance = 0.0;
        let mut valley = None;

        for (t, &count) in histogram.iter().enumerate().skip(1) {
            weight_background += count as f64;
            if weight_background == 0.0 {
                continue;
            }
            let weight_foreground = total - weight_background;
            if weight_foreground == 0.0 {
                break;
            }

            sum_background += t as f64 * count as f64;
            let mean_background = sum_background / weight_background;
            let mean_foreground = (sum_total - sum_background) / weight_foreground;
            let variance =
                weight_background * weight_foreground * (mean_background - mean_foreground).powi(2);

            if variance > max_variance {
                max_variance = variance;
                valley = Some(t as u16);
            }
        }

        let valley = valley.ok_or_else(|| {
            SegmentError::Processing("histogram has no separable populations".to_string())
        })?;
        if valley >= limit - 1 {
            return Err(SegmentError::Processing(format!(
                "valley at {valley} leaves no room for an upper bound"
            )));
        }
        Threshold::new(valley + 1, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn volume_from(values: &[u16], bit_depth: BitDepth) -> Volume {
        let data = Array3::from_shape_vec((1, 1, values.len()), values.to_vec()).unwrap();
        Volume::new(data, bit_depth).unwrap()
    }

    #[test]
    fn test_bounds_are_inclusive() -> Result<()> {
        let volume = volume_from(&[4, 5, 6, 49, 50, 51], BitDepth::Eight);
        let mask = Thresholder::apply(&volume, Threshold::new(5, 50)?)?;
        let labels: Vec<bool> = mask.data().iter().copied().collect();
        assert_eq!(labels, vec![false, true, true, true, true, false]);
        Ok(())
    }

    #[test]
    fn test_equal_bounds_are_rejected() {
        assert!(matches!(
            Threshold::new(100, 100),
            Err(SegmentError::InvalidParameter(_))
        ));
        assert!(matches!(
            Threshold::new(101, 100),
            Err(SegmentError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_upper_bound_must_fit_bit_depth() -> Result<()> {
        let volume = volume_from(&[1, 2], BitDepth::Eight);
        assert!(matches!(
            Thresholder::apply(&volume, Threshold::new(1, 256)?),
            Err(SegmentError::InvalidParameter(_))
        ));
        Ok(())
    }

    #[test]
    fn test_parse_bounds() -> Result<()> {
        let test_cases = vec![
            ("5,50", ThresholdBounds::new(Some(5), Some(50))),
            (" 5 , 50 ", ThresholdBounds::new(Some(5), Some(50))),
            ("20", ThresholdBounds::new(Some(20), None)),
            ("20,", ThresholdBounds::new(Some(20), None)),
            (",200", ThresholdBounds::new(None, Some(200))),
            (",", ThresholdBounds::new(None, None)),
        ];

        for (input, expected) in test_cases {
            assert_eq!(input.parse::<ThresholdBounds>()?, expected, "input {input:?}");
        }
        Ok(())
    }

    #[test]
    fn test_parse_rejects_invalid_bounds() {
        for input in ["100,100", "50,5", "-1", "1,2,3", "a,b", ",0", "70000"] {
            assert!(
                matches!(
                    input.parse::<ThresholdBounds>(),
                    Err(SegmentError::InvalidParameter(_))
                ),
                "input {input:?}"
            );
        }
    }

    #[test]
    fn test_resolve_fills_open_sides_from_bit_depth() -> Result<()> {
        let open = ThresholdBounds::default();
        assert_eq!(open.resolve(BitDepth::Eight)?, Threshold::default());
        assert_eq!(
            open.resolve(BitDepth::Sixteen)?,
            Threshold::new(1, u16::MAX)?
        );
        assert!(matches!(
            ThresholdBounds::new(Some(300), None).resolve(BitDepth::Eight),
            Err(SegmentError::InvalidParameter(_))
        ));
        Ok(())
    }

    #[test]
    fn test_auto_threshold_splits_bimodal_volume() -> Result<()> {
        let mut values = vec![0u16; 10];
        values.extend((0..50).map(|i| 20 + i % 10));
        values.extend((0..50).map(|i| 180 + i % 20));
        let volume = volume_from(&values, BitDepth::Eight);

        let threshold = Thresholder::auto_threshold(&volume)?;
        assert!(threshold.min() > 29 && threshold.min() <= 180, "{threshold}");
        assert_eq!(threshold.max(), 255);

        let again = Thresholder::auto_threshold(&volume)?;
        assert_eq!(threshold, again);
        Ok(())
    }

    #[test]
    fn test_auto_threshold_on_flat_volume_fails() {
        let volume = volume_from(&[0, 0, 42, 42, 42], BitDepth::Eight);
        assert!(matches!(
            Thresholder::auto_threshold(&volume),
            Err(SegmentError::Processing(_))
        ));
    }

    #[test]
    fn test_histogram_counts_every_voxel() {
        let volume = volume_from(&[0, 3, 3, 65535], BitDepth::Sixteen);
        let histogram = Thresholder::histogram(&volume);
        assert_eq!(histogram.len(), 65536);
        assert_eq!(histogram[3], 2);
        assert_eq!(histogram[65535], 1);
        assert_eq!(histogram.iter().sum::<u64>(), 4);
    }
}
