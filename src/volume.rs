use crate::enums::BitDepth;
use crate::error::{Result, SegmentError};

use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::Zip;
use ndarray::s;
use rayon::prelude::*;

/// Dense grayscale volume laid out as (depth, height, width).
///
/// Samples are held as `u16` regardless of the declared bit depth; an 8-bit
/// volume never stores a value above 255.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Array3<u16>,
    bit_depth: BitDepth,
}

impl Volume {
    /// Wrap an array of samples.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::Format`] if any sample exceeds the range of `bit_depth`.
    pub fn new(data: Array3<u16>, bit_depth: BitDepth) -> Result<Self> {
        let limit = bit_depth.max_value();
        if data.par_iter().any(|&v| v > limit) {
            return Err(SegmentError::Format(format!(
                "volume holds samples larger than {limit}, the {bit_depth} maximum"
            )));
        }
        Ok(Self { data, bit_depth })
    }

    pub(crate) fn new_unchecked(data: Array3<u16>, bit_depth: BitDepth) -> Self {
        Self { data, bit_depth }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<u16> {
        &self.data
    }

    pub fn into_data(self) -> Array3<u16> {
        self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Axial slice at `index`, or `None` past the last slice.
    pub fn slice(&self, index: usize) -> Option<ArrayView2<'_, u16>> {
        (index < self.dim().0).then(|| self.data.slice(s![index, .., ..]))
    }
}

/// Binary segmentation result with the same dimensions as its source volume.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    data: Array3<bool>,
}

impl Mask {
    pub fn new(data: Array3<bool>) -> Self {
        Self { data }
    }

    /// Get the dimensions of the mask (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array3<bool> {
        &self.data
    }

    pub fn into_data(self) -> Array3<bool> {
        self.data
    }

    /// Number of foreground voxels.
    pub fn count_foreground(&self) -> usize {
        self.data.par_iter().filter(|&&v| v).count()
    }

    /// Render the mask as an 8-bit labeled volume: background 0, foreground `label`.
    pub fn to_volume(&self, label: u8) -> Volume {
        let label = label as u16;
        let data = Zip::from(&self.data).par_map_collect(|&v| if v { label } else { 0 });
        Volume::new_unchecked(data, BitDepth::Eight)
    }
}
