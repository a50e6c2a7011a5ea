use crate::error::{Result, SegmentError};
use crate::volume::Volume;

use ndarray::s;

pub struct Downsampler;

impl Downsampler {
    /// Keep every `factor`-th voxel along each axis, starting at index 0.
    ///
    /// Each axis shrinks to `floor(len / factor)`; trailing slices, rows and
    /// columns that do not fill a whole step are dropped. No averaging is done
    /// so intensity edges stay sharp for thresholding.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidParameter`] when `factor` is zero
    pub fn downsample(volume: Volume, factor: usize) -> Result<Volume> {
        if factor == 0 {
            return Err(SegmentError::InvalidParameter(
                "downsampling factor must be a positive integer".to_string(),
            ));
        }
        if factor == 1 {
            return Ok(volume);
        }

        let (depth, height, width) = volume.dim();
        let (d_end, h_end, w_end) = (
            depth / factor * factor,
            height / factor * factor,
            width / factor * factor,
        );
        let bit_depth = volume.bit_depth();
        let data = volume
            .data()
            .slice(s![0..d_end;factor, 0..h_end;factor, 0..w_end;factor])
            .to_owned();

        Ok(Volume::new_unchecked(data, bit_depth))
    }
}
