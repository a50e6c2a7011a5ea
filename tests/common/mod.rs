#![allow(dead_code)]

use std::path::Path;

use image::{GrayImage, Luma};
use ndarray::Array3;
use volume_segment::{BitDepth, FormatDescriptor, Volume, VolumeWriter};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 8-bit (4,4,4) volume of 10 whose (0,0,0) corner voxel is 200.
pub fn corner_cube() -> Volume {
    let mut data = Array3::from_elem((4, 4, 4), 10u16);
    data[[0, 0, 0]] = 200;
    Volume::new(data, BitDepth::Eight).expect("samples fit 8 bits")
}

/// Deterministic volume covering most of the `bit_depth` range.
pub fn gradient(dim: (usize, usize, usize), bit_depth: BitDepth) -> Volume {
    let max = bit_depth.max_value() as usize;
    let data = Array3::from_shape_fn(dim, |(z, y, x)| {
        ((z * 977 + y * 131 + x * 17) % (max + 1)) as u16
    });
    Volume::new(data, bit_depth).expect("samples fit bit depth")
}

/// Write a raw volume with its `.dat` header.
pub fn write_raw(path: &Path, volume: &Volume) {
    VolumeWriter::write(volume, &FormatDescriptor::raw(path)).expect("raw volume written");
}

/// Write one uniform grayscale PNG per name.
pub fn write_png_slices(dir: &Path, names: &[String], width: u32, height: u32) {
    std::fs::create_dir_all(dir).unwrap();
    for (i, name) in names.iter().enumerate() {
        GrayImage::from_pixel(width, height, Luma([i as u8 * 10 + 5]))
            .save(dir.join(name))
            .unwrap();
    }
}
