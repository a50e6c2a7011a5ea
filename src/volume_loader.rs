use crate::{
    enums::{BitDepth, Format},
    error::{Result, SegmentError},
    format::{FormatDescriptor, RawLayout, SliceNaming, extension_of, slice_index, unsupported},
    volume::Volume,
};

use image::DynamicImage;
use log::{debug, warn};
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Image files of a slice-stack directory in depth order.
#[derive(Debug, Clone)]
pub struct SliceListing {
    pub descriptor: FormatDescriptor,
    pub paths: Vec<PathBuf>,
}

/// Located input volume; a slice stack keeps the listing made while locating it.
#[derive(Debug, Clone)]
pub enum InputSource {
    Raw(FormatDescriptor),
    Slices(SliceListing),
}

impl InputSource {
    pub fn descriptor(&self) -> &FormatDescriptor {
        match self {
            InputSource::Raw(descriptor) => descriptor,
            InputSource::Slices(listing) => &listing.descriptor,
        }
    }
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from a raw file or a slice-stack directory
    ///
    /// # Arguments
    ///
    /// * `path` - A `.raw` file or a directory of PNG/TIFF slices
    /// * `raw_layout` - Layout of a raw file; read from its `.dat` header when `None`
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::Format`] for unsupported inputs, missing slices,
    /// inconsistent slice dimensions or a raw size that does not divide into slices
    pub fn load(
        path: impl AsRef<Path>,
        raw_layout: Option<RawLayout>,
    ) -> Result<(Volume, FormatDescriptor)> {
        let source = Self::locate(path.as_ref())?;
        let volume = Self::load_source(&source, raw_layout)?;
        Ok((volume, source.descriptor().clone()))
    }

    /// Decide whether `path` is a raw volume or a slice directory
    ///
    /// A directory is listed once here; the listing is what gets loaded later.
    pub fn locate(path: &Path) -> Result<InputSource> {
        let metadata = fs::metadata(path).map_err(|e| SegmentError::io(path, e))?;
        if metadata.is_dir() {
            return Self::scan_directory(path).map(InputSource::Slices);
        }

        match extension_of(path).and_then(Format::from_extension) {
            Some(Format::Raw) => Ok(InputSource::Raw(FormatDescriptor::raw(path))),
            Some(format) => Err(SegmentError::Format(format!(
                "{} is a single {format} image; slice stacks are read from a directory",
                path.display()
            ))),
            None => Err(unsupported(extension_of(path).unwrap_or(""))),
        }
    }

    /// Load a located input
    pub fn load_source(source: &InputSource, raw_layout: Option<RawLayout>) -> Result<Volume> {
        match source {
            InputSource::Raw(descriptor) => {
                let layout = match raw_layout {
                    Some(layout) => layout,
                    None => RawLayout::from_companion(&descriptor.path)?,
                };
                Self::load_raw(&descriptor.path, layout)
            }
            InputSource::Slices(listing) => Self::load_from_file_paths(&listing.paths),
        }
    }

    /// Load a packed volume whose depth is implied by the file size
    pub fn load_raw(path: impl AsRef<Path>, layout: RawLayout) -> Result<Volume> {
        let path = path.as_ref();
        if layout.width == 0 || layout.height == 0 {
            return Err(SegmentError::InvalidParameter(format!(
                "raw layout {}x{} has an empty axis",
                layout.width, layout.height
            )));
        }

        let slice_bytes = layout.slice_bytes().ok_or_else(|| {
            SegmentError::Format(format!(
                "{}: a {}x{} {} slice is too large to address",
                path.display(),
                layout.width,
                layout.height,
                layout.bit_depth
            ))
        })?;

        let bytes = fs::read(path).map_err(|e| SegmentError::io(path, e))?;
        if bytes.is_empty() || bytes.len() % slice_bytes != 0 {
            return Err(SegmentError::Format(format!(
                "{}: size {} is not a multiple of one {}x{} {} slice ({slice_bytes} bytes)",
                path.display(),
                bytes.len(),
                layout.width,
                layout.height,
                layout.bit_depth
            )));
        }

        let depth = bytes.len() / slice_bytes;
        if let Some(declared) = layout.depth.filter(|&d| d != depth) {
            return Err(SegmentError::Format(format!(
                "{}: header declares {declared} slices but the file holds {depth}",
                path.display()
            )));
        }

        let samples: Vec<u16> = match layout.bit_depth {
            BitDepth::Eight => bytes.into_iter().map(u16::from).collect(),
            BitDepth::Sixteen => bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect(),
        };
        debug!(
            "read raw volume {} ({depth}x{}x{}, {})",
            path.display(),
            layout.height,
            layout.width,
            layout.bit_depth
        );

        let data = Array3::from_shape_vec((depth, layout.height, layout.width), samples)
            .map_err(|e| SegmentError::Processing(e.to_string()))?;
        Ok(Volume::new_unchecked(data, layout.bit_depth))
    }

    /// Load a volume from slice images, in the given order
    pub fn load_from_file_paths(paths: &[impl AsRef<Path> + Sync]) -> Result<Volume> {
        if paths.is_empty() {
            return Err(SegmentError::Format("no slice images to load".to_string()));
        }

        let slices: Vec<_> = paths
            .par_iter()
            .map(|path| Self::decode_slice(path.as_ref()))
            .collect::<Result<_>>()?;

        let bit_depth = Self::validate_slices(&slices, paths)?;
        let images: Vec<_> = slices.into_iter().map(|(_, image)| image).collect();
        Ok(Volume::new_unchecked(
            Self::build_volume_array(&images),
            bit_depth,
        ))
    }

    /// Load a volume from a directory containing numbered .png or .tif slices
    pub fn load_from_directory(path: impl AsRef<Path>) -> Result<(Volume, FormatDescriptor)> {
        let listing = Self::scan_directory(path.as_ref())?;
        let volume = Self::load_from_file_paths(&listing.paths)?;
        Ok((volume, listing.descriptor))
    }

    /// List the slices of a directory, ordered by the integer in each file name
    pub fn scan_directory(path: &Path) -> Result<SliceListing> {
        let mut candidates: Vec<(Format, PathBuf)> = fs::read_dir(path)
            .map_err(|e| SegmentError::io(path, e))?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter_map(|path| {
                extension_of(&path)
                    .and_then(Format::from_extension)
                    .filter(|format| format.is_slice_stack())
                    .map(|format| (format, path))
            })
            .collect();

        let Some(&(format, _)) = candidates.first() else {
            return Err(SegmentError::Format(format!(
                "{} holds no .png, .tif or .tiff slices",
                path.display()
            )));
        };
        if candidates.iter().any(|(other, _)| *other != format) {
            return Err(SegmentError::Format(format!(
                "{} mixes PNG and TIFF slices",
                path.display()
            )));
        }

        let mut indexed = Vec::with_capacity(candidates.len());
        for (_, file) in candidates.drain(..) {
            let (index, prefix, pad) = slice_index(&file).ok_or_else(|| {
                SegmentError::Format(format!("{} has no slice index", file.display()))
            })?;
            let naming = SliceNaming::new(prefix, pad);
            indexed.push((index, naming, file));
        }
        indexed.sort_by_key(|(index, _, _)| *index);

        if let Some(pair) = indexed.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(SegmentError::Format(format!(
                "{} and {} share slice index {}",
                pair[0].2.display(),
                pair[1].2.display(),
                pair[0].0
            )));
        }

        let naming = indexed[0].1.clone();
        let paths: Vec<_> = indexed.into_iter().map(|(_, _, file)| file).collect();
        debug!("found {} {format} slices in {}", paths.len(), path.display());

        Ok(SliceListing {
            descriptor: FormatDescriptor::stack(format, path, naming)?,
            paths,
        })
    }

    fn decode_slice(path: &Path) -> Result<(BitDepth, Array2<u16>)> {
        let image = image::open(path).map_err(|e| SegmentError::image(path, e))?;
        let (width, height) = (image.width() as usize, image.height() as usize);

        let (bit_depth, samples): (BitDepth, Vec<u16>) = match image {
            DynamicImage::ImageLuma8(buffer) => (
                BitDepth::Eight,
                buffer.into_raw().into_iter().map(u16::from).collect(),
            ),
            DynamicImage::ImageLuma16(buffer) => (BitDepth::Sixteen, buffer.into_raw()),
            other => {
                let color = other.color();
                let channel_bits = color.bits_per_pixel() / u16::from(color.channel_count());
                warn!("{} is {color:?}, converting to grayscale", path.display());
                if channel_bits <= 8 {
                    (
                        BitDepth::Eight,
                        other.to_luma8().into_raw().into_iter().map(u16::from).collect(),
                    )
                } else {
                    (BitDepth::Sixteen, other.to_luma16().into_raw())
                }
            }
        };

        let image_2d = Array2::from_shape_vec((height, width), samples)
            .map_err(|e| SegmentError::Processing(e.to_string()))?;
        Ok((bit_depth, image_2d))
    }

    fn validate_slices(
        slices: &[(BitDepth, Array2<u16>)],
        paths: &[impl AsRef<Path>],
    ) -> Result<BitDepth> {
        let (first_depth, first_image) = &slices[0];
        let first_dim = first_image.dim();

        for ((bit_depth, image), path) in slices.iter().zip(paths) {
            if image.dim() != first_dim {
                return Err(SegmentError::Format(format!(
                    "inconsistent slice dimensions: {} is {}x{}, expected {}x{}",
                    path.as_ref().display(),
                    image.dim().1,
                    image.dim().0,
                    first_dim.1,
                    first_dim.0
                )));
            }
            if bit_depth != first_depth {
                return Err(SegmentError::Format(format!(
                    "inconsistent bit depth: {} is {bit_depth}, expected {first_depth}",
                    path.as_ref().display()
                )));
            }
        }
        Ok(*first_depth)
    }

    fn build_volume_array(images: &[Array2<u16>]) -> Array3<u16> {
        let (height, width) = images[0].dim();
        let depth = images.len();
        let mut volume = Array3::<u16>::zeros((depth, height, width));

        for (i, image) in images.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(image);
        }

        volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_gray(path: &Path, width: u32, height: u32, value: u8) {
        GrayImage::from_pixel(width, height, Luma([value]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_raw_size_must_divide_into_slices() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("odd.raw");
        fs::write(&path, vec![0u8; 4 * 4 * 3 + 1]).unwrap();

        let layout = RawLayout::new(4, 4, BitDepth::Eight);
        assert!(matches!(
            VolumeLoader::load_raw(&path, layout),
            Err(SegmentError::Format(_))
        ));

        fs::write(&path, vec![7u8; 4 * 4 * 3]).unwrap();
        let volume = VolumeLoader::load_raw(&path, layout)?;
        assert_eq!(volume.dim(), (3, 4, 4));
        assert!(volume.data().iter().all(|&v| v == 7));
        Ok(())
    }

    #[test]
    fn test_raw_sixteen_bit_is_little_endian() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wide.raw");
        fs::write(&path, [0x34u8, 0x12, 0xff, 0x00]).unwrap();

        let volume = VolumeLoader::load_raw(&path, RawLayout::new(2, 1, BitDepth::Sixteen))?;
        assert_eq!(volume.dim(), (1, 1, 2));
        assert_eq!(volume.data()[[0, 0, 0]], 0x1234);
        assert_eq!(volume.data()[[0, 0, 1]], 0x00ff);
        Ok(())
    }

    #[test]
    fn test_oversized_header_is_format_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("huge.raw");
        fs::write(&path, vec![0u8; 16]).unwrap();
        fs::write(
            RawLayout::companion_path(&path),
            format!("Resolution: {} 2 1\nFormat: USHORT\n", usize::MAX / 2),
        )
        .unwrap();

        assert!(matches!(
            VolumeLoader::load(&path, None),
            Err(SegmentError::Format(_))
        ));
        let layout = RawLayout::new(usize::MAX, usize::MAX, BitDepth::Sixteen);
        assert!(matches!(
            VolumeLoader::load_raw(&path, layout),
            Err(SegmentError::Format(_))
        ));
    }

    #[test]
    fn test_raw_header_depth_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scan.raw");
        fs::write(&path, vec![0u8; 2 * 2 * 2]).unwrap();
        fs::write(
            RawLayout::companion_path(&path),
            "Resolution: 2 2 5\nFormat: UCHAR\n",
        )
        .unwrap();

        assert!(matches!(
            VolumeLoader::load(&path, None),
            Err(SegmentError::Format(_))
        ));
    }

    #[test]
    fn test_directory_orders_numerically() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        for index in [10, 2, 1] {
            write_gray(
                &temp_dir.path().join(format!("slice_{index}.png")),
                3,
                2,
                index as u8,
            );
        }
        fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

        let (volume, descriptor) = VolumeLoader::load_from_directory(temp_dir.path())?;
        assert_eq!(volume.dim(), (3, 2, 3));
        assert_eq!(descriptor.format, Format::PngStack);
        let firsts: Vec<u16> = (0..3).map(|z| volume.data()[[z, 0, 0]]).collect();
        assert_eq!(firsts, vec![1, 2, 10]);
        Ok(())
    }

    #[test]
    fn test_directory_rejects_mismatched_slices() {
        let temp_dir = TempDir::new().unwrap();
        write_gray(&temp_dir.path().join("s_0.png"), 4, 4, 1);
        write_gray(&temp_dir.path().join("s_1.png"), 4, 5, 1);

        assert!(matches!(
            VolumeLoader::load_from_directory(temp_dir.path()),
            Err(SegmentError::Format(_))
        ));
    }

    #[test]
    fn test_directory_rejects_mixed_bit_depth() {
        let temp_dir = TempDir::new().unwrap();
        write_gray(&temp_dir.path().join("s_0.png"), 2, 2, 1);
        ImageBuffer::<Luma<u16>, Vec<u16>>::from_pixel(2, 2, Luma([1000]))
            .save(temp_dir.path().join("s_1.png"))
            .unwrap();

        assert!(matches!(
            VolumeLoader::load_from_directory(temp_dir.path()),
            Err(SegmentError::Format(_))
        ));
    }

    #[test]
    fn test_directory_without_slices() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.bmp"), "not a slice").unwrap();

        assert!(matches!(
            VolumeLoader::load_from_directory(temp_dir.path()),
            Err(SegmentError::Format(_))
        ));
    }

    #[test]
    fn test_duplicate_slice_index() {
        let temp_dir = TempDir::new().unwrap();
        write_gray(&temp_dir.path().join("a_1.png"), 2, 2, 1);
        write_gray(&temp_dir.path().join("b_01.png"), 2, 2, 1);

        assert!(matches!(
            VolumeLoader::scan_directory(temp_dir.path()),
            Err(SegmentError::Format(_))
        ));
    }

    #[test]
    fn test_directory_rejects_mixed_formats() {
        let temp_dir = TempDir::new().unwrap();
        write_gray(&temp_dir.path().join("a_0.png"), 2, 2, 1);
        write_gray(&temp_dir.path().join("a_1.tif"), 2, 2, 1);

        assert!(matches!(
            VolumeLoader::load_from_directory(temp_dir.path()),
            Err(SegmentError::Format(_))
        ));
    }

    #[test]
    fn test_color_slices_become_grayscale() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let rgb8 = temp_dir.path().join("rgb8");
        let rgb16 = temp_dir.path().join("rgb16");
        fs::create_dir_all(&rgb8).unwrap();
        fs::create_dir_all(&rgb16).unwrap();
        for index in 0..2 {
            RgbImage::from_pixel(3, 2, Rgb([77, 77, 77]))
                .save(rgb8.join(format!("s_{index}.png")))
                .unwrap();
            ImageBuffer::<Rgb<u16>, Vec<u16>>::from_pixel(3, 2, Rgb([1000, 1000, 1000]))
                .save(rgb16.join(format!("s_{index}.png")))
                .unwrap();
        }

        let (narrow, _) = VolumeLoader::load_from_directory(&rgb8)?;
        assert_eq!(narrow.bit_depth(), BitDepth::Eight);
        assert_eq!(narrow.dim(), (2, 2, 3));
        assert!(narrow.data().iter().all(|&v| v == 77));

        let (wide, _) = VolumeLoader::load_from_directory(&rgb16)?;
        assert_eq!(wide.bit_depth(), BitDepth::Sixteen);
        assert!(wide.data().iter().all(|&v| v == 1000));
        Ok(())
    }

    #[test]
    fn test_located_listing_is_reused() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        for index in 0..3 {
            write_gray(&temp_dir.path().join(format!("s_{index}.png")), 2, 2, index);
        }

        let source = VolumeLoader::locate(temp_dir.path())?;
        write_gray(&temp_dir.path().join("s_3.png"), 2, 2, 3);

        let volume = VolumeLoader::load_source(&source, None)?;
        assert_eq!(volume.dim(), (3, 2, 2));
        assert_eq!(source.descriptor().format, Format::PngStack);
        Ok(())
    }
}
