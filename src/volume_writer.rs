use crate::{
    enums::{BitDepth, Format},
    error::{Result, SegmentError},
    format::{FormatDescriptor, RawLayout, SliceNaming, extension_of},
    volume::Volume,
};

use image::{ImageBuffer, Luma};
use log::debug;
use ndarray::{ArrayView2, Axis};
use rayon::prelude::*;
use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

pub struct VolumeWriter;

impl VolumeWriter {
    /// Write `volume` to the location and format named by `descriptor`
    ///
    /// Returns the raw file or slice directory that was written.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::Io`] when a file or directory cannot be written
    pub fn write(volume: &Volume, descriptor: &FormatDescriptor) -> Result<PathBuf> {
        match descriptor.format {
            Format::Raw => Self::write_raw(volume, &descriptor.path)?,
            Format::PngStack | Format::TiffStack => {
                let naming = descriptor.naming.clone().unwrap_or_default();
                Self::write_slices(volume, descriptor.format, &descriptor.path, &naming)?
            }
        }
        Ok(descriptor.path.clone())
    }

    /// Write a packed raw file plus its `.dat` header
    pub fn write_raw(volume: &Volume, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SegmentError::io(parent, e))?;
        }

        let file = fs::File::create(path).map_err(|e| SegmentError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        let bytes: Vec<u8> = match volume.bit_depth() {
            BitDepth::Eight => volume.data().iter().map(|&v| v as u8).collect(),
            BitDepth::Sixteen => volume
                .data()
                .iter()
                .flat_map(|&v| v.to_le_bytes())
                .collect(),
        };
        writer
            .write_all(&bytes)
            .and_then(|_| writer.flush())
            .map_err(|e| SegmentError::io(path, e))?;

        let (depth, height, width) = volume.dim();
        let layout = RawLayout::new(width, height, volume.bit_depth());
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let header = RawLayout::companion_path(path);
        fs::write(&header, layout.header(file_name, depth))
            .map_err(|e| SegmentError::io(&header, e))?;

        debug!("wrote raw volume {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    /// Write one image per depth index into `dir`, creating it if needed
    ///
    /// Slice images already in `dir` are removed first so the directory holds
    /// exactly the new stack.
    pub fn write_slices(
        volume: &Volume,
        format: Format,
        dir: &Path,
        naming: &SliceNaming,
    ) -> Result<()> {
        let image_format = format.image_format().ok_or_else(|| {
            SegmentError::Format(format!("{format} cannot be written as a slice stack"))
        })?;
        fs::create_dir_all(dir).map_err(|e| SegmentError::io(dir, e))?;
        Self::clear_slices(dir)?;

        let naming = SliceNaming::new(
            naming.prefix.clone(),
            naming.pad.max(SliceNaming::pad_for_depth(volume.dim().0)),
        );
        let bit_depth = volume.bit_depth();

        volume
            .data()
            .axis_iter(Axis(0))
            .into_par_iter()
            .enumerate()
            .try_for_each(|(index, slice)| {
                let path = dir.join(naming.file_name(index, format));
                Self::save_slice(&slice, bit_depth, &path, image_format)
            })?;

        debug!(
            "wrote {} {format} slices to {}",
            volume.dim().0,
            dir.display()
        );
        Ok(())
    }

    /// Remove every image in `dir` that a slice-stack read would pick up.
    fn clear_slices(dir: &Path) -> Result<()> {
        let stale: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| SegmentError::io(dir, e))?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                extension_of(path)
                    .and_then(Format::from_extension)
                    .is_some_and(Format::is_slice_stack)
            })
            .collect();

        for path in &stale {
            fs::remove_file(path).map_err(|e| SegmentError::io(path, e))?;
        }
        if !stale.is_empty() {
            debug!("removed {} stale slices from {}", stale.len(), dir.display());
        }
        Ok(())
    }

    fn save_slice(
        slice: &ArrayView2<'_, u16>,
        bit_depth: BitDepth,
        path: &Path,
        image_format: image::ImageFormat,
    ) -> Result<()> {
        let (height, width) = slice.dim();
        let (width, height) = (width as u32, height as u32);
        let mismatch =
            || SegmentError::Processing(format!("slice buffer size for {}", path.display()));

        let saved = match bit_depth {
            BitDepth::Eight => {
                let pixels: Vec<u8> = slice.iter().map(|&v| v as u8).collect();
                ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels)
                    .ok_or_else(mismatch)?
                    .save_with_format(path, image_format)
            }
            BitDepth::Sixteen => {
                let pixels: Vec<u16> = slice.iter().copied().collect();
                ImageBuffer::<Luma<u16>, _>::from_raw(width, height, pixels)
                    .ok_or_else(mismatch)?
                    .save_with_format(path, image_format)
            }
        };
        saved.map_err(|e| SegmentError::image(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume_loader::VolumeLoader;
    use ndarray::Array3;
    use tempfile::TempDir;

    #[test]
    fn test_raw_writes_header_and_samples() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/mask.raw");
        let data = Array3::from_shape_fn((2, 3, 4), |(z, y, x)| (z * 12 + y * 4 + x) as u16);
        let volume = Volume::new(data, BitDepth::Eight)?;

        VolumeWriter::write(&volume, &FormatDescriptor::raw(&path))?;

        assert_eq!(fs::read(&path).unwrap().len(), 24);
        let header = fs::read_to_string(RawLayout::companion_path(&path)).unwrap();
        assert!(header.contains("Resolution: 4 3 2"));
        assert!(header.contains("Format: UCHAR"));
        Ok(())
    }

    #[test]
    fn test_slice_names_follow_naming() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("stack");
        let volume = Volume::new(Array3::zeros((3, 2, 2)), BitDepth::Eight)?;
        let descriptor =
            FormatDescriptor::stack(Format::PngStack, &dir, SliceNaming::new("seg", 3))?;

        VolumeWriter::write(&volume, &descriptor)?;

        for index in 0..3 {
            assert!(dir.join(format!("seg_00{index}.png")).is_file());
        }
        let (reread, _) = VolumeLoader::load_from_directory(&dir)?;
        assert_eq!(reread, volume);
        Ok(())
    }

    #[test]
    fn test_rewrite_replaces_previous_stack() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("stack");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("notes.txt"), "kept").unwrap();

        let deep = Volume::new(Array3::from_elem((12, 2, 2), 9), BitDepth::Eight)?;
        let descriptor =
            FormatDescriptor::stack(Format::PngStack, &dir, SliceNaming::new("seg", 1))?;
        VolumeWriter::write(&deep, &descriptor)?;

        let shallow = Volume::new(Array3::from_elem((2, 1, 1), 4), BitDepth::Eight)?;
        VolumeWriter::write(&shallow, &descriptor)?;

        let (reread, _) = VolumeLoader::load_from_directory(&dir)?;
        assert_eq!(reread, shallow);
        assert!(dir.join("notes.txt").is_file());
        Ok(())
    }

    #[test]
    fn test_unwritable_target_is_io_error() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();
        let volume = Volume::new(Array3::zeros((1, 1, 1)), BitDepth::Eight)?;

        let result = VolumeWriter::write(&volume, &FormatDescriptor::raw(blocker.join("x.raw")));
        assert!(matches!(result, Err(SegmentError::Io { .. })));
        Ok(())
    }
}
