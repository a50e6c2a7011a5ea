//! Format descriptors for input and output locators.
//!
//! A locator is resolved once, before any stage runs, into a
//! [`FormatDescriptor`] naming the representation and where it lives. Raw
//! volumes are not self-describing, so their layout comes either from an
//! explicit [`RawLayout`] or from a companion `.dat` header stored next to the
//! raw file:
//!
//! ```text
//! ObjectFileName: scan.raw
//! Resolution: 512 512 1024
//! Format: USHORT
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::enums::{BitDepth, Format};
use crate::error::{Result, SegmentError};

/// Convention used to name the images of a slice stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceNaming {
    pub prefix: String,
    /// Minimum number of digits in the index, zero padded.
    pub pad: usize,
}

impl SliceNaming {
    pub const DEFAULT_PAD: usize = 3;

    pub fn new(prefix: impl Into<String>, pad: usize) -> Self {
        Self {
            prefix: prefix.into(),
            pad,
        }
    }

    /// File name of the slice at `index`, e.g. `slice_007.png`.
    pub fn file_name(&self, index: usize, format: Format) -> String {
        let ext = format.extension();
        if self.prefix.is_empty() {
            format!("{index:0pad$}.{ext}", pad = self.pad)
        } else {
            format!("{}_{index:0pad$}.{ext}", self.prefix, pad = self.pad)
        }
    }

    /// Pad wide enough for `depth` slices, never narrower than the default.
    pub fn pad_for_depth(depth: usize) -> usize {
        let digits = depth.saturating_sub(1).max(1).to_string().len();
        digits.max(Self::DEFAULT_PAD)
    }
}

impl Default for SliceNaming {
    fn default() -> Self {
        Self::new("slice", Self::DEFAULT_PAD)
    }
}

/// Resolved on-disk representation of one input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub format: Format,
    /// Raw file path, or slice-stack directory.
    pub path: PathBuf,
    /// Naming convention for slice stacks; `None` for raw volumes.
    pub naming: Option<SliceNaming>,
}

impl FormatDescriptor {
    pub fn raw(path: impl Into<PathBuf>) -> Self {
        Self {
            format: Format::Raw,
            path: path.into(),
            naming: None,
        }
    }

    /// Slice stack descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::Format`] when `format` is [`Format::Raw`].
    pub fn stack(format: Format, path: impl Into<PathBuf>, naming: SliceNaming) -> Result<Self> {
        if !format.is_slice_stack() {
            return Err(SegmentError::Format(format!(
                "{format} is not a slice-stack format"
            )));
        }
        Ok(Self {
            format,
            path: path.into(),
            naming: Some(naming),
        })
    }

    /// Detect the format of an input locator.
    ///
    /// A file with a `raw` extension is a packed volume; a directory is a
    /// slice stack whose image type and naming are detected by the loader.
    pub fn detect_input(path: impl AsRef<Path>) -> Result<Self> {
        crate::volume_loader::VolumeLoader::locate(path.as_ref())
            .map(|source| source.descriptor().clone())
    }

    /// Resolve an output locator against the input it was derived from.
    ///
    /// Accepted forms:
    /// - `""`: same format as the input, at a derived path
    /// - `raw`, `png`, `tif`, `tiff`: that format at a derived path
    /// - `FORMAT:PATH`: that format at an explicit path
    /// - a path ending in `.raw`
    pub fn resolve_output(locator: &str, input: &FormatDescriptor) -> Result<Self> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Ok(Self::derived(input.format, input));
        }

        if let Some((keyword, rest)) = split_format_prefix(locator) {
            let format = Format::from_extension(keyword).ok_or_else(|| unsupported(keyword))?;
            return Ok(Self::at_path(format, PathBuf::from(rest)));
        }

        if is_keyword(locator) {
            let format = Format::from_extension(locator).ok_or_else(|| unsupported(locator))?;
            return Ok(Self::derived(format, input));
        }

        let path = PathBuf::from(locator);
        match extension_of(&path) {
            Some(ext) => match Format::from_extension(ext) {
                Some(Format::Raw) => Ok(Self::raw(path)),
                Some(format) => Err(SegmentError::Format(format!(
                    "{locator:?}: {format} output is a directory; use `{}:DIR`",
                    format.extension()
                ))),
                None => Err(unsupported(ext)),
            },
            None => Err(SegmentError::Format(format!(
                "cannot determine an output format for {locator:?}"
            ))),
        }
    }

    fn at_path(format: Format, path: PathBuf) -> Self {
        match format {
            Format::Raw => Self::raw(path),
            _ => {
                let prefix = path
                    .file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or("slice")
                    .to_string();
                Self {
                    format,
                    path,
                    naming: Some(SliceNaming::new(prefix, SliceNaming::DEFAULT_PAD)),
                }
            }
        }
    }

    fn derived(format: Format, input: &FormatDescriptor) -> Self {
        let stem = input
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("volume");
        let parent = input.path.parent().unwrap_or(Path::new(""));
        let path = match format {
            Format::Raw => parent.join(format!("{stem}_segmented.raw")),
            _ => parent.join(format!("{stem}_segmented_{}", format.extension())),
        };
        Self::at_path(format, path)
    }

    /// Whether something already exists where this output would be written.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

/// Width, height and sample depth of a packed raw volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawLayout {
    pub width: usize,
    pub height: usize,
    pub bit_depth: BitDepth,
    /// Depth declared by a header, checked against the file size when present.
    pub depth: Option<usize>,
}

impl RawLayout {
    pub fn new(width: usize, height: usize, bit_depth: BitDepth) -> Self {
        Self {
            width,
            height,
            bit_depth,
            depth: None,
        }
    }

    /// Bytes in one slice, or `None` if the count overflows `usize`.
    pub fn slice_bytes(&self) -> Option<usize> {
        self.width
            .checked_mul(self.height)?
            .checked_mul(self.bit_depth.bytes_per_sample())
    }

    /// Path of the `.dat` header that accompanies `raw_path`.
    pub fn companion_path(raw_path: &Path) -> PathBuf {
        raw_path.with_extension("dat")
    }

    /// Read the companion header of `raw_path`.
    pub fn from_companion(raw_path: &Path) -> Result<Self> {
        let header = Self::companion_path(raw_path);
        let text = fs::read_to_string(&header).map_err(|e| SegmentError::io(&header, e))?;
        Self::parse_header(&text)
            .map_err(|reason| SegmentError::Format(format!("{}: {reason}", header.display())))
    }

    fn parse_header(text: &str) -> std::result::Result<Self, String> {
        let mut resolution = None;
        let mut bit_depth = None;

        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "resolution" => {
                    let dims: Vec<usize> = value
                        .split_whitespace()
                        .map(str::parse)
                        .collect::<std::result::Result<_, _>>()
                        .map_err(|_| format!("unparseable resolution {:?}", value.trim()))?;
                    resolution = Some(dims);
                }
                "format" => {
                    bit_depth = Some(match value.trim().to_ascii_uppercase().as_str() {
                        "UCHAR" => BitDepth::Eight,
                        "USHORT" => BitDepth::Sixteen,
                        other => return Err(format!("unsupported sample format {other:?}")),
                    });
                }
                _ => {}
            }
        }

        let dims = resolution.ok_or("missing `Resolution` line")?;
        let bit_depth = bit_depth.ok_or("missing `Format` line")?;
        match dims.as_slice() {
            [width, height] => Ok(Self::new(*width, *height, bit_depth)),
            [width, height, depth] => Ok(Self {
                depth: Some(*depth),
                ..Self::new(*width, *height, bit_depth)
            }),
            _ => Err(format!("resolution needs 2 or 3 values, got {}", dims.len())),
        }
    }

    /// Header text describing a raw file of `depth` slices.
    pub fn header(&self, file_name: &str, depth: usize) -> String {
        let format = match self.bit_depth {
            BitDepth::Eight => "UCHAR",
            BitDepth::Sixteen => "USHORT",
        };
        format!(
            "ObjectFileName: {file_name}\nResolution: {} {} {depth}\nFormat: {format}\n",
            self.width, self.height
        )
    }
}

/// Index embedded in a slice file name: the last run of digits in its stem.
///
/// `slice_010.png` → 10, `scan2_0007.tif` → 7.
pub fn slice_index(path: &Path) -> Option<(usize, &str, usize)> {
    let stem = path.file_stem()?.to_str()?;
    let end = stem.rfind(|c: char| c.is_ascii_digit())? + 1;
    let start = stem[..end]
        .rfind(|c: char| !c.is_ascii_digit())
        .map_or(0, |i| i + 1);
    let digits = &stem[start..end];
    let index = digits.parse().ok()?;
    let prefix = stem[..start].trim_end_matches(['_', '-', '.', ' ']);
    Some((index, prefix, digits.len()))
}

pub(crate) fn extension_of(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

pub(crate) fn unsupported(ext: &str) -> SegmentError {
    SegmentError::Format(format!(
        "{ext:?} is not a supported format (expected raw, png, tif or tiff)"
    ))
}

fn is_keyword(locator: &str) -> bool {
    !locator.contains(['/', '\\', '.']) && locator.chars().all(|c| c.is_ascii_alphanumeric())
}

// `png:out/dir`; a single letter before the colon is a drive, not a format.
fn split_format_prefix(locator: &str) -> Option<(&str, &str)> {
    let (keyword, rest) = locator.split_once(':')?;
    (keyword.len() > 1 && keyword.chars().all(|c| c.is_ascii_alphanumeric()) && !rest.is_empty())
        .then_some((keyword, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_input() -> FormatDescriptor {
        FormatDescriptor::raw("data/scan.raw")
    }

    #[test]
    fn test_slice_index_parsing() {
        let test_cases = vec![
            ("slice_000.png", Some((0, "slice", 3))),
            ("slice_10.png", Some((10, "slice", 2))),
            ("scan2_0007.tif", Some((7, "scan2", 4))),
            ("42.tiff", Some((42, "", 2))),
            ("nodigits.png", None),
        ];

        for (name, expected) in test_cases {
            assert_eq!(slice_index(Path::new(name)), expected, "name {name:?}");
        }
    }

    #[test]
    fn test_slice_naming_round_trips_index() {
        let naming = SliceNaming::new("seg", 4);
        let name = naming.file_name(12, Format::TiffStack);
        assert_eq!(name, "seg_0012.tif");
        assert_eq!(slice_index(Path::new(&name)), Some((12, "seg", 4)));
        assert_eq!(SliceNaming::pad_for_depth(10), 3);
        assert_eq!(SliceNaming::pad_for_depth(12345), 5);
    }

    #[test]
    fn test_resolve_output_forms() -> Result<()> {
        let input = raw_input();

        let same = FormatDescriptor::resolve_output("", &input)?;
        assert_eq!(same, FormatDescriptor::raw("data/scan_segmented.raw"));

        let png = FormatDescriptor::resolve_output("png", &input)?;
        assert_eq!(png.format, Format::PngStack);
        assert_eq!(png.path, PathBuf::from("data/scan_segmented_png"));

        let tif = FormatDescriptor::resolve_output("tiff:out/stack", &input)?;
        assert_eq!(tif.format, Format::TiffStack);
        assert_eq!(tif.path, PathBuf::from("out/stack"));
        assert_eq!(tif.naming, Some(SliceNaming::new("stack", 3)));

        let raw = FormatDescriptor::resolve_output("out/mask.raw", &input)?;
        assert_eq!(raw, FormatDescriptor::raw("out/mask.raw"));
        Ok(())
    }

    #[test]
    fn test_resolve_output_rejects_unsupported() {
        let input = raw_input();
        for locator in ["bmp", "bmp:out", "out/mask.bmp", "out/mask"] {
            assert!(
                matches!(
                    FormatDescriptor::resolve_output(locator, &input),
                    Err(SegmentError::Format(_))
                ),
                "locator {locator:?}"
            );
        }
    }

    #[test]
    fn test_header_round_trip() {
        let layout = RawLayout::new(64, 32, BitDepth::Sixteen);
        let text = layout.header("scan.raw", 7);
        let parsed = RawLayout::parse_header(&text).unwrap();
        assert_eq!(parsed.width, 64);
        assert_eq!(parsed.height, 32);
        assert_eq!(parsed.bit_depth, BitDepth::Sixteen);
        assert_eq!(parsed.depth, Some(7));
    }

    #[test]
    fn test_slice_bytes_overflow() {
        assert_eq!(RawLayout::new(4, 3, BitDepth::Sixteen).slice_bytes(), Some(24));
        assert_eq!(
            RawLayout::new(usize::MAX / 2, 3, BitDepth::Eight).slice_bytes(),
            None
        );
        assert_eq!(
            RawLayout::new(usize::MAX, 1, BitDepth::Sixteen).slice_bytes(),
            None
        );
    }

    #[test]
    fn test_header_requires_format() {
        assert!(RawLayout::parse_header("Resolution: 4 4 4\n").is_err());
        assert!(RawLayout::parse_header("Resolution: 4\nFormat: UCHAR\n").is_err());
        assert!(RawLayout::parse_header("Resolution: 4 4\nFormat: FLOAT\n").is_err());
    }
}
