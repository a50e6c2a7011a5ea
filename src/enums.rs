use std::fmt;

/// Sample depth of a volume.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitDepth {
    #[default]
    Eight,
    Sixteen,
}

impl BitDepth {
    pub fn bits(self) -> u32 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Sixteen => 16,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            BitDepth::Eight => 1,
            BitDepth::Sixteen => 2,
        }
    }

    /// Largest sample value representable at this depth (`2^bits - 1`)
    pub fn max_value(self) -> u16 {
        match self {
            BitDepth::Eight => u8::MAX as u16,
            BitDepth::Sixteen => u16::MAX,
        }
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(BitDepth::Eight),
            16 => Some(BitDepth::Sixteen),
            _ => None,
        }
    }
}

impl fmt::Display for BitDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// On-disk representations understood by the reader and writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Raw,
    PngStack,
    TiffStack,
}

impl Format {
    /// Resolve a file extension or format keyword, case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "raw" => Some(Format::Raw),
            "png" => Some(Format::PngStack),
            "tif" | "tiff" => Some(Format::TiffStack),
            _ => None,
        }
    }

    /// Extension used when writing files of this format.
    pub fn extension(self) -> &'static str {
        match self {
            Format::Raw => "raw",
            Format::PngStack => "png",
            Format::TiffStack => "tif",
        }
    }

    pub fn is_slice_stack(self) -> bool {
        !matches!(self, Format::Raw)
    }

    pub(crate) fn image_format(self) -> Option<image::ImageFormat> {
        match self {
            Format::Raw => None,
            Format::PngStack => Some(image::ImageFormat::Png),
            Format::TiffStack => Some(image::ImageFormat::Tiff),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Raw => write!(f, "raw"),
            Format::PngStack => write!(f, "png stack"),
            Format::TiffStack => write!(f, "tiff stack"),
        }
    }
}

/// Stages of a pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Init,
    Read,
    Downsample,
    Threshold,
    RemoveSoil,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::Read => "read",
            Stage::Downsample => "downsample",
            Stage::Threshold => "threshold",
            Stage::RemoveSoil => "remove-soil",
            Stage::Write => "write",
        };
        f.write_str(name)
    }
}
