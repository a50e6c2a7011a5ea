use clap::Parser;
use std::path::PathBuf;

use crate::enums::BitDepth;
use crate::format::RawLayout;
use crate::pipeline::{SegmentParams, default_threads};
use crate::soil::SoilConfig;
use crate::thresholder::ThresholdBounds;

/// Command-line options of the `volume-segment` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    version,
    about = "Threshold segmentation of raw volumes and slice stacks",
    long_about = None
)]
pub struct Config {
    /// Input .raw file or directory of .png/.tif slices
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Output format or location: raw, png, tif, FORMAT:PATH or a .raw path.
    /// Repeat for several outputs; defaults to the input's format
    #[arg(short, long = "output", value_name = "OUTPUT")]
    pub outputs: Vec<String>,

    /// Downsampling factor. Must be a positive integer
    #[arg(
        short,
        long,
        value_name = "N",
        default_value_t = SegmentParams::DEFAULT_DOWNSAMPLE,
        value_parser = parse_counting_number
    )]
    pub sampling: usize,

    /// Manually selected thresholds for segmentation, inclusive for both bounds
    #[arg(long, value_name = "LO,HI", value_parser = parse_threshold)]
    pub threshold: Option<ThresholdBounds>,

    /// Attempt to remove soil
    #[arg(long)]
    pub remove_soil: bool,

    /// Smallest connected component considered soil, in voxels
    #[arg(
        long,
        value_name = "VOXELS",
        default_value_t = SoilConfig::DEFAULT_MIN_COMPONENT_SIZE,
        value_parser = parse_counting_number
    )]
    pub soil_min_size: usize,

    /// Foreground intensity percentile a component's mean must reach to be soil
    #[arg(
        long,
        value_name = "FRACTION",
        default_value_t = SoilConfig::DEFAULT_INTENSITY_PERCENTILE,
        value_parser = parse_fraction
    )]
    pub soil_percentile: f64,

    /// Upper limit for the number of threads used during processing
    #[arg(
        short,
        long,
        value_name = "N",
        default_value_t = default_threads(),
        value_parser = parse_counting_number
    )]
    pub threads: usize,

    /// Width and height of a raw input, overriding its .dat header
    #[arg(long, value_name = "WxH", value_parser = parse_dims)]
    pub raw_dims: Option<(usize, usize)>,

    /// Bits per sample of a raw input given with --raw-dims
    #[arg(long, value_name = "BITS", requires = "raw_dims", value_parser = parse_bits)]
    pub raw_bits: Option<BitDepth>,

    /// Force file creation and overwrite existing files
    #[arg(short, long, conflicts_with = "dry_run")]
    pub force: bool,

    /// Perform a trial run with no changes made (logs are still produced)
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Increase output verbosity
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn to_params(&self) -> SegmentParams {
        SegmentParams {
            input: self.path.clone(),
            outputs: self.outputs.clone(),
            downsample: self.sampling,
            threshold: self.threshold,
            remove_soil: self.remove_soil,
            soil: SoilConfig {
                min_component_size: self.soil_min_size,
                intensity_percentile: self.soil_percentile,
            },
            threads: self.threads,
            dry_run: self.dry_run,
            force: self.force,
            raw_layout: self.raw_dims.map(|(width, height)| {
                RawLayout::new(width, height, self.raw_bits.unwrap_or_default())
            }),
        }
    }
}

fn parse_counting_number(s: &str) -> Result<usize, String> {
    let err_msg = || format!("'{s}' is invalid. It must be a positive integer.");
    match s.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(err_msg()),
        Ok(n) => Ok(n),
    }
}

fn parse_threshold(s: &str) -> Result<ThresholdBounds, String> {
    s.parse::<ThresholdBounds>().map_err(|e| e.to_string())
}

fn parse_fraction(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("'{s}' is not a number"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("'{s}' must lie between 0 and 1"));
    }
    Ok(value)
}

fn parse_dims(s: &str) -> Result<(usize, usize), String> {
    let (width, height) = s
        .to_ascii_lowercase()
        .split_once('x')
        .map(|(w, h)| (w.trim().to_string(), h.trim().to_string()))
        .ok_or_else(|| format!("'{s}' is not of the form WIDTHxHEIGHT"))?;
    Ok((parse_counting_number(&width)?, parse_counting_number(&height)?))
}

fn parse_bits(s: &str) -> Result<BitDepth, String> {
    s.trim()
        .parse()
        .ok()
        .and_then(BitDepth::from_bits)
        .ok_or_else(|| format!("'{s}' is not a supported bit depth (8 or 16)"))
}
