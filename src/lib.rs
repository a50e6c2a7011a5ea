//! # volume-segment
//!
//! Threshold segmentation of volumetric grayscale datasets such as stacked
//! X-ray tomography output.
//!
//! A volume is read either from a single packed `.raw` file (with a companion
//! `.dat` header giving its resolution and sample format) or from a directory
//! of PNG or TIFF slices ordered by the number in each file name. The volume
//! is optionally downsampled, every voxel is classified as foreground or
//! background by an inclusive intensity range, dense soil clumps can be
//! removed from the foreground, and the binary result is written as raw, PNG
//! slices or TIFF slices.
//!
//! Stages run one after another; within a stage the work is spread over a
//! rayon thread pool owned by the run:
//!
//!  - [`VolumeLoader`] reads raw files and slice directories
//!  - [`Downsampler`] decimates by an integer factor
//!  - [`Thresholder`] applies manual bounds or picks them with Otsu's method
//!  - [`SoilRemover`] clears bright, large connected components
//!  - [`VolumeWriter`] writes raw files and slice stacks
//!  - [`Pipeline`] sequences the above and reports [`PipelineEvent`]s
//!
//! # Examples
//!
//! ## Segmenting a slice directory into a raw volume
//!
//! ```no_run
//! # use volume_segment::{Pipeline, SegmentParams, LogSink};
//! let mut params = SegmentParams::new("scans/root_01");
//! params.outputs = vec!["raw".to_string()];
//! params.remove_soil = true;
//!
//! let result = Pipeline::new(params).with_sink(LogSink).run();
//! assert!(result.is_success());
//! ```
//!
//! ## Using the stages directly
//!
//! ```no_run
//! # use volume_segment::{Downsampler, Threshold, Thresholder, VolumeLoader};
//! let (volume, _format) = VolumeLoader::load("scans/root_01", None)
//!     .expect("should have loaded slices from directory");
//! let volume = Downsampler::downsample(volume, 2).expect("factor is positive");
//! let threshold = Threshold::new(40, 255).expect("bounds are increasing");
//! let mask = Thresholder::apply(&volume, threshold).expect("bounds fit 8-bit data");
//! println!("{} foreground voxels", mask.count_foreground());
//! ```

pub mod config;
pub mod downsampler;
pub mod enums;
pub mod error;
pub mod events;
pub mod format;
pub mod pipeline;
pub mod soil;
pub mod thresholder;
pub mod volume;
pub mod volume_loader;
pub mod volume_writer;

pub use config::Config;
pub use downsampler::Downsampler;
pub use enums::{BitDepth, Format, Stage};
pub use error::{Result, SegmentError};
pub use events::{EventSink, LogSink, NullSink, PipelineEvent};
pub use format::{FormatDescriptor, RawLayout, SliceNaming};
pub use pipeline::{
    CancelToken, OutputOutcome, OutputReport, Pipeline, RunResult, RunStatus, SegmentParams,
};
pub use soil::{SoilConfig, SoilRemover, SoilReport};
pub use thresholder::{Threshold, ThresholdBounds, Thresholder};
pub use volume::{Mask, Volume};
pub use volume_loader::{InputSource, VolumeLoader};
pub use volume_writer::VolumeWriter;
