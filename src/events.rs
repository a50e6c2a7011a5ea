//! Structured progress events emitted by a pipeline run.
//!
//! The engine never configures logging itself. Hosts receive events through
//! an [`EventSink`] and route them wherever they like; [`LogSink`] forwards
//! them to the `log` facade.

use std::time::Duration;

use log::{error, info, warn};

use crate::enums::{BitDepth, Stage};
use crate::error::SegmentError;
use crate::format::FormatDescriptor;
use crate::soil::SoilReport;
use crate::thresholder::Threshold;

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageStarted {
        stage: Stage,
    },
    StageFinished {
        stage: Stage,
        elapsed: Duration,
    },
    StageSkipped {
        stage: Stage,
    },
    StageFailed {
        stage: Stage,
        error: SegmentError,
    },
    VolumeLoaded {
        descriptor: FormatDescriptor,
        dim: (usize, usize, usize),
        bit_depth: BitDepth,
    },
    Downsampled {
        factor: usize,
        dim: (usize, usize, usize),
    },
    ThresholdSelected {
        threshold: Threshold,
        automatic: bool,
        foreground: usize,
    },
    SoilRemoved {
        report: SoilReport,
    },
    OutputWritten {
        descriptor: FormatDescriptor,
    },
    /// Dry-run: the output would have been written here.
    OutputSkipped {
        descriptor: FormatDescriptor,
    },
}

/// Receiver of pipeline events; called from the thread driving the run.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

impl<F> EventSink for F
where
    F: Fn(&PipelineEvent) + Send + Sync,
{
    fn on_event(&self, event: &PipelineEvent) {
        self(event)
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&self, _event: &PipelineEvent) {}
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::StageStarted { stage } => info!("{stage}: started"),
            PipelineEvent::StageFinished { stage, elapsed } => {
                info!("{stage}: finished in {:.2?}", elapsed)
            }
            PipelineEvent::StageSkipped { stage } => info!("{stage}: skipped"),
            PipelineEvent::StageFailed { stage, error: err } => error!("{stage}: {err}"),
            PipelineEvent::VolumeLoaded {
                descriptor,
                dim,
                bit_depth,
            } => info!(
                "loaded {} {} ({} x {} x {}, {bit_depth})",
                descriptor.format,
                descriptor.path.display(),
                dim.0,
                dim.1,
                dim.2
            ),
            PipelineEvent::Downsampled { factor, dim } => info!(
                "downsampled by {factor} to {} x {} x {}",
                dim.0, dim.1, dim.2
            ),
            PipelineEvent::ThresholdSelected {
                threshold,
                automatic,
                foreground,
            } => info!(
                "{} threshold {threshold}: {foreground} foreground voxels",
                if *automatic { "automatic" } else { "manual" }
            ),
            PipelineEvent::SoilRemoved { report } => info!(
                "removed {} of {} components ({} voxels) at or above intensity {}",
                report.removed_components,
                report.components,
                report.removed_voxels,
                report.intensity_cutoff
            ),
            PipelineEvent::OutputWritten { descriptor } => info!(
                "wrote {} {}",
                descriptor.format,
                descriptor.path.display()
            ),
            PipelineEvent::OutputSkipped { descriptor } => warn!(
                "dry run: would write {} {}",
                descriptor.format,
                descriptor.path.display()
            ),
        }
    }
}
