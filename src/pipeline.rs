//! Orchestration of one segmentation run.
//!
//! A run moves through `Init → Read → [Downsample] → Threshold → [RemoveSoil]
//! → Write` and stops at the first failing stage. Every stage consumes the
//! value produced by the stage before it.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::downsampler::Downsampler;
use crate::enums::{Format, Stage};
use crate::error::{Result, SegmentError};
use crate::events::{EventSink, NullSink, PipelineEvent};
use crate::format::{FormatDescriptor, RawLayout};
use crate::soil::{SoilConfig, SoilRemover, SoilReport};
use crate::thresholder::{Threshold, ThresholdBounds, Thresholder};
use crate::volume::{Mask, Volume};
use crate::volume_loader::{InputSource, VolumeLoader};
use crate::volume_writer::VolumeWriter;

/// Label written for foreground voxels.
pub const FOREGROUND_LABEL: u8 = 255;

/// Validated parameters of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentParams {
    pub input: PathBuf,
    /// Output locators; empty means one output in the input's format.
    pub outputs: Vec<String>,
    pub downsample: usize,
    /// Manual bounds; `None` picks them from the histogram.
    pub threshold: Option<ThresholdBounds>,
    pub remove_soil: bool,
    pub soil: SoilConfig,
    pub threads: usize,
    pub dry_run: bool,
    pub force: bool,
    /// Layout of a raw input; read from its `.dat` header when `None`.
    pub raw_layout: Option<RawLayout>,
}

impl SegmentParams {
    pub const DEFAULT_DOWNSAMPLE: usize = 2;

    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            outputs: Vec::new(),
            downsample: Self::DEFAULT_DOWNSAMPLE,
            threshold: None,
            remove_soil: false,
            soil: SoilConfig::default(),
            threads: default_threads(),
            dry_run: false,
            force: false,
            raw_layout: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.downsample == 0 {
            return Err(SegmentError::InvalidParameter(
                "downsampling factor must be a positive integer".to_string(),
            ));
        }
        if self.threads == 0 {
            return Err(SegmentError::InvalidParameter(
                "thread count must be a positive integer".to_string(),
            ));
        }
        if self.dry_run && self.force {
            return Err(SegmentError::InvalidParameter(
                "dry run and force cannot be combined".to_string(),
            ));
        }
        if let Some(bounds) = &self.threshold {
            bounds.validate()?;
        }
        self.soil.validate()
    }
}

pub fn default_threads() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

/// Shared flag checked between stages.
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub enum OutputOutcome {
    Written,
    /// Dry run; nothing was written.
    Skipped,
    Failed(SegmentError),
    NotAttempted,
}

#[derive(Debug, Clone)]
pub struct OutputReport {
    pub locator: String,
    /// `None` if the locator could not be resolved.
    pub descriptor: Option<FormatDescriptor>,
    pub outcome: OutputOutcome,
}

#[derive(Debug, Clone)]
pub enum RunStatus {
    Done,
    Failed { stage: Stage, error: SegmentError },
}

/// Outcome of a run, including how far it got.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: RunStatus,
    pub outputs: Vec<OutputReport>,
    pub input: Option<FormatDescriptor>,
    pub dim: Option<(usize, usize, usize)>,
    pub threshold: Option<Threshold>,
    pub foreground: Option<usize>,
    pub soil: Option<SoilReport>,
}

impl RunResult {
    fn new(locators: &[String]) -> Self {
        Self {
            status: RunStatus::Done,
            outputs: locators
                .iter()
                .map(|locator| OutputReport {
                    locator: locator.clone(),
                    descriptor: None,
                    outcome: OutputOutcome::NotAttempted,
                })
                .collect(),
            input: None,
            dim: None,
            threshold: None,
            foreground: None,
            soil: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Done)
    }

    /// Stage and error of a failed run.
    pub fn failure(&self) -> Option<(Stage, &SegmentError)> {
        match &self.status {
            RunStatus::Done => None,
            RunStatus::Failed { stage, error } => Some((*stage, error)),
        }
    }
}

struct Plan {
    source: InputSource,
    raw_layout: Option<RawLayout>,
    outputs: Vec<FormatDescriptor>,
    pool: rayon::ThreadPool,
}

pub struct Pipeline {
    params: SegmentParams,
    sink: Box<dyn EventSink>,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(params: SegmentParams) -> Self {
        Self {
            params,
            sink: Box::new(NullSink),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn params(&self) -> &SegmentParams {
        &self.params
    }

    /// Execute every stage in order, stopping at the first failure.
    ///
    /// Outputs already written when a later one fails are left in place.
    pub fn run(&self) -> RunResult {
        let locators = if self.params.outputs.is_empty() {
            vec![String::new()]
        } else {
            self.params.outputs.clone()
        };
        let mut result = RunResult::new(&locators);

        let plan = match self.run_stage(Stage::Init, || self.prepare(&locators)) {
            Ok(plan) => plan,
            Err(error) => {
                result.status = RunStatus::Failed {
                    stage: Stage::Init,
                    error,
                };
                return result;
            }
        };
        for (report, descriptor) in result.outputs.iter_mut().zip(&plan.outputs) {
            report.descriptor = Some(descriptor.clone());
        }
        result.input = Some(plan.source.descriptor().clone());

        let pool = &plan.pool;
        if let Err((stage, error)) = pool.install(|| self.execute(&plan, &mut result)) {
            result.status = RunStatus::Failed { stage, error };
        }
        result
    }

    fn prepare(&self, locators: &[String]) -> Result<Plan> {
        self.params.validate()?;

        let source = VolumeLoader::locate(&self.params.input)?;
        let input = source.descriptor();
        let raw_layout = match (input.format, self.params.raw_layout) {
            (Format::Raw, None) => Some(RawLayout::from_companion(&input.path)?),
            (_, layout) => layout,
        };

        let outputs = locators
            .iter()
            .map(|locator| FormatDescriptor::resolve_output(locator, input))
            .collect::<Result<Vec<_>>>()?;

        for output in &outputs {
            if output.path == input.path {
                return Err(SegmentError::InvalidParameter(format!(
                    "output {} would overwrite the input",
                    output.path.display()
                )));
            }
            if !self.params.dry_run && !self.params.force && output.exists() {
                return Err(SegmentError::io(
                    &output.path,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "output exists; pass force to overwrite",
                    ),
                ));
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.threads)
            .build()
            .map_err(|e| SegmentError::Processing(format!("worker pool: {e}")))?;

        Ok(Plan {
            source,
            raw_layout,
            outputs,
            pool,
        })
    }

    fn execute(
        &self,
        plan: &Plan,
        result: &mut RunResult,
    ) -> std::result::Result<(), (Stage, SegmentError)> {
        let at = |stage: Stage| move |error: SegmentError| (stage, error);

        let volume = self
            .run_stage(Stage::Read, || {
                VolumeLoader::load_source(&plan.source, plan.raw_layout)
            })
            .map_err(at(Stage::Read))?;
        self.emit(PipelineEvent::VolumeLoaded {
            descriptor: plan.source.descriptor().clone(),
            dim: volume.dim(),
            bit_depth: volume.bit_depth(),
        });

        let factor = self.params.downsample;
        let volume = if factor > 1 {
            let volume = self
                .run_stage(Stage::Downsample, || Downsampler::downsample(volume, factor))
                .map_err(at(Stage::Downsample))?;
            self.emit(PipelineEvent::Downsampled {
                factor,
                dim: volume.dim(),
            });
            volume
        } else {
            self.skip_stage(Stage::Downsample).map_err(at(Stage::Downsample))?;
            volume
        };
        result.dim = Some(volume.dim());

        let (mask, threshold) = self
            .run_stage(Stage::Threshold, || self.threshold(&volume))
            .map_err(at(Stage::Threshold))?;
        result.threshold = Some(threshold);

        let mask = if self.params.remove_soil {
            let (mask, report) = self
                .run_stage(Stage::RemoveSoil, || {
                    SoilRemover::new(self.params.soil)?.remove(&volume, mask)
                })
                .map_err(at(Stage::RemoveSoil))?;
            self.emit(PipelineEvent::SoilRemoved {
                report: report.clone(),
            });
            result.soil = Some(report);
            mask
        } else {
            self.skip_stage(Stage::RemoveSoil).map_err(at(Stage::RemoveSoil))?;
            mask
        };
        drop(volume);
        result.foreground = Some(mask.count_foreground());

        self.run_stage(Stage::Write, || self.write(&mask, &plan.outputs, result))
            .map_err(at(Stage::Write))
    }

    fn threshold(&self, volume: &Volume) -> Result<(Mask, Threshold)> {
        let (threshold, automatic) = match self.params.threshold {
            Some(bounds) => (bounds.resolve(volume.bit_depth())?, false),
            None => (Thresholder::auto_threshold(volume)?, true),
        };
        let mask = Thresholder::apply(volume, threshold)?;
        self.emit(PipelineEvent::ThresholdSelected {
            threshold,
            automatic,
            foreground: mask.count_foreground(),
        });
        Ok((mask, threshold))
    }

    fn write(
        &self,
        mask: &Mask,
        outputs: &[FormatDescriptor],
        result: &mut RunResult,
    ) -> Result<()> {
        let labeled = mask.to_volume(FOREGROUND_LABEL);

        for (report, descriptor) in result.outputs.iter_mut().zip(outputs) {
            if self.params.dry_run {
                report.outcome = OutputOutcome::Skipped;
                self.emit(PipelineEvent::OutputSkipped {
                    descriptor: descriptor.clone(),
                });
                continue;
            }

            match VolumeWriter::write(&labeled, descriptor) {
                Ok(_) => {
                    report.outcome = OutputOutcome::Written;
                    self.emit(PipelineEvent::OutputWritten {
                        descriptor: descriptor.clone(),
                    });
                }
                Err(error) => {
                    report.outcome = OutputOutcome::Failed(error.clone());
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    fn run_stage<T>(&self, stage: Stage, body: impl FnOnce() -> Result<T>) -> Result<T> {
        if self.cancel.is_cancelled() {
            let error = SegmentError::Cancelled(stage);
            self.emit(PipelineEvent::StageFailed {
                stage,
                error: error.clone(),
            });
            return Err(error);
        }

        self.emit(PipelineEvent::StageStarted { stage });
        let started = Instant::now();
        match body() {
            Ok(value) => {
                self.emit(PipelineEvent::StageFinished {
                    stage,
                    elapsed: started.elapsed(),
                });
                Ok(value)
            }
            Err(error) => {
                self.emit(PipelineEvent::StageFailed {
                    stage,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    fn skip_stage(&self, stage: Stage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SegmentError::Cancelled(stage));
        }
        self.emit(PipelineEvent::StageSkipped { stage });
        Ok(())
    }

    fn emit(&self, event: PipelineEvent) {
        self.sink.on_event(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_defaults() {
        let params = SegmentParams::new("scan.raw");
        assert_eq!(params.downsample, 2);
        assert!(params.threshold.is_none());
        assert!(!params.remove_soil);
        assert!(params.threads >= 1);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_params_validation() {
        let test_cases = vec![
            SegmentParams {
                downsample: 0,
                ..SegmentParams::new("a.raw")
            },
            SegmentParams {
                threads: 0,
                ..SegmentParams::new("a.raw")
            },
            SegmentParams {
                dry_run: true,
                force: true,
                ..SegmentParams::new("a.raw")
            },
            SegmentParams {
                threshold: Some(ThresholdBounds::new(Some(100), Some(100))),
                ..SegmentParams::new("a.raw")
            },
        ];

        for params in test_cases {
            assert!(
                matches!(params.validate(), Err(SegmentError::InvalidParameter(_))),
                "{params:?}"
            );
        }
    }

    #[test]
    fn test_missing_input_fails_in_init() {
        let result = Pipeline::new(SegmentParams::new("/definitely/not/here.raw")).run();
        let (stage, error) = result.failure().expect("run should fail");
        assert_eq!(stage, Stage::Init);
        assert!(matches!(error, SegmentError::Io { .. }));
        assert!(matches!(
            result.outputs[0].outcome,
            OutputOutcome::NotAttempted
        ));
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
