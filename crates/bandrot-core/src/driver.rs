//! Run orchestration: configuration, group formation, sequencing, output.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collective::{Communicator, ProcessGroup};
use crate::distribute::{
    contribute, coordinate, GatherMode, Packet, RotatedRaster, RotationParams, COORDINATOR,
};
use crate::error::{Result, RotateError};
use crate::raster::{
    derived_output_path, read_pgm_file, write_pgm_file, write_png_file, RasterHeader, RasterImage,
};
use crate::transform::SamplingConvention;

/// Input file used when none is given.
pub const DEFAULT_INPUT: &str = "im.pgm";

/// Default bound on every collective wait.
pub const DEFAULT_COLLECTIVE_TIMEOUT_MS: u64 = 30_000;

/// Settings for one rotation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotateConfig {
    /// Source graymap.
    pub input: PathBuf,
    /// Destination graymap; `rotated_<input name>` next to the input if unset.
    pub output: Option<PathBuf>,
    /// Rotation angle in degrees, positive = counter-clockwise.
    pub angle_degrees: f64,
    /// Number of workers in the group.
    pub workers: usize,
    /// Bound on each collective wait in milliseconds; `None` waits forever.
    pub collective_timeout_ms: Option<u64>,
    pub gather: GatherMode,
    pub sampling: SamplingConvention,
    /// Optional PNG preview of the result.
    pub png_preview: Option<PathBuf>,
}

impl Default for RotateConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_INPUT),
            output: None,
            angle_degrees: 0.0,
            workers: default_workers(),
            collective_timeout_ms: Some(DEFAULT_COLLECTIVE_TIMEOUT_MS),
            gather: GatherMode::default(),
            sampling: SamplingConvention::default(),
            png_preview: None,
        }
    }
}

/// One worker per available core.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl RotateConfig {
    /// Create a config rotating by `angle_degrees` with default settings.
    pub fn new(angle_degrees: f64) -> Self {
        Self {
            angle_degrees,
            ..Default::default()
        }
    }

    /// Reject settings no run can succeed with.
    pub fn validate(&self) -> Result<()> {
        if !self.angle_degrees.is_finite() {
            return Err(RotateError::InvalidConfig(format!(
                "angle must be a finite number of degrees, got {}",
                self.angle_degrees
            )));
        }
        if self.workers == 0 {
            return Err(RotateError::InvalidConfig(
                "at least one worker is required".to_string(),
            ));
        }
        if u32::try_from(self.workers).is_err() {
            return Err(RotateError::InvalidConfig(format!(
                "{} workers is more than a band plan can address",
                self.workers
            )));
        }
        if self.collective_timeout_ms == Some(0) {
            return Err(RotateError::InvalidConfig(
                "collective timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Where the rotated graymap is written.
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| derived_output_path(&self.input))
    }

    pub fn collective_timeout(&self) -> Option<Duration> {
        self.collective_timeout_ms.map(Duration::from_millis)
    }

    pub fn params(&self) -> RotationParams {
        RotationParams {
            angle_degrees: self.angle_degrees,
            convention: self.sampling,
            gather: self.gather,
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RotationReport {
    pub source: RasterHeader,
    pub destination: RasterHeader,
    pub angle_degrees: f64,
    pub workers: usize,
    pub rows_per_worker: u32,
    pub gather: GatherMode,
    pub sampling: SamplingConvention,
    /// Compute plus collection time measured at the coordinator.
    pub elapsed_seconds: f64,
    pub output: PathBuf,
    pub png_preview: Option<PathBuf>,
}

/// Rotate a raster obtained from `load` across `workers` workers.
///
/// `load` runs on the coordinator only, and its duration does not count
/// against `timeout`. When it fails, every other worker is aborted and the
/// load error is returned.
pub fn rotate_distributed<L>(
    load: L,
    workers: usize,
    timeout: Option<Duration>,
    params: &RotationParams,
) -> Result<RotatedRaster>
where
    L: FnOnce() -> Result<RasterImage> + Send,
{
    let group = ProcessGroup::new(workers)?.with_timeout(timeout);
    debug!(workers, ?timeout, "process group formed");

    let results = group.run_rooted(
        COORDINATOR,
        |mut comm: Communicator<Packet>| {
            let _span = tracing::debug_span!("worker", rank = comm.rank()).entered();
            coordinate(&mut comm, load, params)
        },
        |mut comm: Communicator<Packet>| {
            let _span = tracing::debug_span!("worker", rank = comm.rank()).entered();
            contribute(&mut comm, COORDINATOR, params)
        },
    )?;

    for (rank, outcome) in &results.others {
        match outcome {
            Ok(Ok(())) | Ok(Err(RotateError::Aborted(_))) => {}
            Ok(Err(err)) => warn!(rank, error = %err, "worker failed"),
            Err(err) => warn!(rank, error = %err, "worker did not finish"),
        }
    }

    Ok(results.root??)
}

/// Rotate an in-memory raster.
pub fn rotate_in_memory(
    src: &RasterImage,
    workers: usize,
    timeout: Option<Duration>,
    params: &RotationParams,
) -> Result<RotatedRaster> {
    rotate_distributed(|| Ok(src.clone()), workers, timeout, params)
}

/// Run a full file-to-file rotation as described by `config`.
///
/// Nothing is written unless the rotation succeeds, and a failed PNG preview
/// takes the graymap output with it.
pub fn run(config: &RotateConfig) -> Result<RotationReport> {
    config.validate()?;
    info!(
        input = %config.input.display(),
        angle = config.angle_degrees,
        workers = config.workers,
        "starting rotation"
    );

    let input = config.input.clone();
    let rotated = rotate_distributed(
        || Ok(read_pgm_file(&input)?),
        config.workers,
        config.collective_timeout(),
        &config.params(),
    )?;

    let output = config.output_path();
    write_pgm_file(&output, &rotated.image)?;
    if let Some(png) = &config.png_preview {
        // Both outputs or neither
        if let Err(err) = write_png_file(png, &rotated.image) {
            let _ = fs::remove_file(&output);
            return Err(err.into());
        }
    }

    info!(
        output = %output.display(),
        width = rotated.image.width,
        height = rotated.image.height,
        elapsed_ms = rotated.elapsed.as_millis() as u64,
        "rotation written"
    );

    Ok(RotationReport {
        source: rotated.source,
        destination: rotated.image.header(),
        angle_degrees: config.angle_degrees,
        workers: config.workers,
        rows_per_worker: rotated.plan.rows_per_worker,
        gather: config.gather,
        sampling: config.sampling,
        elapsed_seconds: rotated.elapsed.as_secs_f64(),
        output,
        png_preview: config.png_preview.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{parse_pgm, RasterError};
    use crate::transform::rotate_image;
    use std::fs;

    fn write_source(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("im.pgm");
        let rows = "100 100 100 100\n".repeat(4);
        fs::write(&path, format!("P2\n# test\n4 4\n255\n{}", rows)).unwrap();
        path
    }

    #[test]
    fn test_config_defaults() {
        let config = RotateConfig::default();
        assert_eq!(config.input, PathBuf::from("im.pgm"));
        assert_eq!(config.output_path(), PathBuf::from("rotated_im.pgm"));
        assert!(config.workers >= 1);
        assert_eq!(config.collective_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.gather, GatherMode::Ragged);
        assert_eq!(config.sampling, SamplingConvention::PixelCenter);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_settings() {
        let mut config = RotateConfig::new(f64::NAN);
        assert!(matches!(config.validate(), Err(RotateError::InvalidConfig(_))));

        config = RotateConfig::new(f64::INFINITY);
        assert!(config.validate().is_err());

        config = RotateConfig::new(10.0);
        config.workers = 0;
        assert!(config.validate().is_err());

        config = RotateConfig::new(10.0);
        config.collective_timeout_ms = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_accepts_any_finite_angle() {
        for angle in [-1080.5, -45.0, 0.0, 359.999, 7200.0] {
            assert!(RotateConfig::new(angle).validate().is_ok(), "angle {}", angle);
        }
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let json = r#"{
            "angle_degrees": 30.0,
            "workers": 3,
            "gather": "fixed_capacity",
            "sampling": "legacy"
        }"#;
        let config: RotateConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.angle_degrees, 30.0);
        assert_eq!(config.workers, 3);
        assert_eq!(config.gather, GatherMode::FixedCapacity);
        assert_eq!(config.sampling, SamplingConvention::Legacy);
        assert_eq!(config.input, PathBuf::from("im.pgm"));
    }

    #[test]
    fn test_rotate_in_memory_single_vs_many_workers() {
        let pixels = (0..15 * 9).map(|i| (i % 200) as u8).collect();
        let src = RasterImage::new(RasterHeader::new(15, 9, 255).unwrap(), pixels).unwrap();
        let params = RotationParams {
            angle_degrees: -75.0,
            ..Default::default()
        };

        let one = rotate_in_memory(&src, 1, None, &params).unwrap();
        let many = rotate_in_memory(&src, 4, Some(Duration::from_secs(5)), &params).unwrap();
        assert_eq!(one.image, many.image);
        assert_eq!(
            one.image,
            rotate_image(&src, -75.0, SamplingConvention::PixelCenter)
        );
    }

    #[test]
    fn test_run_writes_derived_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_source(dir.path());

        let mut config = RotateConfig::new(45.0);
        config.input = input;
        config.workers = 2;
        let report = run(&config).unwrap();

        let expected_output = dir.path().join("rotated_im.pgm");
        assert_eq!(report.output, expected_output);
        assert_eq!(report.source.width, 4);
        assert_eq!((report.destination.width, report.destination.height), (5, 5));
        assert_eq!(report.rows_per_worker, 3);
        assert!(report.elapsed_seconds >= 0.0);

        let written = parse_pgm(&fs::read_to_string(&expected_output).unwrap()).unwrap();
        assert_eq!((written.width, written.height, written.maxval), (5, 5, 255));
        assert_eq!(written.get(2, 2), Some(100));
        assert_eq!(written.get(0, 0), Some(0));
    }

    #[test]
    fn test_run_writes_png_preview() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RotateConfig::new(90.0);
        config.input = write_source(dir.path());
        config.output = Some(dir.path().join("out.pgm"));
        config.png_preview = Some(dir.path().join("out.png"));
        config.workers = 3;

        let report = run(&config).unwrap();
        assert_eq!(report.png_preview, Some(dir.path().join("out.png")));
        assert!(dir.path().join("out.pgm").exists());
        assert!(dir.path().join("out.png").exists());
    }

    #[test]
    fn test_run_failed_preview_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RotateConfig::new(15.0);
        config.input = write_source(dir.path());
        config.png_preview = Some(dir.path().join("missing").join("p.png"));
        config.workers = 2;

        let err = run(&config).unwrap_err();
        assert!(matches!(err, RotateError::Raster(RasterError::Io(_))));

        let left: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(left, vec![std::ffi::OsString::from("im.pgm")]);
    }

    #[test]
    fn test_slow_input_outlasts_collective_timeout() {
        let src = RasterImage::filled(6, 5, 255, 80).unwrap();
        let timeout = Duration::from_millis(100);
        let params = RotationParams {
            angle_degrees: 30.0,
            ..Default::default()
        };

        let rotated = rotate_distributed(
            || {
                std::thread::sleep(timeout * 3);
                Ok(src.clone())
            },
            3,
            Some(timeout),
            &params,
        )
        .unwrap();
        assert_eq!(
            rotated.image,
            rotate_image(&src, 30.0, SamplingConvention::PixelCenter)
        );
    }

    #[test]
    fn test_run_missing_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RotateConfig::new(30.0);
        config.input = dir.path().join("absent.pgm");
        config.workers = 4;
        config.collective_timeout_ms = Some(2_000);

        let err = run(&config).unwrap_err();
        assert!(matches!(err, RotateError::Raster(RasterError::Io(_))));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_run_malformed_input_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.pgm");
        fs::write(&input, "P2\n2 2\n255\n1 2 3\n").unwrap();

        let mut config = RotateConfig::new(10.0);
        config.input = input;
        config.workers = 3;
        let err = run(&config).unwrap_err();
        assert!(matches!(
            err,
            RotateError::Raster(RasterError::PixelCount { .. })
        ));
        assert!(!dir.path().join("rotated_bad.pgm").exists());
    }

    #[test]
    fn test_run_rejects_invalid_config_before_reading() {
        let config = RotateConfig {
            workers: 0,
            input: PathBuf::from("/definitely/not/here.pgm"),
            ..RotateConfig::new(5.0)
        };
        assert!(matches!(run(&config), Err(RotateError::InvalidConfig(_))));
    }
}
