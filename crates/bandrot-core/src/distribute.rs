//! The per-worker rotation protocol.
//!
//! The coordinator runs [`coordinate`] and every other worker runs
//! [`contribute`].
//!
//! 1. **Load**: the coordinator obtains the source raster
//! 2. **Announce**: the coordinator broadcasts `Ready(header)`, or
//!    `Abort(reason)` when loading failed so nobody waits for pixels that
//!    will never come. Workers wait for the announcement without a deadline,
//!    since loading takes as long as it takes
//! 3. **Replicate**: the coordinator broadcasts the pixel buffer; every
//!    worker now owns a full copy of the source
//! 4. **Compute**: each worker derives the geometry and its band from the
//!    broadcast data alone and rotates its band
//! 5. **Collect**: bands are gathered at the coordinator in worker order and
//!    assembled into the destination raster
//!
//! # Assembly Modes
//!
//! - [`GatherMode::Ragged`] sends only the valid rows of each band and places
//!   them at `start * width`
//! - [`GatherMode::FixedCapacity`] sends every band at full capacity,
//!   concatenates them and truncates the trailing padding

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::collective::{CollectiveError, Communicator};
use crate::error::{Result, RotateError};
use crate::partition::{BandPlan, RowRange};
use crate::raster::{RasterHeader, RasterImage};
use crate::transform::{rotate_band, RotationGeometry, SamplingConvention, BACKGROUND};

/// Rank that loads the source and receives the result.
pub const COORDINATOR: usize = 0;

/// How bands travel back to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatherMode {
    /// Every worker sends `rows_per_worker` rows; the coordinator truncates.
    FixedCapacity,
    /// Every worker sends exactly its valid rows.
    #[default]
    Ragged,
}

/// First broadcast of a run: go or stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    Ready(RasterHeader),
    Abort(String),
}

/// One worker's contribution to the destination image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Band {
    pub range: RowRange,
    pub pixels: Vec<u8>,
}

/// Everything exchanged between workers during a run.
#[derive(Debug, Clone)]
pub enum Packet {
    Announce(Announcement),
    Pixels(Vec<u8>),
    Band(Band),
}

impl Packet {
    fn kind(&self) -> &'static str {
        match self {
            Packet::Announce(_) => "announcement",
            Packet::Pixels(_) => "pixels",
            Packet::Band(_) => "band",
        }
    }
}

/// Rotation settings shared by every worker.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RotationParams {
    pub angle_degrees: f64,
    pub convention: SamplingConvention,
    pub gather: GatherMode,
}

/// The coordinator's result.
#[derive(Debug, Clone)]
pub struct RotatedRaster {
    pub source: RasterHeader,
    pub image: RasterImage,
    pub plan: BandPlan,
    /// Wall-clock time of compute plus collection at the coordinator.
    pub elapsed: Duration,
}

/// Error types for destination assembly.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// The gather returned the wrong number of contributions.
    #[error("Expected {expected} bands, got {actual}")]
    BandCount { expected: usize, actual: usize },

    /// A band covers different rows than the partition assigns its worker.
    #[error("Band from worker {worker} covers rows {actual:?}, expected {expected:?}")]
    MisplacedBand {
        worker: usize,
        expected: RowRange,
        actual: RowRange,
    },

    /// A band holds the wrong number of samples.
    #[error("Band from worker {worker} holds {actual} samples, expected {expected}")]
    BandLength {
        worker: usize,
        expected: usize,
        actual: usize,
    },

    /// The bands do not cover every destination row.
    #[error("Bands cover {covered} of {expected} destination samples")]
    Coverage { covered: usize, expected: usize },
}

/// The coordinator's share of a distributed rotation.
///
/// Runs `load`, distributes the result (or an abort) to every other worker,
/// rotates its own band and assembles the destination from all bands. This
/// worker's rank is the root of every collective.
pub fn coordinate<L>(
    comm: &mut Communicator<Packet>,
    load: L,
    params: &RotationParams,
) -> Result<RotatedRaster>
where
    L: FnOnce() -> Result<RasterImage>,
{
    let src = announce_source(comm, load())?;
    debug!(
        rank = comm.rank(),
        width = src.width,
        height = src.height,
        "source distributed"
    );

    let started = Instant::now();
    let (geometry, plan, band) = own_band(comm, &src, params);
    let source_header = src.header();
    drop(src);

    let rank = comm.rank();
    let bands = comm
        .gather_here(Packet::Band(band))?
        .into_iter()
        .map(|packet| match packet {
            Packet::Band(band) => Ok(band),
            other => Err(unexpected(rank, "band", &other)),
        })
        .collect::<Result<Vec<_>>>()?;

    let pixels = match params.gather {
        GatherMode::FixedCapacity => assemble_fixed(&plan, geometry.dst_width, bands)?,
        GatherMode::Ragged => assemble_ragged(&plan, geometry.dst_width, bands)?,
    };

    Ok(RotatedRaster {
        source: source_header,
        image: RasterImage {
            width: geometry.dst_width,
            height: geometry.dst_height,
            maxval: source_header.maxval,
            pixels,
        },
        plan,
        elapsed: started.elapsed(),
    })
}

/// Every other worker's share: receive the source from `root`, rotate the
/// assigned band and hand it back.
pub fn contribute(
    comm: &mut Communicator<Packet>,
    root: usize,
    params: &RotationParams,
) -> Result<()> {
    let src = receive_source(comm, root)?;
    debug!(
        rank = comm.rank(),
        width = src.width,
        height = src.height,
        "source replicated"
    );

    let (_, _, band) = own_band(comm, &src, params);
    drop(src);

    comm.gather(root, Packet::Band(band))?;
    Ok(())
}

/// Root side of replication: announce, then ship the pixels.
///
/// A failed load is announced as an abort and returned as is.
fn announce_source(
    comm: &mut Communicator<Packet>,
    loaded: Result<RasterImage>,
) -> Result<RasterImage> {
    let root = comm.rank();

    let image = match loaded {
        Ok(image) => image,
        Err(err) => {
            let abort = Packet::Announce(Announcement::Abort(err.to_string()));
            if let Err(send_err) = comm.broadcast_untimed(root, Some(abort)) {
                warn!(rank = root, error = %send_err, "could not announce abort");
            }
            return Err(err);
        }
    };

    let header = image.header();
    comm.broadcast_untimed(root, Some(Packet::Announce(Announcement::Ready(header))))?;
    match comm.broadcast(root, Some(Packet::Pixels(image.pixels)))? {
        Packet::Pixels(pixels) => Ok(RasterImage::new(header, pixels)?),
        other => Err(unexpected(root, "pixels", &other)),
    }
}

/// Receiving side of replication.
///
/// The announcement wait has no deadline: the coordinator may still be
/// loading. The pixels follow the announcement immediately.
fn receive_source(comm: &mut Communicator<Packet>, root: usize) -> Result<RasterImage> {
    let rank = comm.rank();

    let header = match comm.broadcast_untimed(root, None)? {
        Packet::Announce(Announcement::Ready(header)) => header,
        Packet::Announce(Announcement::Abort(reason)) => {
            warn!(rank, %reason, "coordinator aborted the run");
            return Err(RotateError::Aborted(reason));
        }
        other => return Err(unexpected(rank, "announcement", &other)),
    };

    match comm.broadcast(root, None)? {
        Packet::Pixels(pixels) => Ok(RasterImage::new(header, pixels)?),
        other => Err(unexpected(rank, "pixels", &other)),
    }
}

/// Derive the geometry and partition from the replicated source and rotate
/// this worker's band.
fn own_band(
    comm: &Communicator<Packet>,
    src: &RasterImage,
    params: &RotationParams,
) -> (RotationGeometry, BandPlan, Band) {
    let rank = comm.rank();
    let geometry = RotationGeometry::new(
        src.width,
        src.height,
        params.angle_degrees,
        params.convention,
    );
    let plan = BandPlan::new(geometry.dst_height, comm.size() as u32);
    let range = plan.range_for(rank as u32);

    let mut pixels = rotate_band(src, &geometry, range, plan.rows_per_worker);
    if params.gather == GatherMode::Ragged {
        pixels.truncate(range.len() as usize * geometry.dst_width as usize);
    }
    debug!(
        rank,
        start = range.start,
        end = range.end,
        samples = pixels.len(),
        "band computed"
    );

    (geometry, plan, Band { range, pixels })
}

fn unexpected(rank: usize, expected: &'static str, packet: &Packet) -> RotateError {
    CollectiveError::UnexpectedMessage {
        rank,
        expected,
        actual: packet.kind(),
    }
    .into()
}

fn check_bands(plan: &BandPlan, bands: &[Band]) -> std::result::Result<(), AssemblyError> {
    if bands.len() != plan.workers as usize {
        return Err(AssemblyError::BandCount {
            expected: plan.workers as usize,
            actual: bands.len(),
        });
    }
    for (worker, band) in bands.iter().enumerate() {
        let expected = plan.range_for(worker as u32);
        if band.range != expected {
            return Err(AssemblyError::MisplacedBand {
                worker,
                expected,
                actual: band.range,
            });
        }
    }
    Ok(())
}

/// Concatenate full-capacity bands in worker order and cut the result to
/// `width * total_rows` samples.
///
/// Band `i` always starts at row `i * rows_per_worker`, so all padding rows
/// sit past the last valid row and the cut removes exactly them.
pub fn assemble_fixed(
    plan: &BandPlan,
    width: u32,
    bands: Vec<Band>,
) -> std::result::Result<Vec<u8>, AssemblyError> {
    check_bands(plan, &bands)?;

    let capacity = plan.band_capacity(width);
    let expected = plan.total_rows as usize * width as usize;
    let mut pixels = Vec::with_capacity(capacity * bands.len());

    for (worker, band) in bands.into_iter().enumerate() {
        if band.pixels.len() != capacity {
            return Err(AssemblyError::BandLength {
                worker,
                expected: capacity,
                actual: band.pixels.len(),
            });
        }
        pixels.extend_from_slice(&band.pixels);
    }

    if pixels.len() < expected {
        return Err(AssemblyError::Coverage {
            covered: pixels.len(),
            expected,
        });
    }
    pixels.truncate(expected);
    Ok(pixels)
}

/// Place each band's valid rows at its own offset in the destination.
pub fn assemble_ragged(
    plan: &BandPlan,
    width: u32,
    bands: Vec<Band>,
) -> std::result::Result<Vec<u8>, AssemblyError> {
    check_bands(plan, &bands)?;

    let expected = plan.total_rows as usize * width as usize;
    let mut pixels = vec![BACKGROUND; expected];
    let mut covered = 0;

    for (worker, band) in bands.into_iter().enumerate() {
        let (offset, length) = plan.band_extent(worker as u32, width);
        if band.pixels.len() != length {
            return Err(AssemblyError::BandLength {
                worker,
                expected: length,
                actual: band.pixels.len(),
            });
        }
        pixels[offset..offset + length].copy_from_slice(&band.pixels);
        covered += length;
    }

    if covered != expected {
        return Err(AssemblyError::Coverage { covered, expected });
    }
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::ProcessGroup;
    use crate::raster::RasterError;
    use crate::transform::rotate_image;
    use std::thread;

    fn test_image(width: u32, height: u32) -> RasterImage {
        let pixels = (0..width * height).map(|i| (i * 7 % 251) as u8).collect();
        RasterImage::new(RasterHeader::new(width, height, 255).unwrap(), pixels).unwrap()
    }

    /// Run a whole group and split the coordinator's result from the rest.
    fn run_group_with<L>(
        workers: usize,
        timeout: Option<Duration>,
        load: L,
        params: RotationParams,
    ) -> (Result<RotatedRaster>, Vec<Result<()>>)
    where
        L: FnOnce() -> Result<RasterImage> + Send,
    {
        let results = ProcessGroup::new(workers)
            .unwrap()
            .with_timeout(timeout)
            .run_rooted(
                COORDINATOR,
                |mut comm: Communicator<Packet>| coordinate(&mut comm, load, &params),
                |mut comm: Communicator<Packet>| contribute(&mut comm, COORDINATOR, &params),
            )
            .unwrap();
        let others = results
            .others
            .into_iter()
            .map(|(_, joined)| joined.unwrap())
            .collect();
        (results.root.unwrap(), others)
    }

    fn run_group(
        src: &RasterImage,
        workers: usize,
        params: RotationParams,
    ) -> (Result<RotatedRaster>, Vec<Result<()>>) {
        run_group_with(workers, None, || Ok(src.clone()), params)
    }

    fn bands_for(plan: &BandPlan, width: u32, mode: GatherMode) -> Vec<Band> {
        plan.ranges()
            .map(|range| {
                let mut pixels = vec![0u8; plan.band_capacity(width)];
                for (i, row) in range.rows().enumerate() {
                    let line = &mut pixels[i * width as usize..(i + 1) * width as usize];
                    line.fill(row as u8 + 1);
                }
                if mode == GatherMode::Ragged {
                    pixels.truncate(range.len() as usize * width as usize);
                }
                Band { range, pixels }
            })
            .collect()
    }

    #[test]
    fn test_uniform_45_degree_two_workers() {
        let src = RasterImage::filled(4, 4, 255, 100).unwrap();
        let params = RotationParams {
            angle_degrees: 45.0,
            ..Default::default()
        };
        let (coordinator, others) = run_group(&src, 2, params);
        let rotated = coordinator.unwrap();

        assert_eq!((rotated.image.width, rotated.image.height), (5, 5));
        assert_eq!(rotated.plan.rows_per_worker, 3);
        assert_eq!(rotated.plan.range_for(0), RowRange { start: 0, end: 3 });
        assert_eq!(rotated.plan.range_for(1), RowRange { start: 3, end: 5 });
        assert_eq!(rotated.image.get(0, 0), Some(0));
        assert_eq!(rotated.image.get(4, 4), Some(0));
        assert_eq!(rotated.image.get(2, 2), Some(100));
        assert!(rotated.image.pixels.iter().all(|&p| p == 0 || p == 100));
        assert_eq!(rotated.source, src.header());

        assert!(others.into_iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_distributed_matches_single_pass() {
        let src = test_image(23, 17);
        for angle in [0.0, 12.5, 90.0, 137.0, 180.0, -60.0, 725.0] {
            let expected = rotate_image(&src, angle, SamplingConvention::PixelCenter);
            for workers in [1, 2, 3, 7] {
                let params = RotationParams {
                    angle_degrees: angle,
                    ..Default::default()
                };
                let (coordinator, _) = run_group(&src, workers, params);
                let rotated = coordinator.unwrap();
                assert_eq!(
                    rotated.image, expected,
                    "angle {} with {} workers",
                    angle, workers
                );
            }
        }
    }

    #[test]
    fn test_fixed_capacity_matches_ragged() {
        let src = test_image(19, 11);
        for workers in [1, 3, 4, 6] {
            let ragged = run_group(
                &src,
                workers,
                RotationParams {
                    angle_degrees: 33.0,
                    gather: GatherMode::Ragged,
                    ..Default::default()
                },
            )
            .0
            .unwrap();
            let fixed = run_group(
                &src,
                workers,
                RotationParams {
                    angle_degrees: 33.0,
                    gather: GatherMode::FixedCapacity,
                    ..Default::default()
                },
            )
            .0
            .unwrap();
            assert_eq!(ragged.image, fixed.image, "{} workers", workers);
        }
    }

    #[test]
    fn test_legacy_convention_distributes_identically() {
        let src = test_image(12, 9);
        let expected = rotate_image(&src, 21.0, SamplingConvention::Legacy);
        let params = RotationParams {
            angle_degrees: 21.0,
            convention: SamplingConvention::Legacy,
            gather: GatherMode::FixedCapacity,
        };
        let rotated = run_group(&src, 4, params).0.unwrap();
        assert_eq!(rotated.image, expected);
    }

    #[test]
    fn test_more_workers_than_rows() {
        let src = test_image(3, 2);
        let expected = rotate_image(&src, 0.0, SamplingConvention::PixelCenter);
        let rotated = run_group(&src, 5, RotationParams::default())
            .0
            .unwrap();
        assert_eq!(rotated.image, expected);
    }

    #[test]
    fn test_load_failure_aborts_every_worker() {
        let (coordinator, others) = run_group_with(
            4,
            None,
            || Err(RasterError::InvalidMagic("P6".to_string()).into()),
            RotationParams::default(),
        );

        assert!(matches!(
            coordinator,
            Err(RotateError::Raster(RasterError::InvalidMagic(_)))
        ));
        for result in others {
            match result {
                Err(RotateError::Aborted(reason)) => assert!(reason.contains("P6")),
                other => panic!("expected abort, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_slow_load_is_not_a_timeout() {
        let src = test_image(9, 7);
        let timeout = Duration::from_millis(100);
        let (coordinator, others) = run_group_with(
            3,
            Some(timeout),
            || {
                thread::sleep(timeout * 3);
                Ok(src.clone())
            },
            RotationParams {
                angle_degrees: 40.0,
                ..Default::default()
            },
        );

        let rotated = coordinator.unwrap();
        assert_eq!(
            rotated.image,
            rotate_image(&src, 40.0, SamplingConvention::PixelCenter)
        );
        assert!(others.into_iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_panicking_load_releases_every_worker() {
        let params = RotationParams::default();
        let results = ProcessGroup::new(3)
            .unwrap()
            .run_rooted(
                COORDINATOR,
                |mut comm: Communicator<Packet>| {
                    coordinate(&mut comm, || panic!("loader crashed"), &params)
                },
                |mut comm: Communicator<Packet>| contribute(&mut comm, COORDINATOR, &params),
            )
            .unwrap();

        assert!(matches!(
            results.root,
            Err(CollectiveError::WorkerPanicked { rank: 0 })
        ));
        for (rank, result) in results.others {
            assert!(
                matches!(
                    result,
                    Ok(Err(RotateError::Collective(CollectiveError::Disconnected {
                        peer: 0,
                        ..
                    })))
                ),
                "rank {} got {:?}",
                rank,
                result
            );
        }
    }

    #[test]
    fn test_assemble_fixed_truncates_padding() {
        // 5 rows, 2 workers: 6 rows gathered, last one is padding
        let plan = BandPlan::new(5, 2);
        let bands = bands_for(&plan, 3, GatherMode::FixedCapacity);
        assert_eq!(bands.iter().map(|b| b.pixels.len()).sum::<usize>(), 18);

        let pixels = assemble_fixed(&plan, 3, bands).unwrap();
        assert_eq!(pixels, vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4, 5, 5, 5]);
    }

    #[test]
    fn test_assemble_ragged_places_by_offset() {
        let plan = BandPlan::new(5, 4);
        let bands = bands_for(&plan, 2, GatherMode::Ragged);
        assert!(bands[3].pixels.is_empty());

        let pixels = assemble_ragged(&plan, 2, bands).unwrap();
        assert_eq!(pixels, vec![1, 1, 2, 2, 3, 3, 4, 4, 5, 5]);
    }

    #[test]
    fn test_assemble_rejects_short_band() {
        let plan = BandPlan::new(4, 2);
        let mut bands = bands_for(&plan, 2, GatherMode::Ragged);
        bands[1].pixels.pop();
        assert!(matches!(
            assemble_ragged(&plan, 2, bands),
            Err(AssemblyError::BandLength {
                worker: 1,
                expected: 4,
                actual: 3
            })
        ));

        let mut bands = bands_for(&plan, 2, GatherMode::FixedCapacity);
        bands[0].pixels.push(0);
        assert!(matches!(
            assemble_fixed(&plan, 2, bands),
            Err(AssemblyError::BandLength { worker: 0, .. })
        ));
    }

    #[test]
    fn test_assemble_rejects_swapped_bands() {
        let plan = BandPlan::new(4, 2);
        let mut bands = bands_for(&plan, 2, GatherMode::Ragged);
        bands.swap(0, 1);
        assert!(matches!(
            assemble_ragged(&plan, 2, bands),
            Err(AssemblyError::MisplacedBand { worker: 0, .. })
        ));
    }

    #[test]
    fn test_assemble_rejects_missing_band() {
        let plan = BandPlan::new(4, 2);
        let mut bands = bands_for(&plan, 2, GatherMode::FixedCapacity);
        bands.pop();
        assert!(matches!(
            assemble_fixed(&plan, 2, bands),
            Err(AssemblyError::BandCount {
                expected: 2,
                actual: 1
            })
        ));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================
