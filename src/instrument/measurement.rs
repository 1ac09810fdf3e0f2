//! Measurement pipeline
//!
//! Turns decoded sensor frames into [`Reading`]s. Every check here is pure:
//! frame alignment, dynamic range, spot consistency, strip segmentation and
//! flash extraction each either pass or name the device code that explains
//! why the data was rejected. The session does the I/O around them.

use crate::hardware::{AcquisitionPlan, SensorFrame, SensorLimits, SpectralBands};
use crate::instrument::codes::DeviceCode;
use crate::instrument::mode::DeviceMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sampled spectrum on a regular band grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    /// Wavelength of the first band (nm)
    pub start_nm: f64,
    /// Wavelength of the last band (nm)
    pub end_nm: f64,
    /// Band values
    pub values: Vec<f64>,
}

impl Spectrum {
    /// Spectrum on `bands` with `values`.
    pub fn new(bands: &SpectralBands, values: Vec<f64>) -> Self {
        Self {
            start_nm: bands.start_nm,
            end_nm: bands.end_nm,
            values,
        }
    }

    /// Band spacing (nm).
    pub fn spacing(&self) -> f64 {
        if self.values.len() < 2 {
            return 0.0;
        }
        (self.end_nm - self.start_nm) / (self.values.len() - 1) as f64
    }
}

/// Physical strip layout, as given by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StripGeometry {
    /// Patch length along the strip (mm)
    pub patch_length_mm: f64,
    /// Gap between patches (mm)
    pub gap_length_mm: f64,
    /// Trailer after the last patch (mm)
    pub trailer_length_mm: f64,
}

/// Strip/pass metadata attached to strip readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassInfo {
    /// Strip the pass belongs to
    pub strip_name: String,
    /// Pass label
    pub pass_name: String,
    /// Guide position
    pub guide: u32,
    /// Patch layout along the strip
    pub geometry: StripGeometry,
}

/// One measured sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Patch name
    pub name: String,
    /// Position in the request
    pub index: usize,
    /// Mode it was taken in
    pub mode: DeviceMode,
    /// Band values, when spectral output was requested
    pub spectrum: Option<Spectrum>,
    /// CIE XYZ, when a converter is attached
    pub xyz: Option<[f64; 3]>,
    /// Strip metadata for strip readings
    pub pass: Option<PassInfo>,
    /// When the reading completed
    pub taken_at: DateTime<Utc>,
}

/// Spectral to colorimetric conversion, provided by the caller.
pub trait SpectralConverter: Send + Sync {
    /// CIE XYZ of a spectrum.
    fn to_xyz(&self, spectrum: &Spectrum) -> [f64; 3];
}

/// Thresholds the pipeline applies, from configuration and options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    /// Sensor range limits
    pub limits: SensorLimits,
    /// Relative spread allowed across spot frames
    pub spot_consistency: f64,
    /// Relative level change that starts a new strip segment
    pub scan_tolerance: f64,
    /// Shortest segment that counts as a patch
    pub min_patch_samples: usize,
    /// Fraction of the flash rise above ambient that marks a flash frame
    pub flash_threshold: f64,
}

/// Check a received byte count against the plan.
pub fn check_alignment(plan: &AcquisitionPlan, received: usize) -> Result<(), DeviceCode> {
    if plan.frame_size == 0 || received % plan.frame_size != 0 {
        return Err(DeviceCode::HW_ME_ODDREAD);
    }
    if plan.variable {
        if received == 0 {
            return Err(DeviceCode::RD_SHORTMEAS);
        }
    } else if received < plan.expected_bytes() {
        return Err(DeviceCode::HW_ME_SHORTREAD);
    }
    Ok(())
}

/// Per-frame dynamic range checks.
pub fn check_range(
    frames: &[SensorFrame],
    limits: &SensorLimits,
    mode: DeviceMode,
) -> Result<(), DeviceCode> {
    let check_low = mode.is_emissive() && !mode.is_scan() && !mode.is_flash();
    for frame in frames {
        if frame.raw_peak >= limits.saturation {
            return Err(DeviceCode::RD_SENSORSATURATED);
        }
        if mode.is_emissive() && frame.raw_peak > limits.high {
            return Err(DeviceCode::RD_LIGHTTOOHIGH);
        }
        if check_low && frame.raw_peak < limits.low {
            return Err(DeviceCode::RD_LIGHTTOOLOW);
        }
    }
    Ok(())
}

fn mean_values<'a>(frames: impl IntoIterator<Item = &'a SensorFrame>) -> Vec<f64> {
    let mut sum: Vec<f64> = Vec::new();
    let mut n = 0usize;
    for frame in frames {
        if sum.is_empty() {
            sum = vec![0.0; frame.values.len()];
        }
        for (acc, v) in sum.iter_mut().zip(&frame.values) {
            *acc += v;
        }
        n += 1;
    }
    if n > 0 {
        sum.iter_mut().for_each(|v| *v /= n as f64);
    }
    sum
}

/// Average spot frames, rejecting inconsistent ones.
pub fn spot_value(frames: &[SensorFrame], consistency: f64) -> Result<Vec<f64>, DeviceCode> {
    if frames.is_empty() {
        return Err(DeviceCode::RD_SHORTMEAS);
    }
    let levels: Vec<f64> = frames.iter().map(SensorFrame::level).collect();
    let mean = levels.iter().sum::<f64>() / levels.len() as f64;
    let min = levels.iter().copied().fold(f64::INFINITY, f64::min);
    let max = levels.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if mean.abs() > f64::EPSILON && (max - min) / mean.abs() > consistency {
        return Err(DeviceCode::RD_READINCONS);
    }
    Ok(mean_values(frames))
}

/// Split a strip scan into `patch_count` patches.
///
/// Consecutive frames whose level changes by more than `tolerance`
/// (relative) belong to different segments. Segments shorter than
/// `min_samples` are transitions between patches, or patches the scan
/// passed over too quickly when they held steady for several frames.
pub fn segment_patches(
    frames: &[SensorFrame],
    patch_count: usize,
    tolerance: f64,
    min_samples: usize,
) -> Result<Vec<Vec<f64>>, DeviceCode> {
    let mut segments: Vec<&[SensorFrame]> = Vec::new();
    let mut start = 0;
    for i in 1..=frames.len() {
        let split = i == frames.len() || {
            let prev = frames[i - 1].level();
            let cur = frames[i].level();
            (cur - prev).abs() / prev.abs().max(f64::EPSILON) > tolerance
        };
        if split {
            segments.push(&frames[start..i]);
            start = i;
        }
    }

    let patches: Vec<&[SensorFrame]> = segments
        .iter()
        .copied()
        .filter(|s| s.len() >= min_samples)
        .collect();

    // Plateaus that held steady for more than one frame but not long enough
    let short_plateaus = segments
        .iter()
        .filter(|s| s.len() >= 2 && s.len() < min_samples)
        .count();

    if patches.len() < patch_count {
        return Err(if patches.len() + short_plateaus >= patch_count {
            DeviceCode::RD_NOTENOUGHSAMPLES
        } else {
            DeviceCode::RD_NOTENOUGHPATCHES
        });
    }
    if patches.len() > patch_count {
        return Err(DeviceCode::RD_TOOMANYPATCHES);
    }

    Ok(patches
        .into_iter()
        .map(|patch| {
            // Central half of the patch, away from the edges
            let trim = patch.len() / 4;
            mean_values(&patch[trim..patch.len() - trim])
        })
        .collect())
}

/// Extract the flash energy from an ambient flash capture.
pub fn extract_flash(frames: &[SensorFrame], threshold: f64) -> Result<Vec<f64>, DeviceCode> {
    let levels: Vec<f64> = frames.iter().map(SensorFrame::level).collect();
    let baseline = levels.iter().copied().fold(f64::INFINITY, f64::min);
    let peak = levels.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if levels.is_empty() || peak <= baseline * (1.0 + threshold) {
        return Err(DeviceCode::RD_NOFLASHES);
    }

    let cut = baseline + threshold * (peak - baseline);
    let is_flash: Vec<bool> = levels.iter().map(|l| *l > cut).collect();
    if is_flash[0] {
        return Err(DeviceCode::RD_NOAMBB4FLASHES);
    }

    let ambient = mean_values(frames.iter().zip(&is_flash).filter(|(_, f)| !**f).map(|(fr, _)| fr));
    let mut total = vec![0.0; ambient.len()];
    for frame in frames.iter().zip(&is_flash).filter(|(_, f)| **f).map(|(fr, _)| fr) {
        for ((acc, v), a) in total.iter_mut().zip(&frame.values).zip(&ambient) {
            *acc += v - a;
        }
    }
    Ok(total)
}

/// Validate decoded frames and reduce them to one value set per patch.
///
/// Flash modes yield one value, scan modes `patch_count` values in scan
/// order, spot modes one averaged value.
pub fn evaluate(
    frames: &[SensorFrame],
    mode: DeviceMode,
    patch_count: usize,
    settings: &PipelineSettings,
) -> Result<Vec<Vec<f64>>, DeviceCode> {
    check_range(frames, &settings.limits, mode)?;
    if mode.is_flash() {
        Ok(vec![extract_flash(frames, settings.flash_threshold)?])
    } else if mode.is_scan() {
        segment_patches(
            frames,
            patch_count,
            settings.scan_tolerance,
            settings.min_patch_samples,
        )
    } else {
        Ok(vec![spot_value(frames, settings.spot_consistency)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(level: f64) -> SensorFrame {
        SensorFrame {
            raw_peak: 0.5,
            values: vec![level; 4],
        }
    }

    fn limits() -> SensorLimits {
        SensorLimits {
            saturation: 0.98,
            high: 0.9,
            low: 0.01,
        }
    }

    fn plan(variable: bool) -> AcquisitionPlan {
        AcquisitionPlan {
            mode: DeviceMode::ReflectiveSpot,
            frames: 4,
            frame_size: 72,
            variable,
            timeout: Duration::from_secs(1),
        }
    }

    /// Strip with `patches` plateaus of `len` frames, separated by 1-frame ramps.
    fn strip(patches: usize, len: usize) -> Vec<SensorFrame> {
        let mut frames = Vec::new();
        for p in 0..patches {
            let level = 0.1 + 0.08 * p as f64;
            if p > 0 {
                frames.push(frame(level - 0.04));
            }
            frames.extend((0..len).map(|_| frame(level)));
        }
        frames
    }

    #[test]
    fn alignment_rules() {
        assert_eq!(check_alignment(&plan(false), 73), Err(DeviceCode::HW_ME_ODDREAD));
        assert_eq!(check_alignment(&plan(false), 144), Err(DeviceCode::HW_ME_SHORTREAD));
        assert_eq!(check_alignment(&plan(false), 288), Ok(()));
        assert_eq!(check_alignment(&plan(true), 0), Err(DeviceCode::RD_SHORTMEAS));
        assert_eq!(check_alignment(&plan(true), 144), Ok(()));
    }

    #[test]
    fn range_rules_depend_on_mode() {
        let dim = SensorFrame {
            raw_peak: 0.001,
            values: vec![0.0],
        };
        let bright = SensorFrame {
            raw_peak: 0.95,
            values: vec![0.0],
        };
        let saturated = SensorFrame {
            raw_peak: 0.99,
            values: vec![0.0],
        };

        assert_eq!(
            check_range(&[saturated.clone()], &limits(), DeviceMode::ReflectiveSpot),
            Err(DeviceCode::RD_SENSORSATURATED)
        );
        assert_eq!(
            check_range(&[dim.clone()], &limits(), DeviceMode::ReflectiveSpot),
            Ok(())
        );
        assert_eq!(
            check_range(&[dim.clone()], &limits(), DeviceMode::EmissiveSpot),
            Err(DeviceCode::RD_LIGHTTOOLOW)
        );
        assert_eq!(
            check_range(&[dim], &limits(), DeviceMode::EmissiveScan),
            Ok(())
        );
        assert_eq!(
            check_range(&[bright], &limits(), DeviceMode::DisplaySpot),
            Err(DeviceCode::RD_LIGHTTOOHIGH)
        );
    }

    #[test]
    fn spot_consistency() {
        let steady = [frame(0.5), frame(0.501), frame(0.499)];
        let value = spot_value(&steady, 0.05).unwrap();
        assert!((value[0] - 0.5).abs() < 1e-9);

        let jumpy = [frame(0.5), frame(0.7)];
        assert_eq!(spot_value(&jumpy, 0.05), Err(DeviceCode::RD_READINCONS));
    }

    #[test]
    fn segments_match_requested_count() {
        let frames = strip(5, 6);
        let patches = segment_patches(&frames, 5, 0.05, 3).unwrap();
        assert_eq!(patches.len(), 5);
        assert!((patches[2][0] - 0.26).abs() < 1e-9);
    }

    #[test]
    fn too_few_and_too_many_patches() {
        let frames = strip(8, 6);
        assert_eq!(
            segment_patches(&frames, 10, 0.05, 3),
            Err(DeviceCode::RD_NOTENOUGHPATCHES)
        );
        assert_eq!(
            segment_patches(&frames, 6, 0.05, 3),
            Err(DeviceCode::RD_TOOMANYPATCHES)
        );
    }

    #[test]
    fn short_plateaus_are_not_enough_samples() {
        // Four plateaus, but the last two are only two frames long
        let mut frames = strip(2, 6);
        frames.extend([frame(0.5), frame(0.5), frame(0.8), frame(0.8)]);
        assert_eq!(
            segment_patches(&frames, 4, 0.05, 3),
            Err(DeviceCode::RD_NOTENOUGHSAMPLES)
        );
    }

    #[test]
    fn flash_extraction() {
        let mut frames = vec![frame(0.1); 10];
        frames[4] = frame(0.9);
        frames[5] = frame(0.5);
        let value = extract_flash(&frames, 0.3).unwrap();
        assert!((value[0] - (0.8 + 0.4)).abs() < 1e-9);

        assert_eq!(
            extract_flash(&vec![frame(0.1); 10], 0.3),
            Err(DeviceCode::RD_NOFLASHES)
        );

        let mut early = vec![frame(0.1); 10];
        early[0] = frame(0.9);
        assert_eq!(extract_flash(&early, 0.3), Err(DeviceCode::RD_NOAMBB4FLASHES));
    }

    #[test]
    fn evaluate_dispatches_on_mode() {
        let settings = PipelineSettings {
            limits: limits(),
            spot_consistency: 0.05,
            scan_tolerance: 0.05,
            min_patch_samples: 3,
            flash_threshold: 0.3,
        };

        let spot = evaluate(&[frame(0.4), frame(0.4)], DeviceMode::ReflectiveSpot, 1, &settings)
            .unwrap();
        assert_eq!(spot.len(), 1);

        let scan = evaluate(&strip(3, 5), DeviceMode::ReflectiveScan, 3, &settings).unwrap();
        assert_eq!(scan.len(), 3);

        let saturated = SensorFrame {
            raw_peak: 1.0,
            values: vec![0.4; 4],
        };
        assert_eq!(
            evaluate(&[saturated], DeviceMode::ReflectiveSpot, 1, &settings),
            Err(DeviceCode::RD_SENSORSATURATED)
        );
    }
}
