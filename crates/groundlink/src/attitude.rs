//! Board attitude from the accelerometer channels of an analog sample.
//!
//! Channels 0..3 carry the accelerometer x, y and z axes and channels 3..6
//! the gyroscope, all as 12-bit ADC counts against a 3.3 V reference.

use std::path::Path;

use groundlink_frame::AnalogData;
use serde::{Deserialize, Serialize};

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID};

const ADC_REFERENCE_MV: f64 = 3300.0;
const ADC_FULL_SCALE: f64 = 4096.0;

const ACC_CHANNELS: [usize; 3] = [0, 1, 2];
const GYRO_CHANNELS: [usize; 3] = [3, 4, 5];

/// Sensor calibration, in millivolts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// Accelerometer output at zero g, per axis.
    pub acc_zero_mv: [f64; 3],
    /// Accelerometer swing for one g.
    pub acc_one_g_mv: f64,
    /// Gyroscope output at rest, per axis.
    pub gyro_zero_mv: [f64; 3],
    pub gyro_mv_per_dps: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            acc_zero_mv: [1650.0; 3],
            acc_one_g_mv: 800.0,
            gyro_zero_mv: [1800.0; 3],
            gyro_mv_per_dps: 6.7,
        }
    }
}

impl Calibration {
    /// Read a JSON calibration file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        let calibration: Calibration = serde_json::from_str(&text).map_err(|err| {
            CliError::new(
                DATA_INVALID,
                format!("invalid calibration {}: {err}", path.display()),
            )
        })?;
        calibration.validate()?;
        Ok(calibration)
    }

    fn validate(&self) -> CliResult<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.acc_one_g_mv) || !positive(self.gyro_mv_per_dps) {
            return Err(CliError::new(
                DATA_INVALID,
                "calibration scale factors must be positive",
            ));
        }
        Ok(())
    }
}

/// One attitude estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Attitude {
    pub roll_deg: f64,
    pub pitch_deg: f64,
    /// Acceleration per axis, in g.
    pub acc_g: [f64; 3],
    /// Angular rate per axis, when the sample carries gyroscope channels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gyro_dps: Option<[f64; 3]>,
}

#[derive(Debug, Clone, Default)]
pub struct AttitudeEstimator {
    calibration: Calibration,
}

impl AttitudeEstimator {
    pub fn new(calibration: Calibration) -> Self {
        Self { calibration }
    }

    /// Estimate roll and pitch from one sample.
    ///
    /// Returns `None` for samples with fewer than three channels.
    pub fn update(&self, sample: &AnalogData) -> Option<Attitude> {
        let cal = &self.calibration;
        let acc = read_mv(sample, ACC_CHANNELS)?;

        let ax = (acc[0] - cal.acc_zero_mv[0]) / cal.acc_one_g_mv;
        let ay = (acc[1] - cal.acc_zero_mv[1]) / cal.acc_one_g_mv;
        // At rest the z axis reads one g.
        let az = (acc[2] - cal.acc_zero_mv[2] + cal.acc_one_g_mv) / cal.acc_one_g_mv;

        let gyro_dps = read_mv(sample, GYRO_CHANNELS).map(|mv| {
            [0, 1, 2].map(|axis| (mv[axis] - cal.gyro_zero_mv[axis]) / cal.gyro_mv_per_dps)
        });

        Some(Attitude {
            roll_deg: ay.atan2(az).to_degrees(),
            pitch_deg: ax.atan2((ay * ay + az * az).sqrt()).to_degrees(),
            acc_g: [ax, ay, az],
            gyro_dps,
        })
    }
}

fn read_mv(sample: &AnalogData, channels: [usize; 3]) -> Option<[f64; 3]> {
    let mut mv = [0.0; 3];
    for (slot, channel) in mv.iter_mut().zip(channels) {
        *slot = counts_to_mv(sample.channel(channel)?);
    }
    Some(mv)
}

fn counts_to_mv(counts: i16) -> f64 {
    f64::from(counts) * ADC_REFERENCE_MV / ADC_FULL_SCALE
}
