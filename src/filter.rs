use crate::protocol::BOARD_AIR_4_PRO;
use crate::types::SensorSample;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use std::time::Instant;

const DEG_TO_RAD: f32 = std::f32::consts::PI / 180.0;
const GRAVITY_MPS2: f32 = 9.81;

/// Complementary-filter gain applied to the accelerometer tilt correction.
const ACCEL_GAIN: f32 = 1.5;
/// Stillness thresholds: accel magnitude within this of gravity, and gyro
/// magnitude below this, counts as stationary.
const STATIONARY_ACCEL_TOL: f32 = 1.25;
const STATIONARY_GYRO_RAD_S: f32 = 0.18;
/// Low-pass rate for the gyro bias estimate while stationary.
const GYRO_BIAS_UPDATE_HZ: f32 = 0.5;

/// Delta-time clamp and fallback. Ticks outside [1 ms, 100 ms] are startup
/// glitches or paused delivery, not real sample spacing.
const DT_MIN_S: f32 = 0.001;
const DT_MAX_S: f32 = 0.1;
const DT_DEFAULT_S: f32 = 0.01;

/// IMU mounting rotation (degrees about X) for a given board.
///
/// Compensates IMU-to-device-frame misalignment; extend the table here when
/// new boards appear, the integration logic never changes.
pub fn mounting_rotation_x_deg(board_id: u8) -> f32 {
    match board_id {
        BOARD_AIR_4_PRO => -20.0,
        _ => 0.0,
    }
}

/// Complementary filter fusing gyro integration with accelerometer-derived
/// tilt correction and stillness-gated gyro bias estimation.
///
/// One [`update`](Self::update) call per decoded sensor sample; the output
/// quaternion is always unit length (degenerate states normalize to
/// identity).
pub struct OrientationFilter {
    mount: UnitQuaternion<f32>,
    world_up: Vector3<f32>,
    accel_gain: f32,
    q: UnitQuaternion<f32>,
    gyro_bias: Vector3<f32>,
    last_tick_100us: Option<u32>,
    last_instant: Option<Instant>,
}

impl OrientationFilter {
    pub fn new(board_id: u8) -> Self {
        let mount = UnitQuaternion::from_axis_angle(
            &Vector3::x_axis(),
            mounting_rotation_x_deg(board_id) * DEG_TO_RAD,
        );
        Self {
            mount,
            world_up: Vector3::y(),
            accel_gain: ACCEL_GAIN,
            q: UnitQuaternion::identity(),
            gyro_bias: Vector3::zeros(),
            last_tick_100us: None,
            last_instant: None,
        }
    }

    /// Current orientation as [w, x, y, z].
    pub fn quaternion_wxyz(&self) -> [f32; 4] {
        [self.q.w, self.q.i, self.q.j, self.q.k]
    }

    /// Fuse one sample into the orientation estimate.
    pub fn update(&mut self, sample: &SensorSample) -> UnitQuaternion<f32> {
        let mut accel = Vector3::from(sample.accel_mps2);
        let mut gyro = Vector3::from(sample.gyro_dps) * DEG_TO_RAD;

        // IMU frame -> device frame.
        accel = self.mount.transform_vector(&accel);
        gyro = self.mount.transform_vector(&gyro);

        let dt = self.delta_time(sample.device_tick_100us);

        // Gyro bias: track toward the current reading while stationary, at a
        // rate independent of sample frequency.
        let accel_norm = accel.norm();
        let stationary = (accel_norm - GRAVITY_MPS2).abs() < STATIONARY_ACCEL_TOL
            && gyro.norm() < STATIONARY_GYRO_RAD_S;
        if stationary {
            let alpha = (dt * GYRO_BIAS_UPDATE_HZ).min(1.0);
            self.gyro_bias = self.gyro_bias * (1.0 - alpha) + gyro * alpha;
        }
        gyro -= self.gyro_bias;

        // Small-angle tilt correction folded into the angular rate: steer the
        // predicted up direction toward the measured one.
        if accel_norm > 1e-3 {
            let measured_up = accel / accel_norm;
            let predicted_up = self.q.inverse_transform_vector(&self.world_up);
            gyro += predicted_up.cross(&measured_up) * self.accel_gain;
        }

        self.q = integrate(self.q, gyro, dt);
        self.q
    }

    /// Delta-time between samples: device tick difference when it advanced,
    /// wall clock otherwise, clamped to a sane range.
    fn delta_time(&mut self, tick_100us: u32) -> f32 {
        let now = Instant::now();
        let mut dt = DT_DEFAULT_S;
        match self.last_tick_100us {
            Some(last) if tick_100us > last => {
                dt = (tick_100us - last) as f32 * 1e-4;
            }
            _ => {
                if let Some(last) = self.last_instant {
                    dt = now.duration_since(last).as_secs_f32();
                }
            }
        }
        if !(DT_MIN_S..=DT_MAX_S).contains(&dt) {
            dt = DT_DEFAULT_S;
        }
        self.last_tick_100us = Some(tick_100us);
        self.last_instant = Some(now);
        dt
    }
}

/// Advance `q` by the exact quaternion derivative q' = ½·q·ω over `dt`,
/// then renormalize. Near-zero results collapse to identity instead of NaN.
fn integrate(q: UnitQuaternion<f32>, omega: Vector3<f32>, dt: f32) -> UnitQuaternion<f32> {
    let omega_q = Quaternion::new(0.0, omega.x, omega.y, omega.z);
    let q_dot = q.into_inner() * omega_q * 0.5;
    let next = q.into_inner() + q_dot * dt;
    if next.norm() < 1e-6 {
        UnitQuaternion::identity()
    } else {
        UnitQuaternion::from_quaternion(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(accel: [f32; 3], gyro_dps: [f32; 3], tick: u32) -> SensorSample {
        SensorSample {
            accel_mps2: accel,
            gyro_dps,
            temperature_c: 25.0,
            magnet: [0.0; 3],
            proximity: 0.0,
            light: 0.0,
            device_tick_100us: tick,
        }
    }

    #[test]
    fn output_stays_unit_norm() {
        let mut filter = OrientationFilter::new(0);
        let mut tick = 1000;
        for i in 0..500 {
            let gyro = [(i % 7) as f32 * 13.0, -(i % 5) as f32 * 9.0, (i % 3) as f32 * 21.0];
            let accel = [0.3, 9.5 + (i % 4) as f32 * 0.2, -0.4];
            let q = filter.update(&sample(accel, gyro, tick));
            let n = q.into_inner().norm();
            assert!((n - 1.0).abs() < 1e-4, "norm diverged at step {}: {}", i, n);
            tick += 100;
        }
    }

    #[test]
    fn gravity_only_input_keeps_identity() {
        let mut filter = OrientationFilter::new(0);
        let mut tick = 500;
        for _ in 0..200 {
            let q = filter.update(&sample([0.0, GRAVITY_MPS2, 0.0], [0.0; 3], tick));
            assert!((q.w - 1.0).abs() < 1e-5);
            assert!(q.i.abs() < 1e-5 && q.j.abs() < 1e-5 && q.k.abs() < 1e-5);
            tick += 100;
        }
        assert!(filter.gyro_bias.norm() < 1e-6);
    }

    #[test]
    fn constant_rate_matches_closed_form_rotation() {
        let mut filter = OrientationFilter::new(0);
        filter.accel_gain = 0.0;
        // 90 deg/s about X for 1 s at 100 Hz (ticks advance 10 ms each).
        // Zero accel keeps the tilt correction degenerate as well.
        let mut tick = 100;
        let mut q = UnitQuaternion::identity();
        for _ in 0..100 {
            q = filter.update(&sample([0.0; 3], [90.0, 0.0, 0.0], tick));
            tick += 100;
        }
        let expected =
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f32::consts::FRAC_PI_2);
        assert!(
            q.angle_to(&expected) < 1e-3,
            "integrated {:?} vs closed form {:?}",
            q,
            expected
        );
    }

    #[test]
    fn stillness_bias_estimate_stops_slow_yaw_drift() {
        let mut filter = OrientationFilter::new(0);
        // A small constant gyro offset about the up axis, at rest. The up
        // axis makes the tilt correction inert, so only the bias estimator
        // can stop the drift.
        let offset_dps = 2.5;
        let mut tick = 0;
        let mut prev = UnitQuaternion::identity();
        let mut last_step = 0.0f32;
        for i in 0..3000 {
            let q = filter.update(&sample([0.0, GRAVITY_MPS2, 0.0], [0.0, offset_dps, 0.0], tick));
            if i >= 2999 {
                last_step = prev.angle_to(&q);
            }
            prev = q;
            tick += 100;
        }
        // 2.5 deg/s over 10 ms would be ~4.4e-4 rad/step unbiased; after 30 s
        // of stillness the residual per-step drift must be far smaller.
        assert!(last_step < 5e-5, "residual drift {} rad/step", last_step);
    }

    #[test]
    fn mounting_rotation_table() {
        assert_eq!(mounting_rotation_x_deg(BOARD_AIR_4_PRO), -20.0);
        assert_eq!(mounting_rotation_x_deg(0x00), 0.0);
    }

    #[test]
    fn degenerate_quaternion_normalizes_to_identity() {
        let q = integrate(UnitQuaternion::identity(), Vector3::zeros(), 0.01);
        assert_eq!(q, UnitQuaternion::identity());
    }
}
