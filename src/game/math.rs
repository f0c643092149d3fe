//! Rotation type and small vector helpers shared by movement and projectiles

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Euler rotation in degrees (pitch around Y, yaw around Z, roll around X)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rotator {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl Rotator {
    pub const ZERO: Rotator = Rotator {
        pitch: 0.0,
        yaw: 0.0,
        roll: 0.0,
    };

    pub fn new(pitch: f32, yaw: f32, roll: f32) -> Self {
        Self { pitch, yaw, roll }
    }

    /// Unit vector this rotation points along (X forward, Z up)
    pub fn forward(&self) -> Vec3 {
        let (sp, cp) = self.pitch.to_radians().sin_cos();
        let (sy, cy) = self.yaw.to_radians().sin_cos();
        Vec3::new(cp * cy, cp * sy, sp)
    }

    /// Unit vector pointing up relative to this rotation (ignores roll)
    pub fn up(&self) -> Vec3 {
        let (sp, cp) = self.pitch.to_radians().sin_cos();
        let (sy, cy) = self.yaw.to_radians().sin_cos();
        Vec3::new(-sp * cy, -sp * sy, cp)
    }

    /// Rotation whose forward vector points along `direction` (no roll)
    pub fn from_direction(direction: Vec3) -> Self {
        let dir = direction.normalize_or_zero();
        if dir == Vec3::ZERO {
            return Self::ZERO;
        }
        Self {
            pitch: dir.z.clamp(-1.0, 1.0).asin().to_degrees(),
            yaw: dir.y.atan2(dir.x).to_degrees(),
            roll: 0.0,
        }
    }

    /// Rotate each axis by `rate` degrees per second over `dt`
    pub fn integrate(&self, rate: Vec3, dt: f32) -> Self {
        Self {
            roll: normalize_axis(self.roll + rate.x * dt),
            pitch: normalize_axis(self.pitch + rate.y * dt),
            yaw: normalize_axis(self.yaw + rate.z * dt),
        }
    }

    /// Move `alpha` of the way towards `target` along the shortest arc per axis
    pub fn lerp_towards(&self, target: &Rotator, alpha: f32) -> Self {
        Self {
            pitch: normalize_axis(self.pitch + angle_delta(self.pitch, target.pitch) * alpha),
            yaw: normalize_axis(self.yaw + angle_delta(self.yaw, target.yaw) * alpha),
            roll: normalize_axis(self.roll + angle_delta(self.roll, target.roll) * alpha),
        }
    }

    /// Largest per-axis angular difference to `other`, in degrees
    pub fn max_axis_difference(&self, other: &Rotator) -> f32 {
        angle_delta(self.pitch, other.pitch)
            .abs()
            .max(angle_delta(self.yaw, other.yaw).abs())
            .max(angle_delta(self.roll, other.roll).abs())
    }
}

/// Wrap an angle into (-180, 180]
pub fn normalize_axis(angle: f32) -> f32 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}

/// Signed shortest difference `to - from` in degrees
pub fn angle_delta(from: f32, to: f32) -> f32 {
    normalize_axis(to - from)
}

/// Fraction of the remaining distance covered by exponential smoothing at
/// `rate` per second over `dt`
pub fn smoothing_alpha(rate: f32, dt: f32) -> f32 {
    if dt <= 0.0 {
        return 0.0;
    }
    (1.0 - (-rate * dt).exp()).clamp(0.0, 1.0)
}

/// Per-axis boolean mask for velocity overrides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisMask {
    pub x: bool,
    pub y: bool,
    pub z: bool,
}

impl AxisMask {
    pub const NONE: AxisMask = AxisMask {
        x: false,
        y: false,
        z: false,
    };

    pub fn any(&self) -> bool {
        self.x || self.y || self.z
    }

    /// Take masked components from `overrides`, the rest from `current`
    pub fn select(&self, overrides: Vec3, current: Vec3) -> Vec3 {
        Vec3::new(
            if self.x { overrides.x } else { current.x },
            if self.y { overrides.y } else { current.y },
            if self.z { overrides.z } else { current.z },
        )
    }
}
