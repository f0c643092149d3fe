//! Physics body control surface and the rigid-body integrator behind it

use glam::Vec3;

use super::math::Rotator;

/// Default downward gravity (units/s²)
pub const DEFAULT_GRAVITY_Z: f32 = -980.0;

/// The body-control interface the movement reconciler drives
///
/// Forces and torques are acceleration changes (mass-independent), applied
/// over the next integration step.
pub trait PhysicsBody {
    fn linear_velocity(&self) -> Vec3;
    fn set_linear_velocity(&mut self, velocity: Vec3);
    fn add_force(&mut self, force: Vec3);

    /// Angular velocity in degrees per second (roll, pitch, yaw rates)
    fn angular_velocity(&self) -> Vec3;
    fn set_angular_velocity(&mut self, velocity: Vec3);
    fn add_torque(&mut self, torque: Vec3);

    fn location(&self) -> Vec3;
    fn set_location(&mut self, location: Vec3);
    fn rotation(&self) -> Rotator;
    fn set_rotation(&mut self, rotation: Rotator);
}

/// Minimal semi-implicit Euler body used by vehicles on both client and server
#[derive(Debug, Clone)]
pub struct RigidBody {
    location: Vec3,
    rotation: Rotator,
    velocity: Vec3,
    angular_velocity: Vec3,
    pending_force: Vec3,
    pending_torque: Vec3,
    gravity_z: f32,
}

impl RigidBody {
    pub fn new(location: Vec3, rotation: Rotator) -> Self {
        Self {
            location,
            rotation,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            pending_force: Vec3::ZERO,
            pending_torque: Vec3::ZERO,
            gravity_z: DEFAULT_GRAVITY_Z,
        }
    }

    pub fn with_gravity(mut self, gravity_z: f32) -> Self {
        self.gravity_z = gravity_z;
        self
    }

    /// Advance the body by `dt` seconds, consuming accumulated forces
    pub fn integrate(&mut self, dt: f32) {
        let acceleration = self.pending_force + Vec3::new(0.0, 0.0, self.gravity_z);
        self.velocity += acceleration * dt;
        self.location += self.velocity * dt;

        self.angular_velocity += self.pending_torque * dt;
        self.rotation = self.rotation.integrate(self.angular_velocity, dt);

        self.pending_force = Vec3::ZERO;
        self.pending_torque = Vec3::ZERO;
    }
}

impl PhysicsBody for RigidBody {
    fn linear_velocity(&self) -> Vec3 {
        self.velocity
    }

    fn set_linear_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }

    fn add_force(&mut self, force: Vec3) {
        self.pending_force += force;
    }

    fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    fn set_angular_velocity(&mut self, velocity: Vec3) {
        self.angular_velocity = velocity;
    }

    fn add_torque(&mut self, torque: Vec3) {
        self.pending_torque += torque;
    }

    fn location(&self) -> Vec3 {
        self.location
    }

    fn set_location(&mut self, location: Vec3) {
        self.location = location;
    }

    fn rotation(&self) -> Rotator {
        self.rotation
    }

    fn set_rotation(&mut self, rotation: Rotator) {
        self.rotation = rotation;
    }
}

/// Check whether two spheres overlap
pub fn spheres_overlap(a: Vec3, radius_a: f32, b: Vec3, radius_b: f32) -> bool {
    let combined = radius_a + radius_b;
    a.distance_squared(b) <= combined * combined
}
