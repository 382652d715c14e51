// ================================
// src/pose.rs - pose and velocity value types
// ================================

/// Planar pose: position plus heading in radians.
///
/// Producers keep `theta` in (-π, π]; consumers do not re-check it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Pose2D {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }

    /// Euclidean distance between the two positions, heading ignored.
    pub fn distance_to(&self, other: &Pose2D) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// Unicycle velocity command sent on an agent's command feed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityCommand {
    pub linear: f64,
    pub angular: f64,
}

impl VelocityCommand {
    pub fn new(linear: f64, angular: f64) -> Self {
        Self { linear, angular }
    }

    pub fn stop() -> Self {
        Self::default()
    }

    pub fn is_stop(&self) -> bool {
        self.linear == 0.0 && self.angular == 0.0
    }
}
