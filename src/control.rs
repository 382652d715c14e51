// ================================
// src/control.rs - proportional pursuit control law
// ================================
use std::f64::consts::PI;

use crate::{
    config::ControllerConfig,
    pose::{Pose2D, VelocityCommand},
};

/// Proportional pursuit toward a target pose.
///
/// The law is stateless: linear speed grows with distance and turn rate with
/// heading error, and everything inside the arrival radius is a full stop.
/// There is no integral term, so no windup and no steady-state correction.
#[derive(Debug, Clone, Copy)]
pub struct PursuitController {
    config: ControllerConfig,
}

impl PursuitController {
    pub fn new(config: ControllerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Velocity command that drives `current` toward `target`.
    pub fn compute(&self, current: Pose2D, target: Pose2D) -> VelocityCommand {
        Self::command(current, target, &self.config)
    }

    /// Same as [`compute`](Self::compute) with an explicit config.
    pub fn command(current: Pose2D, target: Pose2D, config: &ControllerConfig) -> VelocityCommand {
        let dx = target.x - current.x;
        let dy = target.y - current.y;
        let distance = (dx * dx + dy * dy).sqrt();

        if distance <= config.arrival_radius() {
            return VelocityCommand::stop();
        }

        let bearing = dy.atan2(dx);
        let heading_error = wrap_heading_error(bearing - current.theta);

        VelocityCommand {
            linear: config.linear_gain() * distance,
            angular: config.angular_gain() * heading_error,
        }
    }
}

/// Pull a heading error back toward (-π, π] with a single ±2π step.
///
/// Inputs further than 3π out stay out of range after the step.
pub fn wrap_heading_error(error: f64) -> f64 {
    if error > PI {
        error - 2.0 * PI
    } else if error < -PI {
        error + 2.0 * PI
    } else {
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn leader() -> PursuitController {
        PursuitController::new(ControllerConfig::leader())
    }

    #[test]
    fn diagonal_target_from_origin() {
        let cmd = leader().compute(Pose2D::new(0.0, 0.0, 0.0), Pose2D::new(3.0, 4.0, 0.0));

        assert_relative_eq!(cmd.linear, 7.5, epsilon = 1e-12);
        assert_relative_eq!(cmd.angular, 4.0 * (4.0f64).atan2(3.0), epsilon = 1e-12);
        assert_relative_eq!(cmd.angular, 3.709, epsilon = 1e-3);
    }

    #[test]
    fn moves_when_outside_wider_radius() {
        let config = ControllerConfig::new(1.5, 4.0, 0.5).unwrap();
        let current = Pose2D::new(9.0, 1.0, 0.0);
        let goal = Pose2D::new(10.5, 1.5, 0.0);

        let cmd = PursuitController::command(current, goal, &config);

        assert_relative_eq!(cmd.linear, 1.5 * (2.5f64).sqrt(), epsilon = 1e-12);
        assert!(cmd.angular > 0.0);
        assert!(!cmd.is_stop());
    }

    #[test]
    fn stops_inside_arrival_radius() {
        let cmd = leader().compute(Pose2D::new(10.45, 1.48, 0.0), Pose2D::new(10.5, 1.5, 0.0));
        assert_eq!(cmd, VelocityCommand::stop());
    }

    #[test]
    fn stop_ignores_heading_error() {
        let controller = leader();
        let target = Pose2D::new(1.0, 1.0, 0.0);
        for theta in [-3.0, -1.5, 0.0, 1.5, 3.1] {
            let current = Pose2D::new(1.05, 0.95, theta);
            assert_eq!(controller.compute(current, target), VelocityCommand::stop());
        }
    }

    #[test]
    fn exactly_on_radius_is_arrived() {
        let config = ControllerConfig::new(1.0, 1.0, 1.0).unwrap();
        let cmd = PursuitController::command(
            Pose2D::new(0.0, 0.0, 0.0),
            Pose2D::new(1.0, 0.0, 0.0),
            &config,
        );
        assert!(cmd.is_stop());
    }

    #[test]
    fn linear_speed_grows_with_distance() {
        let controller = leader();
        let current = Pose2D::new(0.0, 0.0, 0.3);
        let mut previous = 0.0;
        for step in 1..50 {
            let distance = 0.2 * step as f64;
            let cmd = controller.compute(current, Pose2D::new(distance, 0.0, 0.0));
            assert_relative_eq!(cmd.linear, 1.5 * distance, epsilon = 1e-12);
            assert!(cmd.linear > previous);
            previous = cmd.linear;
        }
    }

    #[test]
    fn turn_direction_follows_heading_error() {
        let mut rng = StdRng::seed_from_u64(11);
        let controller = PursuitController::new(ControllerConfig::follower());

        for _ in 0..2_000 {
            let current = Pose2D::new(
                rng.random_range(0.0..11.0),
                rng.random_range(0.0..11.0),
                rng.random_range(-PI..PI),
            );
            let target = Pose2D::new(rng.random_range(0.0..11.0), rng.random_range(0.0..11.0), 0.0);
            if current.distance_to(&target) <= 0.1 {
                continue;
            }

            let bearing = (target.y - current.y).atan2(target.x - current.x);
            let error = wrap_heading_error(bearing - current.theta);
            let cmd = controller.compute(current, target);

            assert_eq!(cmd.angular.signum(), (3.5 * error).signum());
            assert_relative_eq!(cmd.angular, 3.5 * error, epsilon = 1e-12);
        }
    }

    #[test]
    fn wrapped_error_stays_in_half_open_range() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..10_000 {
            // atan2 is in [-π, π] and producer headings in (-π, π]
            let bearing = rng.random_range(-PI..=PI);
            let heading = rng.random_range(-PI..=PI);
            let error = wrap_heading_error(bearing - heading);
            assert!(error > -PI - 1e-12 && error <= PI, "error {error} out of range");
        }
    }

    #[test]
    fn wrap_applies_one_correction_only() {
        assert_relative_eq!(wrap_heading_error(1.5 * PI), -0.5 * PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_heading_error(-1.5 * PI), 0.5 * PI, epsilon = 1e-12);
        assert_eq!(wrap_heading_error(PI), PI);
        assert_relative_eq!(wrap_heading_error(3.5 * PI), 1.5 * PI, epsilon = 1e-12);
    }

    #[test]
    fn identical_inputs_give_identical_outputs() {
        let controller = leader();
        let current = Pose2D::new(2.0, 7.0, -2.5);
        let target = Pose2D::new(8.0, 1.0, 0.4);
        let first = controller.compute(current, target);
        let second = controller.compute(current, target);
        assert_eq!(first, second);
    }
}
