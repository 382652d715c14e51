// ================================
// src/config.rs - controller presets and chain parameters
// ================================
use serde::Deserialize;
use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{error::ChainError, node::SpawnPolicy, node::SpawnRegion, pose::Pose2D};

pub const DEFAULT_CONFIG_PATH: &str = "./chain_param.toml";

/// Proportional gains and stop radius for one agent.
///
/// Only constructible through [`ControllerConfig::new`], so every value is
/// known to be positive and finite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerConfig {
    linear_gain: f64,
    angular_gain: f64,
    arrival_radius: f64,
}

impl ControllerConfig {
    pub fn new(linear_gain: f64, angular_gain: f64, arrival_radius: f64) -> Result<Self, ChainError> {
        if !is_positive(linear_gain) {
            return Err(ChainError::InvalidGain {
                name: "linear_gain",
                value: linear_gain,
            });
        }
        if !is_positive(angular_gain) {
            return Err(ChainError::InvalidGain {
                name: "angular_gain",
                value: angular_gain,
            });
        }
        if !is_positive(arrival_radius) {
            return Err(ChainError::InvalidArrivalRadius(arrival_radius));
        }

        Ok(Self {
            linear_gain,
            angular_gain,
            arrival_radius,
        })
    }

    /// Gains used by the agent heading for the fixed goal.
    pub fn leader() -> Self {
        Self {
            linear_gain: 1.5,
            angular_gain: 4.0,
            arrival_radius: 0.1,
        }
    }

    /// Gains used by every agent chasing a predecessor.
    pub fn follower() -> Self {
        Self {
            linear_gain: 1.2,
            angular_gain: 3.5,
            arrival_radius: 0.1,
        }
    }

    pub fn linear_gain(&self) -> f64 {
        self.linear_gain
    }

    pub fn angular_gain(&self) -> f64 {
        self.angular_gain
    }

    pub fn arrival_radius(&self) -> f64 {
        self.arrival_radius
    }
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Raw gain table as written in the TOML file.
#[derive(Deserialize, Debug, Clone, Copy)]
pub struct GainParams {
    pub linear_gain: f64,
    pub angular_gain: f64,
    pub arrival_radius: f64,
}

impl From<ControllerConfig> for GainParams {
    fn from(config: ControllerConfig) -> Self {
        Self {
            linear_gain: config.linear_gain,
            angular_gain: config.angular_gain,
            arrival_radius: config.arrival_radius,
        }
    }
}

impl TryFrom<GainParams> for ControllerConfig {
    type Error = ChainError;

    fn try_from(params: GainParams) -> Result<Self, Self::Error> {
        ControllerConfig::new(params.linear_gain, params.angular_gain, params.arrival_radius)
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct GoalParams {
    pub x: f64,
    pub y: f64,
}

impl Default for GoalParams {
    fn default() -> Self {
        Self { x: 10.5, y: 1.5 }
    }
}

/// Spawn region and the bounded wait on the placement service.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SpawnParams {
    pub min_coord: f64,
    pub max_coord: f64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for SpawnParams {
    fn default() -> Self {
        Self {
            min_coord: 2.0,
            max_coord: 10.0,
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            call_timeout_ms: 1_000,
        }
    }
}

impl SpawnParams {
    pub fn region(&self) -> Result<SpawnRegion, ChainError> {
        SpawnRegion::new(self.min_coord, self.max_coord)
    }

    pub fn policy(&self) -> SpawnPolicy {
        SpawnPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }
}

/// Simulator settings. Defaults mirror the turtle simulator the chain was
/// first driven against.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SimParams {
    pub rate_hz: f64,
    pub command_timeout_ms: u64,
    pub world_size: f64,
    pub initial_agent: String,
    pub initial_x: f64,
    pub initial_y: f64,
    pub initial_theta: f64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            rate_hz: 62.5,
            command_timeout_ms: 1_000,
            world_size: 11.088889,
            initial_agent: "turtle1".to_string(),
            initial_x: 5.544445,
            initial_y: 5.544445,
            initial_theta: 0.0,
        }
    }
}

impl SimParams {
    /// Reject rates and world sizes the tick loop cannot run with.
    pub fn validate(&self) -> Result<(), ChainError> {
        if !is_positive(self.rate_hz) {
            return Err(ChainError::InvalidSimParam {
                name: "rate_hz",
                value: self.rate_hz,
            });
        }
        if !is_positive(self.world_size) {
            return Err(ChainError::InvalidSimParam {
                name: "world_size",
                value: self.world_size,
            });
        }
        Ok(())
    }

    /// Tick period. Only meaningful once [`validate`](Self::validate) passed.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn initial_pose(&self) -> Pose2D {
        Pose2D::new(self.initial_x, self.initial_y, self.initial_theta)
    }
}

/// Everything the process needs, loaded from `chain_param.toml`.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ChainParams {
    pub log_level: String,
    pub seed: Option<u64>,
    pub agents: Vec<String>,
    pub goal: GoalParams,
    pub leader: GainParams,
    pub follower: GainParams,
    pub spawn: SpawnParams,
    pub sim: SimParams,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            seed: None,
            agents: vec![
                "turtle1".to_string(),
                "turtle2".to_string(),
                "turtle3".to_string(),
            ],
            goal: GoalParams::default(),
            leader: ControllerConfig::leader().into(),
            follower: ControllerConfig::follower().into(),
            spawn: SpawnParams::default(),
            sim: SimParams::default(),
        }
    }
}

impl ChainParams {
    /// Load parameters from an explicit path, else `CONFIG_PATH`, else
    /// `./chain_param.toml`. Only the implicit default file may be absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ChainError> {
        let requested = explicit
            .map(Path::to_path_buf)
            .or_else(|| env::var("CONFIG_PATH").ok().map(PathBuf::from));
        let required = requested.is_some();
        let path = requested.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        match fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if !required && e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ChainError::ConfigRead {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, ChainError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn leader_config(&self) -> Result<ControllerConfig, ChainError> {
        self.leader.try_into()
    }

    pub fn follower_config(&self) -> Result<ControllerConfig, ChainError> {
        self.follower.try_into()
    }

    pub fn goal_pose(&self) -> Pose2D {
        Pose2D::new(self.goal.x, self.goal.y, 0.0)
    }

    /// `turtle1..turtleN`, used when the agent count comes from the CLI.
    pub fn numbered_agents(count: usize) -> Vec<String> {
        (1..=count).map(|i| format!("turtle{i}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_documented_gains() {
        let leader = ControllerConfig::leader();
        assert_eq!(leader.linear_gain(), 1.5);
        assert_eq!(leader.angular_gain(), 4.0);

        let follower = ControllerConfig::follower();
        assert_eq!(follower.linear_gain(), 1.2);
        assert_eq!(follower.angular_gain(), 3.5);
    }

    #[test]
    fn rejects_non_positive_values() {
        assert!(matches!(
            ControllerConfig::new(0.0, 1.0, 0.1),
            Err(ChainError::InvalidGain { name: "linear_gain", .. })
        ));
        assert!(matches!(
            ControllerConfig::new(1.0, -3.0, 0.1),
            Err(ChainError::InvalidGain { name: "angular_gain", .. })
        ));
        assert!(matches!(
            ControllerConfig::new(1.0, 1.0, 0.0),
            Err(ChainError::InvalidArrivalRadius(_))
        ));
        assert!(ControllerConfig::new(f64::NAN, 1.0, 0.1).is_err());
        assert!(ControllerConfig::new(0.01, 100.0, 5.0).is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let params = ChainParams::from_toml(
            r#"
            agents = ["a", "b"]
            seed = 7

            [goal]
            x = 3.0
            y = 4.0

            [follower]
            linear_gain = 2.0
            angular_gain = 5.0
            arrival_radius = 0.2

            [spawn]
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(params.agents, vec!["a", "b"]);
        assert_eq!(params.seed, Some(7));
        assert_eq!(params.goal_pose(), Pose2D::new(3.0, 4.0, 0.0));
        assert_eq!(params.leader_config().unwrap(), ControllerConfig::leader());
        assert_eq!(params.follower_config().unwrap().linear_gain(), 2.0);
        assert_eq!(params.spawn.max_attempts, 3);
        assert_eq!(params.spawn.min_coord, 2.0);
        assert_eq!(params.sim.initial_agent, "turtle1");
    }

    #[test]
    fn invalid_gain_in_file_is_rejected_on_use() {
        let params = ChainParams::from_toml(
            r#"
            [leader]
            linear_gain = -1.0
            angular_gain = 4.0
            arrival_radius = 0.1
            "#,
        )
        .unwrap();
        assert!(params.leader_config().is_err());
    }

    #[test]
    fn sim_rate_and_world_size_must_be_positive() {
        assert!(SimParams::default().validate().is_ok());

        for rate in ["0.0", "-62.5", "inf", "nan"] {
            let params = ChainParams::from_toml(&format!("[sim]\nrate_hz = {rate}\n")).unwrap();
            assert!(matches!(
                params.sim.validate(),
                Err(ChainError::InvalidSimParam { name: "rate_hz", .. })
            ));
        }

        let params = ChainParams::from_toml("[sim]\nworld_size = -1.0\n").unwrap();
        assert!(matches!(
            params.sim.validate(),
            Err(ChainError::InvalidSimParam { name: "world_size", .. })
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            ChainParams::from_toml("agents = 3"),
            Err(ChainError::ConfigParse(_))
        ));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = ChainParams::load(Some(Path::new("/nonexistent/chain_param.toml"))).unwrap_err();
        assert!(matches!(err, ChainError::ConfigRead { .. }));
    }

    #[test]
    fn numbered_agents_start_at_one() {
        assert_eq!(
            ChainParams::numbered_agents(3),
            vec!["turtle1", "turtle2", "turtle3"]
        );
        assert!(ChainParams::numbered_agents(0).is_empty());
    }
}
