// ================================
// src/node.rs - one agent: feeds in, commands out
// ================================
use rand::Rng;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::{
    config::ControllerConfig,
    control::PursuitController,
    error::ChainError,
    pose::{Pose2D, VelocityCommand},
    slot::LeaderSlot,
    transport::{CommandSink, PlacementService, SpawnRequest, SPAWN_SERVICE},
};

/// Name of an agent; also the prefix of its feeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Where an agent steers.
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    /// Head of the chain, heading for a fixed world-space goal.
    Primary { goal: Pose2D },
    /// Chases the live pose of `leader`.
    Follower { leader: AgentId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    AwaitingLeader,
    Tracking,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpawnOutcome {
    /// The primary agent exists before the chain is built.
    NotRequired,
    Spawned(SpawnRequest),
    AlreadyRequested,
}

/// Square area spawn coordinates are drawn from, `[min, max)` on both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnRegion {
    min: f64,
    max: f64,
}

impl SpawnRegion {
    pub fn new(min: f64, max: f64) -> Result<Self, ChainError> {
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(ChainError::InvalidSpawnRegion { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> (f64, f64) {
        (
            rng.random_range(self.min..self.max),
            rng.random_range(self.min..self.max),
        )
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        (self.min..self.max).contains(&x) && (self.min..self.max).contains(&y)
    }
}

impl Default for SpawnRegion {
    fn default() -> Self {
        Self { min: 2.0, max: 10.0 }
    }
}

/// Bounded wait on the placement service: capped exponential backoff between
/// availability probes and a timeout on every call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl Default for SpawnPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            call_timeout: Duration::from_secs(1),
        }
    }
}

impl SpawnPolicy {
    fn next_backoff(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_backoff)
    }
}

pub struct AgentNode {
    id: AgentId,
    role: Role,
    controller: PursuitController,
    leader_pose: LeaderSlot,
    spawn_requested: AtomicBool,
    dormant: AtomicBool,
    command_sink: Arc<dyn CommandSink>,
}

impl fmt::Debug for AgentNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentNode")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("phase", &self.phase())
            .finish()
    }
}

impl AgentNode {
    pub fn new(
        id: AgentId,
        role: Role,
        config: ControllerConfig,
        command_sink: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            id,
            role,
            controller: PursuitController::new(config),
            leader_pose: LeaderSlot::new(),
            spawn_requested: AtomicBool::new(false),
            dormant: AtomicBool::new(false),
            command_sink,
        }
    }

    pub fn primary(
        id: AgentId,
        goal: Pose2D,
        config: ControllerConfig,
        command_sink: Arc<dyn CommandSink>,
    ) -> Self {
        Self::new(id, Role::Primary { goal }, config, command_sink)
    }

    pub fn follower(
        id: AgentId,
        leader: AgentId,
        config: ControllerConfig,
        command_sink: Arc<dyn CommandSink>,
    ) -> Self {
        Self::new(id, Role::Follower { leader }, config, command_sink)
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn is_primary(&self) -> bool {
        matches!(self.role, Role::Primary { .. })
    }

    pub fn leader(&self) -> Option<&AgentId> {
        match &self.role {
            Role::Primary { .. } => None,
            Role::Follower { leader } => Some(leader),
        }
    }

    pub fn controller(&self) -> &PursuitController {
        &self.controller
    }

    /// True once this agent's spawn failed. A dormant agent never leaves
    /// `AwaitingLeader` and never emits.
    pub fn is_dormant(&self) -> bool {
        self.dormant.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> AgentPhase {
        match self.role {
            Role::Primary { .. } => AgentPhase::Tracking,
            Role::Follower { .. } if self.is_dormant() => AgentPhase::AwaitingLeader,
            Role::Follower { .. } if self.leader_pose.has_target() => AgentPhase::Tracking,
            Role::Follower { .. } => AgentPhase::AwaitingLeader,
        }
    }

    /// Target the next command would steer toward, if any.
    pub fn current_target(&self) -> Option<Pose2D> {
        match self.role {
            Role::Primary { goal } => Some(goal),
            Role::Follower { .. } if self.is_dormant() => None,
            Role::Follower { .. } => self.leader_pose.get(),
        }
    }

    /// Own-pose feed callback. Computes and publishes a command unless this
    /// follower has not seen its leader yet.
    pub fn on_own_pose_update(&self, pose: Pose2D) -> Option<VelocityCommand> {
        let Some(target) = self.current_target() else {
            trace!(agent = %self.id, "no leader pose yet, skipping command");
            return None;
        };

        let command = self.controller.compute(pose, target);
        debug!(
            agent = %self.id,
            linear = command.linear,
            angular = command.angular,
            "command"
        );
        self.command_sink.publish(command);
        Some(command)
    }

    /// Leader-pose feed callback. Only records the pose.
    pub fn on_leader_pose_update(&self, pose: Pose2D) {
        match self.role {
            Role::Follower { .. } if self.is_dormant() => {
                trace!(agent = %self.id, "dormant, dropping leader pose");
            }
            Role::Follower { .. } => {
                if !self.leader_pose.has_target() {
                    info!(agent = %self.id, "leader pose received, tracking");
                }
                self.leader_pose.set(pose);
            }
            Role::Primary { .. } => {
                warn!(agent = %self.id, "primary agent ignores leader poses");
            }
        }
    }

    /// Ask the placement service for this agent, at most once per lifetime.
    ///
    /// Must run outside the pose callbacks: it waits on the service.
    pub async fn spawn_if_needed<R: Rng + ?Sized>(
        &self,
        placement: &dyn PlacementService,
        rng: &mut R,
        region: &SpawnRegion,
        policy: &SpawnPolicy,
    ) -> Result<SpawnOutcome, ChainError> {
        if self.is_primary() {
            return Ok(SpawnOutcome::NotRequired);
        }
        if self.spawn_requested.swap(true, Ordering::AcqRel) {
            return Ok(SpawnOutcome::AlreadyRequested);
        }

        let result = self.request_spawn(placement, rng, region, policy).await;
        if result.is_err() {
            self.dormant.store(true, Ordering::Release);
        }
        result
    }

    async fn request_spawn<R: Rng + ?Sized>(
        &self,
        placement: &dyn PlacementService,
        rng: &mut R,
        region: &SpawnRegion,
        policy: &SpawnPolicy,
    ) -> Result<SpawnOutcome, ChainError> {
        let (x, y) = region.sample(rng);
        let request = SpawnRequest {
            name: self.id.to_string(),
            x,
            y,
            theta: 0.0,
        };

        wait_for_service(placement, policy).await?;

        match timeout(policy.call_timeout, placement.spawn(request.clone())).await {
            Ok(Ok(())) => {
                info!(agent = %self.id, x, y, "spawned");
                Ok(SpawnOutcome::Spawned(request))
            }
            Ok(Err(e @ ChainError::SpawnFailed { .. })) => Err(e),
            Ok(Err(e)) => Err(ChainError::SpawnFailed {
                agent: self.id.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ChainError::SpawnFailed {
                agent: self.id.clone(),
                reason: format!("no response within {:?}", policy.call_timeout),
            }),
        }
    }
}

async fn wait_for_service(
    placement: &dyn PlacementService,
    policy: &SpawnPolicy,
) -> Result<(), ChainError> {
    let mut backoff = policy.initial_backoff;

    for attempt in 1..=policy.max_attempts {
        if let Ok(true) = timeout(policy.call_timeout, placement.is_available()).await {
            return Ok(());
        }
        if attempt < policy.max_attempts {
            debug!(attempt, ?backoff, "waiting for {}", SPAWN_SERVICE);
            sleep(backoff).await;
            backoff = policy.next_backoff(backoff);
        }
    }

    Err(ChainError::ServiceUnavailable {
        service: SPAWN_SERVICE.to_string(),
        attempts: policy.max_attempts,
    })
}
