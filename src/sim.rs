// ================================
// src/sim.rs - kinematic turtle simulator
// ================================
use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    f64::consts::PI,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};
use tokio::{
    sync::watch,
    time::{interval, Instant, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::{
    config::SimParams,
    error::ChainError,
    pose::{Pose2D, VelocityCommand},
    transport::{command_topic, pose_topic, PlacementService, SpawnRequest, Subscription, TopicBus},
};

#[derive(Debug, Clone, Copy)]
struct Turtle {
    pose: Pose2D,
    command: Option<(VelocityCommand, Instant)>,
}

/// Unicycle agents in a square world. Consumes `{name}/cmd_vel`, publishes
/// `{name}/pose` every tick, and answers spawn requests.
pub struct TurtleSim {
    bus: TopicBus,
    params: SimParams,
    available: AtomicBool,
    turtles: Arc<Mutex<BTreeMap<String, Turtle>>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl TurtleSim {
    /// Create the world with its initial agent. Needs a running tokio runtime.
    pub fn new(bus: TopicBus, params: SimParams) -> Result<Self, ChainError> {
        params.validate()?;
        let sim = Self {
            bus,
            available: AtomicBool::new(true),
            turtles: Arc::new(Mutex::new(BTreeMap::new())),
            subscriptions: Mutex::new(Vec::new()),
            params,
        };
        let name = sim.params.initial_agent.clone();
        let pose = sim.params.initial_pose();
        sim.add_turtle(&name, pose)?;
        Ok(sim)
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    /// Toggle the placement service, e.g. to model a simulator still booting.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn pose_of(&self, name: &str) -> Option<Pose2D> {
        self.lock_turtles().get(name).map(|t| t.pose)
    }

    pub fn names(&self) -> Vec<String> {
        self.lock_turtles().keys().cloned().collect()
    }

    fn lock_turtles(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Turtle>> {
        self.turtles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add_turtle(&self, name: &str, pose: Pose2D) -> Result<(), ChainError> {
        {
            let mut turtles = self.lock_turtles();
            if turtles.contains_key(name) {
                return Err(ChainError::SpawnFailed {
                    agent: name.into(),
                    reason: "name already taken".to_string(),
                });
            }
            turtles.insert(name.to_string(), Turtle { pose, command: None });
        }

        let turtles = self.turtles.clone();
        let key = name.to_string();
        let subscription = self.bus.subscribe_command(
            &command_topic(name),
            Box::new(move |command| {
                let mut turtles = turtles.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(turtle) = turtles.get_mut(&key) {
                    turtle.command = Some((command, Instant::now()));
                }
            }),
        )?;
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscription);

        info!(agent = name, x = pose.x, y = pose.y, theta = pose.theta, "agent added to world");
        Ok(())
    }

    /// Advance every agent by `dt` and publish the new poses.
    pub fn tick(&self, dt: Duration) {
        let now = Instant::now();
        let poses: Vec<(String, Pose2D)> = {
            let mut turtles = self.lock_turtles();
            turtles
                .iter_mut()
                .map(|(name, turtle)| {
                    let command = match turtle.command {
                        Some((cmd, at)) if now.duration_since(at) <= self.params.command_timeout() => cmd,
                        _ => VelocityCommand::stop(),
                    };
                    turtle.pose = integrate(turtle.pose, command, dt.as_secs_f64(), self.params.world_size);
                    (name.clone(), turtle.pose)
                })
                .collect()
        };

        for (name, pose) in poses {
            self.bus.publish_pose(&pose_topic(&name), pose);
        }
    }

    /// Tick at the configured rate until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.params.period();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(rate_hz = self.params.rate_hz, "simulator running");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(period),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("simulator stopped");
    }
}

#[async_trait]
impl PlacementService for TurtleSim {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    async fn spawn(&self, request: SpawnRequest) -> Result<(), ChainError> {
        if ![request.x, request.y, request.theta].iter().all(|v| v.is_finite()) {
            return Err(ChainError::SpawnFailed {
                agent: request.name.as_str().into(),
                reason: "non-finite spawn pose".to_string(),
            });
        }
        let pose = Pose2D::new(request.x, request.y, normalize_angle(request.theta));
        self.add_turtle(&request.name, pose)
    }
}

/// One Euler step of unicycle motion, heading first, clamped to the world.
fn integrate(pose: Pose2D, command: VelocityCommand, dt: f64, world_size: f64) -> Pose2D {
    let theta = normalize_angle(pose.theta + command.angular * dt);
    let x = pose.x + theta.cos() * command.linear * dt;
    let y = pose.y + theta.sin() * command.linear * dt;
    Pose2D::new(x.clamp(0.0, world_size), y.clamp(0.0, world_size), theta)
}

/// Wrap any angle into (-π, π].
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}
