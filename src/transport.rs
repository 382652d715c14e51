// ================================
// src/transport.rs - feeds, placement service and the in-process bus
// ================================
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::{runtime::Handle, sync::broadcast, task::JoinHandle};
use tracing::{trace, warn};

use crate::{
    error::ChainError,
    pose::{Pose2D, VelocityCommand},
};

/// Queue depth per topic, same as the publisher queues of the original nodes.
pub const DEFAULT_QUEUE_SIZE: usize = 10;

pub const SPAWN_SERVICE: &str = "/spawn";

pub fn pose_topic(agent: &str) -> String {
    format!("{agent}/pose")
}

pub fn command_topic(agent: &str) -> String {
    format!("{agent}/cmd_vel")
}

pub type PoseCallback = Box<dyn Fn(Pose2D) + Send + Sync + 'static>;
pub type CommandCallback = Box<dyn Fn(VelocityCommand) + Send + Sync + 'static>;

/// Outgoing command feed. Publishing never waits for delivery.
pub trait CommandSink: Send + Sync {
    fn publish(&self, command: VelocityCommand);
}

/// Pub/sub seam the agents are wired through.
pub trait Transport {
    fn subscribe_pose(&self, topic: &str, callback: PoseCallback) -> Result<Subscription, ChainError>;

    fn command_publisher(&self, topic: &str) -> Result<Arc<dyn CommandSink>, ChainError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

/// Service that creates a new agent in the world.
#[async_trait]
pub trait PlacementService: Send + Sync {
    async fn is_available(&self) -> bool;

    async fn spawn(&self, request: SpawnRequest) -> Result<(), ChainError>;
}

/// Keeps a feed callback running; dropping it stops delivery.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Topics<T> {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<T>>>,
}

impl<T: Clone + Send + 'static> Topics<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<T> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    fn publish(&self, topic: &str, msg: T) -> usize {
        self.sender(topic).send(msg).unwrap_or(0)
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<T> {
        self.sender(topic).subscribe()
    }

    fn listen<F>(&self, topic: &str, callback: F) -> Result<Subscription, ChainError>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let handle = Handle::try_current()
            .map_err(|e| ChainError::Transport(format!("cannot subscribe to {topic}: {e}")))?;
        let mut receiver = self.subscribe(topic);
        let name = topic.to_string();

        let task = handle.spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(msg) => callback(msg),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(topic = %name, skipped, "subscriber lagged, dropping old messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription {
            topic: topic.to_string(),
            task,
        })
    }
}

/// In-process pub/sub bus: one broadcast channel per topic, created on first
/// use by either side.
#[derive(Clone)]
pub struct TopicBus {
    poses: Arc<Topics<Pose2D>>,
    commands: Arc<Topics<VelocityCommand>>,
}

impl Default for TopicBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_SIZE)
    }
}

impl TopicBus {
    /// `queue_size` is the per-topic depth; zero is raised to one.
    pub fn new(queue_size: usize) -> Self {
        let queue_size = queue_size.max(1);
        Self {
            poses: Arc::new(Topics::new(queue_size)),
            commands: Arc::new(Topics::new(queue_size)),
        }
    }

    /// Returns how many subscribers received the pose.
    pub fn publish_pose(&self, topic: &str, pose: Pose2D) -> usize {
        self.poses.publish(topic, pose)
    }

    pub fn publish_command(&self, topic: &str, command: VelocityCommand) -> usize {
        self.commands.publish(topic, command)
    }

    pub fn pose_receiver(&self, topic: &str) -> broadcast::Receiver<Pose2D> {
        self.poses.subscribe(topic)
    }

    pub fn command_receiver(&self, topic: &str) -> broadcast::Receiver<VelocityCommand> {
        self.commands.subscribe(topic)
    }

    pub fn subscribe_command(
        &self,
        topic: &str,
        callback: CommandCallback,
    ) -> Result<Subscription, ChainError> {
        self.commands.listen(topic, callback)
    }
}

impl Transport for TopicBus {
    fn subscribe_pose(&self, topic: &str, callback: PoseCallback) -> Result<Subscription, ChainError> {
        self.poses.listen(topic, callback)
    }

    fn command_publisher(&self, topic: &str) -> Result<Arc<dyn CommandSink>, ChainError> {
        Ok(Arc::new(BusCommandSink {
            topic: topic.to_string(),
            sender: self.commands.sender(topic),
        }))
    }
}

struct BusCommandSink {
    topic: String,
    sender: broadcast::Sender<VelocityCommand>,
}

impl CommandSink for BusCommandSink {
    fn publish(&self, command: VelocityCommand) {
        if self.sender.send(command).is_err() {
            trace!(topic = %self.topic, "no subscribers for command");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::{sync::mpsc, time::timeout};

    #[test]
    fn topic_names_follow_agent_identity() {
        assert_eq!(pose_topic("turtle2"), "turtle2/pose");
        assert_eq!(command_topic("turtle2"), "turtle2/cmd_vel");
    }

    #[test]
    fn subscribing_outside_runtime_fails() {
        let bus = TopicBus::default();
        let result = bus.subscribe_pose("a/pose", Box::new(|_| {}));
        assert!(matches!(result, Err(ChainError::Transport(_))));
    }

    #[tokio::test]
    async fn pose_callback_receives_published_poses() {
        let bus = TopicBus::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = bus
            .subscribe_pose(
                "a/pose",
                Box::new(move |pose| {
                    let _ = tx.send(pose);
                }),
            )
            .unwrap();

        assert_eq!(bus.publish_pose("a/pose", Pose2D::new(1.0, 2.0, 0.0)), 1);
        assert_eq!(bus.publish_pose("b/pose", Pose2D::new(9.0, 9.0, 0.0)), 0);

        let got = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(got, Some(Pose2D::new(1.0, 2.0, 0.0)));
    }

    #[tokio::test]
    async fn command_publisher_reaches_receivers() {
        let bus = TopicBus::default();
        let mut rx = bus.command_receiver("a/cmd_vel");
        let sink = bus.command_publisher("a/cmd_vel").unwrap();

        sink.publish(VelocityCommand::new(1.0, -0.5));

        assert_eq!(rx.recv().await.unwrap(), VelocityCommand::new(1.0, -0.5));
    }

    #[tokio::test]
    async fn zero_queue_size_still_delivers() {
        let bus = TopicBus::new(0);
        let mut rx = bus.pose_receiver("a/pose");

        assert_eq!(bus.publish_pose("a/pose", Pose2D::new(1.0, 1.0, 0.0)), 1);
        assert_eq!(rx.recv().await.unwrap(), Pose2D::new(1.0, 1.0, 0.0));
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fire_and_forget() {
        let bus = TopicBus::default();
        let sink = bus.command_publisher("nobody/cmd_vel").unwrap();
        sink.publish(VelocityCommand::stop());
    }

    #[tokio::test]
    async fn dropping_subscription_stops_delivery() {
        let bus = TopicBus::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = bus
            .subscribe_pose(
                "a/pose",
                Box::new(move |pose| {
                    let _ = tx.send(pose);
                }),
            )
            .unwrap();
        assert_eq!(sub.topic(), "a/pose");
        drop(sub);

        // Channel sender is dropped with the aborted task.
        let got = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(got, None);
    }
}
