// ================================
// src/chain.rs - chain topology and one-shot spawning
// ================================
use rand::rngs::StdRng;
use std::{collections::HashSet, sync::Arc};
use tracing::{info, warn};

use crate::{
    config::{ChainParams, ControllerConfig},
    error::ChainError,
    node::{AgentId, AgentNode, SpawnOutcome, SpawnPolicy, SpawnRegion},
    pose::Pose2D,
    transport::{command_topic, pose_topic, PlacementService, Subscription, Transport},
};

/// Built chain. Owns the nodes and their feed subscriptions; dropping it
/// stops all callbacks.
pub struct Chain {
    nodes: Vec<Arc<AgentNode>>,
    dormant: Vec<AgentId>,
    _subscriptions: Vec<Subscription>,
}

impl Chain {
    pub fn nodes(&self) -> &[Arc<AgentNode>] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&Arc<AgentNode>> {
        self.nodes.iter().find(|n| n.id().as_str() == id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Followers whose spawn failed. They never receive a pose and stay idle.
    pub fn dormant(&self) -> &[AgentId] {
        &self.dormant
    }

    pub fn is_dormant(&self, id: &str) -> bool {
        self.dormant.iter().any(|d| d.as_str() == id)
    }
}

/// Wires agents into a chain: the first heads for the goal, each later one
/// chases its predecessor.
pub struct ChainManager {
    leader_config: ControllerConfig,
    follower_config: ControllerConfig,
    region: SpawnRegion,
    policy: SpawnPolicy,
    rng: StdRng,
}

impl ChainManager {
    pub fn new(
        leader_config: ControllerConfig,
        follower_config: ControllerConfig,
        region: SpawnRegion,
        policy: SpawnPolicy,
        rng: StdRng,
    ) -> Self {
        Self {
            leader_config,
            follower_config,
            region,
            policy,
            rng,
        }
    }

    pub fn from_params(params: &ChainParams, rng: StdRng) -> Result<Self, ChainError> {
        Ok(Self::new(
            params.leader_config()?,
            params.follower_config()?,
            params.spawn.region()?,
            params.spawn.policy(),
            rng,
        ))
    }

    /// Build the chain, then spawn every follower in chain order. Spawn
    /// failures are logged and leave that agent dormant.
    pub async fn launch<T: Transport + ?Sized>(
        &mut self,
        ids: &[AgentId],
        goal: Pose2D,
        transport: &T,
        placement: &dyn PlacementService,
    ) -> Result<Chain, ChainError> {
        let mut chain = self.build(ids, goal, transport)?;

        for node in &chain.nodes {
            match node
                .spawn_if_needed(placement, &mut self.rng, &self.region, &self.policy)
                .await
            {
                Ok(SpawnOutcome::Spawned(_)) | Ok(SpawnOutcome::NotRequired) => {}
                Ok(SpawnOutcome::AlreadyRequested) => {
                    warn!(agent = %node.id(), "spawn already requested");
                }
                Err(e) if e.is_spawn_failure() => {
                    warn!(agent = %node.id(), error = %e, "agent left dormant");
                    chain.dormant.push(node.id().clone());
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            agents = chain.len(),
            dormant = chain.dormant.len(),
            "chain launched"
        );
        Ok(chain)
    }

    /// Create and wire the nodes without spawning anything.
    pub fn build<T: Transport + ?Sized>(
        &self,
        ids: &[AgentId],
        goal: Pose2D,
        transport: &T,
    ) -> Result<Chain, ChainError> {
        validate_chain(ids)?;

        let mut nodes = Vec::with_capacity(ids.len());
        let mut subscriptions = Vec::with_capacity(ids.len() * 2);
        let mut predecessor: Option<&AgentId> = None;

        for id in ids {
            let sink = transport.command_publisher(&command_topic(id.as_str()))?;
            let node = Arc::new(match predecessor {
                None => AgentNode::primary(id.clone(), goal, self.leader_config, sink),
                Some(leader) => {
                    AgentNode::follower(id.clone(), leader.clone(), self.follower_config, sink)
                }
            });

            let own = node.clone();
            subscriptions.push(transport.subscribe_pose(
                &pose_topic(id.as_str()),
                Box::new(move |pose| {
                    own.on_own_pose_update(pose);
                }),
            )?);

            if let Some(leader) = predecessor {
                let follower = node.clone();
                subscriptions.push(transport.subscribe_pose(
                    &pose_topic(leader.as_str()),
                    Box::new(move |pose| follower.on_leader_pose_update(pose)),
                )?);
                info!(agent = %id, leader = %leader, "follower wired");
            } else {
                info!(agent = %id, goal_x = goal.x, goal_y = goal.y, "primary wired");
            }

            nodes.push(node);
            predecessor = Some(id);
        }

        Ok(Chain {
            nodes,
            dormant: Vec::new(),
            _subscriptions: subscriptions,
        })
    }
}

fn validate_chain(ids: &[AgentId]) -> Result<(), ChainError> {
    if ids.is_empty() {
        return Err(ChainError::EmptyChain);
    }

    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id) {
            return Err(ChainError::DuplicateAgent(id.clone()));
        }
    }
    Ok(())
}
