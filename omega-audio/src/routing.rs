//! Mixer routing graph
//!
//! The control side keeps a mirror of every channel's route, sends and
//! sidechain. Each change is tried on a copy; the copy is only kept when a
//! topological sort of it succeeds, and the resulting plan travels to the
//! audio thread together with the change.

use crate::error::{EngineError, Result};
use crate::mixer::{SendConfig, SidechainConfig, MAX_SENDS};

/// Index of the master channel
pub const MASTER: usize = 0;

/// Processing order for one topology. Every channel comes after all
/// channels that feed it by route, send or sidechain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingPlan {
    order: Vec<usize>,
    generation: u64,
}

impl RoutingPlan {
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Increases with every accepted topology change
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Position of `channel` in the order
    pub fn position(&self, channel: usize) -> Option<usize> {
        self.order.iter().position(|&c| c == channel)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Node {
    target: Option<usize>,
    sends: [SendConfig; MAX_SENDS],
    sidechain: SidechainConfig,
}

/// Control-side model of the mixer topology
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingGraph {
    nodes: Vec<Node>,
    generation: u64,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Grey,
    Black,
}

impl RoutingGraph {
    /// `channels` includes master; every other channel routes to master
    pub fn new(channels: usize) -> Self {
        let nodes = (0..channels.max(1))
            .map(|i| Node {
                target: (i != MASTER).then_some(MASTER),
                sends: [SendConfig::default(); MAX_SENDS],
                sidechain: SidechainConfig::default(),
            })
            .collect();
        Self { nodes, generation: 0 }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn target(&self, channel: usize) -> Option<usize> {
        self.nodes.get(channel).and_then(|n| n.target)
    }

    pub fn send(&self, channel: usize, index: usize) -> Option<SendConfig> {
        self.nodes.get(channel).and_then(|n| n.sends.get(index).copied())
    }

    pub fn sidechain(&self, channel: usize) -> Option<SidechainConfig> {
        self.nodes.get(channel).map(|n| n.sidechain)
    }

    fn check_channel(&self, channel: usize) -> Result<()> {
        if channel < self.nodes.len() {
            Ok(())
        } else {
            Err(EngineError::UnknownMixerChannel(channel))
        }
    }

    /// Route `channel` into `target`
    pub fn set_route(&mut self, channel: usize, target: usize) -> Result<RoutingPlan> {
        self.check_channel(channel)?;
        self.check_channel(target)?;
        if channel == MASTER {
            return Err(EngineError::InvalidParameter {
                name: "master route",
                value: target as f64,
            });
        }
        self.try_change(|graph| graph.nodes[channel].target = Some(target))
    }

    pub fn set_send(&mut self, channel: usize, index: usize, send: SendConfig) -> Result<RoutingPlan> {
        self.check_channel(channel)?;
        if index >= MAX_SENDS {
            return Err(EngineError::InvalidParameter {
                name: "send index",
                value: index as f64,
            });
        }
        if let Some(target) = send.target {
            self.check_channel(target)?;
        }
        self.try_change(|graph| graph.nodes[channel].sends[index] = send)
    }

    pub fn set_sidechain(&mut self, channel: usize, sidechain: SidechainConfig) -> Result<RoutingPlan> {
        self.check_channel(channel)?;
        if let Some(source) = sidechain.source {
            self.check_channel(source)?;
        }
        self.try_change(|graph| graph.nodes[channel].sidechain = sidechain)
    }

    /// Apply `change` to a copy and keep it only if it still sorts
    fn try_change(&mut self, change: impl FnOnce(&mut Self)) -> Result<RoutingPlan> {
        let mut next = self.clone();
        change(&mut next);
        next.generation += 1;
        let plan = next.plan()?;
        *self = next;
        Ok(plan)
    }

    /// Outgoing ordering edges of every node
    fn edges(&self) -> Vec<Vec<usize>> {
        let mut edges = vec![Vec::new(); self.nodes.len()];
        for (from, node) in self.nodes.iter().enumerate() {
            if let Some(target) = node.target {
                edges[from].push(target);
            }
            for send in node.sends.iter().filter(|s| s.enabled) {
                if let Some(target) = send.target {
                    edges[from].push(target);
                }
            }
        }
        for (consumer, node) in self.nodes.iter().enumerate() {
            let sc = node.sidechain;
            if let (true, false, Some(source)) = (sc.enabled, sc.delayed, sc.source) {
                edges[source].push(consumer);
            }
        }
        edges
    }

    /// Depth-first topological sort of the current topology
    pub fn plan(&self) -> Result<RoutingPlan> {
        let edges = self.edges();
        let mut marks = vec![Mark::White; self.nodes.len()];
        let mut finished = Vec::with_capacity(self.nodes.len());
        // (node, next edge to visit)
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for root in 0..self.nodes.len() {
            if marks[root] != Mark::White {
                continue;
            }
            marks[root] = Mark::Grey;
            stack.push((root, 0));

            while let Some(top) = stack.last_mut() {
                let (node, next) = *top;
                if let Some(&to) = edges[node].get(next) {
                    top.1 += 1;
                    match marks[to] {
                        Mark::White => {
                            marks[to] = Mark::Grey;
                            stack.push((to, 0));
                        }
                        Mark::Grey => return Err(EngineError::RoutingCycle { from: node, to }),
                        Mark::Black => {}
                    }
                } else {
                    marks[node] = Mark::Black;
                    finished.push(node);
                    stack.pop();
                }
            }
        }

        finished.reverse();
        Ok(RoutingPlan {
            order: finished,
            generation: self.generation,
        })
    }
}
