//! Agent registry.
//!
//! Holds every agent's identity and current belief. Agents are created once at
//! simulation start and never removed. The only mutation path is
//! [`update::apply`](crate::update::apply), which consumes a
//! [`Decision`](crate::update::Decision).

use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// Agent identifier - a dense index into the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub usize);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Agent#{}", self.0)
    }
}

/// An agent in the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Stable identity
    pub id: AgentId,
    /// Current belief text
    pub belief: String,
}

/// Owner of all agent state for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRegistry {
    agents: Vec<Agent>,
}

impl AgentRegistry {
    /// Build a registry from beliefs indexed by agent id.
    pub fn from_beliefs(beliefs: Vec<String>) -> Self {
        let agents = beliefs
            .into_iter()
            .enumerate()
            .map(|(id, belief)| Agent {
                id: AgentId(id),
                belief,
            })
            .collect();
        Self { agents }
    }

    /// Sample each agent's starting belief uniformly (with repetition) from `pool`.
    pub fn sample(pool: &[String], count: usize, rng: &mut impl Rng) -> Result<Self> {
        if pool.is_empty() {
            return Err(SimError::Configuration("belief pool is empty".to_string()));
        }

        let beliefs = (0..count)
            .map(|_| pool.choose(rng).cloned().unwrap_or_default())
            .collect();

        Ok(Self::from_beliefs(beliefs))
    }

    /// Number of agents
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the registry holds no agents
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Look up an agent
    pub fn get(&self, id: AgentId) -> Result<&Agent> {
        self.agents.get(id.0).ok_or(SimError::InvalidAgent(id))
    }

    /// Current belief of an agent
    pub fn belief(&self, id: AgentId) -> Result<&str> {
        self.get(id).map(|a| a.belief.as_str())
    }

    /// Iterate agents in id order
    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter()
    }

    /// Beliefs indexed by agent id
    pub fn snapshot(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.belief.clone()).collect()
    }

    /// Replace one agent's belief.
    ///
    /// Crate-private: callers go through the update engine so that only the
    /// defender of an interaction is ever touched.
    pub(crate) fn set_belief(&mut self, id: AgentId, belief: String) -> Result<()> {
        let agent = self
            .agents
            .get_mut(id.0)
            .ok_or(SimError::InvalidAgent(id))?;
        agent.belief = belief;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_sample_draws_from_pool() {
        let pool = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let mut rng = StdRng::seed_from_u64(42);
        let registry = AgentRegistry::sample(&pool, 9, &mut rng).unwrap();

        assert_eq!(registry.len(), 9);
        assert!(registry.iter().all(|a| pool.contains(&a.belief)));
    }

    #[test]
    fn test_sample_is_seed_deterministic() {
        let pool: Vec<String> = (0..5).map(|i| format!("belief {i}")).collect();
        let a = AgentRegistry::sample(&pool, 16, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = AgentRegistry::sample(&pool, 16, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_pool_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let err = AgentRegistry::sample(&[], 4, &mut rng).unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
    }

    #[test]
    fn test_unknown_agent() {
        let mut registry = AgentRegistry::from_beliefs(vec!["x".into()]);
        assert!(matches!(
            registry.belief(AgentId(3)),
            Err(SimError::InvalidAgent(AgentId(3)))
        ));
        assert!(registry.set_belief(AgentId(1), "y".into()).is_err());
        assert_eq!(registry.snapshot(), vec!["x".to_string()]);
    }
}
