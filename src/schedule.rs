//! Pair selection and role assignment.
//!
//! Both operations draw from the simulation's single seeded generator, which is
//! passed in explicitly. Neither keeps any state between calls.

use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::registry::AgentId;
use crate::topology::Topology;

/// Asymmetric conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Tries to convince the other agent
    Persuader,
    /// Listens, argues back, and may revise its belief
    Defender,
}

impl Role {
    /// Lowercase role name
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Persuader => "persuader",
            Role::Defender => "defender",
        }
    }

}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unordered interacting pair: `initiator` was drawn first, `partner` among its neighbors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    /// Agent drawn uniformly from the whole population
    pub initiator: AgentId,
    /// Agent drawn uniformly from the initiator's neighbors
    pub partner: AgentId,
}

/// Why roles ended up the way they did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleRationale {
    /// Coin flip landed on the initiator persuading
    InitiatorPersuades,
    /// Coin flip landed on the partner persuading
    PartnerPersuades,
}

/// Roles for one interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// Agent that speaks first each round
    pub persuader: AgentId,
    /// Agent whose belief may change
    pub defender: AgentId,
    /// Coin flip outcome
    pub rationale: RoleRationale,
}

impl RoleAssignment {
    /// Agent holding `role`
    pub fn agent(&self, role: Role) -> AgentId {
        match role {
            Role::Persuader => self.persuader,
            Role::Defender => self.defender,
        }
    }
}

/// Draw an interacting pair.
///
/// The initiator is uniform over all agents, the partner uniform over the
/// initiator's neighbors.
pub fn select_pair(topology: &Topology, rng: &mut impl Rng) -> Result<Pair> {
    let agents = topology.agent_ids();
    let initiator = *agents
        .choose(rng)
        .ok_or_else(|| SimError::Configuration("topology has no agents".to_string()))?;

    let neighbors = topology.neighbors(initiator)?;
    let partner = *neighbors
        .choose(rng)
        .ok_or(SimError::IsolatedAgent(initiator))?;

    Ok(Pair { initiator, partner })
}

/// Assign persuader/defender with a fair, memoryless coin flip.
pub fn assign_roles(pair: Pair, rng: &mut impl Rng) -> RoleAssignment {
    if rng.gen_bool(0.5) {
        RoleAssignment {
            persuader: pair.initiator,
            defender: pair.partner,
            rationale: RoleRationale::InitiatorPersuades,
        }
    } else {
        RoleAssignment {
            persuader: pair.partner,
            defender: pair.initiator,
            rationale: RoleRationale::PartnerPersuades,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::topology::TopologyKind;

    #[test]
    fn test_pair_is_adjacent() {
        let topology = Topology::build(TopologyKind::Grid8, 16, None).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let pair = select_pair(&topology, &mut rng).unwrap();
            assert_ne!(pair.initiator, pair.partner);
            assert!(topology
                .neighbors(pair.initiator)
                .unwrap()
                .contains(&pair.partner));
        }
    }

    #[test]
    fn test_isolated_initiator_is_an_error() {
        let topology = Topology::edgeless(3);
        let mut rng = StdRng::seed_from_u64(5);
        assert!(matches!(
            select_pair(&topology, &mut rng),
            Err(SimError::IsolatedAgent(_))
        ));
    }

    #[test]
    fn test_star_spokes_always_pair_with_hub() {
        let topology = Topology::build(TopologyKind::Star, 6, None).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let pair = select_pair(&topology, &mut rng).unwrap();
            if pair.initiator != AgentId(0) {
                assert_eq!(pair.partner, AgentId(0));
            }
        }
    }

    #[test]
    fn test_selection_deterministic_for_seed() {
        let topology = Topology::build(TopologyKind::Ring, 12, None).unwrap();
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..50)
                .map(|_| {
                    let pair = select_pair(&topology, &mut rng).unwrap();
                    assign_roles(pair, &mut rng)
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(9), draw(9));
    }

    #[test]
    fn test_roles_are_fair() {
        let pair = Pair {
            initiator: AgentId(1),
            partner: AgentId(2),
        };
        let mut rng = StdRng::seed_from_u64(2024);
        let trials = 10_000;
        let initiator_persuades = (0..trials)
            .filter(|_| assign_roles(pair, &mut rng).persuader == AgentId(1))
            .count();
        let share = initiator_persuades as f64 / trials as f64;
        assert!((0.47..0.53).contains(&share), "share was {share}");
    }

    #[test]
    fn test_role_assignment_consistency() {
        let pair = Pair {
            initiator: AgentId(4),
            partner: AgentId(5),
        };
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let roles = assign_roles(pair, &mut rng);
            assert_ne!(roles.persuader, roles.defender);
            match roles.rationale {
                RoleRationale::InitiatorPersuades => assert_eq!(roles.persuader, AgentId(4)),
                RoleRationale::PartnerPersuades => assert_eq!(roles.persuader, AgentId(5)),
            }
            assert_eq!(roles.agent(Role::Defender), roles.defender);
        }
    }
}
