//! Static routing table — which router serves which endpoints, and which
//! routers are mutually adjacent.
//!
//! The table is validated once, at load time: unknown or asymmetric
//! adjacency and a disconnected router graph are configuration errors,
//! never per-packet surprises. After that it is read-only; there is no
//! dynamic topology in this design.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

/// Per-router topology entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterEntry {
    /// Directly connected routers.
    #[serde(default)]
    pub adjacent: Vec<String>,

    /// Endpoints this router delivers to.
    #[serde(default)]
    pub served: Vec<String>,
}

impl RouterEntry {
    fn serves(&self, endpoint: &str) -> bool {
        self.served.iter().any(|e| e == endpoint)
    }
}

/// Routing decision for one pack at one router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hop {
    /// The target endpoint is served here — deliver locally.
    Deliver(String),

    /// Relay to this adjacent router.
    Forward(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("routing table has no routers")]
    Empty,

    #[error("router {router:?} lists unknown adjacent router {adjacent:?}")]
    UnknownAdjacent { router: String, adjacent: String },

    #[error("adjacency between {0:?} and {1:?} is not symmetric")]
    Asymmetric(String, String),

    #[error("served id {0:?} is also a router id")]
    EndpointIsRouter(String),

    #[error("router graph is disconnected: {0:?} cannot reach {1:?}")]
    Disconnected(String, String),

    #[error("unknown router: {0}")]
    UnknownRouter(String),

    #[error("no router serves endpoint {0:?}")]
    NoServingRouter(String),

    #[error("no route from {router:?} to endpoint {endpoint:?}")]
    Unreachable { router: String, endpoint: String },
}

/// The static topology.
///
/// Senders embed a snapshot of their table in every pack for first-hop
/// selection and destination-side bookkeeping; relays forward from their
/// own locally configured copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, RouterEntry>",
    into = "BTreeMap<String, RouterEntry>"
)]
pub struct RouterTable {
    routers: BTreeMap<String, RouterEntry>,
}

impl RouterTable {
    /// Build and validate a table. All topology errors surface here.
    pub fn new(routers: BTreeMap<String, RouterEntry>) -> Result<Self, RouteError> {
        if routers.is_empty() {
            return Err(RouteError::Empty);
        }
        let mut table = Self { routers };
        for entry in table.routers.values_mut() {
            entry.adjacent.sort();
            entry.adjacent.dedup();
            entry.served.sort();
            entry.served.dedup();
        }
        table.validate()?;
        Ok(table)
    }

    fn validate(&self) -> Result<(), RouteError> {
        for (id, entry) in &self.routers {
            for adjacent in &entry.adjacent {
                let other = self.routers.get(adjacent).ok_or_else(|| {
                    RouteError::UnknownAdjacent {
                        router: id.clone(),
                        adjacent: adjacent.clone(),
                    }
                })?;
                if !other.adjacent.contains(id) {
                    return Err(RouteError::Asymmetric(id.clone(), adjacent.clone()));
                }
            }
            for endpoint in &entry.served {
                if self.routers.contains_key(endpoint) {
                    return Err(RouteError::EndpointIsRouter(endpoint.clone()));
                }
            }
        }

        // Delivery between any two endpoints must be possible by
        // construction, so the whole router graph has to be connected.
        let first = match self.routers.keys().next() {
            Some(id) => id,
            None => return Err(RouteError::Empty),
        };
        let reached = self.flood(first);
        if let Some(missing) = self.routers.keys().find(|id| !reached.contains(id.as_str())) {
            return Err(RouteError::Disconnected(first.clone(), missing.clone()));
        }
        Ok(())
    }

    /// All routers reachable from `from`, including itself.
    fn flood<'a>(&'a self, from: &'a str) -> BTreeSet<&'a str> {
        let mut reached = BTreeSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(id) = queue.pop_front() {
            if let Some(entry) = self.routers.get(id) {
                for adjacent in &entry.adjacent {
                    if reached.insert(adjacent) {
                        queue.push_back(adjacent);
                    }
                }
            }
        }
        reached
    }

    pub fn contains_router(&self, id: &str) -> bool {
        self.routers.contains_key(id)
    }

    pub fn routers(&self) -> impl Iterator<Item = &str> {
        self.routers.keys().map(String::as_str)
    }

    /// Routers serving an endpoint, in id order.
    pub fn serving(&self, endpoint: &str) -> Vec<&str> {
        self.routers
            .iter()
            .filter(|(_, entry)| entry.serves(endpoint))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// The router an endpoint hands its outbound packs to.
    ///
    /// Dual-homed endpoints are served by several routers; the
    /// lexicographically smallest id wins, deterministically.
    pub fn first_hop(&self, endpoint: &str) -> Result<&str, RouteError> {
        self.serving(endpoint)
            .first()
            .copied()
            .ok_or_else(|| RouteError::NoServingRouter(endpoint.to_string()))
    }

    /// The forwarding decision at `router` for a pack addressed to
    /// `endpoint`: deliver locally if served here, otherwise the adjacent
    /// router on a shortest path to a server of the endpoint. Ties are
    /// broken by the lexicographically smallest adjacent router id.
    pub fn next_hop(&self, router: &str, endpoint: &str) -> Result<Hop, RouteError> {
        let entry = self
            .routers
            .get(router)
            .ok_or_else(|| RouteError::UnknownRouter(router.to_string()))?;
        if entry.serves(endpoint) {
            return Ok(Hop::Deliver(endpoint.to_string()));
        }

        let mut best: Option<(usize, &str)> = None;
        for adjacent in &entry.adjacent {
            if let Some(distance) = self.hops_to_server(adjacent, endpoint) {
                // `adjacent` is sorted, so strict < keeps the smallest id
                // among equally distant candidates.
                if best.map_or(true, |(d, _)| distance < d) {
                    best = Some((distance, adjacent.as_str()));
                }
            }
        }
        match best {
            Some((_, adjacent)) => Ok(Hop::Forward(adjacent.to_string())),
            None => Err(RouteError::Unreachable {
                router: router.to_string(),
                endpoint: endpoint.to_string(),
            }),
        }
    }

    /// Hop count from `from` to the nearest router serving `endpoint`.
    fn hops_to_server(&self, from: &str, endpoint: &str) -> Option<usize> {
        let mut seen = BTreeSet::from([from]);
        let mut queue = VecDeque::from([(from, 0usize)]);
        while let Some((id, distance)) = queue.pop_front() {
            let entry = self.routers.get(id)?;
            if entry.serves(endpoint) {
                return Some(distance);
            }
            for adjacent in &entry.adjacent {
                if seen.insert(adjacent) {
                    queue.push_back((adjacent, distance + 1));
                }
            }
        }
        None
    }
}

impl TryFrom<BTreeMap<String, RouterEntry>> for RouterTable {
    type Error = RouteError;

    fn try_from(routers: BTreeMap<String, RouterEntry>) -> Result<Self, Self::Error> {
        Self::new(routers)
    }
}

impl From<RouterTable> for BTreeMap<String, RouterEntry> {
    fn from(table: RouterTable) -> Self {
        table.routers
    }
}
