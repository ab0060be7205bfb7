//! Wire types: the solve request, the streamed solution, and the final
//! result, exactly as they travel over the HTTP surface and the worker
//! subprocess protocol.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::board::{Pos, FOYER};
use crate::rules::RoomType;

fn d_true() -> bool {
    true
}
fn d_min_spymasters() -> u32 {
    8
}
fn d_min_corruption() -> u32 {
    6
}
fn d_max_endpoints() -> u32 {
    2
}
fn d_max_time() -> f64 {
    60.0
}
fn d_junction_penalty() -> i64 {
    10
}
fn d_max_neighbors() -> u32 {
    4
}

/// A pre-placed room supplied with the request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExistingRoom {
    #[serde(rename = "type")]
    pub room_type: RoomType,
    pub tier: u8,
    pub x: u8,
    pub y: u8,
}

impl ExistingRoom {
    #[inline]
    pub fn pos(&self) -> Pos {
        Pos::new(self.x, self.y)
    }
}

/// A pre-placed path tile; accepted either as `[x, y]` or `{x, y}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathCell {
    Pair([u8; 2]),
    Point { x: u8, y: u8 },
}

impl PathCell {
    #[inline]
    pub fn pos(&self) -> Pos {
        match *self {
            PathCell::Pair([x, y]) => Pos::new(x, y),
            PathCell::Point { x, y } => Pos::new(x, y),
        }
    }
}

/// Inclusive per-type count bounds inside one chain.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct CountRange {
    #[serde(default)]
    pub min: Option<u32>,
    #[serde(default)]
    pub max: Option<u32>,
}

/// One named chain: a labelled connected sub-structure with its own type
/// and count rules.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainSpec {
    pub name: String,
    /// Allowed room types; empty means every type is allowed.
    #[serde(default, rename = "roomTypes")]
    pub room_types: Vec<RoomType>,
    #[serde(default, rename = "roomCounts")]
    pub room_counts: HashMap<RoomType, CountRange>,
    /// When set, at least one room of this type in the chain must sit next
    /// to the foyer or next to a path tile that touches the foyer.
    #[serde(default, rename = "startingRoom")]
    pub starting_room: Option<RoomType>,
}

/// A warm-start hint: a non-binding suggestion to try this type at this
/// cell first. Hints need not be consistent with any constraint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hint {
    pub x: u8,
    pub y: u8,
    #[serde(rename = "type")]
    pub room_type: RoomType,
}

/// The solve request as received over the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolveRequest {
    /// Architect position `[x, y]`; the one required field.
    pub architect: [u8; 2],
    #[serde(default = "d_min_spymasters")]
    pub min_spymasters: u32,
    #[serde(default = "d_min_corruption")]
    pub min_corruption_chambers: u32,
    #[serde(default)]
    pub max_paths: u32,
    #[serde(default = "d_true")]
    pub snake_mode: bool,
    /// Informational; degree policy is carried by `max_neighbors` and the
    /// junction penalty.
    #[serde(default = "d_max_endpoints")]
    pub max_endpoints: u32,
    #[serde(default = "d_max_time")]
    pub max_time_seconds: f64,
    #[serde(default)]
    pub existing_rooms: Vec<ExistingRoom>,
    #[serde(default)]
    pub existing_paths: Vec<PathCell>,
    #[serde(default = "d_true")]
    pub lock_existing: bool,
    #[serde(default = "d_junction_penalty")]
    pub junction_penalty: i64,
    #[serde(default = "d_max_neighbors")]
    pub max_neighbors: u32,
    #[serde(default)]
    pub empty_penalty: i64,
    /// Per-type tier-value override `{type: [v1, v2, v3]}`.
    #[serde(default)]
    pub room_values: Option<HashMap<RoomType, [i64; 3]>>,
    #[serde(default)]
    pub chains: Option<Vec<ChainSpec>>,
    #[serde(default)]
    pub hints: Vec<Hint>,
    /// Gate improving solutions through the directional validator instead
    /// of only checking the final one.
    #[serde(default = "d_true")]
    pub lazy_directional_check: bool,
}

impl SolveRequest {
    /// A minimal request around an architect position, with wire defaults.
    pub fn new(architect: Pos) -> SolveRequest {
        SolveRequest {
            architect: [architect.x, architect.y],
            min_spymasters: d_min_spymasters(),
            min_corruption_chambers: d_min_corruption(),
            max_paths: 0,
            snake_mode: true,
            max_endpoints: d_max_endpoints(),
            max_time_seconds: d_max_time(),
            existing_rooms: Vec::new(),
            existing_paths: Vec::new(),
            lock_existing: true,
            junction_penalty: d_junction_penalty(),
            max_neighbors: d_max_neighbors(),
            empty_penalty: 0,
            room_values: None,
            chains: None,
            hints: Vec::new(),
            lazy_directional_check: true,
        }
    }

    #[inline]
    pub fn architect_pos(&self) -> Pos {
        Pos::new(self.architect[0], self.architect[1])
    }

    /// Basic shape validation; failures reject at admission with 400.
    /// Likely-infeasibility (architect off-grid, capacity) is the
    /// pre-check's business, not this one's.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_time_seconds <= 0.0 {
            return Err("max_time_seconds must be positive".into());
        }
        if self.max_neighbors == 0 || self.max_neighbors > 4 {
            return Err("max_neighbors must be in 1..=4".into());
        }
        for r in &self.existing_rooms {
            if !r.pos().in_bounds() {
                return Err(format!("existing room at ({}, {}) is off-grid", r.x, r.y));
            }
            if !r.room_type.is_room() {
                return Err(format!("existing room type {} is not a room", r.room_type));
            }
            if !(1..=3).contains(&r.tier) {
                return Err(format!("existing room tier {} out of 1..=3", r.tier));
            }
            if r.pos() == FOYER || r.pos() == self.architect_pos() {
                return Err(format!(
                    "existing room at ({}, {}) collides with a fixed path cell",
                    r.x, r.y
                ));
            }
        }
        for p in &self.existing_paths {
            if !p.pos().in_bounds() {
                let pos = p.pos();
                return Err(format!("existing path at ({}, {}) is off-grid", pos.x, pos.y));
            }
        }
        if let Some(chains) = &self.chains {
            if chains.is_empty() {
                return Err("chains must be non-empty when present".into());
            }
            if chains.len() > 16 {
                return Err("too many chains (max 16)".into());
            }
            for c in chains {
                if c.name.is_empty() {
                    return Err("chain name must be non-empty".into());
                }
            }
        }
        if let Some(values) = &self.room_values {
            for (t, vs) in values {
                if !t.is_room() {
                    return Err(format!("room_values key {t} is not a room"));
                }
                if vs.iter().any(|&v| v < 0) {
                    return Err(format!("room_values for {t} must be non-negative"));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Results
// ============================================================================

/// A placed room in a solution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoomOut {
    #[serde(rename = "type")]
    pub room_type: RoomType,
    pub tier: u8,
    pub x: u8,
    pub y: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

impl RoomOut {
    #[inline]
    pub fn pos(&self) -> Pos {
        Pos::new(self.x, self.y)
    }
}

/// A placed path tile in a solution (the foyer and architect are implied
/// and not listed).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathOut {
    pub x: u8,
    pub y: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EdgeEnd {
    pub x: u8,
    pub y: u8,
}

/// An auto-connection between two in-temple cells.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EdgeOut {
    pub from: EdgeEnd,
    pub to: EdgeEnd,
}

impl EdgeOut {
    pub fn new(a: Pos, b: Pos) -> EdgeOut {
        EdgeOut {
            from: EdgeEnd { x: a.x, y: a.y },
            to: EdgeEnd { x: b.x, y: b.y },
        }
    }
}

/// One streamed best-so-far layout.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Solution {
    pub score: i64,
    pub rooms: Vec<RoomOut>,
    pub paths: Vec<PathOut>,
    pub edges: Vec<EdgeOut>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_names: Option<Vec<String>>,
    /// Ordinal of this solution in the improving stream (1-based).
    pub solution_count: u64,
}

/// Solver statistics attached to every result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SolveStats {
    /// `optimal`, `feasible`, `infeasible`, `timeout`, or `aborted`.
    pub status: String,
    pub solutions_considered: u64,
    pub solutions_reported: u64,
    pub nodes: u64,
    pub conflicts: u64,
    pub wall_time_seconds: f64,
    pub workers: usize,
    /// Verdict of the directional validator on the returned layout:
    /// `passed`, `violated`, or `not_applicable`.
    pub directional_check: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostic_hints: Vec<String>,
}

/// The final outcome of a solve.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolveResult {
    pub success: bool,
    pub optimal: bool,
    pub score: i64,
    pub rooms: Vec<RoomOut>,
    pub paths: Vec<PathOut>,
    pub edges: Vec<EdgeOut>,
    pub stats: SolveStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_names: Option<Vec<String>>,
    /// Supplied rooms the optimizer chose to omit (`lock_existing = false`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_rooms: Option<Vec<RoomOut>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SolveResult {
    /// A failure result carrying diagnostics but no layout.
    pub fn failure(error: impl Into<String>, stats: SolveStats) -> SolveResult {
        SolveResult {
            success: false,
            optimal: false,
            score: 0,
            rooms: Vec::new(),
            paths: Vec::new(),
            edges: Vec::new(),
            stats,
            chain_names: None,
            excluded_rooms: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_contract() {
        let req: SolveRequest = serde_json::from_str(r#"{"architect": [5, 5]}"#).unwrap();
        assert_eq!(req.min_spymasters, 8);
        assert_eq!(req.min_corruption_chambers, 6);
        assert_eq!(req.max_paths, 0);
        assert!(req.snake_mode);
        assert!(req.lock_existing);
        assert_eq!(req.junction_penalty, 10);
        assert_eq!(req.max_neighbors, 4);
        assert_eq!(req.empty_penalty, 0);
        assert!(req.lazy_directional_check);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn existing_paths_accept_both_shapes() {
        let req: SolveRequest = serde_json::from_str(
            r#"{"architect": [5, 5], "existing_paths": [[2, 3], {"x": 4, "y": 4}]}"#,
        )
        .unwrap();
        let ps: Vec<Pos> = req.existing_paths.iter().map(|p| p.pos()).collect();
        assert_eq!(ps, vec![Pos::new(2, 3), Pos::new(4, 4)]);
    }

    #[test]
    fn chain_spec_uses_camel_case_keys() {
        let req: SolveRequest = serde_json::from_str(
            r#"{
                "architect": [5, 5],
                "chains": [{
                    "name": "war wing",
                    "roomTypes": ["Garrison", "SPYMASTER"],
                    "roomCounts": {"Garrison": {"min": 1, "max": 3}},
                    "startingRoom": "Garrison"
                }]
            }"#,
        )
        .unwrap();
        let chains = req.chains.unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].room_types, vec![RoomType::Garrison, RoomType::Spymaster]);
        assert_eq!(chains[0].starting_room, Some(RoomType::Garrison));
        let range = chains[0].room_counts[&RoomType::Garrison];
        assert_eq!((range.min, range.max), (Some(1), Some(3)));
    }

    #[test]
    fn validate_rejects_bad_shapes() {
        let mut req = SolveRequest::new(Pos::new(5, 5));
        req.existing_rooms.push(ExistingRoom {
            room_type: RoomType::Garrison,
            tier: 5,
            x: 2,
            y: 2,
        });
        assert!(req.validate().is_err());

        let mut req = SolveRequest::new(Pos::new(5, 5));
        req.max_time_seconds = 0.0;
        assert!(req.validate().is_err());

        let mut req = SolveRequest::new(Pos::new(5, 2));
        req.existing_rooms.push(ExistingRoom {
            room_type: RoomType::Garrison,
            tier: 1,
            x: 5,
            y: 2,
        });
        assert!(req.validate().is_err(), "room on architect must be rejected");
    }

    #[test]
    fn solution_serializes_without_empty_options() {
        let sol = Solution {
            score: 42,
            rooms: vec![RoomOut {
                room_type: RoomType::Garrison,
                tier: 2,
                x: 5,
                y: 2,
                chain: None,
            }],
            paths: vec![],
            edges: vec![EdgeOut::new(Pos::new(5, 1), Pos::new(5, 2))],
            chain_names: None,
            solution_count: 1,
        };
        let v = serde_json::to_value(&sol).unwrap();
        assert!(v.get("chain_names").is_none());
        assert_eq!(v["rooms"][0]["type"], "Garrison");
        assert_eq!(v["edges"][0]["from"]["x"], 5);
    }
}
