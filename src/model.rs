//! Model builder: turns a [`SolveRequest`] into an [`Engine`] loaded with
//! the 81-cell variable set, the full constraint catalogue, and the
//! objective.
//!
//! Variables per cell: `type` (16 values), `tier` (0..3), `in_temple`
//! (bool), `degree` (0..=4, capped by `max_neighbors`), and `chain`
//! (0..=N) when chains are configured. Variables per adjacent pair: one
//! `edge` bool bound to the type pair through the compatibility table,
//! the single contract realizing "placement implies connection".

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use thiserror::Error;

use crate::board::{adjacent_pairs, neighbor_table, Pos, FOYER, NUM_CELLS};
use crate::engine::{Decision, Dom, Engine, ObjTerm, Objective, Prop, Val, VarId};
use crate::request::SolveRequest;
use crate::rules::{
    self, RoomType, ADJACENCY_CAPS, DIRECTIONAL_PAIR, FORBIDDEN_CHAINS, NO_SELF_ADJACENCY,
    NUM_TYPES, REQUIRES_PATH_NEIGHBOR, ROOM_TYPES, UNIQUE_TYPES,
};

/// Variable handles into the engine, kept for extraction.
pub struct ModelVars {
    pub ty: Vec<VarId>,
    pub tier: Vec<VarId>,
    pub in_t: Vec<VarId>,
    pub degree: Vec<VarId>,
    pub chain: Option<Vec<VarId>>,
    /// `(cell a, cell b, edge var)` with `a < b`.
    pub pairs: Vec<(usize, usize, VarId)>,
}

/// A built model, ready for the search driver.
pub struct Model {
    pub engine: Engine,
    pub vars: ModelVars,
    pub objective: Objective,
    pub chain_names: Vec<String>,
    cell_order: Vec<usize>,
    values: Arc<[[i64; 4]; 16]>,
    hint_types: HashMap<usize, RoomType>,
    num_chains: usize,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("architect position ({0}, {1}) is outside the grid")]
    ArchitectOffGrid(u8, u8),
    #[error("architect position coincides with the foyer")]
    ArchitectOnFoyer,
    #[error("locked placements contradict each other: {0}")]
    Contradiction(String),
}

/// Value-ordering policy for one portfolio worker.
#[derive(Clone)]
pub struct ValuePolicy {
    /// Try `Empty` first (fast first solution) instead of rooms first.
    pub prefer_empty: bool,
    /// Deterministic shuffle seed for the room order; 0 keeps the
    /// value-descending order.
    pub seed: u64,
}

fn mask_of(types: &[RoomType]) -> u128 {
    types.iter().fold(0u128, |m, t| m | (1u128 << t.index()))
}

fn value_table(req: &SolveRequest) -> [[i64; 4]; 16] {
    let mut table = [[0i64; 4]; 16];
    table[RoomType::Path.index() as usize][1] = rules::PATH_VALUE;
    for &t in ROOM_TYPES.iter() {
        let base = rules::TIER_VALUES[t.index() as usize - 2];
        let vs = req
            .room_values
            .as_ref()
            .and_then(|m| m.get(&t))
            .copied()
            .unwrap_or(base);
        for tier in 1..=3usize {
            table[t.index() as usize][tier] = vs[tier - 1];
        }
    }
    table
}

impl Model {
    pub fn build(req: &SolveRequest) -> Result<Model, BuildError> {
        let architect = req.architect_pos();
        if !architect.in_bounds() {
            return Err(BuildError::ArchitectOffGrid(architect.x, architect.y));
        }
        if architect == FOYER {
            return Err(BuildError::ArchitectOnFoyer);
        }
        let fixed = [FOYER.idx(), architect.idx()];
        let is_fixed = |i: usize| fixed.contains(&i);

        let neighbors = neighbor_table();
        let mut engine = Engine::new();

        // ---- variables -----------------------------------------------------
        let ty: Vec<VarId> = (0..NUM_CELLS)
            .map(|_| engine.new_var(Dom::full(NUM_TYPES as u32)))
            .collect();
        let tier: Vec<VarId> = (0..NUM_CELLS).map(|_| engine.new_var(Dom::full(4))).collect();
        let in_t: Vec<VarId> = (0..NUM_CELLS).map(|_| engine.new_var(Dom::full(2))).collect();
        let max_deg = req.max_neighbors.min(4) as usize;
        let degree: Vec<VarId> = (0..NUM_CELLS)
            .map(|i| engine.new_var(Dom::at_most(neighbors[i].len().min(max_deg) as Val)))
            .collect();

        let mut pairs = Vec::new();
        let mut edge_of: HashMap<(usize, usize), VarId> = HashMap::new();
        let compat_triples: Arc<Vec<(Val, Val, Val)>> = Arc::new(
            (0..NUM_TYPES as u8)
                .flat_map(|a| (0..NUM_TYPES as u8).map(move |b| (a, b)))
                .map(|(a, b)| {
                    let ta = RoomType::from_index(a).expect("index in range");
                    let tb = RoomType::from_index(b).expect("index in range");
                    (a, b, rules::compat(ta, tb) as Val)
                })
                .collect(),
        );
        for (a, b) in adjacent_pairs() {
            let edge = engine.new_var(Dom::full(2));
            engine.post(Prop::Table3 {
                a: ty[a],
                b: ty[b],
                c: edge,
                triples: Arc::clone(&compat_triples),
            });
            edge_of.insert((a, b), edge);
            pairs.push((a, b, edge));
        }
        let edge = |a: usize, b: usize| edge_of[&(a.min(b), a.max(b))];

        // ---- channeling ----------------------------------------------------
        let in_t_pairs: Arc<Vec<(Val, Val)>> = Arc::new(
            (0..NUM_TYPES as u8)
                .map(|t| (t, (t != 0) as Val))
                .collect(),
        );
        let tier_pairs: Arc<Vec<(Val, Val)>> = Arc::new(
            std::iter::once((0u8, 0u8))
                .chain(std::iter::once((1u8, 1u8)))
                .chain((2..NUM_TYPES as u8).flat_map(|t| (1..=3u8).map(move |r| (t, r))))
                .collect(),
        );
        for i in 0..NUM_CELLS {
            engine.post(Prop::Table2 {
                a: ty[i],
                b: in_t[i],
                pairs: Arc::clone(&in_t_pairs),
            });
            engine.post(Prop::Table2 {
                a: ty[i],
                b: tier[i],
                pairs: Arc::clone(&tier_pairs),
            });
            engine.post(Prop::BoolSum {
                bools: neighbors[i].iter().map(|&n| edge(i, n)).collect(),
                total: degree[i],
            });
        }

        // ---- fixed path cells ----------------------------------------------
        let path = RoomType::Path.index();
        for &i in &fixed {
            let ok = engine.restrict(ty[i], Dom::singleton(path)).is_ok()
                && engine.restrict(tier[i], Dom::singleton(1)).is_ok()
                && engine.restrict(in_t[i], Dom::singleton(1)).is_ok();
            if !ok {
                return Err(BuildError::Contradiction(
                    "fixed path cells could not be pinned".into(),
                ));
            }
        }

        // Architect has exactly one in-temple neighbor.
        engine.post(Prop::Count {
            vars: Arc::new(neighbors[architect.idx()].iter().map(|&n| in_t[n]).collect()),
            set: 1 << 1,
            min: 1,
            max: 1,
        });

        // ---- connectivity --------------------------------------------------
        engine.post(Prop::Connectivity {
            root: FOYER.idx(),
            in_temple: in_t.clone(),
            adj: (0..NUM_CELLS)
                .map(|i| neighbors[i].iter().map(|&n| (n, edge(i, n))).collect())
                .collect(),
        });

        // ---- structural rules ----------------------------------------------
        for &(a, b, _) in &pairs {
            for &t in NO_SELF_ADJACENCY.iter() {
                engine.post(Prop::NoGood {
                    lits: vec![(ty[a], t.index()), (ty[b], t.index())],
                });
            }
            let (spy, cmd) = DIRECTIONAL_PAIR;
            engine.post(Prop::NoGood {
                lits: vec![(ty[a], spy.index()), (ty[b], cmd.index())],
            });
            engine.post(Prop::NoGood {
                lits: vec![(ty[a], cmd.index()), (ty[b], spy.index())],
            });
        }

        for c in 0..NUM_CELLS {
            let ns = &neighbors[c];
            for i in 0..ns.len() {
                for j in (i + 1)..ns.len() {
                    let (n1, n2) = (ns[i], ns[j]);
                    let (e1, e2) = (edge(c, n1), edge(c, n2));
                    for &(a, b, cc) in FORBIDDEN_CHAINS.iter() {
                        engine.post(Prop::NoGood {
                            lits: vec![
                                (ty[c], b.index()),
                                (ty[n1], a.index()),
                                (ty[n2], cc.index()),
                                (e1, 1),
                                (e2, 1),
                            ],
                        });
                        if a != cc {
                            engine.post(Prop::NoGood {
                                lits: vec![
                                    (ty[c], b.index()),
                                    (ty[n1], cc.index()),
                                    (ty[n2], a.index()),
                                    (e1, 1),
                                    (e2, 1),
                                ],
                            });
                        }
                    }
                    let (spy, cmd) = DIRECTIONAL_PAIR;
                    engine.post(Prop::ChainThrough {
                        n1: ty[n1],
                        n2: ty[n2],
                        e1,
                        e2,
                        degree: degree[c],
                        spy: spy.index(),
                        cmd: cmd.index(),
                    });
                }
            }
            for &(parent, child, cap) in ADJACENCY_CAPS.iter() {
                engine.post(Prop::CappedNeighbors {
                    cell: ty[c],
                    parent: parent.index(),
                    neighbors: ns.iter().map(|&n| ty[n]).collect(),
                    child_set: 1u128 << child.index(),
                    cap: cap as u32,
                });
            }
            engine.post(Prop::RequireNeighbor {
                guard: ty[c],
                guard_set: mask_of(&REQUIRES_PATH_NEIGHBOR),
                vars: ns.iter().map(|&n| ty[n]).collect(),
                want: 1u128 << path,
            });
        }

        // ---- cardinality ---------------------------------------------------
        let all_ty = Arc::new(ty.clone());
        if req.min_spymasters > 0 {
            engine.post(Prop::Count {
                vars: Arc::clone(&all_ty),
                set: 1u128 << RoomType::Spymaster.index(),
                min: req.min_spymasters,
                max: NUM_CELLS as u32,
            });
        }
        if req.min_corruption_chambers > 0 {
            engine.post(Prop::Count {
                vars: Arc::clone(&all_ty),
                set: 1u128 << RoomType::CorruptionChamber.index(),
                min: req.min_corruption_chambers,
                max: NUM_CELLS as u32,
            });
        }
        for &t in UNIQUE_TYPES.iter() {
            engine.post(Prop::Count {
                vars: Arc::clone(&all_ty),
                set: 1u128 << t.index(),
                min: 0,
                max: 1,
            });
        }

        // Path cap over solver-chosen cells: the two fixed path cells never
        // count, and neither do locked user-supplied path tiles.
        let mut locked_paths: Vec<usize> = Vec::new();
        if req.lock_existing {
            locked_paths = req
                .existing_paths
                .iter()
                .map(|p| p.pos().idx())
                .filter(|&i| !is_fixed(i))
                .collect();
        }
        let cap_cells: Vec<VarId> = (0..NUM_CELLS)
            .filter(|&i| !is_fixed(i) && !locked_paths.contains(&i))
            .map(|i| ty[i])
            .collect();
        engine.post(Prop::Count {
            vars: Arc::new(cap_cells),
            set: 1u128 << path,
            min: 0,
            max: req.max_paths,
        });

        // ---- chains --------------------------------------------------------
        let mut chain_vars = None;
        let mut chain_names = Vec::new();
        let mut num_chains = 0usize;
        if let Some(chains) = &req.chains {
            num_chains = chains.len();
            chain_names = chains.iter().map(|c| c.name.clone()).collect();
            let chain: Vec<VarId> = (0..NUM_CELLS)
                .map(|_| engine.new_var(Dom::full(num_chains as u32 + 1)))
                .collect();
            for &i in &fixed {
                if engine.restrict(chain[i], Dom::singleton(0)).is_err() {
                    return Err(BuildError::Contradiction("chain pin failed".into()));
                }
            }
            // Per-cell (chain, type) channel.
            let mut rows: Vec<(Val, Val)> = vec![(0, 0)];
            for (k, spec) in chains.iter().enumerate() {
                let k = (k + 1) as Val;
                rows.push((k, path));
                let allowed: Vec<RoomType> = if spec.room_types.is_empty() {
                    ROOM_TYPES.to_vec()
                } else {
                    spec.room_types.iter().copied().filter(|t| t.is_room()).collect()
                };
                for t in allowed {
                    rows.push((k, t.index()));
                }
            }
            let rows = Arc::new(rows);
            for i in 0..NUM_CELLS {
                if is_fixed(i) {
                    continue;
                }
                engine.post(Prop::Table2 {
                    a: chain[i],
                    b: ty[i],
                    pairs: Arc::clone(&rows),
                });
            }
            // Edges between two non-fixed cells stay inside one chain.
            for &(a, b, e) in &pairs {
                if is_fixed(a) || is_fixed(b) {
                    continue;
                }
                engine.post(Prop::SameChainIfEdge {
                    edge: e,
                    a: chain[a],
                    b: chain[b],
                });
            }
            // Per-chain per-type count windows.
            for (k, spec) in chains.iter().enumerate() {
                let k = (k + 1) as Val;
                let cells: Arc<Vec<(VarId, VarId)>> = Arc::new(
                    (0..NUM_CELLS)
                        .filter(|&i| !is_fixed(i))
                        .map(|i| (chain[i], ty[i]))
                        .collect(),
                );
                for (&t, range) in &spec.room_counts {
                    engine.post(Prop::PairCount {
                        cells: Arc::clone(&cells),
                        k,
                        set: 1u128 << t.index(),
                        min: range.min.unwrap_or(0),
                        max: range.max.unwrap_or(NUM_CELLS as u32),
                    });
                }
                if let Some(start) = spec.starting_room {
                    let foyer_ns = &neighbors[FOYER.idx()];
                    let first_ring: Vec<(VarId, VarId)> =
                        foyer_ns.iter().map(|&n| (ty[n], chain[n])).collect();
                    let mut second_ring = Vec::new();
                    for &g in foyer_ns {
                        for &s in &neighbors[g] {
                            if s != FOYER.idx() {
                                second_ring.push((ty[g], ty[s], chain[s]));
                            }
                        }
                    }
                    engine.post(Prop::StartingRoom {
                        k,
                        ty: start.index(),
                        path,
                        first_ring,
                        second_ring,
                    });
                }
            }
            chain_vars = Some(chain);
        }

        // ---- existing placements -------------------------------------------
        for r in &req.existing_rooms {
            let i = r.pos().idx();
            let (ty_dom, tier_dom) = if req.lock_existing {
                (
                    Dom::singleton(r.room_type.index()),
                    Dom::singleton(r.tier.min(3)),
                )
            } else {
                (
                    Dom::of(&[0, r.room_type.index()]),
                    Dom::of(&[0, r.tier.min(3)]),
                )
            };
            if engine.restrict(ty[i], ty_dom).is_err()
                || engine.restrict(tier[i], tier_dom).is_err()
            {
                return Err(BuildError::Contradiction(format!(
                    "conflicting locked placements at ({}, {})",
                    r.x, r.y
                )));
            }
        }
        for p in &req.existing_paths {
            let i = p.pos().idx();
            if is_fixed(i) {
                continue;
            }
            let dom = if req.lock_existing {
                Dom::singleton(path)
            } else {
                Dom::of(&[0, path])
            };
            if engine.restrict(ty[i], dom).is_err() {
                let pos = p.pos();
                return Err(BuildError::Contradiction(format!(
                    "conflicting locked placements at ({}, {})",
                    pos.x, pos.y
                )));
            }
        }

        // ---- objective -----------------------------------------------------
        let values = Arc::new(value_table(req));
        let mut objective = Objective::default();
        for i in 0..NUM_CELLS {
            if is_fixed(i) {
                continue;
            }
            objective.terms.push(ObjTerm::CellValue {
                ty: ty[i],
                tier: tier[i],
                values: Arc::clone(&values),
            });
        }
        if req.junction_penalty != 0 && max_deg >= 3 {
            for i in 0..NUM_CELLS {
                objective.terms.push(ObjTerm::Indicator {
                    var: degree[i],
                    set: (1u128 << 3) | (1u128 << 4),
                    weight: -req.junction_penalty,
                });
            }
        }
        if req.empty_penalty != 0 {
            let exempt: Vec<usize> = fixed
                .iter()
                .copied()
                .chain(architect.neighbors().map(|p| p.idx()))
                .collect();
            for i in 0..NUM_CELLS {
                if exempt.contains(&i) {
                    continue;
                }
                objective.terms.push(ObjTerm::Indicator {
                    var: in_t[i],
                    set: 1 << 0,
                    weight: -req.empty_penalty,
                });
            }
        }

        // ---- search order --------------------------------------------------
        let mut cell_order: Vec<usize> = (0..NUM_CELLS).collect();
        cell_order.sort_by_key(|&i| (Pos::from_idx(i).manhattan(FOYER), i));

        let hint_types = req
            .hints
            .iter()
            .filter(|h| Pos::new(h.x, h.y).in_bounds())
            .map(|h| (Pos::new(h.x, h.y).idx(), h.room_type))
            .collect();

        Ok(Model {
            engine,
            vars: ModelVars {
                ty,
                tier,
                in_t,
                degree,
                chain: chain_vars,
                pairs,
            },
            objective,
            chain_names,
            cell_order,
            values,
            hint_types,
            num_chains,
        })
    }

    /// Decision variables in foyer-out order with the policy's value
    /// preferences; hints take precedence at their cells.
    pub fn decisions(&self, policy: &ValuePolicy) -> Vec<Decision> {
        let mut rooms: Vec<RoomType> = ROOM_TYPES.to_vec();
        rooms.sort_by_key(|t| -self.values[t.index() as usize][3]);
        if policy.seed != 0 {
            let mut rng = rand::rngs::StdRng::seed_from_u64(policy.seed);
            rooms.shuffle(&mut rng);
        }
        let empty = RoomType::Empty.index();
        let path = RoomType::Path.index();

        let mut decisions = Vec::with_capacity(NUM_CELLS * 3);
        for &i in &self.cell_order {
            let mut prefs: Vec<Val> = Vec::with_capacity(16);
            if policy.prefer_empty {
                prefs.push(empty);
                prefs.extend(rooms.iter().map(|t| t.index()));
                prefs.push(path);
            } else {
                prefs.extend(rooms.iter().map(|t| t.index()));
                prefs.push(path);
                prefs.push(empty);
            }
            if let Some(&h) = self.hint_types.get(&i) {
                prefs.retain(|&v| v != h.index());
                prefs.insert(0, h.index());
            }
            decisions.push(Decision {
                var: self.vars.ty[i],
                prefs,
            });
            decisions.push(Decision {
                var: self.vars.tier[i],
                prefs: vec![3, 2, 1, 0],
            });
            if let Some(chain) = &self.vars.chain {
                decisions.push(Decision {
                    var: chain[i],
                    prefs: (0..=self.num_chains as Val).collect(),
                });
            }
        }
        decisions
    }
}
