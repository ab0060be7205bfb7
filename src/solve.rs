//! Solver driver: runs a portfolio of branch-and-bound searches over the
//! built model, streams improving solutions through the lazy directional
//! gate, and assembles the final [`SolveResult`].
//!
//! Worker parallelism maps to a portfolio of search threads with distinct
//! value-ordering policies sharing one incumbent score: worker 0 prefers
//! empty cells (fast first solution), the rest lead with shuffled
//! high-value rooms. Any single worker exhausting its tree proves
//! optimality, because every worker prunes against the shared incumbent.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::board::Pos;
use crate::engine::{SearchConfig, SearchOutcome, SearchStatus, Store};
use crate::model::{BuildError, Model, ModelVars, ValuePolicy};
use crate::precheck;
use crate::request::{
    EdgeOut, PathOut, RoomOut, Solution, SolveRequest, SolveResult, SolveStats,
};
use crate::rules::{RoomType, DIRECTIONAL_PAIR};
use crate::validate::{self, CellTypes};

/// Driver options beyond what the request itself carries.
pub struct SolveOptions {
    /// Portfolio width; defaults to the host parallelism.
    pub workers: usize,
    /// Cooperative abort flag checked by every worker.
    pub abort: Option<Arc<AtomicBool>>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        SolveOptions {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            abort: None,
        }
    }
}

struct Extracted {
    rooms: Vec<RoomOut>,
    paths: Vec<PathOut>,
    edges: Vec<EdgeOut>,
    cells: CellTypes,
}

/// Read one finished layout out of a fixed store.
fn extract(store: &Store, vars: &ModelVars, chain_names: &[String], architect: Pos) -> Extracted {
    let foyer_idx = crate::board::FOYER.idx();
    let arch_idx = architect.idx();
    let mut rooms = Vec::new();
    let mut paths = Vec::new();
    let mut cells: CellTypes = vec![None; vars.ty.len()];
    for (i, &tv) in vars.ty.iter().enumerate() {
        let t = RoomType::from_index(store.dom(tv).min()).unwrap_or(RoomType::Empty);
        if t == RoomType::Empty {
            continue;
        }
        cells[i] = Some(t);
        if i == foyer_idx || i == arch_idx {
            continue;
        }
        let chain = vars.chain.as_ref().and_then(|cv| {
            let k = store.dom(cv[i]).min() as usize;
            (k >= 1).then(|| chain_names[k - 1].clone())
        });
        let pos = Pos::from_idx(i);
        if t == RoomType::Path {
            paths.push(PathOut {
                x: pos.x,
                y: pos.y,
                chain,
            });
        } else {
            rooms.push(RoomOut {
                room_type: t,
                tier: store.dom(vars.tier[i]).min(),
                x: pos.x,
                y: pos.y,
                chain,
            });
        }
    }
    let edges = vars
        .pairs
        .iter()
        .filter(|&&(_, _, e)| store.dom(e).min() == 1)
        .map(|&(a, b, _)| EdgeOut::new(Pos::from_idx(a), Pos::from_idx(b)))
        .collect();
    Extracted {
        rooms,
        paths,
        edges,
        cells,
    }
}

#[derive(Default)]
struct BestTracker {
    best: Option<Solution>,
    best_score: i64,
    considered: u64,
    reported: u64,
    rejected: u64,
    /// A directional-rejected layout outscored the best valid one; the
    /// final result may then not claim optimality.
    rejected_above_best: bool,
}

fn stats_skeleton(hints: Vec<String>, workers: usize) -> SolveStats {
    SolveStats {
        status: String::new(),
        solutions_considered: 0,
        solutions_reported: 0,
        nodes: 0,
        conflicts: 0,
        wall_time_seconds: 0.0,
        workers,
        directional_check: "not_applicable".into(),
        diagnostic_hints: hints,
    }
}

/// Run the whole pipeline for one request: pre-check, model build,
/// portfolio search with streaming, final validation, result assembly.
/// `on_best` fires for every accepted improving solution, monotonically by
/// score.
pub fn run<F>(req: &SolveRequest, opts: &SolveOptions, on_best: F) -> SolveResult
where
    F: Fn(&Solution) + Sync,
{
    let started = Instant::now();
    let hints = precheck::feasibility_hints(req);
    let workers = opts.workers.max(1);

    if let Err(msg) = req.validate() {
        let mut stats = stats_skeleton(hints, workers);
        stats.status = "invalid".into();
        stats.wall_time_seconds = started.elapsed().as_secs_f64();
        return SolveResult::failure(msg, stats);
    }

    // Surface build-time infeasibility (off-grid architect, colliding
    // locks) before spinning up the portfolio.
    if let Err(e) = Model::build(req) {
        let mut stats = stats_skeleton(hints, workers);
        stats.status = match e {
            BuildError::Contradiction(_) => "infeasible".into(),
            _ => "invalid".into(),
        };
        stats.wall_time_seconds = started.elapsed().as_secs_f64();
        return SolveResult::failure(e.to_string(), stats);
    }

    let deadline = started + Duration::from_secs_f64(req.max_time_seconds.max(0.05));
    let architect = req.architect_pos();
    let lazy = req.lazy_directional_check;
    let incumbent = AtomicI64::new(i64::MIN);
    let tracker = Mutex::new(BestTracker::default());
    let outcomes: Mutex<Vec<SearchOutcome>> = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for w in 0..workers {
            let policy = ValuePolicy {
                prefer_empty: w == 0,
                seed: if w == 0 { 0 } else { 0x9e37_79b9 ^ w as u64 },
            };
            let tracker = &tracker;
            let outcomes = &outcomes;
            let incumbent = &incumbent;
            let on_best = &on_best;
            let abort = opts.abort.clone();
            scope.spawn(move || {
                let Ok(mut model) = Model::build(req) else {
                    return;
                };
                let decisions = model.decisions(&policy);
                let chain_names = model.chain_names.clone();
                let cfg = SearchConfig {
                    deadline: Some(deadline),
                    abort,
                };
                let (engine, vars) = (&mut model.engine, &model.vars);
                let objective = &model.objective;
                let mut callback = |store: &Store, score: i64| -> bool {
                    let mut t = tracker.lock().expect("tracker poisoned");
                    t.considered += 1;
                    if t.best.is_some() && score <= t.best_score {
                        return true;
                    }
                    let ext = extract(store, vars, &chain_names, architect);
                    let has_pair = ext.rooms.iter().any(|r| r.room_type == DIRECTIONAL_PAIR.0)
                        && ext.rooms.iter().any(|r| r.room_type == DIRECTIONAL_PAIR.1);
                    if lazy && has_pair {
                        if let Some(path) = validate::directional_violation(&ext.cells) {
                            debug!(score, ?path, "discarding solution: directional rule");
                            t.rejected += 1;
                            if t.best.is_none() || score > t.best_score {
                                t.rejected_above_best = true;
                            }
                            return true;
                        }
                    }
                    t.reported += 1;
                    t.best_score = score;
                    // A valid layout at this score supersedes any rejected
                    // one seen earlier.
                    t.rejected_above_best = false;
                    let solution = Solution {
                        score,
                        rooms: ext.rooms,
                        paths: ext.paths,
                        edges: ext.edges,
                        chain_names: (!chain_names.is_empty()).then(|| chain_names.clone()),
                        solution_count: t.reported,
                    };
                    on_best(&solution);
                    t.best = Some(solution);
                    true
                };
                let outcome = engine.solve(&decisions, objective, incumbent, &cfg, &mut callback);
                debug!(worker = w, ?outcome, "portfolio worker done");
                outcomes.lock().expect("outcomes poisoned").push(outcome);
            });
        }
    });

    let outcomes = outcomes.into_inner().unwrap_or_default();
    let tracker = tracker.into_inner().unwrap_or_default();
    let proven = outcomes.iter().any(|o| o.status == SearchStatus::Exhausted);
    let aborted = opts
        .abort
        .as_ref()
        .map(|a| a.load(Ordering::Relaxed))
        .unwrap_or(false);

    let mut stats = stats_skeleton(hints, workers);
    stats.solutions_considered = tracker.considered;
    stats.solutions_reported = tracker.reported;
    stats.nodes = outcomes.iter().map(|o| o.nodes).sum();
    stats.conflicts = outcomes.iter().map(|o| o.conflicts).sum();
    stats.wall_time_seconds = started.elapsed().as_secs_f64();

    match tracker.best {
        Some(best) => {
            // Hints describe likely infeasibility; they ride on error
            // responses only.
            stats.diagnostic_hints.clear();
            let cells = validate::cells_of(&best.rooms, &best.paths, architect);
            stats.directional_check = match validate::directional_violation(&cells) {
                Some(_) => "violated".into(),
                None => {
                    let has_pair = best.rooms.iter().any(|r| r.room_type == DIRECTIONAL_PAIR.0)
                        && best.rooms.iter().any(|r| r.room_type == DIRECTIONAL_PAIR.1);
                    if has_pair {
                        "passed".into()
                    } else {
                        "not_applicable".into()
                    }
                }
            };
            let optimal = proven && !tracker.rejected_above_best && !aborted;
            stats.status = if aborted {
                "aborted".into()
            } else if optimal {
                "optimal".into()
            } else {
                "feasible".into()
            };
            let excluded = excluded_rooms(req, &best.rooms);
            SolveResult {
                success: true,
                optimal,
                score: best.score,
                rooms: best.rooms,
                paths: best.paths,
                edges: best.edges,
                stats,
                chain_names: best.chain_names,
                excluded_rooms: excluded,
                error: None,
            }
        }
        None => {
            let (status, error) = if aborted {
                ("aborted", "solve aborted before any feasible layout was found".to_string())
            } else if proven && tracker.considered > 0 {
                (
                    "infeasible",
                    "every layout found violated the directional rule".to_string(),
                )
            } else if proven {
                let detail = if stats.diagnostic_hints.is_empty() {
                    "no feasible layout exists".to_string()
                } else {
                    format!("no feasible layout: {}", stats.diagnostic_hints.join("; "))
                };
                ("infeasible", detail)
            } else {
                let detail = if stats.diagnostic_hints.is_empty() {
                    "time limit reached without finding a feasible layout".to_string()
                } else {
                    format!(
                        "time limit reached without a feasible layout: {}",
                        stats.diagnostic_hints.join("; ")
                    )
                };
                ("timeout", detail)
            };
            stats.status = status.into();
            SolveResult::failure(error, stats)
        }
    }
}

/// Rooms the caller supplied that the optimizer left out (only meaningful
/// when existing placements are optional).
fn excluded_rooms(req: &SolveRequest, placed: &[RoomOut]) -> Option<Vec<RoomOut>> {
    if req.lock_existing || req.existing_rooms.is_empty() {
        return None;
    }
    let missing: Vec<RoomOut> = req
        .existing_rooms
        .iter()
        .filter(|r| !placed.iter().any(|p| p.x == r.x && p.y == r.y))
        .map(|r| RoomOut {
            room_type: r.room_type,
            tier: r.tier,
            x: r.x,
            y: r.y,
            chain: None,
        })
        .collect();
    (!missing.is_empty()).then_some(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Pos;
    use crate::request::ExistingRoom;

    fn quick_opts() -> SolveOptions {
        SolveOptions {
            workers: 1,
            abort: None,
        }
    }

    /// The smallest satisfiable problem: architect right next to the
    /// foyer, no minimums. The empty-first worker lands the all-empty
    /// layout immediately.
    #[test]
    fn trivial_request_solves() {
        let mut req = SolveRequest::new(Pos::new(4, 1));
        req.min_spymasters = 0;
        req.min_corruption_chambers = 0;
        req.max_time_seconds = 1.0;
        let result = run(&req, &quick_opts(), |_| {});
        assert!(result.success, "error: {:?}", result.error);
        assert!(result.score >= 0);
        let violations =
            validate::check_invariants(&req, &result.rooms, &result.paths, &edge_pairs(&result));
        assert!(violations.is_empty(), "violations: {violations:?}");
    }

    #[test]
    fn impossible_minimums_fail_with_capacity_hint() {
        let mut req = SolveRequest::new(Pos::new(4, 1));
        req.min_spymasters = 99;
        req.min_corruption_chambers = 0;
        req.max_time_seconds = 1.0;
        let result = run(&req, &quick_opts(), |_| {});
        assert!(!result.success);
        assert!(!result.stats.diagnostic_hints.is_empty());
        assert!(result.error.unwrap_or_default().contains("capacity"));
    }

    #[test]
    fn locked_self_adjacency_fails_fast() {
        let mut req = SolveRequest::new(Pos::new(8, 8));
        req.min_spymasters = 0;
        req.min_corruption_chambers = 0;
        req.max_time_seconds = 5.0;
        req.existing_rooms = vec![
            ExistingRoom {
                room_type: RoomType::Garrison,
                tier: 3,
                x: 5,
                y: 2,
            },
            ExistingRoom {
                room_type: RoomType::Garrison,
                tier: 3,
                x: 5,
                y: 3,
            },
        ];
        let result = run(&req, &quick_opts(), |_| {});
        assert!(!result.success);
        assert_eq!(result.stats.status, "infeasible");
        assert!(result
            .stats
            .diagnostic_hints
            .iter()
            .any(|h| h.contains("Garrison")));
    }

    #[test]
    fn streamed_best_is_monotonic() {
        let mut req = SolveRequest::new(Pos::new(4, 1));
        req.min_spymasters = 0;
        req.min_corruption_chambers = 0;
        req.max_time_seconds = 1.0;
        let scores = Mutex::new(Vec::new());
        let result = run(&req, &quick_opts(), |s| {
            scores.lock().expect("scores").push(s.score)
        });
        assert!(result.success);
        let scores = scores.into_inner().expect("scores");
        assert!(!scores.is_empty());
        assert!(scores.windows(2).all(|w| w[0] < w[1]), "{scores:?}");
    }

    #[test]
    fn abort_before_start_reports_aborted() {
        let mut req = SolveRequest::new(Pos::new(4, 1));
        req.min_spymasters = 0;
        req.min_corruption_chambers = 0;
        req.max_time_seconds = 30.0;
        let flag = Arc::new(AtomicBool::new(true));
        let opts = SolveOptions {
            workers: 1,
            abort: Some(flag),
        };
        let result = run(&req, &opts, |_| {});
        // A cooperative abort may still land the first trivial solutions
        // found before the flag check; either way the status says aborted.
        assert_eq!(result.stats.status, "aborted");
    }

    /// Full mid-grid run; slow on small machines, so opt-in. The hints
    /// trace a compatible corridor of rooms from the foyer to the
    /// architect, which the first worker picks up immediately.
    #[test]
    #[ignore]
    fn mid_grid_architect_finds_a_layout() {
        let mut req = SolveRequest::new(Pos::new(5, 5));
        req.min_spymasters = 0;
        req.min_corruption_chambers = 0;
        req.max_time_seconds = 10.0;
        req.hints = vec![
            crate::request::Hint {
                x: 5,
                y: 2,
                room_type: RoomType::Garrison,
            },
            crate::request::Hint {
                x: 5,
                y: 3,
                room_type: RoomType::LegionBarracks,
            },
            crate::request::Hint {
                x: 5,
                y: 4,
                room_type: RoomType::Armoury,
            },
        ];
        let result = run(&req, &quick_opts(), |_| {});
        assert!(result.success, "error: {:?}", result.error);
        let violations =
            validate::check_invariants(&req, &result.rooms, &result.paths, &edge_pairs(&result));
        assert!(violations.is_empty(), "violations: {violations:?}");
    }

    fn edge_pairs(result: &SolveResult) -> Vec<(Pos, Pos)> {
        result
            .edges
            .iter()
            .map(|e| (Pos::new(e.from.x, e.from.y), Pos::new(e.to.x, e.to.y)))
            .collect()
    }
}
