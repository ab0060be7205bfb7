//! Crate root: public surface and system-wide invariants.
//!
//! This crate computes provably optimal room layouts for a 9x9 grid temple
//! and serves them through a job-queueing HTTP façade. Cells are empty,
//! corridor tiles ("paths"), or one of fourteen typed rooms at tier 1..3.
//!
//! ## Invariants (enforced across the modules)
//!
//! - **Connection by placement.** Adjacent in-temple cells with compatible
//!   types are connected; there is no separate build step. The model binds
//!   every pair's edge variable to the type pair through one table
//!   constraint.
//! - **One component, rooted at the foyer.** Every in-temple cell reaches
//!   the fixed foyer cell `(5, 1)` through those edges; the architect cell
//!   is a path tile with exactly one in-temple neighbor.
//! - **The rule catalogue is immutable.** Compatibility, forbidden chain
//!   patterns, adjacency caps, path-neighbor requirements, self-adjacency
//!   bans, and uniqueness all live in [`rules`] as read-only tables.
//! - **The directional rule is checked, not encoded.** No commander may
//!   reach a spymaster strictly farther from the foyer through a degree-2
//!   linear chain; the driver gates improving solutions through a
//!   post-solve BFS instead of carrying order-aware variables.
//! - **Aborts are bounded.** Solves run in a subprocess; the orchestration
//!   layer terminates it (graceful signal, then kill) so abort latency
//!   never depends on solver cooperation.
//!
//! Failure modes are precise errors, never partial layouts: infeasible and
//! timed-out solves carry the feasibility pre-check's diagnostic hints.

#![forbid(unsafe_code)]

/// Grid geometry: positions, indexing, neighbor iteration.
pub mod board;
/// Constraint-propagation engine and branch-and-bound search.
pub mod engine;
/// Job orchestration: queue, worker pool, subprocess runner, rate limits.
pub mod jobs;
/// Model builder: variables, constraint catalogue, objective.
pub mod model;
/// Feasibility pre-check producing diagnostic hints.
pub mod precheck;
/// Wire types for requests, solutions, and results.
pub mod request;
/// The static rule catalogue.
pub mod rules;
/// Solver driver: portfolio search, streaming, result assembly.
pub mod solve;
/// Post-solve directional validator and invariant checks.
pub mod validate;

pub use board::{Pos, FOYER, GRID_SIZE};
pub use jobs::{JobServer, JobStatus, OrchestratorConfig, SubmitError};
pub use request::{Solution, SolveRequest, SolveResult};
pub use rules::RoomType;
pub use solve::SolveOptions;
