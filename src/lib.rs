//! # rpmatch
//!
//! A matching engine for NRMP-style markets: capacity-limited programs on one
//! side, single applicants and *couples* on the other. Couples rank **pairs**
//! of programs (either side of a pair may be the nil program, meaning that
//! partner stays unmatched), which makes the market one for which a stable
//! matching need not exist and no polynomial algorithm is known. The engines
//! here are therefore heuristics: deferred acceptance with rollback.
//!
//! This crate provides:
//! - An arena-style problem model with cheap rank and will-accept queries.
//! - Two matching engines sharing that model: the Roth-Peranson (1999)
//!   two-phase search with couple rollback, and the Kojima-Pathak-Roth
//!   appendix B.2 variant with a unified proposer queue.
//! - A verifier that decides whether an assignment is stable against the
//!   original preferences, collecting every violation it finds.
//! - A Mallows-model random instance generator.
//!
//! ## Quick Start
//!
//! ```
//! use rpmatch::engine::{run_match, MatchConfig};
//! use rpmatch::problem::Problem;
//! use rpmatch::verify::check_stability;
//!
//! let mut prob = Problem::parse(
//!     "r 0 0 1\n\
//!      r 1 0 1\n\
//!      p 0 1 0 1\n\
//!      p 1 1 1 0\n",
//! )
//! .expect("valid problem");
//!
//! let outcome = run_match(&mut prob, &MatchConfig::default());
//! assert!(outcome.converged);
//! assert!(check_stability(&prob).is_empty());
//! ```
//!
//! ## Modules
//!
//! - [`problem`]: problem model, problem-file parsing, sanitization.
//! - [`engine`]: engine configuration and shared deferred-acceptance plumbing.
//! - [`rp`]: the Roth-Peranson engine.
//! - [`kpr`]: the Kojima-Pathak-Roth engine.
//! - [`verify`]: match-file parsing and the stability verifier.
//! - [`gen`]: random instance generation.
//!
//! ## Input format
//!
//! Problems are line-oriented text: `r <rid> <pid>...` for a single applicant
//! and their rank-order list, `c <cid> <r1> <r2> <pid>...` for a couple (an
//! even count of program ids read as pairs, `-1` for the nil program), and
//! `p <pid> <quota> <rid>...` for a program. Blank lines and lines starting
//! with `#` or whitespace are ignored. Match files use `r <rid> <pid>` plus a
//! `m 0|1` claim line.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]

pub mod engine;
pub mod r#gen;
pub mod kpr;
pub mod problem;
pub mod rp;
pub mod verify;

/// Re-export commonly used types for convenience.
pub mod prelude {
    pub use crate::engine::{run_match, Algo, Engine, EngineStats, MatchConfig, MatchOutcome};
    pub use crate::r#gen::{generate, GenConfig};
    pub use crate::kpr::KprMatcher;
    pub use crate::problem::{Cid, Pid, PidPair, Problem, Rid, NIL_PAIR, UNRANKED};
    pub use crate::rp::RpMatcher;
    pub use crate::verify::{check_stability, MatchSpec, Violation};
}
