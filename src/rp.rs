//! The Roth-Peranson (1999) matching engine.
//!
//! Two nested deferred-acceptance phases: first standard applicant-proposing
//! deferred acceptance over the single applicants, then couples are introduced
//! one at a time. A couple proposes pairs in list order; installing a pair may
//! bump applicants, and a bumped couple member *rolls back* the whole couple:
//! both partners are withdrawn in one step and the couple re-proposes from the
//! top of its list. Vacancies opened by withdrawals are re-offered to every
//! applicant that prefers them, which is what makes a quiescent state stable.
//!
//! Cycles among couples that dislodge each other are broken by a per-entity
//! round limit; with `rnd` enabled the engine restarts with a re-permuted
//! couple order after an abort.

use crate::engine::{
    install_pair, propose_single, resettle_candidates, round_limit, splitmix64, withdraw, Engine,
    EngineStats, FifoSet, MatchConfig, MatchOutcome, Resettle, RoundCounter,
};
use crate::problem::{Cid, Pid, Problem, Rid};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

// ============================================================================
// Engine
// ============================================================================

/// Roth-Peranson matcher. Construct with a [`MatchConfig`] and call
/// [`Engine::run`].
pub struct RpMatcher {
    cfg: MatchConfig,
}

impl RpMatcher {
    /// Creates a matcher with the given configuration.
    pub fn new(cfg: MatchConfig) -> Self {
        Self { cfg }
    }
}

impl Engine for RpMatcher {
    fn run(&mut self, prob: &mut Problem) -> MatchOutcome {
        let mut stats = EngineStats::default();
        let seed = self.cfg.seed.unwrap_or_else(rand::random::<u64>);
        let mut rng = SmallRng::seed_from_u64(splitmix64(seed));

        let mut order: Vec<Cid> = prob.couples().map(|c| c.id()).collect();
        let attempts = 1 + if self.cfg.rnd { self.cfg.restarts } else { 0 };

        for attempt in 0..attempts {
            if attempt > 0 {
                prob.reset_match_state();
                stats.restarts += 1;
            }
            if self.cfg.rnd {
                order.shuffle(&mut rng);
            }
            if self.attempt(prob, &order, &mut stats) {
                return MatchOutcome {
                    converged: true,
                    stats,
                };
            }
        }
        MatchOutcome {
            converged: false,
            stats,
        }
    }
}

impl RpMatcher {
    /// One full run over the instance. Returns false on a round-limit abort,
    /// leaving the last consistent match state in place.
    fn attempt(&self, prob: &mut Problem, order: &[Cid], stats: &mut EngineStats) -> bool {
        let limit = round_limit(prob, self.cfg.round_limit_factor);
        let mut single_rounds = RoundCounter::new(prob.resident_slots(), limit);
        let mut couple_rounds = RoundCounter::new(prob.couple_slots(), limit);

        let mut singles = FifoSet::<Rid>::new(prob.resident_slots());
        let mut couples = FifoSet::<Cid>::new(prob.couple_slots());
        let mut dirty = FifoSet::<Pid>::new(prob.program_slots());
        let mut introduced = vec![false; prob.couple_slots()];

        let single_ids: Vec<Rid> = prob
            .residents()
            .filter(|r| !r.in_couple())
            .map(|r| r.id())
            .collect();
        for r in single_ids {
            singles.push_back(r);
        }
        let mut pending = order.iter().copied();

        loop {
            // Bumped and requeued singles settle before anything else.
            if let Some(r) = singles.pop() {
                if !single_rounds.note(r.idx()) {
                    return false;
                }
                stats.single_rounds += 1;
                let bumped = propose_single(prob, &mut dirty, r, stats);
                self.settle_bumped(prob, &mut singles, &mut couples, &mut dirty, &introduced, bumped, stats);
                continue;
            }
            // Freed capacity is re-offered before the next couple moves.
            if let Some(p) = dirty.pop() {
                for cand in resettle_candidates(prob, p) {
                    match cand {
                        Resettle::Single(r) => {
                            if singles.push_back(r) {
                                stats.resettles += 1;
                            }
                        }
                        Resettle::Couple(c, _) => {
                            if introduced[c.idx()] && couples.push_back(c) {
                                stats.resettles += 1;
                            }
                        }
                    }
                }
                continue;
            }
            if let Some(c) = couples.pop() {
                if !couple_rounds.note(c.idx()) {
                    return false;
                }
                stats.couple_rounds += 1;
                let bumped = self.propose_couple(prob, &mut dirty, c, stats);
                self.settle_bumped(prob, &mut singles, &mut couples, &mut dirty, &introduced, bumped, stats);
                continue;
            }
            // Couples enter one at a time, in pool order.
            if let Some(c) = pending.next() {
                introduced[c.idx()] = true;
                couples.push_back(c);
                continue;
            }
            return true;
        }
    }

    /// A couple's proposal round. The couple is withdrawn up front, then pairs
    /// are tried in list order up to (and including) the current match; the
    /// current pair always fits again, so a couple that fails to improve keeps
    /// what it had. Queried after withdrawal so a couple never blocks itself.
    fn propose_couple(
        &self,
        prob: &mut Problem,
        dirty: &mut FifoSet<Pid>,
        c: Cid,
        stats: &mut EngineStats,
    ) -> Vec<Rid> {
        let cur = prob.cpl_matched(c);
        let cur_rank = prob.cpl_rank(c, cur);
        let (r1, r2) = {
            let cpl = prob.couple(c);
            (cpl.r1(), cpl.r2())
        };
        withdraw(prob, dirty, r1);
        withdraw(prob, dirty, r2);

        let rol_len = prob.couple(c).rol().len();
        for i in 0..rol_len {
            if i > cur_rank {
                break;
            }
            let pair = prob.couple(c).rol()[i];
            if let Some(bumped) = install_pair(prob, c, pair) {
                stats.bumps += bumped.len() as u64;
                return bumped;
            }
        }
        Vec::new()
    }

    /// Routes bumped applicants: singles re-enter the single sub-loop at the
    /// front; a bumped couple member withdraws the partner in the same step
    /// and the whole couple is requeued (the rollback of the couple phase).
    #[allow(clippy::too_many_arguments)]
    fn settle_bumped(
        &self,
        prob: &mut Problem,
        singles: &mut FifoSet<Rid>,
        couples: &mut FifoSet<Cid>,
        dirty: &mut FifoSet<Pid>,
        introduced: &[bool],
        bumped: Vec<Rid>,
        stats: &mut EngineStats,
    ) {
        for b in bumped {
            if prob.res_in_couple(b) {
                let c = prob.res_couple(b);
                debug_assert!(introduced[c.idx()], "unintroduced couple cannot hold a seat");
                let partner = prob.res_partner(b);
                withdraw(prob, dirty, partner);
                if couples.push_back(c) {
                    stats.rollbacks += 1;
                }
            } else {
                singles.push_front(b);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
