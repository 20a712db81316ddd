//! The Kojima-Pathak-Roth (appendix B.2) matching engine.
//!
//! Unlike Roth-Peranson there is no separate single phase: singles and couples
//! interleave in one unified proposer queue, and couples propose as units from
//! the start. The couple re-proposal discipline also differs: each couple
//! keeps a cursor into its pair list, and a displaced couple is rewound to the
//! point just before its most recently accepted pair instead of to the top of
//! the list. A vacancy that re-enables a strictly better pair rewinds the
//! cursor to that pair, which keeps quiescent states stable. KPR never
//! restarts and takes no randomization.

use crate::engine::{
    install_pair, propose_single, resettle_candidates, round_limit, Engine, EngineStats, FifoSet,
    MatchConfig, MatchOutcome, Proposer, Resettle, RoundCounter,
};
use crate::problem::{Cid, Pid, Problem, Rid};

// ============================================================================
// Engine
// ============================================================================

/// Kojima-Pathak-Roth matcher. Construct with a [`MatchConfig`] and call
/// [`Engine::run`].
pub struct KprMatcher {
    cfg: MatchConfig,
}

impl KprMatcher {
    /// Creates a matcher with the given configuration.
    pub fn new(cfg: MatchConfig) -> Self {
        Self { cfg }
    }
}

impl Engine for KprMatcher {
    fn run(&mut self, prob: &mut Problem) -> MatchOutcome {
        let mut stats = EngineStats::default();
        let limit = round_limit(prob, self.cfg.round_limit_factor);
        let mut single_rounds = RoundCounter::new(prob.resident_slots(), limit);
        let mut couple_rounds = RoundCounter::new(prob.couple_slots(), limit);

        let slots = 2 * prob.resident_slots().max(prob.couple_slots()) + 2;
        let mut queue = FifoSet::<Proposer>::new(slots);
        let mut dirty = FifoSet::<Pid>::new(prob.program_slots());

        // Per-couple proposal cursor and most recently accepted pair rank.
        let mut next: Vec<usize> = vec![0; prob.couple_slots()];
        let mut last_accepted: Vec<Option<usize>> = vec![None; prob.couple_slots()];

        let single_ids: Vec<Rid> = prob
            .residents()
            .filter(|r| !r.in_couple())
            .map(|r| r.id())
            .collect();
        for r in single_ids {
            queue.push_back(Proposer::Single(r));
        }
        let couple_ids: Vec<Cid> = prob.couples().map(|c| c.id()).collect();
        for c in couple_ids {
            queue.push_back(Proposer::Couple(c));
        }

        loop {
            // Vacancies are re-offered before the next proposal.
            if let Some(p) = dirty.pop() {
                for cand in resettle_candidates(prob, p) {
                    match cand {
                        Resettle::Single(r) => {
                            if queue.push_back(Proposer::Single(r)) {
                                stats.resettles += 1;
                            }
                        }
                        Resettle::Couple(c, rank) => {
                            next[c.idx()] = next[c.idx()].min(rank);
                            if queue.push_back(Proposer::Couple(c)) {
                                stats.resettles += 1;
                            }
                        }
                    }
                }
                continue;
            }
            let Some(prop) = queue.pop() else {
                return MatchOutcome {
                    converged: true,
                    stats,
                };
            };
            let bumped = match prop {
                Proposer::Single(r) => {
                    if !single_rounds.note(r.idx()) {
                        return MatchOutcome {
                            converged: false,
                            stats,
                        };
                    }
                    stats.single_rounds += 1;
                    propose_single(prob, &mut dirty, r, &mut stats)
                }
                Proposer::Couple(c) => {
                    if !couple_rounds.note(c.idx()) {
                        return MatchOutcome {
                            converged: false,
                            stats,
                        };
                    }
                    stats.couple_rounds += 1;
                    self.propose_couple(prob, &mut dirty, c, &mut next, &mut last_accepted, &mut stats)
                }
            };
            for b in bumped {
                if prob.res_in_couple(b) {
                    let c = prob.res_couple(b);
                    let partner = prob.res_partner(b);
                    crate::engine::withdraw(prob, &mut dirty, partner);
                    // Rewind to the point just before the pair that was lost.
                    next[c.idx()] = last_accepted[c.idx()].unwrap_or(0);
                    if queue.push_back(Proposer::Couple(c)) {
                        stats.rollbacks += 1;
                    }
                } else {
                    queue.push_front(Proposer::Single(b));
                }
            }
        }
    }
}

impl KprMatcher {
    /// A couple proposal round under the cursor discipline: withdraw both
    /// members, then scan pairs from the cursor down to (and including) the
    /// current match. On success the cursor parks at the accepted pair.
    fn propose_couple(
        &self,
        prob: &mut Problem,
        dirty: &mut FifoSet<Pid>,
        c: Cid,
        next: &mut [usize],
        last_accepted: &mut [Option<usize>],
        stats: &mut EngineStats,
    ) -> Vec<Rid> {
        let cur = prob.cpl_matched(c);
        let cur_rank = prob.cpl_rank(c, cur);
        let (r1, r2) = {
            let cpl = prob.couple(c);
            (cpl.r1(), cpl.r2())
        };
        crate::engine::withdraw(prob, dirty, r1);
        crate::engine::withdraw(prob, dirty, r2);

        let rol_len = prob.couple(c).rol().len();
        let start = next[c.idx()].min(rol_len);
        for i in start..rol_len {
            if i > cur_rank {
                break;
            }
            let pair = prob.couple(c).rol()[i];
            if let Some(bumped) = install_pair(prob, c, pair) {
                last_accepted[c.idx()] = Some(i);
                next[c.idx()] = i;
                stats.bumps += bumped.len() as u64;
                return bumped;
            }
        }
        Vec::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{NIL_PAIR, UNRANKED};
    use crate::rp::RpMatcher;
    use crate::verify::check_stability;

    fn parse(text: &str) -> Problem {
        Problem::parse(text).expect("problem should parse")
    }

    fn run_kpr(prob: &mut Problem) -> MatchOutcome {
        KprMatcher::new(MatchConfig::default()).run(prob)
    }

    fn assert_consistent(prob: &Problem) {
        for p in prob.programs() {
            assert!(p.accepted().len() <= p.quota());
            for &r in p.accepted() {
                assert_eq!(prob.res_matched(r), p.id());
            }
        }
        for r in prob.residents() {
            let m = r.matched();
            if !m.is_nil() {
                assert!(prob.program(m).accepted().contains(&r.id()));
                assert_ne!(prob.prog_rank(m, r.id()), UNRANKED);
            }
        }
    }

    #[test]
    fn singles_only_matches_like_roth_peranson() {
        let text = "r 0 0 1\nr 1 0 1\nr 2 1 0\np 0 1 0 1 2\np 1 2 2 1 0\n";
        let mut a = parse(text);
        assert!(run_kpr(&mut a).converged);
        let mut b = parse(text);
        assert!(RpMatcher::new(MatchConfig::default()).run(&mut b).converged);
        let ka: Vec<(Rid, Pid)> = a.residents().map(|r| (r.id(), r.matched())).collect();
        let kb: Vec<(Rid, Pid)> = b.residents().map(|r| (r.id(), r.matched())).collect();
        assert_eq!(ka, kb);
        assert!(check_stability(&a).is_empty());
    }

    #[test]
    fn couple_into_same_program() {
        let mut prob = parse("c 0 0 1 2 2\np 2 2 0 1\n");
        let out = run_kpr(&mut prob);
        assert!(out.converged);
        assert_eq!(prob.cpl_matched(Cid(0)), (Pid(2), Pid(2)));
        assert_consistent(&prob);
        assert!(check_stability(&prob).is_empty());
    }

    #[test]
    fn couples_propose_before_late_singles_settle() {
        // In the unified queue the couple proposes interleaved with singles;
        // program 2 prefers the couple member, so the single cannot keep it.
        let mut prob = parse("c 0 0 1 2 3\nr 2 2\np 2 1 0 2\np 3 1 1\n");
        let out = run_kpr(&mut prob);
        assert!(out.converged);
        assert_eq!(prob.cpl_matched(Cid(0)), (Pid(2), Pid(3)));
        assert_eq!(prob.res_matched(Rid(2)), Pid::NIL);
        assert_consistent(&prob);
        assert!(check_stability(&prob).is_empty());
    }

    #[test]
    fn displaced_couple_rewinds_to_its_lost_pair() {
        // Couple 0 settles on (4,5). Couple 1 bumps single 8 from program 9;
        // single 8 falls back to program 5, displacing couple 0, which retries
        // from (4,5) (now infeasible) and lands on (6,7).
        let mut prob = parse(
            "c 0 0 1 4 5 6 7\n\
             c 1 10 11 9 -1\n\
             r 8 9 5\n\
             p 4 1 0\n\
             p 5 1 8 1\n\
             p 6 1 0\n\
             p 7 1 1\n\
             p 9 1 10 8\n",
        );
        let out = run_kpr(&mut prob);
        assert!(out.converged);
        assert_eq!(prob.cpl_matched(Cid(0)), (Pid(6), Pid(7)));
        assert_eq!(prob.cpl_matched(Cid(1)), (Pid(9), Pid::NIL));
        assert_eq!(prob.res_matched(Rid(8)), Pid(5));
        assert!(out.stats.rollbacks >= 1);
        assert_consistent(&prob);
        assert!(check_stability(&prob).is_empty());
    }

    #[test]
    fn vacancy_rewinds_couple_cursor_upward() {
        // Couple 1 settles for (4,5) because couple 0 holds program 2. Couple
        // 2 then bumps couple 0's other member from program 6, rolling couple
        // 0 back out of program 2 entirely; the vacancy must rewind couple 1's
        // cursor so it climbs back up to (2,3).
        let mut prob = parse(
            "c 0 6 7 2 6\n\
             c 1 0 1 2 3 4 5\n\
             c 2 8 9 6 -1\n\
             p 2 1 6 0\n\
             p 3 1 1\n\
             p 4 1 0\n\
             p 5 1 1\n\
             p 6 1 8 7\n",
        );
        let out = run_kpr(&mut prob);
        assert!(out.converged);
        assert_eq!(prob.cpl_matched(Cid(1)), (Pid(2), Pid(3)));
        assert_eq!(prob.cpl_matched(Cid(0)), NIL_PAIR);
        assert_eq!(prob.cpl_matched(Cid(2)), (Pid(6), Pid::NIL));
        assert!(out.stats.rollbacks >= 1);
        assert!(out.stats.resettles >= 1);
        assert_consistent(&prob);
        assert!(check_stability(&prob).is_empty());
    }

    #[test]
    fn nil_sided_pairs_and_nil_pair_install() {
        let mut prob = parse("c 0 0 1 9 -1 -1 -1\np 9 0 0\n");
        // Program 9 has quota zero, so only the explicit nil pair remains.
        let out = run_kpr(&mut prob);
        assert!(out.converged);
        assert_eq!(prob.cpl_matched(Cid(0)), NIL_PAIR);
        assert!(check_stability(&prob).is_empty());
    }

    #[test]
    fn rerun_on_own_output_is_a_fixed_point() {
        let text = "r 0 0 1\nr 1 0 1\nc 0 2 3 0 1\np 0 2 0 2 1\np 1 2 3 1 0\n";
        let mut prob = parse(text);
        let out = run_kpr(&mut prob);
        assert!(out.converged);
        let snapshot: Vec<(Rid, Pid)> =
            prob.residents().map(|r| (r.id(), r.matched())).collect();
        let again = run_kpr(&mut prob);
        assert!(again.converged);
        assert_eq!(again.stats.rollbacks, 0);
        assert_eq!(again.stats.bumps, 0);
        let after: Vec<(Rid, Pid)> =
            prob.residents().map(|r| (r.id(), r.matched())).collect();
        assert_eq!(snapshot, after);
    }

    #[test]
    fn instance_without_stable_matching_aborts_at_round_limit() {
        let mut prob = parse(
            "c 0 0 1 2 3\n\
             r 4 2 3\n\
             p 2 1 0 4\n\
             p 3 1 4 1\n",
        );
        let out = run_kpr(&mut prob);
        assert!(!out.converged);
        assert_consistent(&prob);
    }
}
