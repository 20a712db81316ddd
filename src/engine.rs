//! Engine configuration and the deferred-acceptance plumbing shared by the
//! Roth-Peranson and Kojima-Pathak-Roth engines.
//!
//! Both engines drive the same primitives against the problem model:
//! withdrawing an applicant, running a single applicant's proposal round,
//! installing a couple's pair after withdrawal, and resettling applicants when
//! a program vacancy opens. They differ only in proposer scheduling and in the
//! couple re-proposal discipline, which live in [`crate::rp`] and
//! [`crate::kpr`].

use crate::problem::{Cid, Pid, PidPair, Problem, Rid};
use std::collections::VecDeque;
use std::io;

// ============================================================================
// Configuration
// ============================================================================

/// Which matching engine to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algo {
    /// Roth-Peranson (1999): single phase, then couples with rollback.
    RothPeranson,
    /// Kojima-Pathak-Roth appendix B.2: unified proposer queue.
    KojimaPathakRoth,
}

impl Algo {
    /// Maps the CLI algorithm code (`0` or `2`) to an engine.
    ///
    /// Code `1` is unassigned and rejected.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Algo::RothPeranson),
            2 => Some(Algo::KojimaPathakRoth),
            _ => None,
        }
    }
}

/// Matching engine parameters.
#[derive(Clone, Debug)]
pub struct MatchConfig {
    /// Engine selection.
    pub algo: Algo,
    /// Re-permute the couple order on each restart (Roth-Peranson only).
    pub rnd: bool,
    /// Optional deterministic seed for couple-order shuffling.
    pub seed: Option<u64>,
    /// Per-entity round limit factor: no single applicant or couple is
    /// processed more than `factor * (|applicants| + |couples|)` times
    /// (with a small floor for tiny instances).
    pub round_limit_factor: usize,
    /// Number of re-randomized restarts after a round-limit abort.
    /// Only effective for Roth-Peranson with `rnd` enabled.
    pub restarts: u32,
    /// Verbosity (0..3); only the binaries consult this.
    pub verbosity: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            algo: Algo::RothPeranson,
            rnd: false,
            seed: None,
            round_limit_factor: 8,
            restarts: 1,
            verbosity: 1,
        }
    }
}

// ============================================================================
// Outcome and statistics
// ============================================================================

/// Counters accumulated over a matching run.
#[derive(Clone, Debug, Default)]
pub struct EngineStats {
    /// Single-applicant proposal rounds.
    pub single_rounds: u64,
    /// Couple proposal rounds.
    pub couple_rounds: u64,
    /// Applicants bumped out of a program by a better proposal.
    pub bumps: u64,
    /// Couples displaced and requeued after a member was bumped.
    pub rollbacks: u64,
    /// Applicants requeued because a vacancy opened at a preferred program.
    pub resettles: u64,
    /// Full restarts after hitting the round limit.
    pub restarts: u32,
}

impl EngineStats {
    /// Writes the counters as `#`-prefixed informational lines.
    pub fn write<W: io::Write>(&self, mut w: W) -> io::Result<()> {
        writeln!(w, "#Engine Stats:")?;
        writeln!(w, "#Single proposal rounds: {}", self.single_rounds)?;
        writeln!(w, "#Couple proposal rounds: {}", self.couple_rounds)?;
        writeln!(w, "#Bumped applicants: {}", self.bumps)?;
        writeln!(w, "#Couple rollbacks: {}", self.rollbacks)?;
        writeln!(w, "#Vacancy requeues: {}", self.resettles)?;
        writeln!(w, "#Restarts: {}", self.restarts)?;
        Ok(())
    }
}

/// Result of a matching run. The assignment itself lives in the [`Problem`].
#[derive(Clone, Debug)]
pub struct MatchOutcome {
    /// Whether the engine reached quiescence within the round limit.
    /// When false, the problem holds the last consistent (unverified) state.
    pub converged: bool,
    /// Run counters.
    pub stats: EngineStats,
}

/// A matching engine operating on a shared problem model.
pub trait Engine {
    /// Runs the engine to quiescence or the round limit, mutating the
    /// problem's match state in place.
    fn run(&mut self, prob: &mut Problem) -> MatchOutcome;
}

/// Runs the engine selected by `cfg.algo`.
pub fn run_match(prob: &mut Problem, cfg: &MatchConfig) -> MatchOutcome {
    match cfg.algo {
        Algo::RothPeranson => crate::rp::RpMatcher::new(cfg.clone()).run(prob),
        Algo::KojimaPathakRoth => crate::kpr::KprMatcher::new(cfg.clone()).run(prob),
    }
}

// ============================================================================
// Seeding
// ============================================================================

/// SplitMix64 finalizer, used to spread user-provided seeds.
pub(crate) fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

// ============================================================================
// Work queues and round accounting
// ============================================================================

pub(crate) trait Slot: Copy {
    fn slot(self) -> usize;
}

impl Slot for Rid {
    fn slot(self) -> usize {
        self.idx()
    }
}

impl Slot for Cid {
    fn slot(self) -> usize {
        self.idx()
    }
}

impl Slot for Pid {
    fn slot(self) -> usize {
        self.idx()
    }
}

/// A proposer in the unified KPR queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Proposer {
    Single(Rid),
    Couple(Cid),
}

impl Slot for Proposer {
    fn slot(self) -> usize {
        match self {
            Proposer::Single(r) => 2 * r.idx(),
            Proposer::Couple(c) => 2 * c.idx() + 1,
        }
    }
}

/// FIFO with membership flags: an entity is enqueued at most once at a time.
pub(crate) struct FifoSet<T: Slot> {
    queue: VecDeque<T>,
    queued: Vec<bool>,
}

impl<T: Slot> FifoSet<T> {
    pub fn new(slots: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            queued: vec![false; slots],
        }
    }

    /// Enqueues at the back; returns false if already queued.
    pub fn push_back(&mut self, t: T) -> bool {
        if self.queued[t.slot()] {
            return false;
        }
        self.queued[t.slot()] = true;
        self.queue.push_back(t);
        true
    }

    /// Enqueues at the front; returns false if already queued.
    pub fn push_front(&mut self, t: T) -> bool {
        if self.queued[t.slot()] {
            return false;
        }
        self.queued[t.slot()] = true;
        self.queue.push_front(t);
        true
    }

    pub fn pop(&mut self) -> Option<T> {
        let t = self.queue.pop_front()?;
        self.queued[t.slot()] = false;
        Some(t)
    }
}

/// Per-entity processing counter with a shared cap.
pub(crate) struct RoundCounter {
    counts: Vec<u64>,
    limit: u64,
}

impl RoundCounter {
    pub fn new(slots: usize, limit: u64) -> Self {
        Self {
            counts: vec![0; slots],
            limit,
        }
    }

    /// Records one processing round; false once the entity exceeds the cap.
    pub fn note(&mut self, slot: usize) -> bool {
        self.counts[slot] += 1;
        self.counts[slot] <= self.limit
    }
}

/// The per-entity round cap for this instance.
pub(crate) fn round_limit(prob: &Problem, factor: usize) -> u64 {
    let entities = prob.residents().count() + prob.couples().count();
    ((factor * entities) as u64).max(64)
}

// ============================================================================
// Shared deferred-acceptance primitives
// ============================================================================

/// Removes `r` from its current program, if any, and marks that program dirty
/// so freed capacity gets reconsidered.
pub(crate) fn withdraw(prob: &mut Problem, dirty: &mut FifoSet<Pid>, r: Rid) {
    let p = prob.res_matched(r);
    if p.is_nil() {
        return;
    }
    prob.prog_unmatch(p, r);
    prob.set_res_match(r, Pid::NIL);
    dirty.push_back(p);
}

/// One proposal round for a single applicant: scan the ROL from the top for
/// the first program strictly better than the current match that will take
/// them, move there, and return whoever got bumped (match fields cleared).
pub(crate) fn propose_single(
    prob: &mut Problem,
    dirty: &mut FifoSet<Pid>,
    r: Rid,
    stats: &mut EngineStats,
) -> Vec<Rid> {
    let cur = prob.res_matched(r);
    let cur_rank = prob.res_rank(r, cur);
    let rol_len = prob.resident(r).rol().len();
    for i in 0..rol_len.min(cur_rank) {
        let p = prob.resident(r).rol()[i];
        if !prob.prog_will_accept(p, r) {
            continue;
        }
        withdraw(prob, dirty, r);
        let bumped = prob.prog_match(p, r);
        prob.set_res_match(r, p);
        for &b in &bumped {
            prob.set_res_match(b, Pid::NIL);
        }
        stats.bumps += bumped.len() as u64;
        return bumped;
    }
    Vec::new()
}

/// Attempts to install `pair` for couple `c`. Both members must already be
/// withdrawn. Returns `None` if either side rejects; on success both match
/// fields are set and the bumped applicants are returned with cleared fields.
pub(crate) fn install_pair(prob: &mut Problem, c: Cid, pair: PidPair) -> Option<Vec<Rid>> {
    let (r1, r2) = {
        let cpl = prob.couple(c);
        (cpl.r1(), cpl.r2())
    };
    debug_assert!(
        prob.res_matched(r1).is_nil() && prob.res_matched(r2).is_nil(),
        "couple must be withdrawn before proposing"
    );
    let (p, q) = pair;
    let mut bumped = Vec::new();
    if p == q {
        if !p.is_nil() {
            if !prob.prog_will_accept_pair(p, r1, r2) {
                return None;
            }
            bumped = prob.prog_match_pair(p, r1, r2);
        }
    } else {
        let ok1 = p.is_nil() || prob.prog_will_accept(p, r1);
        let ok2 = q.is_nil() || prob.prog_will_accept(q, r2);
        if !(ok1 && ok2) {
            return None;
        }
        if !p.is_nil() {
            bumped.extend(prob.prog_match(p, r1));
        }
        if !q.is_nil() {
            bumped.extend(prob.prog_match(q, r2));
        }
    }
    prob.set_cpl_match(c, pair);
    for &b in &bumped {
        prob.set_res_match(b, Pid::NIL);
    }
    Some(bumped)
}

/// An applicant worth requeueing after a vacancy opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Resettle {
    Single(Rid),
    /// Couple plus the rank of the best pair the vacancy re-enables.
    Couple(Cid, usize),
}

/// Finds the applicants for whom a vacancy at `p` is a strict improvement the
/// program would accept. Scanned in the program's preference order; the scan
/// stops once the program's admission threshold rejects (all worse-ranked
/// applicants are rejected too).
pub(crate) fn resettle_candidates(prob: &Problem, p: Pid) -> Vec<Resettle> {
    let mut out = Vec::new();
    let accepted = prob.program(p).accepted();
    for &r in prob.program(p).rol() {
        if accepted.contains(&r) {
            continue;
        }
        if !prob.prog_will_accept(p, r) {
            break;
        }
        if prob.res_in_couple(r) {
            let c = prob.res_couple(r);
            if let Some(rank) = prob.cpl_will_accept_with(c, p, r) {
                out.push(Resettle::Couple(c, rank));
            }
        } else if prob.res_will_accept(r, p) {
            out.push(Resettle::Single(r));
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::NIL_PAIR;

    fn parse(text: &str) -> Problem {
        Problem::parse(text).expect("problem should parse")
    }

    #[test]
    fn algo_codes_map_zero_and_two_only() {
        assert_eq!(Algo::from_code(0), Some(Algo::RothPeranson));
        assert_eq!(Algo::from_code(2), Some(Algo::KojimaPathakRoth));
        assert_eq!(Algo::from_code(1), None);
        assert_eq!(Algo::from_code(3), None);
    }

    #[test]
    fn splitmix64_spreads_small_seeds() {
        let a = splitmix64(0);
        let b = splitmix64(1);
        assert_ne!(a, b);
        assert_ne!(a, 0);
    }

    #[test]
    fn fifo_set_deduplicates_until_popped() {
        let mut q = FifoSet::<Rid>::new(4);
        assert!(q.push_back(Rid(1)));
        assert!(!q.push_back(Rid(1)));
        assert!(q.push_front(Rid(2)));
        assert_eq!(q.pop(), Some(Rid(2)));
        assert_eq!(q.pop(), Some(Rid(1)));
        assert!(q.push_back(Rid(1)));
        assert_eq!(q.pop(), Some(Rid(1)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn round_counter_trips_past_limit() {
        let mut rc = RoundCounter::new(2, 2);
        assert!(rc.note(0));
        assert!(rc.note(0));
        assert!(!rc.note(0));
        assert!(rc.note(1));
    }

    #[test]
    fn round_limit_has_a_floor() {
        let prob = parse("r 0 0\np 0 1 0\n");
        assert_eq!(round_limit(&prob, 8), 64);
    }

    #[test]
    fn propose_single_takes_best_available() {
        let mut prob = parse("r 0 0 1\nr 1 0\np 0 1 1 0\np 1 1 0\n");
        let mut dirty = FifoSet::new(prob.program_slots());
        let mut stats = EngineStats::default();
        // Applicant 1 takes program 0.
        assert!(propose_single(&mut prob, &mut dirty, Rid(1), &mut stats).is_empty());
        assert_eq!(prob.res_matched(Rid(1)), Pid(0));
        // Applicant 0 prefers program 0 but it is full with a better applicant.
        assert!(propose_single(&mut prob, &mut dirty, Rid(0), &mut stats).is_empty());
        assert_eq!(prob.res_matched(Rid(0)), Pid(1));
    }

    #[test]
    fn propose_single_bump_clears_the_victim() {
        let mut prob = parse("r 0 0\nr 1 0\np 0 1 0 1\n");
        let mut dirty = FifoSet::new(prob.program_slots());
        let mut stats = EngineStats::default();
        propose_single(&mut prob, &mut dirty, Rid(1), &mut stats);
        let bumped = propose_single(&mut prob, &mut dirty, Rid(0), &mut stats);
        assert_eq!(bumped, vec![Rid(1)]);
        assert_eq!(prob.res_matched(Rid(1)), Pid::NIL);
        assert_eq!(prob.res_matched(Rid(0)), Pid(0));
        assert_eq!(stats.bumps, 1);
    }

    #[test]
    fn withdraw_marks_the_program_dirty() {
        let mut prob = parse("r 0 0\np 0 1 0\n");
        let mut dirty = FifoSet::new(prob.program_slots());
        let mut stats = EngineStats::default();
        propose_single(&mut prob, &mut dirty, Rid(0), &mut stats);
        withdraw(&mut prob, &mut dirty, Rid(0));
        assert_eq!(dirty.pop(), Some(Pid(0)));
        assert!(prob.program(Pid(0)).accepted().is_empty());
        assert_eq!(prob.res_matched(Rid(0)), Pid::NIL);
    }

    #[test]
    fn install_pair_same_program_places_both() {
        let mut prob = parse("c 0 0 1 2 2\np 2 2 0 1\n");
        let bumped = install_pair(&mut prob, Cid(0), (Pid(2), Pid(2))).expect("accepted");
        assert!(bumped.is_empty());
        assert_eq!(prob.cpl_matched(Cid(0)), (Pid(2), Pid(2)));
        assert_eq!(prob.program(Pid(2)).accepted(), &[Rid(0), Rid(1)]);
    }

    #[test]
    fn install_pair_rejects_without_side_effects() {
        let mut prob = parse("c 0 0 1 2 3\nr 4 2\np 2 1 4 0\np 3 1 1\n");
        // Fill program 2 with the applicant it prefers.
        prob.prog_match(Pid(2), Rid(4));
        prob.set_res_match(Rid(4), Pid(2));
        assert!(install_pair(&mut prob, Cid(0), (Pid(2), Pid(3))).is_none());
        assert_eq!(prob.cpl_matched(Cid(0)), NIL_PAIR);
        assert!(prob.program(Pid(3)).accepted().is_empty());
        assert_eq!(prob.program(Pid(2)).accepted(), &[Rid(4)]);
    }

    #[test]
    fn install_pair_with_nil_side_places_one_member() {
        let mut prob = parse("c 0 0 1 2 -1\np 2 1 0\n");
        let bumped = install_pair(&mut prob, Cid(0), (Pid(2), Pid::NIL)).expect("accepted");
        assert!(bumped.is_empty());
        assert_eq!(prob.cpl_matched(Cid(0)), (Pid(2), Pid::NIL));
        assert_eq!(prob.program(Pid(2)).accepted(), &[Rid(0)]);
    }

    #[test]
    fn install_nil_pair_is_trivial() {
        let mut prob = parse("c 0 0 1 -1 -1\n");
        let bumped = install_pair(&mut prob, Cid(0), NIL_PAIR).expect("accepted");
        assert!(bumped.is_empty());
        assert_eq!(prob.cpl_matched(Cid(0)), NIL_PAIR);
    }

    #[test]
    fn resettle_finds_single_preferring_the_vacancy() {
        let mut prob = parse("r 0 0 1\nr 1 1\np 0 1 0\np 1 1 0 1\n");
        // Applicant 0 settled for program 1; applicant 1 unmatched.
        prob.prog_match(Pid(1), Rid(0));
        prob.set_res_match(Rid(0), Pid(1));
        let cands = resettle_candidates(&prob, Pid(0));
        assert_eq!(cands, vec![Resettle::Single(Rid(0))]);
        // Program 1 is held by its favorite: no candidates.
        assert!(resettle_candidates(&prob, Pid(1)).is_empty());
    }

    #[test]
    fn resettle_reports_couples_with_pair_rank() {
        let mut prob = parse("c 0 0 1 2 3 4 5\np 2 1 0\np 3 1 1\np 4 1 0\np 5 1 1\n");
        // Couple settled on its second choice.
        install_pair(&mut prob, Cid(0), (Pid(4), Pid(5))).expect("accepted");
        let cands = resettle_candidates(&prob, Pid(2));
        assert_eq!(cands, vec![Resettle::Couple(Cid(0), 0)]);
    }

    #[test]
    fn resettle_ignores_applicants_matched_better() {
        let mut prob = parse("r 0 0 1\np 0 1 0\np 1 1 0\n");
        prob.prog_match(Pid(0), Rid(0));
        prob.set_res_match(Rid(0), Pid(0));
        assert!(resettle_candidates(&prob, Pid(1)).is_empty());
    }
}
