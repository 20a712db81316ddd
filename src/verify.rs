//! Stability verification of a candidate assignment.
//!
//! A match file (`r <rid> <pid>` lines plus a `m 0|1` claim line) is applied
//! to a problem with the same bump semantics the engines use, then every
//! applicant is checked against the original preferences. The checker collects
//! every violation it finds instead of stopping at the first; the verifier and
//! the engines must agree, so the blocking tests mirror the engines' proposal
//! order (positional scan, early break at the current assignment).

use crate::problem::{Cid, InputError, Pid, PidPair, Problem, Rid, NIL_PAIR};
use std::fmt;
use std::fs;
use std::path::Path;

// ============================================================================
// Match files
// ============================================================================

/// A parsed match file: per-applicant assignments and the claim flag.
#[derive(Clone, Debug, Default)]
pub struct MatchSpec {
    /// `r <rid> <pid>` assignments in file order.
    pub assignments: Vec<(Rid, Pid)>,
    /// Whether the file claims a match (`m 1`); `m 0` or no `m` line means
    /// the producer found no match and there is nothing to verify.
    pub claimed: bool,
}

/// Failure to read a match file.
#[derive(Clone, Debug)]
pub enum MatchFileError {
    /// The file could not be read.
    Io(String),
    /// Accumulated validation failures.
    Input(Vec<InputError>),
}

impl fmt::Display for MatchFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchFileError::Io(msg) => write!(f, "I/O error: {msg}"),
            MatchFileError::Input(errs) => {
                for (i, e) in errs.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{e}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for MatchFileError {}

impl MatchSpec {
    /// Parses a match file. Blank lines and lines starting with `#` or
    /// whitespace are ignored; `r` and `m` lines are dispatched by their
    /// first character like problem files.
    pub fn parse(text: &str) -> Result<Self, MatchFileError> {
        let mut spec = MatchSpec::default();
        let mut errors = Vec::new();
        for line in text.lines() {
            let Some(first) = line.chars().next() else {
                continue;
            };
            if first.is_whitespace() || first == '#' {
                continue;
            }
            match first {
                'r' => read_assignment(line, &mut spec, &mut errors),
                'm' => read_claim(line, &mut spec, &mut errors),
                _ => errors.push(InputError::BadLine {
                    line: line.to_string(),
                }),
            }
        }
        if errors.is_empty() {
            Ok(spec)
        } else {
            Err(MatchFileError::Input(errors))
        }
    }

    /// Reads and parses a match file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MatchFileError> {
        let text = fs::read_to_string(path).map_err(|e| MatchFileError::Io(e.to_string()))?;
        Self::parse(&text)
    }

    /// Applies the assignments to the problem: match fields are set and each
    /// non-nil program accepts the applicant with the engines' bump semantics,
    /// so an over-quota file surfaces as a missing acceptance downstream.
    ///
    /// Fails if an assignment names an undefined applicant or program.
    pub fn apply(&self, prob: &mut Problem) -> Result<(), MatchFileError> {
        let mut errors = Vec::new();
        for &(r, p) in &self.assignments {
            let known_res =
                r.idx() < prob.resident_slots() && !prob.resident(r).id().is_nil();
            if !known_res {
                errors.push(InputError::UnknownResident { rid: i64::from(r.0) });
                continue;
            }
            if !p.is_nil()
                && (p.idx() >= prob.program_slots() || prob.program(p).id().is_nil())
            {
                errors.push(InputError::UnknownProgram { pid: i64::from(p.0) });
                continue;
            }
            prob.set_res_match(r, p);
            if !p.is_nil() {
                // Over-quota input displaces someone; they keep their claimed
                // match field and surface as "not accepted" in the check.
                let _ = prob.prog_match(p, r);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MatchFileError::Input(errors))
        }
    }
}

fn read_assignment(line: &str, spec: &mut MatchSpec, errors: &mut Vec<InputError>) {
    let mut vals = Vec::new();
    for tok in line[1..].split_whitespace() {
        match tok.parse::<i64>() {
            Ok(v) => vals.push(v),
            Err(_) => {
                errors.push(InputError::BadToken {
                    line: line.to_string(),
                    token: tok.to_string(),
                });
                return;
            }
        }
    }
    if vals.len() < 2 {
        errors.push(InputError::MissingField {
            line: line.to_string(),
        });
        return;
    }
    if vals[0] < 0 {
        errors.push(InputError::NegativeId {
            kind: "applicant",
            id: vals[0],
        });
        return;
    }
    spec.assignments
        .push((Rid(vals[0] as i32), Pid(vals[1] as i32)));
}

fn read_claim(line: &str, spec: &mut MatchSpec, errors: &mut Vec<InputError>) {
    let mut toks = line[1..].split_whitespace();
    match toks.next().map(str::parse::<i64>) {
        Some(Ok(v)) => spec.claimed = v == 1,
        _ => errors.push(InputError::MissingField {
            line: line.to_string(),
        }),
    }
}

// ============================================================================
// Violations
// ============================================================================

/// One way an assignment fails to be a stable, well-formed matching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    /// A matched applicant and program do not rank each other.
    Unreciprocated {
        /// The applicant.
        r: Rid,
        /// Their claimed program.
        p: Pid,
    },
    /// The program's accepted list does not contain the applicant.
    NotAccepted {
        /// The applicant.
        r: Rid,
        /// Their claimed program.
        p: Pid,
    },
    /// A single applicant and a program they strictly prefer would both gain.
    BlockingPair {
        /// The applicant.
        r: Rid,
        /// The preferred program that would accept them.
        p: Pid,
    },
    /// A couple is matched to a pair it does not rank.
    CoupleUnrankedPair {
        /// The couple.
        c: Cid,
        /// The claimed pair.
        pair: PidPair,
    },
    /// A program in a couple's matched pair does not rank that member.
    CoupleSideUnranked {
        /// The couple.
        c: Cid,
        /// The member.
        r: Rid,
        /// The member's claimed program.
        p: Pid,
    },
    /// A program in a couple's matched pair did not accept that member.
    CoupleSideNotAccepted {
        /// The couple.
        c: Cid,
        /// The member.
        r: Rid,
        /// The member's claimed program.
        p: Pid,
    },
    /// A couple strictly prefers a pair whose programs would both take the
    /// members.
    CoupleBlockingPair {
        /// The couple.
        c: Cid,
        /// The preferred feasible pair.
        pair: PidPair,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Unreciprocated { r, p } => {
                write!(f, "ERROR: applicant {r} = {p}: they do not rank each other")
            }
            Violation::NotAccepted { r, p } => {
                write!(f, "ERROR: applicant {r} = {p}: program did not accept")
            }
            Violation::BlockingPair { r, p } => write!(
                f,
                "ERROR: applicant {r} would match to higher ranked program {p}"
            ),
            Violation::CoupleUnrankedPair { c, pair } => write!(
                f,
                "ERROR: couple {c} = ({}, {}): does not rank its program pair",
                pair.0, pair.1
            ),
            Violation::CoupleSideUnranked { c, r, p } => write!(
                f,
                "ERROR: couple {c}: program {p} does not rank member {r}"
            ),
            Violation::CoupleSideNotAccepted { c, r, p } => write!(
                f,
                "ERROR: couple {c}: program {p} did not accept member {r}"
            ),
            Violation::CoupleBlockingPair { c, pair } => write!(
                f,
                "ERROR: couple {c} would match to higher ranked pair ({}, {})",
                pair.0, pair.1
            ),
        }
    }
}

// ============================================================================
// Stability checking
// ============================================================================

/// Checks the problem's current assignment for stability and bookkeeping
/// consistency, returning every violation found (empty means stable).
pub fn check_stability(prob: &Problem) -> Vec<Violation> {
    let mut out = Vec::new();
    let single_ids: Vec<Rid> = prob
        .residents()
        .filter(|r| !r.in_couple())
        .map(|r| r.id())
        .collect();
    for r in single_ids {
        check_single(prob, r, &mut out);
    }
    let couple_ids: Vec<Cid> = prob.couples().map(|c| c.id()).collect();
    for c in couple_ids {
        check_couple(prob, c, &mut out);
    }
    out
}

fn check_single(prob: &Problem, r: Rid, out: &mut Vec<Violation>) {
    let p = prob.res_matched(r);
    if !p.is_nil() {
        if !prob.res_is_ranked(r, p) || !prob.prog_is_ranked(p, r) {
            out.push(Violation::Unreciprocated { r, p });
        }
        if !prob.program(p).accepted().contains(&r) {
            out.push(Violation::NotAccepted { r, p });
        }
    }
    // Every program listed before the current match is strictly preferred.
    for &p0 in prob.resident(r).rol() {
        if p0 == p {
            break;
        }
        if prob.prog_will_accept(p0, r) {
            out.push(Violation::BlockingPair { r, p: p0 });
        }
    }
}

fn check_couple(prob: &Problem, c: Cid, out: &mut Vec<Violation>) {
    let pair = prob.cpl_matched(c);
    let (r1, r2) = {
        let cpl = prob.couple(c);
        (cpl.r1(), cpl.r2())
    };
    if pair != NIL_PAIR {
        if !prob.cpl_is_ranked(c, pair) {
            out.push(Violation::CoupleUnrankedPair { c, pair });
        }
        for (p, r) in [(pair.0, r1), (pair.1, r2)] {
            if p.is_nil() {
                continue;
            }
            if !prob.prog_is_ranked(p, r) {
                out.push(Violation::CoupleSideUnranked { c, r, p });
            }
            if !prob.program(p).accepted().contains(&r) {
                out.push(Violation::CoupleSideNotAccepted { c, r, p });
            }
        }
    }
    // An unmatched couple breaks at a listed nil pair, otherwise scans all.
    for &pair0 in prob.couple(c).rol() {
        if pair0 == pair {
            break;
        }
        let (a, b) = pair0;
        let blocks = if a == b {
            a.is_nil() || prob.prog_will_accept_pair(a, r1, r2)
        } else {
            (a.is_nil() || prob.prog_will_accept(a, r1))
                && (b.is_nil() || prob.prog_will_accept(b, r2))
        };
        if blocks {
            out.push(Violation::CoupleBlockingPair { c, pair: pair0 });
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{run_match, MatchConfig};

    fn parse(text: &str) -> Problem {
        Problem::parse(text).expect("problem should parse")
    }

    fn apply(prob: &mut Problem, match_text: &str) -> MatchSpec {
        let spec = MatchSpec::parse(match_text).expect("match should parse");
        spec.apply(prob).expect("match should apply");
        spec
    }

    // -------------------------------------------------------------------------
    // Match-file parsing
    // -------------------------------------------------------------------------

    #[test]
    fn parses_assignments_and_claim() {
        let spec = MatchSpec::parse("# output\nm 1\nr 0 2\nr 1 -1\n").unwrap();
        assert!(spec.claimed);
        assert_eq!(spec.assignments, vec![(Rid(0), Pid(2)), (Rid(1), Pid::NIL)]);
    }

    #[test]
    fn missing_claim_line_means_no_match() {
        let spec = MatchSpec::parse("r 0 2\n").unwrap();
        assert!(!spec.claimed);
    }

    #[test]
    fn claim_zero_means_no_match() {
        let spec = MatchSpec::parse("m 0\nr 0 -1\n").unwrap();
        assert!(!spec.claimed);
    }

    #[test]
    fn rejects_garbage_lines() {
        assert!(MatchSpec::parse("q 0 1\n").is_err());
        assert!(MatchSpec::parse("r 0 x\n").is_err());
        assert!(MatchSpec::parse("r 0\n").is_err());
        assert!(MatchSpec::parse("r -3 1\n").is_err());
    }

    #[test]
    fn apply_rejects_unknown_entities() {
        let mut prob = parse("r 0 0\np 0 1 0\n");
        let spec = MatchSpec::parse("m 1\nr 5 0\n").unwrap();
        assert!(spec.apply(&mut prob).is_err());
        let spec = MatchSpec::parse("m 1\nr 0 9\n").unwrap();
        assert!(spec.apply(&mut prob).is_err());
    }

    #[test]
    fn apply_installs_assignments_into_accepted_lists() {
        let mut prob = parse("r 0 0\nr 1 0\np 0 2 0 1\n");
        apply(&mut prob, "m 1\nr 0 0\nr 1 0\n");
        assert_eq!(prob.res_matched(Rid(0)), Pid(0));
        assert_eq!(prob.program(Pid(0)).accepted(), &[Rid(0), Rid(1)]);
    }

    // -------------------------------------------------------------------------
    // Stability checking
    // -------------------------------------------------------------------------

    #[test]
    fn accepts_a_stable_assignment() {
        let mut prob = parse("r 0 0 1\nr 1 0 1\np 0 1 0 1\np 1 1 1 0\n");
        apply(&mut prob, "m 1\nr 0 0\nr 1 1\n");
        assert!(check_stability(&prob).is_empty());
    }

    #[test]
    fn flags_blocking_pair_for_single() {
        // Applicant 0 is left unmatched while program 0 would take them.
        let mut prob = parse("r 0 0\np 0 1 0\n");
        apply(&mut prob, "m 1\nr 0 -1\n");
        assert_eq!(
            check_stability(&prob),
            vec![Violation::BlockingPair { r: Rid(0), p: Pid(0) }]
        );
    }

    #[test]
    fn flags_unreciprocated_match() {
        // Applicant 0 claims program 1, which it does not rank post-sanitization.
        let mut prob = parse("r 0 0\nr 1 1\np 0 1 0\np 1 1 1\n");
        apply(&mut prob, "m 1\nr 0 1\nr 1 -1\n");
        let violations = check_stability(&prob);
        assert!(violations.contains(&Violation::Unreciprocated { r: Rid(0), p: Pid(1) }));
    }

    #[test]
    fn flags_over_quota_as_not_accepted() {
        let mut prob = parse("r 0 0\nr 1 0\np 0 1 0 1\n");
        apply(&mut prob, "m 1\nr 0 0\nr 1 0\n");
        let violations = check_stability(&prob);
        // Applicant 0 was displaced when applicant 1's line arrived: the
        // over-quota claim cannot satisfy both.
        assert!(violations.contains(&Violation::NotAccepted { r: Rid(0), p: Pid(0) }));
    }

    #[test]
    fn flags_quota_bump_wrong_direction() {
        // E2 with the roles swapped: giving the seat to the worse applicant is
        // unstable because the better one blocks.
        let mut prob = parse("r 0 0\nr 1 0\np 0 1 0 1\n");
        apply(&mut prob, "m 1\nr 0 -1\nr 1 0\n");
        let violations = check_stability(&prob);
        assert!(violations.contains(&Violation::BlockingPair { r: Rid(0), p: Pid(0) }));
    }

    #[test]
    fn flags_couple_blocking_pair() {
        // E4 resolved the wrong way: program 2 prefers couple member 0, so
        // parking the single there is unstable.
        let mut prob = parse("c 0 0 1 2 3\nr 2 2\np 2 1 0 2\np 3 1 1\n");
        apply(&mut prob, "m 1\nr 0 -1\nr 1 -1\nr 2 2\n");
        let violations = check_stability(&prob);
        assert!(violations.contains(&Violation::CoupleBlockingPair {
            c: Cid(0),
            pair: (Pid(2), Pid(3))
        }));
    }

    #[test]
    fn couple_blocked_by_preferred_single_is_stable() {
        // E4 resolved the right way: program 2 prefers the single.
        let mut prob = parse("c 0 0 1 2 3\nr 2 2\np 2 1 2 0\np 3 1 1\n");
        apply(&mut prob, "m 1\nr 0 -1\nr 1 -1\nr 2 2\n");
        assert!(check_stability(&prob).is_empty());
    }

    #[test]
    fn unmatched_couple_with_feasible_pair_is_flagged() {
        // The original checker skipped unmatched couples entirely; a feasible
        // preferred pair must still block.
        let mut prob = parse("c 0 0 1 2 2\np 2 2 0 1\n");
        apply(&mut prob, "m 1\nr 0 -1\nr 1 -1\n");
        assert_eq!(
            check_stability(&prob),
            vec![Violation::CoupleBlockingPair {
                c: Cid(0),
                pair: (Pid(2), Pid(2))
            }]
        );
    }

    #[test]
    fn couple_unranked_pair_is_flagged() {
        let mut prob = parse("c 0 0 1 2 3\nr 2 2\nr 3 3\np 2 1 0 2\np 3 1 3 1\n");
        // (2, -1) is not a ranked pair for this couple.
        apply(&mut prob, "m 1\nr 0 2\nr 1 -1\nr 2 -1\nr 3 3\n");
        let violations = check_stability(&prob);
        assert!(violations.contains(&Violation::CoupleUnrankedPair {
            c: Cid(0),
            pair: (Pid(2), Pid::NIL)
        }));
    }

    #[test]
    fn couple_side_checks_apply_to_non_nil_sides_only() {
        let mut prob = parse("c 0 0 1 2 -1\np 2 1 0\n");
        apply(&mut prob, "m 1\nr 0 2\nr 1 -1\n");
        assert!(check_stability(&prob).is_empty());
    }

    #[test]
    fn same_program_pair_blocking_uses_pair_admission() {
        // Program 2 would take the couple as a pair (quota 2, both ranked
        // above the seated singles), so leaving the couple out is unstable.
        let mut prob = parse(
            "c 0 0 1 2 2\nr 3 2\nr 4 2\np 2 2 0 1 3 4\n",
        );
        apply(&mut prob, "m 1\nr 0 -1\nr 1 -1\nr 3 2\nr 4 2\n");
        let violations = check_stability(&prob);
        assert!(violations.contains(&Violation::CoupleBlockingPair {
            c: Cid(0),
            pair: (Pid(2), Pid(2))
        }));
    }

    #[test]
    fn same_program_pair_not_blocking_when_room_is_short() {
        // Quota 1 can never take a two-sided pair.
        let mut prob = parse("c 0 0 1 2 2\nr 3 2\np 2 1 3 0 1\n");
        apply(&mut prob, "m 1\nr 0 -1\nr 1 -1\nr 3 2\n");
        assert!(check_stability(&prob).is_empty());
    }

    #[test]
    fn listed_nil_pair_above_current_match_is_flagged() {
        // The couple positionally prefers staying unmatched to its assigned
        // pair; the verifier must flag the assigned pair as dominated.
        let mut prob = parse("c 0 0 1 -1 -1 2 2\np 2 2 0 1\n");
        apply(&mut prob, "m 1\nr 0 2\nr 1 2\n");
        let violations = check_stability(&prob);
        assert!(violations.contains(&Violation::CoupleBlockingPair {
            c: Cid(0),
            pair: NIL_PAIR
        }));
    }

    #[test]
    fn violations_accumulate_rather_than_short_circuit() {
        let mut prob = parse("r 0 0 1\nr 1 0 1\np 0 2 0 1\np 1 1 0 1\n");
        // Both applicants left unmatched: two blocking pairs each for program
        // 0 (quota 2) and one each for program 1.
        apply(&mut prob, "m 1\nr 0 -1\nr 1 -1\n");
        let violations = check_stability(&prob);
        assert_eq!(violations.len(), 4);
    }

    // -------------------------------------------------------------------------
    // Engine agreement
    // -------------------------------------------------------------------------

    #[test]
    fn engine_output_round_trips_through_match_files() {
        let text = "r 0 0 1\nr 1 0 1\nc 0 2 3 0 1 1 0\np 0 2 0 2 1\np 1 2 3 1 0\n";
        let mut prob = parse(text);
        let outcome = run_match(&mut prob, &MatchConfig::default());
        assert!(outcome.converged);
        let mut buf = Vec::new();
        prob.write_match(&mut buf, outcome.converged).unwrap();
        let match_text = String::from_utf8(buf).unwrap();

        let mut fresh = parse(text);
        let spec = MatchSpec::parse(&match_text).unwrap();
        assert!(spec.claimed);
        spec.apply(&mut fresh).unwrap();
        assert!(check_stability(&fresh).is_empty());
    }
}
