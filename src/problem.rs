//! Problem model: applicants, couples, programs, and the mutable match state.
//!
//! Entities live in owned tables inside [`Problem`] and are referred to by the
//! opaque index types [`Rid`], [`Cid`] and [`Pid`]; `-1` is the nil sentinel
//! meaning "unmatched" / "no program" / "no couple". All relational queries
//! (rank, prefers, will-accept) are methods on `Problem` taking ids, so the
//! otherwise cyclic applicant/couple/program graph never needs cross-owning
//! references.

use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

// ============================================================================
// Identifiers
// ============================================================================

/// Rank of an entry that does not appear in a rank-order list.
///
/// The nil program/applicant/pair ranks at `|ROL|` instead: being unmatched is
/// worse than every listed alternative but still acceptable, while an unlisted
/// alternative is unacceptable outright.
pub const UNRANKED: usize = usize::MAX;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub i32);

        impl $name {
            /// The nil sentinel.
            pub const NIL: Self = Self(-1);

            /// Returns whether this is the nil sentinel.
            #[inline(always)]
            pub fn is_nil(self) -> bool {
                self.0 < 0
            }

            #[inline(always)]
            pub(crate) fn idx(self) -> usize {
                debug_assert!(self.0 >= 0, "nil id used as table index");
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of an applicant (a "resident" in NRMP terms).
    Rid
);
id_type!(
    /// Identifier of a couple.
    Cid
);
id_type!(
    /// Identifier of a program.
    Pid
);

/// A couple's preference entry: first member to `.0`, second member to `.1`.
pub type PidPair = (Pid, Pid);

/// The fully-unmatched pair.
pub const NIL_PAIR: PidPair = (Pid::NIL, Pid::NIL);

// ============================================================================
// Entity records
// ============================================================================

/// A single or coupled applicant.
#[derive(Clone, Debug)]
pub struct Resident {
    id: Rid,
    rol: Vec<Pid>,
    couple: Cid,
    matched: Pid,
    ranks: FxHashMap<Pid, usize>,
}

impl Resident {
    fn new(id: Rid, rol: Vec<Pid>, couple: Cid) -> Self {
        let mut r = Self {
            id,
            rol,
            couple,
            matched: Pid::NIL,
            ranks: FxHashMap::default(),
        };
        r.rebuild_ranks();
        r
    }

    fn placeholder() -> Self {
        Self {
            id: Rid::NIL,
            rol: Vec::new(),
            couple: Cid::NIL,
            matched: Pid::NIL,
            ranks: FxHashMap::default(),
        }
    }

    fn rebuild_ranks(&mut self) {
        self.ranks.clear();
        for (i, &p) in self.rol.iter().enumerate() {
            self.ranks.entry(p).or_insert(i);
        }
    }

    fn rank_of(&self, p: Pid) -> usize {
        if p.is_nil() {
            return self.rol.len();
        }
        self.ranks.get(&p).copied().unwrap_or(UNRANKED)
    }

    /// The applicant's id.
    #[inline]
    pub fn id(&self) -> Rid {
        self.id
    }

    /// The applicant's rank-order list, most-preferred first.
    ///
    /// Empty for coupled applicants: their preferences live on the couple.
    #[inline]
    pub fn rol(&self) -> &[Pid] {
        &self.rol
    }

    /// The couple this applicant belongs to, or nil.
    #[inline]
    pub fn couple(&self) -> Cid {
        self.couple
    }

    /// The program this applicant is currently matched to, or nil.
    #[inline]
    pub fn matched(&self) -> Pid {
        self.matched
    }

    /// Returns whether this applicant is part of a couple.
    #[inline]
    pub fn in_couple(&self) -> bool {
        !self.couple.is_nil()
    }

    /// Returns whether this applicant currently holds a program.
    #[inline]
    pub fn is_matched(&self) -> bool {
        !self.matched.is_nil()
    }
}

/// A pair of applicants with joint preferences over program pairs.
#[derive(Clone, Debug)]
pub struct Couple {
    id: Cid,
    r1: Rid,
    r2: Rid,
    rol: Vec<PidPair>,
    ranks: FxHashMap<PidPair, usize>,
}

impl Couple {
    fn new(id: Cid, r1: Rid, r2: Rid, rol: Vec<PidPair>) -> Self {
        let mut c = Self {
            id,
            r1,
            r2,
            rol,
            ranks: FxHashMap::default(),
        };
        c.rebuild_ranks();
        c
    }

    fn placeholder() -> Self {
        Self {
            id: Cid::NIL,
            r1: Rid::NIL,
            r2: Rid::NIL,
            rol: Vec::new(),
            ranks: FxHashMap::default(),
        }
    }

    fn rebuild_ranks(&mut self) {
        self.ranks.clear();
        for (i, &p) in self.rol.iter().enumerate() {
            self.ranks.entry(p).or_insert(i);
        }
    }

    fn rank_of(&self, pair: PidPair) -> usize {
        if pair == NIL_PAIR {
            return self.rol.len();
        }
        self.ranks.get(&pair).copied().unwrap_or(UNRANKED)
    }

    /// The couple's id.
    #[inline]
    pub fn id(&self) -> Cid {
        self.id
    }

    /// The first member.
    #[inline]
    pub fn r1(&self) -> Rid {
        self.r1
    }

    /// The second member.
    #[inline]
    pub fn r2(&self) -> Rid {
        self.r2
    }

    /// The joint rank-order list over program pairs.
    #[inline]
    pub fn rol(&self) -> &[PidPair] {
        &self.rol
    }
}

/// A capacity-limited program with a preference list over applicants.
#[derive(Clone, Debug)]
pub struct Program {
    id: Pid,
    quota: usize,
    rol: Vec<Rid>,
    accepted: Vec<Rid>,
    ranks: FxHashMap<Rid, usize>,
}

impl Program {
    fn new(id: Pid, quota: usize, rol: Vec<Rid>) -> Self {
        let mut p = Self {
            id,
            quota,
            rol,
            accepted: Vec::new(),
            ranks: FxHashMap::default(),
        };
        p.rebuild_ranks();
        p
    }

    fn placeholder() -> Self {
        Self {
            id: Pid::NIL,
            quota: 0,
            rol: Vec::new(),
            accepted: Vec::new(),
            ranks: FxHashMap::default(),
        }
    }

    fn rebuild_ranks(&mut self) {
        self.ranks.clear();
        for (i, &r) in self.rol.iter().enumerate() {
            self.ranks.entry(r).or_insert(i);
        }
    }

    fn rank_of(&self, r: Rid) -> usize {
        if r.is_nil() {
            return self.rol.len();
        }
        self.ranks.get(&r).copied().unwrap_or(UNRANKED)
    }

    /// Worst currently-accepted applicant if the program is full, nil otherwise.
    fn worst(&self) -> Rid {
        if self.quota >= 1 && self.accepted.len() >= self.quota {
            self.accepted[self.quota - 1]
        } else {
            Rid::NIL
        }
    }

    /// Second-worst boundary for pair admissions: the applicant that would be
    /// displaced second, nil while two residual slots remain.
    fn second_worst(&self) -> Rid {
        if self.quota >= 2 && self.accepted.len() + 1 >= self.quota {
            self.accepted[self.quota - 2]
        } else {
            Rid::NIL
        }
    }

    fn sort_accepted(&mut self) {
        let Program { accepted, ranks, rol, .. } = self;
        let nil_rank = rol.len();
        accepted.sort_by_key(|r| {
            if r.is_nil() {
                nil_rank
            } else {
                ranks.get(r).copied().unwrap_or(UNRANKED)
            }
        });
    }

    /// The program's id.
    #[inline]
    pub fn id(&self) -> Pid {
        self.id
    }

    /// The program's capacity.
    #[inline]
    pub fn quota(&self) -> usize {
        self.quota
    }

    /// The program's rank-order list over applicants.
    #[inline]
    pub fn rol(&self) -> &[Rid] {
        &self.rol
    }

    /// Currently-accepted applicants, kept in the program's preference order.
    #[inline]
    pub fn accepted(&self) -> &[Rid] {
        &self.accepted
    }
}

// ============================================================================
// Parse errors
// ============================================================================

/// A single validation failure in a problem file.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum InputError {
    /// The line's dispatch character is not one of `r`, `c`, `p`.
    BadLine { line: String },
    /// A field that should be an integer is not.
    BadToken { line: String, token: String },
    /// The line is missing required leading fields.
    MissingField { line: String },
    /// A negative id where only nonnegative ids are allowed.
    NegativeId { kind: &'static str, id: i64 },
    /// An applicant id was specified twice.
    DuplicateResident { id: i64 },
    /// A couple id was specified twice.
    DuplicateCouple { id: i64 },
    /// A program id was specified twice.
    DuplicateProgram { id: i64 },
    /// A couple's pair list had an odd number of program ids.
    OddCoupleRol { cid: i64 },
    /// A program quota below zero.
    NegativeQuota { pid: i64, quota: i64 },
    /// An applicant or couple ranked a program that was never specified.
    UnknownProgram { pid: i64 },
    /// A program ranked an applicant that was never specified.
    UnknownResident { rid: i64 },
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::BadLine { line } => {
                write!(f, "Input ERROR: line \"{line}\" from input is invalid")
            }
            InputError::BadToken { line, token } => write!(
                f,
                "Input ERROR: expected an integer, found \"{token}\" in line \"{line}\""
            ),
            InputError::MissingField { line } => {
                write!(f, "Input ERROR: line \"{line}\" is missing required fields")
            }
            InputError::NegativeId { kind, id } => {
                write!(f, "Input ERROR: negative {kind} ID {id}")
            }
            InputError::DuplicateResident { id } => {
                write!(f, "Input ERROR: duplicate applicant ID {id}")
            }
            InputError::DuplicateCouple { id } => {
                write!(f, "Input ERROR: duplicate couple ID {id}")
            }
            InputError::DuplicateProgram { id } => {
                write!(f, "Input ERROR: duplicate program ID {id}")
            }
            InputError::OddCoupleRol { cid } => write!(
                f,
                "Input ERROR: couple {cid} specified an odd number of program IDs (not pairs)"
            ),
            InputError::NegativeQuota { pid, quota } => {
                write!(f, "Input ERROR: program {pid} has negative quota {quota}")
            }
            InputError::UnknownProgram { pid } => {
                write!(f, "Input ERROR: applicant or couple ranked unspecified program {pid}")
            }
            InputError::UnknownResident { rid } => {
                write!(f, "Input ERROR: program ranked unspecified applicant {rid}")
            }
        }
    }
}

/// Failure to read a problem: an I/O error or accumulated input errors.
#[derive(Clone, Debug)]
pub enum ProblemError {
    /// The file could not be read.
    Io(String),
    /// One or more validation failures; all are collected before reporting.
    Input(Vec<InputError>),
}

impl fmt::Display for ProblemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemError::Io(msg) => write!(f, "I/O error: {msg}"),
            ProblemError::Input(errs) => {
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

impl std::error::Error for ProblemError {}

// ============================================================================
// Problem
// ============================================================================

/// An immutable preference structure plus the mutable match state.
///
/// Built once from a problem file, sanitized so that every surviving ROL entry
/// is mutually ranked, then mutated in place by an engine and read by the
/// verifier or the output printer.
#[derive(Clone, Debug)]
pub struct Problem {
    residents: Vec<Resident>,
    couples: Vec<Couple>,
    programs: Vec<Program>,
}

impl Problem {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Parses a problem from text, validates it, and sanitizes the ROLs.
    pub fn parse(text: &str) -> Result<Self, ProblemError> {
        let mut b = Builder::default();
        for line in text.lines() {
            let Some(first) = line.chars().next() else {
                continue;
            };
            if first.is_whitespace() || first == '#' {
                continue;
            }
            match first {
                'r' => b.read_resident(line),
                'c' => b.read_couple(line),
                'p' => b.read_program(line),
                _ => b.errors.push(InputError::BadLine {
                    line: line.to_string(),
                }),
            }
        }
        b.finish()
    }

    /// Reads and parses a problem file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProblemError> {
        let text = fs::read_to_string(path).map_err(|e| ProblemError::Io(e.to_string()))?;
        Self::parse(&text)
    }

    /// Drops every non-reciprocal ROL entry.
    ///
    /// Applicant lists are filtered against program lists, couple pair lists
    /// against program lists, and program lists against the (already filtered)
    /// applicant and couple lists; a coupled applicant survives in a program's
    /// list iff the couple ranks some pair placing them there. Idempotent.
    pub fn sanitize(&mut self) {
        for i in 0..self.residents.len() {
            if self.residents[i].id.is_nil() {
                continue;
            }
            let r = self.residents[i].id;
            let mut rol = std::mem::take(&mut self.residents[i].rol);
            rol.retain(|&p| self.prog_is_ranked(p, r));
            self.residents[i].rol = rol;
            self.residents[i].rebuild_ranks();
        }
        for i in 0..self.couples.len() {
            if self.couples[i].id.is_nil() {
                continue;
            }
            let (r1, r2) = (self.couples[i].r1, self.couples[i].r2);
            let mut rol = std::mem::take(&mut self.couples[i].rol);
            rol.retain(|&(a, b)| {
                (a.is_nil() || self.prog_is_ranked(a, r1))
                    && (b.is_nil() || self.prog_is_ranked(b, r2))
            });
            self.couples[i].rol = rol;
            self.couples[i].rebuild_ranks();
        }
        for i in 0..self.programs.len() {
            if self.programs[i].id.is_nil() {
                continue;
            }
            let p = self.programs[i].id;
            let mut rol = std::mem::take(&mut self.programs[i].rol);
            rol.retain(|&r| {
                if self.res_in_couple(r) {
                    self.cpl_ranks_side(self.res_couple(r), p, r)
                } else {
                    self.res_is_ranked(r, p)
                }
            });
            self.programs[i].rol = rol;
            self.programs[i].rebuild_ranks();
        }
    }

    /// Clears all matches and accepted lists.
    pub fn reset_match_state(&mut self) {
        for r in &mut self.residents {
            r.matched = Pid::NIL;
        }
        for p in &mut self.programs {
            p.accepted.clear();
        }
    }

    // ------------------------------------------------------------------
    // Entity access
    // ------------------------------------------------------------------

    /// The applicant record for `r`.
    ///
    /// # Panics
    /// Panics if `r` is nil or out of range.
    #[inline]
    pub fn resident(&self, r: Rid) -> &Resident {
        &self.residents[r.idx()]
    }

    /// The couple record for `c`.
    ///
    /// # Panics
    /// Panics if `c` is nil or out of range.
    #[inline]
    pub fn couple(&self, c: Cid) -> &Couple {
        &self.couples[c.idx()]
    }

    /// The program record for `p`.
    ///
    /// # Panics
    /// Panics if `p` is nil or out of range.
    #[inline]
    pub fn program(&self, p: Pid) -> &Program {
        &self.programs[p.idx()]
    }

    /// Iterates over defined applicants (table holes are skipped).
    pub fn residents(&self) -> impl Iterator<Item = &Resident> {
        self.residents.iter().filter(|r| !r.id.is_nil())
    }

    /// Iterates over defined couples.
    pub fn couples(&self) -> impl Iterator<Item = &Couple> {
        self.couples.iter().filter(|c| !c.id.is_nil())
    }

    /// Iterates over defined programs.
    pub fn programs(&self) -> impl Iterator<Item = &Program> {
        self.programs.iter().filter(|p| !p.id.is_nil())
    }

    /// Applicant table size including holes; ids index below this bound.
    pub fn resident_slots(&self) -> usize {
        self.residents.len()
    }

    /// Couple table size including holes.
    pub fn couple_slots(&self) -> usize {
        self.couples.len()
    }

    /// Program table size including holes.
    pub fn program_slots(&self) -> usize {
        self.programs.len()
    }

    // ------------------------------------------------------------------
    // Applicant queries
    // ------------------------------------------------------------------

    /// Rank of `p` in `r`'s list: position, `|ROL|` for nil, [`UNRANKED`] otherwise.
    #[inline]
    pub fn res_rank(&self, r: Rid, p: Pid) -> usize {
        self.resident(r).rank_of(p)
    }

    /// Returns whether `r` ranks `p` (the nil program is always "ranked" last).
    #[inline]
    pub fn res_is_ranked(&self, r: Rid, p: Pid) -> bool {
        self.res_rank(r, p) != UNRANKED
    }

    /// Returns whether `r` strictly prefers `p1` to `p2`.
    #[inline]
    pub fn res_prefers(&self, r: Rid, p1: Pid, p2: Pid) -> bool {
        self.res_rank(r, p1) < self.res_rank(r, p2)
    }

    /// The program `r` currently holds, or nil.
    #[inline]
    pub fn res_matched(&self, r: Rid) -> Pid {
        self.resident(r).matched
    }

    /// Returns whether `r` strictly prefers `p` to their current match.
    #[inline]
    pub fn res_will_accept(&self, r: Rid, p: Pid) -> bool {
        self.res_rank(r, p) < self.res_rank(r, self.res_matched(r))
    }

    /// Returns whether `r` belongs to a couple.
    #[inline]
    pub fn res_in_couple(&self, r: Rid) -> bool {
        self.resident(r).in_couple()
    }

    /// The couple `r` belongs to, or nil.
    #[inline]
    pub fn res_couple(&self, r: Rid) -> Cid {
        self.resident(r).couple
    }

    /// The other member of `r`'s couple, or nil for singles.
    pub fn res_partner(&self, r: Rid) -> Rid {
        let c = self.res_couple(r);
        if c.is_nil() {
            return Rid::NIL;
        }
        let cpl = self.couple(c);
        if cpl.r1 == r { cpl.r2 } else { cpl.r1 }
    }

    /// Sets `r`'s match field. Does not touch any accepted list.
    pub fn set_res_match(&mut self, r: Rid, p: Pid) {
        if r.is_nil() {
            println!("Processing Error: tried to set the match of the nil applicant");
            return;
        }
        self.residents[r.idx()].matched = p;
    }

    // ------------------------------------------------------------------
    // Couple queries
    // ------------------------------------------------------------------

    /// Rank of `pair` in `c`'s list; the nil pair ranks at `|ROL|` even when listed.
    #[inline]
    pub fn cpl_rank(&self, c: Cid, pair: PidPair) -> usize {
        self.couple(c).rank_of(pair)
    }

    /// Returns whether `c` ranks `pair`.
    #[inline]
    pub fn cpl_is_ranked(&self, c: Cid, pair: PidPair) -> bool {
        self.cpl_rank(c, pair) != UNRANKED
    }

    /// Returns whether `c` strictly prefers `p1` to `p2`.
    #[inline]
    pub fn cpl_prefers(&self, c: Cid, p1: PidPair, p2: PidPair) -> bool {
        self.cpl_rank(c, p1) < self.cpl_rank(c, p2)
    }

    /// The pair of programs `c`'s members currently hold.
    #[inline]
    pub fn cpl_matched(&self, c: Cid) -> PidPair {
        let cpl = self.couple(c);
        (self.res_matched(cpl.r1), self.res_matched(cpl.r2))
    }

    /// Returns whether either member of `c` holds a program.
    #[inline]
    pub fn cpl_is_matched(&self, c: Cid) -> bool {
        self.cpl_matched(c) != NIL_PAIR
    }

    /// Returns whether `c` strictly prefers `pair` to its current match.
    #[inline]
    pub fn cpl_will_accept(&self, c: Cid, pair: PidPair) -> bool {
        self.cpl_rank(c, pair) < self.cpl_rank(c, self.cpl_matched(c))
    }

    /// Returns whether `c` ranks some pair placing member `r` into `p`.
    ///
    /// Used when filtering program lists: a program keeps a coupled applicant
    /// iff the couple can actually send them there. The nil program counts as
    /// ranked on either side.
    pub fn cpl_ranks_side(&self, c: Cid, p: Pid, r: Rid) -> bool {
        if p.is_nil() || c.is_nil() {
            return true;
        }
        let cpl = self.couple(c);
        if r == cpl.r1 {
            cpl.rol.iter().any(|&(a, _)| a == p)
        } else {
            cpl.rol.iter().any(|&(_, b)| b == p)
        }
    }

    /// Vacancy test: does `c` rank a pair strictly better than its current
    /// match that places member `r` into `p` while the partner's side would
    /// also take the partner? Returns the best such pair index.
    ///
    /// `p`'s own willingness to take `r` is the caller's concern; this checks
    /// the couple's side of the bargain.
    pub fn cpl_will_accept_with(&self, c: Cid, p: Pid, r: Rid) -> Option<usize> {
        let cpl = self.couple(c);
        let lim = cpl.rank_of(self.cpl_matched(c));
        for (i, &(a, b)) in cpl.rol.iter().enumerate() {
            if i >= lim {
                break;
            }
            let feasible = if r == cpl.r1 {
                a == p
                    && if a == b {
                        self.prog_will_accept_pair(a, cpl.r1, cpl.r2)
                    } else {
                        b.is_nil() || self.prog_will_accept(b, cpl.r2)
                    }
            } else {
                b == p
                    && if a == b {
                        self.prog_will_accept_pair(a, cpl.r1, cpl.r2)
                    } else {
                        a.is_nil() || self.prog_will_accept(a, cpl.r1)
                    }
            };
            if feasible {
                return Some(i);
            }
        }
        None
    }

    /// Sets both members' match fields in one step (both or neither).
    pub fn set_cpl_match(&mut self, c: Cid, pair: PidPair) {
        if c.is_nil() {
            println!("Processing Error: tried to set the match of the nil couple");
            return;
        }
        let (r1, r2) = (self.couples[c.idx()].r1, self.couples[c.idx()].r2);
        self.residents[r1.idx()].matched = pair.0;
        self.residents[r2.idx()].matched = pair.1;
    }

    // ------------------------------------------------------------------
    // Program queries and match-state mutation
    // ------------------------------------------------------------------

    /// Rank of `r` in `p`'s list; nil applicant ranks at `|ROL|`.
    #[inline]
    pub fn prog_rank(&self, p: Pid, r: Rid) -> usize {
        self.program(p).rank_of(r)
    }

    /// Returns whether program `p` ranks `r`. The nil program ranks nobody.
    #[inline]
    pub fn prog_is_ranked(&self, p: Pid, r: Rid) -> bool {
        !p.is_nil() && self.prog_rank(p, r) != UNRANKED
    }

    /// Returns whether `p` strictly prefers `r1` to `r2`.
    #[inline]
    pub fn prog_prefers(&self, p: Pid, r1: Rid, r2: Rid) -> bool {
        self.prog_rank(p, r1) < self.prog_rank(p, r2)
    }

    /// Would `p` take `r`, bumping its worst accepted applicant if full?
    ///
    /// Assumes `r` is not currently accepted at `p`. The nil program takes
    /// everyone; a zero-quota program takes no one.
    pub fn prog_will_accept(&self, p: Pid, r: Rid) -> bool {
        if p.is_nil() {
            return true;
        }
        let prog = self.program(p);
        if prog.quota == 0 {
            return false;
        }
        prog.rank_of(r) < prog.rank_of(prog.worst())
    }

    /// Would `p` take both `r1` and `r2` after conceptually bumping its two
    /// worst accepted applicants? Requires at least two residual slots' worth
    /// of room below the displacement boundary.
    pub fn prog_will_accept_pair(&self, p: Pid, r1: Rid, r2: Rid) -> bool {
        if p.is_nil() {
            return true;
        }
        let prog = self.program(p);
        if prog.quota <= 1 {
            return false;
        }
        let boundary = prog.rank_of(prog.second_worst());
        prog.rank_of(r1) < boundary && prog.rank_of(r2) < boundary
    }

    /// Inserts `r` into `p`'s accepted list, bumping the worst accepted
    /// applicant if the program was full. Returns the bumped applicant(s).
    ///
    /// Match fields are not touched; callers keep them in sync.
    pub fn prog_match(&mut self, p: Pid, r: Rid) -> Vec<Rid> {
        let mut bumped = Vec::new();
        if r.is_nil() {
            println!("Processing Error: tried to match the nil applicant into a program");
            return bumped;
        }
        if p.is_nil() {
            println!("Processing Error: tried to match an applicant into the nil program");
            return bumped;
        }
        let prog = &mut self.programs[p.idx()];
        if prog.accepted.len() >= prog.quota {
            if let Some(w) = prog.accepted.pop() {
                bumped.push(w);
            }
        }
        prog.accepted.push(r);
        prog.sort_accepted();
        bumped
    }

    /// Inserts both members of a couple into `p`, popping the worst accepted
    /// applicants while fewer than two residual slots remain. Returns the
    /// bumped applicants (at most two).
    pub fn prog_match_pair(&mut self, p: Pid, r1: Rid, r2: Rid) -> Vec<Rid> {
        let mut bumped = Vec::new();
        if r1.is_nil() || r2.is_nil() {
            println!("Processing Error: tried to match a pair with a nil applicant into a program");
            return bumped;
        }
        if p.is_nil() {
            println!("Processing Error: tried to match a pair into the nil program");
            return bumped;
        }
        let prog = &mut self.programs[p.idx()];
        while prog.accepted.len() + 1 >= prog.quota {
            match prog.accepted.pop() {
                Some(w) => bumped.push(w),
                None => break,
            }
        }
        prog.accepted.push(r1);
        prog.accepted.push(r2);
        prog.sort_accepted();
        bumped
    }

    /// Removes `r` from `p`'s accepted list if present.
    pub fn prog_unmatch(&mut self, p: Pid, r: Rid) {
        if p.is_nil() {
            println!("Processing Error: tried to unmatch an applicant from the nil program");
            return;
        }
        let prog = &mut self.programs[p.idx()];
        if let Some(pos) = prog.accepted.iter().position(|&x| x == r) {
            prog.accepted.remove(pos);
        }
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    /// Writes the current assignment in match-file form: a `m 0|1` claim line
    /// followed by one `r <rid> <pid>` line per applicant.
    pub fn write_match<W: io::Write>(&self, mut w: W, matched: bool) -> io::Result<()> {
        writeln!(w, "m {}", i32::from(matched))?;
        for r in self.residents() {
            writeln!(w, "r {} {}", r.id, r.matched)?;
        }
        Ok(())
    }

    /// Writes summary statistics of the current assignment as `#` lines.
    pub fn write_summary_stats<W: io::Write>(&self, mut w: W) -> io::Result<()> {
        let mut n_single = 0usize;
        let mut single_unmatched = 0usize;
        let mut single_top = 0usize;
        let mut single_rank_sum = 0usize;

        for r in self.residents().filter(|r| !r.in_couple()) {
            n_single += 1;
            if r.is_matched() {
                let rank = r.rank_of(r.matched);
                if rank != UNRANKED {
                    single_rank_sum += rank;
                    if rank == 0 {
                        single_top += 1;
                    }
                }
            } else {
                single_unmatched += 1;
            }
        }

        let mut n_couples = 0usize;
        let mut couple_unmatched = 0usize;
        let mut couple_top = 0usize;
        let mut couple_rank_sum = 0usize;

        for c in self.couples() {
            n_couples += 1;
            let pair = self.cpl_matched(c.id);
            if pair == NIL_PAIR {
                couple_unmatched += 1;
            } else {
                let rank = c.rank_of(pair);
                if rank != UNRANKED {
                    couple_rank_sum += rank;
                    if rank == 0 {
                        couple_top += 1;
                    }
                }
            }
        }

        let mut spare = 0usize;
        let mut prog_top = 0usize;
        let mut filled_programs = 0usize;
        let mut prog_rank_sum = 0.0f64;

        for p in self.programs() {
            spare += p.quota.saturating_sub(p.accepted.len());
            if p.accepted.is_empty() {
                continue;
            }
            filled_programs += 1;
            let mut rank_sum = 0usize;
            for &r in &p.accepted {
                let rank = p.rank_of(r);
                if rank == UNRANKED {
                    continue;
                }
                rank_sum += rank;
                if rank == 0 {
                    prog_top += 1;
                }
            }
            prog_rank_sum += rank_sum as f64 / p.accepted.len() as f64;
        }

        writeln!(w, "#Matching Summary Stats:")?;
        writeln!(w, "#Unmatched Singles: {single_unmatched}")?;
        writeln!(w, "#Unmatched Couples: {couple_unmatched}")?;
        writeln!(w, "#Unmatched Program slots: {spare}")?;
        if n_single > single_unmatched {
            writeln!(
                w,
                "#Ave Applicant Rank of their matching = {}",
                single_rank_sum as f64 / (n_single - single_unmatched) as f64
            )?;
        }
        writeln!(w, "#Num Applicants getting their top rank = {single_top}")?;
        if n_couples > couple_unmatched {
            writeln!(
                w,
                "#Ave Couple Rank of their matching = {}",
                couple_rank_sum as f64 / (n_couples - couple_unmatched) as f64
            )?;
        }
        writeln!(w, "#Num Couples getting their top rank = {couple_top}")?;
        if filled_programs > 0 {
            writeln!(
                w,
                "#Ave Program Rank of their matched applicants = {}",
                prog_rank_sum / filled_programs as f64
            )?;
        }
        writeln!(w, "#Num Programs getting their top rank = {prog_top}")?;
        Ok(())
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Problem Spec")?;
        writeln!(f, "Applicants:")?;
        for r in self.residents() {
            write!(f, "Applicant {}: match = {}", r.id, r.matched)?;
            if r.in_couple() {
                write!(f, ", couple {}", r.couple)?;
            }
            write!(f, ", ROL = [")?;
            for p in &r.rol {
                write!(f, " {p}")?;
            }
            writeln!(f, " ]")?;
        }
        writeln!(f, "Couples:")?;
        for c in self.couples() {
            write!(f, "Couple {}: r1 = {}, r2 = {}, ROL = [", c.id, c.r1, c.r2)?;
            for (a, b) in &c.rol {
                write!(f, " ({a}, {b})")?;
            }
            writeln!(f, " ]")?;
        }
        writeln!(f, "Programs:")?;
        for p in self.programs() {
            write!(f, "Program {}: quota = {}, accepted = [", p.id, p.quota)?;
            for r in &p.accepted {
                write!(f, " {r}")?;
            }
            write!(f, " ], ROL = [")?;
            for r in &p.rol {
                write!(f, " {r}")?;
            }
            writeln!(f, " ]")?;
        }
        Ok(())
    }
}

// ============================================================================
// Parsing internals
// ============================================================================

#[derive(Default)]
struct Builder {
    residents: Vec<Resident>,
    couples: Vec<Couple>,
    programs: Vec<Program>,
    res_ids: FxHashSet<i64>,
    cpl_ids: FxHashSet<i64>,
    prog_ids: FxHashSet<i64>,
    progs_ranked: Vec<i64>,
    res_ranked: Vec<i64>,
    errors: Vec<InputError>,
}

impl Builder {
    /// Splits everything after the dispatch character into integers.
    fn ints(&mut self, line: &str) -> Option<Vec<i64>> {
        let mut vals = Vec::new();
        for tok in line[1..].split_whitespace() {
            match tok.parse::<i64>() {
                Ok(v) => vals.push(v),
                Err(_) => {
                    self.errors.push(InputError::BadToken {
                        line: line.to_string(),
                        token: tok.to_string(),
                    });
                    return None;
                }
            }
        }
        Some(vals)
    }

    fn read_resident(&mut self, line: &str) {
        let Some(vals) = self.ints(line) else { return };
        if vals.is_empty() {
            self.errors.push(InputError::MissingField {
                line: line.to_string(),
            });
            return;
        }
        let rid = vals[0];
        if rid < 0 {
            self.errors.push(InputError::NegativeId {
                kind: "applicant",
                id: rid,
            });
            return;
        }
        if !self.res_ids.insert(rid) {
            self.errors.push(InputError::DuplicateResident { id: rid });
            return;
        }
        let rol: Vec<Pid> = vals[1..].iter().map(|&p| Pid(p as i32)).collect();
        self.progs_ranked.extend_from_slice(&vals[1..]);
        grow_to(&mut self.residents, rid as usize, Resident::placeholder);
        self.residents[rid as usize] = Resident::new(Rid(rid as i32), rol, Cid::NIL);
    }

    fn read_couple(&mut self, line: &str) {
        let Some(vals) = self.ints(line) else { return };
        if vals.len() < 3 {
            self.errors.push(InputError::MissingField {
                line: line.to_string(),
            });
            return;
        }
        let (cid, r1, r2) = (vals[0], vals[1], vals[2]);
        let pids = &vals[3..];
        if pids.len() % 2 != 0 {
            self.errors.push(InputError::OddCoupleRol { cid });
            return;
        }
        if cid < 0 {
            self.errors.push(InputError::NegativeId {
                kind: "couple",
                id: cid,
            });
            return;
        }
        if r1 < 0 || r2 < 0 {
            self.errors.push(InputError::NegativeId {
                kind: "applicant",
                id: r1.min(r2),
            });
            return;
        }
        if !self.res_ids.insert(r1) {
            self.errors.push(InputError::DuplicateResident { id: r1 });
            return;
        }
        // A couple of one applicant with themselves is tolerated.
        if r1 != r2 && !self.res_ids.insert(r2) {
            self.errors.push(InputError::DuplicateResident { id: r2 });
            return;
        }
        if !self.cpl_ids.insert(cid) {
            self.errors.push(InputError::DuplicateCouple { id: cid });
            return;
        }
        self.progs_ranked.extend_from_slice(pids);
        let pairs: Vec<PidPair> = pids
            .chunks_exact(2)
            .map(|ch| (Pid(ch[0] as i32), Pid(ch[1] as i32)))
            .collect();
        grow_to(&mut self.couples, cid as usize, Couple::placeholder);
        self.couples[cid as usize] =
            Couple::new(Cid(cid as i32), Rid(r1 as i32), Rid(r2 as i32), pairs);
        for &r in &[r1, r2] {
            grow_to(&mut self.residents, r as usize, Resident::placeholder);
            self.residents[r as usize] =
                Resident::new(Rid(r as i32), Vec::new(), Cid(cid as i32));
        }
    }

    fn read_program(&mut self, line: &str) {
        let Some(vals) = self.ints(line) else { return };
        if vals.len() < 2 {
            self.errors.push(InputError::MissingField {
                line: line.to_string(),
            });
            return;
        }
        let (pid, quota) = (vals[0], vals[1]);
        if pid < 0 {
            self.errors.push(InputError::NegativeId {
                kind: "program",
                id: pid,
            });
            return;
        }
        if quota < 0 {
            self.errors.push(InputError::NegativeQuota { pid, quota });
            return;
        }
        if !self.prog_ids.insert(pid) {
            self.errors.push(InputError::DuplicateProgram { id: pid });
            return;
        }
        let rol: Vec<Rid> = vals[2..].iter().map(|&r| Rid(r as i32)).collect();
        self.res_ranked.extend_from_slice(&vals[2..]);
        grow_to(&mut self.programs, pid as usize, Program::placeholder);
        self.programs[pid as usize] = Program::new(Pid(pid as i32), quota as usize, rol);
    }

    fn finish(mut self) -> Result<Problem, ProblemError> {
        for &pid in &self.progs_ranked {
            if pid != -1 && !self.prog_ids.contains(&pid) {
                self.errors.push(InputError::UnknownProgram { pid });
            }
        }
        for &rid in &self.res_ranked {
            if !self.res_ids.contains(&rid) {
                self.errors.push(InputError::UnknownResident { rid });
            }
        }
        if !self.errors.is_empty() {
            return Err(ProblemError::Input(self.errors));
        }
        let mut prob = Problem {
            residents: self.residents,
            couples: self.couples,
            programs: self.programs,
        };
        prob.sanitize();
        Ok(prob)
    }
}

fn grow_to<T>(v: &mut Vec<T>, idx: usize, fill: impl Fn() -> T) {
    while v.len() <= idx {
        v.push(fill());
    }
}

// ============================================================================
// Tests
// ============================================================================
