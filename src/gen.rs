//! Random instance generation with Mallows-distributed preferences.
//!
//! Rank-order lists are sampled by repeated insertion around a common
//! reference ranking: dispersion `phi = 0` reproduces the reference order
//! exactly and `phi = 1` is a uniform random permutation, with intermediate
//! values giving correlated-but-noisy preferences, which is what makes
//! generated markets behave like real ones (popular programs stay popular).
//!
//! Couples draw one list per member; their joint pair list orders the cross
//! product by rank sum, optionally followed by single-sided `(p, nil)` /
//! `(nil, q)` fallback pairs.

use rand::Rng;
use std::fmt::Write as _;

// ============================================================================
// Configuration
// ============================================================================

/// Parameters for one generated instance.
#[derive(Clone, Debug)]
pub struct GenConfig {
    /// Number of single applicants.
    pub singles: usize,
    /// Number of couples (two applicants each).
    pub couples: usize,
    /// Number of programs.
    pub programs: usize,
    /// Length of each single applicant's ROL.
    pub rol_len: usize,
    /// Length of each couple's pair list (before fallback pairs).
    pub pair_len: usize,
    /// Quota of every program.
    pub quota: usize,
    /// Mallows dispersion in `[0, 1]`.
    pub phi: f64,
    /// Append `(first-choice, nil)` and `(nil, first-choice)` fallback pairs
    /// to each couple's list.
    pub half_pairs: bool,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            singles: 100,
            couples: 10,
            programs: 20,
            rol_len: 8,
            pair_len: 12,
            quota: 10,
            phi: 0.5,
            half_pairs: true,
        }
    }
}

// ============================================================================
// Mallows sampling
// ============================================================================

/// Samples a Mallows-distributed permutation of `0..n` by repeated insertion.
///
/// Item `i` is inserted at position `k` with weight `phi^(i - k)`: position
/// `i` (keeping reference order) carries the largest weight for `phi < 1`.
pub fn mallows_permutation<R: Rng>(rng: &mut R, n: usize, phi: f64) -> Vec<usize> {
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        if i == 0 {
            out.push(0);
            continue;
        }
        let k = if phi <= 0.0 {
            i
        } else if phi >= 1.0 {
            rng.random_range(0..=i)
        } else {
            sample_insertion_position(rng, i, phi)
        };
        out.insert(k, i);
    }
    out
}

/// Draws an insertion position in `0..=i` with weight `phi^(i - k)`.
fn sample_insertion_position<R: Rng>(rng: &mut R, i: usize, phi: f64) -> usize {
    let total = (1.0 - phi.powi(i as i32 + 1)) / (1.0 - phi);
    let mut x = rng.random_range(0.0..total);
    let mut k = i;
    let mut w = 1.0;
    loop {
        if x < w || k == 0 {
            return k;
        }
        x -= w;
        w *= phi;
        k -= 1;
    }
}

// ============================================================================
// Instance generation
// ============================================================================

/// Generates a problem file in the matcher's input grammar.
///
/// Applicant ids: singles take `0..singles`, couple members follow pairwise.
/// Program ids start at 0. Every program ranks every applicant (in its own
/// Mallows order); reciprocity filtering at load time trims the rest.
pub fn generate<R: Rng>(cfg: &GenConfig, rng: &mut R) -> String {
    let n_res = cfg.singles + 2 * cfg.couples;
    let mut text = String::new();
    let _ = writeln!(
        text,
        "#generated: {} singles, {} couples, {} programs, quota {}, phi {}",
        cfg.singles, cfg.couples, cfg.programs, cfg.quota, cfg.phi
    );

    for s in 0..cfg.singles {
        let rol = sample_rol(rng, cfg.programs, cfg.rol_len, cfg.phi);
        let _ = write!(text, "r {s}");
        for p in rol {
            let _ = write!(text, " {p}");
        }
        text.push('\n');
    }

    for c in 0..cfg.couples {
        let r1 = cfg.singles + 2 * c;
        let r2 = r1 + 1;
        let pairs = sample_pair_list(rng, cfg);
        let _ = write!(text, "c {c} {r1} {r2}");
        for (a, b) in pairs {
            let _ = write!(text, " {a} {b}");
        }
        text.push('\n');
    }

    for p in 0..cfg.programs {
        let order = mallows_permutation(rng, n_res, cfg.phi);
        let _ = write!(text, "p {p} {}", cfg.quota);
        for r in order {
            let _ = write!(text, " {r}");
        }
        text.push('\n');
    }
    text
}

/// A truncated Mallows ranking over program ids.
fn sample_rol<R: Rng>(rng: &mut R, programs: usize, len: usize, phi: f64) -> Vec<usize> {
    let mut order = mallows_permutation(rng, programs, phi);
    order.truncate(len);
    order
}

/// Builds a couple's pair list from two member rankings: the cross product of
/// short prefixes ordered by rank sum (first member breaks ties), truncated,
/// plus optional single-sided fallbacks. `-1` denotes the nil program.
fn sample_pair_list<R: Rng>(rng: &mut R, cfg: &GenConfig) -> Vec<(i64, i64)> {
    let prefix = prefix_len(cfg.pair_len).min(cfg.programs.max(1));
    let list1 = sample_rol(rng, cfg.programs, prefix, cfg.phi);
    let list2 = sample_rol(rng, cfg.programs, prefix, cfg.phi);

    let mut ranked: Vec<(usize, usize, usize)> = Vec::with_capacity(list1.len() * list2.len());
    for (i, &a) in list1.iter().enumerate() {
        for (j, &b) in list2.iter().enumerate() {
            ranked.push((i + j, i, a * cfg.programs.max(1) + b));
        }
    }
    ranked.sort();

    let mut pairs: Vec<(i64, i64)> = Vec::new();
    for &(_, i, code) in &ranked {
        if pairs.len() >= cfg.pair_len {
            break;
        }
        let a = list1[i];
        let b = code % cfg.programs.max(1);
        pairs.push((a as i64, b as i64));
    }
    if cfg.half_pairs {
        if let Some(&a) = list1.first() {
            pairs.push((a as i64, -1));
        }
        if let Some(&b) = list2.first() {
            pairs.push((-1, b as i64));
        }
    }
    pairs
}

/// Smallest prefix whose cross product covers the requested pair count.
fn prefix_len(pair_len: usize) -> usize {
    let mut k = 1usize;
    while k * k < pair_len {
        k += 1;
    }
    k.max(2)
}

// ============================================================================
// Tests
// ============================================================================
