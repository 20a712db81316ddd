use rpmatch::engine::{run_match, Algo, MatchConfig};
use rpmatch::problem::Problem;
use std::io::Write;

fn main() {
    let mut cfg = MatchConfig::default();
    let mut file: Option<String> = None;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--algo" => {
                let v = args.get(i + 1).unwrap_or_else(|| usage_and_exit(1));
                let code: i64 = v.parse().unwrap_or_else(|_| usage_and_exit(1));
                cfg.algo = Algo::from_code(code).unwrap_or_else(|| usage_and_exit(1));
                i += 2;
            }
            "--rnd" => {
                cfg.rnd = true;
                i += 1;
            }
            "--seed" => {
                let v = args.get(i + 1).unwrap_or_else(|| usage_and_exit(1));
                cfg.seed = Some(v.parse().unwrap_or_else(|_| usage_and_exit(1)));
                i += 2;
            }
            "--verb" | "--verbosity" => {
                let v = args.get(i + 1).unwrap_or_else(|| usage_and_exit(1));
                cfg.verbosity = v.parse().unwrap_or_else(|_| usage_and_exit(1));
                if cfg.verbosity > 3 {
                    usage_and_exit(1);
                }
                i += 2;
            }
            "--rounds" => {
                let v = args.get(i + 1).unwrap_or_else(|| usage_and_exit(1));
                cfg.round_limit_factor = v.parse().unwrap_or_else(|_| usage_and_exit(1));
                i += 2;
            }
            "--restarts" => {
                let v = args.get(i + 1).unwrap_or_else(|| usage_and_exit(1));
                cfg.restarts = v.parse().unwrap_or_else(|_| usage_and_exit(1));
                i += 2;
            }
            "--version" => {
                println!("matchrp {}", env!("CARGO_PKG_VERSION"));
                return;
            }
            "--help" | "-h" => usage_and_exit(0),
            _ if file.is_none() && !args[i].starts_with('-') => {
                file = Some(args[i].clone());
                i += 1;
            }
            _ => usage_and_exit(1),
        }
    }
    let Some(path) = file else { usage_and_exit(1) };

    println!("#matchrp {}", env!("CARGO_PKG_VERSION"));
    match (cfg.algo, cfg.rnd) {
        (Algo::RothPeranson, false) => {
            println!("#matchrp using Roth Peranson 1999 algorithm with static couple ordering");
        }
        (Algo::RothPeranson, true) => {
            println!(
                "#matchrp using Roth Peranson 1999 algorithm with re-randomization of couple ordering"
            );
        }
        (Algo::KojimaPathakRoth, _) => {
            println!("#matchrp using Kojima Pathak Roth appendix B.2 algorithm");
        }
    }

    let mut prob = match Problem::from_file(&path) {
        Ok(p) => p,
        Err(e) => {
            println!("Problems reading input file: \"{path}\"");
            println!("{e}");
            std::process::exit(1);
        }
    };
    if cfg.verbosity > 0 {
        println!("#Problem Read:");
        if cfg.verbosity > 2 {
            print!("{prob}");
        }
    }

    let outcome = run_match(&mut prob, &cfg);
    if !outcome.converged {
        println!("# WARNING: no stable match found within the round limit");
    }
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    outcome.stats.write(&mut out).expect("write to stdout");
    if cfg.verbosity > 1 {
        prob.write_summary_stats(&mut out).expect("write to stdout");
    }
    writeln!(out, "#Final Match").expect("write to stdout");
    prob.write_match(&mut out, outcome.converged)
        .expect("write to stdout");
}

fn usage_and_exit(code: i32) -> ! {
    eprintln!(
        "Usage:\n  matchrp [options] <matching_problem_spec_file>\n\nOptions:\n  --algo N       Algorithm: 0 = Roth-Peranson (default), 2 = Kojima-Pathak-Roth\n  --rnd          Re-randomize couple ordering on restarts (Roth-Peranson)\n  --seed SEED    Deterministic seed for couple-order shuffling\n  --verb N       Verbosity 0..3 (default: 1)\n  --rounds N     Round-limit factor per applicant/couple (default: 8)\n  --restarts N   Restart bound after round-limit aborts (default: 1)\n  --version      Print version and exit\n"
    );
    std::process::exit(code)
}
