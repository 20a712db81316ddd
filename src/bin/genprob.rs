use rand::rngs::SmallRng;
use rand::SeedableRng;
use rpmatch::r#gen::{generate, GenConfig};

fn parse_count(args: &[String], i: usize) -> usize {
    let v = args.get(i + 1).unwrap_or_else(|| usage_and_exit(1));
    v.parse().unwrap_or_else(|_| usage_and_exit(1))
}

fn main() {
    let mut cfg = GenConfig::default();
    let mut seed: Option<u64> = None;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--singles" => {
                cfg.singles = parse_count(&args, i);
                i += 2;
            }
            "--couples" => {
                cfg.couples = parse_count(&args, i);
                i += 2;
            }
            "--programs" => {
                cfg.programs = parse_count(&args, i);
                i += 2;
            }
            "--rol" => {
                cfg.rol_len = parse_count(&args, i);
                i += 2;
            }
            "--pairs" => {
                cfg.pair_len = parse_count(&args, i);
                i += 2;
            }
            "--quota" => {
                cfg.quota = parse_count(&args, i);
                i += 2;
            }
            "--phi" => {
                let v = args.get(i + 1).unwrap_or_else(|| usage_and_exit(1));
                cfg.phi = v.parse().unwrap_or_else(|_| usage_and_exit(1));
                if !(0.0..=1.0).contains(&cfg.phi) {
                    usage_and_exit(1);
                }
                i += 2;
            }
            "--no-half-pairs" => {
                cfg.half_pairs = false;
                i += 1;
            }
            "--seed" => {
                let v = args.get(i + 1).unwrap_or_else(|| usage_and_exit(1));
                seed = Some(v.parse().unwrap_or_else(|_| usage_and_exit(1)));
                i += 2;
            }
            "--help" | "-h" => usage_and_exit(0),
            _ => usage_and_exit(1),
        }
    }

    let mut rng = SmallRng::seed_from_u64(seed.unwrap_or_else(rand::random::<u64>));
    print!("{}", generate(&cfg, &mut rng));
}

fn usage_and_exit(code: i32) -> ! {
    eprintln!(
        "Usage:\n  genprob [options] > problem.txt\n\nOptions:\n  --singles N      Single applicants (default: 100)\n  --couples N      Couples (default: 10)\n  --programs N     Programs (default: 20)\n  --rol N          ROL length per single (default: 8)\n  --pairs N        Pair-list length per couple (default: 12)\n  --quota N        Quota per program (default: 10)\n  --phi F          Mallows dispersion in [0,1] (default: 0.5)\n  --no-half-pairs  Skip single-sided fallback pairs\n  --seed SEED      Deterministic seed\n"
    );
    std::process::exit(code)
}
