use rpmatch::problem::Problem;
use rpmatch::verify::{check_stability, MatchSpec};

fn main() {
    let mut verbosity = 0u32;
    let mut files: Vec<String> = Vec::new();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--verb" | "--verbosity" => {
                let v = args.get(i + 1).unwrap_or_else(|| usage_and_exit(1));
                verbosity = v.parse().unwrap_or_else(|_| usage_and_exit(1));
                if verbosity > 2 {
                    usage_and_exit(1);
                }
                i += 2;
            }
            "--help" | "-h" => usage_and_exit(0),
            _ if !args[i].starts_with('-') => {
                files.push(args[i].clone());
                i += 1;
            }
            _ => usage_and_exit(1),
        }
    }
    if files.len() != 2 {
        usage_and_exit(1);
    }

    let mut prob = match Problem::from_file(&files[0]) {
        Ok(p) => p,
        Err(e) => {
            println!("Problems reading problem file: \"{}\"", files[0]);
            println!("{e}");
            std::process::exit(1);
        }
    };
    let spec = match MatchSpec::from_file(&files[1]) {
        Ok(s) => s,
        Err(e) => {
            println!("Problems reading match file: \"{}\"", files[1]);
            println!("{e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = spec.apply(&mut prob) {
        println!("Problems reading match file: \"{}\"", files[1]);
        println!("{e}");
        std::process::exit(1);
    }

    if verbosity > 0 {
        println!("Inputed problem:");
        print!("{prob}");
    }

    if !spec.claimed {
        println!("No match found.");
        return;
    }
    let violations = check_stability(&prob);
    if violations.is_empty() {
        println!("Match ok.");
        let stdout = std::io::stdout();
        prob.write_summary_stats(stdout.lock())
            .expect("write to stdout");
    } else {
        println!("ERROR: Unstable Match.");
        for v in &violations {
            println!("{v}");
        }
        std::process::exit(1);
    }
}

fn usage_and_exit(code: i32) -> ! {
    eprintln!(
        "Usage:\n  verify [options] <matching_problem_spec_file> <match_spec_file>\n\nOptions:\n  --verb N   Verbosity level (0 = silent, 1 = some, 2 = more)\n"
    );
    std::process::exit(code)
}
