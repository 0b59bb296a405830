use std::path::PathBuf;

use clip_feed::RunOptions;

const HELP: &str = "clip-feed: scroll a vertical feed of short videos from the terminal.

  --version, -V        Show version and exit
  --help,    -h        Show this help message
  --config <path>      Read configuration from <path>
  --offline            Browse the built-in sample clips";

enum Cli {
    Exit(i32),
    Run(RunOptions),
}

fn main() {
    let options = match parse_args(std::env::args().skip(1)) {
        Cli::Exit(code) => std::process::exit(code),
        Cli::Run(options) => options,
    };

    if let Err(err) = clip_feed::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Cli {
    let mut options = RunOptions::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("clip-feed {}", clip_feed::VERSION);
                return Cli::Exit(0);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Cli::Exit(0);
            }
            "--offline" => options.offline = true,
            "--config" => match args.next() {
                Some(path) => options.config_file = Some(PathBuf::from(path)),
                None => {
                    eprintln!("error: --config needs a path");
                    return Cli::Exit(2);
                }
            },
            other => {
                if let Some(path) = other.strip_prefix("--config=") {
                    options.config_file = Some(PathBuf::from(path));
                } else {
                    eprintln!("error: unknown argument {other}\n\n{HELP}");
                    return Cli::Exit(2);
                }
            }
        }
    }
    Cli::Run(options)
}
