use clap::Parser;
use indicalc::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
