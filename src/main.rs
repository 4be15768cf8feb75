use clap::Parser;

use proxycache::cli::output::print_error;
use proxycache::cli::{dispatch, Cli};

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level().as_str()),
    )
    .init();

    if let Err(e) = dispatch(cli) {
        print_error(&e.to_string());
        std::process::exit(e.exit_code());
    }
}
