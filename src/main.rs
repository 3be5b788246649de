fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default = if verbose { "qqcomic=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("QQCOMIC_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    use clap::Parser;
    use std::error::Error;
    let args = qqcomic::cli::Args::parse();
    init_logging(args.verbose);
    if let Err(e) = qqcomic::cli::run(&args) {
        eprintln!("{}", e);
        if args.verbose {
            let mut source = e.source();
            while let Some(s) = source {
                eprintln!("  cause: {}", s);
                source = s.source();
            }
        }
        std::process::exit(e.exit_code());
    }
}
