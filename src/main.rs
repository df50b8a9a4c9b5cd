#[macro_use]
extern crate slog;

use clap::ArgAction;
use slog::Drain;

fn main() {
    let args = clap::command!()
        .about("Locate bug-inducing changes from labelled bug-fix commits")
        .arg(
            clap::Arg::new("database")
                .help("Path of the metadata dataset file")
                .short('d')
                .long("database")
                .required(true),
        )
        .arg(
            clap::Arg::new("project-name")
                .help("Name of the project to analyze")
                .short('p')
                .long("project-name")
                .required(true),
        )
        .arg(
            clap::Arg::new("repository-url")
                .help("URL of the project repository (e.g. the git clone url)")
                .short('u')
                .long("repository-url"),
        )
        .arg(
            clap::Arg::new("input")
                .help("Path of a checked-out repository; extracted from the store when absent")
                .short('i')
                .long("input"),
        )
        .arg(
            clap::Arg::new("verbose")
                .help("Display more output")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = std::sync::Mutex::new(drain).fuse();
    let drain = slog::LevelFilter::new(
        drain,
        if args.get_flag("verbose") {
            slog::Level::Debug
        } else {
            slog::Level::Info
        },
    )
    .fuse();
    let logger = slog::Logger::root(drain, o!());

    let started = std::time::Instant::now();
    info!(logger, "starting inducing analysis");

    if let Err(e) = inducing_miner::run(
        &logger,
        &inducing_miner::Config {
            database: args
                .get_one::<String>("database")
                .map(String::as_str)
                .unwrap_or_default(),
            project: args
                .get_one::<String>("project-name")
                .map(String::as_str)
                .unwrap_or_default(),
            repository_url: args.get_one::<String>("repository-url").map(String::as_str),
            input: args.get_one::<String>("input").map(String::as_str),
        },
    ) {
        crit!(logger, "inducing analysis failed"; "err" => e.to_string());
        drop(logger);
        ::std::process::exit(1);
    }

    info!(logger, "finished inducing analysis";
          "elapsed" => format!("{:.2?}", started.elapsed()));
}
