use colored::Colorize;
use onionbench::command_argument_builder;
use onionbench::handlers::{
    self, handle_check, handle_fill, handle_measure, handle_probe, handle_summarize, print_banner,
};

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");
    let verbose = chosen_command.get_flag("verbose");

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    if chosen_command.subcommand().is_none() {
        // No subcommand provided, just show the banner
        return;
    }

    let log_file = chosen_command
        .get_one::<String>("log-file")
        .map(|p| handlers::expand_path(p))
        .unwrap_or_else(|| onionbench_core::config::DEFAULT_LOG_FILE.into());
    if let Err(e) = handlers::init_logging(quiet, verbose, &log_file) {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }

    let result = match chosen_command.subcommand() {
        Some(("probe", primary_command)) => handle_probe(primary_command).await,
        Some(("measure", primary_command)) => handle_measure(primary_command).await,
        Some(("fill-countries", primary_command)) => handle_fill(primary_command).await,
        Some(("summarize", primary_command)) => handle_summarize(primary_command),
        Some(("check", primary_command)) => handle_check(primary_command).await,
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}
