use clap::{arg, command};
use url::Url;

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("onionbench")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("onionbench")
        .about("Compare page load performance of onion services against their clearnet sites")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress banner, progress bars and info-level console output")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-v --"verbose" "Log at debug level")
                .required(false)
                .global(true)
                .conflicts_with("quiet"),
        )
        .arg(
            arg!(--"log-file" <PATH>)
                .required(false)
                .global(true)
                .help("Append-only log file")
                .default_value("onionbench.log"),
        )
        .subcommand_required(false)
        .subcommand(
            command!("probe")
                .about("Probe ranked domains for an Onion-Location header and record the onion addresses found")
                .arg(
                    arg!(-i --"input" <PATH>)
                        .required(true)
                        .help("Ranked domain CSV (rank,domain), no header"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Output CSV with Clear Web Domain,Onion Address columns")
                        .default_value("onion_location_domains.csv"),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Request timeout in seconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("10"),
                ),
        )
        .subcommand(
            command!("measure")
                .about(
                    "Load each onion service and its clearnet site in a browser, N times, and record \
                navigation timings.",
                )
                .arg(
                    arg!(-i --"input" <PATH>)
                        .required(true)
                        .help("CSV with Clear Web Domain,Onion Address columns"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Comparison CSV to write")
                        .default_value("onion_vs_clearnet_comparison.csv"),
                )
                .arg(
                    arg!(-n --"runs" <N>)
                        .required(false)
                        .help("Number of measurement runs over the whole domain list")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("5"),
                )
                .arg(
                    arg!(--"delay" <SECONDS>)
                        .required(false)
                        .help("Pause between runs in seconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("600"),
                )
                .arg(
                    arg!(--"settle" <SECONDS>)
                        .required(false)
                        .help("Wait after each page load before reading timings (default: 5 with --relays, else 2)")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(--"relays")
                        .required(false)
                        .help("Record the relays of the circuit carrying each onion load")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"webdriver" <URL>)
                        .required(false)
                        .help("WebDriver endpoint (geckodriver)")
                        .value_parser(clap::value_parser!(Url))
                        .default_value("http://localhost:4444"),
                )
                .arg(
                    arg!(--"headed")
                        .required(false)
                        .help("Show the browser window instead of running headless")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"socks-port" <PORT>)
                        .required(false)
                        .help("Tor SOCKS port")
                        .value_parser(clap::value_parser!(u16))
                        .default_value("9150"),
                )
                .arg(
                    arg!(--"control-port" <PORT>)
                        .required(false)
                        .help("Tor control port")
                        .value_parser(clap::value_parser!(u16))
                        .default_value("9151"),
                )
                .arg(
                    arg!(--"control-password" <PASSWORD>)
                        .required(false)
                        .help("Control port password (default: cookie or null authentication)"),
                )
                .arg(
                    arg!(--"geo-url" <URL>)
                        .required(false)
                        .help("Geolocation service base URL")
                        .value_parser(clap::value_parser!(Url))
                        .default_value("https://ipinfo.io"),
                )
                .arg(
                    arg!(--"geo-format" <FORMAT>)
                        .required(false)
                        .help("Geolocation response format")
                        .value_parser(["json", "text"])
                        .default_value("json"),
                )
                .arg(
                    arg!(--"command-timeout" <SECONDS>)
                        .required(false)
                        .help("Upper bound for each browser command, page loads included")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("120"),
                )
                .arg(
                    arg!(--"retries" <N>)
                        .required(false)
                        .help("Stream snapshots taken when looking for an onion load's circuit")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("5"),
                ),
        )
        .subcommand(
            command!("fill-countries")
                .about("Fill unknown relay countries from addresses whose country is known elsewhere in the file")
                .arg(
                    arg!(-i --"input" <PATH>)
                        .required(true)
                        .help("Comparison CSV with a Circuit Relays (Onion only) column"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Where to write the filled CSV")
                        .default_value("tor_relays_filled.csv"),
                )
                .arg(
                    arg!(--"online")
                        .required(false)
                        .help("Look up addresses that are still unknown through the geolocation service")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"geo-url" <URL>)
                        .required(false)
                        .help("Geolocation service base URL")
                        .value_parser(clap::value_parser!(Url))
                        .default_value("https://ipinfo.io"),
                )
                .arg(
                    arg!(--"geo-format" <FORMAT>)
                        .required(false)
                        .help("Geolocation response format")
                        .value_parser(["json", "text"])
                        .default_value("json"),
                ),
        )
        .subcommand(
            command!("summarize")
                .about("Average every metric per domain and type over a comparison CSV")
                .arg(
                    arg!(-i --"input" <PATH>)
                        .required(true)
                        .help("Comparison CSV written by measure"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Averages CSV to write")
                        .default_value("onion_vs_clearnet_averages.csv"),
                ),
        )
        .subcommand(
            command!("check")
                .about("Time a single page load over Tor and over the clearnet")
                .arg(
                    arg!(--"onion-url" <URL>)
                        .required(true)
                        .help("Onion URL to load through Tor")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(--"clear-url" <URL>)
                        .required(true)
                        .help("Clearnet URL to load directly")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(--"webdriver" <URL>)
                        .required(false)
                        .help("WebDriver endpoint (geckodriver)")
                        .value_parser(clap::value_parser!(Url))
                        .default_value("http://localhost:4444"),
                )
                .arg(
                    arg!(--"socks-port" <PORT>)
                        .required(false)
                        .help("Tor SOCKS port")
                        .value_parser(clap::value_parser!(u16))
                        .default_value("9150"),
                )
                .arg(
                    arg!(--"command-timeout" <SECONDS>)
                        .required(false)
                        .help("Upper bound for each browser command")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("120"),
                ),
        )
}
