use crate::CLAP_STYLING;
use clap::{arg, command};
use url::Url;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("fetchgate")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("fetchgate")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress banner and non-essential output")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-c --"config" <PATH>)
                .required(false)
                .help("Path to the YAML configuration file")
                .value_parser(clap::value_parser!(std::path::PathBuf))
                .default_value("fetchgate.yaml")
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(
            command!("serve")
                .about("Run the fetch proxy HTTP service")
                .arg(
                    arg!(--"host" <HOST>)
                        .required(false)
                        .help("Address to bind (overrides proxy.host)"),
                )
                .arg(
                    arg!(-p --"port" <PORT>)
                        .required(false)
                        .help("Port to listen on (overrides proxy.port)")
                        .value_parser(clap::value_parser!(u16)),
                ),
        )
        .subcommand(
            command!("fetch")
                .about("Fetch a single URL, directly or through a running proxy")
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("The URL to fetch")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-m --"method" <METHOD>)
                        .required(false)
                        .help("HTTP method")
                        .default_value("GET"),
                )
                .arg(
                    arg!(-H --"header" <HEADER>)
                        .required(false)
                        .help("Request header as 'Name: value' (repeatable)")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(-d --"data" <BODY>)
                        .required(false)
                        .help("Request body (ignored for GET)"),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Request timeout in seconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("30"),
                )
                .arg(
                    arg!(--"no-cache")
                        .required(false)
                        .help("Bypass the proxy response cache")
                        .action(clap::ArgAction::SetTrue),
                )
                .args(proxy_args())
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Output format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                ),
        )
        .subcommand(
            command!("bulk")
                .about("Fetch many URLs with bounded concurrency")
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("A single URL to fetch")
                        .value_parser(clap::value_parser!(Url))
                        .conflicts_with("hosts-file"),
                )
                .arg(
                    arg!(--"hosts-file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of URLs")
                        .value_parser(clap::value_parser!(std::path::PathBuf))
                        .conflicts_with("url"),
                )
                .arg(
                    arg!(-t --"concurrency" <NUM>)
                        .required(false)
                        .help("Maximum fetches in flight")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("5"),
                )
                .arg(
                    arg!(--"tag" <TAG>)
                        .required(false)
                        .help("Tag recorded with each fetch (repeatable)")
                        .action(clap::ArgAction::Append),
                )
                .args(proxy_args())
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                ),
        )
        .subcommand(
            command!("intelligence")
                .about("Inspect recorded fetches")
                .subcommand_required(true)
                .subcommand(
                    command!("list")
                        .about("List the most recent intelligence records")
                        .arg(limit_arg())
                        .arg(format_arg()),
                ),
        )
        .subcommand(
            command!("blocked")
                .about("List recently blocked or failed requests")
                .arg(limit_arg())
                .arg(format_arg()),
        )
        .subcommand(
            command!("housekeeping")
                .about("Trim intelligence records to the most recent N")
                .arg(
                    arg!(-k --"keep" <NUM>)
                        .required(false)
                        .help("Records to keep (default: intelligence.max_records)")
                        .value_parser(clap::value_parser!(usize)),
                ),
        )
        .subcommand(
            command!("config")
                .about("Inspect the configuration")
                .subcommand_required(true)
                .subcommand(command!("show").about("Print the configuration with secrets redacted")),
        )
}

fn proxy_args() -> [clap::Arg; 3] {
    [
        arg!(--"proxy" <URL>)
            .required(false)
            .help("Route through a running fetchgate proxy at this base URL")
            .value_parser(clap::value_parser!(Url)),
        arg!(--"api-key" <KEY>)
            .required(false)
            .help("Bearer token for the proxy")
            .requires("proxy"),
        arg!(--"fallback")
            .required(false)
            .help("Fetch directly when the proxy is unreachable")
            .action(clap::ArgAction::SetTrue)
            .requires("proxy"),
    ]
}

fn limit_arg() -> clap::Arg {
    arg!(-l --"limit" <NUM>)
        .required(false)
        .help("Number of entries to show")
        .value_parser(clap::value_parser!(usize))
        .default_value("50")
}

fn format_arg() -> clap::Arg {
    arg!(-f --"format" <FORMAT>)
        .required(false)
        .help("Output format: text, json")
        .value_parser(["text", "json"])
        .default_value("text")
}
