use clap::ArgMatches;
use commands::command_argument_builder;
use fetchgate::handlers::{
    handle_blocked, handle_bulk, handle_config_show, handle_fetch, handle_housekeeping,
    handle_intelligence_list, handle_serve, init_tracing,
};
use fetchgate_core::print_banner;
use std::path::PathBuf;

mod commands;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    if chosen_command.subcommand().is_none() {
        // No subcommand provided, just show the banner
        return;
    }

    let config_path = chosen_command
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("fetchgate.yaml"));

    let outcome = match chosen_command.subcommand() {
        Some(("serve", primary_command)) => {
            init_tracing("info");
            handle_serve(primary_command, &config_path).await
        }
        Some(("fetch", primary_command)) => {
            init_tracing("warn");
            handle_fetch(primary_command).await
        }
        Some(("bulk", primary_command)) => {
            init_tracing("warn");
            handle_bulk(primary_command).await
        }
        Some(("intelligence", primary_command)) => match primary_command.subcommand() {
            Some(("list", secondary_command)) => {
                init_tracing("warn");
                handle_intelligence_list(secondary_command, &config_path).await
            }
            _ => unreachable!("clap should ensure we don't get here"),
        },
        Some(("blocked", primary_command)) => {
            init_tracing("warn");
            handle_blocked(primary_command, &config_path).await
        }
        Some(("housekeeping", primary_command)) => {
            init_tracing("warn");
            handle_housekeeping(primary_command, &config_path).await
        }
        Some(("config", primary_command)) => run_config(primary_command, &config_path),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = outcome {
        eprintln!("✗ {:#}", e);
        std::process::exit(1);
    }
}

fn run_config(args: &ArgMatches, config_path: &std::path::Path) -> anyhow::Result<()> {
    match args.subcommand() {
        Some(("show", _)) => handle_config_show(config_path),
        _ => unreachable!("clap should ensure we don't get here"),
    }
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
