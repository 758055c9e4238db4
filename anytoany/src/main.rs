use std::path::PathBuf;
use std::process::ExitCode;

use clap::{arg, command, crate_name, value_parser, ArgAction, Command};
use client::ConvertParams;
use kernel::TargetFormat;

mod cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = command!(crate_name!())
        .version(clap::crate_version!())
        .about(clap::crate_description!())
        .subcommand(Command::new(cli::VERSION_SUBCOMMAND).about(cli::VERSION_DESCRIPTION))
        .subcommand(Command::new(cli::BUGREPORT_SUBCOMMAND).about(cli::BUGREPORT_DESCRIPTION))
        .subcommand(
            Command::new(cli::SERVER_SUBCOMMAND)
                .about(cli::SERVER_DESCRIPTION)
                .arg(
                    arg!(-p --port <PORT>)
                        .required(false)
                        .value_parser(value_parser!(u16))
                        .help("Port to listen on. Overrides ANYTOANY_PORT"),
                )
                .arg(
                    arg!(-d --"data-dir" <DIR>)
                        .required(false)
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory for uploads, converted files and archives. Overrides ANYTOANY_DATA_DIR"),
                ),
        )
        .subcommand(
            Command::new(cli::CONVERT_SUBCOMMAND)
                .about(cli::CONVERT_DESCRIPTION)
                .arg(
                    arg!(-u --uri <URI>)
                        .required(false)
                        .default_value(cli::DEFAULT_URI)
                        .help("AnyToAny service URI"),
                )
                .arg(
                    arg!(-f --format <FORMAT>)
                        .required(true)
                        .value_parser(|s: &str| s.parse::<TargetFormat>().map(|_| s.to_owned()))
                        .help("Target format, for example png, jpg, webp or pdf"),
                )
                .arg(
                    arg!(-o --output <DIR>)
                        .required(false)
                        .default_value(".")
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory to save the result into"),
                )
                .arg(
                    arg!(-x --extract)
                        .action(ArgAction::SetTrue)
                        .help("Unpack a returned zip into the output directory"),
                )
                .arg(
                    arg!(<PATHS> ...)
                        .value_parser(value_parser!(PathBuf))
                        .help("Images or directories with images to convert"),
                ),
        )
        .arg_required_else_help(true)
        .disable_version_flag(true)
        .get_matches();

    if cli.subcommand_matches(cli::VERSION_SUBCOMMAND).is_some() {
        cli::version::run();
    } else if cli.subcommand_matches(cli::BUGREPORT_SUBCOMMAND).is_some() {
        cli::bugreport::run();
    } else if let Some(server_matches) = cli.subcommand_matches(cli::SERVER_SUBCOMMAND) {
        if let Err(e) = cli::server::run(server_matches).await {
            eprintln!("server error: {e}");
            return ExitCode::FAILURE;
        }
    } else if let Some(convert_matches) = cli.subcommand_matches(cli::CONVERT_SUBCOMMAND) {
        let params = ConvertParams {
            uri: convert_matches
                .get_one::<String>("uri")
                .cloned()
                .unwrap_or_else(|| cli::DEFAULT_URI.to_owned()),
            target_format: convert_matches
                .get_one::<String>("format")
                .cloned()
                .unwrap_or_default(),
            output: convert_matches
                .get_one::<PathBuf>("output")
                .cloned()
                .unwrap_or_else(|| PathBuf::from(".")),
            extract: convert_matches.get_flag("extract"),
            inputs: convert_matches
                .get_many::<PathBuf>("PATHS")
                .map(|paths| paths.cloned().collect())
                .unwrap_or_default(),
        };
        if let Err(e) = cli::client::convert(params).await {
            eprintln!("convert error: {e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
