use std::{path::PathBuf, sync::OnceLock};

use clap::{Arg, ArgMatches, Command};

pub fn load_command_line_args() -> ArgMatches {
    Command::new("TQServer")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .help("Mode of operation")
                .value_parser(["dev", "prod"]),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to the server configuration file")
                .default_value("server.yaml")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .get_matches()
}

pub fn cmd_get_operation_mode() -> Option<String> {
    let cli = get_command_line_args();
    cli.get_one::<String>("mode").map(|s| s.to_string())
}

pub fn cmd_get_config_path() -> PathBuf {
    let cli = get_command_line_args();
    cli.get_one::<PathBuf>("config").cloned().unwrap_or_else(|| PathBuf::from("server.yaml"))
}

static COMMAND_LINE_ARGS_SINGLETON: OnceLock<ArgMatches> = OnceLock::new();

pub fn get_command_line_args() -> &'static ArgMatches {
    COMMAND_LINE_ARGS_SINGLETON.get_or_init(|| load_command_line_args())
}
