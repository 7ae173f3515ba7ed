use clap::{crate_version, App, Arg};
use log::LevelFilter;
use std::path::PathBuf;

/// Runtime configuration, straight from the command line.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub workers: usize,
    pub tls: bool,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub log_level: LevelFilter,
}

impl Config {
    /// Parses `std::env::args`; clap exits on `--help` or bad input.
    #[must_use]
    pub fn from_args() -> Self {
        let matches = App::new("h2d")
            .version(crate_version!())
            .about("HTTP/2 server with a fork-per-core reactor")
            .arg(
                Arg::with_name("host")
                    .short("h")
                    .long("host")
                    .takes_value(true)
                    .default_value("0.0.0.0"),
            )
            .arg(
                Arg::with_name("port")
                    .short("p")
                    .long("port")
                    .takes_value(true)
                    .default_value("8080"),
            )
            .arg(
                Arg::with_name("max-connections")
                    .short("m")
                    .long("max-connections")
                    .takes_value(true)
                    .default_value("1024"),
            )
            .arg(
                Arg::with_name("workers")
                    .short("w")
                    .long("workers")
                    .takes_value(true)
                    .help("reactor processes (default: one per CPU)"),
            )
            .arg(Arg::with_name("tls").long("tls").help("serve over TLS (ALPN h2)"))
            .arg(
                Arg::with_name("cert")
                    .long("cert")
                    .takes_value(true)
                    .requires("tls"),
            )
            .arg(
                Arg::with_name("key")
                    .long("key")
                    .takes_value(true)
                    .requires("tls"),
            )
            .arg(
                Arg::with_name("log-level")
                    .long("log-level")
                    .takes_value(true)
                    .possible_values(&["debug", "info", "warn", "error", "none"])
                    .default_value("info"),
            )
            .get_matches();

        Self {
            host: matches.value_of("host").expect("has default").to_owned(),
            port: parse_or_exit(&matches, "port"),
            max_connections: parse_or_exit(&matches, "max-connections"),
            workers: matches
                .value_of("workers")
                .map_or_else(num_cpus::get, |value| {
                    value.parse().unwrap_or_else(|_| {
                        eprintln!("invalid value for --workers: {}", value);
                        std::process::exit(2);
                    })
                })
                .max(1),
            tls: matches.is_present("tls"),
            cert: matches.value_of("cert").map(PathBuf::from),
            key: matches.value_of("key").map(PathBuf::from),
            log_level: match matches.value_of("log-level").expect("has default") {
                "debug" => LevelFilter::Debug,
                "warn" => LevelFilter::Warn,
                "error" => LevelFilter::Error,
                "none" => LevelFilter::Off,
                _ => LevelFilter::Info,
            },
        }
    }
}

fn parse_or_exit<T: std::str::FromStr>(matches: &clap::ArgMatches<'_>, name: &str) -> T {
    let value = matches.value_of(name).expect("has default");
    value.parse().unwrap_or_else(|_| {
        eprintln!("invalid value for --{}: {}", name, value);
        std::process::exit(2);
    })
}
