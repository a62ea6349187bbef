use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use ironkdc_server::ServerConfig;

/// IronKDC Kerberos Authentication Service
#[derive(Parser, Debug)]
#[clap(author = "Devolutions", about = "IronKDC Kerberos Authentication Service")]
#[clap(version, long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,

    /// Realm served by this KDC
    #[clap(short, long, value_parser)]
    realm: Option<String>,

    /// Principal database (TOML)
    #[clap(short, long, value_parser)]
    database: Option<PathBuf>,

    /// Ports to listen on, e.g. `+`, `88`, `kerberos/udp`; repeatable
    #[clap(short, long, value_parser)]
    ports: Vec<String>,

    /// Number of workers; 0 means one per processor
    #[clap(short, long, value_parser)]
    workers: Option<usize>,

    /// Serve from a single worker without supervision
    #[clap(long)]
    single_process: bool,

    /// A file with IronKDC logs; defaults to stderr
    #[clap(short, long, value_parser)]
    log_file: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[clap(long)]
    check_config: bool,
}

#[derive(Debug)]
pub(crate) struct Config {
    pub(crate) server: ServerConfig,
    pub(crate) log_file: Option<PathBuf>,
    pub(crate) check_config: bool,
}

impl Config {
    pub(crate) fn parse_args() -> anyhow::Result<Self> {
        let args = Args::parse();

        let mut server = match &args.config {
            Some(path) => {
                let mut server =
                    ServerConfig::load(path).with_context(|| format!("couldn't load {}", path.display()))?;

                // A relative database path is relative to the configuration file.
                if server.database.is_relative() {
                    if let Some(dir) = path.parent() {
                        server.database = dir.join(&server.database);
                    }
                }

                server
            }
            None => {
                let realm = args.realm.clone().context("--realm is required without --config")?;
                let database = args
                    .database
                    .clone()
                    .context("--database is required without --config")?;
                ServerConfig::new(realm, database)
            }
        };

        if let Some(realm) = args.realm {
            server.realm = realm;
        }

        if let Some(database) = args.database {
            server.database = database;
        }

        if !args.ports.is_empty() {
            server.listen.ports = args.ports;
        }

        if let Some(workers) = args.workers {
            server.workers.count = workers;
        }

        if args.single_process {
            server.single_process = true;
        }

        Ok(Self {
            server,
            log_file: args.log_file,
            check_config: args.check_config,
        })
    }
}
