//! surql command-line client
//!
//! Connects to a database over WebSocket or HTTP, optionally signs in, and
//! runs a single command. Results are printed as pretty JSON.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use surql_rpc::{ClientConfig, Credentials, LiveStream, Surreal};
use surql_types::{Object, Value};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// surql - command-line client for the database RPC interface
#[derive(Parser, Debug)]
#[command(name = "surql")]
#[command(version, about, long_about = None)]
#[command(after_help = "\
Examples:
  surql version
  surql --ns test --db test --user root --pass root query 'SELECT * FROM person'
  surql --ns test --db test query 'SELECT * FROM person WHERE age > $min' --vars '{\"min\": 18}'
  surql --ns test --db test select person:tobie
  surql --ns test --db test live person --diff
")]
struct Cli {
    /// Server address (`ws://`, `wss://`, `http://` or `https://`)
    #[arg(long, default_value = "ws://localhost:8000", env = "SURQL_ENDPOINT")]
    endpoint: String,

    /// JSON client configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Namespace to use
    #[arg(long, requires = "db")]
    ns: Option<String>,

    /// Database to use
    #[arg(long, requires = "ns")]
    db: Option<String>,

    /// Username to sign in with
    #[arg(long, requires = "pass")]
    user: Option<String>,

    /// Password to sign in with
    #[arg(long, requires = "user", env = "SURQL_PASS", hide_env_values = true)]
    pass: Option<String>,

    /// Sign in as a user of the selected namespace/database instead of root
    #[arg(long, requires = "ns")]
    scoped: bool,

    /// Per-call timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the server version
    Version,

    /// Print information about the signed-in user
    Info,

    /// Run a query
    Query {
        /// Query text
        sql: String,

        /// Bind variables as a JSON object
        #[arg(long, value_name = "JSON")]
        vars: Option<String>,
    },

    /// Select a table or record
    Select {
        /// Table (`person`) or record id (`person:tobie`)
        target: String,
    },

    /// Print changes to a table until interrupted
    Live {
        table: String,

        /// Receive JSON patches instead of full records
        #[arg(long)]
        diff: bool,
    },
}

/// Set up logging to stderr, plus an optional log file.
/// Defaults to debug level in debug builds and info otherwise.
fn setup_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("surql={default_level}")));

    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(filter)
            .init();
        return Ok(None);
    };

    let directory = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let filename = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;

    let file_appender = tracing_appender::rolling::never(directory, filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .init();

    Ok(Some(guard))
}

fn client_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::default(),
    };

    if let Some(ms) = cli.timeout_ms {
        config = config.with_timeout(Duration::from_millis(ms));
    }
    if let (Some(ns), Some(db)) = (&cli.ns, &cli.db) {
        config = config.with_context(ns, db);
    }
    Ok(config)
}

fn credentials(cli: &Cli) -> Option<Credentials> {
    let (user, pass) = (cli.user.as_deref()?, cli.pass.as_deref()?);

    let credentials = match (&cli.ns, cli.scoped) {
        (Some(ns), true) => {
            let scoped = Credentials::scoped(ns, user, pass);
            match &cli.db {
                Some(db) => scoped.database(db),
                None => scoped,
            }
        }
        _ => Credentials::root(user, pass),
    };
    Some(credentials)
}

fn parse_vars(vars: Option<&str>) -> Result<Object> {
    let Some(json) = vars else {
        return Ok(Object::new());
    };

    let parsed: serde_json::Value =
        serde_json::from_str(json).context("--vars is not valid JSON")?;
    match Value::from(parsed) {
        Value::Object(object) => Ok(object),
        other => bail!("--vars must be a JSON object, got {}", other.kind()),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.as_deref())?;

    let config = client_config(&cli)?;
    let mut db = Surreal::connect(&cli.endpoint, config)
        .await
        .with_context(|| format!("Failed to connect to {}", cli.endpoint))?;

    if let Some(credentials) = credentials(&cli) {
        db.signin(&credentials)
            .await
            .with_context(|| format!("Failed to sign in as {}", credentials.username))?;
        info!("Signed in as {}", credentials.username);
    }

    let outcome = run(&mut db, cli.command).await;
    db.close().await;
    outcome
}

async fn run(db: &mut Surreal, command: Command) -> Result<()> {
    match command {
        Command::Version => println!("{}", db.version().await?),
        Command::Info => print_json(&db.info().await?)?,
        Command::Query { sql, vars } => {
            let bindings = parse_vars(vars.as_deref())?;
            let results = db.query(&sql, bindings).await?;
            let rendered: Vec<serde_json::Value> = results
                .iter()
                .map(|statement| {
                    serde_json::json!({
                        "status": statement.status,
                        "time": statement.time,
                        "result": statement.result,
                    })
                })
                .collect();
            print_json(&rendered)?;
        }
        Command::Select { target } => print_json(&db.select(target.as_str()).await?)?,
        Command::Live { table, diff } => {
            let stream = db.live(table.as_str(), diff).await?;
            let id = stream.id();
            eprintln!("Watching {table} (live query {id}), press Ctrl-C to stop");
            follow(stream).await?;
            db.kill(id)
                .await
                .with_context(|| format!("Failed to kill live query {id}"))?;
        }
    }
    Ok(())
}

/// Print notifications until Ctrl-C or until the subscription ends.
async fn follow(mut stream: LiveStream) -> Result<()> {
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                return Ok(());
            }
            notification = stream.next() => {
                let Some(notification) = notification else {
                    eprintln!("Live query ended");
                    return Ok(());
                };
                print_json(&serde_json::json!({
                    "time": chrono::Utc::now().to_rfc3339(),
                    "action": notification.action.to_string(),
                    "record": notification.record,
                    "result": notification.result,
                }))?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("surql").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_ns_requires_db() {
        let result = Cli::try_parse_from(["surql", "--ns", "test", "version"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_overrides() {
        let cli = parse(&["--ns", "test", "--db", "app", "--timeout-ms", "500", "info"]);
        let config = client_config(&cli).unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(500));
        assert_eq!(config.namespace.as_deref(), Some("test"));
        assert_eq!(config.database.as_deref(), Some("app"));
    }

    #[test]
    fn test_root_credentials_by_default() {
        let cli = parse(&["--ns", "test", "--db", "app", "--user", "root", "--pass", "pw", "info"]);
        let credentials = credentials(&cli).unwrap();
        assert_eq!(credentials, Credentials::root("root", "pw"));
    }

    #[test]
    fn test_scoped_credentials() {
        let cli = parse(&[
            "--ns", "test", "--db", "app", "--user", "tobie", "--pass", "pw", "--scoped", "info",
        ]);
        let credentials = credentials(&cli).unwrap();
        assert_eq!(credentials, Credentials::scoped("test", "tobie", "pw").database("app"));
    }

    #[test]
    fn test_no_credentials_without_user() {
        let cli = parse(&["version"]);
        assert!(credentials(&cli).is_none());
    }

    #[test]
    fn test_parse_vars() {
        let vars = parse_vars(Some(r#"{"min": 18, "name": "Tobie"}"#)).unwrap();
        assert_eq!(vars.get("min"), Some(&Value::Integer(18)));
        assert_eq!(vars.get("name"), Some(&Value::from("Tobie")));

        assert!(parse_vars(None).unwrap().is_empty());
        assert!(parse_vars(Some("[1, 2]")).is_err());
        assert!(parse_vars(Some("{not json")).is_err());
    }

    #[test]
    fn test_live_subcommand() {
        let cli = parse(&["live", "person", "--diff"]);
        assert!(matches!(cli.command, Command::Live { ref table, diff: true } if table == "person"));
    }
}
