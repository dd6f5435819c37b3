//! `tapi`: command-line front end for the TAPI workbench.
//!
//! Each invocation runs one session against the API server named by the
//! environment (see [`SessionConfig::from_env`]) or the flags below:
//!
//! - **`ping`**: ask the server root for its page and print the status.
//! - **`token`**: obtain an access token.
//! - **`endpoints`**: list the endpoint catalog, optionally with schemas.
//! - **`send`**: send a GET/POST/PUT/DELETE to one endpoint, optionally
//!   verifying the result against the database.
//! - **`demo`**: a full walkthrough in test mode, printing the log.
//!
//! Set `RUST_LOG=tapi_session=debug` to see every request as it is built.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tapi::render::{render_catalog, render_communication, render_endpoint, render_log};
use tapi::{HttpMethod, Selection};
use tapi_session::{
    GeneralRequest, ReqwestTransport, Session, SessionConfig, SessionError, SqliteExecutor,
};

/// tapi: manual testing of the S5 REST API
#[derive(Parser)]
#[command(name = "tapi", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    server: ServerArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ServerArgs {
    /// API host, optionally with a path prefix (`server/api`).
    #[arg(long, global = true)]
    host: Option<String>,

    /// API port.
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Build and log requests but substitute canned replies.
    #[arg(long, global = true, env = "TAPI_TEST_MODE")]
    test_mode: bool,

    /// Target system configuration file with a `Configuration.S5Db` section.
    #[arg(long, global = true, value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Per-request timeout in seconds.
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the server answers.
    Ping,

    /// Obtain an access token with the configured credentials.
    ///
    /// With `--from-db` the credentials are first read from the operator's
    /// API key in the database.
    Token {
        #[arg(long)]
        from_db: bool,
    },

    /// List the endpoint catalog.
    Endpoints {
        /// Also download the Swagger document and fill in schemas.
        #[arg(long)]
        schema: bool,

        /// Index of the Swagger document to use when several are listed.
        #[arg(long, value_name = "N")]
        source: Option<usize>,

        /// Fill in schemas from a local Swagger file instead of the server.
        #[arg(long, value_name = "FILE")]
        schema_file: Option<PathBuf>,
    },

    /// Send a request to one endpoint.
    ///
    /// Examples:
    ///   tapi send GET v1.0/Company --select ID,Name
    ///   tapi send POST v1.0/Company --attr Name=ACME --attr Code=AC --verify
    ///   tapi send DELETE v1.0/Company/{id} --param id=7c9e6679-7425-40de-944b-e07fc1f90ae7
    Send(SendArgs),

    /// Walk through every workflow in test mode and print the log.
    Demo,
}

#[derive(Args)]
struct SendArgs {
    /// GET | POST | PUT | DELETE
    method: HttpMethod,

    /// Endpoint path as listed by `tapi endpoints`.
    path: String,

    /// Path parameter value: NAME=VALUE. Repeatable.
    #[arg(long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,

    /// Body attribute value: NAME=VALUE. Repeatable.
    #[arg(long = "attr", value_name = "NAME=VALUE")]
    attrs: Vec<String>,

    /// Fill every parameter and attribute with generated values first.
    #[arg(long)]
    generate: bool,

    /// Select clause replacing the endpoint's own.
    #[arg(long, value_name = "FIELDS")]
    select: Option<String>,

    /// Send to this path instead of the endpoint's.
    #[arg(long, value_name = "PATH")]
    raw_path: Option<String>,

    /// Index of the Swagger document to use when several are listed.
    #[arg(long, value_name = "N")]
    source: Option<usize>,

    /// Take schemas from a local Swagger file instead of the server.
    #[arg(long, value_name = "FILE")]
    schema_file: Option<PathBuf>,

    /// Read credentials from the database before requesting a token.
    #[arg(long)]
    from_db: bool,

    /// Check the affected records in the database afterwards.
    #[arg(long)]
    verify: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tapi_session=info,tapi_cli=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut session = open_session(&cli.server, matches!(cli.command, Command::Demo));

    match cli.command {
        Command::Ping => {
            let status = session.test_connection().await.unwrap_or_else(|e| fail(e));
            println!("{status}");
            if !status.is_success() {
                process::exit(1);
            }
        }

        Command::Token { from_db } => {
            if from_db {
                session.load_credentials().await.unwrap_or_else(|e| fail(e));
            }
            let token = session.request_token().await.unwrap_or_else(|e| fail(e));
            let out = serde_json::json!({
                "token_type": token.token_type,
                "access_token": token.token,
                "valid_from": token.valid_from,
                "valid_to": token.valid_to,
            });
            println!("{out:#}");
        }

        Command::Endpoints {
            schema,
            source,
            schema_file,
        } => {
            session.discover_endpoints().await.unwrap_or_else(|e| fail(e));
            if let Some(path) = schema_file {
                session.load_schema_file(path).unwrap_or_else(|e| fail(e));
            } else if schema {
                discover_schema(&mut session, source).await;
            }
            print!("{}", render_catalog(session.catalog()));
        }

        Command::Send(args) => send(&mut session, args).await,

        Command::Demo => demo(&mut session).await,
    }
}

fn open_session(args: &ServerArgs, force_test_mode: bool) -> Session {
    let mut config =
        SessionConfig::from_env().unwrap_or_else(|e| fatal(&format!("configuration: {e}")));
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.test_mode |= args.test_mode || force_test_mode;
    if let Some(path) = &args.config_file {
        config
            .db
            .load_config_file(path)
            .unwrap_or_else(|e| fail(e.into()));
    }
    if !config.server.has_valid_host() {
        tracing::warn!("cli: {:?} does not look like a host name", config.server.host);
    }

    let executor = config.db.dir.clone().map(SqliteExecutor::new);
    let transport = ReqwestTransport::with_timeout(Duration::from_secs(args.timeout))
        .unwrap_or_else(|e| fail(e.into()));

    let session = Session::new(config, Arc::new(transport));
    match executor {
        Some(executor) => session.with_executor(Arc::new(executor)),
        None => session,
    }
}

async fn discover_schema(session: &mut Session, source: Option<usize>) {
    session
        .discover_schema(|sources| {
            if source.is_none() {
                eprintln!("several Swagger documents are listed, pick one with --source:");
                for (i, s) in sources.iter().enumerate() {
                    eprintln!("  {i}  {s}");
                }
            }
            source
        })
        .await
        .unwrap_or_else(|e| fail(e));
}

async fn send(session: &mut Session, args: SendArgs) {
    if args.from_db {
        session.load_credentials().await.unwrap_or_else(|e| fail(e));
    }
    if session.config().credentials.is_complete() || session.in_test_mode() {
        session.request_token().await.unwrap_or_else(|e| fail(e));
    }
    session.discover_endpoints().await.unwrap_or_else(|e| fail(e));
    match &args.schema_file {
        Some(path) => {
            session.load_schema_file(path).unwrap_or_else(|e| fail(e));
        }
        None => discover_schema(session, args.source).await,
    }

    let path = args.path.trim_start_matches('/');
    let selection = session
        .catalog()
        .select(path, args.method)
        .unwrap_or_else(|| fatal(&format!("no endpoint {} {path}", args.method)));
    fill_endpoint(session, &selection, &args);

    let mut general = GeneralRequest::new(args.method);
    general.select = args.select.clone();
    general.path = args.raw_path.clone().unwrap_or_default();

    let id = session
        .send_general(&general, Some(&selection))
        .await
        .unwrap_or_else(|e| fail(e));
    if let Some(comm) = session.communication(id) {
        print!("{}", render_communication(comm));
    }

    if args.verify {
        let state = session.verify(id).await.unwrap_or_else(|e| fail(e));
        println!("verification: {state}");
    }
}

/// Apply `--generate`, `--param` and `--attr` to the selected endpoint.
fn fill_endpoint(session: &mut Session, selection: &Selection, args: &SendArgs) {
    let Some(endpoint) = session.catalog_mut().get_mut(selection) else {
        return;
    };
    if args.generate {
        let mut rng = rand::thread_rng();
        endpoint.generate_parameters(&mut rng);
        endpoint.generate_attributes(&mut rng);
    }

    for raw in &args.params {
        let (name, value) = split_pair(raw);
        let param = endpoint
            .parameter_mut(name)
            .unwrap_or_else(|| fatal(&format!("no path parameter {name:?}")));
        if !param.set_value(value) {
            fatal(&format!("{value:?} is not a valid {}", param.type_label()));
        }
    }
    for raw in &args.attrs {
        let (name, value) = split_pair(raw);
        let attr = endpoint
            .attribute_mut(name)
            .unwrap_or_else(|| fatal(&format!("no attribute {name:?}")));
        if !attr.set_value(value) {
            fatal(&format!("{value:?} is not a valid {}", attr.type_label()));
        }
    }

    if !endpoint.ready_to_send() {
        tracing::warn!("cli: {} is missing required values", endpoint.complete_path());
    }
}

async fn demo(session: &mut Session) {
    let status = session.test_connection().await.unwrap_or_else(|e| fail(e));
    println!("connection: {status}");
    session.request_token().await.unwrap_or_else(|e| fail(e));
    session.discover_endpoints().await.unwrap_or_else(|e| fail(e));
    discover_schema(session, Some(0)).await;
    print!("{}", render_catalog(session.catalog()));

    let mut rng = rand::thread_rng();
    for method in HttpMethod::ALL {
        let Some(selection) = session
            .catalog()
            .endpoints()
            .iter()
            .find(|e| e.method() == method)
            .map(|e| Selection {
                path: e.path().to_string(),
                method,
            })
        else {
            continue;
        };
        if let Some(endpoint) = session.catalog_mut().get_mut(&selection) {
            endpoint.generate_parameters(&mut rng);
            endpoint.generate_attributes(&mut rng);
            print!("\n{}", render_endpoint(endpoint));
        }
        let general = GeneralRequest::new(method);
        if let Err(e) = session.send_general(&general, Some(&selection)).await {
            eprintln!("{}", e.report());
        }
    }

    print!("\n{}", render_log(session.log()));
}

fn split_pair(raw: &str) -> (&str, &str) {
    raw.split_once('=')
        .unwrap_or_else(|| fatal(&format!("invalid {raw:?}: expected NAME=VALUE")))
}

/// Print the operator-facing report for `e` and exit with code 2.
fn fail(e: SessionError) -> ! {
    eprintln!("tapi: {}", e.report());
    process::exit(2);
}

/// Print an error message to stderr and exit with code 2.
fn fatal(msg: &str) -> ! {
    eprintln!("tapi: {msg}");
    process::exit(2);
}
