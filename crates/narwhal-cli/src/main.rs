use narwhal::{
    ComputeRequest, DEFAULT_SCOPE, ErrorKind, Fingerprint, JsonFileStore, LayoutConfig,
    LayoutWorker, PositionMap, PositionStore, WorkerMessage, WorkerRequest, fingerprint_resolved,
    run_compute,
};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Read, Write};
use std::ops::ControlFlow;

#[derive(Debug)]
enum CliError {
    Usage(&'static str),
    Io(std::io::Error),
    Json(serde_json::Error),
    Engine(narwhal::Error),
    /// The request itself was rejected; the error message has already been written to stdout.
    Rejected(ErrorKind),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Usage(msg) => write!(f, "{msg}"),
            CliError::Io(err) => write!(f, "I/O error: {err}"),
            CliError::Json(err) => write!(f, "JSON error: {err}"),
            CliError::Engine(err) => write!(f, "{err}"),
            CliError::Rejected(kind) => write!(f, "layout request failed ({kind:?})"),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<narwhal::Error> for CliError {
    fn from(value: narwhal::Error) -> Self {
        Self::Engine(value)
    }
}

impl CliError {
    fn is_invalid_input(&self) -> bool {
        match self {
            CliError::Json(_) => true,
            CliError::Engine(err) => {
                matches!(err.kind(), ErrorKind::InvalidInput | ErrorKind::InvalidConfig)
            }
            CliError::Rejected(kind) => {
                matches!(kind, ErrorKind::InvalidInput | ErrorKind::InvalidConfig)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
enum Command {
    #[default]
    Compute,
    Worker,
    Hash,
    Positions,
    Clear,
}

#[derive(Debug, Default)]
struct Args {
    command: Command,
    input: Option<String>,
    pretty: bool,
    progress: bool,
    config: Option<String>,
    store: Option<String>,
    scope: Option<String>,
}

/// A compute request with or without the `"type": "compute"` envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum RequestInput {
    Tagged(WorkerRequest),
    Bare(ComputeRequest),
}

impl RequestInput {
    fn into_request(self) -> ComputeRequest {
        match self {
            RequestInput::Tagged(WorkerRequest::Compute(req)) | RequestInput::Bare(req) => req,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashOut {
    layout_hash: Fingerprint,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PositionsOut<'a> {
    scope: &'a str,
    positions: PositionMap,
    layout_hash: Option<Fingerprint>,
}

#[derive(Serialize)]
struct StatusOut {
    status: &'static str,
}

fn usage() -> &'static str {
    "narwhal-cli\n\
\n\
USAGE:\n\
  narwhal-cli [compute] [--pretty] [--progress] [--config <path>] [--store <path>] [--scope <s>] [<path>|-]\n\
  narwhal-cli worker [--config <path>]\n\
  narwhal-cli hash [<path>|-]\n\
  narwhal-cli positions --store <path> [--scope <s>]\n\
  narwhal-cli clear --store <path>\n\
\n\
NOTES:\n\
  - If <path> is omitted or '-', the request is read from stdin.\n\
  - compute prints the terminal message as JSON; --progress streams progress messages first, one per line.\n\
  - With --store, a non-incremental request without existingPositions starts from the stored layout\n\
    of --scope (default 'global'), and a successful result is saved back.\n\
  - worker reads one request per line from stdin and answers with NDJSON messages.\n\
  - Logs go to stderr; set NARWHAL_LOG (e.g. NARWHAL_LOG=narwhal=debug) to change the filter.\n\
"
}

fn parse_args(argv: &[String]) -> Result<Args, CliError> {
    let mut args = Args::default();

    let mut it = argv.iter().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--help" | "-h" => return Err(CliError::Usage(usage())),
            "compute" => args.command = Command::Compute,
            "worker" => args.command = Command::Worker,
            "hash" => args.command = Command::Hash,
            "positions" => args.command = Command::Positions,
            "clear" => args.command = Command::Clear,
            "--pretty" => args.pretty = true,
            "--progress" => args.progress = true,
            "--config" => {
                let Some(path) = it.next() else {
                    return Err(CliError::Usage(usage()));
                };
                args.config = Some(path.clone());
            }
            "--store" => {
                let Some(path) = it.next() else {
                    return Err(CliError::Usage(usage()));
                };
                args.store = Some(path.clone());
            }
            "--scope" => {
                let Some(scope) = it.next() else {
                    return Err(CliError::Usage(usage()));
                };
                if scope.trim().is_empty() {
                    return Err(CliError::Usage(usage()));
                }
                args.scope = Some(scope.trim().to_string());
            }
            "--" => {
                if let Some(rest) = it.next() {
                    if args.input.is_some() {
                        return Err(CliError::Usage(usage()));
                    }
                    args.input = Some(rest.clone());
                }
                if it.next().is_some() {
                    return Err(CliError::Usage(usage()));
                }
            }
            other if other.starts_with('-') && other != "-" => {
                return Err(CliError::Usage(usage()));
            }
            path => {
                if args.input.is_some() {
                    return Err(CliError::Usage(usage()));
                }
                args.input = Some(path.to_string());
            }
        }
    }

    if matches!(args.command, Command::Positions | Command::Clear) && args.store.is_none() {
        return Err(CliError::Usage(usage()));
    }
    Ok(args)
}

fn read_input(input: Option<&str>) -> Result<String, CliError> {
    match input {
        None | Some("-") => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
        Some(path) => Ok(std::fs::read_to_string(path)?),
    }
}

fn write_json(value: &impl Serialize, pretty: bool) -> Result<(), CliError> {
    let mut out = std::io::stdout().lock();
    if pretty {
        serde_json::to_writer_pretty(&mut out, value)?;
    } else {
        serde_json::to_writer(&mut out, value)?;
    }
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

fn load_config(path: Option<&str>) -> Result<LayoutConfig, CliError> {
    let Some(path) = path else {
        return Ok(LayoutConfig::default());
    };
    let config: LayoutConfig = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    config.validate()?;
    Ok(config)
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("NARWHAL_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn compute(args: &Args) -> Result<(), CliError> {
    let defaults = load_config(args.config.as_deref())?;
    let text = read_input(args.input.as_deref())?;
    let mut request = serde_json::from_str::<RequestInput>(&text)?.into_request();

    let scope = args.scope.as_deref().unwrap_or(DEFAULT_SCOPE);
    let mut store = args.store.as_deref().map(JsonFileStore::new);
    if let Some(store) = &store {
        if !request.is_incremental && request.existing_positions.is_empty() {
            if let Some(stored) = store.load(scope)? {
                tracing::debug!(scope, cached = stored.positions.len(), "starting from stored layout");
                request.is_incremental = true;
                request.existing_positions = stored.positions;
                request.layout_hash = Some(stored.fingerprint);
            }
        }
    }

    let mut emit_error = None;
    let terminal = run_compute(&request, &defaults, &mut |msg| {
        if args.progress {
            if let Err(err) = write_json(&msg, false) {
                emit_error = Some(err);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    });
    if let Some(err) = emit_error {
        return Err(err);
    }

    write_json(&terminal, args.pretty)?;
    match terminal {
        WorkerMessage::Positions(result) => {
            if let Some(store) = &mut store {
                store.save(scope, &result.positions, result.fingerprint)?;
            }
            Ok(())
        }
        WorkerMessage::Error { kind, .. } => Err(CliError::Rejected(kind)),
        WorkerMessage::Progress { .. } => Ok(()),
    }
}

fn serve(args: &Args) -> Result<(), CliError> {
    let defaults = load_config(args.config.as_deref())?;
    let worker = LayoutWorker::spawn(defaults)?;

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(WorkerRequest::Compute(req)) => req,
            Err(err) => {
                write_json(
                    &WorkerMessage::Error {
                        kind: ErrorKind::InvalidInput,
                        message: format!("malformed request: {err}"),
                    },
                    false,
                )?;
                continue;
            }
        };
        for msg in worker.submit(request) {
            write_json(&msg, false)?;
        }
    }

    worker.shutdown();
    Ok(())
}

fn hash(args: &Args) -> Result<(), CliError> {
    let text = read_input(args.input.as_deref())?;
    let request = serde_json::from_str::<RequestInput>(&text)?.into_request();
    let resolved = request.graph().resolve()?;
    write_json(
        &HashOut {
            layout_hash: fingerprint_resolved(&resolved),
        },
        args.pretty,
    )
}

fn run(args: Args) -> Result<(), CliError> {
    match args.command {
        Command::Compute => compute(&args),
        Command::Worker => serve(&args),
        Command::Hash => hash(&args),
        Command::Positions => {
            let store = JsonFileStore::new(args.store.as_deref().unwrap_or_default());
            let scope = args.scope.as_deref().unwrap_or(DEFAULT_SCOPE);
            let stored = store.load(scope)?;
            write_json(
                &PositionsOut {
                    scope,
                    layout_hash: stored.as_ref().map(|s| s.fingerprint),
                    positions: stored.map(|s| s.positions).unwrap_or_default(),
                },
                args.pretty,
            )
        }
        Command::Clear => {
            let mut store = JsonFileStore::new(args.store.as_deref().unwrap_or_default());
            store.clear()?;
            write_json(&StatusOut { status: "cleared" }, args.pretty)
        }
    }
}

fn main() {
    let args = match parse_args(&std::env::args().collect::<Vec<_>>()) {
        Ok(v) => v,
        Err(CliError::Usage(msg)) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    init_logging();

    if let Err(err) = run(args) {
        eprintln!("{err}");
        if err.is_invalid_input() {
            std::process::exit(3);
        }
        std::process::exit(1);
    }
}
