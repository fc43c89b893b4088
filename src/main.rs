use std::io::Write;

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use webchat_stream::config::{load_config, AppConfig};
use webchat_stream::observability::init_tracing;
use webchat_stream::protocol::canonical::StreamEvent;
use webchat_stream::stream::{normalize_byte_stream, NormalizerOptions, StreamNormalizer};
use webchat_stream::transport::boxed_byte_stream;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const USAGE: &str = "usage: webchat-stream [--config PATH] [--provider NAME] <capture-file | ->";

struct CliArgs {
    config_path: Option<String>,
    provider: Option<String>,
    input: String,
}

fn parse_args() -> Result<CliArgs, String> {
    let mut config_path = None;
    let mut provider = None;
    let mut input = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = Some(args.next().ok_or("--config needs a path")?),
            "--provider" => provider = Some(args.next().ok_or("--provider needs a name")?),
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ if input.is_none() => input = Some(arg),
            _ => return Err(format!("unexpected argument: {arg}")),
        }
    }
    Ok(CliArgs {
        config_path,
        provider,
        input: input.ok_or_else(|| USAGE.to_string())?,
    })
}

fn main() {
    let args = parse_args().unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(2);
    });

    let mut config = match args.config_path.as_deref() {
        Some(path) => load_config(path).unwrap_or_else(|e| {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }),
        None => load_config(DEFAULT_CONFIG_PATH).unwrap_or_default(),
    };
    if let Some(provider) = args.provider {
        config.provider = provider;
    }

    init_tracing(&config.features.log_level);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    let code = runtime.block_on(replay(config, args.input));
    std::process::exit(code);
}

/// Normalize a captured response body and print one JSON event per line.
async fn replay(config: AppConfig, input: String) -> i32 {
    let reader: Box<dyn AsyncRead + Send + Unpin> = if input == "-" {
        Box::new(tokio::io::stdin())
    } else {
        match tokio::fs::File::open(&input).await {
            Ok(file) => Box::new(file),
            Err(err) => {
                eprintln!("Failed to open {input}: {err}");
                return 1;
            }
        }
    };

    let body = boxed_byte_stream(ReaderStream::new(reader));
    let normalizer = StreamNormalizer::new(NormalizerOptions::from_config(&config));

    let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();
    let printer = async move {
        let stdout = std::io::stdout();
        let mut failed = false;
        while let Some(event) = rx.recv().await {
            failed |= event.kind() == "error";
            let mut out = stdout.lock();
            match serde_json::to_string(&event) {
                Ok(line) => {
                    let _ = writeln!(out, "{line}");
                }
                Err(err) => eprintln!("Failed to encode event: {err}"),
            }
        }
        failed
    };
    let driver = async move {
        normalize_byte_stream(normalizer, body, CancellationToken::new(), &tx).await;
    };

    let ((), failed) = tokio::join!(driver, printer);
    i32::from(failed)
}
