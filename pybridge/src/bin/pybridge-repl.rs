use std::process;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pybridge::{BridgeError, Interp, InterpConfig};

/// Initialize tracing with PYBRIDGE_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("PYBRIDGE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("info") => "info",
            Ok("error") => "error",
            _ => "warn",
        };
        EnvFilter::new(format!("pybridge={level},pybridge_repl={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

struct Args {
    python: Option<String>,
    timeout: Option<Duration>,
    extra: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args {
        python: None,
        timeout: None,
        extra: Vec::new(),
    };

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--python" => {
                i += 1;
                parsed.python = Some(args.get(i).ok_or("--python requires a value")?.clone());
            }
            "--timeout" => {
                i += 1;
                let raw = args.get(i).ok_or("--timeout requires a value")?;
                let secs: f64 = raw
                    .parse()
                    .map_err(|_| format!("invalid timeout '{raw}'"))?;
                if !secs.is_finite() || secs <= 0.0 {
                    return Err(format!("invalid timeout '{raw}'"));
                }
                parsed.timeout = Some(Duration::from_secs_f64(secs));
            }
            "--" => {
                parsed.extra.extend(args[i + 1..].iter().cloned());
                break;
            }
            "--help" | "-h" => return Err("".to_string()),
            arg => return Err(format!("unknown argument: {arg}")),
        }
        i += 1;
    }

    Ok(parsed)
}

enum Line<'a> {
    Get(&'a str),
    Set(&'a str, &'a str),
    Run(&'a str),
    Quit,
}

fn parse_line(line: &str) -> Result<Line<'_>, String> {
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(Line::Run(line));
    };
    let (cmd, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let args = args.trim();
    match cmd {
        "get" if !args.is_empty() => Ok(Line::Get(args)),
        "set" => match args.split_once(char::is_whitespace) {
            Some((name, json)) => Ok(Line::Set(name, json.trim())),
            None => Err("usage: :set NAME JSON".to_string()),
        },
        "quit" | "q" => Ok(Line::Quit),
        "get" => Err("usage: :get NAME".to_string()),
        other => Err(format!("unknown command :{other}")),
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let args = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!();
            eprintln!("Usage: pybridge-repl [--python <path>] [--timeout <secs>] [-- <args>...]");
            eprintln!();
            eprintln!("Lines are run as Python. Commands:");
            eprintln!("  :get NAME         print a variable as JSON");
            eprintln!("  :set NAME JSON    bind a variable");
            eprintln!("  :quit             shut the interpreter down");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(args).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = InterpConfig::new();
    if let Some(python) = args.python {
        config = config.with_program(python);
    }
    if let Some(timeout) = args.timeout {
        config = config.with_request_timeout(timeout);
    }

    let mut py = Interp::builder()
        .config(config)
        .with_args(args.extra)
        .build()
        .context("configuring interpreter")?;
    py.start().context("starting interpreter")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match parse_line(&line) {
            Ok(Line::Quit) => break,
            Ok(Line::Get(name)) => py
                .get(name)
                .await
                .map(|v| format!("{v}\n")),
            Ok(Line::Set(name, json)) => match serde_json::from_str::<serde_json::Value>(json) {
                Ok(value) => py.set(name, &value).await.map(|()| String::new()),
                Err(e) => {
                    eprintln!("invalid JSON: {e}");
                    continue;
                }
            },
            Ok(Line::Run(script)) => py.run(script).await,
            Err(msg) => {
                eprintln!("{msg}");
                continue;
            }
        };

        match reply {
            Ok(text) => {
                stdout.write_all(text.as_bytes()).await?;
                stdout.flush().await?;
            }
            Err(e @ BridgeError::Interpreter { .. }) => eprintln!("{e}"),
            Err(e) => return Err(e).context("interpreter failed"),
        }
    }

    let status = py.shutdown().await.context("shutting down interpreter")?;
    tracing::debug!(%status, "Interpreter shut down");
    Ok(())
}
