use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use genproxy_core::{
    cancel::{CancelScope, Deadline},
    config::{Config, Secrets},
    model::{GenerationCall, GenerationRequest},
    provider_factory::build_provider,
    relay::{OpenUpstream, relay},
    server,
    sse::SseReassembler,
    telemetry::RelayTrace,
};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(author, version, about = "genproxy: authenticated LLM generation relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve {
        #[arg(short, long, help = "Config file (JSON or TOML)")]
        config: Option<PathBuf>,
        #[arg(long, help = "Override server.bind")]
        bind: Option<String>,
    },
    /// Run one prompt against the configured provider (no auth)
    Generate {
        #[arg(short, long)]
        prompt: String,
        #[arg(long, help = "Print fragments as they arrive")]
        stream: bool,
        #[arg(short, long, help = "Config file (JSON or TOML)")]
        config: Option<PathBuf>,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genproxy=info,genproxy_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(p) => Config::from_path(p).with_context(|| format!("loading {}", p.display())),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind } => {
            let mut cfg = load_config(config.as_ref())?;
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            tracing::info!(
                bind = %cfg.server.bind,
                provider = ?cfg.upstream.provider,
                mode = cfg.relay.stream_mode.as_str(),
                "starting gateway"
            );
            let secrets = Secrets::from_env(&cfg);
            server::serve(cfg, secrets).await?;
        }
        Commands::Generate {
            prompt,
            stream,
            config,
        } => {
            let cfg = load_config(config.as_ref())?;
            let secrets = Secrets::from_env(&cfg);
            let provider = build_provider(&cfg, &secrets)?.with_context(|| {
                format!("no_api_key: set {}", cfg.upstream.api_key_env)
            })?;

            let req = GenerationRequest {
                prompt: genproxy_core::normalizer::normalize_prompt(&prompt),
                stream,
            };
            if req.is_empty() {
                println!();
                return Ok(());
            }
            let call = GenerationCall::new(req.prompt, &cfg.upstream);
            let mut scope = CancelScope::start(Deadline::after(Duration::from_millis(
                cfg.relay.timeout_ms,
            )));

            if !req.stream {
                let text = provider.generate(&call, scope.token()).await;
                scope.finish();
                println!("{}", text?.trim());
                return Ok(());
            }

            let open: OpenUpstream = {
                let provider = provider.clone();
                let token = scope.token().clone();
                Box::pin(async move { provider.open_stream(&call, &token).await })
            };
            let reassembler = SseReassembler::new(provider.payload_format(), cfg.relay.sentinel.clone());
            let trace = RelayTrace::with_provider_model(provider.name(), cfg.upstream.model.clone());
            let mut body = Box::pin(relay(open, reassembler, scope, trace));
            let mut out = io::stdout();
            while let Some(Ok(chunk)) = body.next().await {
                out.write_all(&chunk)?;
                out.flush()?;
            }
            println!();
        }
    }

    Ok(())
}
