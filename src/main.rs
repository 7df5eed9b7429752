use std::{
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use cell_seg_rs::{
    storage::load_sdk_config, Config, MaskPipeline, S3Event, S3ObjectStore, SageMakerEndpoint,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    version,
    about = "Segment cells in an uploaded image and store the mask",
    long_about = None
)]
struct Cli {
    /// S3 notification JSON to process (stdin when omitted)
    #[arg(short, long)]
    event: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Serve the handler under the Lambda runtime
    #[cfg(feature = "lambda")]
    #[arg(long)]
    lambda: bool,

    #[command(flatten)]
    config: Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    cli.config.validate()?;
    let sdk_config = load_sdk_config(&cli.config).await?;
    let store = S3ObjectStore::from_sdk_config(&sdk_config);
    let endpoint = SageMakerEndpoint::from_sdk_config(&sdk_config, &cli.config)?;
    let pipeline = MaskPipeline::new(store, endpoint, cli.config);

    #[cfg(feature = "lambda")]
    if cli.lambda {
        return serve_lambda(pipeline).await;
    }

    let event = read_event(cli.event.as_deref())?;
    let succeeded = pipeline.handle_event(&event).await?;
    println!("{succeeded}");

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_event(path: Option<&Path>) -> Result<S3Event> {
    let json = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event: {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read event from stdin")?;
            buf
        }
    };
    Ok(S3Event::from_json(&json)?)
}

#[cfg(feature = "lambda")]
async fn serve_lambda(pipeline: MaskPipeline<S3ObjectStore, SageMakerEndpoint>) -> Result<()> {
    use lambda_runtime::{service_fn, LambdaEvent};
    use std::sync::Arc;

    let pipeline = Arc::new(pipeline);
    lambda_runtime::run(service_fn(move |event: LambdaEvent<S3Event>| {
        let pipeline = Arc::clone(&pipeline);
        async move {
            tracing::info!(request_id = %event.context.request_id, "received S3 event");
            pipeline
                .handle_event(&event.payload)
                .await
                .map_err(lambda_runtime::Error::from)
        }
    }))
    .await
    .map_err(|e| anyhow::anyhow!(e))
}
