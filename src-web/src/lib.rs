pub mod config;
pub mod error;
pub mod output;
pub mod routes;
pub mod state;
pub mod tryon;

use anyhow::Context;
use catvton::{CatVtonPipeline, CheckpointVersion, PipelineConfig};
use cloth_masker::AutoMasker;

use crate::{
    config::Args,
    state::AppState,
    tryon::{TryOnEngine, TryOnSettings},
};

pub const DEFAULT_LOG_FILTER: &str = "vton=info,catvton=info,cloth_masker=info,tower_http=info";

fn load_engine(args: &Args) -> anyhow::Result<TryOnEngine<CatVtonPipeline, AutoMasker>> {
    let pipeline = CatVtonPipeline::new(&PipelineConfig {
        base_model: args.base_model_path.clone(),
        attn_ckpt: args.resume_path.clone(),
        attn_ckpt_version: CheckpointVersion::Mix,
        weight_dtype: args.mixed_precision,
    })
    .context("Failed to load try-on pipeline")?;
    let masker = AutoMasker::new(&args.resume_path).context("Failed to load auto masker")?;

    Ok(TryOnEngine::new(
        pipeline,
        masker,
        TryOnSettings {
            size: args.size(),
            output_dir: args.output_dir.clone(),
            repaint: args.repaint,
        },
    ))
}

/// Load the models, then serve the demo until Ctrl-C or SIGTERM.
pub async fn run(args: Args) -> anyhow::Result<()> {
    tracing::info!(
        "Starting with base model {}, checkpoint {}, {}x{}, local rank {}",
        args.base_model_path,
        args.resume_path,
        args.width,
        args.height,
        args.local_rank
    );
    catvton::init_runtime(args.device, args.allow_tf32)?;

    let engine = {
        let args = args.clone();
        tokio::task::spawn_blocking(move || load_engine(&args)).await??
    };
    tracing::info!("Models loaded");

    let app = routes::router(AppState::new(engine));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
