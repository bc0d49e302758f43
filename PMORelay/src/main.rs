use anyhow::Context;
use pmoconfig::get_config;
use pmorelay::{BroadcastHub, FfmpegTranscoder, RelayConfigExt, RelayServerExt};
use pmoserver::{LoggingOptions, ServerBuilder};
use pmotracks::TrackClient;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_config();

    // ========== PHASE 1 : Infrastructure ==========
    let mut server = ServerBuilder::new_configured().build();
    server
        .init_logging(LoggingOptions::from_config(&config))
        .await;

    // An optional argument replaces the configured playlist source
    if let Some(playlist) = std::env::args().nth(1) {
        config
            .set_relay_playlist_source(&playlist)
            .context("Cannot save the playlist source")?;
        info!("Playlist source set to {}", playlist);
    }

    let relay_config = config.get_relay_config()?;

    // ========== PHASE 2 : Broadcast hub ==========
    info!("Loading playlist {}", relay_config.playlist_source);
    let source = Arc::new(TrackClient::new()?);
    let transcoder = Arc::new(FfmpegTranscoder::new(
        relay_config.transcoder.ffmpeg_path.clone(),
    ));

    let hub = match BroadcastHub::start(relay_config, source, transcoder).await {
        Ok(hub) => hub,
        Err(e) => {
            error!("Cannot start the relay: {}", e);
            std::process::exit(1);
        }
    };
    let pacing = hub.spawn();

    // ========== PHASE 3 : HTTP ==========
    let info = server.info();
    server
        .add_route("/info", move || {
            let info = info.clone();
            async move {
                serde_json::json!({
                    "name": info.name,
                    "version": env!("CARGO_PKG_VERSION"),
                })
            }
        })
        .await;
    server.init_relay(hub.clone()).await;
    server.add_redirect("/", "/swagger-ui/relay").await;

    server.start().await?;
    info!("Listen at {}/stream", server.info().base_url);
    info!("Press Ctrl+C to stop...");
    server.wait().await;

    hub.stop(pacing).await;
    info!("PMORelay stopped");

    Ok(())
}
