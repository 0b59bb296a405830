use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use crossbeam_channel::unbounded;

use crate::catalog;
use crate::config;
use crate::coordinator::PlaybackPolicy;
use crate::data::{self, CatalogService};
use crate::feed::{Feed, FeedOptions};
use crate::logging;
use crate::session::{FeedSession, SessionOptions};
use crate::transport::TransportFactory;
use crate::ui;
use crate::video;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    pub offline: bool,
}

pub fn run(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;

    if let Err(err) = logging::init(&cfg.log) {
        eprintln!("warning: logging disabled: {err:#}");
    }

    let (service, status) = catalog_service(&cfg, options.offline);
    log::info!("{status}");

    let feed = Feed::new(
        service,
        FeedOptions {
            per_page: cfg.catalog.per_page,
            file_type: cfg.playback.supported_file_type.clone(),
        },
    );

    let (event_tx, event_rx) = unbounded();
    let factory: Arc<dyn TransportFactory> = Arc::new(video::MpvFactory::new(
        video::MpvConfig {
            mpv_path: cfg.player.mpv_path.clone(),
            extra_args: cfg.player.extra_args.clone(),
        },
        event_tx,
    ));

    let session = FeedSession::new(
        feed,
        Some(factory),
        Some(event_rx),
        session_options(&cfg.playback),
    );

    let mut model = ui::Model::new(ui::Options {
        session,
        status_message: status,
        config_path: friendly_path(
            options
                .config_file
                .clone()
                .or_else(config::default_path)
                .as_ref(),
        ),
    });
    model.run()
}

pub fn session_options(playback: &config::PlaybackConfig) -> SessionOptions {
    SessionOptions {
        policy: PlaybackPolicy {
            auto_pause_after: playback.auto_pause_after,
        },
        visibility_threshold: playback.visibility_threshold,
        window_radius: playback.window_radius,
        prefetch_distance: playback.prefetch_distance,
    }
}

fn catalog_service(cfg: &config::Config, offline: bool) -> (Arc<dyn CatalogService>, String) {
    let samples: Arc<dyn CatalogService> = Arc::new(data::SampleCatalogService::default());
    if offline {
        return (
            samples,
            "Offline mode: browsing the built-in sample clips.".to_string(),
        );
    }

    let client = catalog::Client::new(catalog::ClientConfig {
        api_key: cfg.catalog.api_key.clone(),
        base_url: Some(cfg.catalog.base_url.clone()),
        user_agent: cfg.catalog.user_agent.clone(),
        timeout: Some(cfg.catalog.timeout),
        http_client: None,
    });

    match client {
        Ok(client) => {
            let service: Arc<dyn CatalogService> =
                Arc::new(data::HttpCatalogService::new(Arc::new(client)));
            (
                service,
                "Browsing popular clips. j/k to scroll, space to play/pause, q to quit."
                    .to_string(),
            )
        }
        Err(err) => {
            log::warn!("catalog client unavailable: {err:#}");
            (
                samples,
                format!(
                    "No catalog ({err}); showing sample clips. Set catalog.api_key to browse the live feed."
                ),
            )
        }
    }
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/clip-feed/config.yaml".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn playback_config_maps_to_session_options() {
        let playback = config::PlaybackConfig {
            auto_pause_after: Some(Duration::from_secs(8)),
            window_radius: 1,
            ..config::PlaybackConfig::default()
        };
        let options = session_options(&playback);
        assert_eq!(
            options.policy.auto_pause_after,
            Some(Duration::from_secs(8))
        );
        assert_eq!(options.window_radius, 1);
        assert_eq!(options.prefetch_distance, 5);
    }

    #[test]
    fn missing_api_key_falls_back_to_samples() {
        let cfg = config::Config::default();
        let (service, status) = catalog_service(&cfg, false);
        assert!(status.contains("sample clips"));
        let page = service.fetch_page(1, 50).unwrap();
        assert_eq!(page.items.len(), 50);
    }

    #[test]
    fn friendly_path_shortens_home() {
        if let Some(home) = dirs::home_dir() {
            let path = home.join(".config/clip-feed/config.yaml");
            assert_eq!(
                friendly_path(Some(&path)),
                "~/.config/clip-feed/config.yaml"
            );
        }
        assert_eq!(friendly_path(None), "~/.config/clip-feed/config.yaml");
    }
}
