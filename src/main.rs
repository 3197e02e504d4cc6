use danmaku_overlay::bus::EventBus;
use danmaku_overlay::ingest::IngestionService;
use danmaku_overlay::logging;
use danmaku_overlay::overlay::Overlay;
use danmaku_overlay::settings::{Settings, SETTINGS_FILE};
use std::sync::atomic::AtomicBool;

fn main() -> anyhow::Result<()> {
    let settings_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| SETTINGS_FILE.to_string());
    let settings = Settings::load(&settings_path)?;
    logging::init(settings.debug_logging, settings.log_file.clone());
    tracing::info!(path = %settings_path, surfaces = settings.surfaces.len(), "settings loaded");

    let bus = EventBus::new();
    // Lives as long as the process; dropping the handle stops the listener.
    let _ingest = IngestionService::new(
        settings.listen_addr.clone(),
        settings.transport,
        bus.publisher(),
    )
    .start()?;

    let mut overlay = Overlay::new(&settings, bus)?;
    overlay.run(&AtomicBool::new(false));
    Ok(())
}
