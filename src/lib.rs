pub mod bus;
pub mod ingest;
pub mod instance;
pub mod lanes;
pub mod logging;
pub mod model;
pub mod overlay;
pub mod settings;
pub mod surface;

pub use bus::{DanmakuEvent, EventBus, EventKind, Publisher};
pub use model::{DanmakuId, DanmakuRecord};
pub use overlay::Overlay;
