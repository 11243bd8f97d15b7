//! Services the queue and orchestrator depend on but do not own

pub mod notify;
pub mod renderer;
pub mod resolver;

pub use notify::{LocalStartChannel, NotificationChannel, StartPrompt, StartRequest};
pub use renderer::{AssetPaths, AssetRenderer, StaticAssetRenderer};
pub use resolver::{MetadataResolver, YtDlpResolver};
