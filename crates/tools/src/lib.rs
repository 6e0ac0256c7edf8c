//! Built-in tool implementations for Lectern.
//!
//! Tools let the tutor do more than talk: today that means generating
//! illustrations through an external media service whose results may arrive
//! out of band via the [`CallbackBroker`].

pub mod callback;
pub mod media;

use lectern_config::ToolsConfig;
use lectern_core::tool::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;

pub use callback::{CallbackBroker, Registration};
pub use media::{artifact_outcome, MediaGenerationTool, MEDIA_TOOL_NAME};

/// Create the tool registry described by the `[tools]` config section.
///
/// The media tool is only registered when an endpoint is configured.
pub fn default_registry(config: &ToolsConfig, broker: Arc<CallbackBroker>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    if let Some(endpoint) = &config.media_endpoint {
        registry.register(Box::new(
            MediaGenerationTool::new(endpoint.clone(), broker)
                .with_api_key(config.media_api_key.clone())
                .with_grace(Duration::from_secs(config.callback_grace_secs)),
        ));
    }
    registry
}
