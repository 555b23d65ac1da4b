// Domain layer modules
pub mod config_item;
pub mod order_image;
pub mod redaction;

// Re-exports
pub use config_item::{ConfigBatch, ConfigItem, ConfigItemError, KeyMap, MAX_BATCH_SIZE};
pub use order_image::{NotificationDecision, OrderImage, OrderImageError, SkipReason, evaluate};
pub use redaction::redact;
