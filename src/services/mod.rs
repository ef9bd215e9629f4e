pub mod batch_coordinator;
pub mod conversation_builder;
pub mod mode_registry;
pub mod stream_relay;

pub use batch_coordinator::{BatchCoordinator, BatchItem, BatchOptions, BatchResult};
pub use conversation_builder::ConversationBuilder;
pub use mode_registry::ModeRegistry;
pub use stream_relay::StreamRelay;
