mod hot_reload;
mod schema;

pub use hot_reload::ConfigHandle;
pub use schema::{
    ActionsConfig, Config, ContextConfig, GatewayConfig, LlmConfig, LookupConfig,
};
