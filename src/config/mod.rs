mod settings;

pub use settings::{
    ApiConfig, DispatchConfig, GatewayConfig, LogConfig, MessageConfig, OtelConfig, ServerConfig,
    Settings,
};
