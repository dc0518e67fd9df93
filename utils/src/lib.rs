pub mod logging;
pub mod relay_config;
pub mod rpc;
