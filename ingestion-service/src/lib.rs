pub mod config;
pub mod connector;
pub mod control;
pub mod decode;
pub mod metrics_server;
pub mod observability;
pub mod schema;
pub mod sinks;

pub use connector::MqttConnector;
pub use sinks::MySqlUsageSink;
