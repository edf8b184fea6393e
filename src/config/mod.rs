//! Configuration: the flat reconstruction options and the tool runtime config.

pub mod reco;
pub mod runtime;

pub use reco::RecoConfig;
pub use runtime::{load_config, parse_cli, OutputConfig, OutputFormat, RuntimeConfig};
