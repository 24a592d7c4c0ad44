//! Deployment configuration (dockyard.toml).
//!
//! Holds the parts of a deployment that are not user input: network
//! topology, the published port mapping, database identity, images, command
//! timeouts and installer settings. A missing file means defaults.

pub mod parser;
pub mod paths;
pub mod schema;
pub mod store;

pub use parser::{parse_dockyard_toml, parse_dockyard_toml_str, to_toml};
pub use paths::{config_path_in, default_config_dir};
pub use schema::{
    ConflictSettings, DatabaseSettings, ImageSet, InstallerSettings, NetworkLayout, PortMapping,
    ProvisionConfig, TimeoutPolicy,
};
pub use store::ConfigStore;
