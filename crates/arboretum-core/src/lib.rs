pub mod config;

pub use config::{
    ApiConfig, ArboretumConfig, BootConfig, CatalogueConfig, DaemonConfig, ProbeConfig,
    ProviderConfig, SizingConfig, StoreConfig,
};
