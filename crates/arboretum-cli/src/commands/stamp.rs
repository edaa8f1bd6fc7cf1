//! `arboretum stamp`: print the change stamp.

use arboretum_core::ArboretumConfig;

pub fn stamp(config: &ArboretumConfig) -> anyhow::Result<bool> {
    println!("{}", super::open_store(config)?.stamp()?);
    Ok(true)
}
