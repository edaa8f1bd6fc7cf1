//! `arboretum groups`: the catalogue joined with branch status.

use arboretum_core::ArboretumConfig;
use arboretum_lifecycle::render_table;

pub fn groups(config: &ArboretumConfig, active: bool, json: bool) -> anyhow::Result<bool> {
    let listings = super::open_store(config)?.group_listings(active)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
    } else {
        println!("{}", render_table(&listings));
    }
    Ok(true)
}
