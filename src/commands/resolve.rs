use crate::config::{BacktestConfig, DataSourceSettings};
use crate::resolver::SymbolResolver;
use crate::yahoo::YahooPriceSource;
use anyhow::Result;
use log::{info, warn};
use std::collections::HashMap;

/// Prints one `raw -> resolved` line per symbol.
pub async fn run(settings: &HashMap<String, String>, symbols: &[String]) -> Result<()> {
    let config = BacktestConfig::from_settings_map(settings)?;
    let data_settings = DataSourceSettings::from_settings_map(settings)?;
    let source = YahooPriceSource::new(&data_settings)?;
    let resolver = SymbolResolver::new(&source, config.suffixes);

    let mut unresolved = 0;
    for raw in symbols {
        match resolver.resolve(raw).await {
            Some(resolved) => println!("{} -> {}", raw, resolved),
            None => {
                unresolved += 1;
                println!("{} -> (not found)", raw);
            }
        }
    }

    if unresolved > 0 {
        warn!("{} of {} symbol(s) could not be resolved", unresolved, symbols.len());
    } else {
        info!("Resolved {} symbol(s)", symbols.len());
    }
    Ok(())
}
