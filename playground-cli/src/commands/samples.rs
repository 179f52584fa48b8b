use anyhow::Result;
use playground_core::config::Config;
use playground_core::samples::{SampleLibrary, CHOOSE_ENTRY, DEFAULT_ENTRY};

/// Print the sample selector entries, one per line
pub fn list_samples(config: &Config) -> Result<()> {
    let library = super::load_samples(config)?;

    println!("{CHOOSE_ENTRY}");
    println!("{DEFAULT_ENTRY}");
    for name in library.names() {
        println!("{}", SampleLibrary::display_name(name));
    }

    if library.is_empty() {
        tracing::info!("no samples configured; set samples.dir in the config file");
    }
    Ok(())
}
