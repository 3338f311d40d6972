use std::error::Error;
use std::path::Path;

use crate::core::config::data::path_display;
use crate::core::config::Config;

pub fn show(path: &Path) -> Result<(), Box<dyn Error>> {
    let config = Config::load_from_path(path)?;
    if path.exists() {
        println!("Config file: {}", path_display(path));
    } else {
        println!("Config file: {} (not created, using defaults)", path_display(path));
    }
    config.print_all();
    Ok(())
}

pub fn init(path: &Path, force: bool) -> Result<(), Box<dyn Error>> {
    write_defaults(path, force)?;
    println!("✅ Wrote default config to {}", path_display(path));
    Ok(())
}

fn write_defaults(path: &Path, force: bool) -> Result<(), Box<dyn Error>> {
    if path.exists() && !force {
        return Err(format!(
            "{} already exists; pass --force to overwrite",
            path_display(path)
        )
        .into());
    }
    Config::default().save_to_path(path)?;
    Ok(())
}
