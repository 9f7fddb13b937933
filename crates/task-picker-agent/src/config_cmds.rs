use std::path::Path;

use anyhow::{Context, Result, bail};

use tpa_config::{TaskPickerConfig, default_config_toml, paths};
use tpa_core::OutputFormat;

pub(crate) fn handle_config_show(config: &TaskPickerConfig, format: OutputFormat) -> Result<()> {
    let redacted = config.redacted_for_display();
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&redacted)?);
        }
        OutputFormat::Text => {
            print!("{}", toml::to_string_pretty(&redacted)?);
        }
    }
    Ok(())
}

pub(crate) fn handle_config_init(force: bool) -> Result<()> {
    let Some(path) = paths::user_config_path() else {
        bail!("Cannot determine the user config directory");
    };
    write_default_config(&path, force)?;
    eprintln!("Wrote default configuration to: {}", path.display());
    Ok(())
}

fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists. Use --force to overwrite.",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, default_config_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
