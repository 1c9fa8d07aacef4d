//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager, LOCAL_CONFIG_FILE};
use crate::error::{CircletError, CircletResult};
use crate::ui::{self, UiContext};
use std::path::Path;
use tokio::fs;

/// Keys accepted by `config set`; `env.NAME` is accepted for any NAME
const VALID_KEYS: [&str; 9] = [
    "general.log_format",
    "pipeline.file",
    "executor.workers",
    "executor.shell",
    "executor.default_timeout_secs",
    "executor.fail_fast",
    "cache.enabled",
    "cache.dir",
    "cache.gc_days",
];

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> CircletResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value, local }) => {
            if local {
                set_local_value(&key, &value).await?
            } else {
                set_value(manager, &key, &value).await?
            }
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> CircletResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> CircletResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(
        &ctx,
        "Configuration initialized",
        &path.display().to_string(),
    );
    Ok(())
}

async fn set_value(manager: &ConfigManager, key: &str, value: &str) -> CircletResult<()> {
    let path = manager.path().to_path_buf();
    write_key(&path, key, value).await?;
    ui::step_ok(&UiContext::detect(), &format!("Set {} = {}", key, value));
    Ok(())
}

async fn set_local_value(key: &str, value: &str) -> CircletResult<()> {
    let cwd = std::env::current_dir().map_err(|e| CircletError::io("getting current directory", e))?;
    let local_path = cwd.join(LOCAL_CONFIG_FILE);
    write_key(&local_path, key, value).await?;
    ui::step_ok(
        &UiContext::detect(),
        &format!("Set {} = {} in {}", key, value, local_path.display()),
    );
    Ok(())
}

/// Set one key in a config file, keeping only the keys already written there
async fn write_key(path: &Path, key: &str, value: &str) -> CircletResult<()> {
    validate_config_key(key)?;

    let mut doc: toml::Value = if path.exists() {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| CircletError::io(format!("reading {}", path.display()), e))?;
        content
            .parse()
            .map_err(|e: toml::de::Error| CircletError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
    } else {
        toml::Value::Table(toml::map::Map::new())
    };

    set_toml_value(&mut doc, key, value)?;

    // Reject values the schema cannot load, e.g. a string for executor.workers
    let _: Config = doc
        .clone()
        .try_into()
        .map_err(|e: toml::de::Error| CircletError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| CircletError::ConfigDirCreate {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }
    let content = toml::to_string_pretty(&doc)?;
    fs::write(path, content)
        .await
        .map_err(|e| CircletError::io(format!("writing {}", path.display()), e))
}

/// Validate that a config key is one we recognise
fn validate_config_key(key: &str) -> CircletResult<()> {
    let known = VALID_KEYS.contains(&key)
        || key
            .strip_prefix("env.")
            .is_some_and(|name| !name.is_empty() && !name.contains('.'));
    if known {
        return Ok(());
    }
    Err(CircletError::User(format!(
        "Unknown config key: {} (valid: {}, env.NAME)",
        key,
        VALID_KEYS.join(", ")
    )))
}

/// Set a dot-separated key in a TOML value tree, creating intermediate tables as needed
fn set_toml_value(doc: &mut toml::Value, key: &str, value: &str) -> CircletResult<()> {
    let parts: Vec<&str> = key.split('.').collect();
    let Some((leaf, parents)) = parts.split_last() else {
        return Err(CircletError::User(format!("Invalid config key: {}", key)));
    };

    let mut current = doc;
    for &part in parents {
        current = current
            .as_table_mut()
            .ok_or_else(|| CircletError::User(format!("Expected table at key: {}", part)))?
            .entry(part)
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    let table = current
        .as_table_mut()
        .ok_or_else(|| CircletError::User(format!("Expected table for key: {}", key)))?;
    table.insert((*leaf).to_string(), parse_value(key, value));
    Ok(())
}

/// Environment values stay strings; `executor.shell` is a whitespace-separated list
fn parse_value(key: &str, value: &str) -> toml::Value {
    if key.starts_with("env.") {
        return toml::Value::String(value.to_string());
    }
    if key == "executor.shell" {
        return toml::Value::Array(
            value
                .split_whitespace()
                .map(|part| toml::Value::String(part.to_string()))
                .collect(),
        );
    }
    if let Ok(b) = value.parse::<bool>() {
        toml::Value::Boolean(b)
    } else if let Ok(n) = value.parse::<i64>() {
        toml::Value::Integer(n)
    } else {
        toml::Value::String(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn validates_keys() {
        assert!(validate_config_key("executor.workers").is_ok());
        assert!(validate_config_key("env.RUST_BACKTRACE").is_ok());
        assert!(validate_config_key("env.").is_err());
        assert!(validate_config_key("vm.name").is_err());
    }

    #[test]
    fn set_nested_values() {
        let mut doc = toml::Value::Table(toml::map::Map::new());
        set_toml_value(&mut doc, "executor.workers", "4").unwrap();
        set_toml_value(&mut doc, "executor.shell", "/bin/sh -c").unwrap();
        set_toml_value(&mut doc, "env.FLAG", "true").unwrap();

        let config: Config = doc.try_into().unwrap();
        assert_eq!(config.executor.workers, 4);
        assert_eq!(config.executor.shell, vec!["/bin/sh", "-c"]);
        assert_eq!(config.env["FLAG"], "true");
    }

    #[tokio::test]
    async fn write_key_keeps_file_minimal() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/config.toml");

        write_key(&path, "cache.gc_days", "7").await.unwrap();
        write_key(&path, "executor.fail_fast", "true").await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("gc_days = 7"));
        assert!(content.contains("fail_fast = true"));
        assert!(!content.contains("[general]"));
    }

    #[tokio::test]
    async fn write_key_rejects_wrong_type() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        assert!(write_key(&path, "executor.workers", "many").await.is_err());
        assert!(!path.exists());
    }
}
