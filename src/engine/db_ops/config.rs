//! Archive configuration in the `config` key/value table.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::collections::HashMap;

use crate::error::ConfigError;
use crate::types::ArchiveConfig;

fn read_all(conn: &Connection) -> Result<HashMap<String, String>> {
    let mut stmt = conn.prepare("SELECT arg, value FROM config")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get(1)?)))?;
    let mut map = HashMap::new();
    for row in rows {
        let (k, v) = row?;
        map.insert(k, v);
    }
    Ok(map)
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
        .into()
    })
}

/// Load the archive configuration, or None when the archive was never configured.
pub fn load_config(conn: &Connection) -> Result<Option<ArchiveConfig>> {
    let map = read_all(conn).context("read archive config")?;
    let Some(max_size) = map.get("max_size") else {
        return Ok(None);
    };
    let exclude = match map.get("exclude") {
        Some(v) => serde_json::from_str::<Vec<String>>(v).map_err(|_| ConfigError::InvalidValue {
            key: "exclude".to_string(),
            value: v.clone(),
        })?,
        None => Vec::new(),
    };
    Ok(Some(ArchiveConfig {
        max_size: parse_value("max_size", max_size)?,
        exclude,
        remote: map.get("remote").filter(|r| !r.is_empty()).cloned(),
        follow_links: map
            .get("follow_links")
            .map(|v| parse_value("follow_links", v))
            .transpose()?
            .unwrap_or(false),
        created_at_ns: map
            .get("created_at_ns")
            .map(|v| parse_value("created_at_ns", v))
            .transpose()?
            .unwrap_or(0),
        tool_version: map.get("tool_version").cloned().unwrap_or_default(),
    }))
}

/// Insert or replace one config value.
pub fn set_config_value(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO config (arg, value) VALUES (?1, ?2)",
        (key, value),
    )
    .with_context(|| format!("write config {key}"))?;
    Ok(())
}

fn conflict(key: &str, stored: String, requested: String) -> anyhow::Error {
    ConfigError::Conflict {
        key: key.to_string(),
        stored,
        requested,
    }
    .into()
}

/// Write the archive configuration once. An existing configuration is accepted only when the
/// parameters that shape containers agree with it.
pub fn configure(conn: &Connection, config: &ArchiveConfig) -> Result<()> {
    if config.max_size == 0 {
        return Err(ConfigError::InvalidMaxSize.into());
    }
    if let Some(existing) = load_config(conn)? {
        if existing.max_size != config.max_size {
            return Err(conflict(
                "max_size",
                existing.max_size.to_string(),
                config.max_size.to_string(),
            ));
        }
        if existing.follow_links != config.follow_links {
            return Err(conflict(
                "follow_links",
                existing.follow_links.to_string(),
                config.follow_links.to_string(),
            ));
        }
        if existing.exclude != config.exclude {
            return Err(conflict(
                "exclude",
                format!("{:?}", existing.exclude),
                format!("{:?}", config.exclude),
            ));
        }
        return Ok(());
    }

    let exclude = serde_json::to_string(&config.exclude).context("encode exclude patterns")?;
    let tx = conn
        .unchecked_transaction()
        .context("begin config transaction")?;
    set_config_value(&tx, "max_size", &config.max_size.to_string())?;
    set_config_value(&tx, "exclude", &exclude)?;
    set_config_value(&tx, "remote", config.remote.as_deref().unwrap_or(""))?;
    set_config_value(&tx, "follow_links", &config.follow_links.to_string())?;
    set_config_value(&tx, "created_at_ns", &config.created_at_ns.to_string())?;
    set_config_value(&tx, "tool_version", &config.tool_version)?;
    tx.commit().context("commit config")?;
    Ok(())
}
