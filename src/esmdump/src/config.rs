//! Recovery configuration
//!
//! Stored as TOML. Every field has a default, so an empty file is valid and
//! a config only needs the values that differ from the console build.

use std::fs;
use std::path::{Path, PathBuf};

use esmdump_format::{ByteOrder, ScanOptions, SchemaTable};
use serde::{Deserialize, Serialize};

use crate::runtime::{RuntimeHints, RuntimeLayout};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Tie-break byte order for regions that carry no hint of their own
    pub default_byte_order: Option<ByteOrder>,
    /// Address of the first byte when the capture has no layout metadata
    pub base_address: u64,
    /// Extra schema YAML merged over the builtin table
    pub schema_path: Option<PathBuf>,
    /// Run the scan, decode and reconstruction phases on the rayon pool
    pub parallel: bool,
    pub scan: ScanOptions,
    pub runtime: RuntimeLayout,
    pub hints: RuntimeHints,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            default_byte_order: None,
            base_address: 0,
            schema_path: None,
            parallel: true,
            scan: ScanOptions::default(),
            runtime: RuntimeLayout::default(),
            hints: RuntimeHints::default(),
        }
    }
}

impl RecoveryConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save configuration as TOML, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let write_err = |source| Error::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).map_err(write_err)?;
        Ok(())
    }

    /// Builtin schema, extended by `schema_path` when set
    pub fn schema(&self) -> Result<SchemaTable> {
        let mut schema = SchemaTable::builtin();
        if let Some(path) = &self.schema_path {
            let text = fs::read_to_string(path).map_err(|source| Error::Open {
                path: path.clone(),
                source,
            })?;
            let extra = SchemaTable::from_yaml(&text)?;
            tracing::info!("Loaded {} schema entries from {}", extra.len(), path.display());
            schema.extend(extra);
        }
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esmdump_format::signature::known;
    use esmdump_format::Signature;

    #[test]
    fn test_empty_config_is_default() {
        let config = RecoveryConfig::from_toml_str("").unwrap();
        assert_eq!(config, RecoveryConfig::default());
        assert!(config.parallel);
    }

    #[test]
    fn test_partial_config() {
        let config = RecoveryConfig::from_toml_str(
            r#"
default_byte_order = "big"
base_address = 0x82000000
parallel = false

[scan]
max_record_size = 65536

[runtime]
npc_race_offset = 0x1B4

[hints]
form_map = 0x83000000
"#,
        )
        .unwrap();
        assert_eq!(config.default_byte_order, Some(ByteOrder::Big));
        assert_eq!(config.base_address, 0x8200_0000);
        assert!(!config.parallel);
        assert_eq!(config.scan.max_record_size, 65536);
        assert_eq!(config.scan.signatures, known::RECORD_TYPES.to_vec());
        assert_eq!(config.runtime.npc_race_offset, Some(0x1B4));
        assert_eq!(config.runtime.form_id_offset, 12);
        assert_eq!(config.hints.form_map, Some(0x8300_0000));
        assert!(config.hints.editor_id_map.is_none());
    }

    #[test]
    fn test_invalid_config() {
        let err = RecoveryConfig::from_toml_str("parallel = \"yes\"").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("esmdump.toml");

        let mut config = RecoveryConfig::default();
        config.base_address = 0x4000_0000;
        config.runtime.topic_responses_offset = Some(0x3C);
        config.save(&path).unwrap();

        let loaded = RecoveryConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = RecoveryConfig::load("/nonexistent/esmdump.toml").unwrap_err();
        assert!(matches!(err, Error::Open { .. }));
    }

    #[test]
    fn test_schema_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extra.yaml");
        fs::write(
            &path,
            "fields:\n  - { record: BOOK, subrecord: DATA, type: struct, members: [{ name: flags, type: u8 }, { name: skill, type: i8 }] }\n",
        )
        .unwrap();

        let config = RecoveryConfig {
            schema_path: Some(path),
            ..RecoveryConfig::default()
        };
        let schema = config.schema().unwrap();
        assert!(schema
            .lookup(known::BOOK, Signature::new(b"DATA"))
            .is_some());
        assert!(schema.lookup(known::NPC_, Signature::new(b"ACBS")).is_some());
    }
}
