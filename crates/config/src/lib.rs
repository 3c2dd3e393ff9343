#![forbid(unsafe_code)]

mod error;
mod monitor;
mod sensor;
mod tracer;
mod transport;
mod watcher;

pub use error::Error;
pub use monitor::Monitor;
pub use sensor::{Mode, Sensor};
pub use tracer::Tracer;
pub use transport::{CMD_PORT, EVT_PORT, Transport};
pub use watcher::Watcher;

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub sensor: Sensor,
    pub tracer: Tracer,
    pub watcher: Watcher,
    pub monitor: Monitor,
    pub transport: Transport,
}

impl Config {
    /// Load configuration from a TOML file. Missing fields are filled with defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Config = toml_edit::de::from_str(&text)?;
        config.apply_defaults()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let toml = toml_edit::ser::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Load configuration from multiple TOML files. Later files override earlier ones.
    pub fn load_multiple<T, U>(paths: U) -> Result<Self, Error>
    where
        T: AsRef<Path>,
        U: IntoIterator<Item = T>,
    {
        let mut merged = toml_edit::DocumentMut::new();
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(path)?;
            let doc: toml_edit::DocumentMut = text.parse()?;
            merge_document(&mut merged, doc);
        }
        let mut config: Config = toml_edit::de::from_str(&merged.to_string())?;
        config.apply_defaults()?;
        Ok(config)
    }

    fn apply_defaults(&mut self) -> Result<(), Error> {
        self.watcher.skip_prefixes.sort();
        self.watcher.skip_prefixes.dedup();
        if self.transport.cmd_port == 0 {
            return Err(Error::InvalidPort {
                channel: "command",
                port: 0,
            });
        }
        if self.transport.evt_port == 0 || self.transport.evt_port == self.transport.cmd_port {
            return Err(Error::InvalidPort {
                channel: "event",
                port: self.transport.evt_port,
            });
        }
        Ok(())
    }
}

fn merge_document(target: &mut toml_edit::DocumentMut, source: toml_edit::DocumentMut) {
    for (key, item) in source.iter() {
        merge_item(
            target.entry(key).or_insert(toml_edit::Item::None),
            item.clone(),
        );
    }
}

fn merge_item(target: &mut toml_edit::Item, source: toml_edit::Item) {
    use toml_edit::Item;
    match (target, source) {
        (Item::Table(target_table), Item::Table(source_table)) => {
            for (key, item) in source_table.iter() {
                merge_item(target_table.entry(key).or_insert(Item::None), item.clone());
            }
        }
        (target_item, source_item) => {
            *target_item = source_item;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;
    use proptest::prelude::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.apply_defaults().unwrap();
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();

        assert_eq!(config, loaded);
    }

    #[test]
    fn load_multiple_merges() {
        let dir = tempdir().unwrap();
        let path1 = dir.path().join("a.toml");
        let path2 = dir.path().join("b.toml");

        std::fs::write(
            &path1,
            "[tracer]\nstop_signal = \"SIGINT\"\nstop_grace = 2\n[sensor]\nmode = \"standalone\"\n",
        )
        .unwrap();
        std::fs::write(&path2, "[tracer]\nstop_grace = 9\n[monitor]\nerror_drain = 50\n").unwrap();

        let cfg = Config::load_multiple([path1, path2]).unwrap();
        assert_eq!(cfg.tracer.stop_signal, Signal::SIGINT);
        assert_eq!(cfg.tracer.stop_grace, Duration::from_secs(9));
        assert_eq!(cfg.sensor.mode, Mode::Standalone);
        assert_eq!(cfg.monitor.error_drain, Duration::from_millis(50));
        assert_eq!(cfg.transport.cmd_port, CMD_PORT);
    }

    #[test]
    fn missing_files_are_skipped() {
        let dir = tempdir().unwrap();
        let cfg = Config::load_multiple([dir.path().join("nope.toml")]).unwrap();
        assert_eq!(cfg.sensor, Sensor::default());
    }

    #[test]
    fn unknown_signal_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tracer]\nstop_signal = \"SIGBOGUS\"\n").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::DeserializeTOML(_))));
    }

    proptest! {
        #[test]
        fn shared_ports_are_rejected(port in 1u16..) {
            let mut config = Config::default();
            config.transport.cmd_port = port;
            config.transport.evt_port = port;
            let is_invalid = matches!(
                config.apply_defaults(),
                Err(Error::InvalidPort { channel: "event", .. })
            );
            prop_assert!(is_invalid);
        }
    }
}
