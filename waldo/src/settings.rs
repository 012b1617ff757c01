use std::time::Duration;

use config::{Config, ConfigError, Environment};
use log::debug;
use serde::Deserialize;

const DEFAULT_REPORT_INTERVAL_SECONDS: u64 = 15;

/// Agent tuning read from `WALDO__*` variables.
#[derive(Debug, Deserialize, Clone, Default)]
#[allow(unused)]
pub struct AgentSettings {
    pub report_interval_secs: Option<u64>,
    pub ebpf_log: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[allow(unused)]
pub struct Settings {
    /// Only the exact value `"1"` enables the netdev probe group.
    pub attach_netdev_kprobes: Option<String>,
    #[serde(default)]
    pub waldo: AgentSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        // Values stay strings so "1" is compared verbatim; numeric and bool
        // fields are parsed on deserialization.
        let s = Config::builder()
            .add_source(Environment::default().separator("__"))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        debug!("Parsed settings: {:?}", settings);
        Ok(settings)
    }

    pub fn netdev_probes_enabled(&self) -> bool {
        self.attach_netdev_kprobes.as_deref() == Some("1")
    }

    pub fn report_interval(&self) -> Duration {
        let secs = self
            .waldo
            .report_interval_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_REPORT_INTERVAL_SECONDS);
        Duration::from_secs(secs)
    }

    pub fn ebpf_log_enabled(&self) -> bool {
        self.waldo.ebpf_log.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        unsafe {
            std::env::remove_var("ATTACH_NETDEV_KPROBES");
            std::env::remove_var("WALDO__REPORT_INTERVAL_SECS");
            std::env::remove_var("WALDO__EBPF_LOG");
        }
    }

    #[test]
    #[serial]
    fn test_load_settings() {
        clear_env();
        unsafe {
            std::env::set_var("ATTACH_NETDEV_KPROBES", "1");
            std::env::set_var("WALDO__REPORT_INTERVAL_SECS", "42");
            std::env::set_var("WALDO__EBPF_LOG", "false");
        }

        let settings = Settings::new().expect("Failed to load settings");

        assert!(settings.netdev_probes_enabled());
        assert_eq!(settings.report_interval(), Duration::from_secs(42));
        assert!(!settings.ebpf_log_enabled());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_defaults_without_environment() {
        clear_env();
        let settings = Settings::new().expect("Failed to load settings");

        assert!(!settings.netdev_probes_enabled());
        assert_eq!(settings.report_interval(), Duration::from_secs(15));
        assert!(settings.ebpf_log_enabled());
    }

    #[test]
    #[serial]
    fn test_netdev_flag_requires_exact_one() {
        clear_env();
        for value in ["true", "yes", "0", "11", " 1"] {
            unsafe { std::env::set_var("ATTACH_NETDEV_KPROBES", value) };
            let settings = Settings::new().expect("Failed to load settings");
            assert!(!settings.netdev_probes_enabled(), "{value:?} must not enable");
        }
        clear_env();
    }

    #[test]
    fn test_zero_interval_falls_back_to_default() {
        let settings = Settings {
            attach_netdev_kprobes: None,
            waldo: AgentSettings {
                report_interval_secs: Some(0),
                ebpf_log: None,
            },
        };
        assert_eq!(settings.report_interval(), Duration::from_secs(15));
    }
}
