//! Wiring a loaded configuration into a running bridge.

use std::path::PathBuf;
use std::sync::Arc;

use webbridge_browser::{
    BrowserSettings, CdpProbeFactory, CommandLogin, ProbeFactory, SurfaceRegistry, SurfaceSettings,
};
use webbridge_config::{BackendSettings, WebbridgeConfig};
use webbridge_core::{Bridge, BridgeSettings, MonitorSettings, SessionCoordinator};

pub fn monitor_settings(backend: &BackendSettings) -> MonitorSettings {
    MonitorSettings {
        poll_interval: backend.poll_interval,
        settle_delay: backend.settle_delay,
        start_grace: backend.start_grace,
        deadline: backend.timeout,
    }
}

pub fn browser_settings(config: &WebbridgeConfig) -> BrowserSettings {
    BrowserSettings {
        headless: config.browser.headless,
        executable: config.browser.executable.as_ref().map(PathBuf::from),
        user_data_dir: Some(config.browser.user_data_path()),
    }
}

pub fn surface_registry(config: &WebbridgeConfig) -> SurfaceRegistry {
    let claude = config.claude.resolve();
    let copilot = config.copilot.resolve();
    SurfaceRegistry::standard(
        SurfaceSettings::new(claude.url, claude.cookie_domain),
        SurfaceSettings::new(copilot.url, copilot.cookie_domain),
    )
}

/// Build the bridge over `factory` and `surfaces` with the pool, login and
/// polling settings from `config`.
pub fn build_bridge_with(
    config: &WebbridgeConfig,
    factory: Arc<dyn ProbeFactory>,
    surfaces: SurfaceRegistry,
) -> Bridge {
    let mut coordinator = SessionCoordinator::new(factory, surfaces, config.server.max_sessions);

    if let Some(command) = &config.login.command {
        coordinator = coordinator.with_login(Arc::new(CommandLogin::new(
            command.clone(),
            config.login.args.clone(),
            config.login.cookie_path(),
        )));
    }
    if let Some(dir) = config.browser.screenshot_path() {
        coordinator = coordinator.with_screenshot_dir(dir);
    }

    let settings = BridgeSettings {
        claude: monitor_settings(&config.claude.resolve()),
        copilot: monitor_settings(&config.copilot.resolve()),
    };
    Bridge::new(Arc::new(coordinator), settings)
}

/// The production bridge: Chromium over CDP and the real web surfaces.
pub fn build_bridge(config: &WebbridgeConfig) -> Bridge {
    build_bridge_with(
        config,
        Arc::new(CdpProbeFactory::new(browser_settings(config))),
        surface_registry(config),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use webbridge_protocol::Backend;

    #[test]
    fn test_monitor_settings_from_config() {
        let mut config = WebbridgeConfig::default();
        config.copilot.timeout_secs = 45;
        config.copilot.poll_interval_ms = 250;

        let settings = monitor_settings(&config.copilot.resolve());
        assert_eq!(settings.deadline, Duration::from_secs(45));
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.start_grace, Duration::from_millis(3000));
    }

    #[test]
    fn test_browser_settings_from_config() {
        let mut config = WebbridgeConfig::default();
        config.browser.headless = false;
        config.browser.executable = Some("/usr/bin/chromium".to_string());
        config.browser.user_data_dir = "/tmp/webbridge-profiles".to_string();

        let settings = browser_settings(&config);
        assert!(!settings.headless);
        assert_eq!(settings.executable, Some(PathBuf::from("/usr/bin/chromium")));
        assert_eq!(
            settings.user_data_dir,
            Some(PathBuf::from("/tmp/webbridge-profiles"))
        );
    }

    #[test]
    fn test_build_bridge_registers_both_backends() {
        let config = WebbridgeConfig::default();
        let registry = surface_registry(&config);
        assert!(registry.get(Backend::ClaudeChat).is_some());
        assert!(registry.get(Backend::CopilotCode).is_some());

        let bridge = build_bridge(&config);
        assert_eq!(bridge.coordinator().max_sessions(), 16);
        assert!(bridge.coordinator().screenshot_dir().is_none());
    }
}
