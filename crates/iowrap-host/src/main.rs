//! IOWrap input monitor entry point.
//!
//! Loads the configuration, registers every provider with an
//! [`IoController`], subscribes to every binding they report and logs each
//! change until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()             -- TOML, defaults when absent
//!  └─ IoController
//!       ├─ joystick provider    (poll thread per subscribed device)
//!       ├─ game-pad provider    (poll thread per subscribed slot)
//!       ├─ DS4 provider         (poll thread per subscribed controller)
//!       └─ ESP8266 provider     (UDP receive + send threads)
//!  └─ refresh ticker            (Tokio interval)
//! ```
//!
//! No vendor input API is linked into this build; the joystick, game-pad
//! and DS4 providers run on the in-memory devices, which start empty unless
//! `monitor.virtual_devices` is set.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use iowrap_core::{BindingDescriptor, DeviceDescriptor, InputSubscriptionRequest, ProfileActivationSet};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use iowrap_host::application::ds4::ds4_provider;
use iowrap_host::application::esp8266::{EspOptions, Esp8266Provider};
use iowrap_host::application::gamepad::gamepad_provider;
use iowrap_host::application::io_controller::IoController;
use iowrap_host::application::joystick::joystick_provider;
use iowrap_host::infrastructure::network::discovery::StaticDiscovery;
use iowrap_host::infrastructure::network::transport::bind_udp;
use iowrap_host::infrastructure::sample_source::mock::{MockDs4Api, MockGamepadApi, MockJoystick, MockJoystickApi};
use iowrap_host::infrastructure::sample_source::NoCalibration;
use iowrap_host::infrastructure::storage::config::{load_config, AppConfig};

type SubscriptionKey = (String, DeviceDescriptor, BindingDescriptor);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config, using defaults: {e}");
            AppConfig::default()
        }
    };

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.monitor.log_level)),
        )
        .init();

    info!(version = %config.monitor.version, "IOWrap monitor starting");

    let profiles = ProfileActivationSet::shared();
    let profile = Uuid::new_v4();
    profiles.set_state(profile, true);

    let controller = Arc::new(build_controller(&config, profiles)?);

    // Shutdown flag shared with the signal handler.
    let running = Arc::new(AtomicBool::new(true));

    // ── Ctrl-C / SIGTERM handler ──────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    info!("IOWrap monitor ready.  Press Ctrl-C to exit.");

    let mut subscribed = HashSet::new();
    subscribe_all(&controller, profile, &mut subscribed);

    let mut refresh = tokio::time::interval(Duration::from_millis(config.monitor.refresh_interval_ms.max(1)));
    refresh.tick().await;
    loop {
        tokio::select! {
            _ = refresh.tick() => {
                let ctl = Arc::clone(&controller);
                if let Err(e) = tokio::task::spawn_blocking(move || {
                    ctl.refresh_live_state();
                    ctl.refresh_devices();
                })
                .await
                {
                    error!("device refresh failed: {e}");
                }
                subscribe_all(&controller, profile, &mut subscribed);
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
        if !running.load(Ordering::Relaxed) {
            break;
        }
    }

    let ctl = Arc::clone(&controller);
    tokio::task::spawn_blocking(move || ctl.dispose())
        .await
        .context("provider shutdown panicked")?;

    info!("IOWrap monitor stopped");
    Ok(())
}

fn build_controller(config: &AppConfig, profiles: ProfileActivationSet) -> anyhow::Result<IoController> {
    let mut controller = IoController::new(profiles.clone());

    let joysticks = MockJoystickApi::new();
    let gamepads = MockGamepadApi::new();
    let ds4s = MockDs4Api::new();
    if config.monitor.virtual_devices {
        joysticks.plug(MockJoystick::generic("Virtual Stick", 0x1234, 0x0001, 12));
        gamepads.pad(0).set_connected(true);
        ds4s.controller(0).set_connected(true);
        info!("virtual devices attached");
    }

    let joystick = joystick_provider(joysticks, NoCalibration, profiles.clone())
        .context("joystick provider failed to start")?
        .with_poll_interval(config.polling.interval())
        .with_stop_timeout(config.polling.stop_timeout());
    controller.add_input_provider(Arc::new(joystick));

    let gamepad = gamepad_provider(gamepads, profiles.clone())
        .context("game-pad provider failed to start")?
        .with_poll_interval(config.polling.gamepad_interval())
        .with_stop_timeout(config.polling.stop_timeout());
    controller.add_input_provider(Arc::new(gamepad));

    let ds4 = ds4_provider(ds4s, profiles.clone())
        .context("DS4 provider failed to start")?
        .with_poll_interval(config.polling.gamepad_interval())
        .with_stop_timeout(config.polling.stop_timeout());
    controller.add_input_provider(Arc::new(ds4));

    if config.network.enabled {
        match start_network(config, profiles) {
            Ok(provider) => {
                let provider = Arc::new(provider);
                controller.add_input_provider(provider.clone());
                controller.add_output_provider(provider);
            }
            Err(e) => error!("network provider disabled: {e:#}"),
        }
    }

    Ok(controller)
}

fn start_network(config: &AppConfig, profiles: ProfileActivationSet) -> anyhow::Result<Esp8266Provider> {
    let ip: IpAddr = config
        .network
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address {}", config.network.bind_address))?;
    let socket = bind_udp(SocketAddr::new(ip, config.network.listen_port))?;
    let discovery = StaticDiscovery::from_config(&config.network.agents)?;
    let provider = Esp8266Provider::start(
        Arc::new(socket),
        discovery,
        profiles,
        EspOptions::from_config(&config.network),
    )?;
    info!(port = config.network.listen_port, agents = config.network.agents.len(), "network provider started");
    Ok(provider)
}

/// Subscribes to every reported binding not yet subscribed and forgets
/// bindings whose device has gone.
fn subscribe_all(controller: &IoController, profile: Uuid, subscribed: &mut HashSet<SubscriptionKey>) {
    let mut listed = HashSet::new();
    for (provider, report) in controller.get_input_list() {
        for device in report.devices.values() {
            for binding in device.bindings() {
                let key = (provider.clone(), device.descriptor.clone(), binding.descriptor);
                listed.insert(key.clone());
                if subscribed.contains(&key) {
                    continue;
                }
                let (device_name, title) = (device.name.clone(), binding.title.clone());
                let request = InputSubscriptionRequest::new(
                    Uuid::new_v4(),
                    profile,
                    provider.as_str(),
                    device.descriptor.clone(),
                    binding.descriptor,
                    move |value| info!(device = %device_name, binding = %title, value, "input"),
                );
                if controller.subscribe_input(request) {
                    subscribed.insert(key);
                } else {
                    warn!(%provider, device = %device.descriptor, binding = %binding.title, "subscription refused");
                }
            }
        }
    }
    subscribed.retain(|key| listed.contains(key));
}
