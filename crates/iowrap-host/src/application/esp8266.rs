//! Network provider for ESP8266-style UDP agents.
//!
//! Each agent is a microcontroller that describes its inputs and outputs in
//! a `DescriptorResponse`, streams `Input` messages while subscribed and
//! accepts `Output` messages.  One agent becomes one input device and one
//! output device, both keyed by the agent's hostname.
//!
//! Unlike the polling providers there is no per-device worker: a receive
//! thread handles incoming datagrams and a send thread drains the outgoing
//! queue and runs housekeeping (discovery, periodic output refresh and input
//! resubscription).

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use iowrap_core::protocol::messages::{
    BindResponseMessage, DescriptorMessage, IoCategory, IoValues, OutputState, ReportDescriptor,
};
use iowrap_core::protocol::AgentMessage;
use iowrap_core::{
    BindModeCallback, BindingCategory, BindingDescriptor, BindingReport, BindingType, DetectionMode,
    DeviceDescriptor, DeviceReport, DeviceReportNode, InputProvider, InputSubscriptionRequest,
    OutputProvider, OutputSubscriptionRequest, ProfileActivationSet, ProfileId, ProviderReport,
    SubscriberId, SubscriptionRegistry,
};
use tracing::{debug, error, info, trace, warn};

use crate::infrastructure::network::discovery::{DiscoveryEvent, ServiceDiscovery};
use crate::infrastructure::network::transport::{
    send_message, start_receiver, start_sender, DatagramSocket, SendQueue, TransportError,
};
use crate::infrastructure::storage::config::NetworkConfig;

pub const PROVIDER_NAME: &str = "Core_ESP8266";
const TITLE: &str = "Core ESP8266";
const INPUT_DESCRIPTION: &str = "Receive input from external ESP8266 modules";
const OUTPUT_DESCRIPTION: &str = "Send output to external ESP8266 modules";

/// Node order of a generated device report.
const CATEGORIES: [IoCategory; 4] = [IoCategory::Button, IoCategory::Axis, IoCategory::Delta, IoCategory::Event];

// ── Options ───────────────────────────────────────────────────────────────────

/// Timing of the network provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EspOptions {
    /// Hostname this host puts in outgoing messages.
    pub local_name: String,
    /// Minimum gap between two output transmissions to one agent.
    pub anti_flood: Duration,
    /// Period of the unconditional output refresh.
    pub output_interval: Duration,
    /// Input silence after which `Subscribe` is sent again.
    pub resubscribe_timeout: Duration,
    /// Housekeeping period of the send thread.
    pub tick: Duration,
}

impl Default for EspOptions {
    fn default() -> Self {
        Self {
            local_name: "iowrap".to_string(),
            anti_flood: Duration::from_millis(10),
            output_interval: Duration::from_millis(1000),
            resubscribe_timeout: Duration::from_secs(10),
            tick: Duration::from_millis(50),
        }
    }
}

impl EspOptions {
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self {
            anti_flood: Duration::from_millis(config.anti_flood_ms),
            output_interval: Duration::from_millis(config.output_interval_ms),
            resubscribe_timeout: Duration::from_millis(config.resubscribe_timeout_ms),
            ..Self::default()
        }
    }
}

// ── Descriptor mapping ────────────────────────────────────────────────────────

/// Binding of an agent I/O.
///
/// Buttons and events share the button space, axes and deltas the axis
/// space; the sub-index tells them apart.
pub fn binding_for(category: IoCategory, index: u32) -> BindingDescriptor {
    match category {
        IoCategory::Button => BindingDescriptor::new(BindingType::Button, index, 0),
        IoCategory::Event => BindingDescriptor::new(BindingType::Button, index, 1),
        IoCategory::Axis => BindingDescriptor::new(BindingType::Axis, index, 0),
        IoCategory::Delta => BindingDescriptor::new(BindingType::Axis, index, 1),
    }
}

/// Inverse of [`binding_for`].
pub fn category_of(binding: &BindingDescriptor) -> Option<IoCategory> {
    match (binding.binding_type, binding.sub_index) {
        (BindingType::Button, 0) => Some(IoCategory::Button),
        (BindingType::Button, 1) => Some(IoCategory::Event),
        (BindingType::Axis, 0) => Some(IoCategory::Axis),
        (BindingType::Axis, 1) => Some(IoCategory::Delta),
        _ => None,
    }
}

fn binding_category(category: IoCategory) -> BindingCategory {
    match category {
        IoCategory::Button => BindingCategory::Momentary,
        IoCategory::Axis => BindingCategory::Signed,
        IoCategory::Delta => BindingCategory::Delta,
        IoCategory::Event => BindingCategory::Event,
    }
}

fn node_title(category: IoCategory) -> &'static str {
    match category {
        IoCategory::Button => "Buttons",
        IoCategory::Axis => "Axes",
        IoCategory::Delta => "Deltas",
        IoCategory::Event => "Events",
    }
}

/// Builds the device report for one side of an agent descriptor.
///
/// Returns `None` when the agent exposes nothing on that side.
pub fn build_report(hostname: &str, descriptor: &ReportDescriptor) -> Option<DeviceReport> {
    let mut report = DeviceReport::new(hostname, DeviceDescriptor::new(hostname, 0));
    for category in CATEGORIES {
        let ios = descriptor.list(category);
        if ios.is_empty() {
            continue;
        }
        let title = node_title(category);
        let bindings = ios
            .iter()
            .map(|io| {
                let mut binding = BindingReport::new(
                    title,
                    io.name.clone(),
                    binding_category(category),
                    binding_for(category, io.index),
                );
                binding.blockable = false;
                binding
            })
            .collect();
        report.nodes.push(DeviceReportNode::with_bindings(title, bindings));
    }
    (!report.nodes.is_empty()).then_some(report)
}

/// Changes carried by one `Input` message.
///
/// Buttons and axes fire when they differ from the previous message (or
/// from zero for the first one).  Deltas and events are relative, so every
/// non-zero value fires.
pub fn input_changes(
    descriptor: &ReportDescriptor,
    previous: Option<&IoValues>,
    current: &IoValues,
) -> Vec<(BindingDescriptor, i16)> {
    let mut changes = Vec::new();
    for category in CATEGORIES {
        let before = previous.map(|p| p.list(category)).unwrap_or_default();
        for (position, (io, value)) in descriptor.list(category).iter().zip(current.list(category)).enumerate() {
            let fires = match category {
                IoCategory::Button | IoCategory::Axis => before.get(position).copied().unwrap_or(0) != *value,
                IoCategory::Delta | IoCategory::Event => *value != 0,
            };
            if fires {
                changes.push((binding_for(category, io.index), *value));
            }
        }
    }
    changes
}

// ── Agent state ───────────────────────────────────────────────────────────────

struct Agent {
    hostname: String,
    addr: SocketAddr,
    device: DeviceDescriptor,
    descriptor: Option<DescriptorMessage>,
    input_report: Option<DeviceReport>,
    output_report: Option<DeviceReport>,
    /// Replaced wholesale on change so delivery can run without the lock.
    registry: Arc<SubscriptionRegistry>,
    last_input: Option<IoValues>,
    last_input_at: Instant,
    bind_callback: Option<BindModeCallback>,
    output: Option<OutputState>,
    output_subscribers: HashSet<SubscriberId>,
    /// Time of the last datagram of any kind sent to this agent.
    last_sent: Option<Instant>,
    next_output_at: Option<Instant>,
}

impl Agent {
    fn new(hostname: String, addr: SocketAddr, profiles: &ProfileActivationSet) -> Self {
        let device = DeviceDescriptor::new(hostname.clone(), 0);
        Self {
            registry: Arc::new(SubscriptionRegistry::new(device.clone(), profiles.clone())),
            hostname,
            addr,
            device,
            descriptor: None,
            input_report: None,
            output_report: None,
            last_input: None,
            last_input_at: Instant::now(),
            bind_callback: None,
            output: None,
            output_subscribers: HashSet::new(),
            last_sent: None,
            next_output_at: None,
        }
    }

    fn apply_descriptor(&mut self, descriptor: DescriptorMessage) {
        self.input_report = build_report(&self.hostname, &descriptor.input);
        self.output_report = build_report(&self.hostname, &descriptor.output);
        // Pending values survive an identical re-send of the descriptor.
        let unchanged = self.descriptor.as_ref().is_some_and(|d| d.output == descriptor.output);
        if !unchanged {
            self.output = self.output_report.as_ref().map(|_| OutputState::new(&descriptor.output));
        }
        self.last_input = None;
        self.descriptor = Some(descriptor);
    }

    fn is_input_subscribed(&self) -> bool {
        self.registry.has_subscriptions()
    }
}

struct Shared {
    options: EspOptions,
    profiles: ProfileActivationSet,
    agents: Mutex<HashMap<String, Agent>>,
    queue: Arc<SendQueue>,
    discovery: Mutex<Box<dyn ServiceDiscovery>>,
}

impl Shared {
    fn agents(&self) -> MutexGuard<'_, HashMap<String, Agent>> {
        self.agents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every send opens a new anti-flood window, control messages included.
    fn send(&self, agent: &mut Agent, message: AgentMessage) {
        trace!(agent = %agent.hostname, kind = ?message.message_type(), "queueing");
        agent.last_sent = Some(Instant::now());
        self.queue.push(agent.addr, message);
    }

    fn control(&self, agent: &mut Agent, make: fn(String) -> AgentMessage) {
        self.send(agent, make(self.options.local_name.clone()));
    }

    fn poll_discovery(&self) {
        let events = self.discovery.lock().unwrap_or_else(PoisonError::into_inner).poll();
        if events.is_empty() {
            return;
        }
        let mut agents = self.agents();
        for event in events {
            match event {
                DiscoveryEvent::Found(found) => {
                    info!(agent = %found.hostname, addr = %found.addr, "agent discovered");
                    let agent = agents
                        .entry(found.hostname.clone())
                        .or_insert_with(|| Agent::new(found.hostname, found.addr, &self.profiles));
                    agent.addr = found.addr;
                    self.control(agent, |hostname| AgentMessage::DescriptorRequest { hostname });
                }
                DiscoveryEvent::Lost { hostname } => {
                    if agents.remove(&hostname).is_some() {
                        info!(agent = %hostname, "agent lost");
                    }
                }
            }
        }
    }

    /// Sends the agent's pending output unless anything was sent to the
    /// agent within the anti-flood window.
    fn transmit_output(&self, agent: &mut Agent, now: Instant) -> bool {
        if agent
            .last_sent
            .is_some_and(|last| now.saturating_duration_since(last) < self.options.anti_flood)
        {
            debug!(agent = %agent.hostname, "transmit skipped due to anti-flooding");
            return false;
        }
        let Some(output) = agent.output.as_mut() else {
            return false;
        };
        let values = output.take_for_transmit();
        self.send(
            agent,
            AgentMessage::Output {
                hostname: self.options.local_name.clone(),
                values,
            },
        );
        true
    }

    /// Requests missing descriptors and renews silent input subscriptions.
    fn refresh_agents(&self, agents: &mut HashMap<String, Agent>, now: Instant) {
        for agent in agents.values_mut() {
            if agent.descriptor.is_none() {
                self.control(agent, |hostname| AgentMessage::DescriptorRequest { hostname });
            }
            self.resubscribe_if_silent(agent, now);
        }
    }

    fn resubscribe_if_silent(&self, agent: &mut Agent, now: Instant) {
        if agent.is_input_subscribed()
            && now.saturating_duration_since(agent.last_input_at) >= self.options.resubscribe_timeout
        {
            info!(agent = %agent.hostname, "no input received, resubscribing");
            agent.last_input_at = now;
            self.control(agent, |hostname| AgentMessage::Subscribe { hostname });
        }
    }

    /// Runs on the send thread once per tick.
    fn housekeeping(&self, now: Instant) {
        self.poll_discovery();
        let mut agents = self.agents();
        for agent in agents.values_mut() {
            if agent.next_output_at.is_some_and(|due| now >= due) {
                self.transmit_output(agent, now);
                agent.next_output_at = Some(now + self.options.output_interval);
            }
            self.resubscribe_if_silent(agent, now);
        }
    }

    /// Runs on the receive thread for every decoded datagram.
    fn handle_message(&self, message: AgentMessage, src: SocketAddr) {
        let mut agents = self.agents();
        let Some(agent) = agents.get_mut(message.hostname()) else {
            debug!(host = %message.hostname(), %src, "discarding packet from unknown host");
            return;
        };
        match message {
            AgentMessage::HeartbeatRequest { .. } => {
                self.control(agent, |hostname| AgentMessage::HeartbeatResponse { hostname });
            }
            AgentMessage::HeartbeatResponse { .. } => {
                trace!(agent = %agent.hostname, "heartbeat response");
            }
            AgentMessage::DescriptorResponse(descriptor) => {
                info!(
                    agent = %agent.hostname,
                    inputs = descriptor.input.buttons.len() + descriptor.input.axes.len()
                        + descriptor.input.deltas.len() + descriptor.input.events.len(),
                    "descriptor received"
                );
                agent.apply_descriptor(descriptor);
            }
            AgentMessage::Input { values, .. } => {
                if !agent.is_input_subscribed() {
                    return;
                }
                agent.last_input_at = Instant::now();
                let Some(descriptor) = agent.descriptor.as_ref() else {
                    return;
                };
                let changes = input_changes(&descriptor.input, agent.last_input.as_ref(), &values);
                agent.last_input = Some(values);
                if agent.bind_callback.is_some() || changes.is_empty() {
                    return;
                }
                let registry = Arc::clone(&agent.registry);
                drop(agents);
                for (binding, value) in changes {
                    registry.fire_callbacks(&binding, value);
                }
            }
            AgentMessage::BindResponse { response, .. } => {
                let Some(callback) = agent.bind_callback.clone() else {
                    debug!(agent = %agent.hostname, "bind response outside bind mode");
                    return;
                };
                let device = agent.device.clone();
                let report = bind_report(agent.input_report.as_ref(), &response);
                drop(agents);
                let call = AssertUnwindSafe(|| callback(PROVIDER_NAME, &device, &report, response.value));
                if panic::catch_unwind(call).is_err() {
                    error!(%device, "bind callback panicked");
                }
            }
            other => {
                debug!(agent = %agent.hostname, kind = ?other.message_type(), "unexpected message from agent");
            }
        }
    }
}

fn bind_report(input_report: Option<&DeviceReport>, response: &BindResponseMessage) -> BindingReport {
    let binding = binding_for(response.category, response.index);
    input_report
        .and_then(|report| report.find_binding(&binding))
        .cloned()
        .unwrap_or_else(|| BindingReport::untitled(binding))
}

// ── Provider ──────────────────────────────────────────────────────────────────

/// Input and output provider for network agents.
pub struct Esp8266Provider {
    shared: Arc<Shared>,
    socket: Arc<dyn DatagramSocket>,
    running: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Esp8266Provider {
    /// Starts the receive and send threads on `socket`.
    ///
    /// Discovery is polled once before returning, so statically configured
    /// agents are known (though not yet described) immediately.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Spawn`] if a transport thread cannot be
    /// started.
    pub fn start(
        socket: Arc<dyn DatagramSocket>,
        discovery: impl ServiceDiscovery,
        profiles: ProfileActivationSet,
        options: EspOptions,
    ) -> Result<Self, TransportError> {
        let queue = Arc::new(SendQueue::new());
        let tick = options.tick;
        let shared = Arc::new(Shared {
            options,
            profiles,
            agents: Mutex::new(HashMap::new()),
            queue: Arc::clone(&queue),
            discovery: Mutex::new(Box::new(discovery)),
        });
        shared.poll_discovery();

        let running = Arc::new(AtomicBool::new(true));
        let on_message = Arc::clone(&shared);
        let receiver = start_receiver(Arc::clone(&socket), Arc::clone(&running), move |message, src| {
            on_message.handle_message(message, src);
        })?;
        let on_tick = Arc::clone(&shared);
        let sender = match start_sender(Arc::clone(&socket), queue, Arc::clone(&running), tick, move || {
            on_tick.housekeeping(Instant::now());
        }) {
            Ok(handle) => handle,
            Err(e) => {
                running.store(false, Ordering::Relaxed);
                if receiver.join().is_err() {
                    error!("agent receiver panicked");
                }
                return Err(e);
            }
        };
        info!(provider = PROVIDER_NAME, "network provider started");

        Ok(Self {
            shared,
            socket,
            running,
            threads: Mutex::new(vec![receiver, sender]),
            disposed: AtomicBool::new(false),
        })
    }

    /// Hostnames of the agents currently known.
    pub fn agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.agents().keys().cloned().collect();
        names.sort();
        names
    }

    fn list(&self, side: fn(&Agent) -> Option<&DeviceReport>, description: &str) -> ProviderReport {
        let mut report = ProviderReport::new(PROVIDER_NAME, TITLE, description);
        for agent in self.shared.agents().values() {
            if let Some(device) = side(agent) {
                report.insert(device.clone());
            }
        }
        report
    }
}

impl InputProvider for Esp8266Provider {
    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn get_input_list(&self) -> ProviderReport {
        self.list(|agent| agent.input_report.as_ref(), INPUT_DESCRIPTION)
    }

    fn get_input_device_report(&self, device: &DeviceDescriptor) -> Option<DeviceReport> {
        self.shared
            .agents()
            .get(&device.handle)
            .and_then(|agent| agent.input_report.clone())
    }

    fn subscribe_input(&self, request: InputSubscriptionRequest) -> bool {
        let mut agents = self.shared.agents();
        let Some(agent) = agents.get_mut(&request.device.handle) else {
            debug!(device = %request.device, "subscribe to unknown agent");
            return false;
        };
        let known = agent
            .input_report
            .as_ref()
            .is_some_and(|report| report.contains_binding(&request.binding));
        if !known {
            debug!(device = %request.device, binding = %request.binding, "binding not described by agent");
            return false;
        }

        let first = !agent.is_input_subscribed();
        let mut registry = (*agent.registry).clone();
        if let Err(e) = registry.add(request) {
            debug!("subscription rejected: {e}");
            return false;
        }
        agent.registry = Arc::new(registry);
        if first {
            agent.last_input_at = Instant::now();
            self.shared.control(agent, |hostname| AgentMessage::Subscribe { hostname });
        }
        true
    }

    fn unsubscribe_input(&self, request: &InputSubscriptionRequest) -> bool {
        let mut agents = self.shared.agents();
        let Some(agent) = agents.get_mut(&request.device.handle) else {
            return false;
        };
        let mut registry = (*agent.registry).clone();
        if !registry.remove(request) {
            return false;
        }
        agent.registry = Arc::new(registry);
        if !agent.is_input_subscribed() {
            agent.last_input = None;
            self.shared.control(agent, |hostname| AgentMessage::Unsubscribe { hostname });
        }
        true
    }

    fn set_detection_mode(
        &self,
        mode: DetectionMode,
        device: &DeviceDescriptor,
        callback: Option<BindModeCallback>,
    ) -> bool {
        let mut agents = self.shared.agents();
        let Some(agent) = agents.get_mut(&device.handle) else {
            return false;
        };
        match mode {
            DetectionMode::Bind => {
                let Some(callback) = callback else {
                    warn!(%device, "bind mode requested without a callback");
                    return false;
                };
                if agent.bind_callback.replace(callback).is_none() {
                    self.shared.control(agent, |hostname| AgentMessage::BindStart { hostname });
                }
            }
            DetectionMode::Subscription => {
                if agent.bind_callback.take().is_some() {
                    self.shared.control(agent, |hostname| AgentMessage::BindStop { hostname });
                }
            }
        }
        true
    }

    fn set_profile_state(&self, profile: ProfileId, active: bool) -> bool {
        self.shared.profiles.set_state(profile, active);
        true
    }

    fn refresh_devices(&self) {
        self.shared.poll_discovery();
        let mut agents = self.shared.agents();
        self.shared.refresh_agents(&mut agents, Instant::now());
    }

    fn refresh_live_state(&self) {
        let mut agents = self.shared.agents();
        for agent in agents.values_mut() {
            self.shared.control(agent, |hostname| AgentMessage::HeartbeatRequest { hostname });
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.running.store(false, Ordering::Relaxed);
        self.shared.queue.close();
        let threads: Vec<JoinHandle<()>> = self
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in threads {
            if handle.join().is_err() {
                error!("agent transport thread panicked");
            }
        }

        // Agents keep streaming until told otherwise.
        let local_name = self.shared.options.local_name.clone();
        let mut agents = self.shared.agents();
        for agent in agents.values().filter(|a| a.is_input_subscribed()) {
            let message = AgentMessage::Unsubscribe {
                hostname: local_name.clone(),
            };
            if let Err(e) = send_message(self.socket.as_ref(), agent.addr, &message) {
                warn!(agent = %agent.hostname, "final unsubscribe failed: {e}");
            }
        }
        agents.clear();
        info!(provider = PROVIDER_NAME, "network provider disposed");
    }
}

impl OutputProvider for Esp8266Provider {
    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn get_output_list(&self) -> ProviderReport {
        self.list(|agent| agent.output_report.as_ref(), OUTPUT_DESCRIPTION)
    }

    fn get_output_device_report(&self, device: &DeviceDescriptor) -> Option<DeviceReport> {
        self.shared
            .agents()
            .get(&device.handle)
            .and_then(|agent| agent.output_report.clone())
    }

    fn subscribe_output_device(&self, request: OutputSubscriptionRequest) -> bool {
        let mut agents = self.shared.agents();
        let Some(agent) = agents.get_mut(&request.device.handle) else {
            return false;
        };
        // Without a descriptor there is nothing to address.
        if agent.output.is_none() {
            debug!(device = %request.device, "agent has not described its outputs");
            return false;
        }
        agent.output_subscribers.insert(request.subscriber_id);
        if agent.next_output_at.is_none() {
            agent.next_output_at = Some(Instant::now() + self.shared.options.output_interval);
        }
        true
    }

    fn unsubscribe_output_device(&self, request: &OutputSubscriptionRequest) -> bool {
        let mut agents = self.shared.agents();
        let Some(agent) = agents.get_mut(&request.device.handle) else {
            return false;
        };
        let removed = agent.output_subscribers.remove(&request.subscriber_id);
        if agent.output_subscribers.is_empty() {
            agent.next_output_at = None;
        }
        removed
    }

    fn set_output_state(&self, request: &OutputSubscriptionRequest, binding: &BindingDescriptor, state: i32) -> bool {
        let mut agents = self.shared.agents();
        let Some(agent) = agents.get_mut(&request.device.handle) else {
            return false;
        };
        if !agent.output_subscribers.contains(&request.subscriber_id) {
            debug!(device = %request.device, subscriber = %request.subscriber_id, "output write without subscription");
            return false;
        }
        let Some(category) = category_of(binding) else {
            return false;
        };
        let value = state.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
        let written = agent
            .output
            .as_mut()
            .is_some_and(|output| output.set(category, binding.index, value));
        if !written {
            debug!(device = %request.device, %binding, "unknown output");
            return false;
        }
        self.shared.transmit_output(agent, Instant::now());
        true
    }
}

impl Drop for Esp8266Provider {
    fn drop(&mut self) {
        InputProvider::dispose(self);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
