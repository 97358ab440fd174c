//! Routes consumer calls to providers by name.
//!
//! Every request carries a `provider_name`; the controller looks the
//! provider up and forwards the call.  Calls for unknown providers are
//! refused with `false` and a warning, never a panic.

use std::collections::BTreeMap;
use std::sync::Arc;

use iowrap_core::{
    BindModeCallback, BindingDescriptor, DetectionMode, DeviceDescriptor, InputProvider,
    InputSubscriptionRequest, OutputProvider, OutputSubscriptionRequest, ProfileActivationSet,
    ProfileId, ProviderReport,
};
use tracing::{debug, info, warn};

pub struct IoController {
    profiles: ProfileActivationSet,
    inputs: BTreeMap<String, Arc<dyn InputProvider>>,
    outputs: BTreeMap<String, Arc<dyn OutputProvider>>,
}

impl IoController {
    /// `profiles` must be the set every registered provider was built with.
    pub fn new(profiles: ProfileActivationSet) -> Self {
        Self {
            profiles,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn add_input_provider(&mut self, provider: Arc<dyn InputProvider>) {
        let name = provider.provider_name().to_string();
        info!(provider = %name, "input provider registered");
        if self.inputs.insert(name.clone(), provider).is_some() {
            warn!(provider = %name, "replaced an input provider with the same name");
        }
    }

    pub fn add_output_provider(&mut self, provider: Arc<dyn OutputProvider>) {
        let name = provider.provider_name().to_string();
        info!(provider = %name, "output provider registered");
        if self.outputs.insert(name.clone(), provider).is_some() {
            warn!(provider = %name, "replaced an output provider with the same name");
        }
    }

    pub fn profiles(&self) -> &ProfileActivationSet {
        &self.profiles
    }

    pub fn input_provider(&self, name: &str) -> Option<&Arc<dyn InputProvider>> {
        self.inputs.get(name)
    }

    /// Input reports of every provider, keyed by provider name.
    pub fn get_input_list(&self) -> BTreeMap<String, ProviderReport> {
        self.inputs
            .iter()
            .map(|(name, provider)| (name.clone(), provider.get_input_list()))
            .collect()
    }

    /// Output reports of every provider, keyed by provider name.
    pub fn get_output_list(&self) -> BTreeMap<String, ProviderReport> {
        self.outputs
            .iter()
            .map(|(name, provider)| (name.clone(), provider.get_output_list()))
            .collect()
    }

    fn input(&self, name: &str) -> Option<&Arc<dyn InputProvider>> {
        let provider = self.inputs.get(name);
        if provider.is_none() {
            warn!(provider = %name, "no such input provider");
        }
        provider
    }

    fn output(&self, name: &str) -> Option<&Arc<dyn OutputProvider>> {
        let provider = self.outputs.get(name);
        if provider.is_none() {
            warn!(provider = %name, "no such output provider");
        }
        provider
    }

    pub fn subscribe_input(&self, request: InputSubscriptionRequest) -> bool {
        match self.input(&request.provider_name) {
            Some(provider) => provider.subscribe_input(request),
            None => false,
        }
    }

    pub fn unsubscribe_input(&self, request: &InputSubscriptionRequest) -> bool {
        self.input(&request.provider_name)
            .is_some_and(|provider| provider.unsubscribe_input(request))
    }

    pub fn set_detection_mode(
        &self,
        provider_name: &str,
        mode: DetectionMode,
        device: &DeviceDescriptor,
        callback: Option<BindModeCallback>,
    ) -> bool {
        self.input(provider_name)
            .is_some_and(|provider| provider.set_detection_mode(mode, device, callback))
    }

    /// Flips a profile for every provider at once through the shared set.
    pub fn set_profile_state(&self, profile: ProfileId, active: bool) -> bool {
        let changed = self.profiles.set_state(profile, active);
        debug!(%profile, active, changed, "profile state set");
        true
    }

    pub fn subscribe_output_device(&self, request: OutputSubscriptionRequest) -> bool {
        match self.output(&request.provider_name) {
            Some(provider) => provider.subscribe_output_device(request),
            None => false,
        }
    }

    pub fn unsubscribe_output_device(&self, request: &OutputSubscriptionRequest) -> bool {
        self.output(&request.provider_name)
            .is_some_and(|provider| provider.unsubscribe_output_device(request))
    }

    pub fn set_output_state(
        &self,
        request: &OutputSubscriptionRequest,
        binding: &BindingDescriptor,
        state: i32,
    ) -> bool {
        self.output(&request.provider_name)
            .is_some_and(|provider| provider.set_output_state(request, binding, state))
    }

    pub fn refresh_devices(&self) {
        for provider in self.inputs.values() {
            provider.refresh_devices();
        }
    }

    pub fn refresh_live_state(&self) {
        for provider in self.inputs.values() {
            provider.refresh_live_state();
        }
    }

    /// Disposes every input provider.  Providers that are also output
    /// providers are torn down by the same call.
    pub fn dispose(&self) {
        for (name, provider) in &self.inputs {
            debug!(provider = %name, "disposing");
            provider.dispose();
        }
        info!("all providers disposed");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
