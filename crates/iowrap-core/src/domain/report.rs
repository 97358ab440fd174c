//! Capability reports: what a provider's devices can be bound to.
//!
//! A [`ProviderReport`] maps device handles to [`DeviceReport`]s.  Each device
//! report is a small tree of [`DeviceReportNode`]s ("Axes", "Buttons", ...)
//! whose leaves are [`BindingReport`]s.  Reports are built once at discovery
//! time and handed out by value, so consumers can never observe a report
//! being rebuilt underneath them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::descriptor::{BindingDescriptor, DeviceDescriptor};

/// How a binding reports its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingCategory {
    /// Centred axis, full `i16` range.
    Signed,
    /// One-sided axis such as a trigger.
    Unsigned,
    /// Relative movement since the previous report.
    Delta,
    /// Held while pressed (0 / 1).
    Momentary,
    /// Fire-and-forget pulse.
    Event,
}

/// One bindable input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingReport {
    pub title: String,
    /// Human-readable location, e.g. `"Axes > LS X"`.
    pub path: String,
    pub category: BindingCategory,
    /// Whether the provider can suppress this input from reaching the OS.
    pub blockable: bool,
    pub descriptor: BindingDescriptor,
}

impl BindingReport {
    pub fn new(
        node_title: &str,
        title: impl Into<String>,
        category: BindingCategory,
        descriptor: BindingDescriptor,
    ) -> Self {
        let title = title.into();
        Self {
            path: format!("{node_title} > {title}"),
            title,
            category,
            blockable: false,
            descriptor,
        }
    }

    /// Placeholder used when a change arrives for a binding the report does
    /// not describe (bind mode still needs something to hand out).
    pub fn untitled(descriptor: BindingDescriptor) -> Self {
        let category = match descriptor.binding_type {
            super::descriptor::BindingType::Axis => BindingCategory::Signed,
            _ => BindingCategory::Momentary,
        };
        Self {
            title: descriptor.to_string(),
            path: descriptor.to_string(),
            category,
            blockable: false,
            descriptor,
        }
    }
}

/// A titled group of bindings, optionally with child groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReportNode {
    pub title: String,
    pub bindings: Vec<BindingReport>,
    pub nodes: Vec<DeviceReportNode>,
}

impl DeviceReportNode {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_bindings(title: impl Into<String>, bindings: Vec<BindingReport>) -> Self {
        Self {
            title: title.into(),
            bindings,
            nodes: Vec::new(),
        }
    }

    fn walk<'a>(&'a self, out: &mut Vec<&'a BindingReport>) {
        out.extend(self.bindings.iter());
        for child in &self.nodes {
            child.walk(out);
        }
    }
}

/// Everything bindable on one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub name: String,
    pub descriptor: DeviceDescriptor,
    pub nodes: Vec<DeviceReportNode>,
}

impl DeviceReport {
    pub fn new(name: impl Into<String>, descriptor: DeviceDescriptor) -> Self {
        Self {
            name: name.into(),
            descriptor,
            nodes: Vec::new(),
        }
    }

    /// All leaf bindings in depth-first node order.
    pub fn bindings(&self) -> Vec<&BindingReport> {
        let mut out = Vec::new();
        for node in &self.nodes {
            node.walk(&mut out);
        }
        out
    }

    pub fn find_binding(&self, descriptor: &BindingDescriptor) -> Option<&BindingReport> {
        self.bindings()
            .into_iter()
            .find(|b| &b.descriptor == descriptor)
    }

    pub fn contains_binding(&self, descriptor: &BindingDescriptor) -> bool {
        self.find_binding(descriptor).is_some()
    }

    pub fn binding_descriptors(&self) -> Vec<BindingDescriptor> {
        self.bindings().into_iter().map(|b| b.descriptor).collect()
    }
}

/// All devices a provider currently exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReport {
    pub title: String,
    pub description: String,
    pub provider_name: String,
    /// Ordered by device handle.
    pub devices: BTreeMap<String, DeviceReport>,
}

impl ProviderReport {
    pub fn new(
        provider_name: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            provider_name: provider_name.into(),
            devices: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, report: DeviceReport) {
        self.devices.insert(report.descriptor.handle.clone(), report);
    }

    pub fn device(&self, device: &DeviceDescriptor) -> Option<&DeviceReport> {
        self.devices.get(&device.handle)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
