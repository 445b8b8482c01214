//! Bounded node parameters.
//!
//! A [`Property`] is an immutable value: editing one produces a new
//! `Property` with the same [`PropertyId`]. Live values sit in a
//! [`PropertyBank`], one atomic slot per property, so the audio thread
//! always reads a whole value while control threads swap in new ones.

use std::collections::BTreeMap;

use portable_atomic::{AtomicF32, Ordering};
use serde::{Deserialize, Serialize};

use crate::algorithm::AlgorithmKind;
use crate::node::NodeId;

/// Stable key of a parameter within one node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyId {
    Frequency,
    Volume,
    Pan,
    Tone,
    Time,
    Feedback,
}

impl PropertyId {
    /// Default display label.
    pub fn label(self) -> &'static str {
        match self {
            PropertyId::Frequency => "Frequency",
            PropertyId::Volume => "Volume",
            PropertyId::Pan => "Pan",
            PropertyId::Tone => "Tone",
            PropertyId::Time => "Time",
            PropertyId::Feedback => "Feedback",
        }
    }
}

/// A named scalar parameter with an inclusive range.
///
/// `lo <= value <= hi` holds for every `Property` that exists; writes
/// outside the range are clamped.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(from = "PropertyRepr")]
pub struct Property {
    id: PropertyId,
    name: String,
    value: f32,
    lo: f32,
    hi: f32,
}

/// Wire shape of a [`Property`]; re-clamped on the way in.
#[derive(Deserialize)]
struct PropertyRepr {
    id: PropertyId,
    name: String,
    value: f32,
    lo: f32,
    hi: f32,
}

impl From<PropertyRepr> for Property {
    fn from(r: PropertyRepr) -> Self {
        Property::named(r.id, r.name, r.value, r.lo, r.hi)
    }
}

impl Property {
    /// Create a property labelled after its id. `value` is clamped into `lo..=hi`.
    pub fn new(id: PropertyId, value: f32, lo: f32, hi: f32) -> Self {
        Self::named(id, id.label(), value, lo, hi)
    }

    pub fn named(id: PropertyId, name: impl Into<String>, value: f32, lo: f32, hi: f32) -> Self {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        Self {
            id,
            name: name.into(),
            value: clamp(value, lo, hi),
            lo,
            hi,
        }
    }

    /// A copy of this property holding `value`, clamped to the bounds.
    pub fn with_value(&self, value: f32) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            value: clamp(value, self.lo, self.hi),
            lo: self.lo,
            hi: self.hi,
        }
    }

    #[inline]
    pub fn id(&self) -> PropertyId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.value
    }

    #[inline]
    pub fn lo(&self) -> f32 {
        self.lo
    }

    #[inline]
    pub fn hi(&self) -> f32 {
        self.hi
    }
}

// NaN lands on `lo` so a bad float off the wire can't poison the audio path.
fn clamp(value: f32, lo: f32, hi: f32) -> f32 {
    if value.is_nan() {
        lo
    } else {
        value.max(lo).min(hi)
    }
}

/// Serializable per-node parameter state, as sent in SEND_NODES.
///
/// Besides the ordered property map this carries the node's display name,
/// its algorithm kind and the ids currently wired into its input slots.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct NodeProperties {
    name: String,
    kind: AlgorithmKind,
    #[serde(default)]
    inputs: Vec<NodeId>,
    properties: BTreeMap<PropertyId, Property>,
}

impl NodeProperties {
    pub fn new(kind: AlgorithmKind, properties: impl IntoIterator<Item = Property>) -> Self {
        Self {
            name: kind.label().to_owned(),
            kind,
            inputs: Vec::new(),
            properties: properties.into_iter().map(|p| (p.id(), p)).collect(),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<NodeId>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AlgorithmKind {
        self.kind
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn get(&self, id: PropertyId) -> Option<&Property> {
        self.properties.get(&id)
    }

    pub fn has(&self, id: PropertyId) -> bool {
        self.properties.contains_key(&id)
    }

    /// Replace the property stored under `property.id()`.
    ///
    /// Returns the previous value, or `None` if this node has no such
    /// property (in which case nothing is inserted).
    pub fn replace(&mut self, property: Property) -> Option<Property> {
        let slot = self.properties.get_mut(&property.id())?;
        Some(std::mem::replace(slot, property))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

struct Slot {
    template: Property,
    value: AtomicF32,
}

/// Live parameter storage shared between the audio and control threads.
pub struct PropertyBank {
    slots: Vec<Slot>,
}

impl PropertyBank {
    pub fn new(properties: impl IntoIterator<Item = Property>) -> Self {
        let mut slots: Vec<Slot> = properties
            .into_iter()
            .map(|p| Slot {
                value: AtomicF32::new(p.value()),
                template: p,
            })
            .collect();
        slots.sort_by_key(|s| s.template.id());
        slots.dedup_by_key(|s| s.template.id());
        Self { slots }
    }

    fn slot(&self, id: PropertyId) -> Option<&Slot> {
        self.slots
            .binary_search_by_key(&id, |s| s.template.id())
            .ok()
            .map(|i| &self.slots[i])
    }

    /// Current value of `id`, or `None` if this bank has no such property.
    #[inline]
    pub fn value(&self, id: PropertyId) -> Option<f32> {
        self.slot(id).map(|s| s.value.load(Ordering::Acquire))
    }

    /// Current value of `id`, falling back to `default` when absent.
    #[inline]
    pub fn value_or(&self, id: PropertyId, default: f32) -> f32 {
        self.value(id).unwrap_or(default)
    }

    pub fn get(&self, id: PropertyId) -> Option<Property> {
        self.slot(id)
            .map(|s| s.template.with_value(s.value.load(Ordering::Acquire)))
    }

    /// Store a new value for `id`, clamped to its range.
    ///
    /// Returns the property as stored, or `None` if `id` isn't part of this bank.
    pub fn set(&self, id: PropertyId, value: f32) -> Option<Property> {
        let slot = self.slot(id)?;
        let property = slot.template.with_value(value);
        slot.value.store(property.value(), Ordering::Release);
        Some(property)
    }

    pub fn ids(&self) -> impl Iterator<Item = PropertyId> + '_ {
        self.slots.iter().map(|s| s.template.id())
    }

    /// Copy every current value out as immutable properties.
    pub fn snapshot(&self) -> Vec<Property> {
        self.slots
            .iter()
            .map(|s| s.template.with_value(s.value.load(Ordering::Acquire)))
            .collect()
    }
}

impl std::fmt::Debug for PropertyBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.snapshot()).finish()
    }
}
