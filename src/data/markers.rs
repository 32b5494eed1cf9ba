//! Markers bound to traces.
//!
//! A marker reads its trace, it never writes it. Its value is the trace's
//! lower-bound query at the marker frequency, optionally piped through a view
//! transform for display.

use crate::data::trace::{Trace, TraceId};
use crate::data::transforms::{self, ViewType};
use crate::error::{AppResult, VnaError};
use crate::events::VnaEvent;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity of a marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarkerId(pub u32);

impl std::fmt::Display for MarkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// How a marker chooses its frequency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MarkerRule {
    /// Fixed frequency set by the user
    #[default]
    Manual,
    /// Follows the global magnitude maximum
    Maximum,
    /// Follows the global magnitude minimum
    Minimum,
}

/// A frequency cursor on one trace.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    /// Marker identity
    pub id: MarkerId,
    /// Trace the marker reads
    pub trace: TraceId,
    /// Frequency in Hz
    pub frequency: f64,
    /// Placement rule
    pub rule: MarkerRule,
}

/// Registry of all markers.
#[derive(Debug, Default)]
pub struct MarkerModel {
    markers: BTreeMap<MarkerId, Marker>,
    next_id: u32,
}

impl MarkerModel {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a new manual marker to `trace` at `frequency`.
    pub fn add(&mut self, trace: TraceId, frequency: f64) -> (MarkerId, Vec<VnaEvent>) {
        self.next_id += 1;
        let id = MarkerId(self.next_id);
        self.markers.insert(
            id,
            Marker {
                id,
                trace,
                frequency,
                rule: MarkerRule::Manual,
            },
        );
        (id, vec![VnaEvent::MarkerAdded { marker: id, trace }])
    }

    /// Delete a marker.
    pub fn remove(&mut self, id: MarkerId) -> AppResult<Vec<VnaEvent>> {
        let marker = self
            .markers
            .remove(&id)
            .ok_or(VnaError::UnknownMarker(id))?;
        Ok(vec![VnaEvent::MarkerRemoved {
            marker: id,
            trace: marker.trace,
        }])
    }

    /// Detach every marker bound to `trace`.
    pub fn remove_for_trace(&mut self, trace: TraceId) -> Vec<VnaEvent> {
        let ids: Vec<MarkerId> = self
            .markers
            .values()
            .filter(|m| m.trace == trace)
            .map(|m| m.id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.markers.remove(&id))
            .map(|m| VnaEvent::MarkerRemoved {
                marker: m.id,
                trace: m.trace,
            })
            .collect()
    }

    /// Marker by id.
    pub fn get(&self, id: MarkerId) -> Option<&Marker> {
        self.markers.get(&id)
    }

    /// All markers in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    /// Number of markers.
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    /// Whether there are no markers.
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Markers bound to `trace`.
    pub fn for_trace(&self, trace: TraceId) -> Vec<MarkerId> {
        self.markers
            .values()
            .filter(|m| m.trace == trace)
            .map(|m| m.id)
            .collect()
    }

    /// Move a marker. A rule-driven marker becomes manual.
    pub fn set_frequency(&mut self, id: MarkerId, frequency: f64) -> AppResult<Vec<VnaEvent>> {
        let marker = self
            .markers
            .get_mut(&id)
            .ok_or(VnaError::UnknownMarker(id))?;
        marker.frequency = frequency;
        marker.rule = MarkerRule::Manual;
        Ok(vec![VnaEvent::MarkerDataChanged(id)])
    }

    /// Change the rule and apply it to the current trace data.
    pub fn set_rule(&mut self, id: MarkerId, rule: MarkerRule, trace: &Trace) -> AppResult<Vec<VnaEvent>> {
        let marker = self
            .markers
            .get_mut(&id)
            .ok_or(VnaError::UnknownMarker(id))?;
        marker.rule = rule;
        apply_rule(marker, trace);
        Ok(vec![VnaEvent::MarkerDataChanged(id)])
    }

    /// Re-evaluate every marker bound to `trace` after its data changed.
    pub fn update_markers(&mut self, trace: &Trace) -> Vec<VnaEvent> {
        self.markers
            .values_mut()
            .filter(|m| m.trace == trace.id())
            .map(|m| {
                apply_rule(m, trace);
                VnaEvent::MarkerDataChanged(m.id)
            })
            .collect()
    }

    /// Complex value under the marker, NaN outside the trace range.
    pub fn value(&self, id: MarkerId, trace: &Trace) -> AppResult<Complex64> {
        let marker = self.get(id).ok_or(VnaError::UnknownMarker(id))?;
        Ok(trace.query(marker.frequency))
    }

    /// Marker value as shown in a frequency-domain view.
    pub fn display_value(&self, id: MarkerId, trace: &Trace, view: ViewType) -> AppResult<f64> {
        let marker = self.get(id).ok_or(VnaError::UnknownMarker(id))?;
        Ok(transforms::value_at(trace, view, marker.frequency))
    }
}

fn apply_rule(marker: &mut Marker, trace: &Trace) {
    match marker.rule {
        MarkerRule::Manual => {}
        MarkerRule::Maximum => marker.frequency = trace.find_extremum_freq(true),
        MarkerRule::Minimum => marker.frequency = trace.find_extremum_freq(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement_types::{LiveParameter, Sample};

    fn trace() -> Trace {
        let mut t = Trace::new(TraceId(3), "S21", [0; 3], LiveParameter::S21);
        for (f, v) in [(1.0e6, 0.1), (2.0e6, 0.9), (3.0e6, 0.05)] {
            t.add_sample(Sample::new(f, Complex64::new(v, 0.0))).unwrap();
        }
        t
    }

    #[test]
    fn value_follows_trace_query() {
        let t = trace();
        let mut model = MarkerModel::new();
        let (id, events) = model.add(t.id(), 1.5e6);
        assert_eq!(events, vec![VnaEvent::MarkerAdded { marker: id, trace: TraceId(3) }]);
        assert_eq!(model.value(id, &t).unwrap(), Complex64::new(0.9, 0.0));
        model.set_frequency(id, 5.0e6).unwrap();
        assert!(model.value(id, &t).unwrap().re.is_nan());
    }

    #[test]
    fn rules_track_extremum() {
        let t = trace();
        let mut model = MarkerModel::new();
        let (max, _) = model.add(t.id(), 1.0e6);
        let (min, _) = model.add(t.id(), 1.0e6);
        model.set_rule(max, MarkerRule::Maximum, &t).unwrap();
        model.set_rule(min, MarkerRule::Minimum, &t).unwrap();
        assert_eq!(model.get(max).unwrap().frequency, 2.0e6);
        assert_eq!(model.get(min).unwrap().frequency, 3.0e6);

        model.set_frequency(max, 1.0e6).unwrap();
        assert_eq!(model.get(max).unwrap().rule, MarkerRule::Manual);
        let events = model.update_markers(&t);
        assert_eq!(events.len(), 2);
        assert_eq!(model.get(max).unwrap().frequency, 1.0e6);
    }

    #[test]
    fn remove_for_trace_reports_each_marker() {
        let mut model = MarkerModel::new();
        let (a, _) = model.add(TraceId(1), 1.0);
        let (_, _) = model.add(TraceId(2), 1.0);
        let (c, _) = model.add(TraceId(1), 2.0);
        let events = model.remove_for_trace(TraceId(1));
        assert_eq!(
            events,
            vec![
                VnaEvent::MarkerRemoved { marker: a, trace: TraceId(1) },
                VnaEvent::MarkerRemoved { marker: c, trace: TraceId(1) },
            ]
        );
        assert_eq!(model.len(), 1);
        assert!(matches!(model.remove(a), Err(VnaError::UnknownMarker(_))));
    }

    #[test]
    fn display_value_uses_view() {
        let t = trace();
        let mut model = MarkerModel::new();
        let (id, _) = model.add(t.id(), 1.0e6);
        let db = model.display_value(id, &t, ViewType::Magnitude).unwrap();
        assert!((db + 20.0).abs() < 1e-9);
    }
}
