//! Registry of traces and routing of live datapoints.

use crate::data::markers::MarkerModel;
use crate::data::tdr::TdrProvider;
use crate::data::trace::{Trace, TraceId};
use crate::error::{AppResult, VnaError};
use crate::events::VnaEvent;
use crate::measurement_types::{LiveParameter, VnaDatapoint};
use std::collections::BTreeMap;

/// Colours of the default S-parameter traces.
pub const DEFAULT_TRACE_COLORS: [(LiveParameter, [u8; 3]); 4] = [
    (LiveParameter::S11, [255, 255, 0]),
    (LiveParameter::S12, [0, 0, 255]),
    (LiveParameter::S21, [0, 255, 0]),
    (LiveParameter::S22, [255, 0, 0]),
];

/// Owns all traces, keyed by id.
#[derive(Debug, Default)]
pub struct TraceModel {
    traces: BTreeMap<TraceId, Trace>,
    next_id: u32,
}

impl TraceModel {
    /// Empty model without traces.
    pub fn new() -> Self {
        Self::default()
    }

    /// Model with one overwrite trace per S-parameter.
    pub fn with_default_traces() -> Self {
        let mut model = Self::new();
        for (param, color) in DEFAULT_TRACE_COLORS {
            model.add_trace(param.as_str(), color, param);
        }
        model
    }

    /// Register a new live trace.
    pub fn add_trace(
        &mut self,
        name: impl Into<String>,
        color: [u8; 3],
        parameter: LiveParameter,
    ) -> (TraceId, Vec<VnaEvent>) {
        self.next_id += 1;
        let id = TraceId(self.next_id);
        self.traces
            .insert(id, Trace::new(id, name, color, parameter));
        (id, vec![VnaEvent::TraceAdded(id)])
    }

    /// Remove a trace and detach its markers. Marker removals are reported first.
    pub fn remove_trace(&mut self, id: TraceId, markers: &mut MarkerModel) -> AppResult<Vec<VnaEvent>> {
        if self.traces.remove(&id).is_none() {
            return Err(VnaError::UnknownTrace(id));
        }
        let mut events = markers.remove_for_trace(id);
        events.push(VnaEvent::TraceRemoved(id));
        Ok(events)
    }

    /// Trace by id.
    pub fn trace(&self, id: TraceId) -> AppResult<&Trace> {
        self.traces.get(&id).ok_or(VnaError::UnknownTrace(id))
    }

    /// Mutable trace by id.
    pub fn trace_mut(&mut self, id: TraceId) -> AppResult<&mut Trace> {
        self.traces.get_mut(&id).ok_or(VnaError::UnknownTrace(id))
    }

    /// All traces in id order.
    pub fn traces(&self) -> impl Iterator<Item = &Trace> {
        self.traces.values()
    }

    /// Ids of all traces.
    pub fn ids(&self) -> Vec<TraceId> {
        self.traces.keys().copied().collect()
    }

    /// Number of traces.
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    /// Whether the model holds no traces.
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Commit one datapoint to every live, unpaused trace of each parameter.
    pub fn add_vna_data(&mut self, dp: &VnaDatapoint) -> Vec<VnaEvent> {
        let mut events = Vec::new();
        for trace in self.traces.values_mut() {
            if !trace.is_live() || trace.is_paused() {
                continue;
            }
            // Live and unpaused, so this cannot fail
            if let Ok(mut added) = trace.add_sample(dp.sample(trace.parameter())) {
                events.append(&mut added);
            }
        }
        events
    }

    /// Clear every live trace (paused traces keep their data).
    pub fn clear_live_data(&mut self) -> Vec<VnaEvent> {
        self.traces
            .values_mut()
            .filter(|t| t.is_live())
            .flat_map(|t| t.clear())
            .collect()
    }

    /// Whether any visible live trace needs `port` to be excited.
    pub fn port_excitation_required(&self, port: u8) -> bool {
        self.traces.values().any(|t| {
            t.is_live() && t.is_visible() && !t.is_paused() && t.parameter().excited_port() == port
        })
    }

    /// Refresh TDR series of interested live traces.
    pub fn update_tdr(&mut self, provider: &dyn TdrProvider) -> Vec<VnaEvent> {
        self.traces
            .values_mut()
            .filter(|t| t.is_live())
            .flat_map(|t| t.update_tdr(provider))
            .collect()
    }

    /// Re-evaluate the markers of every live trace.
    pub fn update_markers(&self, markers: &mut MarkerModel) -> Vec<VnaEvent> {
        self.traces
            .values()
            .filter(|t| t.is_live())
            .flat_map(|t| markers.update_markers(t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::trace::LiveUpdatePolicy;
    use num_complex::Complex64;

    fn datapoint(idx: u32, f: f64) -> VnaDatapoint {
        VnaDatapoint {
            point_index: idx,
            frequency: f,
            s11: Complex64::new(0.11, 0.0),
            s12: Complex64::new(0.12, 0.0),
            s21: Complex64::new(0.21, 0.0),
            s22: Complex64::new(0.22, 0.0),
        }
    }

    #[test]
    fn default_traces() {
        let model = TraceModel::with_default_traces();
        let names: Vec<&str> = model.traces().map(|t| t.name()).collect();
        assert_eq!(names, vec!["S11", "S12", "S21", "S22"]);
        let s21 = model.traces().find(|t| t.parameter() == LiveParameter::S21).unwrap();
        assert_eq!(s21.color(), [0, 255, 0]);
        assert_eq!(s21.policy(), LiveUpdatePolicy::Overwrite);
    }

    #[test]
    fn routes_parameters() {
        let mut model = TraceModel::with_default_traces();
        let events = model.add_vna_data(&datapoint(0, 1.0e6));
        assert_eq!(events.len(), 8);
        for t in model.traces() {
            let expected = datapoint(0, 1.0e6).parameter(t.parameter());
            assert_eq!(t.query(1.0e6), expected);
        }
    }

    #[test]
    fn paused_trace_is_skipped() {
        let mut model = TraceModel::with_default_traces();
        let id = model.ids()[0];
        model.trace_mut(id).unwrap().pause();
        model.add_vna_data(&datapoint(0, 1.0e6));
        assert!(model.trace(id).unwrap().is_empty());
        assert!(model.clear_live_data().len() == 6);
    }

    #[test]
    fn remove_trace_detaches_markers() {
        let mut model = TraceModel::with_default_traces();
        let mut markers = MarkerModel::new();
        let id = model.ids()[2];
        let (m, _) = markers.add(id, 1.0e6);
        let events = model.remove_trace(id, &mut markers).unwrap();
        assert_eq!(
            events,
            vec![
                VnaEvent::MarkerRemoved { marker: m, trace: id },
                VnaEvent::TraceRemoved(id)
            ]
        );
        assert!(markers.is_empty());
        assert!(matches!(
            model.remove_trace(id, &mut markers),
            Err(VnaError::UnknownTrace(_))
        ));
    }

    #[test]
    fn excitation_follows_visible_traces() {
        let mut model = TraceModel::new();
        let (id, _) = model.add_trace("S21", [0; 3], LiveParameter::S21);
        assert!(model.port_excitation_required(1));
        assert!(!model.port_excitation_required(2));
        model.trace_mut(id).unwrap().set_visible(false);
        assert!(!model.port_excitation_required(1));
    }
}
