use serde::{Deserialize, Serialize};

/// Raw `window.performance.timing` fields, in epoch milliseconds.
///
/// Browsers report phases that did not happen (a cached DNS entry, a reused
/// connection) as `0` or leave them out entirely, so every field defaults to
/// zero and the derivation in [`TimingResult::from_navigation`] drops negative
/// intervals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NavigationTiming {
    pub navigation_start: i64,
    pub domain_lookup_start: i64,
    pub domain_lookup_end: i64,
    pub connect_start: i64,
    pub connect_end: i64,
    pub request_start: i64,
    pub response_start: i64,
    pub dom_content_loaded_event_end: i64,
    pub load_event_end: i64,
}

/// Derived page load intervals in milliseconds. `None` means the phase was
/// absent or produced a negative interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingResult {
    pub dns: Option<i64>,
    pub tcp: Option<i64>,
    pub tls: Option<i64>,
    pub dom: Option<i64>,
    pub page_load: Option<i64>,
    pub total: Option<i64>,
}

impl TimingResult {
    pub fn from_navigation(timing: &NavigationTiming, https: bool) -> Self {
        let t = timing;
        let load = t.load_event_end - t.navigation_start;

        Self {
            dns: non_negative(t.domain_lookup_end - t.domain_lookup_start),
            tcp: non_negative(t.connect_end - t.connect_start),
            tls: if https {
                non_negative(t.request_start - t.connect_end)
            } else {
                None
            },
            dom: non_negative(t.dom_content_loaded_event_end - t.navigation_start),
            page_load: non_negative(load),
            total: non_negative(load),
        }
    }
}

fn non_negative(value: i64) -> Option<i64> {
    (value >= 0).then_some(value)
}
