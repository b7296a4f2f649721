//! Passive topic classification for supported vendor modules.
//!
//! Classification is a pure function over the topic string: first match in
//! the ordered rule list wins, no match means the topic is ignored.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    Dingtian,
    Shelly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Output,
    Input,
    Relay,
}

/// Result of classifying a single topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub family: DeviceFamily,
    /// Vendor-reported module serial segment, e.g. `relay1a76f` or
    /// `shellyplus1pm-08f9e0fe4034`.
    pub module_serial: String,
    pub kind: ComponentKind,
    pub component_id: String,
    /// Module identity: the family-marker path segment joined with the
    /// serial for Dingtian, the serial alone for Shelly.
    pub topic_base: String,
}

fn dingtian_input_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:^|.*/)([A-Za-z0-9_-]*dingtian[A-Za-z0-9_-]*)/(relay[A-Za-z0-9]+)/(?:.*/)?out/i([0-9]+)$",
        )
        .expect("valid regex")
    })
}

fn dingtian_relay_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:^|.*/)([A-Za-z0-9_-]*dingtian[A-Za-z0-9_-]*)/(relay[A-Za-z0-9]+)/(?:.*/)?(out|in)/r([0-9]+)$",
        )
        .expect("valid regex")
    })
}

fn shelly_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:^|.*/)(shelly[A-Za-z0-9_-]+)(?:/.*)?/status/switch:([0-9]+)$")
            .expect("valid regex")
    })
}

/// Classify a topic into module identity and component identity.
///
/// Dingtian `.../out/i<N>` topics are classified as digital inputs even
/// though the literal segment says `out`: the module wires its inputs to a
/// node named `out`, so the override is intentional.
pub fn classify(topic: &str) -> Option<Classified> {
    if let Some(caps) = dingtian_input_re().captures(topic) {
        let marker = &caps[1];
        let serial = &caps[2];
        return Some(Classified {
            family: DeviceFamily::Dingtian,
            module_serial: serial.to_string(),
            kind: ComponentKind::Input,
            component_id: caps[3].to_string(),
            topic_base: format!("{marker}/{serial}"),
        });
    }

    if let Some(caps) = dingtian_relay_re().captures(topic) {
        let marker = &caps[1];
        let serial = &caps[2];
        let kind = if &caps[3] == "out" {
            ComponentKind::Output
        } else {
            ComponentKind::Input
        };
        return Some(Classified {
            family: DeviceFamily::Dingtian,
            module_serial: serial.to_string(),
            kind,
            component_id: caps[4].to_string(),
            topic_base: format!("{marker}/{serial}"),
        });
    }

    if let Some(caps) = shelly_re().captures(topic) {
        let serial = &caps[1];
        return Some(Classified {
            family: DeviceFamily::Shelly,
            module_serial: serial.to_string(),
            kind: ComponentKind::Relay,
            component_id: caps[2].to_string(),
            topic_base: serial.to_string(),
        });
    }

    None
}

/// Accumulated view of one module seen during passive discovery.
#[derive(Debug, Clone)]
pub struct ModuleObservation {
    pub family: DeviceFamily,
    pub module_serial: String,
    pub topic_base: String,
    outputs: BTreeSet<String>,
    inputs: BTreeSet<String>,
    relays: BTreeSet<String>,
}

impl ModuleObservation {
    /// Distinct switchable outputs seen so far; a module that has published
    /// nothing component-specific still counts as one switch.
    pub fn suggested_switch_count(&self) -> usize {
        let seen = match self.family {
            DeviceFamily::Dingtian => self.outputs.len(),
            DeviceFamily::Shelly => self.relays.len(),
        };
        seen.max(1)
    }

    /// Distinct digital inputs seen so far. Shelly modules expose none over
    /// the shapes we sniff.
    pub fn suggested_input_count(&self) -> usize {
        match self.family {
            DeviceFamily::Dingtian => self.inputs.len(),
            DeviceFamily::Shelly => 0,
        }
    }
}

/// Folds classified topics into per-module component sets. Used by the
/// configuration frontend to propose switch/input counts for a sniffed
/// module; carries no network code of its own.
#[derive(Debug, Default)]
pub struct DiscoveryMap {
    modules: HashMap<String, ModuleObservation>,
}

impl DiscoveryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe one topic; returns true when it matched a known shape.
    pub fn observe(&mut self, topic: &str) -> bool {
        let Some(classified) = classify(topic) else {
            return false;
        };
        let entry = self
            .modules
            .entry(classified.topic_base.clone())
            .or_insert_with(|| ModuleObservation {
                family: classified.family,
                module_serial: classified.module_serial.clone(),
                topic_base: classified.topic_base.clone(),
                outputs: BTreeSet::new(),
                inputs: BTreeSet::new(),
                relays: BTreeSet::new(),
            });
        match classified.kind {
            ComponentKind::Output => entry.outputs.insert(classified.component_id),
            ComponentKind::Input => entry.inputs.insert(classified.component_id),
            ComponentKind::Relay => entry.relays.insert(classified.component_id),
        };
        true
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleObservation> {
        self.modules.values()
    }

    pub fn get(&self, topic_base: &str) -> Option<&ModuleObservation> {
        self.modules.get(topic_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dingtian_out_i_is_a_digital_input() {
        // The `out/i7` shape names an input regardless of the `out` segment.
        let c = classify("home/dingtian/relay1a76f/out/i7").expect("match");
        assert_eq!(c.family, DeviceFamily::Dingtian);
        assert_eq!(c.kind, ComponentKind::Input);
        assert_eq!(c.component_id, "7");
        assert_eq!(c.module_serial, "relay1a76f");
        assert_eq!(c.topic_base, "dingtian/relay1a76f");
    }

    #[test]
    fn dingtian_relay_kinds_are_literal() {
        let out = classify("site/dingtian/relay1a76f/out/r2").expect("match");
        assert_eq!(out.kind, ComponentKind::Output);
        assert_eq!(out.component_id, "2");

        let input = classify("site/dingtian/relay1a76f/in/r3").expect("match");
        assert_eq!(input.kind, ComponentKind::Input);
        assert_eq!(input.component_id, "3");
    }

    #[test]
    fn dingtian_marker_segment_may_carry_affixes() {
        let c = classify("my-dingtian_north/relay9b/out/r1").expect("match");
        assert_eq!(c.topic_base, "my-dingtian_north/relay9b");
    }

    #[test]
    fn dingtian_intermediate_segments_are_allowed() {
        let c = classify("dingtian/relay1a76f/status/out/r4").expect("match");
        assert_eq!(c.kind, ComponentKind::Output);
        assert_eq!(c.component_id, "4");
    }

    #[test]
    fn shelly_status_switch() {
        let c = classify("shellyplus1pm-08f9e0fe4034/status/switch:0").expect("match");
        assert_eq!(c.family, DeviceFamily::Shelly);
        assert_eq!(c.kind, ComponentKind::Relay);
        assert_eq!(c.component_id, "0");
        assert_eq!(c.topic_base, "shellyplus1pm-08f9e0fe4034");
    }

    #[test]
    fn shelly_match_is_case_insensitive() {
        let c = classify("home/Shellyplus1PM-08F9E0FE4034/STATUS/SWITCH:1").expect("match");
        assert_eq!(c.family, DeviceFamily::Shelly);
        assert_eq!(c.component_id, "1");
    }

    #[test]
    fn unrelated_topics_do_not_match() {
        assert!(classify("home/livingroom/temperature").is_none());
        assert!(classify("dingtian/relay1a76f/out/x1").is_none());
        assert!(classify("shellyplus1pm/status/light:0").is_none());
        // Command direction never matches the status-switch shape.
        assert!(classify("shellyplus1pm-08f9/command/switch:0").is_none());
    }

    #[test]
    fn discovery_map_counts_components() {
        let mut map = DiscoveryMap::new();
        assert!(map.observe("dingtian/relay1a76f/out/r1"));
        assert!(map.observe("dingtian/relay1a76f/out/r2"));
        assert!(map.observe("dingtian/relay1a76f/out/r2")); // duplicate
        assert!(map.observe("dingtian/relay1a76f/out/i1"));
        assert!(!map.observe("unrelated/topic"));

        let module = map.get("dingtian/relay1a76f").expect("observed");
        assert_eq!(module.suggested_switch_count(), 2);
        assert_eq!(module.suggested_input_count(), 1);
    }

    #[test]
    fn discovery_map_shelly_defaults() {
        let mut map = DiscoveryMap::new();
        assert!(map.observe("shelly1-aabbcc/status/switch:0"));
        let module = map.get("shelly1-aabbcc").expect("observed");
        assert_eq!(module.suggested_switch_count(), 1);
        assert_eq!(module.suggested_input_count(), 0);
    }
}
