//! Light grouping and spatial zones for a physical rig.
//!
//! A `LightSetup` is the bridge between pattern definitions, which only ever
//! reference group/zone names, and the numeric light indices a particular
//! venue actually has wired up.

use crate::config::HueConfig;
use crate::value::LightContext;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZoneType {
    All,
    Left,
    Right,
    Front,
    Back,
    Odd,
    Even,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZonePosition {
    Ceiling,
    Wall,
    Floor,
}

impl ZonePosition {
    fn from_str(s: &str) -> Self {
        match s {
            "ceiling" => ZonePosition::Ceiling,
            "floor" => ZonePosition::Floor,
            _ => ZonePosition::Wall,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LightGroup {
    pub name: String,
    pub light_indices: Vec<usize>,
    pub zone_type: Option<ZoneType>,
}

impl LightGroup {
    pub fn new(name: impl Into<String>, light_indices: Vec<usize>) -> Self {
        LightGroup {
            name: name.into(),
            light_indices,
            zone_type: None,
        }
    }

    pub fn contains(&self, light_id: usize) -> bool {
        self.light_indices.contains(&light_id)
    }

    pub fn len(&self) -> usize {
        self.light_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.light_indices.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct ZoneDefinition {
    pub name: String,
    pub group_names: Vec<String>,
    pub light_indices: Vec<usize>,
    pub position: ZonePosition,
    pub is_primary: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ZoneConfig {
    pub zones: HashMap<String, ZoneDefinition>,
    pub primary_zone: String,
}

impl ZoneConfig {
    pub fn new() -> Self {
        ZoneConfig {
            zones: HashMap::new(),
            primary_zone: "perimeter".to_string(),
        }
    }

    pub fn has_zone(&self, name: &str) -> bool {
        self.zones.contains_key(name)
    }

    pub fn get_zone(&self, name: &str) -> Option<&ZoneDefinition> {
        self.zones.get(name)
    }

    pub fn available_zones(&self) -> Vec<String> {
        self.zones.keys().cloned().collect()
    }

    pub fn get_primary(&self) -> Option<&ZoneDefinition> {
        self.zones.get(&self.primary_zone)
    }

    pub fn add_zone(&mut self, zone: ZoneDefinition) {
        if zone.is_primary {
            self.primary_zone = zone.name.clone();
        }
        self.zones.insert(zone.name.clone(), zone);
    }

    pub fn has_dual_zones(&self) -> bool {
        self.zones.contains_key("ceiling") && self.zones.contains_key("perimeter")
    }

    pub fn create_dual_zone(ceiling_indices: Vec<usize>, perimeter_indices: Vec<usize>) -> Self {
        let mut config = ZoneConfig::new();
        config.add_zone(ZoneDefinition {
            name: "ceiling".to_string(),
            group_names: vec!["ceiling".to_string()],
            light_indices: ceiling_indices,
            position: ZonePosition::Ceiling,
            is_primary: false,
        });
        config.add_zone(ZoneDefinition {
            name: "perimeter".to_string(),
            group_names: vec!["perimeter".to_string()],
            light_indices: perimeter_indices,
            position: ZonePosition::Wall,
            is_primary: true,
        });
        config
    }
}

#[derive(Clone, Debug)]
pub struct LightSetup {
    pub name: String,
    pub total_lights: usize,
    pub groups: HashMap<String, LightGroup>,
    pub zone_config: Option<ZoneConfig>,
}

impl LightSetup {
    pub fn available_zones(&self) -> Vec<String> {
        self.zone_config.as_ref().map(|z| z.available_zones()).unwrap_or_default()
    }

    pub fn has_dual_zones(&self) -> bool {
        self.zone_config.as_ref().map(|z| z.has_dual_zones()).unwrap_or(false)
    }

    pub fn primary_zone(&self) -> String {
        self.zone_config
            .as_ref()
            .map(|z| z.primary_zone.clone())
            .unwrap_or_else(|| "all".to_string())
    }

    pub fn get_zone_lights(&self, zone_name: &str) -> Vec<usize> {
        self.zone_config
            .as_ref()
            .and_then(|z| z.get_zone(zone_name))
            .map(|z| z.light_indices.clone())
            .unwrap_or_default()
    }

    pub fn has_zone(&self, zone_name: &str) -> bool {
        self.zone_config.as_ref().map(|z| z.has_zone(zone_name)).unwrap_or(false)
    }

    pub fn get_group(&self, name: &str) -> Option<&LightGroup> {
        self.groups.get(name)
    }

    pub fn add_group(&mut self, group: LightGroup) {
        self.groups.insert(group.name.clone(), group);
    }

    /// `all`/`left`/`right`/`odd`/`even`, plus `front`/`back` once the rig
    /// has at least 4 lights (identical split to left/right).
    pub fn create_default(num_lights: usize) -> Self {
        let mut setup = LightSetup {
            name: "default".to_string(),
            total_lights: num_lights,
            groups: HashMap::new(),
            zone_config: None,
        };

        setup.groups.insert(
            "all".to_string(),
            LightGroup {
                name: "all".to_string(),
                light_indices: (0..num_lights).collect(),
                zone_type: Some(ZoneType::All),
            },
        );

        let mid = num_lights / 2;
        setup.groups.insert(
            "left".to_string(),
            LightGroup {
                name: "left".to_string(),
                light_indices: (0..mid).collect(),
                zone_type: Some(ZoneType::Left),
            },
        );
        setup.groups.insert(
            "right".to_string(),
            LightGroup {
                name: "right".to_string(),
                light_indices: (mid..num_lights).collect(),
                zone_type: Some(ZoneType::Right),
            },
        );

        setup.groups.insert(
            "odd".to_string(),
            LightGroup {
                name: "odd".to_string(),
                light_indices: (0..num_lights).filter(|i| i % 2 == 1).collect(),
                zone_type: Some(ZoneType::Odd),
            },
        );
        setup.groups.insert(
            "even".to_string(),
            LightGroup {
                name: "even".to_string(),
                light_indices: (0..num_lights).filter(|i| i % 2 == 0).collect(),
                zone_type: Some(ZoneType::Even),
            },
        );

        if num_lights >= 4 {
            let front_count = num_lights / 2;
            setup.groups.insert(
                "front".to_string(),
                LightGroup {
                    name: "front".to_string(),
                    light_indices: (0..front_count).collect(),
                    zone_type: Some(ZoneType::Front),
                },
            );
            setup.groups.insert(
                "back".to_string(),
                LightGroup {
                    name: "back".to_string(),
                    light_indices: (front_count..num_lights).collect(),
                    zone_type: Some(ZoneType::Back),
                },
            );
        }

        setup
    }

    /// Builds a setup from a `config.yaml`'s `hue:` section, where groups and
    /// zones are keyed by light *name* rather than index. `light_order`
    /// fixes each name's numeric index; names absent from `light_order` are
    /// dropped from the group/zone they're mentioned in with a count left
    /// for the caller to log, rather than failing the whole load.
    pub fn from_hue_config(config: &HueConfig) -> Self {
        let num_lights = config.light_order.len();
        let mut setup = LightSetup::create_default(num_lights);
        setup.name = "hue".to_string();

        let index_of = |name: &str| config.light_order.iter().position(|n| n == name);

        for (group_name, light_names) in &config.custom_groups {
            let indices: Vec<usize> = light_names.iter().filter_map(|n| index_of(n)).collect();
            setup.add_group(LightGroup::new(group_name.clone(), indices));
        }

        if !config.zones.is_empty() {
            let mut zone_config = ZoneConfig::new();
            for (i, (zone_name, light_names)) in config.zones.iter().enumerate() {
                let indices: Vec<usize> = light_names.iter().filter_map(|n| index_of(n)).collect();
                // Zones are additionally registered as ordinary groups so
                // `zone("ceiling")` and plain `light("ceiling")` both resolve.
                setup.add_group(LightGroup::new(zone_name.clone(), indices.clone()));
                zone_config.add_zone(ZoneDefinition {
                    name: zone_name.clone(),
                    group_names: vec![zone_name.clone()],
                    light_indices: indices,
                    position: ZonePosition::from_str(zone_name),
                    is_primary: i == 0,
                });
            }
            setup.zone_config = Some(zone_config);
        }

        setup
    }

    /// Flattens this setup into the numeric-index form patterns query
    /// against, losing the zone/group provenance that only the setup itself
    /// needs to track.
    pub fn to_light_context(&self) -> LightContext {
        let groups: HashMap<String, Vec<usize>> = self
            .groups
            .iter()
            .map(|(name, group)| (name.clone(), group.light_indices.clone()))
            .collect();
        let zones: HashMap<String, Vec<usize>> = self
            .zone_config
            .as_ref()
            .map(|z| {
                z.zones
                    .iter()
                    .map(|(name, def)| (name.clone(), def.light_indices.clone()))
                    .collect()
            })
            .unwrap_or_default();
        LightContext::with_zones(self.total_lights, groups, zones)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (name, group) in &self.groups {
            if group.is_empty() {
                warnings.push(format!("Group '{name}' has no lights"));
            }
            for &idx in &group.light_indices {
                if idx >= self.total_lights {
                    warnings.push(format!(
                        "Group '{name}' has invalid index {idx} (total_lights={})",
                        self.total_lights
                    ));
                }
            }
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_six_light_setup() {
        let setup = LightSetup::create_default(6);
        assert_eq!(setup.get_group("all").unwrap().light_indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(setup.get_group("left").unwrap().light_indices, vec![0, 1, 2]);
        assert_eq!(setup.get_group("right").unwrap().light_indices, vec![3, 4, 5]);
        assert_eq!(setup.get_group("odd").unwrap().light_indices, vec![1, 3, 5]);
        assert_eq!(setup.get_group("even").unwrap().light_indices, vec![0, 2, 4]);
        assert!(setup.get_group("front").is_some());
    }

    #[test]
    fn front_back_absent_under_four_lights() {
        let setup = LightSetup::create_default(3);
        assert!(setup.get_group("front").is_none());
        assert!(setup.get_group("back").is_none());
    }

    #[test]
    fn dual_zone_reports_has_dual_zones() {
        let zone_config = ZoneConfig::create_dual_zone(vec![0, 1, 2, 3], vec![4, 5]);
        assert!(zone_config.has_dual_zones());
        assert_eq!(zone_config.primary_zone, "perimeter");
    }

    #[test]
    fn validate_flags_out_of_range_indices() {
        let mut setup = LightSetup::create_default(4);
        setup.add_group(LightGroup::new("bad", vec![0, 99]));
        let warnings = setup.validate();
        assert!(warnings.iter().any(|w| w.contains("invalid index 99")));
    }

    #[test]
    fn from_hue_config_maps_names_to_indices() {
        let mut custom_groups = HashMap::new();
        custom_groups.insert("booth".to_string(), vec!["b1".to_string(), "b2".to_string()]);
        let mut zones = HashMap::new();
        zones.insert("ceiling".to_string(), vec!["b1".to_string()]);

        let hue = crate::config::HueConfig {
            bridge_ip: None,
            bridge_username: None,
            entertainment_area_id: None,
            light_order: vec!["b1".to_string(), "b2".to_string(), "a1".to_string()],
            custom_groups,
            zones,
        };
        let setup = LightSetup::from_hue_config(&hue);
        assert_eq!(setup.get_group("booth").unwrap().light_indices, vec![0, 1]);
        assert!(setup.has_zone("ceiling"));
        assert_eq!(setup.get_zone_lights("ceiling"), vec![0]);

        let ctx = setup.to_light_context();
        assert_eq!(ctx.resolve_group("booth"), vec![0, 1]);
        assert!(ctx.has_zone("ceiling"));
        assert_eq!(ctx.resolve_group("ceiling"), vec![0]);
    }
}
