//! Domain types surfaced by the coordinator flows.

use dashmap::DashMap;
use serde::Serialize;

/// Map biome of a listed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Landscape {
    Temperate,
    Arctic,
    Tropical,
    Toyland,
    #[default]
    Unknown,
}

impl Landscape {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Temperate,
            1 => Self::Arctic,
            2 => Self::Tropical,
            3 => Self::Toyland,
            _ => Self::Unknown,
        }
    }
}

/// One entry of the public server listing.
///
/// Fields gated behind newer info versions stay `None` when the server
/// advertised an older layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerRecord {
    pub connection_string: String,
    #[serde(skip_serializing)]
    pub info_version: u8,
    pub name: String,
    pub version: String,
    pub clients_on: u8,
    pub clients_max: u8,
    pub companies_on: u8,
    pub companies_max: u8,
    pub spectators_on: u8,
    pub spectators_max: u8,
    pub map_width: u16,
    pub map_height: u16,
    pub landscape: Landscape,
    pub password: bool,
    pub dedicated: bool,
    pub calendar_date: Option<i32>,
    pub calendar_start: Option<i32>,
    pub ticks_playing: Option<u64>,
    pub gamescript_name: Option<String>,
    pub gamescript_version: Option<i32>,
    /// Display names of the NewGRFs the server runs.
    pub newgrfs: Vec<String>,
}

/// Outcome of resolving an invite code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InviteResolution {
    /// The server is reachable directly.
    Direct { hostname: String, port: u16 },
    /// Traffic must go through the coordinator's relay.
    Relay {
        hostname: String,
        port: u16,
        ticket: String,
    },
}

/// One record of the NewGRF lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGrfEntry {
    pub grf_id: u32,
    pub md5: [u8; 16],
    pub name: String,
}

/// Process-wide mapping from lookup index to NewGRF metadata.
///
/// Populated opportunistically from `GC_NEWGRF_LOOKUP` packets; the
/// coordinator sends incremental deltas, so entries accumulate across
/// listing sessions. Repeated indices overwrite.
#[derive(Debug, Default)]
pub struct NewGrfLookup {
    entries: DashMap<u32, NewGrfEntry>,
}

impl NewGrfLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, index: u32, entry: NewGrfEntry) {
        self.entries.insert(index, entry);
    }

    /// Display name for a lookup index, if the table has seen it.
    pub fn name(&self, index: u32) -> Option<String> {
        self.entries.get(&index).map(|e| e.name.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landscape_mapping() {
        assert_eq!(Landscape::from_u8(0), Landscape::Temperate);
        assert_eq!(Landscape::from_u8(3), Landscape::Toyland);
        assert_eq!(Landscape::from_u8(4), Landscape::Unknown);
        assert_eq!(Landscape::from_u8(255), Landscape::Unknown);
    }

    #[test]
    fn test_landscape_serializes_as_name() {
        assert_eq!(
            serde_json::to_string(&Landscape::Tropical).unwrap(),
            "\"Tropical\""
        );
        assert_eq!(
            serde_json::to_string(&Landscape::Unknown).unwrap(),
            "\"Unknown\""
        );
    }

    #[test]
    fn test_invite_resolution_json_shape() {
        let direct = InviteResolution::Direct {
            hostname: "1.2.3.4".into(),
            port: 3975,
        };
        let json: serde_json::Value = serde_json::to_value(&direct).unwrap();
        assert_eq!(json["type"], "direct");
        assert_eq!(json["hostname"], "1.2.3.4");
        assert_eq!(json["port"], 3975);

        let relay = InviteResolution::Relay {
            hostname: "relay.example".into(),
            port: 3974,
            ticket: "TKT".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&relay).unwrap();
        assert_eq!(json["type"], "relay");
        assert_eq!(json["ticket"], "TKT");
    }

    #[test]
    fn test_lookup_overwrites_repeated_index() {
        let lookup = NewGrfLookup::new();
        lookup.insert(
            7,
            NewGrfEntry {
                grf_id: 1,
                md5: [0; 16],
                name: "first".into(),
            },
        );
        lookup.insert(
            7,
            NewGrfEntry {
                grf_id: 2,
                md5: [1; 16],
                name: "second".into(),
            },
        );
        assert_eq!(lookup.len(), 1);
        assert_eq!(lookup.name(7).as_deref(), Some("second"));
        assert_eq!(lookup.name(8), None);
    }
}
