//! Gift catalog and gift events

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GiftlinkError;

/// The closed set of gifts the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GiftType {
    Rose,
    Heart,
    Star,
    Crown,
    Diamond,
    Rocket,
    Unicorn,
}

impl GiftType {
    pub const ALL: [GiftType; 7] = [
        GiftType::Rose,
        GiftType::Heart,
        GiftType::Star,
        GiftType::Crown,
        GiftType::Diamond,
        GiftType::Rocket,
        GiftType::Unicorn,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GiftType::Rose => "ROSE",
            GiftType::Heart => "HEART",
            GiftType::Star => "STAR",
            GiftType::Crown => "CROWN",
            GiftType::Diamond => "DIAMOND",
            GiftType::Rocket => "ROCKET",
            GiftType::Unicorn => "UNICORN",
        }
    }
}

impl fmt::Display for GiftType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GiftType {
    type Err = GiftlinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        GiftType::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| GiftlinkError::Validation(format!("unknown gift type: {s:?}")))
    }
}

/// Catalog entry: display name, value and signature color
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftInfo {
    pub name: String,
    pub value: u32,
    pub color: String,
}

impl GiftInfo {
    fn new(name: &str, value: u32, color: &str) -> Self {
        Self {
            name: name.to_string(),
            value,
            color: color.to_string(),
        }
    }
}

/// Lookup table from gift type to its [`GiftInfo`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiftCatalog {
    entries: BTreeMap<GiftType, GiftInfo>,
}

impl Default for GiftCatalog {
    fn default() -> Self {
        let entries = [
            (GiftType::Rose, GiftInfo::new("Rose", 1, "#ff69b4")),
            (GiftType::Heart, GiftInfo::new("Heart", 5, "#ff0000")),
            (GiftType::Star, GiftInfo::new("Star", 10, "#ffd700")),
            (GiftType::Crown, GiftInfo::new("Crown", 50, "#ff8c00")),
            (GiftType::Diamond, GiftInfo::new("Diamond", 100, "#00bfff")),
            (GiftType::Rocket, GiftInfo::new("Rocket", 200, "#ff4500")),
            (GiftType::Unicorn, GiftInfo::new("Unicorn", 500, "#9370db")),
        ];
        Self {
            entries: entries.into_iter().collect(),
        }
    }
}

impl GiftCatalog {
    /// Defaults with per-type replacements
    pub fn with_overrides(overrides: &BTreeMap<GiftType, GiftInfo>) -> Self {
        let mut catalog = Self::default();
        for (gift_type, info) in overrides {
            catalog.entries.insert(*gift_type, info.clone());
        }
        catalog
    }

    /// Entry for `gift_type`; a missing entry reads as value 1, white
    pub fn info(&self, gift_type: GiftType) -> GiftInfo {
        self.entries
            .get(&gift_type)
            .cloned()
            .unwrap_or_else(|| GiftInfo::new(gift_type.as_str(), 1, "#ffffff"))
    }

    pub fn value(&self, gift_type: GiftType) -> u32 {
        self.info(gift_type).value
    }

    pub fn color(&self, gift_type: GiftType) -> String {
        self.info(gift_type).color
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GiftType, &GiftInfo)> {
        self.entries.iter()
    }
}

/// One gift arriving from a live stream or a test harness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftEvent {
    #[serde(rename = "type")]
    pub gift_type: GiftType,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    pub value: u32,
}

impl GiftEvent {
    /// Stamp a new event now, taking its value from `catalog`
    pub fn from_catalog(gift_type: GiftType, sender: &str, catalog: &GiftCatalog) -> Self {
        Self {
            gift_type,
            sender: sender.to_string(),
            timestamp: Utc::now(),
            value: catalog.value(gift_type),
        }
    }
}

/// Wire shape of an incoming gift; everything but the type is optional
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingGift {
    #[serde(rename = "type")]
    pub gift_type: String,
    #[serde(default)]
    pub sender: Option<String>,
}

impl IncomingGift {
    pub fn into_event(self, catalog: &GiftCatalog) -> Result<GiftEvent, GiftlinkError> {
        let gift_type: GiftType = self.gift_type.parse()?;
        let sender = self.sender.unwrap_or_else(|| "anonymous".to_string());
        Ok(GiftEvent::from_catalog(gift_type, &sender, catalog))
    }
}
