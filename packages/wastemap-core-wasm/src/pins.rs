//! Complaint records and the address-keyed pins derived from them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::sdk::LatLng;

/// Category tag carried by supervisor assignments; never chosen for an icon.
pub const MANAGER_CATEGORY: &str = "manager";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Number(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Number(n) => write!(f, "{}", n),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub region_nm: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TeamAssignment {
    #[serde(default)]
    pub category: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// A complaint as the record source supplies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub address: Address,
    #[serde(default, deserialize_with = "lenient_coordinates")]
    pub coordinates: Option<LatLng>,
    #[serde(default)]
    pub datetime: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "string_like")]
    pub status: String,
    #[serde(default)]
    pub teams: Vec<TeamAssignment>,
    #[serde(default, alias = "is_repeat")]
    pub is_repeat: bool,
}

const BLANK_ADDRESS_PREFIX: &str = " #";

impl Record {
    pub fn valid_coordinates(&self) -> Option<LatLng> {
        self.coordinates.filter(LatLng::is_valid)
    }

    /// Key under which co-located records share a pin. Records without an
    /// address each get their own key; it starts with whitespace, which a
    /// trimmed address never does.
    pub fn group_key(&self) -> String {
        let address = self.address.address.trim();
        if address.is_empty() {
            format!("{}{}", BLANK_ADDRESS_PREFIX, self.id)
        } else {
            address.to_string()
        }
    }

    /// Earlier `datetime` first, then lower id.
    fn precedence(&self) -> (&str, &RecordId) {
        (self.datetime.as_str(), &self.id)
    }
}

/// Records sharing one address, summarized by a representative.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressGroup {
    pub key: String,
    pub representative: Record,
    pub record_ids: Vec<RecordId>,
    pub is_repeat: bool,
}

impl AddressGroup {
    /// The address to geocode, if the group has one.
    pub fn geocode_address(&self) -> Option<&str> {
        let address = self.representative.address.address.trim();
        (!address.is_empty()).then_some(address)
    }

    pub fn into_pin(self, position: LatLng) -> PinData {
        let rep = self.representative;
        let categories: Vec<String> = rep
            .teams
            .iter()
            .map(|t| t.category.clone())
            .filter(|c| !c.is_empty())
            .collect();
        PinData {
            id: self.key,
            lat: position.lat,
            lng: position.lng,
            category: primary_category(&categories).to_string(),
            categories,
            is_repeat: self.is_repeat,
            address: rep.address.address,
            region_name: rep.address.region_nm,
            complaint_id: rep.id,
            record_ids: self.record_ids,
            content: rep.content,
            datetime: rep.datetime,
            status: rep.status,
            teams: rep.teams,
        }
    }
}

/// One marker's worth of data. Rebuilt on every pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinData {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub category: String,
    pub categories: Vec<String>,
    pub is_repeat: bool,
    pub address: String,
    pub region_name: String,
    pub complaint_id: RecordId,
    pub record_ids: Vec<RecordId>,
    pub content: String,
    pub datetime: String,
    pub status: String,
    pub teams: Vec<TeamAssignment>,
}

impl PinData {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    pub fn contains_record(&self, id: &RecordId) -> bool {
        self.record_ids.contains(id)
    }
}

/// First category that is not the manager tag; empty when there is none.
pub fn primary_category(categories: &[String]) -> &str {
    categories
        .iter()
        .map(String::as_str)
        .find(|c| *c != MANAGER_CATEGORY)
        .unwrap_or("")
}

/// Partitions records by address. Groups come back in key order and each
/// representative is picked by [`Record::precedence`], so the result does not
/// depend on input order. A group is a repeat if any member is.
pub fn group_records(records: &[Record]) -> Vec<AddressGroup> {
    let mut groups: BTreeMap<String, Vec<&Record>> = BTreeMap::new();
    for record in records {
        groups.entry(record.group_key()).or_default().push(record);
    }

    groups
        .into_iter()
        .filter_map(|(key, members)| {
            let representative = members
                .iter()
                .min_by(|a, b| a.precedence().cmp(&b.precedence()))?;
            let mut record_ids: Vec<RecordId> = members.iter().map(|r| r.id.clone()).collect();
            record_ids.sort();
            Some(AddressGroup {
                key,
                representative: (*representative).clone(),
                record_ids,
                is_repeat: members.iter().any(|r| r.is_repeat),
            })
        })
        .collect()
}

/// Structural hash of the pass input. Field order is fixed and floats are
/// hashed by bit pattern so equal content always hashes equal.
pub fn input_hash(records: &[Record], selected: Option<&RecordId>) -> u64 {
    let mut hasher = DefaultHasher::new();
    records.len().hash(&mut hasher);
    for record in records {
        record.id.hash(&mut hasher);
        record.address.address.hash(&mut hasher);
        record.address.region_nm.hash(&mut hasher);
        match record.coordinates {
            Some(c) => (1u8, c.lat.to_bits(), c.lng.to_bits()).hash(&mut hasher),
            None => 0u8.hash(&mut hasher),
        }
        record.datetime.hash(&mut hasher);
        record.content.hash(&mut hasher);
        record.status.hash(&mut hasher);
        record.is_repeat.hash(&mut hasher);
        record.teams.len().hash(&mut hasher);
        for team in &record.teams {
            team.category.hash(&mut hasher);
            // serde_json keeps object keys sorted, so this is stable.
            Value::Object(team.details.clone()).to_string().hash(&mut hasher);
        }
    }
    selected.hash(&mut hasher);
    hasher.finish()
}

/// Hash over what a marker visibly depends on.
pub fn pin_hash(pins: &[PinData], selected: Option<&RecordId>) -> u64 {
    let mut hasher = DefaultHasher::new();
    pins.len().hash(&mut hasher);
    for pin in pins {
        pin.id.hash(&mut hasher);
        pin.lat.to_bits().hash(&mut hasher);
        pin.lng.to_bits().hash(&mut hasher);
        pin.status.hash(&mut hasher);
        pin.category.hash(&mut hasher);
        pin.is_repeat.hash(&mut hasher);
        // Feeds the info window.
        pin.content.hash(&mut hasher);
    }
    selected.hash(&mut hasher);
    hasher.finish()
}

fn lenient_coordinates<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<LatLng>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(|v| {
        let lat = number_like(v.get("lat")?)?;
        let lng = number_like(v.get("lng").or_else(|| v.get("lon"))?)?;
        Some(LatLng::new(lat, lng))
    }))
}

fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_like<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}
