use std::fmt;

use serde::{Deserialize, Serialize};

const COMPONENT_DELIMITER: &str = ", ";

/// Enrollment-potential class attached to each site by the reporting layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteTier {
    HighPotentialHighEnrolling,
    HighPotentialLowEnrolling,
    LowPotentialHighEnrolling,
    LowPotentialLowEnrolling,
    High,
    Medium,
    Low,
    Other(String),
}

impl SiteTier {
    pub fn parse(value: &str) -> Self {
        let compact = collapse_whitespace(value);
        match compact.to_ascii_lowercase().as_str() {
            "high potential/high enrolling" => Self::HighPotentialHighEnrolling,
            "high potential/low enrolling" => Self::HighPotentialLowEnrolling,
            "low potential/high enrolling" => Self::LowPotentialHighEnrolling,
            "low potential/low enrolling" => Self::LowPotentialLowEnrolling,
            "high" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            _ => Self::Other(compact),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::HighPotentialHighEnrolling => "High Potential/High Enrolling",
            Self::HighPotentialLowEnrolling => "High Potential/Low Enrolling",
            Self::LowPotentialHighEnrolling => "Low Potential/High Enrolling",
            Self::LowPotentialLowEnrolling => "Low Potential/Low Enrolling",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::Other(label) => label,
        }
    }
}

impl Default for SiteTier {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub site_id: String,
    pub street: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub volume: f64,
    pub tier: SiteTier,
}

impl SiteRecord {
    pub fn new(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            street: None,
            city: None,
            region: None,
            postal_code: None,
            country: None,
            volume: 0.0,
            tier: SiteTier::default(),
        }
    }

    pub fn with_street(mut self, street: impl Into<String>) -> Self {
        self.street = Some(street.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_postal_code(mut self, postal_code: impl Into<String>) -> Self {
        self.postal_code = Some(postal_code.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_tier(mut self, tier: SiteTier) -> Self {
        self.tier = tier;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyVariant {
    Precise,
    Degraded,
}

impl KeyVariant {
    pub fn as_tag(&self) -> &'static str {
        match self {
            KeyVariant::Precise => "precise",
            KeyVariant::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressField {
    Street,
    City,
    Region,
    PostalCode,
    Country,
}

/// Canonical lookup key. Equal keys always compare equal as cache keys and
/// produce the same geocoder query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressKey {
    variant: KeyVariant,
    components: Vec<(AddressField, String)>,
    canonical: String,
}

impl AddressKey {
    fn build(variant: KeyVariant, components: Vec<(AddressField, String)>) -> Self {
        let query = components
            .iter()
            .map(|(_, value)| value.as_str())
            .collect::<Vec<_>>()
            .join(COMPONENT_DELIMITER);
        let canonical = format!("{}:{query}", variant.as_tag());
        Self {
            variant,
            components,
            canonical,
        }
    }

    pub fn variant(&self) -> KeyVariant {
        self.variant
    }

    /// Cache key, including the variant prefix.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Free-text form sent to the geocoder.
    pub fn query(&self) -> &str {
        &self.canonical[self.variant.as_tag().len() + 1..]
    }

    pub fn component(&self, field: AddressField) -> Option<&str> {
        self.components
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, value)| value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedKeys {
    pub precise: AddressKey,
    pub degraded: AddressKey,
}

pub fn normalize(record: &SiteRecord) -> NormalizedKeys {
    let fields = [
        (AddressField::Street, record.street.as_deref()),
        (AddressField::City, record.city.as_deref()),
        (AddressField::Region, record.region.as_deref()),
        (AddressField::PostalCode, record.postal_code.as_deref()),
        (AddressField::Country, record.country.as_deref()),
    ];
    let precise: Vec<(AddressField, String)> = fields
        .iter()
        .filter_map(|(field, value)| normalize_component(*value).map(|v| (*field, v)))
        .collect();
    let degraded = precise
        .iter()
        .filter(|(field, _)| matches!(field, AddressField::City | AddressField::Country))
        .cloned()
        .collect();

    NormalizedKeys {
        precise: AddressKey::build(KeyVariant::Precise, precise),
        degraded: AddressKey::build(KeyVariant::Degraded, degraded),
    }
}

fn normalize_component(value: Option<&str>) -> Option<String> {
    let compact = collapse_whitespace(value?).to_lowercase();
    // upstream exports spell missing cells as literals
    match compact.as_str() {
        "" | "none" | "nan" | "null" => None,
        _ => Some(compact),
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
