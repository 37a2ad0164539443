use serde::{Deserialize, Serialize};

use crate::platform::PlatformTag;

pub const DEFAULT_TITLE: &str = "Untitled Event";
pub const DEFAULT_LOCATION_NAME: &str = "Unknown Location";
pub const DEFAULT_CITY: &str = "Unknown City";
pub const DEFAULT_PROVINCE: &str = "Unknown Province";
pub const DEFAULT_COUNTRY: &str = "Unknown Country";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String, // title[0:10] + location[0:5] + YYYYMMDD
    pub title: String,
    pub image: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub location: Location,
    pub description: Option<String>,
    pub source_url: String,
    pub platform: Option<PlatformTag>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub name: String,
    pub city: String,
    pub province: String,
    pub country: String,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            name: DEFAULT_LOCATION_NAME.to_string(),
            city: DEFAULT_CITY.to_string(),
            province: DEFAULT_PROVINCE.to_string(),
            country: DEFAULT_COUNTRY.to_string(),
        }
    }
}

impl Location {
    /// Single-line form used by the popup, the overlay and the stored page fields.
    /// Placeholder parts are left out; a fully defaulted location keeps its name.
    pub fn display(&self) -> String {
        let parts = [
            (&self.name, DEFAULT_LOCATION_NAME),
            (&self.city, DEFAULT_CITY),
            (&self.province, DEFAULT_PROVINCE),
            (&self.country, DEFAULT_COUNTRY),
        ];
        let joined = parts
            .iter()
            .filter(|(value, placeholder)| !value.is_empty() && value.as_str() != *placeholder)
            .map(|(value, _)| value.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        if joined.is_empty() {
            self.name.clone()
        } else {
            joined
        }
    }
}

/// Output of a single extractor. `None` means the extractor found nothing;
/// defaults are only applied by the normalizer.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PartialEventRecord {
    pub title: Option<String>,
    pub image: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub location_name: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub country: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Image,
    StartDate,
    Location,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Title, Field::Image, Field::StartDate, Field::Location];
}

impl PartialEventRecord {
    pub fn has(&self, field: Field) -> bool {
        let value = match field {
            Field::Title => &self.title,
            Field::Image => &self.image,
            Field::StartDate => &self.start_date,
            Field::Location => &self.location_name,
        };
        value.as_deref().is_some_and(|v| !v.trim().is_empty())
    }

    pub fn missing(&self) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|field| !self.has(*field))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Field-wise merge where `self` wins and `fallback` fills the gaps.
    pub fn or(&self, fallback: &PartialEventRecord) -> PartialEventRecord {
        fn pick(primary: &Option<String>, secondary: &Option<String>) -> Option<String> {
            primary
                .as_ref()
                .filter(|v| !v.trim().is_empty())
                .or(secondary.as_ref().filter(|v| !v.trim().is_empty()))
                .cloned()
        }
        PartialEventRecord {
            title: pick(&self.title, &fallback.title),
            image: pick(&self.image, &fallback.image),
            start_date: pick(&self.start_date, &fallback.start_date),
            end_date: pick(&self.end_date, &fallback.end_date),
            location_name: pick(&self.location_name, &fallback.location_name),
            city: pick(&self.city, &fallback.city),
            province: pick(&self.province, &fallback.province),
            country: pick(&self.country, &fallback.country),
            description: pick(&self.description, &fallback.description),
            url: pick(&self.url, &fallback.url),
        }
    }
}

/// Flat field set exchanged with the page side and kept in the store.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PageEventFields {
    pub title: Option<String>,
    pub image: Option<String>,
    pub date: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
}

impl From<&EventRecord> for PageEventFields {
    fn from(record: &EventRecord) -> Self {
        Self {
            title: Some(record.title.clone()),
            image: record.image.clone(),
            date: Some(record.start_date.clone()),
            location: Some(record.location.display()),
            description: record.description.clone(),
            url: Some(record.source_url.clone()),
        }
    }
}
