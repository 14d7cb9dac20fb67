//! Core domain types for exposecast tasks and their results.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Placeholder rendered for any key fact the exposé did not yield.
pub const MISSING: &str = "missing";

/// Status prefix marking a task that terminated with a failure.
pub const ERROR_PREFIX: &str = "Error:";

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for task identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new time-sortable task identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Current stage description and completion percentage of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Free-text description of the current stage.
    pub status: String,
    /// Completion percentage, 0–100. 100 means the pipeline terminated.
    pub percent: u8,
}

impl Progress {
    pub fn new(status: impl Into<String>, percent: u8) -> Self {
        Self {
            status: status.into(),
            percent: percent.min(100),
        }
    }

    /// Initial progress of an admitted task waiting for a pipeline slot.
    pub fn queued() -> Self {
        Self::new("Queued", 0)
    }

    /// Sentinel returned for unknown task identifiers.
    pub fn not_found() -> Self {
        Self::new("Task not found", 0)
    }

    /// Terminal failure progress carrying the error message.
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::new(format!("{ERROR_PREFIX} {message}"), 100)
    }

    pub fn is_terminal(&self) -> bool {
        self.percent >= 100
    }

    pub fn is_error(&self) -> bool {
        self.status.starts_with(ERROR_PREFIX)
    }
}

// ---------------------------------------------------------------------------
// Key facts
// ---------------------------------------------------------------------------

/// A fact value as reported by the model: numeric or free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Number(serde_json::Number),
    Text(String),
}

impl FactValue {
    fn is_missing(&self) -> bool {
        matches!(self, Self::Text(s) if s.trim().is_empty() || s.trim().eq_ignore_ascii_case(MISSING))
    }
}

impl std::fmt::Display for FactValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for FactValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

/// Absent facts serialize as [`MISSING`]; `null`, blank and `"missing"` read back as absent.
mod sentinel {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<FactValue>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(v) => v.serialize(serializer),
            None => serializer.serialize_str(MISSING),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<FactValue>, D::Error> {
        let value = Option::<FactValue>::deserialize(deserializer)?;
        Ok(value.filter(|v| !v.is_missing()))
    }
}

/// Postal address of the advertised property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, with = "sentinel")]
    pub street: Option<FactValue>,
    #[serde(default, with = "sentinel")]
    pub house_number: Option<FactValue>,
    #[serde(default, with = "sentinel")]
    pub postal_code: Option<FactValue>,
    #[serde(default, with = "sentinel")]
    pub city: Option<FactValue>,
    #[serde(default, with = "sentinel")]
    pub population: Option<FactValue>,
}

impl Address {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Structured real-estate attributes extracted from an exposé.
///
/// Every field is optional; unknown keys in model output are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyFacts {
    #[serde(default, deserialize_with = "address_or_default")]
    pub address: Address,
    #[serde(default, with = "sentinel")]
    pub purchase_price: Option<FactValue>,
    #[serde(default, with = "sentinel")]
    pub price_per_square: Option<FactValue>,
    #[serde(default, with = "sentinel")]
    pub usable_area: Option<FactValue>,
    #[serde(default, with = "sentinel")]
    pub plot_size: Option<FactValue>,
    #[serde(default, with = "sentinel")]
    pub residential_units: Option<FactValue>,
    #[serde(default, with = "sentinel")]
    pub rental_income: Option<FactValue>,
    #[serde(default, with = "sentinel")]
    pub wault: Option<FactValue>,
}

impl KeyFacts {
    /// True when no fact at all was extracted.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn address_or_default<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Address, D::Error> {
    Ok(Option::<Address>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// CRM records
// ---------------------------------------------------------------------------

/// Properties shared by every CRM object projection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordBase {
    pub hs_object_id: String,
    /// Opaque timestamp string as delivered by the CRM.
    pub createdate: String,
    pub lastmodifieddate: String,
    pub lifecycle_stage: String,
    #[serde(default)]
    pub associations: String,
}

/// Read-only projection of a CRM contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    #[serde(flatten)]
    pub base: RecordBase,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
}

impl ContactRecord {
    /// First and last name joined by a single space, trimmed.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.firstname.trim(), self.lastname.trim())
            .trim()
            .to_string()
    }
}

/// Read-only projection of a CRM company.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRecord {
    #[serde(flatten)]
    pub base: RecordBase,
    #[serde(default)]
    pub name: String,
}

/// A CRM list as offered for audience selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDescriptor {
    pub name: String,
    #[serde(rename = "listId")]
    pub list_id: String,
}

// ---------------------------------------------------------------------------
// TaskResult
// ---------------------------------------------------------------------------

/// Structured output of a completed task.
///
/// A fresh or failed task yields [`TaskResult::default`], never an absent value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default)]
    pub key_facts: KeyFacts,
    #[serde(default)]
    pub selected_list: String,
    #[serde(default)]
    pub selected_list_id: Option<String>,
    #[serde(default)]
    pub selected_contacts: Vec<ContactRecord>,
    #[serde(default)]
    pub selected_companies: Vec<CompanyRecord>,
    /// Curated entity names, best first.
    #[serde(default)]
    pub curated_member: Vec<String>,
    /// Generated marketing email (HTML).
    #[serde(default)]
    pub email: String,
}
