use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Descriptions starting with this marker denote a failed lookup.
pub const FAILURE_MARKER: &str = "Error";

/// Result of driving the search engine for one medicine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Spelling-corrected name, or the original name when no correction was offered
    pub corrected_name: String,
    /// Page the browser ended up on, if any result could be opened
    pub url: Option<String>,
}

/// Information gathered for one medicine. Every field is always present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedicineRecord {
    pub medicine_name: String,
    pub description: String,
    pub key_benefits: Vec<String>,
    pub directions: String,
    pub safety_info: String,
    pub relevant_info: String,
    pub url: String,
}

impl MedicineRecord {
    /// A record carrying only a name and an explanation of what went wrong.
    pub fn placeholder(medicine_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            medicine_name: medicine_name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        let description = self.description.trim();
        !description.is_empty() && !description.starts_with(FAILURE_MARKER)
    }
}

/// Aggregated form of a [`MedicineRecord`], keyed by name in [`BatchResult`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicineEntry {
    pub description: String,
    /// Benefits joined with ", "
    pub key_benefits: String,
    pub directions: String,
    pub safety_info: String,
    pub relevant_info: String,
    pub url: String,
}

impl From<&MedicineRecord> for MedicineEntry {
    fn from(record: &MedicineRecord) -> Self {
        Self {
            description: record.description.clone(),
            key_benefits: record.key_benefits.join(", "),
            directions: record.directions.clone(),
            safety_info: record.safety_info.clone(),
            relevant_info: record.relevant_info.clone(),
            url: record.url.clone(),
        }
    }
}

/// Insertion-ordered name → entry mapping; serializes as a JSON object.
///
/// Re-inserting an existing name replaces its entry in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MedicineMap {
    entries: Vec<(String, MedicineEntry)>,
}

impl MedicineMap {
    pub fn insert(&mut self, name: String, entry: MedicineEntry) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = entry,
            None => self.entries.push((name, entry)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&MedicineEntry> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MedicineEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }
}

impl Serialize for MedicineMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(name, entry)| (name, entry)))
    }
}

/// Everything one batch produced.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    /// Resolved medicine name → aggregated entry
    pub medicines: MedicineMap,
    /// One record per input name, in input order
    pub records: Vec<MedicineRecord>,
    pub success_count: usize,
    pub total: usize,
}

impl BatchResult {
    pub fn new(records: Vec<MedicineRecord>, success_count: usize) -> Self {
        let mut medicines = MedicineMap::default();
        for record in &records {
            medicines.insert(record.medicine_name.clone(), MedicineEntry::from(record));
        }
        Self {
            total: records.len(),
            medicines,
            records,
            success_count,
        }
    }

    /// Percentage of inputs that produced a usable summary.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total as f64 * 100.0
    }
}

// ── Prescription data ──

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vitals {
    #[serde(deserialize_with = "lenient_string")]
    pub weight: String,
    #[serde(deserialize_with = "lenient_string")]
    pub height: String,
    #[serde(deserialize_with = "lenient_string")]
    pub blood_pressure: String,
    #[serde(deserialize_with = "lenient_string")]
    pub other: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientInfo {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub age: String,
    #[serde(deserialize_with = "lenient_string")]
    pub gender: String,
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub contact: String,
    pub vitals: Vitals,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorInfo {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub qualifications: String,
    #[serde(deserialize_with = "lenient_string")]
    pub registration: String,
    #[serde(deserialize_with = "lenient_string")]
    pub clinic: String,
    #[serde(deserialize_with = "lenient_string")]
    pub contact: String,
}

/// Doses per part of the day; `None` means no dose.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseSchedule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub morning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub afternoon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub night: Option<String>,
}

impl DoseSchedule {
    pub fn is_empty(&self) -> bool {
        self.morning.is_none() && self.afternoon.is_none() && self.night.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescribedMedicine {
    /// Name as written, e.g. "Tab. Metformin 500mg"
    pub full_name: String,
    /// Searchable name, e.g. "metformin"
    pub clean_name: String,
    /// Timing code as written, e.g. "1-0-1"
    pub timing: String,
    pub schedule: DoseSchedule,
    pub special_instructions: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prescription {
    pub patient_info: PatientInfo,
    pub doctor_info: DoctorInfo,
    pub medicines: Vec<PrescribedMedicine>,
}

impl Prescription {
    /// Distinct non-empty clean names, in prescription order.
    pub fn medicine_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for medicine in &self.medicines {
            if !medicine.clean_name.is_empty() && !names.contains(&medicine.clean_name) {
                names.push(medicine.clean_name.clone());
            }
        }
        names
    }
}

// ── API payloads ──

#[derive(Debug, Serialize, Deserialize)]
pub struct LookupRequest {
    pub medicines: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzePrescriptionRequest {
    /// Image bytes, base64 encoded
    pub image_base64: String,
    /// e.g. "image/jpeg"; defaults to "image/png"
    pub mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PrescriptionReport {
    pub prescription: Prescription,
    pub medicine_information: BatchResult,
}

/// Accept strings, numbers and booleans as text; null becomes empty.
pub(crate) fn lenient_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<String, D::Error> {
    Ok(value_to_text(&Value::deserialize(deserializer)?))
}

pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
