//! Reading a prescription image into structured data, and the flow that
//! feeds its medicines into the lookup pipeline.

pub mod clean;

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

pub use clean::{clean_medicine_name, parse_timing};

use crate::error::{AnalyzerError, Result};
use crate::models::{
    DoctorInfo, PatientInfo, PrescribedMedicine, Prescription, PrescriptionReport, lenient_string,
};
use crate::pipeline::Pipeline;
use crate::summarize::{GenerationConfig, GenerativeBackend, ImageInput, parse};

pub const PRESCRIPTION_PROMPT: &str = r#"You are a specialist in analyzing medical prescriptions.
Examine this prescription image carefully and extract the following information:

1. PATIENT INFORMATION: Name, age, gender, any ID numbers, contact details, and vital information (like weight, height, blood pressure, etc.)

2. DOCTOR INFORMATION: Name, qualifications, registration number, clinic/hospital name, contact information

3. MEDICINES: For each medicine listed, extract:
   - Full medicine name including formulation (Tab, Cap, etc.) and strength
   - Dosage instructions (timing codes like 1-0-1, 1-1-1, 0-1/2-0)
   - Special instructions (if any, like "before food", "after food", etc.)

Format your response as a structured JSON with these sections:

{
  "patient_info": {
    "name": "",
    "age": "",
    "gender": "",
    "id": "",
    "contact": "",
    "vitals": {
      "weight": "",
      "height": "",
      "blood_pressure": "",
      "other": ""
    }
  },
  "doctor_info": {
    "name": "",
    "qualifications": "",
    "registration": "",
    "clinic": "",
    "contact": ""
  },
  "medicines": [
    {
      "full_name": "Tab. Metformin 500mg",
      "timing": "1-0-1",
      "special_instructions": "after food"
    }
  ]
}

Provide ONLY the JSON output without any markdown formatting or additional text.
Be particularly careful with fractional doses like 1/2, 1/4, etc. Write them exactly as shown in the prescription."#;

/// Image type from a file extension; unknown extensions are treated as PNG.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "image/png",
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMedicine {
    #[serde(deserialize_with = "lenient_string")]
    full_name: String,
    #[serde(deserialize_with = "lenient_string")]
    timing: String,
    #[serde(deserialize_with = "lenient_string")]
    special_instructions: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPrescription {
    patient_info: PatientInfo,
    doctor_info: DoctorInfo,
    medicines: Vec<RawMedicine>,
}

fn vision_config() -> GenerationConfig {
    GenerationConfig {
        temperature: 0.1,
        top_p: 1.0,
        top_k: 32,
        max_output_tokens: 4096,
        response_mime_type: Some("application/json".to_string()),
    }
}

/// Turn the model's answer into a [`Prescription`].
///
/// Medicines whose name cleans down to nothing are dropped. A later line
/// with the same clean name replaces the earlier one in place.
pub fn interpret(reply: &str) -> Result<Prescription> {
    let fields =
        parse::parse_or_repair(reply).map_err(|e| AnalyzerError::Extraction(e.to_string()))?;
    let raw: RawPrescription = serde_json::from_value(Value::Object(fields))
        .map_err(|e| AnalyzerError::Extraction(e.to_string()))?;

    let mut medicines: Vec<PrescribedMedicine> = Vec::new();
    for line in raw.medicines {
        let clean_name = clean_medicine_name(&line.full_name);
        if clean_name.is_empty() {
            warn!("Skipping unreadable medicine line '{}'", line.full_name);
            continue;
        }
        let medicine = PrescribedMedicine {
            schedule: parse_timing(&line.timing),
            full_name: line.full_name,
            clean_name,
            timing: line.timing,
            special_instructions: line.special_instructions,
        };
        match medicines.iter_mut().find(|m| m.clean_name == medicine.clean_name) {
            Some(existing) => *existing = medicine,
            None => medicines.push(medicine),
        }
    }

    Ok(Prescription {
        patient_info: raw.patient_info,
        doctor_info: raw.doctor_info,
        medicines,
    })
}

pub struct PrescriptionExtractor {
    backend: Arc<dyn GenerativeBackend>,
    config: GenerationConfig,
}

impl PrescriptionExtractor {
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            backend,
            config: vision_config(),
        }
    }

    pub async fn extract(&self, image: &ImageInput) -> Result<Prescription> {
        info!(mime = %image.mime_type, bytes = image.bytes.len(), "Reading prescription image");
        let reply = self
            .backend
            .generate_with_image(PRESCRIPTION_PROMPT, image, &self.config)
            .await
            .map_err(|e| AnalyzerError::Extraction(e.to_string()))?;
        let prescription = interpret(&reply)?;
        info!("Prescription lists {} medicines", prescription.medicines.len());
        Ok(prescription)
    }
}

/// Read the prescription, then look up every medicine on it.
pub async fn analyze(
    extractor: &PrescriptionExtractor,
    pipeline: &Pipeline,
    image: &ImageInput,
) -> Result<PrescriptionReport> {
    let prescription = extractor.extract(image).await?;
    let names = prescription.medicine_names();
    if names.is_empty() {
        warn!("No medicine names found on the prescription");
    }
    let medicine_information = pipeline.process(&names).await?;
    Ok(PrescriptionReport {
        prescription,
        medicine_information,
    })
}
