use std::fmt;

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::tags;
use dicom::object::DefaultDicomObject;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::codec::RESULT_GROUP;
use crate::dicom_access::{parse_payload, write_payload, ElementAccess};
use crate::error::{Result, Warning};

/// Pseudo identity derived from (name, id, birth date). Always `ANON` followed by six digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnonymousIdentity(String);

impl AnonymousIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The six digits that suffix the replacement name, accession number and study id.
    pub fn suffix(&self) -> &str {
        &self.0[self.0.len() - 6..]
    }

    fn parse(value: &str) -> Option<Self> {
        let digits = value.strip_prefix("ANON")?;
        if digits.len() == 6 && digits.chars().all(|c| c.is_ascii_digit()) {
            Some(Self(value.to_string()))
        } else {
            None
        }
    }
}

impl fmt::Display for AnonymousIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity for the given triple. Same inputs, same identity, across runs and machines.
pub fn identity_for(patient_name: &str, patient_id: &str, birth_date: &str) -> AnonymousIdentity {
    let unique = format!(
        "{}|{}|{}",
        patient_name.trim(),
        patient_id.trim(),
        birth_date.trim()
    );
    let digest = hex::encode(Sha256::digest(unique.as_bytes()));
    let value = u32::from_str_radix(&digest[..8], 16).unwrap_or_default() % 999_999;
    AnonymousIdentity(format!("ANON{:06}", value))
}

const PATIENT_ADDRESS: Tag = Tag(0x0010, 0x1040);
const PATIENT_TELEPHONE_NUMBERS: Tag = Tag(0x0010, 0x2154);
const ETHNIC_GROUP: Tag = Tag(0x0010, 0x2160);
const PATIENT_COMMENTS: Tag = Tag(0x0010, 0x4000);
const OTHER_PATIENT_IDS: Tag = Tag(0x0010, 0x1000);
const OTHER_PATIENT_NAMES: Tag = Tag(0x0010, 0x1001);

/// Fields blanked outright when the data set carries them.
const BLANKED: [(Tag, VR); 11] = [
    (tags::PATIENT_BIRTH_DATE, VR::DA),
    (tags::PATIENT_SEX, VR::CS),
    (tags::PATIENT_AGE, VR::AS),
    (tags::INSTITUTION_NAME, VR::LO),
    (tags::REFERRING_PHYSICIAN_NAME, VR::PN),
    (PATIENT_ADDRESS, VR::LO),
    (PATIENT_TELEPHONE_NUMBERS, VR::SH),
    (ETHNIC_GROUP, VR::SH),
    (PATIENT_COMMENTS, VR::LT),
    (OTHER_PATIENT_IDS, VR::LO),
    (OTHER_PATIENT_NAMES, VR::PN),
];

/// Always written, present or not.
const ALWAYS_BLANKED: [Tag; 3] = [tags::PATIENT_BIRTH_DATE, tags::PATIENT_SEX, tags::PATIENT_AGE];

/// De-identified payload together with the identity that replaced the patient.
#[derive(Debug, Clone)]
pub struct Anonymized {
    pub payload: Vec<u8>,
    pub identity: Option<AnonymousIdentity>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymizer;

impl Anonymizer {
    pub fn new() -> Self {
        Self
    }

    /// Scrub patient-identifying fields. Must run before the result is embedded: private groups other than the
    /// result group are removed here.
    ///
    /// Never fails. On error the original payload is returned along with [`Warning::AnonymizeFailed`].
    pub fn anonymize(&self, payload: &[u8]) -> Anonymized {
        match self.try_anonymize(payload) {
            Ok((bytes, identity)) => Anonymized {
                payload: bytes,
                identity: Some(identity),
                warnings: Vec::new(),
            },
            Err(e) => {
                warn!(error = %e, "Anonymization failed, sending original payload");
                Anonymized {
                    payload: payload.to_vec(),
                    identity: None,
                    warnings: vec![Warning::AnonymizeFailed(e.to_string())],
                }
            }
        }
    }

    /// Identity the payload would be anonymized under.
    pub fn identity_of(&self, payload: &[u8]) -> Result<AnonymousIdentity> {
        let obj = parse_payload(payload)?;
        Ok(identity_of_object(&obj))
    }

    fn try_anonymize(&self, payload: &[u8]) -> Result<(Vec<u8>, AnonymousIdentity)> {
        let mut obj = parse_payload(payload)?;
        let identity = identity_of_object(&obj);
        let suffix = identity.suffix().to_string();

        put_str(&mut obj, tags::PATIENT_NAME, VR::PN, &format!("ANONYMOUS^{}", suffix));
        put_str(&mut obj, tags::PATIENT_ID, VR::LO, identity.as_str());
        if obj.has_element(tags::ACCESSION_NUMBER) {
            put_str(&mut obj, tags::ACCESSION_NUMBER, VR::SH, &format!("ACC{}", suffix));
        }
        if obj.has_element(tags::STUDY_ID) {
            put_str(&mut obj, tags::STUDY_ID, VR::SH, &format!("STUDY{}", suffix));
        }

        for (tag, vr) in BLANKED {
            if ALWAYS_BLANKED.contains(&tag) || obj.has_element(tag) {
                obj.put(DataElement::new(tag, vr, PrimitiveValue::Empty));
            }
        }

        let removed = strip_private_tags(&mut obj);
        debug!(identity = %identity, removed, "Anonymized payload");

        Ok((write_payload(&obj)?, identity))
    }
}

fn identity_of_object(obj: &DefaultDicomObject) -> AnonymousIdentity {
    let name = obj.element_str(tags::PATIENT_NAME).unwrap_or_default();
    let id = obj.element_str(tags::PATIENT_ID).unwrap_or_default();

    // Re-anonymizing keeps the identity already assigned instead of hashing the pseudonym.
    if let Some(existing) = AnonymousIdentity::parse(&id) {
        if name == format!("ANONYMOUS^{}", existing.suffix()) {
            return existing;
        }
    }

    let birth_date = obj.element_str(tags::PATIENT_BIRTH_DATE).unwrap_or_default();
    identity_for(&name, &id, &birth_date)
}

fn put_str(obj: &mut DefaultDicomObject, tag: Tag, vr: VR, value: &str) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

/// Drop every odd-group element except the result group. Returns how many were removed.
fn strip_private_tags(obj: &mut DefaultDicomObject) -> usize {
    let private: Vec<Tag> = obj
        .iter()
        .map(|e| e.header().tag)
        .filter(|tag| tag.group() % 2 == 1 && tag.group() != RESULT_GROUP)
        .collect();
    for tag in &private {
        obj.remove_element(*tag);
    }
    private.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::dicom_access::fixtures::sample_payload;

    #[test]
    fn identity_is_deterministic_per_triple() {
        let a = identity_for("Doe^Jane", "PAT1", "19800101");
        let b = identity_for("Doe^Jane", "PAT1", "19800101");
        let c = identity_for("Doe^Jane", "PAT2", "19800101");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("ANON"));
        assert_eq!(a.as_str().len(), 10);
        assert!(a.suffix().chars().all(|ch| ch.is_ascii_digit()));
    }

    #[test]
    fn replaces_and_blanks_identifying_fields() {
        let payload = sample_payload(&[
            (tags::ACCESSION_NUMBER, VR::SH, "A-77"),
            (tags::STUDY_ID, VR::SH, "S1"),
            (tags::INSTITUTION_NAME, VR::LO, "General Hospital"),
            (PATIENT_ADDRESS, VR::LO, "1 Main Street"),
            (Tag(0x0009, 0x0010), VR::LO, "VENDOR"),
            (Tag(0x0009, 0x1001), VR::LO, "secret"),
        ]);
        let anonymized = Anonymizer::new().anonymize(&payload);
        assert!(anonymized.warnings.is_empty());
        let identity = anonymized.identity.clone().expect("identity");
        assert_eq!(identity, identity_for("Test^Patient", "PAT123", "19800101"));

        let obj = parse_payload(&anonymized.payload).expect("parse");
        let suffix = identity.suffix();
        assert_eq!(
            obj.element_str(tags::PATIENT_NAME),
            Some(format!("ANONYMOUS^{}", suffix))
        );
        assert_eq!(obj.element_str(tags::PATIENT_ID).as_deref(), Some(identity.as_str()));
        assert_eq!(obj.element_str(tags::ACCESSION_NUMBER), Some(format!("ACC{}", suffix)));
        assert_eq!(obj.element_str(tags::STUDY_ID), Some(format!("STUDY{}", suffix)));
        assert_eq!(obj.element_str(tags::PATIENT_BIRTH_DATE).as_deref(), Some(""));
        assert_eq!(obj.element_str(tags::INSTITUTION_NAME).as_deref(), Some(""));
        assert_eq!(obj.element_str(PATIENT_ADDRESS).as_deref(), Some(""));
        assert!(!obj.has_element(Tag(0x0009, 0x1001)));
        // The cross-store key survives untouched.
        assert_eq!(obj.element_str(tags::STUDY_INSTANCE_UID).as_deref(), Some("1.2.3"));
    }

    #[test]
    fn anonymizing_twice_keeps_the_same_identity() {
        let anonymizer = Anonymizer::new();
        let payload = sample_payload(&[]);
        let once = anonymizer.anonymize(&payload);
        let twice = anonymizer.anonymize(&once.payload);
        assert!(twice.warnings.is_empty());
        assert_eq!(once.identity, twice.identity);

        let first = parse_payload(&once.payload).expect("first");
        let second = parse_payload(&twice.payload).expect("second");
        for tag in [
            tags::PATIENT_NAME,
            tags::PATIENT_ID,
            tags::PATIENT_BIRTH_DATE,
            tags::PATIENT_SEX,
        ] {
            assert_eq!(first.element_str(tag), second.element_str(tag));
        }
    }

    #[test]
    fn result_group_survives_anonymization() {
        let embedded = codec::embed(&sample_payload(&[]), "kept result");
        let anonymized = Anonymizer::new().anonymize(&embedded.payload);
        assert_eq!(codec::extract(&anonymized.payload).expect("extract"), "kept result");
    }

    #[test]
    fn failure_returns_original_with_warning() {
        let anonymized = Anonymizer::new().anonymize(b"garbage");
        assert_eq!(anonymized.payload, b"garbage".to_vec());
        assert!(anonymized.identity.is_none());
        assert!(matches!(
            anonymized.warnings.as_slice(),
            [Warning::AnonymizeFailed(_)]
        ));
    }
}
