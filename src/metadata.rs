use dicom::dictionary_std::tags;

use crate::dicom_access::ElementAccess;
use crate::models::StudyMetadata;

/// Identity fields of a single instance, as read from its data set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub study_instance_uid: Option<String>,
    pub sop_instance_uid: Option<String>,
    pub series_instance_uid: Option<String>,
    pub instance_number: Option<i32>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

pub fn extract_study_metadata<T: ElementAccess>(obj: &T) -> StudyMetadata {
    let text = |tag| non_empty(obj.element_str(tag));

    StudyMetadata {
        patient_name: text(tags::PATIENT_NAME),
        patient_id: text(tags::PATIENT_ID),
        patient_birth_date: text(tags::PATIENT_BIRTH_DATE),
        patient_sex: text(tags::PATIENT_SEX),
        patient_age: text(tags::PATIENT_AGE),
        study_date: text(tags::STUDY_DATE),
        study_time: text(tags::STUDY_TIME),
        description: text(tags::STUDY_DESCRIPTION).or_else(|| Some("Local DICOM Study".to_string())),
        referring_physician: text(tags::REFERRING_PHYSICIAN_NAME),
        institution: text(tags::INSTITUTION_NAME),
        modality: text(tags::MODALITY),
        accession_number: text(tags::ACCESSION_NUMBER),
        study_id: text(tags::STUDY_ID),
        study_instance_uid: text(tags::STUDY_INSTANCE_UID),
        series_description: text(tags::SERIES_DESCRIPTION),
        body_part: text(tags::BODY_PART_EXAMINED),
        status: Some("LOCAL".to_string()),
        source: Some("Local File".to_string()),
    }
}

pub fn extract_instance_identity<T: ElementAccess>(obj: &T) -> InstanceIdentity {
    InstanceIdentity {
        study_instance_uid: non_empty(obj.element_str(tags::STUDY_INSTANCE_UID)),
        sop_instance_uid: non_empty(obj.element_str(tags::SOP_INSTANCE_UID)),
        series_instance_uid: non_empty(obj.element_str(tags::SERIES_INSTANCE_UID)),
        instance_number: obj
            .element_str(tags::INSTANCE_NUMBER)
            .and_then(|n| n.parse().ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};
    use dicom::object::InMemDicomObject;

    #[test]
    fn local_metadata_defaults_description_and_source() {
        let mut obj = InMemDicomObject::new_empty();
        obj.put(DataElement::new(
            tags::PATIENT_NAME,
            VR::PN,
            PrimitiveValue::from("Doe^Jane"),
        ));
        obj.put(DataElement::new(
            tags::STUDY_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from("1.2.3"),
        ));
        obj.put(DataElement::new(
            tags::INSTANCE_NUMBER,
            VR::IS,
            PrimitiveValue::from("7"),
        ));

        let metadata = extract_study_metadata(&obj);
        assert_eq!(metadata.patient_name.as_deref(), Some("Doe^Jane"));
        assert_eq!(metadata.study_instance_uid.as_deref(), Some("1.2.3"));
        assert_eq!(metadata.description.as_deref(), Some("Local DICOM Study"));
        assert_eq!(metadata.status.as_deref(), Some("LOCAL"));

        let identity = extract_instance_identity(&obj);
        assert_eq!(identity.instance_number, Some(7));
        assert!(identity.sop_instance_uid.is_none());
    }
}
