use std::io::Cursor;

use dicom::core::value::{PrimitiveValue, Value};
use dicom::core::Tag;
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{from_reader, DefaultDicomObject, InMemDicomObject};

use crate::error::{Error, Result};

/// Small helper trait to pull string values from different DICOM object shapes.
pub trait ElementAccess {
    /// Value with DICOM padding trimmed, suitable for display and identity fields.
    fn element_str(&self, tag: Tag) -> Option<String>;
    /// Value exactly as stored, minus trailing NUL padding. Used for free text that must round-trip.
    fn element_text(&self, tag: Tag) -> Option<String>;
    fn has_element(&self, tag: Tag) -> bool;
}

impl ElementAccess for InMemDicomObject<StandardDataDictionary> {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|s| s.trim_matches(|c: char| c.is_whitespace() || c == '\0').to_string())
    }

    fn element_text(&self, tag: Tag) -> Option<String> {
        let elem = self.element(tag).ok()?;
        let raw = match elem.value() {
            Value::Primitive(PrimitiveValue::Str(s)) => s.to_string(),
            Value::Primitive(PrimitiveValue::Strs(parts)) => parts.join("\\"),
            // Private tags read under implicit VR come back as raw bytes.
            Value::Primitive(PrimitiveValue::U8(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
            Value::Primitive(PrimitiveValue::Empty) => String::new(),
            _ => elem.to_str().ok()?.into_owned(),
        };
        Some(raw.trim_end_matches('\0').to_string())
    }

    fn has_element(&self, tag: Tag) -> bool {
        self.element(tag).is_ok()
    }
}

impl ElementAccess for DefaultDicomObject {
    fn element_str(&self, tag: Tag) -> Option<String> {
        (**self).element_str(tag)
    }

    fn element_text(&self, tag: Tag) -> Option<String> {
        (**self).element_text(tag)
    }

    fn has_element(&self, tag: Tag) -> bool {
        (**self).has_element(tag)
    }
}

/// Parse an in-memory DICOM file, with or without the 128-byte preamble.
pub fn parse_payload(bytes: &[u8]) -> Result<DefaultDicomObject> {
    let body = if bytes.len() >= 132 && &bytes[128..132] == b"DICM" {
        &bytes[128..]
    } else {
        bytes
    };
    from_reader(body).map_err(|e| Error::Data(format!("payload is not a readable DICOM file: {}", e)))
}

/// Serialize a DICOM file object back into bytes (preamble, meta group and data set).
pub fn write_payload(obj: &DefaultDicomObject) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    obj.write_all(&mut out)
        .map_err(|e| Error::Data(format!("failed to encode DICOM payload: {}", e)))?;
    Ok(out.into_inner())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
    use dicom::dictionary_std::{tags, StandardDataDictionary};
    use dicom::object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
    use dicom::transfer_syntax::entries::EXPLICIT_VR_LITTLE_ENDIAN;

    use super::write_payload;

    /// Tiny Secondary Capture instance; `extra` elements are added or override the defaults.
    pub(crate) fn sample_payload(extra: &[(Tag, VR, &str)]) -> Vec<u8> {
        let mut obj = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
        let defaults = [
            (tags::PATIENT_NAME, VR::PN, "Test^Patient"),
            (tags::PATIENT_ID, VR::LO, "PAT123"),
            (tags::PATIENT_BIRTH_DATE, VR::DA, "19800101"),
            (tags::PATIENT_SEX, VR::CS, "F"),
            (tags::MODALITY, VR::CS, "OT"),
            (tags::STUDY_DATE, VR::DA, "20240101"),
            (tags::STUDY_INSTANCE_UID, VR::UI, "1.2.3"),
            (tags::SERIES_INSTANCE_UID, VR::UI, "1.2.3.1"),
            (tags::SOP_CLASS_UID, VR::UI, "1.2.840.10008.5.1.4.1.1.7"),
            (tags::SOP_INSTANCE_UID, VR::UI, "1.2.3.1.1"),
        ];
        for (tag, vr, value) in defaults.iter().chain(extra.iter()) {
            obj.put(DataElement::new(*tag, *vr, PrimitiveValue::from(*value)));
        }
        obj.put(DataElement::new(
            tags::PIXEL_DATA,
            VR::OB,
            PrimitiveValue::from(vec![0_u8, 64, 128, 255]),
        ));

        let meta = FileMetaTableBuilder::new()
            .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN.uid())
            .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.7")
            .media_storage_sop_instance_uid("1.2.3.1.1")
            .build()
            .expect("meta");

        let mut file_obj =
            FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);
        for elem in obj {
            file_obj.put(elem);
        }
        write_payload(&file_obj).expect("encode sample payload")
    }
}
