//
// codec.rs
// Pacs-Sync-rs
//
// Embeds an examination result into a DICOM payload (display field, private tag group 0x7777, study comments)
// and reconstructs it, chunking texts that exceed a single long-text element.
//
// Thales Matheus Mendonça Santos - October 2026

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::tags;
use dicom::object::DefaultDicomObject;
use tracing::{debug, warn};

use crate::dicom_access::{parse_payload, write_payload, ElementAccess};
use crate::error::{Result, Warning};

pub const RESULT_GROUP: u16 = 0x7777;
pub const MARKER_TAG: Tag = Tag(RESULT_GROUP, 0x0010);
pub const CHUNK_COUNT_TAG: Tag = Tag(RESULT_GROUP, 0x0020);
pub const FIRST_CHUNK_ELEMENT: u16 = 0x1001;
pub const MARKER: &str = "MEDICAL_APP_RESULT";

/// Study Comments, retired from the standard but still read by viewers.
const STUDY_COMMENTS: Tag = Tag(0x0032, 0x4000);

/// Longest text copied verbatim into Image Comments.
pub const DISPLAY_LIMIT_CHARS: usize = 10_240;
const DISPLAY_KEEP_CHARS: usize = 10_200;
const TRUNCATED_NOTICE: &str = "\n\n[TRUNCATED - See private tags]";

/// Longest text stored whole in (7777,1001).
pub const SINGLE_TAG_LIMIT_CHARS: usize = 65_534;
pub const CHUNK_CHARS: usize = 65_000;
pub const MAX_CHUNKS: usize = 10;

/// Hard capacity of the private tag space. Longer texts are cut to this many chars
/// and the caller receives [`Warning::CodecOverflow`].
pub const EMBED_CAPACITY_CHARS: usize = CHUNK_CHARS * MAX_CHUNKS;

const PREVIEW_CHARS: usize = 200;
const PREVIEW_MARKER: &str = "EXAMINATION RESULT:";

// LT carries a 16-bit length under explicit VR.
const LT_MAX_BYTES: usize = 0xFFFE;

/// Payload after embedding, plus whatever degraded along the way.
#[derive(Debug, Clone)]
pub struct Embedded {
    pub payload: Vec<u8>,
    pub warnings: Vec<Warning>,
}

/// Tag holding chunk `index` (zero based).
pub fn chunk_tag(index: usize) -> Tag {
    Tag(RESULT_GROUP, FIRST_CHUNK_ELEMENT + index as u16)
}

/// Embed `text` into `payload`. Never fails: if the payload cannot be rewritten the original bytes come back
/// together with [`Warning::EmbedFailed`].
///
/// `extract(&embed(p, t).payload) == t` holds for texts of at most [`EMBED_CAPACITY_CHARS`] chars without NUL.
/// Longer texts lose everything past that boundary.
pub fn embed(payload: &[u8], text: &str) -> Embedded {
    match try_embed(payload, text) {
        Ok(embedded) => embedded,
        Err(e) => {
            warn!(error = %e, "Could not embed examination result, sending payload unmodified");
            Embedded {
                payload: payload.to_vec(),
                warnings: vec![Warning::EmbedFailed(e.to_string())],
            }
        }
    }
}

fn try_embed(payload: &[u8], text: &str) -> Result<Embedded> {
    let mut obj = parse_payload(payload)?;
    let mut warnings = Vec::new();
    let chars = text.chars().count();

    // A previous result may have used more chunks than this one; drop it entirely.
    clear_result_tags(&mut obj);

    if !text.is_ascii() {
        obj.put(DataElement::new(
            tags::SPECIFIC_CHARACTER_SET,
            VR::CS,
            PrimitiveValue::from("ISO_IR 192"),
        ));
    }

    let display = if chars <= DISPLAY_LIMIT_CHARS {
        text.to_string()
    } else {
        format!("{}{}", prefix_chars(text, DISPLAY_KEEP_CHARS), TRUNCATED_NOTICE)
    };
    put_text(&mut obj, tags::IMAGE_COMMENTS, &display);

    obj.put(DataElement::new(MARKER_TAG, VR::LO, PrimitiveValue::from(MARKER)));

    if chars <= SINGLE_TAG_LIMIT_CHARS {
        put_text(&mut obj, chunk_tag(0), text);
        debug!(chars, "Embedded result in a single private tag");
    } else {
        let kept = if chars > EMBED_CAPACITY_CHARS {
            warn!(
                chars,
                capacity = EMBED_CAPACITY_CHARS,
                "Examination result exceeds embedding capacity, truncating"
            );
            warnings.push(Warning::CodecOverflow {
                chars,
                capacity: EMBED_CAPACITY_CHARS,
            });
            prefix_chars(text, EMBED_CAPACITY_CHARS)
        } else {
            text
        };

        let chunks = split_chars(kept, CHUNK_CHARS);
        for (index, chunk) in chunks.iter().enumerate() {
            put_text(&mut obj, chunk_tag(index), chunk);
        }
        obj.put(DataElement::new(
            CHUNK_COUNT_TAG,
            VR::IS,
            PrimitiveValue::from(chunks.len().to_string()),
        ));
        debug!(chars, chunks = chunks.len(), "Embedded result in chunked private tags");
    }

    if !obj.has_element(STUDY_COMMENTS) {
        let preview = format!("{} {}", PREVIEW_MARKER, prefix_chars(text, PREVIEW_CHARS));
        put_text(&mut obj, STUDY_COMMENTS, &preview);
    }

    Ok(Embedded {
        payload: write_payload(&obj)?,
        warnings,
    })
}

/// Read the embedded result back. An empty string means the payload carries none.
pub fn extract(payload: &[u8]) -> Result<String> {
    let obj = parse_payload(payload)?;
    Ok(extract_from(&obj))
}

pub fn extract_from<T: ElementAccess>(obj: &T) -> String {
    if obj.has_element(MARKER_TAG) {
        let count = obj
            .element_text(CHUNK_COUNT_TAG)
            .and_then(|c| c.trim().parse::<usize>().ok());
        if let Some(count) = count {
            // Missing chunks contribute nothing; partial data beats no data.
            let parts: Vec<String> = (0..count.min(MAX_CHUNKS))
                .filter_map(|index| obj.element_text(chunk_tag(index)))
                .collect();
            if !parts.is_empty() {
                return parts.concat();
            }
        }
        if let Some(single) = obj.element_text(chunk_tag(0)) {
            return single;
        }
    }

    if let Some(comments) = obj.element_text(tags::IMAGE_COMMENTS) {
        return comments;
    }

    if let Some(comments) = obj.element_text(STUDY_COMMENTS) {
        if let Some(pos) = comments.find(PREVIEW_MARKER) {
            let rest = &comments[pos + PREVIEW_MARKER.len()..];
            return rest.strip_prefix(' ').unwrap_or(rest).to_string();
        }
    }

    String::new()
}

fn clear_result_tags(obj: &mut DefaultDicomObject) {
    let stale: Vec<Tag> = obj
        .iter()
        .map(|e| e.header().tag)
        .filter(|tag| tag.group() == RESULT_GROUP)
        .collect();
    for tag in stale {
        obj.remove_element(tag);
    }
}

fn put_text(obj: &mut DefaultDicomObject, tag: Tag, text: &str) {
    let mut value = text.to_string();
    // Pad odd lengths ourselves with NUL so the writer's space padding never leaks into the text.
    if value.len() % 2 == 1 {
        value.push('\0');
    }
    let vr = if value.len() > LT_MAX_BYTES { VR::UT } else { VR::LT };
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

fn prefix_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn split_chars(text: &str, size: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let head = prefix_chars(rest, size);
        chunks.push(head);
        rest = &rest[head.len()..];
    }
    chunks
}
