//! Typed access to DICOM attributes.
//!
//! Every getter returns `None` (or an empty slice for sequences) when the
//! attribute is absent or cannot be converted; callers decide on defaults.
//! Setters write the value representations this crate emits: decimal
//! strings for DS, integer strings for IS, text for UI/CS/LO/SH/PN.

use dicom::{
    core::{
        DataElement, PrimitiveValue, Tag, VR,
        value::{DataSetSequence, Value},
    },
    object::InMemDicomObject,
};
use nalgebra::Point3;
use uuid::Uuid;

/// Read side of the typed accessor.
pub trait DicomAttributes {
    fn string(&self, tag: Tag) -> Option<String>;
    fn float(&self, tag: Tag) -> Option<f64>;
    fn floats(&self, tag: Tag) -> Option<Vec<f64>>;
    fn int(&self, tag: Tag) -> Option<i32>;
    fn sequence(&self, tag: Tag) -> &[InMemDicomObject];

    /// Three-component point (ImagePositionPatient style).
    fn point(&self, tag: Tag) -> Option<Point3<f64>> {
        match self.floats(tag)?.as_slice() {
            [x, y, z] => Some(Point3::new(*x, *y, *z)),
            _ => None,
        }
    }

    /// Six direction cosines (ImageOrientationPatient style).
    fn cosines(&self, tag: Tag) -> Option<[f64; 6]> {
        let values = self.floats(tag)?;
        <[f64; 6]>::try_from(values.as_slice()).ok()
    }
}

impl DicomAttributes for InMemDicomObject {
    fn string(&self, tag: Tag) -> Option<String> {
        let value = self.element(tag).ok()?.to_str().ok()?;
        let trimmed = value.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    fn float(&self, tag: Tag) -> Option<f64> {
        self.element(tag).ok()?.to_float64().ok()
    }

    fn floats(&self, tag: Tag) -> Option<Vec<f64>> {
        self.element(tag).ok()?.to_multi_float64().ok()
    }

    fn int(&self, tag: Tag) -> Option<i32> {
        self.element(tag).ok()?.to_int::<i32>().ok()
    }

    fn sequence(&self, tag: Tag) -> &[InMemDicomObject] {
        self.element(tag)
            .ok()
            .and_then(|element| element.items())
            .unwrap_or(&[])
    }
}

/// Write side of the typed accessor.
pub trait DicomAttributesMut {
    fn put_text(&mut self, tag: Tag, vr: VR, value: &str);
    fn put_decimal(&mut self, tag: Tag, value: f64);
    fn put_decimals(&mut self, tag: Tag, values: &[f64]);
    fn put_integer(&mut self, tag: Tag, value: i64);
    fn put_integers(&mut self, tag: Tag, values: &[i64]);
    fn put_u16(&mut self, tag: Tag, value: u16);
    fn put_sequence(&mut self, tag: Tag, items: Vec<InMemDicomObject>);
}

impl DicomAttributesMut for InMemDicomObject {
    fn put_text(&mut self, tag: Tag, vr: VR, value: &str) {
        self.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
    }

    fn put_decimal(&mut self, tag: Tag, value: f64) {
        self.put(DataElement::new(
            tag,
            VR::DS,
            PrimitiveValue::from(format_decimal(value)),
        ));
    }

    fn put_decimals(&mut self, tag: Tag, values: &[f64]) {
        let strings = values.iter().map(|v| format_decimal(*v)).collect();
        self.put(DataElement::new(tag, VR::DS, PrimitiveValue::Strs(strings)));
    }

    fn put_integer(&mut self, tag: Tag, value: i64) {
        self.put(DataElement::new(
            tag,
            VR::IS,
            PrimitiveValue::from(value.to_string()),
        ));
    }

    fn put_integers(&mut self, tag: Tag, values: &[i64]) {
        let strings = values.iter().map(i64::to_string).collect();
        self.put(DataElement::new(tag, VR::IS, PrimitiveValue::Strs(strings)));
    }

    fn put_u16(&mut self, tag: Tag, value: u16) {
        self.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
    }

    fn put_sequence(&mut self, tag: Tag, items: Vec<InMemDicomObject>) {
        self.put(DataElement::new(
            tag,
            VR::SQ,
            Value::Sequence(DataSetSequence::from(items)),
        ));
    }
}

/// Maximum length of a DS value.
const DS_MAX_LEN: usize = 16;

/// Format a float as a DICOM decimal string of at most 16 characters.
pub fn format_decimal(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let plain = format!("{value}");
    if plain.len() <= DS_MAX_LEN {
        return plain;
    }
    for decimals in (0..=DS_MAX_LEN).rev() {
        let candidate = format!("{value:.decimals$}");
        if candidate.len() <= DS_MAX_LEN {
            return trim_fraction(candidate);
        }
    }
    for decimals in (0..=10).rev() {
        let candidate = format!("{value:.decimals$e}");
        if candidate.len() <= DS_MAX_LEN {
            return candidate;
        }
    }
    "0".to_string()
}

fn trim_fraction(s: String) -> String {
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.');
        if trimmed.is_empty() || trimmed == "-" {
            "0".to_string()
        } else {
            trimmed.to_string()
        }
    } else {
        s
    }
}

/// New UID under the UUID-derived `2.25` root.
pub fn generate_uid() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}
