//! Expected vs. observed attribute comparison.

use std::fmt;

use serde::Serialize;

use super::object::{Attributes, ObjectKey};

/// One attribute that differs between expected and observed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub attribute: String,
    pub expected: String,
    /// `None` when the attribute is missing from the observed object.
    pub observed: Option<String>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.observed {
            Some(observed) => write!(
                f,
                "{}: expected {:?}, observed {:?}",
                self.attribute, self.expected, observed
            ),
            None => write!(f, "{}: expected {:?}, missing", self.attribute, self.expected),
        }
    }
}

/// All mismatches found for one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectMismatch {
    pub key: ObjectKey,
    pub mismatches: Vec<Mismatch>,
}

impl fmt::Display for ObjectMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let details = self
            .mismatches
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{} [{details}]", self.key)
    }
}

/// Compare expected attributes against observed ones.
///
/// Attributes present only in `observed` are ignored. Values are compared in
/// their normalized string form.
pub fn compare(expected: &Attributes, observed: &Attributes) -> Vec<Mismatch> {
    expected
        .iter()
        .filter_map(|(attribute, expected_value)| {
            let expected_text = expected_value.normalized();
            match observed.get(attribute) {
                Some(observed_value) if observed_value.normalized() == expected_text => None,
                Some(observed_value) => Some(Mismatch {
                    attribute: attribute.clone(),
                    expected: expected_text,
                    observed: Some(observed_value.normalized()),
                }),
                None => Some(Mismatch {
                    attribute: attribute.clone(),
                    expected: expected_text,
                    observed: None,
                }),
            }
        })
        .collect()
}
