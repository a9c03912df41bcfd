//! The trace-context data model carried on reconciled objects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpid::Cpid;
use crate::{KOC_ANNOTATION_KEY, MAX_ANC};

/// The traceable state attached to a single object: its current cpid plus a
/// bounded, newest-first list of immediate ancestor cpids.
///
/// Stored as the value of the `eppppi.github.io/koc` annotation, serialised
/// as `{"cpid": "...", "ancCpids": [...]}`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    pub cpid: Cpid,
    #[serde(rename = "ancCpids", default)]
    pub anc_cpids: Vec<Cpid>,
}

/// Errors surfaced by trace-context validation and object (de)serialisation.
#[derive(Debug, Error)]
pub enum TraceContextError {
    /// A required invariant (I1-I4) did not hold.
    #[error("invalid trace context: {0}")]
    InvalidContext(&'static str),

    /// The host object exposes no annotation accessor.
    #[error("object has no annotation accessor")]
    ObjectInaccessible,
}

/// Validates a [`TraceContext`] against invariants I1-I4.
pub fn validate(tc: &TraceContext) -> Result<(), TraceContextError> {
    if tc.cpid.is_empty() {
        return Err(TraceContextError::InvalidContext("cpid must not be empty"));
    }
    if tc.anc_cpids.len() > MAX_ANC {
        return Err(TraceContextError::InvalidContext(
            "ancCpids exceeds MAX_ANC",
        ));
    }
    if tc.anc_cpids.contains(&tc.cpid) {
        return Err(TraceContextError::InvalidContext(
            "cpid must not appear in its own ancCpids",
        ));
    }
    if tc.anc_cpids.iter().any(Cpid::is_empty) {
        return Err(TraceContextError::InvalidContext(
            "ancCpids must not contain empty cpids",
        ));
    }
    Ok(())
}

/// A host object that can carry the `koc` annotation.
///
/// Implemented by callers for whatever object type their object store uses;
/// mirrors the annotation-accessor traits this crate's host ecosystem puts
/// on its resources. A `None` return models an object that, dynamically,
/// turns out to expose no annotation map at all.
pub trait AnnotatedObject {
    fn annotations(&self) -> Option<&BTreeMap<String, String>>;
    fn annotations_mut(&mut self) -> Option<&mut BTreeMap<String, String>>;
}

/// Reads the `koc` annotation off `obj`.
///
/// Returns `None` if the annotation is absent. If present but malformed,
/// logs a warning and returns `None` — a bad annotation must never abort
/// the caller's reconciliation.
pub fn read_from_object<O: AnnotatedObject>(obj: &O) -> Option<TraceContext> {
    let annotations = obj.annotations()?;
    let raw = annotations.get(KOC_ANNOTATION_KEY)?;
    match serde_json::from_str::<TraceContext>(raw) {
        Ok(tc) => Some(tc),
        Err(err) => {
            tracing::warn!(error = %err, "malformed koc annotation, ignoring");
            None
        }
    }
}

/// Validates and writes `tc` onto `obj`'s `koc` annotation, creating the
/// annotation map if it does not exist yet.
pub fn write_to_object<O: AnnotatedObject>(
    obj: &mut O,
    tc: &TraceContext,
) -> Result<(), TraceContextError> {
    validate(tc)?;
    let raw = serde_json::to_string(tc)
        .expect("TraceContext serialisation is infallible for validated values");
    let annotations = obj
        .annotations_mut()
        .ok_or(TraceContextError::ObjectInaccessible)?;
    annotations.insert(KOC_ANNOTATION_KEY.to_string(), raw);
    Ok(())
}

#[cfg(test)]
pub(crate) struct TestObject {
    pub annotations: Option<BTreeMap<String, String>>,
}

#[cfg(test)]
impl AnnotatedObject for TestObject {
    fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.annotations.as_ref()
    }

    fn annotations_mut(&mut self) -> Option<&mut BTreeMap<String, String>> {
        self.annotations.get_or_insert_with(BTreeMap::new);
        self.annotations.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn valid_tc(cpid: &str, anc: &[&str]) -> TraceContext {
        TraceContext {
            cpid: Cpid::from_raw(cpid),
            anc_cpids: anc.iter().map(|a| Cpid::from_raw(*a)).collect(),
        }
    }

    #[test]
    fn validate_rejects_empty_cpid() {
        let tc = valid_tc("", &[]);
        assert!(matches!(
            validate(&tc),
            Err(TraceContextError::InvalidContext(_))
        ));
    }

    #[test]
    fn validate_rejects_too_many_ancestors() {
        let anc: Vec<String> = (0..=MAX_ANC).map(|i| i.to_string()).collect();
        let tc = valid_tc("c", &anc.iter().map(String::as_str).collect::<Vec<_>>());
        assert!(validate(&tc).is_err());
    }

    #[test]
    fn validate_rejects_self_in_ancestors() {
        let tc = valid_tc("c", &["a", "c"]);
        assert!(validate(&tc).is_err());
    }

    #[test]
    fn validate_rejects_empty_ancestor() {
        let tc = valid_tc("c", &["a", ""]);
        assert!(validate(&tc).is_err());
    }

    #[test]
    fn validate_accepts_root() {
        let tc = valid_tc("c", &[]);
        assert!(validate(&tc).is_ok());
    }

    #[test]
    fn read_from_object_returns_none_when_absent() {
        let obj = TestObject { annotations: None };
        assert!(read_from_object(&obj).is_none());
    }

    #[test]
    fn read_from_object_warns_and_returns_none_on_malformed_json() {
        let mut annotations = BTreeMap::new();
        annotations.insert(KOC_ANNOTATION_KEY.to_string(), "not json".to_string());
        let obj = TestObject {
            annotations: Some(annotations),
        };
        assert!(read_from_object(&obj).is_none());
    }

    #[test]
    fn write_then_read_roundtrips() {
        let tc = valid_tc("c", &["a", "b"]);
        let mut obj = TestObject { annotations: None };
        write_to_object(&mut obj, &tc).unwrap();
        assert_eq!(read_from_object(&obj), Some(tc));
    }

    #[test]
    fn write_creates_annotation_map_when_missing() {
        let tc = valid_tc("c", &[]);
        let mut obj = TestObject { annotations: None };
        assert!(obj.annotations.is_none());
        write_to_object(&mut obj, &tc).unwrap();
        assert!(obj.annotations.is_some());
    }

    #[test]
    fn write_rejects_invalid_context() {
        let tc = valid_tc("", &[]);
        let mut obj = TestObject { annotations: None };
        assert!(matches!(
            write_to_object(&mut obj, &tc),
            Err(TraceContextError::InvalidContext(_))
        ));
    }

    fn arb_cpid() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,8}"
    }

    proptest! {
        // (P1) validation round-trip.
        #[test]
        fn prop_write_read_roundtrip(
            cpid in arb_cpid(),
            anc in prop::collection::vec(arb_cpid(), 0..MAX_ANC).prop_filter(
                "ancestors must be distinct", |v| {
                    let set: std::collections::HashSet<_> = v.iter().collect();
                    set.len() == v.len()
                }
            ),
        ) {
            prop_assume!(!anc.contains(&cpid));
            let tc = TraceContext {
                cpid: Cpid::from_raw(cpid),
                anc_cpids: anc.into_iter().map(Cpid::from_raw).collect(),
            };
            let mut obj = TestObject { annotations: None };
            write_to_object(&mut obj, &tc).unwrap();
            prop_assert_eq!(read_from_object(&obj), Some(tc));
        }
    }
}
