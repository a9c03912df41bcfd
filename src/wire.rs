//! Conversions between this crate's domain types and the generated
//! protobuf types sent to the collector.

pub mod proto {
    tonic::include_proto!("mergelog");
}

use std::time::SystemTime;

use crate::cpid::Cpid;
use crate::merge::{CauseType, Mergelog};
use crate::span::Span;

fn to_timestamp(t: SystemTime) -> prost_types::Timestamp {
    prost_types::Timestamp::from(t)
}

impl From<&Cpid> for proto::Cpid {
    fn from(c: &Cpid) -> Self {
        proto::Cpid {
            cpid: c.as_str().to_string(),
        }
    }
}

impl From<&Span> for proto::Span {
    fn from(s: &Span) -> Self {
        proto::Span {
            cpid: Some(proto::Cpid::from(&s.cpid)),
            start_time: Some(to_timestamp(s.start_time)),
            end_time: s.end_time.map(to_timestamp),
            service: s.service.clone(),
            object_kind: s.object_kind.clone(),
            object_name: s.object_name.clone(),
            message: s.message.clone(),
            span_id: s.span_id.clone(),
            parent_id: s.parent_id.clone(),
        }
    }
}

impl From<&Mergelog> for proto::Mergelog {
    fn from(m: &Mergelog) -> Self {
        let cause_type = match m.cause_type {
            CauseType::NewChange => proto::CauseType::NewChange,
            CauseType::Merge => proto::CauseType::Merge,
        };
        proto::Mergelog {
            new_cpid: Some(proto::Cpid::from(&m.new_cpid)),
            source_cpids: m.source_cpids.iter().map(proto::Cpid::from).collect(),
            time: Some(to_timestamp(m.time)),
            cause_type: cause_type as i32,
            cause_message: m.cause_message.clone(),
            by: m.by.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn span_conversion_carries_all_fields() {
        let span = Span {
            cpid: Cpid::from_raw("c"),
            start_time: SystemTime::now(),
            end_time: Some(SystemTime::now()),
            service: "svc".into(),
            object_kind: "Pod".into(),
            object_name: "name".into(),
            message: "msg".into(),
            span_id: "s1".into(),
            parent_id: "p1".into(),
        };
        let wire = proto::Span::from(&span);
        assert_eq!(wire.cpid.unwrap().cpid, "c");
        assert_eq!(wire.service, "svc");
        assert_eq!(wire.object_kind, "Pod");
        assert_eq!(wire.span_id, "s1");
        assert_eq!(wire.parent_id, "p1");
        assert!(wire.end_time.is_some());
    }

    #[test]
    fn mergelog_conversion_maps_cause_type() {
        let m = Mergelog {
            new_cpid: Cpid::from_raw("n"),
            source_cpids: vec![Cpid::from_raw("a"), Cpid::from_raw("b")],
            time: SystemTime::now(),
            cause_type: CauseType::Merge,
            cause_message: "merged".into(),
            by: "reconciler".into(),
        };
        let wire = proto::Mergelog::from(&m);
        assert_eq!(wire.new_cpid.unwrap().cpid, "n");
        assert_eq!(wire.source_cpids.len(), 2);
        assert_eq!(wire.cause_type, proto::CauseType::Merge as i32);
    }
}
