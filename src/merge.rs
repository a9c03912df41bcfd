//! Fusing several incoming trace-contexts into one outgoing trace-context.

use std::time::SystemTime;

use indexmap::IndexMap;
use thiserror::Error;

use crate::cpid::Cpid;
use crate::sender::Sender;
use crate::trace_context::{self, TraceContext, TraceContextError};
use crate::MAX_ANC;

/// Why a new cpid was minted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CauseType {
    /// A fresh root cpid with no ancestors.
    NewChange,
    /// A cpid descending from two or more source cpids.
    Merge,
}

/// The audit record of a merge, or of a fresh root cpid.
#[derive(Clone, Debug, PartialEq)]
pub struct Mergelog {
    pub new_cpid: Cpid,
    pub source_cpids: Vec<Cpid>,
    pub time: SystemTime,
    pub cause_type: CauseType,
    pub cause_message: String,
    pub by: String,
}

/// Errors from the merge engine.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The candidate output trace-context (`new_tctx`) failed validation.
    /// Unlike a bad source, this is fatal: a reconciler cannot stamp an
    /// invalid trace-context onto its primary output.
    #[error("invalid output trace context: {0}")]
    InvalidNewContext(#[source] TraceContextError),
}

/// Mints a fresh root [`TraceContext`] and emits a `NEW_CHANGE` merge-log.
pub async fn new_root_context(
    message: impl Into<String>,
    by: impl Into<String>,
    sender: &Sender,
) -> TraceContext {
    let cpid = Cpid::generate();
    let mergelog = Mergelog {
        new_cpid: cpid.clone(),
        source_cpids: Vec::new(),
        time: SystemTime::now(),
        cause_type: CauseType::NewChange,
        cause_message: message.into(),
        by: by.into(),
    };
    sender.send_mergelog(mergelog).await;
    TraceContext {
        cpid,
        anc_cpids: Vec::new(),
    }
}

/// Given a candidate output trace-context and the trace-contexts of the
/// objects that fed into it, produces the trace-context to stamp onto the
/// output, emitting a merge-log as a side effect iff a real merge occurred.
///
/// Bad elements of `srcs` are skipped with a warning; only a bad `new_tctx`
/// is fatal, so a reconciler running with partial inputs is still traced.
pub async fn merge_and_emit(
    new_tctx: &TraceContext,
    srcs: &[TraceContext],
    cause_msg: impl Into<String>,
    by: impl Into<String>,
    sender: &Sender,
) -> Result<TraceContext, MergeError> {
    trace_context::validate(new_tctx).map_err(MergeError::InvalidNewContext)?;

    let new_copy = new_tctx.clone();
    let valid_srcs: Vec<TraceContext> = srcs
        .iter()
        .filter_map(|s| match trace_context::validate(s) {
            Ok(()) => Some(s.clone()),
            Err(err) => {
                tracing::warn!(cpid = %s.cpid, error = %err, "skipping invalid source trace context");
                None
            }
        })
        .collect();

    if valid_srcs.is_empty() {
        return Ok(new_copy);
    }

    let mut graph = CpidGraph::new();
    for s in &valid_srcs {
        graph.insert(s.cpid.clone(), s.anc_cpids.clone());
    }
    graph.insert(new_copy.cpid.clone(), new_copy.anc_cpids.clone());

    match graph.roots.len() {
        0 => Ok(new_copy),
        1 => {
            let (dest, mut ancestors) = graph
                .roots
                .into_iter()
                .next()
                .expect("roots.len() == 1 guarantees one entry");
            ancestors.truncate(MAX_ANC);
            Ok(TraceContext {
                cpid: dest,
                anc_cpids: ancestors,
            })
        }
        _ => {
            let dest = Cpid::generate();
            let source_cpids: Vec<Cpid> = graph.roots.keys().cloned().collect();
            graph.insert(dest.clone(), source_cpids.clone());
            let mut ancestors = graph.roots.get(&dest).cloned().unwrap_or_default();
            ancestors.truncate(MAX_ANC);

            let mergelog = Mergelog {
                new_cpid: dest.clone(),
                source_cpids,
                time: SystemTime::now(),
                cause_type: CauseType::Merge,
                cause_message: cause_msg.into(),
                by: by.into(),
            };
            sender.send_mergelog(mergelog).await;

            Ok(TraceContext {
                cpid: dest,
                anc_cpids: ancestors,
            })
        }
    }
}

/// A bounded-depth, flattened representation of "cpid X transitively
/// descends from cpids Y1..Yk", maintaining the root-disjointness invariant:
/// no cpid that appears as a key ever appears as a value in any list.
struct CpidGraph {
    roots: IndexMap<Cpid, Vec<Cpid>>,
}

impl CpidGraph {
    fn new() -> Self {
        Self {
            roots: IndexMap::new(),
        }
    }

    /// Inserts one trace-context `{c, anc}` into the graph, collapsing any
    /// root it transitively descends from (step 1) and unifying it with an
    /// existing root that already claims it as a descendant (step 2).
    fn insert(&mut self, c: Cpid, anc: Vec<Cpid>) {
        let mut absorbed = anc.clone();
        let original: std::collections::HashSet<Cpid> = anc.into_iter().collect();

        let grandparent_keys: Vec<Cpid> = self
            .roots
            .keys()
            .filter(|k| original.contains(*k))
            .cloned()
            .collect();
        for k in grandparent_keys {
            if let Some(values) = self.roots.get(&k).cloned() {
                for v in values {
                    if !absorbed.contains(&v) {
                        absorbed.push(v);
                    }
                }
            }
            self.roots.shift_remove(&k);
        }

        // Stop at the first root that already claims `c`, per the spec's
        // "recommended" resolution of the ambiguous unify-vs-update-all case.
        let matching_key = self
            .roots
            .iter()
            .find(|(k, vs)| **k == c || vs.contains(&c))
            .map(|(k, _)| k.clone());

        match matching_key {
            Some(k) => {
                let existing = self.roots.get_mut(&k).expect("key just found");
                for v in absorbed.into_iter().rev() {
                    if !existing.contains(&v) {
                        existing.insert(0, v);
                    }
                }
            }
            None => {
                self.roots.insert(c, absorbed);
            }
        }
    }
}
