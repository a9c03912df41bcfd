//! Change-propagation tracing for controllers that reconcile declarative
//! objects by merging several inputs into one output.
//!
//! A conventional span-parent-child tree cannot express "this change was
//! caused by the merge of changes A, B and C". This crate attaches a
//! change-propagation identifier (a [`Cpid`]) to every reconciled object,
//! records per-controller work against that id as a [`Span`], and records
//! how new cpids descend from several source cpids as a [`Mergelog`]. The
//! result is a causal DAG of changes over objects, not a tree.

pub mod cpid;
pub use cpid::Cpid;

pub mod trace_context;
pub use trace_context::{AnnotatedObject, TraceContext, TraceContextError};

pub mod merge;
pub use merge::{merge_and_emit, new_root_context, MergeError, Mergelog};

pub mod span;
pub use span::{RequestContext, Span};

pub mod sender;
pub use sender::{Sender, SenderError};

mod wire;

/// Maximum number of ancestor cpids carried on a [`TraceContext`].
pub const MAX_ANC: usize = 10;

/// Capacity of each of the sender's two in-process queues.
pub const CHANNEL_SIZE: usize = 100;

/// The annotation key under which a [`TraceContext`] is stored on an object.
pub const KOC_ANNOTATION_KEY: &str = "eppppi.github.io/koc";
