//! The immutable call chain.
//!
//! A [`CallId`] is a root type name plus a singly-linked list of [`Step`]s,
//! newest first. Steps are reference counted and never mutated, so appending
//! is O(1) and an ID can be shared freely across threads.
//!
//! # Invariants
//!
//! - A step never changes after it is linked.
//! - Taint is monotonic: once any step is tainted, every ID built on top of
//!   it is tainted.
//! - Equality is structural; two separately built chains with the same steps
//!   compare equal.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tessera_crypto::ContentHasher;
use tessera_types::Digest;

use crate::error::CallResult;
use crate::literal::{validate_arguments, Argument, Literal};
use crate::wire::{encode_wire, WireCall, WireStep};

/// One step of a call chain: a field selection with its arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    /// Field or method name.
    pub field: String,
    /// Named arguments, in the order they were given.
    pub args: Vec<Argument>,
    /// 1-based index into a list result; 0 selects the whole value.
    pub nth: i64,
    /// The step is non-deterministic (wall clock, unpinned remote, ...).
    pub tainted: bool,
    /// The step does not affect the produced value (labels, descriptions).
    pub meta: bool,
}

impl Selector {
    /// A plain, deterministic selector with no arguments.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            args: Vec::new(),
            nth: 0,
            tainted: false,
            meta: false,
        }
    }

    /// Add a named argument.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Literal>) -> Self {
        self.args.push(Argument::new(name, value));
        self
    }

    /// Select the `nth` element (1-based) of a list result.
    pub fn nth(mut self, nth: i64) -> Self {
        self.nth = nth;
        self
    }

    /// Mark the selector as non-deterministic.
    pub fn tainted(mut self) -> Self {
        self.tainted = true;
        self
    }

    /// Mark the selector as not semantically significant.
    pub fn meta(mut self) -> Self {
        self.meta = true;
        self
    }

    /// Returns `true` if the selector or any ID in its arguments is tainted.
    pub fn is_tainted(&self) -> bool {
        self.tainted || self.args.iter().any(|a| a.value.is_tainted())
    }

    fn canonical(&self) -> Self {
        Self {
            field: self.field.clone(),
            args: self.args.iter().map(Argument::canonical).collect(),
            nth: self.nth,
            tainted: self.tainted,
            meta: self.meta,
        }
    }

    fn has_meta_args(&self) -> bool {
        self.args.iter().any(|a| a.value.has_meta())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.field)?;
        if !self.args.is_empty() {
            f.write_str("(")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{arg}")?;
            }
            f.write_str(")")?;
        }
        if self.nth != 0 {
            write!(f, "#{}", self.nth)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Step {
    parent: Option<Arc<Step>>,
    /// Type of the value produced by this step.
    type_name: Arc<str>,
    selector: Selector,
    /// Cached: this step or any step below it is tainted.
    tainted: bool,
    depth: usize,
}

// Unlink uniquely owned ancestors one at a time; the derived drop would
// recurse once per step.
impl Drop for Step {
    fn drop(&mut self) {
        let mut next = self.parent.take();
        while let Some(step) = next {
            next = match Arc::into_inner(step) {
                Some(mut owned) => owned.parent.take(),
                None => None,
            };
        }
    }
}

/// An immutable call identifier.
///
/// Construct one with [`CallId::new`] and grow it with [`CallId::append`] or
/// [`CallId::select`]; each returns a new ID sharing every existing step.
#[derive(Clone)]
pub struct CallId {
    root_type: Arc<str>,
    head: Option<Arc<Step>>,
}

impl CallId {
    /// An empty chain whose value has type `type_name`.
    pub fn new(type_name: impl Into<Arc<str>>) -> Self {
        Self {
            root_type: type_name.into(),
            head: None,
        }
    }

    /// Append a selector that keeps the current result type.
    pub fn append(&self, selector: Selector) -> Self {
        let type_name = self.type_arc();
        self.link(type_name, selector)
    }

    /// Append a selector that produces a value of `type_name`.
    pub fn select(&self, type_name: impl Into<Arc<str>>, selector: Selector) -> Self {
        self.link(type_name.into(), selector)
    }

    fn link(&self, type_name: Arc<str>, selector: Selector) -> Self {
        let tainted = selector.is_tainted() || self.is_tainted();
        let depth = self.len() + 1;
        Self {
            root_type: Arc::clone(&self.root_type),
            head: Some(Arc::new(Step {
                parent: self.head.clone(),
                type_name,
                selector,
                tainted,
                depth,
            })),
        }
    }

    /// Re-issue the head selector as a selection of its `nth` element.
    ///
    /// Returns `None` for an empty chain.
    pub fn select_nth(&self, elem_type: impl Into<Arc<str>>, nth: i64) -> Option<Self> {
        let head = self.head.as_ref()?;
        let base = self.receiver()?;
        Some(base.link(elem_type.into(), head.selector.clone().nth(nth)))
    }

    /// The type of the value this chain produces.
    pub fn type_name(&self) -> &str {
        match &self.head {
            Some(step) => &step.type_name,
            None => &self.root_type,
        }
    }

    fn type_arc(&self) -> Arc<str> {
        match &self.head {
            Some(step) => Arc::clone(&step.type_name),
            None => Arc::clone(&self.root_type),
        }
    }

    /// The type the chain was started from.
    pub fn root_type(&self) -> &str {
        &self.root_type
    }

    /// The most recently appended selector.
    pub fn head(&self) -> Option<&Selector> {
        self.head.as_deref().map(|s| &s.selector)
    }

    /// The chain without its head step, or `None` for an empty chain.
    pub fn receiver(&self) -> Option<Self> {
        let head = self.head.as_ref()?;
        Some(Self {
            root_type: Arc::clone(&self.root_type),
            head: head.parent.clone(),
        })
    }

    /// Number of steps in the chain.
    pub fn len(&self) -> usize {
        self.head.as_ref().map_or(0, |s| s.depth)
    }

    /// Returns `true` if the chain has no steps.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Selectors from the root outward.
    pub fn selectors(&self) -> Vec<&Selector> {
        let mut out: Vec<&Selector> = self.steps().map(|s| &s.selector).collect();
        out.reverse();
        out
    }

    /// Steps from the head down to the root.
    fn steps(&self) -> impl Iterator<Item = &Step> {
        std::iter::successors(self.head.as_deref(), |s| s.parent.as_deref())
    }

    /// Returns `true` if any step in the full chain (meta steps included), or
    /// any ID nested in an argument, is tainted.
    pub fn is_tainted(&self) -> bool {
        self.head.as_ref().is_some_and(|s| s.tainted)
    }

    pub(crate) fn has_meta(&self) -> bool {
        self.steps()
            .any(|s| s.selector.meta || s.selector.has_meta_args())
    }

    /// The chain with every meta selector removed, here and in nested IDs.
    ///
    /// Steps below the lowest step that needs rewriting are shared with
    /// `self`. Canonicalizing a canonical ID returns a clone of it.
    pub fn canonical(&self) -> Self {
        if !self.has_meta() {
            return self.clone();
        }
        let steps: Vec<&Step> = self.steps().collect();
        // Index (head-first) of the deepest step that must change.
        let deepest = steps
            .iter()
            .rposition(|s| s.selector.meta || s.selector.has_meta_args())
            .unwrap_or(0);
        let mut out = Self {
            root_type: Arc::clone(&self.root_type),
            head: steps[deepest].parent.clone(),
        };
        for step in steps[..=deepest].iter().rev() {
            if step.selector.meta {
                continue;
            }
            out = out.link(Arc::clone(&step.type_name), step.selector.canonical());
        }
        out
    }

    /// Check that the chain has exactly one deterministic encoding.
    pub fn validate(&self) -> CallResult<()> {
        self.validate_at(0)
    }

    /// As [`CallId::validate`], for a chain nested `depth` literals deep.
    pub(crate) fn validate_at(&self, depth: usize) -> CallResult<()> {
        for step in self.steps() {
            validate_arguments(&step.selector.args, &step.selector.field, depth + 1)?;
        }
        Ok(())
    }

    /// Digest of this chain's wire encoding. Does not canonicalize first.
    pub fn digest(&self) -> CallResult<Digest> {
        let bytes = encode_wire(self)?;
        Ok(ContentHasher::CALL.hash(&bytes))
    }

    /// Digest of the canonical form: the call cache key.
    pub fn canonical_digest(&self) -> CallResult<Digest> {
        self.canonical().digest()
    }

    /// Digests of IDs referenced by arguments anywhere in the chain,
    /// de-duplicated, in first-seen order from the root outward.
    pub fn inputs(&self) -> CallResult<Vec<Digest>> {
        let mut ids = Vec::new();
        for selector in self.selectors() {
            for arg in &selector.args {
                arg.value.collect_ids(&mut ids);
            }
        }
        let mut out: Vec<Digest> = Vec::with_capacity(ids.len());
        for id in ids {
            let d = id.digest()?;
            if !out.contains(&d) {
                out.push(d);
            }
        }
        Ok(out)
    }

    /// Human-readable selector path, e.g. `container.from(address: "alpine")`.
    pub fn path(&self) -> String {
        self.selectors()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }

    pub(crate) fn to_wire(&self) -> WireCall {
        let mut steps: Vec<WireStep> = self
            .steps()
            .map(|s| WireStep {
                type_name: s.type_name.to_string(),
                selector: s.selector.clone(),
            })
            .collect();
        steps.reverse();
        WireCall {
            root_type: self.root_type.to_string(),
            steps,
        }
    }

    pub(crate) fn from_wire(wire: WireCall) -> Self {
        let mut id = Self::new(wire.root_type);
        for step in wire.steps {
            id = id.select(step.type_name, step.selector);
        }
        id
    }
}

impl PartialEq for CallId {
    fn eq(&self, other: &Self) -> bool {
        if self.root_type != other.root_type || self.len() != other.len() {
            return false;
        }
        let mut a = self.head.as_ref();
        let mut b = other.head.as_ref();
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if Arc::ptr_eq(x, y) {
                        return true;
                    }
                    if x.type_name != y.type_name || x.selector != y.selector {
                        return false;
                    }
                    a = x.parent.as_ref();
                    b = y.parent.as_ref();
                }
                _ => return false,
            }
        }
    }
}

impl fmt::Debug for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallId({}: {})", self.path(), self.type_name())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path(), self.type_name())
    }
}

impl Serialize for CallId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CallId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        WireCall::deserialize(deserializer).map(Self::from_wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use proptest::prelude::*;

    fn alpine() -> CallId {
        CallId::new("Query")
            .select("Container", Selector::new("container"))
            .append(Selector::new("from").arg("address", "alpine:3.20"))
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    #[test]
    fn empty_chain_has_root_type() {
        let id = CallId::new("Query");
        assert!(id.is_empty());
        assert_eq!(id.len(), 0);
        assert_eq!(id.type_name(), "Query");
        assert!(id.head().is_none());
        assert!(id.receiver().is_none());
    }

    #[test]
    fn append_shares_the_parent() {
        let base = alpine();
        let a = base.append(Selector::new("withExec").arg("args", vec!["ls"]));
        let b = base.append(Selector::new("withExec").arg("args", vec!["pwd"]));
        assert_eq!(a.len(), 3);
        let (ra, rb) = (a.receiver().unwrap(), b.receiver().unwrap());
        assert!(Arc::ptr_eq(
            ra.head.as_ref().unwrap(),
            rb.head.as_ref().unwrap()
        ));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn select_changes_type_and_append_keeps_it() {
        let id = alpine();
        assert_eq!(id.type_name(), "Container");
        let file = id.select("File", Selector::new("file").arg("path", "/etc/os-release"));
        assert_eq!(file.type_name(), "File");
        assert_eq!(file.root_type(), "Query");
    }

    #[test]
    fn select_nth_replaces_the_head() {
        let list = CallId::new("Query").select("[Container]", Selector::new("containers"));
        let second = list.select_nth("Container", 2).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second.head().unwrap().nth, 2);
        assert_eq!(second.type_name(), "Container");
        assert_eq!(second.path(), "containers#2");
        assert!(CallId::new("Query").select_nth("X", 1).is_none());
    }

    #[test]
    fn path_renders_arguments() {
        let id = alpine().append(Selector::new("withExec").arg("args", vec!["ls", "-l"]));
        assert_eq!(
            id.path(),
            "container.from(address: \"alpine:3.20\").withExec(args: [\"ls\", \"-l\"])"
        );
        assert_eq!(id.to_string(), format!("{}: Container", id.path()));
    }

    #[test]
    fn long_chain_drops_iteratively() {
        let mut id = CallId::new("Query");
        for i in 0..500_000i64 {
            id = id.append(Selector::new("step").nth(i));
        }
        assert_eq!(id.len(), 500_000);
        drop(id);
    }

    #[test]
    fn dropping_a_head_keeps_shared_ancestors() {
        let mut id = CallId::new("Query");
        for _ in 0..1000 {
            id = id.append(Selector::new("step"));
        }
        let middle = id.clone();
        for _ in 0..1000 {
            id = id.append(Selector::new("more"));
        }
        drop(id);
        assert_eq!(middle.len(), 1000);
        assert_eq!(middle.selectors().len(), 1000);
        assert_eq!(middle.head().unwrap().field, "step");
    }

    // -----------------------------------------------------------------------
    // Taint
    // -----------------------------------------------------------------------

    #[test]
    fn untainted_chain() {
        assert!(!alpine().is_tainted());
    }

    #[test]
    fn taint_propagates_upward() {
        let id = alpine()
            .append(Selector::new("withEnvVariable").arg("name", "NOW").tainted())
            .append(Selector::new("withWorkdir").arg("path", "/src"));
        assert!(id.is_tainted());
        assert!(id.receiver().unwrap().is_tainted());
        assert!(!alpine().is_tainted());
    }

    #[test]
    fn taint_counts_meta_steps() {
        let id = alpine().append(Selector::new("withLabel").meta().tainted());
        assert!(id.is_tainted());
    }

    #[test]
    fn taint_flows_from_nested_ids() {
        let clock = CallId::new("Query").select("String", Selector::new("now").tainted());
        let id = alpine().append(Selector::new("withEnvVariable").arg("value", clock));
        assert!(id.is_tainted());
    }

    // -----------------------------------------------------------------------
    // Canonical form
    // -----------------------------------------------------------------------

    #[test]
    fn canonical_strips_meta_selectors() {
        let plain = alpine().append(Selector::new("withWorkdir").arg("path", "/src"));
        let labelled = alpine()
            .append(Selector::new("withDescription").arg("text", "build").meta())
            .append(Selector::new("withWorkdir").arg("path", "/src"))
            .append(Selector::new("withLabel").arg("name", "ci").meta());
        assert_ne!(plain, labelled);
        assert_eq!(labelled.canonical(), plain);
        assert_eq!(
            labelled.canonical_digest().unwrap(),
            plain.canonical_digest().unwrap()
        );
    }

    #[test]
    fn canonical_is_idempotent_and_shares_prefix() {
        let id = alpine().append(Selector::new("withLabel").meta());
        let once = id.canonical();
        let twice = once.canonical();
        assert_eq!(once, twice);
        assert!(Arc::ptr_eq(
            once.head.as_ref().unwrap(),
            twice.head.as_ref().unwrap()
        ));
        // The two steps below the meta step are shared, not copied.
        assert!(Arc::ptr_eq(
            once.head.as_ref().unwrap(),
            alpine_head(&id)
        ));
    }

    fn alpine_head(id: &CallId) -> &Arc<Step> {
        id.head.as_ref().unwrap().parent.as_ref().unwrap()
    }

    #[test]
    fn canonical_recurses_into_nested_ids() {
        let dir = CallId::new("Query").select("Directory", Selector::new("directory"));
        let labelled_dir = dir.append(Selector::new("withLabel").meta());
        let a = alpine().append(Selector::new("withDirectory").arg("source", dir));
        let b = alpine().append(Selector::new("withDirectory").arg("source", labelled_dir));
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
        assert_eq!(a.canonical_digest().unwrap(), b.canonical_digest().unwrap());
    }

    #[test]
    fn meta_head_leaves_typed_tail() {
        let id = alpine().select("Container", Selector::new("withLabel").meta());
        let canon = id.canonical();
        assert_eq!(canon.len(), 2);
        assert_eq!(canon.type_name(), "Container");
    }

    // -----------------------------------------------------------------------
    // Digests
    // -----------------------------------------------------------------------

    #[test]
    fn digest_is_blake3() {
        let d = alpine().digest().unwrap();
        assert_eq!(d.algorithm(), tessera_types::Algorithm::Blake3);
    }

    #[test]
    fn digest_distinguishes_arguments() {
        let a = alpine().append(Selector::new("withExec").arg("args", vec!["ls"]));
        let b = alpine().append(Selector::new("withExec").arg("args", vec!["pwd"]));
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
    }

    #[test]
    fn digest_distinguishes_taint_and_nth() {
        let a = alpine().append(Selector::new("sync"));
        let b = alpine().append(Selector::new("sync").tainted());
        let c = alpine().append(Selector::new("sync").nth(1));
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
        assert_ne!(a.digest().unwrap(), c.digest().unwrap());
    }

    #[test]
    fn digest_rejects_nan() {
        let id = alpine().append(Selector::new("withTimeout").arg("secs", f64::NAN));
        assert!(matches!(id.digest(), Err(CallError::NanFloat { .. })));
    }

    #[test]
    fn digest_rejects_duplicate_arguments() {
        let id = alpine().append(
            Selector::new("withEnvVariable")
                .arg("name", "A")
                .arg("name", "B"),
        );
        assert_eq!(
            id.digest(),
            Err(CallError::DuplicateField {
                path: "withEnvVariable".into(),
                name: "name".into()
            })
        );
    }

    #[test]
    fn inputs_are_deduplicated() {
        let dir = CallId::new("Query").select("Directory", Selector::new("directory"));
        let id = alpine()
            .append(Selector::new("withDirectory").arg("source", dir.clone()))
            .append(Selector::new("withMountedDirectory").arg("source", dir.clone()));
        assert_eq!(id.inputs().unwrap(), vec![dir.digest().unwrap()]);
    }

    // -----------------------------------------------------------------------
    // Equality
    // -----------------------------------------------------------------------

    #[test]
    fn separately_built_chains_are_equal() {
        assert_eq!(alpine(), alpine());
        assert_ne!(alpine(), CallId::new("Query"));
        assert_ne!(CallId::new("Query"), CallId::new("Other"));
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    fn step_strategy() -> impl Strategy<Value = (String, i64, bool)> {
        ("[a-z]{1,8}", any::<i64>(), any::<bool>())
    }

    fn build(steps: &[(String, i64, bool)], meta_after: &[bool], tainted: &[bool]) -> CallId {
        let mut id = CallId::new("Query");
        for (i, (field, n, _)) in steps.iter().enumerate() {
            let mut sel = Selector::new(field.clone()).arg("n", *n);
            if tainted.get(i).copied().unwrap_or(false) {
                sel = sel.tainted();
            }
            id = id.append(sel);
            if meta_after.get(i).copied().unwrap_or(false) {
                id = id.append(Selector::new("label").arg("i", i as i64).meta());
            }
        }
        id
    }

    proptest! {
        #[test]
        fn digest_ignores_meta_steps(
            steps in proptest::collection::vec(step_strategy(), 0..8),
            meta_a in proptest::collection::vec(any::<bool>(), 0..8),
            meta_b in proptest::collection::vec(any::<bool>(), 0..8),
        ) {
            let a = build(&steps, &meta_a, &[]);
            let b = build(&steps, &meta_b, &[]);
            prop_assert_eq!(a.canonical_digest().unwrap(), b.canonical_digest().unwrap());
        }

        #[test]
        fn taint_is_any_tainted_step(
            steps in proptest::collection::vec(step_strategy(), 0..8),
            meta in proptest::collection::vec(any::<bool>(), 0..8),
        ) {
            let tainted: Vec<bool> = steps.iter().map(|s| s.2).collect();
            let id = build(&steps, &meta, &tainted);
            prop_assert_eq!(id.is_tainted(), tainted.iter().any(|t| *t));
        }
    }
}
