//! Deterministic binary encoding of call chains.
//!
//! The wire form is a flat root-to-head list of steps, encoded with bincode
//! using fixed-width little-endian integers. It contains no maps, so the same
//! chain always produces the same bytes.

use bincode::Options;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{CallError, CallResult};
use crate::id::{CallId, Selector};

/// Upper bound on a decoded call encoding.
pub const MAX_WIRE_SIZE: u64 = 16 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireCall {
    pub(crate) root_type: String,
    pub(crate) steps: Vec<WireStep>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireStep {
    pub(crate) type_name: String,
    pub(crate) selector: Selector,
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_WIRE_SIZE)
}

/// Encode a call chain.
///
/// Fails if the chain contains a value without a single deterministic
/// encoding (a NaN float, duplicate argument names).
pub fn encode_wire(id: &CallId) -> CallResult<Vec<u8>> {
    id.validate()?;
    options()
        .serialize(id)
        .map_err(|e| CallError::Serialization(e.to_string()))
}

/// Decode a call chain produced by [`encode_wire`].
///
/// Trailing bytes are rejected.
pub fn decode_wire(bytes: &[u8]) -> CallResult<CallId> {
    let id: CallId = options()
        .deserialize(bytes)
        .map_err(|e| CallError::Deserialization(e.to_string()))?;
    trace!(steps = id.len(), "decoded call chain");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::literal::{Argument, Literal, MAX_NESTING_DEPTH};
    use proptest::prelude::*;
    use tessera_types::Digest;

    fn sample() -> CallId {
        let src = CallId::new("Query")
            .select("Directory", Selector::new("host"))
            .select(
                "Directory",
                Selector::new("directory").arg("path", ".").tainted(),
            );
        CallId::new("Query")
            .select("Container", Selector::new("container"))
            .append(Selector::new("from").arg("address", "alpine"))
            .append(
                Selector::new("withDirectory")
                    .arg("path", "/src")
                    .arg("source", src)
                    .arg(
                        "opts",
                        Literal::Object(vec![
                            Argument::new("exclude", vec!["target"]),
                            Argument::new("owner", Literal::Null),
                            Argument::new("mode", 0o755i64),
                            Argument::new("ratio", 0.5f64),
                        ]),
                    ),
            )
            .append(Selector::new("withLabel").arg("name", "x").meta())
            .append(Selector::new("withEntrypoint").arg(
                "pin",
                Digest::parse(
                    "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
                )
                .unwrap(),
            ))
    }

    #[test]
    fn decode_restores_structure() {
        let id = sample();
        let bytes = encode_wire(&id).unwrap();
        let back = decode_wire(&bytes).unwrap();
        assert_eq!(back, id);
        assert!(back.is_tainted());
        assert_eq!(back.type_name(), "Container");
        assert_eq!(back.digest().unwrap(), id.digest().unwrap());
    }

    #[test]
    fn encoding_is_pure() {
        assert_eq!(encode_wire(&sample()).unwrap(), encode_wire(&sample()).unwrap());
    }

    #[test]
    fn truncated_input_is_rejected() {
        let bytes = encode_wire(&sample()).unwrap();
        let err = decode_wire(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, CallError::Deserialization(_)));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = encode_wire(&sample()).unwrap();
        bytes.push(0);
        assert!(decode_wire(&bytes).is_err());
    }

    /// Hand-built wire bytes for `Q.f(a: <value>)` where the value is a list
    /// nested `depth` times around a null.
    fn nested_list_bytes(depth: usize) -> Vec<u8> {
        fn string(out: &mut Vec<u8>, s: &str) {
            out.extend_from_slice(&(s.len() as u64).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        let mut out = Vec::new();
        string(&mut out, "Q");
        out.extend_from_slice(&1u64.to_le_bytes());
        string(&mut out, "Q");
        string(&mut out, "f");
        out.extend_from_slice(&1u64.to_le_bytes());
        string(&mut out, "a");
        for _ in 0..depth {
            out.extend_from_slice(&8u32.to_le_bytes());
            out.extend_from_slice(&1u64.to_le_bytes());
        }
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0i64.to_le_bytes());
        out.extend_from_slice(&[0, 0]);
        out
    }

    #[test]
    fn shallow_nesting_decodes() {
        let id = decode_wire(&nested_list_bytes(3)).unwrap();
        let expected = CallId::new("Q").append(Selector::new("f").arg(
            "a",
            Literal::List(vec![Literal::List(vec![Literal::List(vec![Literal::Null])])]),
        ));
        assert_eq!(id, expected);
    }

    #[test]
    fn deep_nesting_is_a_decode_error() {
        let err = decode_wire(&nested_list_bytes(1_000_000)).unwrap_err();
        assert!(matches!(err, CallError::Deserialization(_)));
        // The depth counter is released after a failed decode.
        assert!(decode_wire(&nested_list_bytes(MAX_NESTING_DEPTH - 1)).is_ok());
    }

    #[test]
    fn encoding_rejects_what_decoding_would() {
        let mut lit = Literal::Null;
        for _ in 0..MAX_NESTING_DEPTH {
            lit = Literal::List(vec![lit]);
        }
        let id = CallId::new("Q").append(Selector::new("f").arg("a", lit));
        assert!(matches!(
            encode_wire(&id),
            Err(CallError::NestingTooDeep { .. })
        ));
    }

    #[test]
    fn long_chain_round_trips() {
        let mut id = CallId::new("Query");
        for _ in 0..200_000 {
            id = id.append(Selector::new("f"));
        }
        let back = decode_wire(&encode_wire(&id).unwrap()).unwrap();
        assert_eq!(back.len(), 200_000);
    }

    #[test]
    fn empty_chain_encodes() {
        let id = CallId::new("Container");
        assert_eq!(decode_wire(&encode_wire(&id).unwrap()).unwrap(), id);
    }

    proptest! {
        #[test]
        fn arbitrary_scalar_chains_survive(
            fields in proptest::collection::vec("[a-zA-Z]{1,10}", 0..6),
            ints in proptest::collection::vec(any::<i64>(), 6),
            text in ".{0,20}",
            flags in proptest::collection::vec(any::<(bool, bool)>(), 6),
        ) {
            let mut id = CallId::new("Query");
            for (i, field) in fields.iter().enumerate() {
                let mut sel = Selector::new(field.clone())
                    .arg("n", ints[i])
                    .arg("s", text.clone());
                if flags[i].0 { sel = sel.tainted(); }
                if flags[i].1 { sel = sel.meta(); }
                id = id.append(sel);
            }
            let back = decode_wire(&encode_wire(&id).unwrap()).unwrap();
            prop_assert_eq!(&back, &id);
            prop_assert_eq!(back.is_tainted(), id.is_tainted());
        }
    }
}
