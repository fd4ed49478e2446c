//! Golden payload vectors.
//!
//! Each vector pins the exact `{ json, meta }` a value must serialize to, so
//! that a remote serializer written elsewhere can be checked against this one.

use serde::Serialize;

use cachescope_core::{
    deserialize, hash_query_key, serialize, BigIntValue, ErrorValue, Path, QueryKey,
    SerializedPayload, Value,
};

/// A golden payload vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Builds the input value.
    pub build: fn() -> Value,
    /// Expected `json` part, as JSON text.
    pub expected_json: &'static str,
    /// Expected `meta.values` entries: path, tag.
    pub expected_tags: &'static [(&'static str, &'static str)],
    /// Expected `meta.referentialEqualities` entries: target, sites.
    pub expected_refs: &'static [(&'static str, &'static [&'static str])],
}

/// A golden query-key hash.
#[derive(Debug, Clone)]
pub struct HashVector {
    pub name: &'static str,
    pub build: fn() -> QueryKey,
    pub expected_hash: &'static str,
}

/// Outcome of checking one vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VectorResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// Get all golden payload vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "plain json passes through",
            build: || {
                Value::object([
                    ("a", Value::from(1)),
                    (
                        "b",
                        Value::array([Value::from(true), Value::Null, Value::from("x")]),
                    ),
                ])
            },
            expected_json: r#"{"a":1,"b":[true,null,"x"]}"#,
            expected_tags: &[],
            expected_refs: &[],
        },
        GoldenVector {
            name: "undefined and date",
            build: || {
                Value::object([
                    ("d", Value::date_millis(0).unwrap_or(Value::Null)),
                    ("u", Value::Undefined),
                ])
            },
            expected_json: r#"{"d":"1970-01-01T00:00:00.000Z","u":null}"#,
            expected_tags: &[("d", "Date"), ("u", "undefined")],
            expected_refs: &[],
        },
        GoldenVector {
            name: "special numbers and bigint",
            build: || {
                Value::array([
                    Value::Number(f64::NAN),
                    Value::Number(-0.0),
                    Value::Number(f64::INFINITY),
                    Value::Number(f64::NEG_INFINITY),
                    Value::BigInt(BigIntValue::from(10i64)),
                ])
            },
            expected_json: r#"["NaN","-0","Infinity","-Infinity","10"]"#,
            expected_tags: &[
                ("0", "number"),
                ("1", "number"),
                ("2", "number"),
                ("3", "number"),
                ("4", "bigint"),
            ],
            expected_refs: &[],
        },
        GoldenVector {
            name: "map and set",
            build: || {
                Value::array([
                    Value::map([(Value::from("k"), Value::from(1))]),
                    Value::set([Value::from(1), Value::from(2)]),
                ])
            },
            expected_json: r#"[[["k",1]],[1,2]]"#,
            expected_tags: &[("0", "map"), ("1", "set")],
            expected_refs: &[],
        },
        GoldenVector {
            name: "error and regexp",
            build: || {
                Value::object([
                    ("e", Value::Error(ErrorValue::new("TypeError", "boom"))),
                    ("r", Value::regexp("a+", "gi")),
                ])
            },
            expected_json: r#"{"e":{"message":"boom","name":"TypeError"},"r":"/a+/gi"}"#,
            expected_tags: &[("e", "Error"), ("r", "regexp")],
            expected_refs: &[],
        },
        GoldenVector {
            name: "shared container",
            build: || {
                let shared = Value::array([Value::from(1)]);
                Value::object([("a", shared.clone()), ("b", shared)])
            },
            expected_json: r#"{"a":[1],"b":null}"#,
            expected_tags: &[],
            expected_refs: &[("a", &["b"])],
        },
        GoldenVector {
            name: "cycle to root",
            build: || Value::object([("self", Value::Ref(Path::root()))]),
            expected_json: r#"{"self":null}"#,
            expected_tags: &[],
            expected_refs: &[("", &["self"])],
        },
        GoldenVector {
            name: "unsupported becomes placeholder",
            build: || Value::object([("f", Value::Unsupported("function".into()))]),
            expected_json: r#"{"f":"function"}"#,
            expected_tags: &[("f", "placeholder")],
            expected_refs: &[],
        },
        GoldenVector {
            name: "dotted key is escaped",
            build: || Value::object([("a.b", Value::Undefined)]),
            expected_json: r#"{"a.b":null}"#,
            expected_tags: &[("a\\.b", "undefined")],
            expected_refs: &[],
        },
        GoldenVector {
            name: "empty key is not the root",
            build: || Value::object([("", Value::Undefined)]),
            expected_json: r#"{"":null}"#,
            expected_tags: &[("\\_", "undefined")],
            expected_refs: &[],
        },
        GoldenVector {
            name: "bigint past 128 bits",
            build: || {
                let digits = [
                    "340282366920938463463374607431768211456",
                    "-1000000000000000000000000000000000000000001",
                ];
                Value::array(
                    digits
                        .into_iter()
                        .filter_map(BigIntValue::parse)
                        .map(Value::BigInt),
                )
            },
            expected_json: r#"["340282366920938463463374607431768211456","-1000000000000000000000000000000000000000001"]"#,
            expected_tags: &[("0", "bigint"), ("1", "bigint")],
            expected_refs: &[],
        },
    ]
}

/// Get all golden query-key hashes.
pub fn hash_vectors() -> Vec<HashVector> {
    vec![
        HashVector {
            name: "string segments",
            build: || QueryKey::from(["todos", "list"]),
            expected_hash: r#"["todos","list"]"#,
        },
        HashVector {
            name: "object keys sorted",
            build: || {
                QueryKey::new([
                    Value::from("todos"),
                    Value::object([("page", Value::from(1)), ("filter", Value::from("done"))]),
                ])
            },
            expected_hash: r#"["todos",{"filter":"done","page":1}]"#,
        },
        HashVector {
            name: "undefined dropped from objects",
            build: || {
                QueryKey::new([
                    Value::Undefined,
                    Value::object([("gone", Value::Undefined), ("kept", Value::Null)]),
                ])
            },
            expected_hash: r#"[null,{"kept":null}]"#,
        },
        HashVector {
            name: "storage key",
            build: || QueryKey::from(["#storage", "mmkv", "token"]),
            expected_hash: r##"["#storage","mmkv","token"]"##,
        },
    ]
}

/// Check one payload vector: exact encoding, then a lossless decode.
pub fn verify_vector(vector: &GoldenVector) -> VectorResult {
    let value = (vector.build)();
    let payload = serialize(&value);
    let detail = match check_payload(vector, &payload) {
        Err(detail) => detail,
        Ok(()) => match deserialize(&payload) {
            Ok(decoded) if decoded == value => String::new(),
            Ok(decoded) => format!("decoded {:?}, want {:?}", decoded, value),
            Err(e) => format!("decode failed: {}", e),
        },
    };
    VectorResult {
        name: vector.name.to_string(),
        passed: detail.is_empty(),
        detail,
    }
}

fn check_payload(vector: &GoldenVector, payload: &SerializedPayload) -> Result<(), String> {
    let expected: serde_json::Value = serde_json::from_str(vector.expected_json)
        .map_err(|e| format!("bad expected json: {}", e))?;
    if payload.json != expected {
        return Err(format!("json {}, want {}", payload.json, expected));
    }

    let meta = payload.meta.clone().unwrap_or_default();
    let tags: Vec<(String, &str)> = meta
        .values
        .iter()
        .map(|(path, tag)| (path.clone(), tag.as_str()))
        .collect();
    let want_tags: Vec<(String, &str)> = vector
        .expected_tags
        .iter()
        .map(|(path, tag)| (path.to_string(), *tag))
        .collect();
    if tags != want_tags {
        return Err(format!("tags {:?}, want {:?}", tags, want_tags));
    }

    let want_refs: Vec<(String, Vec<String>)> = vector
        .expected_refs
        .iter()
        .map(|(target, sites)| {
            (
                target.to_string(),
                sites.iter().map(|s| s.to_string()).collect(),
            )
        })
        .collect();
    let refs: Vec<(String, Vec<String>)> = meta.referential_equalities.into_iter().collect();
    if refs != want_refs {
        return Err(format!("refs {:?}, want {:?}", refs, want_refs));
    }
    Ok(())
}

/// Check every payload and hash vector.
pub fn verify_all_vectors() -> Vec<VectorResult> {
    let mut results: Vec<VectorResult> = all_vectors().iter().map(verify_vector).collect();
    for vector in hash_vectors() {
        let hash = hash_query_key(&(vector.build)());
        let passed = hash.as_str() == vector.expected_hash;
        results.push(VectorResult {
            name: vector.name.to_string(),
            passed,
            detail: if passed {
                String::new()
            } else {
                format!("hash {}, want {}", hash, vector.expected_hash)
            },
        });
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_vectors_pass() {
        for result in verify_all_vectors() {
            assert!(result.passed, "{}: {}", result.name, result.detail);
        }
    }

    #[test]
    fn test_vector_names_unique() {
        let mut names: Vec<_> = all_vectors().iter().map(|v| v.name).collect();
        names.extend(hash_vectors().iter().map(|v| v.name));
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_plain_json_has_no_meta() {
        let payload = serialize(&(all_vectors()[0].build)());
        assert!(payload.meta.is_none());
    }

    #[test]
    fn test_mismatch_is_reported() {
        let mut vector = all_vectors()[0].clone();
        vector.expected_json = r#"{"a":2}"#;
        let result = verify_vector(&vector);
        assert!(!result.passed);
        assert!(result.detail.starts_with("json"));
    }

    #[test]
    fn test_results_serialize() {
        let json = serde_json::to_value(verify_all_vectors()).unwrap();
        assert!(json.as_array().is_some_and(|a| !a.is_empty()));
    }
}
