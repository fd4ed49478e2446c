//! Proptest generators for property-based testing.

use std::collections::BTreeMap;

use proptest::prelude::*;

use cachescope_core::{
    BigIntValue, DehydratedMutation, DehydratedQuery, DehydratedState, ErrorValue, MutationId,
    MutationState, MutationStatus, QueryKey, QueryState, StorageCategory, Value,
};

/// Latest date generated: 2100-01-01T00:00:00Z.
const MAX_DATE_MILLIS: i64 = 4_102_444_800_000;

/// Generate a finite or special double.
pub fn number() -> impl Strategy<Value = f64> {
    prop_oneof![
        6 => (-1_000_000i64..1_000_000).prop_map(|n| n as f64),
        3 => any::<f64>().prop_filter("finite", |n| n.is_finite()),
        1 => Just(f64::NAN),
        1 => Just(f64::INFINITY),
        1 => Just(f64::NEG_INFINITY),
        1 => Just(-0.0),
    ]
}

/// Generate a timestamp in milliseconds.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..MAX_DATE_MILLIS
}

/// Generate an object key or map string key, possibly empty.
pub fn object_key() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_.\\\\]{0,8}"
}

/// Generate a bigint, including magnitudes past 128 bits.
pub fn bigint() -> impl Strategy<Value = BigIntValue> {
    prop_oneof![
        3 => any::<i128>().prop_map(BigIntValue::from),
        1 => "-?[1-9][0-9]{0,60}".prop_filter_map("decimal digits", |s| BigIntValue::parse(&s)),
    ]
}

/// Generate a leaf value that survives a serialize round trip unchanged.
pub fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Undefined),
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        number().prop_map(Value::Number),
        bigint().prop_map(Value::BigInt),
        ".{0,16}".prop_map(Value::String),
        timestamp().prop_filter_map("representable date", Value::date_millis),
        ("[a-z+*?()\\[\\]/]{0,8}", "[gimsuy]{0,3}")
            .prop_map(|(source, flags)| Value::regexp(source, flags)),
        ("[A-Za-z]{1,12}", ".{0,24}", proptest::option::of(".{0,24}")).prop_map(
            |(name, message, stack)| {
                let mut error = ErrorValue::new(name, message);
                error.stack = stack;
                Value::Error(error)
            }
        ),
    ]
}

/// Generate a nested value graph of bounded depth.
pub fn value() -> impl Strategy<Value = Value> {
    scalar().prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(|items| Value::array(items)),
            prop::collection::btree_map(object_key(), inner.clone(), 0..6)
                .prop_map(|entries| Value::object(entries)),
            prop::collection::vec((inner.clone(), inner.clone()), 0..4)
                .prop_map(|pairs| Value::map(pairs)),
            prop::collection::vec(inner, 0..6).prop_map(|items| Value::set(items)),
        ]
    })
}

/// Generate a value that is never `Undefined` at the top level.
///
/// Query data decodes `undefined` as "no data", so it is excluded here.
pub fn query_data() -> impl Strategy<Value = Value> {
    value().prop_filter("defined", |v| !matches!(v, Value::Undefined))
}

/// Generate a storage category.
pub fn storage_category() -> impl Strategy<Value = StorageCategory> {
    prop_oneof![
        Just(StorageCategory::Mmkv),
        Just(StorageCategory::Async),
        Just(StorageCategory::Secure),
    ]
}

/// Generate a query key: plain, storage-tagged or with an options object.
pub fn query_key() -> impl Strategy<Value = QueryKey> {
    prop_oneof![
        prop::collection::vec("[a-z]{1,8}", 1..4)
            .prop_map(|parts| QueryKey::new(parts.into_iter().map(Value::from))),
        (storage_category(), "[a-zA-Z_]{1,12}")
            .prop_map(|(category, name)| category.key(&name)),
        (
            "[a-z]{1,8}",
            prop::collection::btree_map("[a-z]{1,6}", 0i64..100, 1..4)
        )
            .prop_map(|(name, options)| {
                QueryKey::new([
                    Value::from(name),
                    Value::object(options.into_iter().map(|(k, v)| (k, Value::from(v)))),
                ])
            }),
    ]
}

/// Parameters for generating a dehydrated query.
#[derive(Debug, Clone)]
pub struct QueryParams {
    pub key: QueryKey,
    pub data: Value,
    pub updated_at: i64,
    pub invalidated: bool,
}

impl Arbitrary for QueryParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (query_key(), query_data(), timestamp(), any::<bool>())
            .prop_map(|(key, data, updated_at, invalidated)| QueryParams {
                key,
                data,
                updated_at,
                invalidated,
            })
            .boxed()
    }
}

/// Build a dehydrated query from parameters.
pub fn query_from_params(params: &QueryParams) -> DehydratedQuery {
    let mut state = QueryState::success(params.data.clone(), params.updated_at);
    state.is_invalidated = params.invalidated;
    DehydratedQuery::new(params.key.clone(), state)
}

/// Generate a snapshot with distinct query hashes and a few mutations.
pub fn dehydrated_state() -> impl Strategy<Value = DehydratedState> {
    (
        prop::collection::vec(any::<QueryParams>(), 0..6),
        prop::collection::vec(any::<u64>(), 0..3),
    )
        .prop_map(|(params, mutation_ids)| {
            let mut queries = BTreeMap::new();
            for p in &params {
                let query = query_from_params(p);
                queries.insert(query.query_hash.clone(), query);
            }

            let mut mutations = BTreeMap::new();
            for id in mutation_ids {
                let state = MutationState {
                    status: MutationStatus::Success,
                    ..MutationState::default()
                };
                mutations.insert(id, DehydratedMutation::new(MutationId(id), state));
            }

            DehydratedState {
                mutations: mutations.into_values().collect(),
                queries: queries.into_values().collect(),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachescope_core::{classify, deserialize, hash_query_key, serialize, snapshot_digest};

    proptest! {
        #[test]
        fn test_serialize_round_trip(value in value()) {
            let payload = serialize(&value);
            let decoded = deserialize(&payload).unwrap();
            prop_assert_eq!(decoded, value);
        }

        #[test]
        fn test_payload_survives_json_text(value in value()) {
            let payload = serialize(&value);
            let text = serde_json::to_string(&payload).unwrap();
            let reparsed = serde_json::from_str(&text).unwrap();
            prop_assert_eq!(deserialize(&reparsed).unwrap(), value);
        }

        #[test]
        fn test_query_hash_deterministic(key in query_key()) {
            prop_assert_eq!(hash_query_key(&key), hash_query_key(&key.clone()));
            prop_assert_eq!(classify(&key), classify(&key.clone()));
        }

        #[test]
        fn test_storage_keys_classify(category in storage_category(), name in "[a-zA-Z_]{1,12}") {
            prop_assert_eq!(classify(&category.key(&name)), Some(category));
        }

        #[test]
        fn test_snapshot_payload_round_trip(state in dehydrated_state()) {
            let payload = state.to_payload();
            let decoded = DehydratedState::from_payload(&payload).unwrap();

            prop_assert_eq!(decoded.queries.len(), state.queries.len());
            prop_assert_eq!(decoded.mutations.len(), state.mutations.len());
            for (a, b) in decoded.queries.iter().zip(&state.queries) {
                prop_assert_eq!(&a.query_hash, &b.query_hash);
                prop_assert_eq!(&a.state.data, &b.state.data);
                prop_assert_eq!(a.state.is_invalidated, b.state.is_invalidated);
            }
            prop_assert_eq!(snapshot_digest(&state.to_payload()), snapshot_digest(&payload));
        }
    }
}
