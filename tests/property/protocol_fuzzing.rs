use mcp_stdio_client::protocol::{
    decode, decode_incoming, encode, Params, Request, Response, RpcError,
};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Largest id a JSON number can carry without loss in most peers.
const MAX_SAFE_ID: u64 = (1 << 53) - 1;

fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        // Unicode, HTML, quotes and control characters all need escaping.
        any::<String>().prop_map(Value::from),
        "<[a-z]{1,8}>&\"'\\\\\n\t".prop_map(Value::from),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    json_leaf().prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::from),
            prop::collection::btree_map("[a-zA-Z_]{1,12}", inner, 0..8)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

fn params() -> impl Strategy<Value = Params> {
    prop::collection::btree_map(any::<String>(), json_value(), 0..6)
        .prop_map(|map| map.into_iter().collect())
}

proptest! {
    #[test]
    fn test_encoded_request_is_one_line(
        id in 1..=MAX_SAFE_ID,
        method in "[a-zA-Z][a-zA-Z0-9_/]{0,30}",
        params in params(),
    ) {
        let line = encode(&Request::new(id, method.clone(), Some(params.clone()))).unwrap();

        prop_assert!(line.ends_with('\n'));
        prop_assert_eq!(line.matches('\n').count(), 1);

        let back: Request = serde_json::from_str(&line).unwrap();
        prop_assert_eq!(back.id, id);
        prop_assert_eq!(back.method, method);
        prop_assert_eq!(back.params, Some(params));
    }

    #[test]
    fn test_response_payloads_survive_the_wire(
        id in 0..=MAX_SAFE_ID,
        result in params(),
    ) {
        let line = serde_json::to_string(&Response::success(id, result.clone())).unwrap();
        let response = decode(&line).unwrap();

        prop_assert_eq!(response.id, id);
        prop_assert_eq!(response.into_result().unwrap(), result);
    }

    #[test]
    fn test_error_payloads_survive_the_wire(
        id in 0..=MAX_SAFE_ID,
        code in any::<i64>(),
        message in any::<String>(),
        // A null `data` reads back as absent.
        data in proptest::option::of(json_value().prop_filter("non-null", |v| !v.is_null())),
    ) {
        let error = RpcError { code, message, data };
        let line = serde_json::to_string(&Response::failure(id, error.clone())).unwrap();

        let decoded = decode(&line).unwrap();
        prop_assert_eq!(decoded.id, id);
        prop_assert_eq!(decoded.error, Some(error));
    }

    #[test]
    fn test_decode_never_panics_on_arbitrary_text(line in any::<String>()) {
        let _ = decode(&line);
        let _ = decode_incoming(&line);
    }

    #[test]
    fn test_decode_never_panics_on_arbitrary_json(value in json_value()) {
        let line = value.to_string();
        if let Err(err) = decode_incoming(&line) {
            prop_assert!(!err.reason.is_empty());
        }
    }

    #[test]
    fn test_mangled_responses_are_rejected_not_misrouted(
        id in 0..=MAX_SAFE_ID,
        field in prop_oneof![Just("jsonrpc"), Just("id")],
    ) {
        let mut frame = json!({"jsonrpc": "2.0", "result": {}, "id": id});
        frame.as_object_mut().unwrap().remove(field);

        prop_assert!(decode(&frame.to_string()).is_err());
    }
}
