fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use blockfetch_protocol::{
        BlockRequest, BlockResponse, decode_request, decode_response, encode_request,
        encode_response,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> Vec<u8> {
        let path = fixtures_dir().join(name);
        fs::read(&path).unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_slice(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Drops `null` object members.
    ///
    /// Legacy servers write an absent byte slice as `"content": null`;
    /// we omit the key. Both decode to the same value.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Object(map) => {
                let normalized: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect();
                serde_json::Value::Object(normalized)
            }
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent, null-normalized comparison).
    fn roundtrip_test<T>(name: &str)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  ours:    {reserialized}"
        );
    }

    // --- Requests ---

    #[test]
    fn fixture_block_request() {
        roundtrip_test::<BlockRequest>("block_request.json");

        let req = decode_request(&read_fixture("block_request.json")).unwrap();
        assert_eq!(req, BlockRequest::range(1024, 2048));
        assert_eq!(req.len(), 1024);
        assert!(!req.is_size_probe());
    }

    #[test]
    fn fixture_size_probe_request() {
        roundtrip_test::<BlockRequest>("size_probe_request.json");

        let req = decode_request(&read_fixture("size_probe_request.json")).unwrap();
        assert!(req.is_size_probe());
        assert_eq!(req, BlockRequest::size_probe());
    }

    #[test]
    fn fixture_block_request_with_id() {
        roundtrip_test::<BlockRequest>("block_request_with_id.json");

        let req = decode_request(&read_fixture("block_request_with_id.json")).unwrap();
        assert_eq!(req.id, Some(42));
    }

    #[test]
    fn request_without_id_encodes_legacy_shape() {
        let encoded = encode_request(&BlockRequest::range(1024, 2048)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value, load_fixture("block_request.json"));
    }

    // --- Responses ---

    #[test]
    fn fixture_size_response() {
        roundtrip_test::<BlockResponse>("size_response.json");

        let resp = decode_response(&read_fixture("size_response.json")).unwrap();
        assert!(resp.is_file_size());
        assert!(resp.content.is_none());
        assert_eq!((resp.start, resp.end), (2500, 2500));
        assert!(resp.answers(&BlockRequest::size_probe()));
    }

    #[test]
    fn fixture_block_response() {
        roundtrip_test::<BlockResponse>("block_response.json");

        let resp = decode_response(&read_fixture("block_response.json")).unwrap();
        assert_eq!(resp.content.as_deref(), Some(&b"hello world"[..]));
        assert!(resp.verify_hash());
        assert!(resp.answers(&BlockRequest::range(0, 11)));
        assert!(!resp.answers(&BlockRequest::range(0, 12)));
    }

    #[test]
    fn fixture_empty_block_response() {
        roundtrip_test::<BlockResponse>("empty_block_response.json");

        let resp = decode_response(&read_fixture("empty_block_response.json")).unwrap();
        assert_eq!(resp.content, Some(Vec::new()));
        assert!(resp.verify_hash());
    }

    #[test]
    fn fixture_block_response_with_id() {
        roundtrip_test::<BlockResponse>("block_response_with_id.json");

        let resp = decode_response(&read_fixture("block_response_with_id.json")).unwrap();
        assert!(resp.answers(&BlockRequest::range(0, 11).with_id(42)));
        assert!(!resp.answers(&BlockRequest::range(0, 11).with_id(41)));
    }

    #[test]
    fn response_without_id_answers_request_with_id() {
        let resp = decode_response(&read_fixture("block_response.json")).unwrap();
        assert!(resp.answers(&BlockRequest::range(0, 11).with_id(7)));
    }

    #[test]
    fn encoded_content_response_matches_fixture() {
        let resp = BlockResponse::content(&BlockRequest::range(0, 11), b"hello world".to_vec());
        let encoded = encode_response(&resp).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value, load_fixture("block_response.json"));
    }
}
