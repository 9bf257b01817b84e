// tests/backend_helpers.rs

use gendag::backend::comfy::{fill_template, view_url};
use gendag::backend::{decode_data_uri, encode_data_uri, strip_data_uri_prefix, ComfyClient};
use serde_json::{json, Map, Value};

#[test]
fn strip_data_uri_prefix_only_touches_data_uris() {
    assert_eq!(strip_data_uri_prefix("data:image/png;base64,AAAA"), "AAAA");
    assert_eq!(strip_data_uri_prefix("data:video/mp4;codecs=avc1;base64,BBBB"), "BBBB");
    assert_eq!(strip_data_uri_prefix("data:,plain"), "plain");
    assert_eq!(strip_data_uri_prefix("AAAA"), "AAAA");
    assert_eq!(strip_data_uri_prefix("out/data:thing.png"), "out/data:thing.png");
}

#[test]
fn data_uris_encode_and_decode() {
    let uri = encode_data_uri("image/png", b"frame");
    assert!(uri.starts_with("data:image/png;base64,"));
    assert_eq!(decode_data_uri(&uri).expect("valid base64"), b"frame".to_vec());
    assert!(decode_data_uri("data:image/png;base64,@@@").is_err());
}

#[test]
fn view_url_splits_subfolder_and_encodes() {
    assert_eq!(
        view_url("http://h:8188/", "renders/day 1/clip.mp4"),
        "http://h:8188/view?filename=clip.mp4&subfolder=renders%2Fday%201&type=output"
    );
    assert_eq!(
        view_url("http://h:8188", "clip.mp4"),
        "http://h:8188/view?filename=clip.mp4&subfolder=&type=output"
    );

    let client = ComfyClient::new("http://h:8188/");
    assert_eq!(client.view_url("a/b.png"), view_url("http://h:8188", "a/b.png"));
}

#[test]
fn fill_template_replaces_whole_values_with_typed_inputs() {
    let mut inputs = Map::new();
    inputs.insert("prompt".to_string(), json!("a red fox"));
    inputs.insert("seed".to_string(), json!(42));
    inputs.insert("scale".to_string(), json!(1.5));

    let template = json!({
        "3": { "inputs": { "seed": "{{seed}}", "text": "{{ prompt }}" } },
        "7": { "inputs": { "caption": "shot of {{prompt}} (seed {{seed}})", "scale": "{{scale}}" } },
        "9": { "inputs": { "untouched": "{{missing}}", "list": ["{{seed}}", 3] } }
    });

    let filled = fill_template(template, &inputs);

    assert_eq!(filled["3"]["inputs"]["seed"], json!(42));
    assert_eq!(filled["3"]["inputs"]["text"], json!("a red fox"));
    assert_eq!(filled["7"]["inputs"]["caption"], json!("shot of a red fox (seed 42)"));
    assert_eq!(filled["7"]["inputs"]["scale"], json!(1.5));
    assert_eq!(filled["9"]["inputs"]["untouched"], json!("{{missing}}"));
    assert_eq!(filled["9"]["inputs"]["list"], json!([42, 3]));
}

#[test]
fn fill_template_leaves_non_strings_alone() {
    let inputs = Map::new();
    let template = json!({ "n": 1, "b": true, "z": null });
    assert_eq!(fill_template(template.clone(), &inputs), template);
    assert_eq!(fill_template(Value::Null, &inputs), Value::Null);
}
