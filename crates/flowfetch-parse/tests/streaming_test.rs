use std::collections::VecDeque;

use flowfetch_parse::{
    EventData, FramePipeline, JsonObjectParser, NdJsonParser, OverflowPolicy, ParseErrorPolicy,
    PipelineConfig, SseDataParser, SseOptions, SseParser,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize, PartialEq)]
struct Chunk {
    id: String,
    delta: String,
}

const OPENAI_STYLE: &str = "\
: stream opened\n\
\n\
data: {\"id\":\"c1\",\"delta\":\"Hel\"}\n\
\n\
data: {\"id\":\"c1\",\"delta\":\"lo\"}\n\
\n\
data: [DONE]\n\
\n\
data: {\"id\":\"c1\",\"delta\":\"ignored\"}\n\
\n";

fn drive<P: flowfetch_parse::FrameParser>(
    parser: P,
    chunks: &[&[u8]],
    config: &PipelineConfig,
) -> flowfetch_parse::Result<Vec<P::Item>> {
    let mut pipeline = FramePipeline::new(parser, config);
    let mut out = VecDeque::new();
    for chunk in chunks {
        pipeline.push(chunk, &mut out)?;
    }
    pipeline.finish(&mut out)?;
    Ok(out.into())
}

#[test]
fn test_openai_style_stream_stops_at_done() {
    let body = OPENAI_STYLE.as_bytes();
    let chunks: Vec<&[u8]> = body.chunks(7).collect();

    let parser = SseDataParser::<Chunk>::new(SseOptions::default(), ParseErrorPolicy::Fail);
    let items = drive(parser, &chunks, &PipelineConfig::default()).unwrap();

    let text: String = items.iter().map(|c| c.delta.as_str()).collect();
    assert_eq!(text, "Hello");
    assert_eq!(items.len(), 2);
}

#[test]
fn test_sse_events_across_awkward_boundaries() {
    let chunks: [&[u8]; 5] = [b"event: upd", b"ate\r", b"\nid: 4", b"2\r\ndata: {\"ok\":tr", b"ue}\r\n\r\n"];
    let events = drive(SseParser::default(), &chunks, &PipelineConfig::default()).unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "update");
    assert_eq!(events[0].id, "42");
    assert_eq!(events[0].data, EventData::Json(json!({"ok": true})));
}

#[test]
fn test_ndjson_with_oversized_line_skipped() {
    let config = PipelineConfig {
        max_frame_len: 16,
        overflow: OverflowPolicy::Skip,
        ..Default::default()
    };
    let chunks: [&[u8]; 3] = [b"{\"a\":1}\n{\"pad\":\"", b"xxxxxxxxxxxxxxxxxxxxxxxx\"}\n", b"{\"a\":2}\n"];
    let items = drive(NdJsonParser::<Value>::default(), &chunks, &config).unwrap();
    assert_eq!(items, vec![json!({"a": 1}), json!({"a": 2})]);
}

#[test]
fn test_json_objects_one_byte_at_a_time() {
    let body = br#"{"id":"a","delta":"{"} {"id":"b","delta":"}"}"#;
    let chunks: Vec<&[u8]> = body.chunks(1).collect();
    let items = drive(JsonObjectParser::<Chunk>::default(), &chunks, &PipelineConfig::default()).unwrap();

    assert_eq!(
        items,
        vec![
            Chunk { id: "a".into(), delta: "{".into() },
            Chunk { id: "b".into(), delta: "}".into() },
        ]
    );
}
