use std::sync::Arc;
use utpl::dom::{Deferred, DomElement, RecordingDomSink};
use utpl::handlers::Handler;
use utpl::{Map, Value, Writer};

fn map(entries: &[(&str, Value)]) -> Value {
    let mut m = Map::new();
    for (k, v) in entries {
        m.insert(k.to_string(), v.clone());
    }
    Value::Map(m)
}

#[test]
fn test_custom_leaf_handler() {
    let w = Writer::new();
    let upper: Handler = Arc::new(|token, ctx, _writer| {
        Some(ctx.lookup(token.payload()).to_display().to_uppercase())
    });
    assert!(w.add_token_handler("upper", false, upper));
    w.parse("t", "{{upper name}}!");
    assert_eq!(
        w.render_value("t", map(&[("name", Value::Str("abc".into()))]))
            .unwrap(),
        "ABC!"
    );
}

#[test]
fn test_custom_section_handler_nests_and_renders() {
    let w = Writer::new();
    let wrap: Handler = Arc::new(|token, ctx, writer| {
        let children = token.children()?;
        Some(format!("<b>{}</b>", writer.render_tokens(children, ctx)))
    });
    assert!(w.add_token_handler("wrap", true, wrap));
    w.parse("t", "{{wrap x}}{{name}}{{/wrap}}");
    assert_eq!(
        w.render_value("t", map(&[("name", Value::Str("abc".into()))]))
            .unwrap(),
        "<b>abc</b>"
    );
}

#[test]
fn test_handler_conflict_keeps_builtin() {
    let w = Writer::new();
    let noop: Handler = Arc::new(|_, _, _| None);
    assert!(!w.add_token_handler("if", true, noop));
    // 原有 if 语义不受影响
    w.parse("t", "{{if x}}y{{/if}}");
    assert_eq!(
        w.render_value("t", map(&[("x", Value::Bool(true))])).unwrap(),
        "y"
    );
}

#[test]
fn test_delimiter_override() {
    let w = Writer::new();
    w.set_tags("<%", "%>").unwrap();
    w.parse("t", "<%if ok%>Y<%/if%>-<%name%>");
    let view = map(&[
        ("ok", Value::Bool(true)),
        ("name", Value::Str("n".into())),
    ]);
    assert_eq!(w.render_value("t", view).unwrap(), "Y-n");
}

#[test]
fn test_escape_replacement() {
    let w = Writer::new();
    w.set_escape(|v| v.to_display());
    w.parse("t", "{{v}}");
    assert_eq!(
        w.render_value("t", map(&[("v", Value::Str("<b>".into()))]))
            .unwrap(),
        "<b>"
    );
}

#[test]
fn test_register_host_function() {
    let w = Writer::new();
    w.register_host(
        "shout",
        Value::func(|_, args| {
            Ok(Value::Str(
                args.first()
                    .map(Value::to_display)
                    .unwrap_or_default()
                    .to_uppercase(),
            ))
        }),
    );
    w.parse("t", "{{>>shout(name)}}");
    assert_eq!(
        w.render_value("t", map(&[("name", Value::Str("hey".into()))]))
            .unwrap(),
        "HEY"
    );
}

struct Para;

impl DomElement for Para {
    fn outer_html(&self) -> String {
        "<p>hi</p>".to_string()
    }
}

#[test]
fn test_html_serializes_dom_element() {
    let w = Writer::new();
    w.parse("t", "{{html el}}");
    let view = map(&[("el", Value::Elem(Arc::new(Para)))]);
    assert_eq!(w.render_value("t", view).unwrap(), "<p>hi</p>");
}

#[test]
fn test_promise_placeholder_and_substitution() {
    let w = Writer::new();
    let sink = Arc::new(RecordingDomSink::new());
    w.set_dom_sink(sink.clone());
    w.parse("t", "{{promise items}}[{{$}}]{{/promise}}");

    let d = Deferred::new();
    let out = w
        .render_value("t", map(&[("items", Value::Deferred(d.clone()))]))
        .unwrap();
    assert_eq!(out, "<template id=\"latePromise-0\"></template>");
    assert!(sink.calls().is_empty());

    // 决议后：列表的每个元素各渲染一遍子节点，写回占位元素
    d.resolve(Value::List(vec![Value::I64(1), Value::I64(2)]));
    assert_eq!(
        sink.calls(),
        vec![("latePromise-0".to_string(), "[1][2]".to_string())]
    );
}

#[test]
fn test_promise_outer_names_survive_resolution() {
    let w = Writer::new();
    let sink = Arc::new(RecordingDomSink::new());
    w.set_dom_sink(sink.clone());
    w.parse("t", "{{promise xs}}{{title}}:{{$}};{{/promise}}");

    let d = Deferred::new();
    let view = map(&[
        ("title", Value::Str("T".into())),
        ("xs", Value::Deferred(d.clone())),
    ]);
    w.render_value("t", view).unwrap();
    d.resolve(Value::List(vec![Value::I64(1), Value::I64(2)]));
    assert_eq!(
        sink.calls(),
        vec![("latePromise-0".to_string(), "T:1;T:2;".to_string())]
    );
}

#[test]
fn test_promise_non_list_resolution() {
    let w = Writer::new();
    let sink = Arc::new(RecordingDomSink::new());
    w.set_dom_sink(sink.clone());
    w.parse("t", "{{promise x}}[{{$}}]{{/promise}}");

    let d = Deferred::new();
    w.render_value("t", map(&[("x", Value::Deferred(d.clone()))]))
        .unwrap();
    d.resolve(Value::Str("hi".into()));
    assert_eq!(
        sink.calls(),
        vec![("latePromise-0".to_string(), "[hi]".to_string())]
    );
}

#[test]
fn test_promise_ids_are_independent() {
    let w = Writer::new();
    let sink = Arc::new(RecordingDomSink::new());
    w.set_dom_sink(sink.clone());
    w.parse("t", "{{promise a}}A{{$}}{{/promise}}{{promise b}}B{{$}}{{/promise}}");

    let da = Deferred::new();
    let db = Deferred::new();
    let view = map(&[
        ("a", Value::Deferred(da.clone())),
        ("b", Value::Deferred(db.clone())),
    ]);
    let out = w.render_value("t", view).unwrap();
    assert_eq!(
        out,
        "<template id=\"latePromise-0\"></template><template id=\"latePromise-1\"></template>"
    );
    // 决议顺序与渲染顺序无关，各自写回自己的占位
    db.resolve(Value::I64(2));
    da.resolve(Value::I64(1));
    assert_eq!(
        sink.calls(),
        vec![
            ("latePromise-1".to_string(), "B2".to_string()),
            ("latePromise-0".to_string(), "A1".to_string()),
        ]
    );
}

#[test]
fn test_promise_on_non_deferred_reports_and_emits_empty() {
    let w = Writer::new();
    w.parse("t", "a{{promise n}}x{{/promise}}b");
    assert_eq!(w.render_value("t", map(&[("n", Value::I64(1))])).unwrap(), "ab");
}

#[test]
fn test_promise_rejection_clears_placeholder() {
    let w = Writer::new();
    let sink = Arc::new(RecordingDomSink::new());
    w.set_dom_sink(sink.clone());
    w.parse("t", "{{promise x}}y{{/promise}}");

    let d = Deferred::new();
    w.render_value("t", map(&[("x", Value::Deferred(d.clone()))]))
        .unwrap();
    d.reject("network down");
    assert_eq!(
        sink.calls(),
        vec![("latePromise-0".to_string(), String::new())]
    );
}
