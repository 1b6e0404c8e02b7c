use crate::context::Context;
use crate::dom::DomSink;
use crate::error::TplError;
use crate::handlers::Handler;
use crate::view::value::Value;
use crate::writer::Writer;
use serde::Serialize;
use std::sync::{Arc, LazyLock};

pub use crate::host::{array_length, in_array, is_object};

// 进程级缺省引擎（Rust 1.80+ 推荐的 LazyLock 单例）
pub static UTPL: LazyLock<Writer> = LazyLock::new(Writer::new);

/// 缺省引擎实例。需要隔离配置时另起 [`Writer`]。
pub fn writer() -> &'static Writer {
    &UTPL
}

pub fn parse(name: &str, source: &str) {
    UTPL.parse(name, source)
}

pub fn render<T: Serialize>(name: &str, view: &T) -> Result<String, TplError> {
    UTPL.render(name, view)
}

pub fn render_value(name: &str, view: Value) -> Result<String, TplError> {
    UTPL.render_value(name, view)
}

pub fn render_with(name: &str, ctx: &Context) -> Result<String, TplError> {
    UTPL.render_with(name, ctx)
}

pub fn exists(name: &str) -> bool {
    UTPL.exists(name)
}

pub fn list_templates() -> Vec<String> {
    UTPL.list_templates()
}

pub fn clear_cache() {
    UTPL.clear_cache()
}

pub fn remove_template(name: &str) {
    UTPL.remove_template(name)
}

pub fn add_token_handler(kind: &str, section: bool, handler: Handler) -> bool {
    UTPL.add_token_handler(kind, section, handler)
}

pub fn set_escape<F>(f: F)
where
    F: Fn(&Value) -> String + Send + Sync + 'static,
{
    UTPL.set_escape(f)
}

pub fn escape(v: &Value) -> String {
    UTPL.escape_value(v)
}

pub fn tags() -> (String, String) {
    UTPL.tags()
}

pub fn set_tags(open: &str, close: &str) -> Result<(), TplError> {
    UTPL.set_tags(open, close)
}

pub fn set_dom_sink(sink: Arc<dyn DomSink>) {
    UTPL.set_dom_sink(sink)
}

pub fn register_host(name: &str, value: Value) {
    UTPL.register_host(name, value)
}
