use crate::context::Context;
use crate::dom::{DomSink, NullDomSink};
use crate::error::TplError;
use crate::handlers::{Handler, HandlerTable};
use crate::host::default_host;
use crate::parser;
use crate::token::Token;
use crate::view::serializer::to_value;
use crate::view::value::Value;
use dashmap::DashMap;
use log::error;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::atomic::{self, AtomicU64};
use std::sync::{Arc, RwLock};

/// 缓存的模板：原始源串加编译好的树。树在 Arc 里共享，渲染不占缓存锁。
#[derive(Clone)]
pub struct CachedTemplate {
    pub source: String,
    pub tree: Arc<Vec<Token>>,
}

pub type EscapeFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// 缺省转义：先字符串化，再替换 `<` `>` `'` `"` 为实体形式。
pub fn default_escape(v: &Value) -> String {
    let s = v.to_display();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// 模板引擎实例：模板缓存、处理器注册表、定界符、转义函数、
/// 宿主作用域与 DOM 通道都挂在这里。克隆只是增加引用。
#[derive(Clone)]
pub struct Writer {
    inner: Arc<WriterInner>,
}

struct WriterInner {
    templates: DashMap<String, CachedTemplate>,
    handlers: HandlerTable,
    tags: RwLock<(String, String)>,
    escape: RwLock<EscapeFn>,
    host: RwLock<Value>,
    dom: RwLock<Arc<dyn DomSink>>,
    promise_seq: AtomicU64,
    current: RwLock<Option<String>>,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer {
    pub fn new() -> Self {
        Writer {
            inner: Arc::new(WriterInner {
                templates: DashMap::new(),
                handlers: HandlerTable::with_builtins(),
                tags: RwLock::new(("{{".to_string(), "}}".to_string())),
                escape: RwLock::new(Arc::new(default_escape)),
                host: RwLock::new(default_host()),
                dom: RwLock::new(Arc::new(NullDomSink)),
                promise_seq: AtomicU64::new(0),
                current: RwLock::new(None),
            }),
        }
    }

    /// 编译并缓存。同名模板后写覆盖先写。
    pub fn parse(&self, name: &str, source: &str) {
        let tags = self.inner.tags.read().unwrap().clone();
        let tree = parser::parse_template(name, source, &tags, &self.inner.handlers);
        self.inner.templates.insert(
            name.to_string(),
            CachedTemplate {
                source: source.to_string(),
                tree: Arc::new(tree),
            },
        );
    }

    pub fn exists(&self, name: &str) -> bool {
        self.inner.templates.contains_key(name)
    }

    /// 缓存里的模板名，按字典序。
    pub fn list_templates(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .templates
            .iter()
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn clear_cache(&self) {
        self.inner.templates.clear();
    }

    pub fn remove_template(&self, name: &str) {
        self.inner.templates.remove(name);
    }

    /// 取缓存的模板；缺失报错并返回 None，调用方按空内容处理。
    pub fn get_template(&self, name: &str) -> Option<CachedTemplate> {
        let found = self.inner.templates.get(name).map(|e| e.value().clone());
        if found.is_none() {
            error!("utpl: missing template: {name}");
        }
        found
    }

    /// 渲染：视图经 serde 序列化为引擎值。
    pub fn render<T: Serialize>(&self, name: &str, view: &T) -> Result<String, TplError> {
        self.render_value(name, to_value(view))
    }

    pub fn render_value(&self, name: &str, view: Value) -> Result<String, TplError> {
        let tpl = self
            .inner
            .templates
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| TplError::TemplateNotFound(name.to_string()))?;
        *self.inner.current.write().unwrap() = Some(name.to_string());
        let host = self.inner.host.read().unwrap().clone();
        let ctx = Context::new(view, &host);
        Ok(self.render_tokens(&tpl.tree, &ctx))
    }

    /// 视图已是上下文时直接使用，不再建根帧。
    pub fn render_with(&self, name: &str, ctx: &Context) -> Result<String, TplError> {
        let tpl = self
            .inner
            .templates
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| TplError::TemplateNotFound(name.to_string()))?;
        *self.inner.current.write().unwrap() = Some(name.to_string());
        Ok(self.render_tokens(&tpl.tree, ctx))
    }

    /// 逐 token 分发到处理器，串接非空返回值。
    /// 没有处理器的类别（树畸形时残留的 else、闭合）直接跳过。
    pub fn render_tokens(&self, tokens: &[Token], ctx: &Context) -> String {
        let mut out = String::new();
        for token in tokens {
            if let Some(handler) = self.inner.handlers.get(token.kind()) {
                if let Some(piece) = handler(token, ctx, self) {
                    out.push_str(&piece);
                }
            }
        }
        out
    }

    /// 条件求值。按 `&&`/`||` 切开保留连接符，子式按比较符切开；
    /// 自左向右折叠，短路一侧不求值。
    pub fn eval_expr(&self, expr: &str, ctx: &Context) -> bool {
        let parts = split_connectives(expr);
        let mut iter = parts.into_iter();
        let mut acc = match iter.next() {
            Some(first) => self.eval_operand(first, ctx),
            None => return false,
        };
        while let (Some(op), Some(rhs)) = (iter.next(), iter.next()) {
            let take_rhs = match op {
                "&&" => acc.is_truthy(),
                "||" => !acc.is_truthy(),
                _ => false,
            };
            if take_rhs {
                acc = self.eval_operand(rhs, ctx);
            }
        }
        acc.is_truthy()
    }

    fn eval_operand(&self, part: &str, ctx: &Context) -> Value {
        match find_comparison(part) {
            Some((lhs, op, rhs)) => {
                let l = ctx.lookup_with_reserved(lhs);
                let r = ctx.lookup_with_reserved(rhs);
                match op {
                    "===" => Value::Bool(l == r),
                    "!==" => Value::Bool(l != r),
                    ">" => cmp_values(&l, &r, |o| o == Ordering::Greater),
                    ">=" => cmp_values(&l, &r, |o| o != Ordering::Less),
                    "<" => cmp_values(&l, &r, |o| o == Ordering::Less),
                    "<=" => cmp_values(&l, &r, |o| o != Ordering::Greater),
                    other => {
                        error!("utpl: unsupported comparison operator: {other}");
                        Value::Null
                    }
                }
            }
            None => ctx.lookup(part),
        }
    }

    pub fn escape_value(&self, v: &Value) -> String {
        let escape = self.inner.escape.read().unwrap().clone();
        escape(v)
    }

    pub fn set_escape<F>(&self, f: F)
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        *self.inner.escape.write().unwrap() = Arc::new(f);
    }

    pub fn tags(&self) -> (String, String) {
        self.inner.tags.read().unwrap().clone()
    }

    /// 覆盖定界符对。空串或两端相同的输入被拒绝。
    pub fn set_tags(&self, open: &str, close: &str) -> Result<(), TplError> {
        if open.is_empty() || close.is_empty() || open == close {
            return Err(TplError::InvalidTags(format!("[{open:?}, {close:?}]")));
        }
        *self.inner.tags.write().unwrap() = (open.to_string(), close.to_string());
        Ok(())
    }

    /// 向宿主白名单挂一个条目（函数或命名空间映射）。
    pub fn register_host(&self, name: &str, value: Value) {
        let mut host = self.inner.host.write().unwrap();
        if let Value::Map(m) = &mut *host {
            m.insert(name.to_string(), value);
        }
    }

    pub fn set_dom_sink(&self, sink: Arc<dyn DomSink>) {
        *self.inner.dom.write().unwrap() = sink;
    }

    pub(crate) fn dom(&self) -> Arc<dyn DomSink> {
        self.inner.dom.read().unwrap().clone()
    }

    pub(crate) fn next_promise_id(&self) -> u64 {
        self.inner.promise_seq.fetch_add(1, atomic::Ordering::Relaxed)
    }

    /// 最近一次 render 的模板名，诊断用。
    pub fn current_template(&self) -> Option<String> {
        self.inner.current.read().unwrap().clone()
    }

    /// 注册新的标签类别；`section` 指明它是否包裹子节点参与配对。
    /// 与既有类别冲突时保留旧处理器并返回 false。
    pub fn add_token_handler(&self, kind: &str, section: bool, handler: Handler) -> bool {
        self.inner.handlers.register(kind, section, handler)
    }
}

fn cmp_values(l: &Value, r: &Value, f: impl Fn(Ordering) -> bool) -> Value {
    match l.loose_cmp(r) {
        Some(ord) => Value::Bool(f(ord)),
        None => Value::Bool(false),
    }
}

/// 按 `&&`/`||` 切分并保留连接符。
fn split_connectives(expr: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < expr.len() {
        let rest = &expr[i..];
        if rest.starts_with("&&") || rest.starts_with("||") {
            out.push(&expr[start..i]);
            out.push(&expr[i..i + 2]);
            i += 2;
            start = i;
        } else {
            i += rest.chars().next().map_or(1, |c| c.len_utf8());
        }
    }
    out.push(&expr[start..]);
    out
}

/// 最左的比较符出现处，同位置长者优先（`===` 先于 `==`）。
fn find_comparison(part: &str) -> Option<(&str, &str, &str)> {
    const OPS: [&str; 8] = ["===", "!==", "==", "!=", ">=", "<=", ">", "<"];
    for (i, _) in part.char_indices() {
        for op in OPS {
            if part[i..].starts_with(op) {
                return Some((&part[..i], op, &part[i + op.len()..]));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::value::Map;

    fn ctx_with(entries: &[(&str, Value)]) -> (Value, Value) {
        let mut m = Map::new();
        for (k, v) in entries {
            m.insert(k.to_string(), v.clone());
        }
        (Value::Map(m), Value::Map(Map::new()))
    }

    #[test]
    fn test_eval_atoms() {
        let w = Writer::new();
        let (view, host) = ctx_with(&[
            ("a", Value::I64(10)),
            ("b", Value::Str("hello".into())),
            ("c", Value::Bool(true)),
        ]);
        let ctx = Context::new(view, &host);
        assert!(w.eval_expr("a===10", &ctx));
        assert!(w.eval_expr("a!==5", &ctx));
        assert!(w.eval_expr("b==='hello'", &ctx));
        assert!(w.eval_expr("c", &ctx));
        assert!(w.eval_expr("c===true", &ctx));
        assert!(!w.eval_expr("missing", &ctx));
        assert!(w.eval_expr("a>5", &ctx));
        assert!(w.eval_expr("a>=10", &ctx));
        assert!(!w.eval_expr("a<10", &ctx));
        assert!(w.eval_expr("a<=10", &ctx));
    }

    #[test]
    fn test_eval_connectives() {
        let w = Writer::new();
        let (view, host) = ctx_with(&[("x", Value::I64(1)), ("y", Value::I64(2))]);
        let ctx = Context::new(view, &host);
        assert!(w.eval_expr("x===1&&y===2", &ctx));
        assert!(w.eval_expr("x===1||y===3", &ctx));
        assert!(!w.eval_expr("x===2||y===3", &ctx));
        assert!(!w.eval_expr("x===2&&y===2", &ctx));
        // 自左向右折叠
        assert!(w.eval_expr("x===2||y===2&&x===1", &ctx));
    }

    #[test]
    fn test_eval_loose_equality_is_rejected() {
        let w = Writer::new();
        let (view, host) = ctx_with(&[("a", Value::I64(1))]);
        let ctx = Context::new(view, &host);
        // == 与 != 会被切出来，但求值阶段不认，子式按假处理
        assert!(!w.eval_expr("a==1", &ctx));
        assert!(!w.eval_expr("a!=2", &ctx));
    }

    #[test]
    fn test_eval_reserved_operands() {
        let w = Writer::new();
        let (view, host) = ctx_with(&[("a", Value::Null)]);
        let ctx = Context::new(view, &host);
        assert!(w.eval_expr("a===null", &ctx));
        assert!(w.eval_expr("missing===undefined", &ctx));
        assert!(!w.eval_expr("a!==undefined", &ctx));
    }

    #[test]
    fn test_find_comparison_longest_first() {
        assert_eq!(find_comparison("a===1"), Some(("a", "===", "1")));
        assert_eq!(find_comparison("a!==b"), Some(("a", "!==", "b")));
        assert_eq!(find_comparison("a>=2"), Some(("a", ">=", "2")));
        assert_eq!(find_comparison("flag"), None);
    }

    #[test]
    fn test_parse_render_roundtrip() {
        let w = Writer::new();
        w.parse("hello", "Hello, {{name}}!");
        assert!(w.exists("hello"));
        assert!(w.list_templates().contains(&"hello".to_string()));
        let mut m = Map::new();
        m.insert("name".to_string(), Value::Str("World".into()));
        let out = w.render_value("hello", Value::Map(m)).unwrap();
        assert_eq!(out, "Hello, World!");
    }

    #[test]
    fn test_render_missing_template() {
        let w = Writer::new();
        match w.render_value("nope", Value::Null) {
            Err(TplError::TemplateNotFound(name)) => assert_eq!(name, "nope"),
            other => panic!("Expected TemplateNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_cache_management() {
        let w = Writer::new();
        w.parse("a", "1");
        w.parse("b", "2");
        assert_eq!(w.list_templates(), vec!["a".to_string(), "b".to_string()]);
        w.remove_template("a");
        assert!(!w.exists("a"));
        w.clear_cache();
        assert!(w.list_templates().is_empty());
    }

    #[test]
    fn test_set_tags_rejects_bad_pairs() {
        let w = Writer::new();
        assert!(w.set_tags("", "}}").is_err());
        assert!(w.set_tags("%%", "%%").is_err());
        assert!(w.set_tags("<%", "%>").is_ok());
        assert_eq!(w.tags(), ("<%".to_string(), "%>".to_string()));
    }

    #[test]
    fn test_escape_default() {
        assert_eq!(
            default_escape(&Value::Str("<a href=\"x\">'q'</a>".into())),
            "&lt;a href=&quot;x&quot;&gt;&#39;q&#39;&lt;/a&gt;"
        );
        assert_eq!(default_escape(&Value::Null), "");
    }
}
