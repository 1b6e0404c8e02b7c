use crate::context::Context;
use crate::token::Token;
use crate::view::value::{Map, Value};
use crate::writer::Writer;
use dashmap::DashMap;
use log::error;
use std::sync::{Arc, RwLock};

/// 每个标签类别对应一个处理器；返回 None 时不向输出追加内容。
pub type Handler = Arc<dyn Fn(&Token, &Context, &Writer) -> Option<String> + Send + Sync>;

const BUILTIN_SECTIONS: [&str; 4] = ["if", "each", "get", "promise"];

/// 类别符号到处理器的注册表。
///
/// `kinds` 是解析器用的识别表（含 `else` 与 `/`，不含 `text`/`name`），
/// 按长度降序排列；注册新类别时重建。
pub struct HandlerTable {
    entries: DashMap<String, Handler>,
    kinds: RwLock<Vec<String>>,
    sections: RwLock<Vec<String>>,
}

impl HandlerTable {
    pub fn with_builtins() -> Self {
        let table = HandlerTable {
            entries: DashMap::new(),
            kinds: RwLock::new(Vec::new()),
            sections: RwLock::new(BUILTIN_SECTIONS.iter().map(|s| s.to_string()).collect()),
        };
        let builtins: [(&str, Handler); 10] = [
            ("text", Arc::new(text_handler)),
            ("name", Arc::new(name_handler)),
            (">", Arc::new(call_void_handler)),
            (">>", Arc::new(call_handler)),
            ("%", Arc::new(sub_template_handler)),
            ("html", Arc::new(html_handler)),
            ("if", Arc::new(if_handler)),
            ("each", Arc::new(each_handler)),
            ("get", Arc::new(get_handler)),
            ("promise", Arc::new(promise_handler)),
        ];
        for (kind, handler) in builtins {
            table.entries.insert(kind.to_string(), handler);
        }
        let mut kinds: Vec<String> = [
            "if", "each", "get", "promise", "html", "else", "/", ">>", ">", "%",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        kinds.sort_by(|a, b| b.len().cmp(&a.len()));
        *table.kinds.write().unwrap() = kinds;
        table
    }

    /// 注册新类别并重建识别表。与既有类别冲突时保留旧处理器并记错。
    pub fn register(&self, kind: &str, section: bool, handler: Handler) -> bool {
        let kind = kind.trim().to_ascii_lowercase();
        if kind.is_empty()
            || kind == "else"
            || kind == "/"
            || kind == "text"
            || kind == "name"
            || self.entries.contains_key(&kind)
        {
            error!("utpl: token handler already registered or reserved: {kind}");
            return false;
        }
        self.entries.insert(kind.clone(), handler);
        {
            let mut kinds = self.kinds.write().unwrap();
            kinds.push(kind.clone());
            kinds.sort_by(|a, b| b.len().cmp(&a.len()));
        }
        if section {
            self.sections.write().unwrap().push(kind);
        }
        true
    }

    pub fn get(&self, kind: &str) -> Option<Handler> {
        self.entries.get(kind).map(|e| e.value().clone())
    }

    pub(crate) fn is_section(&self, kind: &str) -> bool {
        self.sections.read().unwrap().iter().any(|s| s == kind)
    }

    /// 在标签内容的起始处识别类别。
    ///
    /// 词形类别大小写不敏感且要求词边界（`elsewhere` 不是 `else`）；
    /// 符号类别裸匹配，长者优先（`>>` 先于 `>`）。
    pub(crate) fn match_kind(&self, tail: &str) -> Option<(String, usize)> {
        let kinds = self.kinds.read().unwrap();
        for kind in kinds.iter() {
            let n = kind.len();
            if tail.len() < n || !tail.is_char_boundary(n) {
                continue;
            }
            let head = &tail[..n];
            let word = kind
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric());
            if word {
                if head.eq_ignore_ascii_case(kind) {
                    let boundary = tail[n..]
                        .chars()
                        .next()
                        .map_or(true, |c| !(c.is_ascii_alphanumeric() || c == '_'));
                    if boundary {
                        return Some((kind.clone(), n));
                    }
                }
            } else if head == kind {
                return Some((kind.clone(), n));
            }
        }
        None
    }
}

fn text_handler(token: &Token, _ctx: &Context, _writer: &Writer) -> Option<String> {
    match token {
        Token::Text { value, .. } => Some(value.clone()),
        _ => None,
    }
}

fn name_handler(token: &Token, ctx: &Context, writer: &Writer) -> Option<String> {
    let payload = token.payload();
    let value = if let Some(lb) = payload.find('[') {
        // name[index]：先解出容器，再按解析出的下标（或字面下标）取值
        let base = &payload[..lb];
        let rest = &payload[lb + 1..];
        let idx_src = rest.split(']').next().unwrap_or("");
        let container = ctx.lookup(base);
        let key = match ctx.lookup(idx_src) {
            Value::Null => Value::Str(idx_src.to_string()),
            v => v,
        };
        container.index(&key).cloned().unwrap_or(Value::Null)
    } else {
        ctx.lookup(payload)
    };
    Some(writer.escape_value(&value))
}

fn call_void_handler(token: &Token, ctx: &Context, _writer: &Writer) -> Option<String> {
    ctx.function_call(token.payload());
    None
}

fn call_handler(token: &Token, ctx: &Context, _writer: &Writer) -> Option<String> {
    Some(ctx.function_call(token.payload()).to_display())
}

fn sub_template_handler(token: &Token, ctx: &Context, writer: &Writer) -> Option<String> {
    let payload = token.payload();
    // 先按数据名解析以支持动态选择，未解出时按字面模板名使用
    let name = match ctx.lookup(payload) {
        Value::Str(s) => s,
        _ => payload.to_string(),
    };
    let tpl = writer.get_template(&name)?;
    // 子模板针对当前上下文渲染，不压新帧
    Some(writer.render_tokens(&tpl.tree, ctx))
}

fn html_handler(token: &Token, ctx: &Context, _writer: &Writer) -> Option<String> {
    match ctx.lookup(token.payload()) {
        Value::Elem(e) => Some(e.outer_html()),
        v => Some(v.to_display()),
    }
}

fn if_handler(token: &Token, ctx: &Context, writer: &Writer) -> Option<String> {
    let Token::Section {
        payload, children, ..
    } = token
    else {
        return None;
    };
    let cond = writer.eval_expr(payload, ctx);
    let split = children
        .iter()
        .position(|t| matches!(t, Token::Else { .. }));
    let effective: &[Token] = match (split, cond) {
        (Some(i), true) => &children[..i],
        (Some(i), false) => &children[i + 1..],
        (None, true) => &children[..],
        (None, false) => return None,
    };
    Some(writer.render_tokens(effective, ctx))
}

fn each_handler(token: &Token, ctx: &Context, writer: &Writer) -> Option<String> {
    let Token::Section {
        payload, children, ..
    } = token
    else {
        return None;
    };
    let mut value = ctx.lookup(payload);
    if let Value::Func(f) = &value {
        // lookup 通常已调用视图函数；这里兜底，this 绑定当前视图
        let func = f.clone();
        value = match func(ctx.view(), &[]) {
            Ok(v) => v,
            Err(e) => {
                error!("utpl: each source failed: {payload}: {e}");
                return None;
            }
        };
    }
    if !value.is_truthy() {
        return None;
    }
    let mut out = String::new();
    match value {
        Value::List(items) => {
            for (i, item) in items.iter().enumerate() {
                let view = match item {
                    Value::Map(m) => {
                        // 对象元素以自身为视图，补上 $index
                        let mut m = m.clone();
                        m.insert("$index".to_string(), Value::I64(i as i64));
                        Value::Map(m)
                    }
                    other => {
                        let mut m = Map::new();
                        m.insert("$index".to_string(), Value::I64(i as i64));
                        m.insert("$value".to_string(), other.clone());
                        Value::Map(m)
                    }
                };
                let child = ctx.push(view);
                out.push_str(&writer.render_tokens(children, &child));
            }
        }
        Value::Map(entries) => {
            // 键按插入序遍历；键值包进合成视图，不改写原值
            for (k, v) in entries.iter() {
                let mut m = Map::new();
                m.insert("$index".to_string(), Value::Str(k.clone()));
                m.insert("$value".to_string(), v.clone());
                let child = ctx.push(Value::Map(m));
                out.push_str(&writer.render_tokens(children, &child));
            }
        }
        scalar => {
            let child = ctx.push(scalar);
            out.push_str(&writer.render_tokens(children, &child));
        }
    }
    Some(out)
}

fn get_handler(token: &Token, ctx: &Context, writer: &Writer) -> Option<String> {
    let Token::Section {
        payload, children, ..
    } = token
    else {
        return None;
    };
    let value = ctx.lookup(payload);
    if !value.is_truthy() {
        return None;
    }
    let child = ctx.push(value);
    Some(writer.render_tokens(children, &child))
}

fn promise_handler(token: &Token, ctx: &Context, writer: &Writer) -> Option<String> {
    let Token::Section {
        payload, children, ..
    } = token
    else {
        return None;
    };
    let value = ctx.lookup(payload);
    let Value::Deferred(deferred) = value else {
        error!("utpl: promise tag expects a deferred value: {payload}");
        return Some(String::new());
    };
    let placeholder_id = format!("latePromise-{}", writer.next_promise_id());
    // 占位 id 捕获进闭包局部，多个延迟值互不相扰
    let views = ctx.snapshot();
    let host = ctx.host_value().clone();
    let tokens = children.clone();
    let w = writer.clone();
    let id = placeholder_id.clone();
    deferred.then(move |result| match result {
        Ok(value) => {
            let markup = render_deferred(&w, &host, &views, &tokens, &value);
            w.dom().replace_content(&id, &markup);
        }
        Err(reason) => {
            error!("utpl: deferred value failed: {reason}");
            w.dom().replace_content(&id, "");
        }
    });
    Some(format!("<template id=\"{placeholder_id}\"></template>"))
}

/// 还原快照帧链，对决议值的每个元素（非列表则对值本身）渲染子节点。
fn render_deferred(
    writer: &Writer,
    host: &Value,
    views: &[Value],
    tokens: &[Token],
    value: &Value,
) -> String {
    let mut out = String::new();
    descend(writer, host, views, None, tokens, value, &mut out);
    out
}

fn descend(
    writer: &Writer,
    host: &Value,
    views: &[Value],
    parent: Option<&Context>,
    tokens: &[Token],
    value: &Value,
    out: &mut String,
) {
    match views.split_first() {
        Some((first, rest)) => {
            let ctx = match parent {
                None => Context::new(first.clone(), host),
                Some(p) => p.push(first.clone()),
            };
            descend(writer, host, rest, Some(&ctx), tokens, value, out);
        }
        None => {
            let Some(base) = parent else { return };
            match value {
                Value::List(items) => {
                    for item in items {
                        let child = base.push(item.clone());
                        out.push_str(&writer.render_tokens(tokens, &child));
                    }
                }
                other => {
                    let child = base.push(other.clone());
                    out.push_str(&writer.render_tokens(tokens, &child));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_kind_words_and_symbols() {
        let table = HandlerTable::with_builtins();
        assert_eq!(table.match_kind("if x}}"), Some(("if".to_string(), 2)));
        assert_eq!(table.match_kind("IF x}}"), Some(("if".to_string(), 2)));
        assert_eq!(table.match_kind("each xs}}"), Some(("each".to_string(), 4)));
        assert_eq!(table.match_kind("else}}"), Some(("else".to_string(), 4)));
        assert_eq!(table.match_kind("/if}}"), Some(("/".to_string(), 1)));
        assert_eq!(
            table.match_kind(">>String(n)}}"),
            Some((">>".to_string(), 2))
        );
        assert_eq!(table.match_kind(">go()}}"), Some((">".to_string(), 1)));
        // 词边界：elsewhere 是名字，不是 else
        assert_eq!(table.match_kind("elsewhere}}"), None);
        assert_eq!(table.match_kind("name}}"), None);
    }

    #[test]
    fn test_register_conflict_keeps_existing() {
        let table = HandlerTable::with_builtins();
        let noop: Handler = Arc::new(|_, _, _| None);
        assert!(!table.register("if", true, noop.clone()));
        assert!(!table.register("else", false, noop.clone()));
        assert!(table.register("stamp", false, noop.clone()));
        assert!(!table.register("stamp", false, noop));
        assert_eq!(table.match_kind("stamp x}}"), Some(("stamp".to_string(), 5)));
    }

    #[test]
    fn test_registered_section_participates_in_nesting_set() {
        let table = HandlerTable::with_builtins();
        let noop: Handler = Arc::new(|_, _, _| None);
        assert!(!table.is_section("wrap"));
        assert!(table.register("wrap", true, noop));
        assert!(table.is_section("wrap"));
        assert!(table.is_section("if"));
        assert!(!table.is_section("html"));
    }
}
