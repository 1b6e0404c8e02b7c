use crate::view::value::{Map, Value};
use log::{debug, error};
use std::cell::RefCell;

/// 渲染期的数据栈帧。
///
/// `render` 建根帧，区段处理器用 [`Context::push`] 压子帧；根帧沿父链可达，
/// 所以 `#` 选择符不需要独立的根指针。每帧有自己的解析缓存，`$` 键恒指向
/// 本帧视图；`&` 选择符合成的宿主帧缓存被关闭，永不记忆。
pub struct Context<'a> {
    view: Value,
    parent: Option<&'a Context<'a>>,
    host: &'a Value,
    caching: bool,
    cache: RefCell<Map>,
}

impl<'a> Context<'a> {
    pub fn new(view: Value, host: &'a Value) -> Context<'a> {
        Context::frame(view, None, host, true)
    }

    fn frame(
        view: Value,
        parent: Option<&'a Context<'a>>,
        host: &'a Value,
        caching: bool,
    ) -> Context<'a> {
        // 缺省视图落成空映射
        let view = match view {
            Value::Null => Value::Map(Map::new()),
            v => v,
        };
        let mut cache = Map::new();
        cache.insert("$".to_string(), view.clone());
        Context {
            view,
            parent,
            host,
            caching,
            cache: RefCell::new(cache),
        }
    }

    /// 压一个子帧。子帧不会比父帧活得久。
    pub fn push(&self, view: Value) -> Context<'_> {
        Context::frame(view, Some(self), self.host, true)
    }

    pub fn view(&self) -> &Value {
        &self.view
    }

    pub(crate) fn host_value(&self) -> &'a Value {
        self.host
    }

    /// `render` 创建的那一帧。
    pub fn root<'s>(&'s self) -> &'s Context<'a> {
        let mut cur: &'s Context<'a> = self;
        while let Some(p) = cur.parent {
            cur = p;
        }
        cur
    }

    /// `&` 选择符的合成帧：视图是宿主作用域，缓存关闭。
    fn host_frame(&self) -> Context<'_> {
        Context::frame(self.host.clone(), None, self.host, false)
    }

    /// 自根到本帧的视图序列，供延迟值决议后的重渲染还原帧链。
    pub(crate) fn snapshot(&self) -> Vec<Value> {
        let mut views = Vec::new();
        let mut cur: Option<&Context<'a>> = Some(self);
        while let Some(f) = cur {
            views.push(f.view.clone());
            cur = f.parent;
        }
        views.reverse();
        views
    }

    /// 解析一个点号名字。
    pub fn lookup(&self, name: &str) -> Value {
        self.lookup_call(name, None)
    }

    pub(crate) fn lookup_call(&self, name: &str, args: Option<&[Value]>) -> Value {
        if name.is_empty() {
            return Value::Null;
        }
        // 带括号的名字整体走函数调用路径
        if name.contains('(') {
            return self.function_call(name);
        }
        let (negate, name) = match name.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, name),
        };

        if let Some(body) = quoted_literal(name) {
            return finish(negate, Value::Str(body.to_string()));
        }

        let value = if let Some(rest) = name.strip_prefix('&') {
            // 选择符连同其后的分隔符一起消费
            let key = skip_separator(rest);
            let frame = self.host_frame();
            frame.resolve_scoped(if key.is_empty() { "$" } else { key }, args)
        } else if let Some(rest) = name.strip_prefix('#') {
            let key = skip_separator(rest);
            self.root()
                .resolve_scoped(if key.is_empty() { "$" } else { key }, args)
        } else {
            self.resolve_scoped(name, args)
        };
        finish(negate, value)
    }

    /// 从本帧起向父链解析。`$.` 前缀钉死在本帧。
    fn resolve_scoped(&self, name: &str, args: Option<&[Value]>) -> Value {
        if self.caching {
            if let Some(v) = self.cache.borrow().get(name) {
                return v.clone();
            }
        }
        let (ascend, key) = match name.strip_prefix("$.") {
            Some(rest) => (false, rest),
            None => (true, name),
        };

        let mut found: Option<(Value, Value)> = None;
        let mut frame: Option<&Context<'_>> = Some(self);
        while let Some(f) = frame {
            if let Some(hit) = resolve_in_view(&f.view, key) {
                found = Some(hit);
                break;
            }
            if !ascend {
                break;
            }
            frame = f.parent;
        }
        let Some((value, this)) = found else {
            debug!("utpl: lookup miss: {name}");
            return Value::Null;
        };
        match value {
            Value::Func(f) => match f(&this, args.unwrap_or(&[])) {
                Ok(v) => v,
                Err(e) => {
                    error!("utpl: function call failed: {name}: {e}");
                    Value::Null
                }
            },
            v => {
                // 只记忆非调用的结果
                if self.caching {
                    self.cache.borrow_mut().insert(name.to_string(), v.clone());
                }
                v
            }
        }
    }

    /// 保留字面量识别：条件操作数与调用实参经由这里。
    pub fn lookup_with_reserved(&self, name: &str) -> Value {
        match name {
            "undefined" | "null" => return Value::Null,
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
        if let Some(body) = quoted_literal(name) {
            return Value::Str(body.to_string());
        }
        if let Ok(n) = name.parse::<i64>() {
            return Value::I64(n);
        }
        // 数字字面量按整数解析，小数截断
        if let Ok(f) = name.parse::<f64>() {
            if f.is_finite() {
                return Value::I64(f.trunc() as i64);
            }
        }
        self.lookup(name)
    }

    /// `head(args...)` 形式。`$`/`#` 开头的函数在视图上解析，
    /// 裸头部（或 `&` 头部）走宿主白名单的点号命名空间。
    pub fn function_call(&self, name: &str) -> Value {
        let (negate, name) = match name.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, name),
        };
        let (head, arg_src) = match name.find('(') {
            Some(lp) => {
                let rp = name.rfind(')').filter(|rp| *rp > lp).unwrap_or(name.len());
                (&name[..lp], &name[lp + 1..rp])
            }
            None => (name, ""),
        };
        let args: Vec<Value> = arg_src
            .split(',')
            .filter(|a| !a.is_empty())
            .map(|a| self.lookup_with_reserved(a))
            .collect();

        let value = if head.starts_with('$') || head.starts_with('#') {
            self.lookup_call(head, Some(&args))
        } else if let Some(rest) = head.strip_prefix('&') {
            self.host_call(skip_separator(rest), &args)
        } else {
            self.host_call(head, &args)
        };
        finish(negate, value)
    }

    /// 点号路径走宿主命名空间，末段调用，`this` 绑定到所在命名空间。
    fn host_call(&self, head: &str, args: &[Value]) -> Value {
        if head.is_empty() {
            error!("utpl: empty host function name");
            return Value::Null;
        }
        let mut ns: &Value = self.host;
        let mut parts = head.split('.').peekable();
        let mut fname = "";
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                fname = part;
                break;
            }
            match ns.get(part) {
                Some(v) => ns = v,
                None => {
                    error!("utpl: unknown host namespace: {part} in {head}");
                    return Value::Null;
                }
            }
        }
        match ns.get(fname) {
            Some(Value::Func(f)) => match f(ns, args) {
                Ok(v) => v,
                Err(e) => {
                    error!("utpl: host call failed: {head}: {e}");
                    Value::Null
                }
            },
            Some(_) => {
                error!("utpl: host member is not callable: {head}");
                Value::Null
            }
            None => {
                error!("utpl: unknown host function: {head}");
                Value::Null
            }
        }
    }
}

fn finish(negate: bool, value: Value) -> Value {
    if negate {
        Value::Bool(!value.is_truthy())
    } else {
        value
    }
}

/// 引号字面量的内文；不处理转义。
fn quoted_literal(name: &str) -> Option<&str> {
    let q = name.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let body = &name[1..];
    Some(match body.find(q) {
        Some(i) => &body[..i],
        None => body,
    })
}

/// 丢掉选择符后面的一个分隔字符。
fn skip_separator(rest: &str) -> &str {
    let mut it = rest.chars();
    match it.next() {
        Some(_) => it.as_str(),
        None => "",
    }
}

/// 在单个视图里解析名字。返回值与 `this` 绑定（点号链里末段的容器）。
/// 找不到返回 None，调用方借此区分"缺失"与"存在的 Null"。
fn resolve_in_view(view: &Value, key: &str) -> Option<(Value, Value)> {
    if key == "$" {
        return Some((view.clone(), Value::Null));
    }
    if key.contains('.') {
        let mut cur = view;
        let mut holder = view;
        for part in key.split('.') {
            let next = cur.get(part)?;
            holder = cur;
            cur = next;
        }
        Some((cur.clone(), holder.clone()))
    } else {
        view.get(key).map(|v| (v.clone(), view.clone()))
    }
}
