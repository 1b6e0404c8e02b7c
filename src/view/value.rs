use crate::dom::{Deferred, DomElement};
use crate::error::TplError;
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// 视图映射保持插入顺序，`each` 遍历键时依赖这一点。
pub type Map = IndexMap<String, Value>;

/// 可从模板内调用的函数。第一个参数是 `this` 绑定
/// （点号链里最终段的容器对象，顶层查找时为视图本身）。
pub type NativeFn = Arc<dyn Fn(&Value, &[Value]) -> Result<Value, TplError> + Send + Sync>;

/// 渲染期的视图值。
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
    List(Vec<Value>),
    Map(Map),
    Func(NativeFn),
    Elem(Arc<dyn DomElement>),
    Deferred(Deferred),
}

impl Value {
    /// 包装一个宿主函数。
    pub fn func<F>(f: F) -> Value
    where
        F: Fn(&Value, &[Value]) -> Result<Value, TplError> + Send + Sync + 'static,
    {
        Value::Func(Arc::new(f))
    }

    /// 真值语义沿用本系统原宿主的约定：
    /// Null/false/0/NaN/空串为假，列表、映射、函数、元素、延迟值恒为真（包括空列表）。
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::I64(n) => *n != 0,
            Value::F64(f) => *f != 0.0 && !f.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// 输出形式。Null 渲染为空串，列表以逗号连接。
    pub fn to_display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::I64(n) => n.to_string(),
            Value::F64(f) => fmt_f64(*f),
            Value::Str(s) => s.clone(),
            Value::List(items) => items
                .iter()
                .map(Value::to_display)
                .collect::<Vec<_>>()
                .join(","),
            Value::Map(_) => "[object]".to_string(),
            Value::Func(_) => "[function]".to_string(),
            Value::Elem(e) => e.outer_html(),
            Value::Deferred(_) => "[deferred]".to_string(),
        }
    }

    /// 按键读取子值。映射按键名，列表接受数字形式的键。
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(key),
            Value::List(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// `name[index]` 形式的取值：列表按数字下标，映射按键。
    pub fn index(&self, idx: &Value) -> Option<&Value> {
        match (self, idx) {
            (Value::List(items), Value::I64(i)) => {
                usize::try_from(*i).ok().and_then(|i| items.get(i))
            }
            (Value::List(_), Value::Str(s)) => self.get(s),
            (Value::Map(m), Value::Str(s)) => m.get(s.as_str()),
            (Value::Map(m), other) => m.get(other.to_display().as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I64(n) => Some(*n as f64),
            Value::F64(f) => Some(*f),
            _ => None,
        }
    }

    /// 比较运算使用的宽松排序：两侧同为数字或同为字符串时可比。
    pub fn loose_cmp(&self, other: &Value) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a.partial_cmp(&b);
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn fmt_f64(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => Arc::ptr_eq(a, b),
            (Value::Elem(a), Value::Elem(b)) => Arc::ptr_eq(a, b),
            (Value::Deferred(a), Value::Deferred(b)) => a.same(b),
            // 数字跨变体比较，与严格相等里"数字只有一种类型"的语义一致
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::I64(n) => write!(f, "I64({n})"),
            Value::F64(x) => write!(f, "F64({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Map(m) => f.debug_tuple("Map").field(m).finish(),
            Value::Func(_) => write!(f, "Func"),
            Value::Elem(_) => write!(f, "Elem"),
            Value::Deferred(_) => write!(f, "Deferred"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I64(v as i64)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}
impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}
impl From<Map> for Value {
    fn from(v: Map) -> Self {
        Value::Map(v)
    }
}
