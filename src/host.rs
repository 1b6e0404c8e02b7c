use crate::error::TplError;
use crate::view::value::{Map, Value};

/// 默认宿主作用域。
///
/// 模板里的 `&` 选择符和裸函数头只能触达这里白名单内的能力；
/// 调用方可以在 writer 上注册更多条目。
pub fn default_host() -> Value {
    let mut root = Map::new();
    root.insert(
        "String".to_string(),
        Value::func(|_, args| {
            Ok(Value::Str(
                args.first().map(Value::to_display).unwrap_or_default(),
            ))
        }),
    );

    let mut math = Map::new();
    math.insert(
        "max".to_string(),
        Value::func(|_, args| numeric_fold(args, f64::max)),
    );
    math.insert(
        "min".to_string(),
        Value::func(|_, args| numeric_fold(args, f64::min)),
    );
    root.insert("Math".to_string(), Value::Map(math));

    root.insert(
        "arrayLength".to_string(),
        Value::func(|_, args| Ok(args.first().map(array_length).unwrap_or(Value::Null))),
    );
    root.insert(
        "isObject".to_string(),
        Value::func(|_, args| Ok(Value::Bool(args.first().map(is_object).unwrap_or(false)))),
    );
    root.insert(
        "inArray".to_string(),
        Value::func(|_, args| match args {
            [needle, haystack] => Ok(Value::Bool(in_array(needle, haystack))),
            _ => Err(TplError::HostCall("inArray expects (needle, list)".into())),
        }),
    );
    Value::Map(root)
}

fn numeric_fold(args: &[Value], f: fn(f64, f64) -> f64) -> Result<Value, TplError> {
    let mut acc: Option<f64> = None;
    for v in args {
        let n = v
            .as_f64()
            .ok_or_else(|| TplError::HostCall(format!("non-numeric argument: {:?}", v)))?;
        acc = Some(match acc {
            Some(a) => f(a, n),
            None => n,
        });
    }
    Ok(match acc {
        Some(a) if a.fract() == 0.0 && a.is_finite() => Value::I64(a as i64),
        Some(a) => Value::F64(a),
        None => Value::Null,
    })
}

/// 列表与映射的长度，字符串按字符计数；其余返回 Null。
pub fn array_length(v: &Value) -> Value {
    match v {
        Value::List(items) => Value::I64(items.len() as i64),
        Value::Str(s) => Value::I64(s.chars().count() as i64),
        Value::Map(m) => Value::I64(m.len() as i64),
        _ => Value::Null,
    }
}

pub fn is_object(v: &Value) -> bool {
    matches!(v, Value::Map(_))
}

pub fn in_array(needle: &Value, haystack: &Value) -> bool {
    match haystack {
        Value::List(items) => items.iter().any(|v| v == needle),
        _ => false,
    }
}
