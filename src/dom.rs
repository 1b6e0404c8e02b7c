use crate::view::value::Value;
use std::sync::{Arc, Mutex};

/// 宿主 DOM 元素的最小能力：序列化出外层标记。
/// 非 DOM 宿主可以用任意实现（或完全不用）。
pub trait DomElement: Send + Sync {
    fn outer_html(&self) -> String;
}

/// 占位元素的内容替换通道。`promise` 处理器在延迟值决议后通过它写回。
pub trait DomSink: Send + Sync {
    fn replace_content(&self, placeholder_id: &str, markup: &str);
}

/// 无 DOM 宿主的空实现：替换请求直接丢弃。
pub struct NullDomSink;

impl DomSink for NullDomSink {
    fn replace_content(&self, _placeholder_id: &str, _markup: &str) {}
}

/// 记录全部替换调用的实现，供测试与无头宿主检查产物。
#[derive(Default)]
pub struct RecordingDomSink {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingDomSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl DomSink for RecordingDomSink {
    fn replace_content(&self, placeholder_id: &str, markup: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((placeholder_id.to_string(), markup.to_string()));
        }
    }
}

type Subscriber = Box<dyn FnOnce(Result<Value, String>) + Send>;

enum State {
    Pending(Vec<Subscriber>),
    Resolved(Value),
    Rejected(String),
}

/// 延迟计算的值。决议（或拒绝）一次，之后的订阅立即得到结果。
#[derive(Clone)]
pub struct Deferred {
    inner: Arc<Mutex<State>>,
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

impl Deferred {
    pub fn new() -> Self {
        Deferred {
            inner: Arc::new(Mutex::new(State::Pending(Vec::new()))),
        }
    }

    /// 订阅结果。未决议时挂起回调；已有结果时立即调用。
    pub fn then<F>(&self, cb: F)
    where
        F: FnOnce(Result<Value, String>) + Send + 'static,
    {
        let ready = {
            let Ok(mut state) = self.inner.lock() else {
                return;
            };
            match &mut *state {
                State::Pending(subs) => {
                    subs.push(Box::new(cb));
                    return;
                }
                State::Resolved(v) => Ok(v.clone()),
                State::Rejected(r) => Err(r.clone()),
            }
        };
        cb(ready);
    }

    pub fn resolve(&self, value: Value) {
        self.settle(Ok(value));
    }

    pub fn reject(&self, reason: impl Into<String>) {
        self.settle(Err(reason.into()));
    }

    fn settle(&self, result: Result<Value, String>) {
        let subs = {
            let Ok(mut state) = self.inner.lock() else {
                return;
            };
            match &mut *state {
                State::Pending(subs) => {
                    let subs = std::mem::take(subs);
                    *state = match &result {
                        Ok(v) => State::Resolved(v.clone()),
                        Err(r) => State::Rejected(r.clone()),
                    };
                    subs
                }
                // 已有结果，重复决议被忽略
                _ => return,
            }
        };
        // 回调在锁外执行
        for cb in subs {
            cb(result.clone());
        }
    }

    pub(crate) fn same(&self, other: &Deferred) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_then_before_resolve() {
        let d = Deferred::new();
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        d.then(move |r| {
            *seen2.lock().unwrap() = Some(r);
        });
        assert!(seen.lock().unwrap().is_none());
        d.resolve(Value::I64(7));
        let result = seen.lock().unwrap().take();
        match result {
            Some(Ok(Value::I64(7))) => {}
            other => panic!("Expected resolved 7, got {:?}", other),
        }
    }

    #[test]
    fn test_then_after_resolve_fires_immediately() {
        let d = Deferred::new();
        d.resolve(Value::Str("done".into()));
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        d.then(move |r| {
            *seen2.lock().unwrap() = Some(r);
        });
        let result = seen.lock().unwrap().take();
        match result {
            Some(Ok(Value::Str(s))) => assert_eq!(s, "done"),
            other => panic!("Expected resolved value, got {:?}", other),
        }
    }

    #[test]
    fn test_reject_and_double_settle() {
        let d = Deferred::new();
        d.reject("boom");
        d.resolve(Value::I64(1));
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        d.then(move |r| {
            *seen2.lock().unwrap() = Some(r);
        });
        let result = seen.lock().unwrap().take();
        match result {
            Some(Err(r)) => assert_eq!(r, "boom"),
            other => panic!("Expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingDomSink::new();
        sink.replace_content("latePromise-1", "<li>x</li>");
        assert_eq!(
            sink.calls(),
            vec![("latePromise-1".to_string(), "<li>x</li>".to_string())]
        );
    }
}
