/// 模板解析产物。
///
/// 偏移都落在归一化后的源串上；区段变体带子列表和配对闭合的结束偏移，
/// 其余变体不携带子节点。
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text {
        value: String,
        start: usize,
        end: usize,
    },
    Name {
        payload: String,
        start: usize,
        end: usize,
    },
    /// `>>`：调用并输出返回值（不转义）
    Call {
        payload: String,
        start: usize,
        end: usize,
    },
    /// `>`：调用并丢弃返回值
    CallVoid {
        payload: String,
        start: usize,
        end: usize,
    },
    /// `%`：子模板引用
    SubTemplate {
        payload: String,
        start: usize,
        end: usize,
    },
    Html {
        payload: String,
        start: usize,
        end: usize,
    },
    Else {
        start: usize,
        end: usize,
    },
    Close {
        payload: String,
        start: usize,
        end: usize,
    },
    /// `if`/`each`/`get`/`promise` 以及注册的区段类别
    Section {
        kind: String,
        payload: String,
        start: usize,
        end: usize,
        children: Vec<Token>,
        close_end: usize,
    },
    /// 注册的叶子类别
    Custom {
        kind: String,
        payload: String,
        start: usize,
        end: usize,
    },
}

impl Token {
    /// 分发用的类别符号。
    pub fn kind(&self) -> &str {
        match self {
            Token::Text { .. } => "text",
            Token::Name { .. } => "name",
            Token::Call { .. } => ">>",
            Token::CallVoid { .. } => ">",
            Token::SubTemplate { .. } => "%",
            Token::Html { .. } => "html",
            Token::Else { .. } => "else",
            Token::Close { .. } => "/",
            Token::Section { kind, .. } | Token::Custom { kind, .. } => kind.as_str(),
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            Token::Text { value, .. } => value,
            Token::Else { .. } => "",
            Token::Name { payload, .. }
            | Token::Call { payload, .. }
            | Token::CallVoid { payload, .. }
            | Token::SubTemplate { payload, .. }
            | Token::Html { payload, .. }
            | Token::Close { payload, .. }
            | Token::Section { payload, .. }
            | Token::Custom { payload, .. } => payload.as_str(),
        }
    }

    pub fn children(&self) -> Option<&[Token]> {
        match self {
            Token::Section { children, .. } => Some(children),
            _ => None,
        }
    }
}
