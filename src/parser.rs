use crate::handlers::HandlerTable;
use crate::scanner::Scanner;
use crate::token::Token;
use log::error;

/// 归一化：去掉制表符与换行，连续空格折叠成一个。结果可重入。
pub(crate) fn normalize(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut last_space = false;
    for c in source.chars() {
        match c {
            '\t' | '\n' | '\r' => {}
            ' ' => {
                if !last_space {
                    out.push(' ');
                }
                last_space = true;
            }
            c => {
                out.push(c);
                last_space = false;
            }
        }
    }
    out
}

/// 把模板源解析成嵌套的 token 树。
///
/// 结构性错误（未闭合标签、未开启的闭合、配对错位、游离 else）就地报告，
/// 解析尽力继续；产物可能不完整但渲染不会崩溃。
pub(crate) fn parse_template(
    name: &str,
    source: &str,
    tags: &(String, String),
    table: &HandlerTable,
) -> Vec<Token> {
    let src = normalize(source);
    let (open, close) = (tags.0.as_str(), tags.1.as_str());
    let mut s = Scanner::new(&src);
    let mut tokens: Vec<Token> = Vec::new();
    let mut open_sections: Vec<String> = Vec::new();

    while !s.eos() {
        let start = s.pos();
        let text = s.scan_until(open);
        if !text.is_empty() {
            tokens.push(Token::Text {
                value: text.to_string(),
                start,
                end: s.pos(),
            });
        }
        let start = s.pos();
        if !s.scan(open) {
            break;
        }
        s.scan_spaces();
        let kind = match table.match_kind(s.tail()) {
            Some((kind, n)) => {
                s.advance(n);
                kind
            }
            None => String::new(),
        };
        s.scan_spaces();
        let raw = s.scan_until(close);
        if !s.scan(close) {
            error!("utpl [{name}]: unclosed tag at {start}");
            break;
        }
        let payload: String = raw.chars().filter(|c| *c != ' ').collect();
        let end = s.pos();

        // 区段收支记账，配对错误就地报告
        match kind.as_str() {
            "/" => match open_sections.pop() {
                Some(top) if top == payload => {}
                Some(top) => error!(
                    "utpl [{name}]: mismatched close: expected /{top}, got /{payload} at {start}"
                ),
                None => error!("utpl [{name}]: unopened section close: /{payload} at {start}"),
            },
            "else" => {
                if open_sections.last().map(String::as_str) != Some("if") {
                    error!("utpl [{name}]: else outside of an if section at {start}");
                }
            }
            k if table.is_section(k) => open_sections.push(kind.clone()),
            _ => {}
        }

        tokens.push(make_token(&kind, payload, start, end, table));
    }
    for kind in open_sections.iter().rev() {
        error!("utpl [{name}]: unclosed section: {kind}");
    }

    nest_tokens(squash_tokens(tokens))
}

fn make_token(kind: &str, payload: String, start: usize, end: usize, table: &HandlerTable) -> Token {
    match kind {
        "" => Token::Name {
            payload,
            start,
            end,
        },
        "else" => Token::Else { start, end },
        "/" => Token::Close {
            payload,
            start,
            end,
        },
        ">>" => Token::Call {
            payload,
            start,
            end,
        },
        ">" => Token::CallVoid {
            payload,
            start,
            end,
        },
        "%" => Token::SubTemplate {
            payload,
            start,
            end,
        },
        "html" => Token::Html {
            payload,
            start,
            end,
        },
        k if table.is_section(k) => Token::Section {
            kind: k.to_string(),
            payload,
            start,
            end,
            children: Vec::new(),
            close_end: 0,
        },
        k => Token::Custom {
            kind: k.to_string(),
            payload,
            start,
            end,
        },
    }
}

/// 紧邻的文本 token 合并进前者，结束偏移取后者的。幂等。
pub(crate) fn squash_tokens(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if let Token::Text {
            value: v2, end: e2, ..
        } = &token
        {
            if let Some(Token::Text { value, end, .. }) = out.last_mut() {
                value.push_str(v2);
                *end = *e2;
                continue;
            }
        }
        out.push(token);
    }
    out
}

/// 用栈把扁平序列折成树：区段开启者换上新的收集器，
/// 闭合把它弹回并记下闭合的结束偏移；残留的开启者自动闭合。
pub(crate) fn nest_tokens(tokens: Vec<Token>) -> Vec<Token> {
    let mut collectors: Vec<Vec<Token>> = vec![Vec::new()];
    let mut openers: Vec<Token> = Vec::new();
    for token in tokens {
        match token {
            Token::Section { .. } => {
                openers.push(token);
                collectors.push(Vec::new());
            }
            Token::Close { end, .. } => {
                if let Some(mut opener) = openers.pop() {
                    let children = collectors.pop().unwrap_or_default();
                    if let Token::Section {
                        children: c,
                        close_end,
                        ..
                    } = &mut opener
                    {
                        *c = children;
                        *close_end = end;
                    }
                    if let Some(top) = collectors.last_mut() {
                        top.push(opener);
                    }
                }
                // 未配对的闭合已在扫描期报告，这里直接丢弃
            }
            other => {
                if let Some(top) = collectors.last_mut() {
                    top.push(other);
                }
            }
        }
    }
    while let Some(mut opener) = openers.pop() {
        let children = collectors.pop().unwrap_or_default();
        if let Token::Section {
            children: c,
            close_end,
            end,
            ..
        } = &mut opener
        {
            *c = children;
            *close_end = *end;
        }
        if let Some(top) = collectors.last_mut() {
            top.push(opener);
        }
    }
    collectors.pop().unwrap_or_default()
}
