/// 归一化源串上的位置游标。
///
/// `pos` 恒等于已消费的字节数（源长减去尾部长度）。
pub(crate) struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    pub fn eos(&self) -> bool {
        self.pos >= self.src.len()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn tail(&self) -> &'a str {
        &self.src[self.pos..]
    }

    /// 尾部以字面量 `lit` 开头时消费之并返回 true，否则不动。
    pub fn scan(&mut self, lit: &str) -> bool {
        if !lit.is_empty() && self.tail().starts_with(lit) {
            self.pos += lit.len();
            true
        } else {
            false
        }
    }

    /// 消费一段空格（归一化后只剩单字节空格）。
    pub fn scan_spaces(&mut self) {
        while self.src.as_bytes().get(self.pos) == Some(&b' ') {
            self.pos += 1;
        }
    }

    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.src.len());
    }

    /// 消费并返回 `lit` 之前的内容；`lit` 不出现时消费剩余全部。
    pub fn scan_until(&mut self, lit: &str) -> &'a str {
        let tail = self.tail();
        match tail.find(lit) {
            Some(i) => {
                self.pos += i;
                &tail[..i]
            }
            None => {
                self.pos = self.src.len();
                tail
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_literal() {
        let mut s = Scanner::new("{{name}}");
        assert!(!s.scan("[["));
        assert_eq!(s.pos(), 0);
        assert!(s.scan("{{"));
        assert_eq!(s.pos(), 2);
        assert_eq!(s.tail(), "name}}");
    }

    #[test]
    fn test_scan_until_found() {
        let mut s = Scanner::new("Hello, {{name}}!");
        assert_eq!(s.scan_until("{{"), "Hello, ");
        assert_eq!(s.pos(), 7);
        assert!(s.scan("{{"));
        assert_eq!(s.scan_until("}}"), "name");
        assert!(s.scan("}}"));
        assert_eq!(s.scan_until("{{"), "!");
        assert!(s.eos());
    }

    #[test]
    fn test_scan_until_missing_consumes_all() {
        let mut s = Scanner::new("no tags here");
        assert_eq!(s.scan_until("{{"), "no tags here");
        assert!(s.eos());
        assert_eq!(s.scan_until("{{"), "");
    }

    #[test]
    fn test_scan_spaces() {
        let mut s = Scanner::new("   x");
        s.scan_spaces();
        assert_eq!(s.pos(), 3);
        assert_eq!(s.tail(), "x");
    }
}
