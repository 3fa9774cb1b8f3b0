//! Scans an input buffer (source file) byte by byte.

pub struct Scanner<'a> {
    buf: &'a [u8],
    pub ofs: usize,
    pub line: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Scanner {
            buf,
            ofs: 0,
            line: 1,
        }
    }

    pub fn at_end(&self) -> bool {
        self.ofs >= self.buf.len()
    }

    /// The bytes between two offsets, lossily decoded.
    pub fn slice(&self, start: usize, end: usize) -> String {
        String::from_utf8_lossy(&self.buf[start..end]).into_owned()
    }

    /// The current byte, or '\0' past the end of input.
    pub fn peek(&self) -> char {
        self.buf.get(self.ofs).map_or('\0', |&b| b as char)
    }

    pub fn peek_at(&self, n: usize) -> char {
        self.buf.get(self.ofs + n).map_or('\0', |&b| b as char)
    }

    pub fn next(&mut self) {
        if self.at_end() {
            return;
        }
        if self.peek() == '\n' {
            self.line += 1;
        }
        self.ofs += 1;
    }

    pub fn read(&mut self) -> char {
        let c = self.peek();
        self.next();
        c
    }

    pub fn skip(&mut self, ch: char) -> bool {
        if !self.at_end() && self.peek() == ch {
            self.next();
            return true;
        }
        false
    }

    /// Skip spaces and tabs, not newlines.
    pub fn skip_spaces(&mut self) {
        while self.skip(' ') || self.skip('\t') {}
    }

    /// Advance past the next newline, or to the end of input.
    pub fn skip_line(&mut self) {
        while !self.at_end() {
            if self.read() == '\n' {
                break;
            }
        }
    }

    /// Read bytes up to (not including) `end` or a newline.  Returns None,
    /// leaving the scanner on the newline, if `end` wasn't found.
    pub fn read_until(&mut self, end: char) -> Option<String> {
        let start = self.ofs;
        while !self.at_end() {
            match self.peek() {
                '\n' => return None,
                c if c == end => {
                    let s = self.slice(start, self.ofs);
                    self.next();
                    return Some(s);
                }
                _ => self.next(),
            }
        }
        None
    }

    /// Read an identifier made of ASCII letters, digits and underscores.
    pub fn read_ident(&mut self) -> String {
        let start = self.ofs;
        while self.peek().is_ascii_alphanumeric() || self.peek() == '_' {
            self.next();
        }
        self.slice(start, self.ofs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_safe() {
        let mut s = Scanner::new(b"a\nb");
        assert_eq!(s.read(), 'a');
        assert_eq!(s.read(), '\n');
        assert_eq!(s.line, 2);
        assert_eq!(s.read(), 'b');
        assert!(s.at_end());
        assert_eq!(s.read(), '\0');
        assert_eq!(s.peek_at(5), '\0');
    }

    #[test]
    fn read_until() {
        let mut s = Scanner::new(b"foo.h\" rest\nbar");
        assert_eq!(s.read_until('"').as_deref(), Some("foo.h"));
        assert_eq!(s.read_until('>'), None);
        assert_eq!(s.peek(), '\n');
        s.skip_line();
        assert_eq!(s.read_ident(), "bar");
    }
}
