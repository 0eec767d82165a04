//! Tokenizer for the script language. Produces a flat token stream with
//! explicit `Newline`, `Indent` and `Dedent` tokens.

use crate::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum FPiece {
    Lit(String),
    Expr {
        src: String,
        conversion: Option<char>,
        spec: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    FStr(Vec<FPiece>),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...", "**", "//", "<<", ">>", "<=", ">=", "==", "!=", "->", "+=",
    "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=", ":=", "+", "-", "*", "/", "%", "&", "|", "^",
    "~", "<", ">", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "=", "@",
];

const STRING_PREFIXES: &[&str] = &["r", "u", "f", "b", "rb", "br", "fr", "rf"];

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    tokens: Vec<Token>,
    indents: Vec<usize>,
    depth: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    Lexer::new(source, 1).run()
}

/// Tokenize a single expression embedded elsewhere (f-string fields).
pub(crate) fn tokenize_fragment(source: &str, line: usize) -> Result<Vec<Token>, CompileError> {
    let mut lx = Lexer::new(source, line);
    // Fragments are implicitly parenthesised: no indentation, no newlines.
    lx.depth = 1;
    lx.run()
}

impl Lexer {
    fn new(source: &str, line: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line,
            tokens: Vec::new(),
            indents: vec![0],
            depth: 0,
        }
    }

    fn err(&self, msg: impl Into<String>) -> CompileError {
        CompileError::new(self.line, msg)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn run(mut self) -> Result<Vec<Token>, CompileError> {
        let mut at_line_start = self.depth == 0;
        while self.pos < self.chars.len() {
            if at_line_start {
                if !self.indentation()? {
                    // Blank or comment line: the next line still starts fresh.
                    continue;
                }
                at_line_start = false;
            }
            let c = match self.peek() {
                Some(c) => c,
                None => break,
            };
            match c {
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push(Tok::Newline);
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\r' | '\x0c' => self.pos += 1,
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '\\' if self.peek_at(1) == Some('\r') && self.peek_at(2) == Some('\n') => {
                    self.pos += 3;
                    self.line += 1;
                }
                '"' | '\'' => {
                    let tok = self.string("")?;
                    self.push(tok);
                }
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.number()?,
                c if c == '_' || c.is_alphabetic() => self.name()?,
                _ => self.operator()?,
            }
        }

        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Dedent)
        ) {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(self.tokens)
    }

    /// Measure indentation at the start of a line. Returns `false` when the
    /// line is blank or a comment and was skipped entirely.
    fn indentation(&mut self) -> Result<bool, CompileError> {
        let mut width = 0usize;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' | '\r' => {}
                _ => break,
            }
            self.pos += 1;
        }
        match self.peek() {
            None => return Ok(false),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(false);
            }
            Some('#') => {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.pos += 1;
                }
                if self.peek() == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(false);
            }
            _ => {}
        }

        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else if width < current {
            while self.indents.last().is_some_and(|&top| top > width) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if self.indents.last().copied() != Some(width) {
                return Err(self.err("unindent does not match any outer indentation level"));
            }
        }
        Ok(true)
    }

    fn name(&mut self) -> Result<(), CompileError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        if matches!(self.peek(), Some('"') | Some('\''))
            && STRING_PREFIXES.contains(&word.to_ascii_lowercase().as_str())
        {
            let tok = self.string(&word.to_ascii_lowercase())?;
            self.push(tok);
        } else {
            self.push(Tok::Name(word));
        }
        Ok(())
    }

    fn number(&mut self) -> Result<(), CompileError> {
        let start = self.pos;
        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.pos += 2;
                let digits_start = self.pos;
                while self.peek().is_some_and(|c| c == '_' || c.is_digit(radix)) {
                    self.pos += 1;
                }
                let digits: String = self.chars[digits_start..self.pos]
                    .iter()
                    .filter(|c| **c != '_')
                    .collect();
                let value = i64::from_str_radix(&digits, radix)
                    .map_err(|_| self.err("invalid or too large integer literal"))?;
                self.push(Tok::Int(value));
                return Ok(());
            }
        }

        let mut is_float = false;
        self.digits();
        if self.peek() == Some('.') && !self.peek_at(1).is_some_and(|c| c == '.') {
            is_float = true;
            self.pos += 1;
            self.digits();
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign_offset = usize::from(matches!(self.peek_at(1), Some('+') | Some('-')));
            if self.peek_at(1 + sign_offset).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += 1 + sign_offset;
                self.digits();
            }
        }
        if matches!(self.peek(), Some('j') | Some('J')) {
            return Err(self.err("complex numbers are not supported"));
        }
        if self.peek().is_some_and(|c| c == '_' || c.is_alphabetic()) {
            return Err(self.err("invalid decimal literal"));
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if is_float {
            let v: f64 = text
                .parse()
                .map_err(|_| self.err(format!("invalid float literal '{}'", text)))?;
            self.push(Tok::Float(v));
        } else {
            if text.len() > 1 && text.starts_with('0') && text.chars().any(|c| c != '0') {
                return Err(self.err("leading zeros in decimal integer literals are not permitted"));
            }
            let v: i64 = text
                .parse()
                .map_err(|_| self.err("integer literal is too large"))?;
            self.push(Tok::Int(v));
        }
        Ok(())
    }

    fn digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.pos += 1;
        }
    }

    fn operator(&mut self) -> Result<(), CompileError> {
        for op in OPERATORS {
            let len = op.chars().count();
            if self.pos + len <= self.chars.len()
                && op.chars().zip(&self.chars[self.pos..]).all(|(a, b)| a == *b)
            {
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.pos += len;
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or(' ');
        Err(self.err(format!("invalid character '{}'", c)))
    }

    fn string(&mut self, prefix: &str) -> Result<Tok, CompileError> {
        if prefix.contains('b') {
            return Err(self.err("bytes literals are not supported"));
        }
        let raw = prefix.contains('r');
        let is_f = prefix.contains('f');
        let quote = self.peek().unwrap_or('"');
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };
        let start_line = self.line;

        let mut body = String::new();
        loop {
            let c = match self.peek() {
                Some(c) => c,
                None => {
                    return Err(CompileError::new(start_line, "unterminated string literal"));
                }
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }
            if c == '\n' {
                if !triple {
                    return Err(CompileError::new(start_line, "unterminated string literal"));
                }
                self.line += 1;
            }
            if c == '\\' {
                let next = self.peek_at(1);
                if raw {
                    body.push('\\');
                    if let Some(n) = next {
                        if n == '\n' {
                            self.line += 1;
                        }
                        body.push(n);
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                    }
                    continue;
                }
                self.pos += 1;
                self.escape(&mut body, is_f)?;
                continue;
            }
            body.push(c);
            self.pos += 1;
        }

        if is_f {
            Ok(Tok::FStr(split_fstring(&body, start_line)?))
        } else {
            Ok(Tok::Str(body))
        }
    }

    fn escape(&mut self, out: &mut String, keep_braces: bool) -> Result<(), CompileError> {
        let c = match self.peek() {
            Some(c) => c,
            None => return Err(self.err("unterminated string literal")),
        };
        self.pos += 1;
        match c {
            '\n' => self.line += 1,
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'x' => out.push(self.hex_escape(2)?),
            'u' => out.push(self.hex_escape(4)?),
            'U' => out.push(self.hex_escape(8)?),
            '{' | '}' if keep_braces => {
                out.push('\\');
                out.push(c);
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn hex_escape(&mut self, len: usize) -> Result<char, CompileError> {
        if self.pos + len > self.chars.len() {
            return Err(self.err("truncated \\x escape"));
        }
        let digits: String = self.chars[self.pos..self.pos + len].iter().collect();
        self.pos += len;
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.err(format!("invalid escape sequence '{}'", digits)))
    }
}

/// Split an f-string body into literal text and `{expr!c:spec}` fields.
fn split_fstring(body: &str, line: usize) -> Result<Vec<FPiece>, CompileError> {
    let chars: Vec<char> = body.chars().collect();
    let mut pieces = Vec::new();
    let mut lit = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            lit.push('{');
            i += 2;
            continue;
        }
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                lit.push('}');
                i += 2;
                continue;
            }
            return Err(CompileError::new(line, "f-string: single '}' is not allowed"));
        }
        if c != '{' {
            lit.push(c);
            i += 1;
            continue;
        }

        if !lit.is_empty() {
            pieces.push(FPiece::Lit(std::mem::take(&mut lit)));
        }
        i += 1;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut expr = String::new();
        let mut conversion = None;
        let mut spec = None;
        loop {
            let c = match chars.get(i) {
                Some(c) => *c,
                None => return Err(CompileError::new(line, "f-string: expecting '}'")),
            };
            if let Some(q) = quote {
                expr.push(c);
                if c == q {
                    quote = None;
                }
                i += 1;
                continue;
            }
            match c {
                '\'' | '"' => {
                    quote = Some(c);
                    expr.push(c);
                }
                '(' | '[' | '{' => {
                    depth += 1;
                    expr.push(c);
                }
                ')' | ']' | '}' if depth > 0 => {
                    depth -= 1;
                    expr.push(c);
                }
                '}' => {
                    i += 1;
                    break;
                }
                '!' if depth == 0 && chars.get(i + 1) != Some(&'=') => {
                    conversion = chars.get(i + 1).copied();
                    if !matches!(conversion, Some('r') | Some('s') | Some('a')) {
                        return Err(CompileError::new(
                            line,
                            "f-string: invalid conversion character",
                        ));
                    }
                    i += 2;
                    continue;
                }
                ':' if depth == 0 => {
                    let mut s = String::new();
                    i += 1;
                    while let Some(&c) = chars.get(i) {
                        if c == '}' {
                            break;
                        }
                        if c == '{' {
                            return Err(CompileError::new(
                                line,
                                "f-string: nested replacement fields are not supported",
                            ));
                        }
                        s.push(c);
                        i += 1;
                    }
                    spec = Some(s);
                    continue;
                }
                _ => expr.push(c),
            }
            i += 1;
        }
        if expr.trim().is_empty() {
            return Err(CompileError::new(line, "f-string: empty expression not allowed"));
        }
        pieces.push(FPiece::Expr {
            src: expr,
            conversion,
            spec,
        });
    }
    if !lit.is_empty() {
        pieces.push(FPiece::Lit(lit));
    }
    Ok(pieces)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn indentation_produces_indent_dedent() {
        let t = toks("if x:\n    y = 1\nz = 2\n");
        assert!(t.contains(&Tok::Indent));
        assert!(t.contains(&Tok::Dedent));
        assert_eq!(t.last(), Some(&Tok::Eof));
    }

    #[test]
    fn brackets_join_lines() {
        let t = toks("x = [1,\n  2]\n");
        assert_eq!(t.iter().filter(|t| **t == Tok::Newline).count(), 1);
    }

    #[test]
    fn numbers_and_strings() {
        let t = toks("a = 0x10 + 1_000 + 2.5e1 + .5\nb = 'it\\'s' \"x\\ty\"");
        assert!(t.contains(&Tok::Int(16)));
        assert!(t.contains(&Tok::Int(1000)));
        assert!(t.contains(&Tok::Float(25.0)));
        assert!(t.contains(&Tok::Float(0.5)));
        assert!(t.contains(&Tok::Str("it's".into())));
        assert!(t.contains(&Tok::Str("x\ty".into())));
    }

    #[test]
    fn triple_quoted_strings_count_lines() {
        let tokens = tokenize("s = '''a\nb'''\nx = 1\n").unwrap();
        let x = tokens
            .iter()
            .find(|t| t.tok == Tok::Name("x".into()))
            .unwrap();
        assert_eq!(x.line, 3);
    }

    #[test]
    fn fstring_fields() {
        let t = toks("f'a{b!r:>5}c{{d}}'");
        match &t[0] {
            Tok::FStr(pieces) => {
                assert_eq!(pieces.len(), 3);
                assert_eq!(
                    pieces[1],
                    FPiece::Expr {
                        src: "b".into(),
                        conversion: Some('r'),
                        spec: Some(">5".into())
                    }
                );
                assert_eq!(pieces[2], FPiece::Lit("c{d}".into()));
            }
            other => panic!("expected f-string, got {other:?}"),
        }
    }

    #[test]
    fn bad_dedent_is_rejected() {
        let err = tokenize("if x:\n    y = 1\n  z = 2\n").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn comment_lines_are_skipped() {
        let t = toks("# header\n\nx = 1 # trailing\n");
        assert_eq!(t[0], Tok::Name("x".into()));
    }

    #[test]
    fn blank_and_comment_lines_do_not_swallow_dedents() {
        for src in [
            "for x in y:\n    pass\n\nz = 1\n",
            "for x in y:\n    pass\n# done\nz = 1\n",
            "for x in y:\n    pass\n      # indented comment\n\t\nz = 1\n",
        ] {
            let tokens = tokenize(src).unwrap();
            let z = tokens
                .iter()
                .position(|t| t.tok == Tok::Name("z".into()))
                .unwrap();
            assert_eq!(tokens[z - 1].tok, Tok::Dedent, "{src:?}");
            assert_eq!(tokens[z].line, src.lines().count(), "{src:?}");
        }
    }

    #[test]
    fn nested_blocks_dedent_after_blank_lines() {
        let t = toks("def f():\n    if x:\n        y = 1\n\n    return y\n\nz = 2\n");
        let dedents = t.iter().filter(|t| **t == Tok::Dedent).count();
        assert_eq!(dedents, 2);
        let ret = t.iter().position(|t| *t == Tok::Name("return".into())).unwrap();
        assert_eq!(t[ret - 1], Tok::Dedent);
        let z = t.iter().position(|t| *t == Tok::Name("z".into())).unwrap();
        assert_eq!(t[z - 1], Tok::Dedent);
    }
}
