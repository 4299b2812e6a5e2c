//! Character-stream surface the parser reads through.
//! A byte cursor with save/restore marks, lookahead, and delimiter matching,
//! plus the literal scanners (numbers with base prefixes and underscore
//! separators, quoted/raw strings, character literals with escapes).

use hob_ast::NumberLit;
use hob_diagnostics::Span;
use hob_value::{char_width, CharWidth, FloatWidth, IntWidth};

// ===================== Scanner =====================

/// Saved cursor position; `Scanner::reset` rewinds to it.
#[derive(Clone, Copy, Debug)]
pub struct Mark {
    pos: usize,
    line: u32,
    col: u32,
}

pub struct Scanner<'s> {
    name: &'s str,
    src: &'s str,
    pos: usize,
    line: u32,
    col: u32,
}

impl<'s> Scanner<'s> {
    pub fn new(name: &'s str, src: &'s str) -> Self {
        Self { name, src, pos: 0, line: 1, col: 1 }
    }

    pub fn name(&self) -> &'s str {
        self.name
    }

    pub fn mark(&self) -> Mark {
        Mark { pos: self.pos, line: self.line, col: self.col }
    }

    pub fn reset(&mut self, m: Mark) {
        self.pos = m.pos;
        self.line = m.line;
        self.col = m.col;
    }

    pub fn at_eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    pub fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    pub fn peek_at(&self, n: usize) -> Option<u8> {
        self.src.as_bytes().get(self.pos + n).copied()
    }

    pub fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    pub fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s)
    }

    /// Last byte before the cursor, if any. Used to check the whitespace
    /// that must precede a right trim marker.
    pub fn prev_is_space(&self) -> bool {
        self.pos > 0 && self.src.as_bytes()[self.pos - 1].is_ascii_whitespace()
    }

    pub fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    pub fn bump_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    pub fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub fn eat_str(&mut self, s: &str) -> bool {
        if self.starts_with(s) {
            for _ in 0..s.len() {
                self.bump();
            }
            true
        } else {
            false
        }
    }

    pub fn skip_ws(&mut self) -> usize {
        let mut n = 0;
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.bump();
            n += 1;
        }
        n
    }

    /// `[A-Za-z_][A-Za-z0-9_]*`, or empty when the cursor is not at one.
    pub fn read_ident(&mut self) -> String {
        let start = self.pos;
        if matches!(self.peek(), Some(b) if b.is_ascii_alphabetic() || b == b'_') {
            self.bump();
            while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
                self.bump();
            }
        }
        self.src[start..self.pos].to_string()
    }

    /// Text mode: consume up to (and including) the next occurrence of
    /// `delim`. Returns the consumed text and whether the delimiter was
    /// found; on false the scanner sits at EOF.
    pub fn take_until(&mut self, delim: &str) -> (String, bool) {
        let mut out = String::new();
        while !self.at_eof() {
            if self.starts_with(delim) {
                for _ in 0..delim.len() {
                    self.bump();
                }
                return (out, true);
            }
            out.push(self.bump_char().expect("not at EOF"));
        }
        (out, false)
    }

    /// Zero-width span at the cursor.
    pub fn here(&self) -> Span {
        Span::point(self.name, self.pos, self.line, self.col)
    }
}

pub fn is_ident_start(b: Option<u8>) -> bool {
    matches!(b, Some(c) if c.is_ascii_alphabetic() || c == b'_')
}

// ===================== Escapes =====================

/// Decode one escape, cursor sitting just past the backslash.
fn scan_escape(sc: &mut Scanner) -> Result<char, String> {
    match sc.bump() {
        Some(b'n') => Ok('\n'),
        Some(b'r') => Ok('\r'),
        Some(b't') => Ok('\t'),
        Some(b'0') => Ok('\0'),
        Some(b'\\') => Ok('\\'),
        Some(b'\'') => Ok('\''),
        Some(b'"') => Ok('"'),
        Some(b'`') => Ok('`'),
        Some(b'x') => {
            let hi = hex_digit(sc)?;
            let lo = hex_digit(sc)?;
            Ok((hi * 16 + lo) as char)
        }
        Some(b'u') => {
            if !sc.eat(b'{') {
                return Err("expected '{' after \\u".to_string());
            }
            let mut cp: u32 = 0;
            let mut n = 0;
            while let Some(b) = sc.peek() {
                if b == b'}' {
                    break;
                }
                let d = hex_digit(sc)? as u32;
                cp = cp.wrapping_mul(16).wrapping_add(d);
                n += 1;
                if n > 6 {
                    return Err("\\u{...} escape too long".to_string());
                }
            }
            if !sc.eat(b'}') {
                return Err("unterminated \\u{...} escape".to_string());
            }
            if n == 0 {
                return Err("empty \\u{...} escape".to_string());
            }
            char::from_u32(cp).ok_or_else(|| format!("\\u{{{:x}}} is not a valid code point", cp))
        }
        Some(b) => Err(format!("invalid escape sequence \\{}", b as char)),
        None => Err("unterminated escape sequence".to_string()),
    }
}

fn hex_digit(sc: &mut Scanner) -> Result<u8, String> {
    match sc.bump() {
        Some(b @ b'0'..=b'9') => Ok(b - b'0'),
        Some(b @ b'a'..=b'f') => Ok(10 + b - b'a'),
        Some(b @ b'A'..=b'F') => Ok(10 + b - b'A'),
        Some(b) => Err(format!("invalid hex digit '{}'", b as char)),
        None => Err("unterminated escape sequence".to_string()),
    }
}

// ===================== Strings =====================

/// Double-quoted string with escapes, or backtick raw string (no escapes).
/// `Ok(None)` when the cursor is not at a string opener.
pub fn scan_string(sc: &mut Scanner) -> Result<Option<String>, String> {
    match sc.peek() {
        Some(b'"') => {
            sc.bump();
            let mut out = String::new();
            loop {
                match sc.peek_char() {
                    None | Some('\n') => return Err("unterminated string literal".to_string()),
                    Some('"') => {
                        sc.bump();
                        return Ok(Some(out));
                    }
                    Some('\\') => {
                        sc.bump();
                        out.push(scan_escape(sc)?);
                    }
                    Some(c) => {
                        sc.bump_char();
                        out.push(c);
                    }
                }
            }
        }
        Some(b'`') => {
            sc.bump();
            let mut out = String::new();
            loop {
                match sc.bump_char() {
                    None => return Err("unterminated raw string literal".to_string()),
                    Some('`') => return Ok(Some(out)),
                    Some(c) => out.push(c),
                }
            }
        }
        _ => Ok(None),
    }
}

// ===================== Characters =====================

/// Single-quoted character literal. `Ok(None)` when not at one.
pub fn scan_char(sc: &mut Scanner) -> Result<Option<(char, CharWidth)>, String> {
    if sc.peek() != Some(b'\'') {
        return Ok(None);
    }
    sc.bump();
    let c = match sc.peek_char() {
        None => return Err("unterminated character literal".to_string()),
        Some('\'') => return Err("empty character literal".to_string()),
        Some('\\') => {
            sc.bump();
            scan_escape(sc)?
        }
        Some(c) => {
            sc.bump_char();
            c
        }
    };
    if !sc.eat(b'\'') {
        return Err("unterminated character literal".to_string());
    }
    Ok(Some((c, char_width(c))))
}

// ===================== Numbers =====================

/// Collect digits satisfying `pred`, with single underscores allowed
/// between digits. Returns the digits with underscores stripped.
fn take_digits(sc: &mut Scanner, pred: fn(u8) -> bool) -> Result<String, String> {
    let mut out = String::new();
    let mut last_us = false;
    let mut first = true;
    loop {
        match sc.peek() {
            Some(b) if pred(b) => {
                out.push(b as char);
                sc.bump();
                last_us = false;
                first = false;
            }
            Some(b'_') => {
                if first || last_us {
                    return Err("misplaced '_' in number literal".to_string());
                }
                sc.bump();
                last_us = true;
            }
            _ => break,
        }
    }
    if last_us {
        return Err("trailing '_' in number literal".to_string());
    }
    Ok(out)
}

fn is_dec(b: u8) -> bool {
    b.is_ascii_digit()
}

fn is_hex(b: u8) -> bool {
    b.is_ascii_hexdigit()
}

fn is_oct(b: u8) -> bool {
    (b'0'..=b'7').contains(&b)
}

fn is_bin(b: u8) -> bool {
    b == b'0' || b == b'1'
}

/// Narrowest integer classification: widths probed 8/16/32/64, signed
/// preferred at equal width. Negative values are always signed.
fn classify_int(neg: bool, mag: u128) -> Result<NumberLit, String> {
    if neg {
        let widths: [(u128, IntWidth); 4] = [
            (1 << 7, IntWidth::W8),
            (1 << 15, IntWidth::W16),
            (1 << 31, IntWidth::W32),
            (1 << 63, IntWidth::W64),
        ];
        for (limit, w) in widths {
            if mag <= limit {
                return Ok(NumberLit::Int(-(mag as i128) as i64, w));
            }
        }
        return Err("integer literal out of range".to_string());
    }
    let steps: [(u128, bool, IntWidth); 8] = [
        ((1 << 7) - 1, true, IntWidth::W8),
        ((1 << 8) - 1, false, IntWidth::W8),
        ((1 << 15) - 1, true, IntWidth::W16),
        ((1 << 16) - 1, false, IntWidth::W16),
        ((1 << 31) - 1, true, IntWidth::W32),
        ((1 << 32) - 1, false, IntWidth::W32),
        ((1 << 63) - 1, true, IntWidth::W64),
        (u64::MAX as u128, false, IntWidth::W64),
    ];
    for (limit, signed, w) in steps {
        if mag <= limit {
            return Ok(if signed {
                NumberLit::Int(mag as i64, w)
            } else {
                NumberLit::Uint(mag as u64, w)
            });
        }
    }
    Err("integer literal out of range".to_string())
}

/// Narrowest float: f32 when the value survives the round trip, else f64.
fn classify_float(v: f64) -> NumberLit {
    let narrow = v as f32;
    if (narrow as f64).to_bits() == v.to_bits() {
        NumberLit::Float(narrow as f64, FloatWidth::W32)
    } else {
        NumberLit::Float(v, FloatWidth::W64)
    }
}

/// Number literal: optional sign, base prefixes `0x`/`0o`/`0b`, underscore
/// separators, fraction, decimal `e` exponent or hex `p` exponent.
/// `Ok(None)` when the cursor is not at a number.
pub fn scan_number(sc: &mut Scanner) -> Result<Option<NumberLit>, String> {
    let start = sc.mark();
    let mut neg = false;
    match sc.peek() {
        Some(b'+') => {
            sc.bump();
        }
        Some(b'-') => {
            neg = true;
            sc.bump();
        }
        _ => {}
    }
    if !matches!(sc.peek(), Some(b) if b.is_ascii_digit()) {
        sc.reset(start);
        return Ok(None);
    }

    if sc.peek() == Some(b'0') && matches!(sc.peek_at(1), Some(b'x' | b'X')) {
        sc.bump();
        sc.bump();
        return scan_hex(sc, neg).map(Some);
    }
    if sc.peek() == Some(b'0') && matches!(sc.peek_at(1), Some(b'o' | b'O')) {
        sc.bump();
        sc.bump();
        let digits = take_digits(sc, is_oct)?;
        return radix_int(neg, &digits, 8).map(Some);
    }
    if sc.peek() == Some(b'0') && matches!(sc.peek_at(1), Some(b'b' | b'B')) {
        sc.bump();
        sc.bump();
        let digits = take_digits(sc, is_bin)?;
        return radix_int(neg, &digits, 2).map(Some);
    }

    // Decimal, possibly a float.
    let int_part = take_digits(sc, is_dec)?;
    let mut text = int_part;
    let mut is_float = false;
    if sc.peek() == Some(b'.') && matches!(sc.peek_at(1), Some(b) if b.is_ascii_digit()) {
        sc.bump();
        is_float = true;
        text.push('.');
        text.push_str(&take_digits(sc, is_dec)?);
    }
    if matches!(sc.peek(), Some(b'e' | b'E')) {
        let next = sc.peek_at(1);
        let next2 = sc.peek_at(2);
        let exp_ok = matches!(next, Some(b) if b.is_ascii_digit())
            || (matches!(next, Some(b'+' | b'-')) && matches!(next2, Some(b) if b.is_ascii_digit()));
        if exp_ok {
            sc.bump();
            is_float = true;
            text.push('e');
            if matches!(sc.peek(), Some(b'+' | b'-')) {
                text.push(sc.bump().expect("sign") as char);
            }
            text.push_str(&take_digits(sc, is_dec)?);
        }
    }

    if is_float {
        let v: f64 = text.parse().map_err(|_| format!("invalid number literal '{}'", text))?;
        let v = if neg { -v } else { v };
        return Ok(Some(classify_float(v)));
    }
    let mag: u128 =
        text.parse().map_err(|_| format!("invalid number literal '{}'", text))?;
    classify_int(neg, mag).map(Some)
}

fn radix_int(neg: bool, digits: &str, radix: u32) -> Result<NumberLit, String> {
    if digits.is_empty() {
        return Err("digits required after base prefix".to_string());
    }
    let mag = u128::from_str_radix(digits, radix)
        .map_err(|_| "integer literal out of range".to_string())?;
    classify_int(neg, mag)
}

/// Hex: integer, or a hex float when a fraction or `p` exponent appears.
fn scan_hex(sc: &mut Scanner, neg: bool) -> Result<NumberLit, String> {
    let digits = take_digits(sc, is_hex)?;
    if digits.is_empty() {
        return Err("digits required after base prefix".to_string());
    }
    let mut frac = String::new();
    let mut is_float = false;
    if sc.peek() == Some(b'.') && matches!(sc.peek_at(1), Some(b) if b.is_ascii_hexdigit()) {
        sc.bump();
        is_float = true;
        frac = take_digits(sc, is_hex)?;
    }
    let mut exp: i32 = 0;
    if matches!(sc.peek(), Some(b'p' | b'P')) {
        sc.bump();
        is_float = true;
        let eneg = match sc.peek() {
            Some(b'+') => {
                sc.bump();
                false
            }
            Some(b'-') => {
                sc.bump();
                true
            }
            _ => false,
        };
        let edigits = take_digits(sc, is_dec)?;
        if edigits.is_empty() {
            return Err("digits required in exponent".to_string());
        }
        let mag: i32 =
            edigits.parse().map_err(|_| "exponent out of range".to_string())?;
        exp = if eneg { -mag } else { mag };
    } else if is_float {
        return Err("hex float requires a 'p' exponent".to_string());
    }

    if !is_float {
        return radix_int(neg, &digits, 16);
    }
    let mut v = 0f64;
    for d in digits.bytes() {
        v = v * 16.0 + hex_val(d) as f64;
    }
    let mut scale = 1.0 / 16.0;
    for d in frac.bytes() {
        v += hex_val(d) as f64 * scale;
        scale /= 16.0;
    }
    let v = v * 2f64.powi(exp);
    let v = if neg { -v } else { v };
    Ok(classify_float(v))
}

fn hex_val(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => 10 + b - b'a',
        _ => 10 + b - b'A',
    }
}

// ===================== Tests =====================
