//! Lua string patterns, matched on the host.
//!
//! The interpreter's own `string.find`, `string.match`, `string.gmatch` and
//! `string.gsub` each run as one native call that the VM hook never
//! interrupts, and a backtracking pattern can take exponential time. The
//! replacements installed here understand the same pattern language but poll
//! the run's [`CancelToken`] while they search.

use mlua::{Function, Lua, MultiValue, String as LuaString, Table, Value};

use crate::sandbox::CancelToken;

const MAX_CAPTURES: usize = 32;
// recursion limit of the matcher, as in the reference interpreter
const MAX_DEPTH: usize = 200;
const ESCAPE: u8 = b'%';
const SPECIALS: &[u8] = b"^$*+?.([%-";
// matching steps between two deadline checks
const POLL_STEPS: u32 = 1 << 12;
// bytes compared between two deadline checks during a plain search
const POLL_BYTES: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extent {
    Open,
    Position,
    Closed(usize),
}

#[derive(Debug, Clone, Copy)]
struct Capture {
    start: usize,
    extent: Extent,
}

/// One value produced by a successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Captured<'s> {
    Text(&'s [u8]),
    /// 1-based position from a `()` capture.
    Position(usize),
}

impl Captured<'_> {
    fn to_value(&self, lua: &Lua) -> mlua::Result<Value> {
        match self {
            Captured::Text(bytes) => lua.create_string(bytes).map(Value::String),
            Captured::Position(at) => Ok(Value::Integer(*at as i64)),
        }
    }
}

fn malformed(what: &str) -> mlua::Error {
    mlua::Error::runtime(format!("malformed pattern ({what})"))
}

struct Matcher<'a> {
    src: &'a [u8],
    pat: &'a [u8],
    captures: Vec<Capture>,
    depth: usize,
    steps: u32,
    cancel: &'a CancelToken,
}

impl<'a> Matcher<'a> {
    fn new(src: &'a [u8], pat: &'a [u8], cancel: &'a CancelToken) -> Self {
        Self {
            src,
            pat,
            captures: Vec::new(),
            depth: 0,
            steps: 0,
            cancel,
        }
    }

    fn reset(&mut self) {
        self.captures.clear();
        self.depth = 0;
    }

    fn tick(&mut self) -> mlua::Result<()> {
        self.steps = self.steps.wrapping_add(1);
        if self.steps % POLL_STEPS == 0 {
            self.cancel.check()?;
        }
        Ok(())
    }

    /// Index just past the single-character class starting at `p`.
    fn class_end(&self, mut p: usize) -> mlua::Result<usize> {
        let c = self.pat[p];
        p += 1;
        match c {
            ESCAPE => {
                if p >= self.pat.len() {
                    return Err(malformed("ends with '%'"));
                }
                Ok(p + 1)
            }
            b'[' => {
                if self.pat.get(p) == Some(&b'^') {
                    p += 1;
                }
                // the first character of a set is literal, even a ']'
                loop {
                    if p >= self.pat.len() {
                        return Err(malformed("missing ']'"));
                    }
                    let c = self.pat[p];
                    p += 1;
                    if c == ESCAPE && p < self.pat.len() {
                        p += 1;
                    }
                    if self.pat.get(p) == Some(&b']') {
                        return Ok(p + 1);
                    }
                }
            }
            _ => Ok(p),
        }
    }

    // `p` is at the opening '[' and `end` at the closing ']'.
    fn set_matches(&self, c: u8, mut p: usize, end: usize) -> bool {
        let mut found = true;
        if self.pat[p + 1] == b'^' {
            found = false;
            p += 1;
        }
        p += 1;
        while p < end {
            if self.pat[p] == ESCAPE {
                p += 1;
                if class_matches(c, self.pat[p]) {
                    return found;
                }
            } else if self.pat[p + 1] == b'-' && p + 2 < end {
                p += 2;
                if self.pat[p - 2] <= c && c <= self.pat[p] {
                    return found;
                }
            } else if self.pat[p] == c {
                return found;
            }
            p += 1;
        }
        !found
    }

    fn single_match(&self, s: usize, p: usize, ep: usize) -> bool {
        let Some(&c) = self.src.get(s) else {
            return false;
        };
        match self.pat[p] {
            b'.' => true,
            ESCAPE => class_matches(c, self.pat[p + 1]),
            b'[' => self.set_matches(c, p, ep - 1),
            literal => literal == c,
        }
    }

    /// Matches the pattern from `p` against the subject from `s`, returning
    /// where the match ends.
    fn do_match(&mut self, s: usize, p: usize) -> mlua::Result<Option<usize>> {
        if self.depth == MAX_DEPTH {
            return Err(mlua::Error::runtime("pattern too complex"));
        }
        self.depth += 1;
        let result = self.match_here(s, p);
        self.depth -= 1;
        result
    }

    fn match_here(&mut self, mut s: usize, mut p: usize) -> mlua::Result<Option<usize>> {
        loop {
            self.tick()?;
            if p == self.pat.len() {
                return Ok(Some(s));
            }
            match self.pat[p] {
                b'(' => {
                    return if self.pat.get(p + 1) == Some(&b')') {
                        self.start_capture(s, p + 2, Extent::Position)
                    } else {
                        self.start_capture(s, p + 1, Extent::Open)
                    };
                }
                b')' => return self.end_capture(s, p + 1),
                b'$' if p + 1 == self.pat.len() => return Ok((s == self.src.len()).then_some(s)),
                ESCAPE if self.pat.get(p + 1) == Some(&b'b') => match self.match_balance(s, p + 2)? {
                    Some(next) => {
                        s = next;
                        p += 4;
                    }
                    None => return Ok(None),
                },
                ESCAPE if self.pat.get(p + 1) == Some(&b'f') => {
                    p += 2;
                    if self.pat.get(p) != Some(&b'[') {
                        return Err(mlua::Error::runtime("missing '[' after '%f' in pattern"));
                    }
                    let ep = self.class_end(p)?;
                    let previous = if s == 0 { 0 } else { self.src[s - 1] };
                    let current = self.src.get(s).copied().unwrap_or(0);
                    if self.set_matches(previous, p, ep - 1) || !self.set_matches(current, p, ep - 1) {
                        return Ok(None);
                    }
                    p = ep;
                }
                ESCAPE if self.pat.get(p + 1).is_some_and(u8::is_ascii_digit) => {
                    match self.match_back_reference(s, self.pat[p + 1])? {
                        Some(next) => {
                            s = next;
                            p += 2;
                        }
                        None => return Ok(None),
                    }
                }
                _ => {
                    let ep = self.class_end(p)?;
                    let suffix = self.pat.get(ep).copied();
                    if !self.single_match(s, p, ep) {
                        // the item may match zero times
                        if matches!(suffix, Some(b'*' | b'?' | b'-')) {
                            p = ep + 1;
                            continue;
                        }
                        return Ok(None);
                    }
                    match suffix {
                        Some(b'?') => {
                            if let Some(end) = self.do_match(s + 1, ep + 1)? {
                                return Ok(Some(end));
                            }
                            p = ep + 1;
                        }
                        Some(b'+') => return self.max_expand(s + 1, p, ep),
                        Some(b'*') => return self.max_expand(s, p, ep),
                        Some(b'-') => return self.min_expand(s, p, ep),
                        _ => {
                            s += 1;
                            p = ep;
                        }
                    }
                }
            }
        }
    }

    fn max_expand(&mut self, s: usize, p: usize, ep: usize) -> mlua::Result<Option<usize>> {
        let mut count = 0;
        while self.single_match(s + count, p, ep) {
            self.tick()?;
            count += 1;
        }
        loop {
            if let Some(end) = self.do_match(s + count, ep + 1)? {
                return Ok(Some(end));
            }
            if count == 0 {
                return Ok(None);
            }
            count -= 1;
        }
    }

    fn min_expand(&mut self, mut s: usize, p: usize, ep: usize) -> mlua::Result<Option<usize>> {
        loop {
            if let Some(end) = self.do_match(s, ep + 1)? {
                return Ok(Some(end));
            }
            if !self.single_match(s, p, ep) {
                return Ok(None);
            }
            s += 1;
        }
    }

    fn start_capture(&mut self, s: usize, p: usize, extent: Extent) -> mlua::Result<Option<usize>> {
        if self.captures.len() >= MAX_CAPTURES {
            return Err(mlua::Error::runtime("too many captures"));
        }
        self.captures.push(Capture { start: s, extent });
        let result = self.do_match(s, p)?;
        if result.is_none() {
            self.captures.pop();
        }
        Ok(result)
    }

    fn end_capture(&mut self, s: usize, p: usize) -> mlua::Result<Option<usize>> {
        let open = self
            .captures
            .iter()
            .rposition(|c| c.extent == Extent::Open)
            .ok_or_else(|| mlua::Error::runtime("invalid pattern capture"))?;
        self.captures[open].extent = Extent::Closed(s - self.captures[open].start);
        let result = self.do_match(s, p)?;
        if result.is_none() {
            self.captures[open].extent = Extent::Open;
        }
        Ok(result)
    }

    fn match_balance(&mut self, s: usize, p: usize) -> mlua::Result<Option<usize>> {
        if p + 1 >= self.pat.len() {
            return Err(malformed("missing arguments to '%b'"));
        }
        let (open, close) = (self.pat[p], self.pat[p + 1]);
        if self.src.get(s) != Some(&open) {
            return Ok(None);
        }
        let mut depth = 1;
        for i in s + 1..self.src.len() {
            self.tick()?;
            let c = self.src[i];
            if c == close {
                depth -= 1;
                if depth == 0 {
                    return Ok(Some(i + 1));
                }
            } else if c == open {
                depth += 1;
            }
        }
        Ok(None)
    }

    fn match_back_reference(&mut self, s: usize, digit: u8) -> mlua::Result<Option<usize>> {
        let closed = (digit as usize)
            .checked_sub(b'1' as usize)
            .and_then(|index| self.captures.get(index))
            .and_then(|c| match c.extent {
                Extent::Closed(len) => Some((c.start, len)),
                Extent::Position => Some((c.start, 0)),
                Extent::Open => None,
            });
        let Some((start, len)) = closed else {
            return Err(mlua::Error::runtime(format!("invalid capture index %{}", digit as char)));
        };
        let text = &self.src[start..start + len];
        Ok(self.src[s..].starts_with(text).then_some(s + len))
    }

    /// Capture `i` of a match spanning `s..e`; with no explicit captures,
    /// capture 0 is the whole match.
    fn capture(&self, i: usize, s: usize, e: usize) -> mlua::Result<Captured<'a>> {
        let src = self.src;
        match self.captures.get(i) {
            None if i == 0 => Ok(Captured::Text(&src[s..e])),
            None => Err(mlua::Error::runtime(format!("invalid capture index %{}", i + 1))),
            Some(c) => match c.extent {
                Extent::Open => Err(mlua::Error::runtime("unfinished capture")),
                Extent::Position => Ok(Captured::Position(c.start + 1)),
                Extent::Closed(len) => Ok(Captured::Text(&src[c.start..c.start + len])),
            },
        }
    }

    fn captured(&self, s: usize, e: usize, whole_when_none: bool) -> mlua::Result<Vec<Captured<'a>>> {
        let n = if self.captures.is_empty() && whole_when_none {
            1
        } else {
            self.captures.len()
        };
        (0..n).map(|i| self.capture(i, s, e)).collect()
    }
}

fn class_matches(c: u8, class: u8) -> bool {
    let hit = match class.to_ascii_lowercase() {
        b'a' => c.is_ascii_alphabetic(),
        b'c' => c.is_ascii_control(),
        b'd' => c.is_ascii_digit(),
        b'g' => c.is_ascii_graphic(),
        b'l' => c.is_ascii_lowercase(),
        b'p' => c.is_ascii_punctuation(),
        b's' => c == b' ' || (b'\t'..=b'\r').contains(&c),
        b'u' => c.is_ascii_uppercase(),
        b'w' => c.is_ascii_alphanumeric(),
        b'x' => c.is_ascii_hexdigit(),
        _ => return class == c,
    };
    if class.is_ascii_uppercase() { !hit } else { hit }
}

fn values(lua: &Lua, captured: &[Captured]) -> mlua::Result<MultiValue> {
    captured.iter().map(|c| c.to_value(lua)).collect()
}

fn not_found() -> MultiValue {
    MultiValue::from_iter([Value::Nil])
}

fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Nil | Value::Boolean(false))
}

// 0-based start offset for a 1-based, possibly negative, `init` argument.
fn start_offset(init: Option<i64>, len: usize) -> usize {
    match init.unwrap_or(1) {
        0 => 0,
        i if i > 0 => (i as u64 - 1).min(usize::MAX as u64) as usize,
        i if i.unsigned_abs() > len as u64 => 0,
        i => len - i.unsigned_abs() as usize,
    }
}

fn split_anchor(pattern: &[u8]) -> (bool, &[u8]) {
    match pattern.split_first() {
        Some((b'^', rest)) => (true, rest),
        _ => (false, pattern),
    }
}

fn find_plain(cancel: &CancelToken, haystack: &[u8], needle: &[u8]) -> mlua::Result<Option<usize>> {
    if needle.is_empty() {
        return Ok(Some(0));
    }
    let stride = (POLL_BYTES / needle.len()).max(1);
    for (i, window) in haystack.windows(needle.len()).enumerate() {
        if i % stride == 0 {
            cancel.check()?;
        }
        if window == needle {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

// Shared body of `string.find` and `string.match`.
fn search(
    lua: &Lua,
    cancel: &CancelToken,
    subject: &[u8],
    pattern: &[u8],
    init: Option<i64>,
    plain: bool,
    find: bool,
) -> mlua::Result<MultiValue> {
    let start = start_offset(init, subject.len());
    if start > subject.len() {
        return Ok(not_found());
    }
    if find && (plain || !pattern.iter().any(|b| SPECIALS.contains(b))) {
        return Ok(match find_plain(cancel, &subject[start..], pattern)? {
            Some(at) => {
                let at = start + at;
                MultiValue::from_iter([Value::Integer(at as i64 + 1), Value::Integer((at + pattern.len()) as i64)])
            }
            None => not_found(),
        });
    }
    let (anchored, pattern) = split_anchor(pattern);
    let mut matcher = Matcher::new(subject, pattern, cancel);
    let mut s = start;
    loop {
        matcher.reset();
        if let Some(e) = matcher.do_match(s, 0)? {
            if !find {
                return values(lua, &matcher.captured(s, e, true)?);
            }
            let mut found = vec![Value::Integer(s as i64 + 1), Value::Integer(e as i64)];
            for c in matcher.captured(s, e, false)? {
                found.push(c.to_value(lua)?);
            }
            return Ok(MultiValue::from_iter(found));
        }
        s += 1;
        if anchored || s > subject.len() {
            return Ok(not_found());
        }
    }
}

fn gmatch(lua: &Lua, cancel: CancelToken, subject: Vec<u8>, pattern: Vec<u8>, init: Option<i64>) -> mlua::Result<Function> {
    let len = subject.len();
    let mut start = start_offset(init, len).min(len + 1);
    let mut last_match = None;
    lua.create_function_mut(move |lua, ()| {
        let mut matcher = Matcher::new(&subject, &pattern, &cancel);
        while start <= len {
            matcher.reset();
            if let Some(e) = matcher.do_match(start, 0)? {
                // an empty match right where the previous one ended does not count
                if last_match != Some(e) {
                    let s = start;
                    start = e;
                    last_match = Some(e);
                    return values(lua, &matcher.captured(s, e, true)?);
                }
            }
            start += 1;
        }
        Ok(MultiValue::new())
    })
}

enum Replacement {
    Text(Vec<u8>),
    Call(Function),
    Lookup(Table),
}

impl Replacement {
    fn from_value(lua: &Lua, value: Value) -> mlua::Result<Self> {
        match value {
            Value::Function(f) => Ok(Replacement::Call(f)),
            Value::Table(t) => Ok(Replacement::Lookup(t)),
            Value::String(_) | Value::Integer(_) | Value::Number(_) => {
                let text = lua
                    .coerce_string(value)?
                    .map(|s| s.as_bytes().to_vec())
                    .unwrap_or_default();
                Ok(Replacement::Text(text))
            }
            other => Err(mlua::Error::runtime(format!(
                "bad argument #3 to 'gsub' (string/function/table expected, got {})",
                other.type_name()
            ))),
        }
    }
}

// Appends the replacement for the match `s..e`; false when the match is kept as is.
fn substitute(lua: &Lua, matcher: &Matcher, out: &mut Vec<u8>, s: usize, e: usize, with: &Replacement) -> mlua::Result<bool> {
    let value = match with {
        Replacement::Text(text) => {
            expand(matcher, out, s, e, text)?;
            return Ok(true);
        }
        Replacement::Call(f) => f.call::<Value>(values(lua, &matcher.captured(s, e, true)?)?)?,
        Replacement::Lookup(t) => t.get::<Value>(matcher.capture(0, s, e)?.to_value(lua)?)?,
    };
    match value {
        Value::Nil | Value::Boolean(false) => {
            out.extend_from_slice(&matcher.src[s..e]);
            Ok(false)
        }
        Value::String(_) | Value::Integer(_) | Value::Number(_) => {
            if let Some(text) = lua.coerce_string(value)? {
                out.extend_from_slice(&text.as_bytes());
            }
            Ok(true)
        }
        other => Err(mlua::Error::runtime(format!("invalid replacement value (a {})", other.type_name()))),
    }
}

// `%0`-`%9` and `%%` inside a replacement string.
fn expand(matcher: &Matcher, out: &mut Vec<u8>, s: usize, e: usize, text: &[u8]) -> mlua::Result<()> {
    let mut i = 0;
    while i < text.len() {
        let c = text[i];
        i += 1;
        if c != ESCAPE {
            out.push(c);
            continue;
        }
        match text.get(i) {
            Some(&ESCAPE) => out.push(ESCAPE),
            Some(&b'0') => out.extend_from_slice(&matcher.src[s..e]),
            Some(&d) if d.is_ascii_digit() => match matcher.capture((d - b'1') as usize, s, e)? {
                Captured::Text(bytes) => out.extend_from_slice(bytes),
                Captured::Position(at) => out.extend_from_slice(at.to_string().as_bytes()),
            },
            _ => return Err(mlua::Error::runtime("invalid use of '%' in replacement string")),
        }
        i += 1;
    }
    Ok(())
}

fn gsub(
    lua: &Lua,
    cancel: &CancelToken,
    max_len: usize,
    subject: LuaString,
    pattern: &[u8],
    with: Value,
    limit: Option<i64>,
) -> mlua::Result<(Value, i64)> {
    let src = subject.as_bytes().to_vec();
    let with = Replacement::from_value(lua, with)?;
    let limit = limit.unwrap_or(src.len() as i64 + 1);
    let (anchored, pattern) = split_anchor(pattern);
    let mut matcher = Matcher::new(&src, pattern, cancel);
    let mut out = Vec::new();
    let (mut s, mut n, mut changed, mut last_match) = (0, 0, false, None);
    while n < limit {
        matcher.reset();
        match matcher.do_match(s, 0)? {
            Some(e) if last_match != Some(e) => {
                n += 1;
                changed |= substitute(lua, &matcher, &mut out, s, e, &with)?;
                s = e;
                last_match = Some(e);
            }
            _ if s < src.len() => {
                out.push(src[s]);
                s += 1;
            }
            _ => break,
        }
        if out.len() > max_len {
            return Err(mlua::Error::runtime("gsub result exceeds the memory limit"));
        }
        if anchored {
            break;
        }
    }
    if !changed {
        return Ok((Value::String(subject), n));
    }
    out.extend_from_slice(&src[s..]);
    Ok((Value::String(lua.create_string(&out)?), n))
}

/// Replaces the pattern functions of the `string` library (and therefore the
/// string methods) with versions that stop once `cancel` fires. `max_len`
/// bounds the host-side buffer `gsub` builds its result in.
pub fn install(lua: &Lua, cancel: &CancelToken, max_len: usize) -> mlua::Result<()> {
    let string: Table = lua.globals().get("string")?;

    let token = cancel.clone();
    let find = lua.create_function(
        move |lua, (subject, pattern, init, plain): (LuaString, LuaString, Option<i64>, Value)| {
            search(lua, &token, &subject.as_bytes(), &pattern.as_bytes(), init, truthy(&plain), true)
        },
    )?;
    string.set("find", find)?;

    let token = cancel.clone();
    let matches = lua.create_function(move |lua, (subject, pattern, init): (LuaString, LuaString, Option<i64>)| {
        search(lua, &token, &subject.as_bytes(), &pattern.as_bytes(), init, false, false)
    })?;
    string.set("match", matches)?;

    let token = cancel.clone();
    let iterate = lua.create_function(move |lua, (subject, pattern, init): (LuaString, LuaString, Option<i64>)| {
        gmatch(lua, token.clone(), subject.as_bytes().to_vec(), pattern.as_bytes().to_vec(), init)
    })?;
    string.set("gmatch", iterate)?;

    let token = cancel.clone();
    let replace = lua.create_function(
        move |lua, (subject, pattern, with, limit): (LuaString, LuaString, Value, Option<i64>)| {
            gsub(lua, &token, max_len, subject, &pattern.as_bytes(), with, limit)
        },
    )?;
    string.set("gsub", replace)?;
    Ok(())
}
