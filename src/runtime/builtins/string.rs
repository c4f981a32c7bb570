//! Byte string with an explicit capacity and a trailing NUL.
//!
//! Strings are logically immutable: every transformation returns a new
//! string, only [`ScriptString::append`] grows in place.

use crate::error::RuntimeError;
use crate::memory::{Allocation, MAX_BUFFER, MemoryRef, buffer_size, oversized, round_to_grain};
use crate::native::{CallContext, NativeType};
use crate::runtime::Runtime;
use crate::value::{ClassId, Handle};

use super::{index_arg, member_index, return_object, this_or_invalid};

pub struct ScriptString {
    /// Content followed by one NUL byte.
    bytes: Vec<u8>,
    alloc: Allocation,
}

impl ScriptString {
    /// The empty string. Reserves nothing until it grows.
    pub fn new(mem: MemoryRef) -> Self {
        Self {
            bytes: vec![0],
            alloc: Allocation::new(mem),
        }
    }

    pub fn from_bytes(mem: MemoryRef, content: &[u8]) -> Result<Self, RuntimeError> {
        let mut s = Self::new(mem);
        s.append(content)?;
        Ok(s)
    }

    pub fn from_text(mem: MemoryRef, content: &str) -> Result<Self, RuntimeError> {
        Self::from_bytes(mem, content.as_bytes())
    }

    fn derived(&self, content: &[u8]) -> Result<Self, RuntimeError> {
        Self::from_bytes(self.alloc.memory().clone(), content)
    }

    pub fn len(&self) -> usize {
        self.bytes.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserved bytes, terminator included.
    pub fn capacity(&self) -> usize {
        self.alloc.size()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.get(..self.len()).unwrap_or(&[])
    }

    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()).ok()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }

    fn reserve(&mut self, needed: usize) -> Result<(), RuntimeError> {
        if needed <= self.alloc.size() {
            return Ok(());
        }
        let capacity = round_to_grain(needed);
        if capacity > MAX_BUFFER {
            return Err(oversized(capacity));
        }
        log::trace!("string grows {} -> {} bytes", self.alloc.size(), capacity);
        self.bytes
            .try_reserve_exact(capacity.saturating_sub(self.bytes.len()))
            .map_err(|_| oversized(capacity))?;
        if let Err(err) = self.alloc.resize(capacity) {
            self.bytes.shrink_to(self.alloc.size());
            return Err(err);
        }
        Ok(())
    }

    pub fn append(&mut self, extra: &[u8]) -> Result<(), RuntimeError> {
        let needed = self
            .len()
            .checked_add(extra.len())
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| oversized(usize::MAX))?;
        self.reserve(needed)?;
        self.bytes.pop();
        self.bytes.extend_from_slice(extra);
        self.bytes.push(0);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Derivations
    // ------------------------------------------------------------------

    fn clamp(&self, start: usize, count: usize) -> (usize, usize) {
        let start = start.min(self.len());
        let end = start.saturating_add(count).min(self.len());
        (start, end)
    }

    fn range(&self, start: usize, end: usize) -> &[u8] {
        self.as_bytes().get(start..end).unwrap_or(&[])
    }

    pub fn insert(&self, pos: usize, extra: &[u8]) -> Result<Self, RuntimeError> {
        let pos = pos.min(self.len());
        let mut out = Vec::with_capacity(self.len() + extra.len());
        out.extend_from_slice(self.range(0, pos));
        out.extend_from_slice(extra);
        out.extend_from_slice(self.range(pos, self.len()));
        self.derived(&out)
    }

    pub fn remove(&self, start: usize, count: usize) -> Result<Self, RuntimeError> {
        let (start, end) = self.clamp(start, count);
        let mut out = self.range(0, start).to_vec();
        out.extend_from_slice(self.range(end, self.len()));
        self.derived(&out)
    }

    pub fn sub_string(&self, start: usize, count: usize) -> Result<Self, RuntimeError> {
        let (start, end) = self.clamp(start, count);
        self.derived(self.range(start, end))
    }

    pub fn left(&self, count: usize) -> Result<Self, RuntimeError> {
        self.sub_string(0, count)
    }

    pub fn right(&self, count: usize) -> Result<Self, RuntimeError> {
        let count = count.min(self.len());
        self.sub_string(self.len() - count, count)
    }

    pub fn to_upper(&self) -> Result<Self, RuntimeError> {
        self.derived(&self.as_bytes().to_ascii_uppercase())
    }

    pub fn to_lower(&self) -> Result<Self, RuntimeError> {
        self.derived(&self.as_bytes().to_ascii_lowercase())
    }

    pub fn trim(&self) -> Result<Self, RuntimeError> {
        self.derived(self.as_bytes().trim_ascii())
    }

    pub fn trim_start(&self) -> Result<Self, RuntimeError> {
        self.derived(self.as_bytes().trim_ascii_start())
    }

    pub fn trim_end(&self) -> Result<Self, RuntimeError> {
        self.derived(self.as_bytes().trim_ascii_end())
    }

    /// Replace every occurrence of `from`. An empty pattern matches nothing.
    pub fn replace(&self, from: &[u8], to: &[u8]) -> Result<Self, RuntimeError> {
        if from.is_empty() {
            return self.derived(self.as_bytes());
        }
        let mut out = Vec::with_capacity(self.len());
        let mut rest = self.as_bytes();
        while let Some(pos) = find_bytes(rest, from) {
            out.extend_from_slice(rest.get(..pos).unwrap_or(&[]));
            out.extend_from_slice(to);
            rest = rest.get(pos + from.len()..).unwrap_or(&[]);
        }
        out.extend_from_slice(rest);
        self.derived(&out)
    }

    /// Replace every byte found in `set` with `with`.
    pub fn replace_chars(&self, set: &[u8], with: u8) -> Result<Self, RuntimeError> {
        let out: Vec<u8> = self
            .as_bytes()
            .iter()
            .map(|b| if set.contains(b) { with } else { *b })
            .collect();
        self.derived(&out)
    }

    pub fn reverse(&self) -> Result<Self, RuntimeError> {
        let mut out = self.as_bytes().to_vec();
        out.reverse();
        self.derived(&out)
    }

    pub fn repeat(&self, times: usize) -> Result<Self, RuntimeError> {
        let total = buffer_size(self.len(), times)?;
        let mut out = Self::new(self.alloc.memory().clone());
        out.reserve(total.saturating_add(1))?;
        for _ in 0..times {
            out.append(self.as_bytes())?;
        }
        Ok(out)
    }

    /// `count` copies of one byte.
    pub fn fill(mem: MemoryRef, byte: u8, count: usize) -> Result<Self, RuntimeError> {
        let mut out = Self::new(mem);
        out.reserve(count.saturating_add(1))?;
        out.bytes.pop();
        out.bytes.resize(count, byte);
        out.bytes.push(0);
        Ok(out)
    }

    pub fn join<'a>(
        mem: MemoryRef,
        parts: impl IntoIterator<Item = &'a [u8]>,
        separator: &[u8],
    ) -> Result<Self, RuntimeError> {
        let mut out = Self::new(mem);
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                out.append(separator)?;
            }
            out.append(part)?;
        }
        Ok(out)
    }

    /// Split on `separator`. An empty separator yields one piece per byte.
    pub fn split(&self, separator: &[u8]) -> Vec<Vec<u8>> {
        if separator.is_empty() {
            return self.as_bytes().iter().map(|b| vec![*b]).collect();
        }
        let mut pieces = Vec::new();
        let mut rest = self.as_bytes();
        while let Some(pos) = find_bytes(rest, separator) {
            pieces.push(rest.get(..pos).unwrap_or(&[]).to_vec());
            rest = rest.get(pos + separator.len()..).unwrap_or(&[]);
        }
        pieces.push(rest.to_vec());
        pieces
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Position of `needle` at or after `start`, -1 when absent.
    pub fn find(&self, needle: &[u8], start: usize) -> i64 {
        let start = start.min(self.len());
        find_bytes(self.range(start, self.len()), needle).map_or(-1, |pos| (start + pos) as i64)
    }

    /// Last position of `needle`, -1 when absent.
    pub fn reverse_find(&self, needle: &[u8]) -> i64 {
        if needle.len() > self.len() {
            return -1;
        }
        (0..=self.len() - needle.len())
            .rev()
            .find(|&i| self.range(i, i + needle.len()) == needle)
            .map_or(-1, |pos| pos as i64)
    }

    pub fn find_char(&self, byte: u8, start: usize) -> i64 {
        self.find_any(&[byte], start)
    }

    /// First position at or after `start` holding any byte of `set`.
    pub fn find_any(&self, set: &[u8], start: usize) -> i64 {
        let start = start.min(self.len());
        self.range(start, self.len())
            .iter()
            .position(|b| set.contains(b))
            .map_or(-1, |pos| (start + pos) as i64)
    }

    pub fn contains(&self, needle: &[u8]) -> bool {
        find_bytes(self.as_bytes(), needle).is_some()
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.as_bytes().starts_with(prefix)
    }

    pub fn ends_with(&self, suffix: &[u8]) -> bool {
        self.as_bytes().ends_with(suffix)
    }

    /// Length of the leading run made only of bytes in `set`.
    pub fn span_including(&self, set: &[u8]) -> usize {
        self.as_bytes()
            .iter()
            .take_while(|b| set.contains(b))
            .count()
    }

    /// Length of the leading run made only of bytes not in `set`.
    pub fn span_excluding(&self, set: &[u8]) -> usize {
        self.as_bytes()
            .iter()
            .take_while(|b| !set.contains(b))
            .count()
    }

    pub fn char_at(&self, index: usize) -> Option<u8> {
        self.as_bytes().get(index).copied()
    }

    pub fn compare(&self, other: &[u8]) -> i32 {
        self.as_bytes().cmp(other) as i32
    }

    pub fn compare_ignore_case(&self, other: &[u8]) -> i32 {
        let a = self.as_bytes().iter().map(u8::to_ascii_lowercase);
        let b = other.iter().map(u8::to_ascii_lowercase);
        a.cmp(b) as i32
    }

    pub fn equals(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }

    pub fn equals_ignore_case(&self, other: &[u8]) -> bool {
        self.as_bytes().eq_ignore_ascii_case(other)
    }

    /// Leading decimal (or `0x` hex) integer, 0 when there is none.
    pub fn to_int(&self) -> i64 {
        let text = self.as_bytes().trim_ascii();
        let (negative, digits) = match text.split_first() {
            Some((b'-', rest)) => (true, rest),
            Some((b'+', rest)) => (false, rest),
            _ => (false, text),
        };
        let (radix, digits) = match digits {
            [b'0', b'x' | b'X', rest @ ..] => (16, rest),
            _ => (10, digits),
        };
        let mut value: i64 = 0;
        for b in digits {
            let Some(d) = char::from(*b).to_digit(radix) else {
                break;
            };
            value = value.wrapping_mul(i64::from(radix)).wrapping_add(i64::from(d));
        }
        if negative { value.wrapping_neg() } else { value }
    }

    /// Longest leading float literal, 0.0 when there is none.
    pub fn to_float(&self) -> f64 {
        let text = self.as_bytes().trim_ascii();
        let prefix = text
            .iter()
            .take_while(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'))
            .count();
        (1..=prefix)
            .rev()
            .find_map(|end| {
                let candidate = std::str::from_utf8(text.get(..end)?).ok()?;
                candidate.parse::<f64>().ok()
            })
            .unwrap_or(0.0)
    }

    /// C-style escaping of quotes, backslashes and control bytes.
    pub fn escape(&self) -> Result<Self, RuntimeError> {
        let mut out = Vec::with_capacity(self.len());
        for &b in self.as_bytes() {
            match b {
                b'\\' => out.extend_from_slice(b"\\\\"),
                b'"' => out.extend_from_slice(b"\\\""),
                b'\n' => out.extend_from_slice(b"\\n"),
                b'\r' => out.extend_from_slice(b"\\r"),
                b'\t' => out.extend_from_slice(b"\\t"),
                0 => out.extend_from_slice(b"\\0"),
                b if b < 0x20 || b == 0x7f => {
                    out.extend_from_slice(format!("\\x{:02x}", b).as_bytes());
                }
                b => out.push(b),
            }
        }
        self.derived(&out)
    }

    /// Inverse of [`ScriptString::escape`]. Unknown escapes keep the
    /// escaped byte.
    pub fn unescape(&self) -> Result<Self, RuntimeError> {
        let mut out = Vec::with_capacity(self.len());
        let mut iter = self.as_bytes().iter().copied().peekable();
        while let Some(b) = iter.next() {
            if b != b'\\' {
                out.push(b);
                continue;
            }
            match iter.next() {
                Some(b'n') => out.push(b'\n'),
                Some(b'r') => out.push(b'\r'),
                Some(b't') => out.push(b'\t'),
                Some(b'0') => out.push(0),
                Some(b'x') => {
                    let mut value = 0u8;
                    for _ in 0..2 {
                        match iter.peek().and_then(|d| char::from(*d).to_digit(16)) {
                            Some(d) => {
                                value = value.wrapping_mul(16).wrapping_add(d as u8);
                                iter.next();
                            }
                            None => break,
                        }
                    }
                    out.push(value);
                }
                Some(other) => out.push(other),
                None => out.push(b'\\'),
            }
        }
        self.derived(&out)
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ============================================================================
// Script binding
// ============================================================================

const DECLARATION: &str = "\
class string {
    int length();
    string append(string text);
    string insert(int pos, string text);
    string remove(int start, int count);
    string substring(int start, int count);
    string left(int count);
    string right(int count);
    int find(string needle, int start);
    int reverseFind(string needle);
    int findChar(int ch, int start);
    int findAny(string set, int start);
    int contains(string needle);
    int startsWith(string prefix);
    int endsWith(string suffix);
    int compare(string other);
    int compareIgnoreCase(string other);
    int equals(string other);
    int equalsIgnoreCase(string other);
    int charAt(int index);
    string toUpper();
    string toLower();
    string trim();
    string trimLeft();
    string trimRight();
    string replace(string from, string to);
    string replaceChars(string set, int ch);
    int spanIncluding(string set);
    int spanExcluding(string set);
    string reverse();
    string repeat(int times);
    array split(string separator);
    int toInt();
    float toFloat();
    string escape();
    string unescape();
    static string fill(int ch, int count);
    static string join(array parts, string separator);
}";

const MEMBERS: &[&str] = &[
    "length",
    "append",
    "insert",
    "remove",
    "substring",
    "left",
    "right",
    "find",
    "reverseFind",
    "findChar",
    "findAny",
    "contains",
    "startsWith",
    "endsWith",
    "compare",
    "compareIgnoreCase",
    "equals",
    "equalsIgnoreCase",
    "charAt",
    "toUpper",
    "toLower",
    "trim",
    "trimLeft",
    "trimRight",
    "replace",
    "replaceChars",
    "spanIncluding",
    "spanExcluding",
    "reverse",
    "repeat",
    "split",
    "toInt",
    "toFloat",
    "escape",
    "unescape",
];

const STATICS: &[&str] = &["fill", "join"];

/// Protocol entry of the built-in string type.
pub struct StringType;

fn with_this<R>(this: &Handle, f: impl FnOnce(&ScriptString) -> R) -> Result<R, RuntimeError> {
    this_or_invalid(this.with_string(f), "string")
}

impl NativeType for StringType {
    fn name(&self) -> &str {
        "string"
    }

    fn declaration(&self) -> Result<String, RuntimeError> {
        Ok(DECLARATION.to_string())
    }

    fn version(&self) -> Result<String, RuntimeError> {
        Ok(env!("CARGO_PKG_VERSION").to_string())
    }

    fn member_index(&self, name: &str) -> Option<usize> {
        member_index(MEMBERS, name)
    }

    fn static_index(&self, name: &str) -> Option<usize> {
        member_index(STATICS, name)
    }

    fn new_object(&self, rt: &mut Runtime, _class: ClassId) -> Result<Handle, RuntimeError> {
        rt.new_string("")
    }

    fn call_static(&self, func: usize, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
        match STATICS.get(func).copied() {
            Some("fill") => {
                let byte = cx.arg_int(0) as u8;
                let count = index_arg(cx, 1);
                let mem = cx.runtime().memory().clone();
                return_object(cx, ScriptString::fill(mem, byte, count)?)
            }
            Some("join") => {
                let separator = cx.arg_bytes(1).unwrap_or_default();
                let parts: Vec<Vec<u8>> = cx
                    .arg_handle(0)
                    .with_array(|arr| {
                        arr.iter()
                            .map(|h| h.with_string(|s| s.as_bytes().to_vec()).unwrap_or_default())
                            .collect()
                    })
                    .unwrap_or_default();
                let mem = cx.runtime().memory().clone();
                let joined = ScriptString::join(mem, parts.iter().map(Vec::as_slice), &separator)?;
                return_object(cx, joined)
            }
            _ => Err(RuntimeError::unsupported(format!("string static {}", func))),
        }
    }

    fn call_member(&self, func: usize, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
        let this = cx.this().clone();
        let member = MEMBERS
            .get(func)
            .copied()
            .ok_or_else(|| RuntimeError::unsupported(format!("string member {}", func)))?;
        let text = cx.arg_bytes(0).unwrap_or_default();
        match member {
            "length" => cx.return_int(with_this(&this, |s| s.len())? as i64),
            "append" => {
                this_or_invalid(this.with_string_mut(|s| s.append(&text)), "string")??;
                cx.set_return(this);
            }
            "insert" => {
                let extra = cx.arg_bytes(1).unwrap_or_default();
                let pos = index_arg(cx, 0);
                let out = with_this(&this, |s| s.insert(pos, &extra))??;
                return return_object(cx, out);
            }
            "remove" | "substring" => {
                let (start, count) = (index_arg(cx, 0), index_arg(cx, 1));
                let out = with_this(&this, |s| {
                    if member == "remove" {
                        s.remove(start, count)
                    } else {
                        s.sub_string(start, count)
                    }
                })??;
                return return_object(cx, out);
            }
            "left" | "right" => {
                let count = index_arg(cx, 0);
                let out = with_this(&this, |s| {
                    if member == "left" { s.left(count) } else { s.right(count) }
                })??;
                return return_object(cx, out);
            }
            "find" => {
                let start = index_arg(cx, 1);
                cx.return_int(with_this(&this, |s| s.find(&text, start))?);
            }
            "reverseFind" => cx.return_int(with_this(&this, |s| s.reverse_find(&text))?),
            "findChar" => {
                let byte = cx.arg_int(0) as u8;
                let start = index_arg(cx, 1);
                cx.return_int(with_this(&this, |s| s.find_char(byte, start))?);
            }
            "findAny" => {
                let start = index_arg(cx, 1);
                cx.return_int(with_this(&this, |s| s.find_any(&text, start))?);
            }
            "contains" => cx.return_bool(with_this(&this, |s| s.contains(&text))?),
            "startsWith" => cx.return_bool(with_this(&this, |s| s.starts_with(&text))?),
            "endsWith" => cx.return_bool(with_this(&this, |s| s.ends_with(&text))?),
            "compare" => cx.return_int(i64::from(with_this(&this, |s| s.compare(&text))?)),
            "compareIgnoreCase" => {
                cx.return_int(i64::from(with_this(&this, |s| s.compare_ignore_case(&text))?));
            }
            "equals" => cx.return_bool(with_this(&this, |s| s.equals(&text))?),
            "equalsIgnoreCase" => {
                cx.return_bool(with_this(&this, |s| s.equals_ignore_case(&text))?);
            }
            "charAt" => {
                let index = index_arg(cx, 0);
                let byte = with_this(&this, |s| s.char_at(index))?;
                cx.return_int(byte.map_or(-1, i64::from));
            }
            "toUpper" | "toLower" | "trim" | "trimLeft" | "trimRight" | "reverse" | "escape"
            | "unescape" => {
                let out = with_this(&this, |s| match member {
                    "toUpper" => s.to_upper(),
                    "toLower" => s.to_lower(),
                    "trim" => s.trim(),
                    "trimLeft" => s.trim_start(),
                    "trimRight" => s.trim_end(),
                    "reverse" => s.reverse(),
                    "escape" => s.escape(),
                    _ => s.unescape(),
                })??;
                return return_object(cx, out);
            }
            "replace" => {
                let to = cx.arg_bytes(1).unwrap_or_default();
                let out = with_this(&this, |s| s.replace(&text, &to))??;
                return return_object(cx, out);
            }
            "replaceChars" => {
                let with = cx.arg_int(1) as u8;
                let out = with_this(&this, |s| s.replace_chars(&text, with))??;
                return return_object(cx, out);
            }
            "spanIncluding" => cx.return_int(with_this(&this, |s| s.span_including(&text))? as i64),
            "spanExcluding" => cx.return_int(with_this(&this, |s| s.span_excluding(&text))? as i64),
            "repeat" => {
                let times = index_arg(cx, 0);
                let out = with_this(&this, |s| s.repeat(times))??;
                return return_object(cx, out);
            }
            "split" => {
                let separator = text;
                let pieces = with_this(&this, |s| s.split(&separator))?;
                let rt = cx.runtime();
                let array = rt.new_array()?;
                for (i, piece) in pieces.iter().enumerate() {
                    let item = rt.new_string_bytes(piece)?;
                    this_or_invalid(array.with_array_mut(|a| a.set(i as i64, item)), "array")??;
                }
                cx.set_return(array);
            }
            "toInt" => cx.return_int(with_this(&this, |s| s.to_int())?),
            "toFloat" => cx.return_float(with_this(&this, |s| s.to_float())?),
            _ => return Err(RuntimeError::unsupported(format!("string member {}", member))),
        }
        Ok(())
    }
}
