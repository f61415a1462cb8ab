//! Renders a VM [`Value`] as user-facing text for `run` and `repl`.
//!
//! `Value`'s own `Debug` impl (`rill_memory::value`) only distinguishes
//! immediates from an opaque `<heap 0x...>` placeholder — enough for VM-
//! internal debugging, not for showing a script's result to a human. This
//! walks the handful of heap kinds a CLI user's program can actually
//! return.

use rill_common::StringTable;
use rill_memory::object::{self, HeapFloat, HeapInteger, HeapString, HeapSymbol, ObjectKind};
use rill_memory::Value;

pub fn display_value(v: Value, strings: &StringTable) -> String {
    if v.is_null() {
        return "null".to_string();
    }
    if v.is_undefined() {
        return "undefined".to_string();
    }
    if let Some(b) = v.as_bool() {
        return b.to_string();
    }
    if let Some(i) = v.as_small_int() {
        return i.to_string();
    }
    if !v.is_heap_ptr() {
        return format!("{v:?}");
    }
    let kind = unsafe { v.as_heap_ptr().as_ref().kind };
    match kind {
        ObjectKind::Integer => unsafe { object::from_value::<HeapInteger>(v) }.value.to_string(),
        ObjectKind::Float => format_float(unsafe { object::from_value::<HeapFloat>(v) }.value),
        ObjectKind::String => unsafe { object::from_value::<HeapString>(v) }.bytes.to_string(),
        ObjectKind::Symbol => format!(":{}", strings.resolve(unsafe { object::from_value::<HeapSymbol>(v) }.name)),
        other => format!("<{other:?}>"),
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else {
        f.to_string()
    }
}
