//! Byte-exact encoding of image documents.
//!
//! Image IDs are the SHA-256 of an image document as the Docker engine encodes it, so two
//! things must match the engine: how per-layer documents are folded together, and how the
//! result is written out.
//!
//! Per-layer documents are decoded one after another into the same value. A key that is
//! present overwrites, objects merge key by key, arrays replace, and `null` clears lists, maps
//! and optional objects but leaves plain values and embedded objects untouched.
//!
//! Output is compact, with `<`, `>`, `&`, U+2028 and U+2029 written as `\u` escapes, and with
//! control characters other than `\n`, `\r` and `\t` written as `\u00XX`.

use std::io;

use serde::Serialize;
use serde_json::{
    ser::{CharEscape, CompactFormatter, Formatter},
    Map, Value,
};

use crate::{LayerpullError, LayerpullResult};

use super::V1Image;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A JSON formatter that escapes strings the way the Docker engine does.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineFormatter;

/// Folds per-layer image documents, oldest first, into one image document.
#[derive(Debug, Clone)]
pub struct LayerConfigAccumulator {
    state: Map<String, Value>,
}

/// How a field reacts to an incoming value.
#[derive(Clone, Copy)]
enum Field {
    /// Strings, numbers, booleans and timestamps. `null` is ignored.
    Scalar,

    /// Lists and optional numbers. Any value, `null` included, replaces.
    Replace,

    /// An embedded object. `null` is ignored, objects merge.
    Struct(fn(&str) -> Field),

    /// An optional object. `null` clears, objects merge.
    OptionalStruct(fn(&str) -> Field),

    /// A map. `null` clears, objects add entries and `null` entries become `zero`.
    Map(fn() -> Value),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LayerConfigAccumulator {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self { state: Map::new() }
    }

    /// Folds the next layer's document in.
    pub fn apply(&mut self, layer: &str) -> LayerpullResult<()> {
        match serde_json::from_str::<Value>(layer)? {
            Value::Object(incoming) => merge_object(&mut self.state, incoming, image_field),
            Value::Null => {}
            other => {
                return Err(LayerpullError::manifest_decode(
                    "layer config",
                    format!("expected an object, found {other}"),
                ))
            }
        }

        Ok(())
    }

    /// Decodes the document folded so far.
    pub fn image(&self) -> LayerpullResult<V1Image> {
        Ok(serde_json::from_value(Value::Object(self.state.clone()))?)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Formatter for EngineFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            let escaped = match c {
                '<' => "\\u003c",
                '>' => "\\u003e",
                '&' => "\\u0026",
                '\u{2028}' => "\\u2028",
                '\u{2029}' => "\\u2029",
                _ => continue,
            };

            writer.write_all(fragment[start..i].as_bytes())?;
            writer.write_all(escaped.as_bytes())?;
            start = i + c.len_utf8();
        }

        writer.write_all(fragment[start..].as_bytes())
    }

    fn write_char_escape<W>(&mut self, writer: &mut W, char_escape: CharEscape) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        match char_escape {
            CharEscape::Backspace => writer.write_all(b"\\u0008"),
            CharEscape::FormFeed => writer.write_all(b"\\u000c"),
            other => CompactFormatter.write_char_escape(writer, other),
        }
    }
}

impl Default for LayerConfigAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Serializes a value with the [`EngineFormatter`].
pub fn to_engine_json<T: Serialize + ?Sized>(value: &T) -> LayerpullResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, EngineFormatter);
    value.serialize(&mut serializer)?;
    Ok(buffer)
}

fn merge_object(
    target: &mut Map<String, Value>,
    incoming: Map<String, Value>,
    field: fn(&str) -> Field,
) {
    for (key, value) in incoming {
        let kind = field(&key);
        merge_field(target, key, value, kind);
    }
}

fn merge_field(target: &mut Map<String, Value>, key: String, value: Value, kind: Field) {
    match (kind, value) {
        (Field::Scalar | Field::Struct(_), Value::Null) => {}
        (Field::Struct(inner) | Field::OptionalStruct(inner), Value::Object(incoming)) => {
            let slot = target
                .entry(key)
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(existing) = slot {
                merge_object(existing, incoming, inner);
            }
        }
        (Field::Map(zero), Value::Object(incoming)) => {
            let slot = target
                .entry(key)
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(existing) = slot {
                for (entry, value) in incoming {
                    let value = if value.is_null() { zero() } else { value };
                    existing.insert(entry, value);
                }
            }
        }
        (_, value) => {
            target.insert(key, value);
        }
    }
}

fn image_field(key: &str) -> Field {
    match key {
        "container_config" => Field::Struct(container_config_field),
        "config" => Field::OptionalStruct(container_config_field),
        _ => Field::Scalar,
    }
}

fn container_config_field(key: &str) -> Field {
    match key {
        "ExposedPorts" | "Volumes" => Field::Map(|| Value::Object(Map::new())),
        "Labels" => Field::Map(|| Value::String(String::new())),
        "Env" | "Cmd" | "Entrypoint" | "OnBuild" | "Shell" | "StopTimeout" => Field::Replace,
        "Healthcheck" => Field::OptionalStruct(health_config_field),
        _ => Field::Scalar,
    }
}

fn health_config_field(key: &str) -> Field {
    match key {
        "Test" => Field::Replace,
        _ => Field::Scalar,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
