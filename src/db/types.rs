//! Rendering of driver rows as JSON.
//!
//! Values are decoded by trying a fixed list of Rust types per backend, in
//! order; the first compatible decode wins. Columns whose type has no mapping
//! render as `null`.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Map, Value as JsonValue};
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row};

/// Conversion of a driver row into a JSON object keyed by column name.
pub trait RowToJson {
    fn column_names(&self) -> Vec<String>;

    fn to_json_map(&self) -> Map<String, JsonValue>;
}

/// Try each `type => conversion` pair in order and return the first decode
/// that succeeds, or `null`.
macro_rules! decode_first {
    ($row:expr, $idx:expr, [$($ty:ty => $conv:expr),+ $(,)?]) => {{
        $(
            if let Ok(v) = $row.try_get::<Option<$ty>, _>($idx) {
                v.map($conv).unwrap_or(JsonValue::Null)
            } else
        )+
        {
            JsonValue::Null
        }
    }};
}

/// Binary columns render as standard base64.
fn bytes_to_json(bytes: Vec<u8>) -> JsonValue {
    JsonValue::String(STANDARD.encode(bytes))
}

fn column_names<R: Row>(row: &R) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

impl RowToJson for PgRow {
    fn column_names(&self) -> Vec<String> {
        column_names(self)
    }

    fn to_json_map(&self) -> Map<String, JsonValue> {
        let mut map = Map::new();
        for (idx, column) in self.columns().iter().enumerate() {
            let value = decode_first!(self, idx, [
                bool => JsonValue::from,
                i16 => JsonValue::from,
                i32 => JsonValue::from,
                i64 => JsonValue::from,
                f32 => JsonValue::from,
                f64 => JsonValue::from,
                String => JsonValue::from,
                JsonValue => |v| v,
                chrono::DateTime<chrono::Utc> => |v| JsonValue::from(v.to_rfc3339()),
                chrono::NaiveDateTime => |v| JsonValue::from(v.to_string()),
                chrono::NaiveDate => |v| JsonValue::from(v.to_string()),
                Vec<u8> => bytes_to_json,
            ]);
            map.insert(column.name().to_string(), value);
        }
        map
    }
}

impl RowToJson for MySqlRow {
    fn column_names(&self) -> Vec<String> {
        column_names(self)
    }

    fn to_json_map(&self) -> Map<String, JsonValue> {
        let mut map = Map::new();
        for (idx, column) in self.columns().iter().enumerate() {
            let value = decode_first!(self, idx, [
                i64 => JsonValue::from,
                u64 => JsonValue::from,
                f64 => JsonValue::from,
                f32 => JsonValue::from,
                String => JsonValue::from,
                JsonValue => |v| v,
                chrono::NaiveDateTime => |v| JsonValue::from(v.to_string()),
                chrono::NaiveDate => |v| JsonValue::from(v.to_string()),
                Vec<u8> => bytes_to_json,
            ]);
            map.insert(column.name().to_string(), value);
        }
        map
    }
}

impl RowToJson for SqliteRow {
    fn column_names(&self) -> Vec<String> {
        column_names(self)
    }

    fn to_json_map(&self) -> Map<String, JsonValue> {
        let mut map = Map::new();
        for (idx, column) in self.columns().iter().enumerate() {
            let value = decode_first!(self, idx, [
                i64 => JsonValue::from,
                f64 => JsonValue::from,
                String => JsonValue::from,
                Vec<u8> => bytes_to_json,
            ]);
            map.insert(column.name().to_string(), value);
        }
        map
    }
}
