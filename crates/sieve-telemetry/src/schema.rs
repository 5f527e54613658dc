//! Arrow schema definitions for persisted tables.
//!
//! Tables defined:
//! - `log_records`: messages accepted by the durable sink
//! - `dead_letters`: CRITICAL batches that exhausted sink retries

use arrow::datatypes::{DataType, Field, Schema};

/// Table names for durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableName {
    LogRecords,
    DeadLetters,
}

impl TableName {
    /// Get the string name for directory layout.
    pub fn as_str(&self) -> &'static str {
        match self {
            TableName::LogRecords => "log_records",
            TableName::DeadLetters => "dead_letters",
        }
    }

    /// Get the default row group size for this table.
    pub fn row_group_size(&self) -> usize {
        match self {
            TableName::LogRecords => 1024 * 1024, // 1MB
            TableName::DeadLetters => 64 * 1024,  // 64KB
        }
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn string_field(name: &str, nullable: bool) -> Field {
    Field::new(name, DataType::Utf8, nullable)
}

fn record_fields() -> Vec<Field> {
    vec![
        Field::new("message_id", DataType::UInt64, false),
        Field::new("timestamp_seconds", DataType::Int64, false),
        Field::new("timestamp_micros", DataType::UInt32, false),
        string_field("application", false),
        string_field("component", false),
        string_field("function", false),
        string_field("file", true),
        Field::new("line", DataType::UInt32, true),
        Field::new("process_id", DataType::UInt32, false),
        Field::new("thread_id", DataType::UInt32, false),
        Field::new("type", DataType::UInt8, false),
        Field::new("importance", DataType::UInt8, false),
        string_field("severity_text", false),
        string_field("payload", false),
    ]
}

/// Schema for `log_records`.
pub fn log_records_schema() -> Schema {
    Schema::new(record_fields())
}

/// Schema for `dead_letters`: the record layout plus failure context.
pub fn dead_letters_schema() -> Schema {
    let mut fields = record_fields();
    fields.push(string_field("sink", false));
    fields.push(string_field("failure", false));
    fields.push(Field::new("attempts", DataType::UInt32, false));
    Schema::new(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout_column_order() {
        let schema = log_records_schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(
            names,
            vec![
                "message_id",
                "timestamp_seconds",
                "timestamp_micros",
                "application",
                "component",
                "function",
                "file",
                "line",
                "process_id",
                "thread_id",
                "type",
                "importance",
                "severity_text",
                "payload",
            ]
        );
    }

    #[test]
    fn dead_letters_extend_records() {
        let schema = dead_letters_schema();
        assert_eq!(schema.fields().len(), log_records_schema().fields().len() + 3);
        assert!(schema.field_with_name("attempts").is_ok());
    }
}
