use chrono::SecondsFormat;

use crate::types::TapMessage;

/// Encodes a message as one protocol line, without the trailing newline.
///
/// Empty `key_properties` are written, empty `bookmark_properties` are omitted.
pub fn encode_message(message: &TapMessage) -> String {
    let mut map = serde_json::Map::new();
    map.insert(
        "type".to_string(),
        serde_json::Value::String(message.type_tag().to_string()),
    );

    match message {
        TapMessage::Schema(schema) => {
            map.insert("stream".to_string(), schema.stream.clone().into());
            map.insert("schema".to_string(), (&schema.schema).into());
            map.insert(
                "key_properties".to_string(),
                schema.key_properties.clone().into(),
            );
            if !schema.bookmark_properties.is_empty() {
                map.insert(
                    "bookmark_properties".to_string(),
                    schema.bookmark_properties.clone().into(),
                );
            }
        }
        TapMessage::Record(record) => {
            map.insert("stream".to_string(), record.stream.clone().into());
            map.insert(
                "record".to_string(),
                serde_json::Value::Object(
                    record
                        .record
                        .iter()
                        .map(|(key, value)| (key.clone(), value.into()))
                        .collect(),
                ),
            );
            if let Some(time_extracted) = record.time_extracted {
                map.insert(
                    "time_extracted".to_string(),
                    time_extracted
                        .to_rfc3339_opts(SecondsFormat::AutoSi, true)
                        .into(),
                );
            }
        }
        TapMessage::State(state) => {
            map.insert("value".to_string(), (&state.value).into());
        }
    }

    serde_json::Value::Object(map).to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::protocol::decode_line;
    use crate::types::{Record, RecordMessage, SchemaMessage, StateMessage, Value};

    fn round_trip(message: TapMessage) {
        let line = encode_message(&message);
        assert!(!line.contains('\n'));
        assert_eq!(decode_line(&line).unwrap(), Some(message));
    }

    #[test]
    fn every_message_kind_survives_encoding() {
        let schema = decode_line(
            r#"{"type":"SCHEMA","stream":"orders","schema":{"type":"object"},"key_properties":["id"]}"#,
        )
        .unwrap()
        .unwrap();
        round_trip(schema);

        let mut record = Record::new();
        record.insert("id".to_string(), Value::from(1i64));
        record.insert("note".to_string(), Value::from("line\nbreak"));
        round_trip(TapMessage::Record(RecordMessage {
            stream: "orders".to_string(),
            record,
            time_extracted: Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()),
        }));

        round_trip(TapMessage::State(StateMessage {
            value: Value::from(vec![Value::Null, Value::from(2.5)]),
        }));
    }

    #[test]
    fn bookmark_properties_are_omitted_when_empty() {
        let line = encode_message(&TapMessage::Schema(SchemaMessage {
            stream: "orders".to_string(),
            schema: Value::Object(Default::default()),
            key_properties: vec![],
            bookmark_properties: vec![],
        }));

        assert!(line.contains(r#""key_properties":[]"#));
        assert!(!line.contains("bookmark_properties"));
    }
}
