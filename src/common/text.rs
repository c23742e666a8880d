// Text section codec
//
// EWF metadata sections (EVF1 header/header2, EVF2 case_data and
// device_information) share one textual shape:
//
//   number_of_objects \n object_name \n key1 \t key2 ... \n val1 \t val2 ... \n
//
// optionally UTF-16LE with a BOM, then zlib-compressed on disk.

use crate::error::{EwfError, Result};

/// True when the buffer opens with a UTF-16 byte order mark
pub fn has_bom(data: &[u8]) -> bool {
    data.len() >= 2 && (data[0] == 0xFF || data[1] == 0xFE)
}

/// Decode UTF-16LE bytes (BOM included or not) into UTF-8
pub fn utf16le_to_utf8(data: &[u8]) -> String {
    let body = if data.starts_with(&[0xFF, 0xFE]) {
        &data[2..]
    } else {
        data
    };
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encode UTF-8 text as BOM + UTF-16LE bytes
pub fn utf8_to_utf16le(text: &str) -> Vec<u8> {
    let mut out = vec![0xFF, 0xFE];
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Ordered key-value table carried by metadata sections
///
/// Insertion order is preserved so encode output is deterministic.
#[derive(Debug, Clone)]
pub struct MetadataTable {
    pub number_of_objects: String,
    pub object_name: String,
    entries: Vec<(String, String)>,
}

impl MetadataTable {
    pub fn new(object_name: &str) -> Self {
        Self {
            number_of_objects: "1".to_string(),
            object_name: object_name.to_string(),
            entries: Vec::new(),
        }
    }

    /// Insert or replace a value by key
    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
        } else {
            self.entries.push((key.to_string(), value.to_string()));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse the decompressed text of a metadata section
    ///
    /// `known_key` gates every identifier on line 2; an unrecognized key is a
    /// hard error and no partial table is returned.
    pub fn parse(data: &[u8], known_key: impl Fn(&str) -> bool) -> Result<Self> {
        let text = if has_bom(data) {
            utf16le_to_utf8(data)
        } else {
            String::from_utf8_lossy(data).to_string()
        };

        let mut number_of_objects = String::new();
        let mut object_name = String::new();
        let mut keys: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        for (line_num, line) in text.split('\n').enumerate() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            match line_num {
                0 => {
                    if let Some(c) = line.chars().next() {
                        number_of_objects = c.to_string();
                    }
                }
                1 => object_name = line.to_string(),
                2 => {
                    for key in line.split('\t') {
                        if !known_key(key) {
                            return Err(EwfError::UnknownMediaKey(key.to_string()));
                        }
                        keys.push(key.to_string());
                    }
                }
                3 => values.extend(line.split('\t').map(str::to_string)),
                _ => {}
            }
        }

        let entries = keys
            .into_iter()
            .enumerate()
            .map(|(i, k)| (k, values.get(i).cloned().unwrap_or_default()))
            .collect();

        Ok(Self {
            number_of_objects,
            object_name,
            entries,
        })
    }

    /// Render the table back into its on-disk textual shape
    ///
    /// EVF2 sections end with a blank line, EVF1 headers do not.
    pub fn to_text(&self, trailing_blank_line: bool) -> String {
        let keys: Vec<&str> = self.entries.iter().map(|(k, _)| k.as_str()).collect();
        let values: Vec<&str> = self.entries.iter().map(|(_, v)| v.as_str()).collect();

        let mut text = format!(
            "{}\n{}\n{}\n{}\n",
            self.number_of_objects,
            self.object_name,
            keys.join("\t"),
            values.join("\t"),
        );
        if trailing_blank_line {
            text.push('\n');
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_round_trip() {
        let text = "1\nmain\nc\te\nCASE-1\tExaminer\n";
        let encoded = utf8_to_utf16le(text);
        assert!(has_bom(&encoded));
        assert_eq!(utf16le_to_utf8(&encoded), text);
    }

    #[test]
    fn test_parse_table() {
        let data = b"1\nmain\nc\tn\nCASE-1\tEVD-1\n";
        let table = MetadataTable::parse(data, |k| k == "c" || k == "n").unwrap();

        assert_eq!(table.number_of_objects, "1");
        assert_eq!(table.object_name, "main");
        assert_eq!(table.get("c"), Some("CASE-1"));
        assert_eq!(table.get("n"), Some("EVD-1"));
    }

    #[test]
    fn test_parse_rejects_unknown_key() {
        let data = b"1\nmain\nc\tbogus\nCASE-1\tx\n";
        match MetadataTable::parse(data, |k| k == "c") {
            Err(EwfError::UnknownMediaKey(k)) => assert_eq!(k, "bogus"),
            other => panic!("expected UnknownMediaKey, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_utf16_with_bom() {
        let encoded = utf8_to_utf16le("1\nmain\nc\nCASE-9\n");
        let table = MetadataTable::parse(&encoded, |k| k == "c").unwrap();
        assert_eq!(table.get("c"), Some("CASE-9"));
    }

    #[test]
    fn test_text_round_trip_preserves_order() {
        let mut table = MetadataTable::new("main");
        table.set("c", "CASE-1");
        table.set("e", "Someone");
        table.set("c", "CASE-2"); // upsert keeps position

        let text = table.to_text(false);
        assert_eq!(text, "1\nmain\nc\te\nCASE-2\tSomeone\n");

        let reparsed = MetadataTable::parse(text.as_bytes(), |_| true).unwrap();
        assert_eq!(reparsed.get("c"), Some("CASE-2"));
        assert_eq!(reparsed.get("e"), Some("Someone"));
    }
}
