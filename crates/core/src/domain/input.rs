// Job Input Model
//
// JSON-compatible tree that may additionally hold binary files. Files are
// replaced by uploaded URLs before the input leaves the client.

use serde_json::{Number, Value};

/// A binary value to upload
#[derive(Debug, Clone, PartialEq)]
pub struct FileInput {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

impl FileInput {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: None,
            file_name: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

/// Job input value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum InputValue {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<InputValue>),
    /// Entries keep their insertion order
    Object(Vec<(String, InputValue)>),
    File(FileInput),
}

impl InputValue {
    /// Build an object from key/value pairs
    pub fn object<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<InputValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        InputValue::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn file(file: FileInput) -> Self {
        InputValue::File(file)
    }

    /// Number of `File` values anywhere in the tree
    pub fn file_count(&self) -> usize {
        match self {
            InputValue::File(_) => 1,
            InputValue::Array(items) => items.iter().map(InputValue::file_count).sum(),
            InputValue::Object(entries) => entries.iter().map(|(_, v)| v.file_count()).sum(),
            _ => 0,
        }
    }
}

impl From<Value> for InputValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => InputValue::Null,
            Value::Bool(b) => InputValue::Bool(b),
            Value::Number(n) => InputValue::Number(n),
            Value::String(s) => InputValue::String(s),
            Value::Array(items) => InputValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                InputValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<FileInput> for InputValue {
    fn from(file: FileInput) -> Self {
        InputValue::File(file)
    }
}

impl From<&str> for InputValue {
    fn from(s: &str) -> Self {
        InputValue::String(s.to_string())
    }
}

impl From<String> for InputValue {
    fn from(s: String) -> Self {
        InputValue::String(s)
    }
}

impl From<bool> for InputValue {
    fn from(b: bool) -> Self {
        InputValue::Bool(b)
    }
}

impl From<i64> for InputValue {
    fn from(n: i64) -> Self {
        InputValue::Number(n.into())
    }
}

impl<T: Into<InputValue>> From<Vec<T>> for InputValue {
    fn from(items: Vec<T>) -> Self {
        InputValue::Array(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_preserves_key_order() {
        let input: InputValue = json!({"zeta": 1, "alpha": [true, null], "mid": "x"}).into();
        let InputValue::Object(entries) = input else {
            panic!("expected object");
        };
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_file_count_walks_nested_values() {
        let input = InputValue::object([
            ("image", InputValue::file(FileInput::new(vec![1u8, 2, 3]))),
            (
                "masks",
                InputValue::Array(vec![
                    FileInput::new(vec![4u8]).into(),
                    InputValue::object([("inner", InputValue::file(FileInput::new(vec![5u8])))]),
                    "https://cdn.example.com/a.png".into(),
                ]),
            ),
        ]);
        assert_eq!(input.file_count(), 3);
    }
}
