//! Reference builtin operators.
//!
//! These cover the common shape of a delimited-file job: read text, split
//! it into lines, split lines into fields, stamp each row with an id.

use crate::registry::OperatorRegistry;
use crate::trait_::{Emission, Operator, OperatorRole, RecordFeed};
use async_trait::async_trait;
use retl_core::{Record, RetlError, RetlResult, Scalar, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Register every builtin under its definition name
///
/// # Errors
///
/// Returns error if a name is already taken
pub fn register_builtins(registry: &mut OperatorRegistry) -> Result<(), crate::RegistryError> {
    registry.register(TextToLines::NAME, |config: &Value| -> RetlResult<Arc<dyn Operator>> {
        Ok(Arc::new(TextToLines::from_config(config)?))
    })?;
    registry.register(
        DelimitedRecordToArray::NAME,
        |config: &Value| -> RetlResult<Arc<dyn Operator>> {
            Ok(Arc::new(DelimitedRecordToArray::from_config(config)?))
        },
    )?;
    registry.register(GenerateUuid::NAME, |config: &Value| -> RetlResult<Arc<dyn Operator>> {
        Ok(Arc::new(GenerateUuid::from_config(config)?))
    })?;
    registry.register(DefaultStream::NAME, |_config: &Value| -> RetlResult<Arc<dyn Operator>> {
        Ok(Arc::new(DefaultStream))
    })?;
    registry.register(ReadFile::NAME, |config: &Value| -> RetlResult<Arc<dyn Operator>> {
        Ok(Arc::new(ReadFile::from_config(config)?))
    })?;
    registry.register(
        crate::SendFieldsToBranch::NAME,
        |config: &Value| -> RetlResult<Arc<dyn Operator>> {
            Ok(Arc::new(crate::SendFieldsToBranch::from_config(config)?))
        },
    )?;
    Ok(())
}

/// Splits the text in field 0 into one record per line
#[derive(Debug, Clone)]
pub struct TextToLines {
    skip_empty: bool,
}

impl TextToLines {
    /// Registry name
    pub const NAME: &'static str = "TextToLines";

    /// Parse `{skipEmpty?: bool}` (default true)
    ///
    /// # Errors
    ///
    /// Returns error if `skipEmpty` is not a boolean
    pub fn from_config(config: &Value) -> RetlResult<Self> {
        let skip_empty = match config.get("skipEmpty") {
            None => true,
            Some(v) => v
                .as_bool()
                .ok_or_else(|| RetlError::definition(Self::NAME, "`skipEmpty` must be a boolean"))?,
        };
        Ok(Self { skip_empty })
    }
}

#[async_trait]
impl Operator for TextToLines {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn process(&self, record: &Record) -> RetlResult<Emission> {
        let text = record.field(0)?.to_text_lossy();
        let lines = text
            .lines()
            .filter(|line| !(self.skip_empty && line.trim().is_empty()))
            .map(|line| Record::new(vec![Scalar::from(line)]))
            .collect();
        Ok(Emission::many(lines))
    }
}

/// Splits the text in field 0 on a delimiter, honouring an enclosing quote
#[derive(Debug, Clone)]
pub struct DelimitedRecordToArray {
    delimiter: u8,
    enclosed_by: Option<u8>,
}

impl DelimitedRecordToArray {
    /// Registry name
    pub const NAME: &'static str = "DelimitedRecordToArray";

    /// Parse `{delimiter: ",", canBeEnclosedBy?: "\""}`
    ///
    /// # Errors
    ///
    /// Returns error if either option is not a single ASCII character
    pub fn from_config(config: &Value) -> RetlResult<Self> {
        let delimiter = match config.get("delimiter") {
            None => b',',
            Some(v) => single_byte(v, "delimiter")?,
        };
        let enclosed_by = config
            .get("canBeEnclosedBy")
            .map(|v| single_byte(v, "canBeEnclosedBy"))
            .transpose()?;
        Ok(Self {
            delimiter,
            enclosed_by,
        })
    }

    fn reader<'a>(&self, line: &'a str) -> csv::Reader<&'a [u8]> {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .terminator(csv::Terminator::Any(b'\n'));
        match self.enclosed_by {
            Some(quote) => builder.quote(quote),
            None => builder.quoting(false),
        };
        builder.from_reader(line.as_bytes())
    }

    fn split(&self, line: &str) -> RetlResult<Vec<String>> {
        let mut records = self.reader(line).into_records();
        let fields = match records.next() {
            None => return Ok(vec![String::new()]),
            Some(record) => record
                .map_err(|e| RetlError::operator(Self::NAME, e.to_string()))?
                .iter()
                .map(str::to_string)
                .collect(),
        };
        if records.next().is_some() {
            return Err(RetlError::operator(Self::NAME, "line holds more than one record"));
        }
        Ok(fields)
    }
}

fn single_byte(value: &Value, key: &str) -> RetlResult<u8> {
    match value.as_str().map(str::as_bytes) {
        Some(&[b]) if b.is_ascii() => Ok(b),
        _ => Err(RetlError::definition(
            DelimitedRecordToArray::NAME,
            format!("`{}` must be a single ASCII character", key),
        )),
    }
}

#[async_trait]
impl Operator for DelimitedRecordToArray {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn process(&self, record: &Record) -> RetlResult<Emission> {
        let line = record.field(0)?.to_text_lossy();
        Ok(Emission::one(Record::from_texts(self.split(&line)?)))
    }
}

/// Adds a random UUID to each record, at the head or the tail
#[derive(Debug, Clone)]
pub struct GenerateUuid {
    head: bool,
}

impl GenerateUuid {
    /// Registry name
    pub const NAME: &'static str = "GenerateUUID";

    /// Parse `{head?: bool}` (default false, append)
    ///
    /// # Errors
    ///
    /// Returns error if `head` is not a boolean
    pub fn from_config(config: &Value) -> RetlResult<Self> {
        let head = match config.get("head") {
            None => false,
            Some(v) => v
                .as_bool()
                .ok_or_else(|| RetlError::definition(Self::NAME, "`head` must be a boolean"))?,
        };
        Ok(Self { head })
    }
}

#[async_trait]
impl Operator for GenerateUuid {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn process(&self, record: &Record) -> RetlResult<Emission> {
        let id = Scalar::Text(uuid::Uuid::new_v4().to_string());
        let out = if self.head {
            record.with_head(id)
        } else {
            record.with_tail(id)
        };
        Ok(Emission::one(out))
    }
}

/// Source reading all of standard input as one text record
#[derive(Debug, Clone, Copy)]
pub struct DefaultStream;

impl DefaultStream {
    /// Registry name
    pub const NAME: &'static str = "DefaultStream";
}

#[async_trait]
impl Operator for DefaultStream {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn role(&self) -> OperatorRole {
        OperatorRole::Source
    }

    async fn process(&self, _record: &Record) -> RetlResult<Emission> {
        Ok(Emission::none())
    }

    async fn produce(&self, feed: RecordFeed) -> RetlResult<()> {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .map_err(|e| RetlError::operator(Self::NAME, e.to_string()))?;
        debug!(bytes = text.len(), "Read default stream");
        feed.send(Record::new(vec![Scalar::Text(text)])).await
    }
}

/// Source reading one file as one text record
#[derive(Debug, Clone)]
pub struct ReadFile {
    path: PathBuf,
}

impl ReadFile {
    /// Registry name
    pub const NAME: &'static str = "ReadFile";

    /// Parse `{path: "..."}`
    ///
    /// # Errors
    ///
    /// Returns error if `path` is missing or not a string
    pub fn from_config(config: &Value) -> RetlResult<Self> {
        let path = config
            .require("path", Self::NAME)?
            .as_str()
            .ok_or_else(|| RetlError::definition(Self::NAME, "`path` must be a string"))?;
        Ok(Self { path: path.into() })
    }
}

#[async_trait]
impl Operator for ReadFile {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn role(&self) -> OperatorRole {
        OperatorRole::Source
    }

    async fn process(&self, _record: &Record) -> RetlResult<Emission> {
        Ok(Emission::none())
    }

    async fn produce(&self, feed: RecordFeed) -> RetlResult<()> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| RetlError::operator(Self::NAME, format!("{}: {}", self.path.display(), e)))?;
        feed.send(Record::new(vec![Scalar::Text(text)])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn csv() -> DelimitedRecordToArray {
        let config: Value = serde_json::from_str(r#"{"delimiter": ",", "canBeEnclosedBy": "\""}"#).unwrap();
        DelimitedRecordToArray::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_text_to_lines() {
        let op = TextToLines::from_config(&Value::Null).unwrap();
        let record = Record::from_texts(["a,b\r\n\nc,d\n"]);
        let emission = op.process(&record).await.unwrap();
        assert_eq!(
            emission.records,
            vec![Record::from_texts(["a,b"]), Record::from_texts(["c,d"])]
        );
    }

    #[tokio::test]
    async fn test_text_to_lines_keeps_empty() {
        let config = Value::object([("skipEmpty", Value::Bool(false))]);
        let op = TextToLines::from_config(&config).unwrap();
        let emission = op.process(&Record::from_texts(["a\n\nb"])).await.unwrap();
        assert_eq!(emission.records.len(), 3);
    }

    #[test]
    fn test_split_enclosed_fields() {
        let op = csv();
        assert_eq!(
            op.split(r#"1,"Doe, Jane","say ""hi""",,x"#).unwrap(),
            vec!["1", "Doe, Jane", r#"say "hi""#, "", "x"]
        );
        assert_eq!(op.split("").unwrap(), vec![""]);
    }

    #[test]
    fn test_split_without_quoting() {
        let config = Value::object([("delimiter", Value::from("|"))]);
        let op = DelimitedRecordToArray::from_config(&config).unwrap();
        assert_eq!(op.split(r#"a|"b|c"#).unwrap(), vec!["a", "\"b", "c"]);
    }

    #[test]
    fn test_split_keeps_carriage_return_and_quoted_newline() {
        let op = csv();
        assert_eq!(op.split("a,b\rc").unwrap(), vec!["a", "b\rc"]);
        assert_eq!(op.split("a,\"x\ny\"").unwrap(), vec!["a", "x\ny"]);
    }

    #[tokio::test]
    async fn test_delimited_record_failure() {
        let emission = csv().process(&Record::from_texts(["a,b\nc,d"])).await;
        assert!(matches!(emission, Err(RetlError::OperatorFailure { .. })));
    }

    #[test]
    fn test_delimiter_must_be_single_ascii_char() {
        for bad in ["::", "", "§"] {
            let config = Value::object([("delimiter", Value::from(bad))]);
            assert!(matches!(
                DelimitedRecordToArray::from_config(&config),
                Err(RetlError::InvalidDefinition { .. })
            ));
        }
        let config = Value::object([("canBeEnclosedBy", Value::Integer(1))]);
        assert!(DelimitedRecordToArray::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_generate_uuid_head_insert() {
        let op = GenerateUuid::from_config(&Value::object([("head", Value::Bool(true))])).unwrap();
        let record = Record::from_texts(["a", "b", "c"]);
        let out = op.process(&record).await.unwrap().records.remove(0);

        assert_eq!(out.len(), 4);
        assert_eq!(&out.values()[1..], record.values());
        let id = out.get(0).and_then(Scalar::as_text).unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn test_generate_uuid_tail() {
        let op = GenerateUuid::from_config(&Value::Null).unwrap();
        let out = op.process(&Record::from_texts(["a"])).await.unwrap().records.remove(0);
        assert_eq!(out.get(0), Some(&Scalar::from("a")));
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_read_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        std::fs::write(&path, "1,2\n3,4\n").unwrap();

        let op = ReadFile::from_config(&Value::object([(
            "path",
            Value::from(path.to_string_lossy().into_owned()),
        )]))
        .unwrap();
        assert_eq!(op.role(), OperatorRole::Source);

        let (tx, mut rx) = mpsc::channel(4);
        op.produce(RecordFeed::new(tx)).await.unwrap();
        assert_eq!(rx.recv().await, Some(Record::from_texts(["1,2\n3,4\n"])));
    }

    #[test]
    fn test_register_builtins() {
        let mut registry = OperatorRegistry::new();
        register_builtins(&mut registry).unwrap();
        for name in ["TextToLines", "DelimitedRecordToArray", "GenerateUUID", "DefaultStream", "ReadFile", "SendFieldsToBranch"] {
            assert!(registry.contains(name), "missing {}", name);
        }
    }
}
