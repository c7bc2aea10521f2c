use crate::error::{GatewayError, Result};
use serde::Serialize;
use serde_json::Value;
use std::io::Write;

/// One output line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub line: usize,
    pub command: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// HTTP status the transport layer would have answered with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl CommandResult {
    pub fn success(line: usize, command: &str, result: Value) -> Self {
        Self {
            line,
            command: command.to_string(),
            ok: true,
            result: Some(result),
            error: None,
            status: None,
        }
    }

    pub fn failure(line: usize, command: &str, error: &GatewayError) -> Self {
        Self {
            line,
            command: command.to_string(),
            ok: false,
            result: None,
            error: Some(error.to_string()),
            status: Some(error.http_status()),
        }
    }
}

/// Writes results as JSON lines.
pub struct ResultWriter<W: Write> {
    writer: W,
}

impl<W: Write> ResultWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_result(&mut self, result: &CommandResult) -> Result<()> {
        serde_json::to_writer(&mut self.writer, result)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
