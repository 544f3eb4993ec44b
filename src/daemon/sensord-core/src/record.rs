//! JSON line records written to the output channel and stdout
//!
//! Every record is serialized into an owned buffer terminated by a newline
//! so it can be handed to a single `write`.

use serde::Serialize;

use crate::transform::{Invalid, Report};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub code: i32,
    pub msg: String,
}

impl Status {
    pub fn new(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }

    pub fn ok(msg: impl Into<String>) -> Self {
        Self::new(0, msg)
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Reply printed on stdout for a command: `{"status":{...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandStatus {
    pub status: Status,
}

impl CommandStatus {
    pub fn new(code: i32, msg: impl Into<String>) -> Self {
        Self {
            status: Status::new(code, msg),
        }
    }
}

/// One-shot read result: data, status and the settings used
#[derive(Debug, Serialize)]
pub struct ReadResult<'a, D: Serialize> {
    pub data: &'a D,
    pub status: Status,
    pub config: &'a serde_json::Value,
}

#[derive(Serialize)]
struct StartedRecord<'a> {
    cmd: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    status: Status,
    id: i32,
}

#[derive(Serialize)]
struct DataRecord<'a, D: Serialize> {
    cmd: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    interval: u64,
    id: i32,
    status: Status,
    data: &'a D,
    config: &'a serde_json::Value,
}

#[derive(Serialize)]
struct DiagnosticRecord<'a> {
    cmd: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    id: i32,
    status: Status,
}

/// Serialize `value` as one newline-terminated line
pub fn to_line<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    Ok(line)
}

/// Fields shared by every record a running daemon emits
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFrame {
    cmd: &'static str,
    interval_ms: u64,
    request_id: i32,
    config: serde_json::Value,
}

impl RecordFrame {
    pub fn new<C: Serialize>(
        cmd: &'static str,
        interval_ms: u64,
        request_id: i32,
        config: &C,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            cmd,
            interval_ms,
            request_id,
            config: serde_json::to_value(config)?,
        })
    }

    pub fn cmd(&self) -> &'static str {
        self.cmd
    }

    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    /// `{"cmd":..,"type":"res","status":{"code":0,..},"id":..}`
    pub fn started(&self, msg: &str) -> Result<Vec<u8>, serde_json::Error> {
        to_line(&StartedRecord {
            cmd: self.cmd,
            kind: "res",
            status: Status::ok(msg),
            id: self.request_id,
        })
    }

    pub fn data<D: Report>(&self, data: &D) -> Result<Vec<u8>, serde_json::Error> {
        to_line(&DataRecord {
            cmd: self.cmd,
            kind: "poll",
            interval: self.interval_ms,
            id: self.request_id,
            status: Status::ok(data.summary()),
            data,
            config: &self.config,
        })
    }

    pub fn diagnostic(&self, invalid: &Invalid) -> Result<Vec<u8>, serde_json::Error> {
        to_line(&DiagnosticRecord {
            cmd: self.cmd,
            kind: "poll",
            id: self.request_id,
            status: Status::new(invalid.code, invalid.msg.as_str()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::ImuReading;

    fn frame() -> RecordFrame {
        RecordFrame::new("imusensor", 250, 7, &serde_json::json!({"samplerate": 60})).unwrap()
    }

    fn parse(line: &[u8]) -> serde_json::Value {
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
        serde_json::from_slice(line).unwrap()
    }

    #[test]
    fn test_started_record() {
        let line = frame().started("Polling started").unwrap();
        assert_eq!(
            parse(&line),
            serde_json::json!({
                "cmd": "imusensor",
                "type": "res",
                "status": {"code": 0, "msg": "Polling started"},
                "id": 7
            })
        );
    }

    #[test]
    fn test_data_record() {
        let reading = ImuReading {
            x: 0.0,
            y: 0.0,
            z: 1.0,
            gx: 0.0,
            gy: 0.0,
            gz: 0.0,
        };
        let json = parse(&frame().data(&reading).unwrap());
        assert_eq!(json["type"], "poll");
        assert_eq!(json["interval"], 250);
        assert_eq!(json["id"], 7);
        assert_eq!(json["status"]["code"], 0);
        assert_eq!(json["data"]["z"], 1.0);
        assert_eq!(json["config"]["samplerate"], 60);
    }

    #[test]
    fn test_diagnostic_record() {
        let json = parse(&frame().diagnostic(&Invalid::new(-22, "Failed to calculate bias")).unwrap());
        assert_eq!(json["status"]["code"], -22);
        assert_eq!(json["status"]["msg"], "Failed to calculate bias");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_command_status_shape() {
        let line = to_line(&CommandStatus::new(-1, "Not running")).unwrap();
        assert_eq!(line, b"{\"status\":{\"code\":-1,\"msg\":\"Not running\"}}\n".to_vec());
    }
}
