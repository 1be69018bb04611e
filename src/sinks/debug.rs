//! Debug sink: one JSON document per measurement.

use super::{Sink, SinkError};
use crate::measurement::Measurement;
use std::io::{self, Write};

pub struct DebugSink<W> {
    out: W,
}

impl DebugSink<io::Stdout> {
    pub fn stdout() -> Self {
        DebugSink::new(io::stdout())
    }
}

impl<W: Write> DebugSink<W> {
    pub fn new(out: W) -> Self {
        DebugSink { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + 'static> Sink for DebugSink<W> {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn publish(&mut self, measurement: &Measurement) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.out, measurement)?;
        writeln!(self.out)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_MAC, sample_measurement};

    #[test]
    fn writes_one_json_line_per_measurement() {
        let mut sink = DebugSink::new(Vec::new());
        let mut m = sample_measurement(TEST_MAC);
        m.name = Some("Sauna".to_string());

        sink.publish(&m).unwrap();
        sink.publish(&m).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let json: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(json["mac"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(json["name"], "Sauna");
        assert_eq!(json["data_format"], 5);
        assert!(json.get("dataFormat").is_none());
        assert_eq!(json["temperature"], 24.3);
        assert!(json.get("pm2p5").is_none());
    }
}
