use anyhow::Result;
use serde::Serialize;
use std::io::Write;

use crate::config::Config;
use crate::state::{AttemptRecord, Session, Summary};

#[derive(Serialize)]
struct JsonExport<'a> {
    #[serde(flatten)]
    summary: Summary,
    started_at: String,
    config: &'a Config,
    attempts: &'a [AttemptRecord],
}

/// Export session summary plus the attempt log as pretty JSON
pub fn export_json<W: Write>(session: &Session, writer: W) -> Result<()> {
    let export = JsonExport {
        summary: session.summary(),
        started_at: session.started_at.to_rfc3339(),
        config: &session.config,
        attempts: &session.attempts,
    };
    serde_json::to_writer_pretty(writer, &export)?;
    Ok(())
}

/// Export several sessions as one JSON array
pub fn export_json_all<W: Write>(sessions: &[Session], mut writer: W) -> Result<()> {
    writeln!(writer, "[")?;
    for (i, session) in sessions.iter().enumerate() {
        export_json(session, &mut writer)?;
        if i + 1 < sessions.len() {
            write!(writer, ",")?;
        }
        writeln!(writer)?;
    }
    writeln!(writer, "]")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Target;
    use crate::state::session::tests::{ScriptedProbe, reply};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn finished() -> Session {
        let mut session = Session::with_strategy(
            Target::new("localhost", Ipv4Addr::LOCALHOST),
            crate::config::Config {
                interval: Duration::ZERO,
                ..Default::default()
            },
            Box::new(ScriptedProbe::new(vec![Ok(reply(0, 3, Some(64)))])),
        );
        session.run(Some(2), None).unwrap();
        session
    }

    #[test]
    fn test_export_json_fields() {
        let mut buf = Vec::new();
        export_json(&finished(), &mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();

        assert_eq!(value["host"], "localhost");
        assert_eq!(value["destination_ip"], "127.0.0.1");
        assert_eq!(value["sent"], 2);
        assert_eq!(value["received"], 1);
        assert_eq!(value["packet_loss"], 50.0);
        assert_eq!(value["ttl"], 64);
        assert_eq!(value["attempts"].as_array().unwrap().len(), 2);
        assert_eq!(value["attempts"][0]["status"], "reply");
        assert_eq!(value["attempts"][0]["rtt"], 3000);
        assert_eq!(value["attempts"][1]["status"], "timeout");
        assert!(value["attempts"][1]["rtt"].is_null());
    }

    #[test]
    fn test_export_json_all_is_array() {
        let sessions = vec![finished(), finished()];
        let mut buf = Vec::new();
        export_json_all(&sessions, &mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }
}
