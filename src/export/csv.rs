use anyhow::Result;
use std::io::Write;

use crate::state::{AttemptStatus, Session};

pub const CSV_HEADER: &str = "host,ip,protocol,seq,status,rtt_ms,ttl,source,bytes,error";

/// Export session attempts to CSV format, one row per attempt
pub fn export_csv<W: Write>(session: &Session, mut writer: W) -> Result<()> {
    writeln!(writer, "{}", CSV_HEADER)?;
    write_rows(session, &mut writer)
}

/// Write rows without a header, for combining several sessions
pub fn write_rows<W: Write>(session: &Session, mut writer: W) -> Result<()> {
    let protocol = session.protocol();
    for attempt in &session.attempts {
        let status = match attempt.status {
            AttemptStatus::Reply => "reply",
            AttemptStatus::Timeout => "timeout",
            AttemptStatus::Error => "error",
        };

        writeln!(
            writer,
            "{},{},{},{},{},{},{},{},{},{}",
            escape_csv(&session.target.original),
            session.target.resolved,
            protocol,
            attempt.sequence,
            status,
            attempt.rtt_ms().map(|ms| format!("{:.3}", ms)).unwrap_or_default(),
            attempt.ttl.map(|t| t.to_string()).unwrap_or_default(),
            attempt.source.map(|s| s.to_string()).unwrap_or_default(),
            attempt.bytes.map(|b| b.to_string()).unwrap_or_default(),
            escape_csv(attempt.error.as_deref().unwrap_or_default()),
        )?;
    }

    Ok(())
}

/// Escape a string for CSV (quote if contains comma, quote, or newline)
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::probe::Outcome;
    use crate::state::Target;
    use crate::state::session::tests::{ScriptedProbe, reply};
    use std::io;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("simple"), "simple");
        assert_eq!(escape_csv("with,comma"), "\"with,comma\"");
        assert_eq!(escape_csv("with\"quote"), "\"with\"\"quote\"");
    }

    #[test]
    fn test_export_csv_rows() {
        let mut session = Session::with_strategy(
            Target::new("localhost", Ipv4Addr::LOCALHOST),
            Config {
                interval: Duration::ZERO,
                ..Config::default()
            },
            Box::new(ScriptedProbe::new(vec![
                Ok(reply(0, 2, None)),
                Ok(Outcome::Timeout),
                Ok(Outcome::Error(io::Error::other("boom, again").into())),
            ])),
        );
        session.run(Some(3), None).unwrap();

        let mut buf = Vec::new();
        export_csv(&session, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "localhost,127.0.0.1,udp,0,reply,2.000,,127.0.0.1,64,");
        assert_eq!(lines[2], "localhost,127.0.0.1,udp,1,timeout,,,,,");
        assert!(lines[3].starts_with("localhost,127.0.0.1,udp,2,error,,,,,\""));
        assert!(lines[3].contains("boom, again"));
    }
}
