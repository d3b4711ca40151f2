use std::io::Write;

use crate::probe::Reply;
use crate::state::Session;

/// One line per reply, in the classic ping layout
pub fn format_reply(reply: &Reply) -> String {
    let mut line = format!(
        "{} bytes from {}: seq={}",
        reply.bytes, reply.source, reply.sequence
    );
    if let Some(ttl) = reply.ttl {
        line.push_str(&format!(" ttl={}", ttl));
    }
    if let Some(port) = reply.target_port {
        line.push_str(&format!(" port={}", port));
    }
    line.push_str(&format!(" time={:.3} ms", reply.delay_ms()));
    line
}

/// Generate the `--- host ping statistics ---` block
pub fn generate_report<W: Write>(session: &Session, mut writer: W) -> std::io::Result<()> {
    let summary = session.summary();

    writeln!(writer, "--- {} ping statistics ---", summary.host)?;
    writeln!(
        writer,
        "{} packets transmitted, {} received, {:.1}% packet loss ({} to {})",
        summary.sent, summary.received, summary.packet_loss, summary.protocol, summary.destination_ip
    )?;

    if let (Some(min), Some(avg), Some(max)) = (summary.min_rtt, summary.avg_rtt, summary.max_rtt) {
        write!(writer, "rtt min/avg/max = {:.3}/{:.3}/{:.3} ms", min, avg, max)?;
        if let Some(ttl) = summary.ttl {
            write!(writer, ", ttl {}", ttl)?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

/// Generate report to string
pub fn generate_report_string(session: &Session) -> String {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail
    let _ = generate_report(session, &mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}
