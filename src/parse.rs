use imap_proto::types::{MailboxDatum, Response, Status};

use super::error::{Error, ParseError, Result};
use super::types::Capabilities;

/// What a single line received during `IDLE` means for the selected mailbox.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum IdleEvent {
    /// The mailbox contents changed and should be synchronized.
    MailboxChanged,
    /// The server is closing the connection.
    Bye,
    /// The line was a literal prefix; more data follows on the next line.
    Incomplete,
    /// Anything else, such as a keep-alive `* OK Still here`.
    Other,
}

pub(crate) fn parse_capabilities(lines: &[u8]) -> Result<Capabilities> {
    let mut lines = lines;
    let mut caps = Capabilities::default();
    loop {
        if lines.is_empty() {
            break Ok(caps);
        }

        match imap_proto::parser::parse_response(lines) {
            Ok((rest, Response::Capabilities(c))) => {
                lines = rest;
                for capability in &c {
                    caps.insert(capability);
                }
            }
            Ok((rest, _)) => {
                lines = rest;
            }
            _ => {
                break Err(Error::Parse(ParseError::Invalid(lines.to_vec())));
            }
        }
    }
}

fn classify(resp: &Response<'_>) -> IdleEvent {
    match resp {
        Response::MailboxData(MailboxDatum::Exists(_))
        | Response::MailboxData(MailboxDatum::Recent(_))
        | Response::Expunge(_)
        | Response::Vanished { .. }
        | Response::Fetch(..) => IdleEvent::MailboxChanged,
        Response::Data {
            status: Status::Bye,
            ..
        } => IdleEvent::Bye,
        _ => IdleEvent::Other,
    }
}

pub(crate) fn parse_idle(line: &[u8]) -> Result<IdleEvent> {
    match imap_proto::parser::parse_response(line) {
        Ok((_, resp)) => Ok(classify(&resp)),
        Err(nom::Err::Incomplete(_)) => Ok(IdleEvent::Incomplete),
        Err(_) => Err(Error::Parse(ParseError::Invalid(line.to_vec()))),
    }
}

/// Whether any of the untagged responses in `lines` reports a change to the mailbox.
pub(crate) fn has_mailbox_change(lines: &[u8]) -> Result<bool> {
    let mut lines = lines;
    while !lines.is_empty() {
        match imap_proto::parser::parse_response(lines) {
            Ok((rest, resp)) => {
                if classify(&resp) == IdleEvent::MailboxChanged {
                    return Ok(true);
                }
                lines = rest;
            }
            _ => return Err(Error::Parse(ParseError::Invalid(lines.to_vec()))),
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_capability_test() {
        let expected_capabilities = vec!["IMAP4rev1", "STARTTLS", "AUTH=GSSAPI", "LOGINDISABLED"];
        let lines = b"* CAPABILITY IMAP4rev1 STARTTLS AUTH=GSSAPI LOGINDISABLED\r\n";
        let capabilities = parse_capabilities(lines).unwrap();
        assert_eq!(capabilities.len(), 4);
        for e in expected_capabilities {
            assert!(capabilities.has_str(e));
        }
        assert!(!capabilities.has_str("IDLE"));
    }

    #[test]
    fn parse_capability_case_insensitive() {
        let lines = b"* CAPABILITY IMAP4rev1 idle\r\n";
        let capabilities = parse_capabilities(lines).unwrap();
        assert!(capabilities.has_str("IDLE"));
        assert!(capabilities.has_str("imap4rev1"));
    }

    #[test]
    fn parse_capabilities_w_unilateral() {
        let lines = b"\
                    * CAPABILITY IMAP4rev1 IDLE\r\n\
                    * 4 EXISTS\r\n";
        let capabilities = parse_capabilities(lines).unwrap();
        assert_eq!(capabilities.len(), 2);
        assert!(capabilities.has_str("IDLE"));
    }

    #[test]
    fn parse_capabilities_garbage() {
        let lines = b"not an imap response\r\n";
        match parse_capabilities(lines) {
            Err(Error::Parse(ParseError::Invalid(_))) => {}
            r => panic!("unexpected result: {:?}", r),
        }
    }

    #[test]
    fn drained_lines_with_change() {
        let lines = b"* OK Still here\r\n* 3 EXPUNGE\r\n";
        assert!(has_mailbox_change(lines).unwrap());
        assert!(!has_mailbox_change(b"* OK Still here\r\n").unwrap());
        assert!(!has_mailbox_change(b"").unwrap());
    }

    #[test]
    fn parse_idle_changes() {
        for line in &[
            &b"* 23 EXISTS\r\n"[..],
            &b"* 2 RECENT\r\n"[..],
            &b"* 4 EXPUNGE\r\n"[..],
            &b"* 7 FETCH (FLAGS (\\Seen))\r\n"[..],
        ] {
            assert_eq!(parse_idle(line).unwrap(), IdleEvent::MailboxChanged);
        }
    }

    #[test]
    fn parse_idle_keepalive() {
        assert_eq!(
            parse_idle(b"* OK Still here\r\n").unwrap(),
            IdleEvent::Other
        );
    }

    #[test]
    fn parse_idle_bye() {
        assert_eq!(
            parse_idle(b"* BYE Autologout; idle for too long\r\n").unwrap(),
            IdleEvent::Bye
        );
    }

    #[test]
    fn parse_idle_literal() {
        assert_eq!(
            parse_idle(b"* 2 FETCH (BODY[TEXT] {3}\r\n").unwrap(),
            IdleEvent::Incomplete
        );
    }
}
