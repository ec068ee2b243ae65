//! Wire protocol message types
//!
//! Messages are newline-terminated UTF-8 text lines with `|`-separated
//! fields. No length prefix, no checksum. Unknown tags are skipped by the
//! receiver; that is the protocol's only forward-compatibility mechanism.
//! Position updates are a tagless pair of floats, `cx|cy`.

use crate::error::{Error, Result};

/// One wire line, either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Host greeting; marks the connection live.
    Welcome,
    /// Client greeting; marks the connection live.
    Hello,
    /// Authoritative seed from the host.
    Seed(i64),
    /// Sender's display name.
    User(String),
    /// Level the sender is currently in.
    Level(String),
    /// Animation change, with optional queued animation and flag.
    Anim {
        name: String,
        queue: Option<i64>,
        flag: Option<bool>,
    },
    /// Position update.
    Position { x: f32, y: f32 },
    /// Ask the peer to disconnect.
    Kick,
}

impl Message {
    /// Encode as a single wire line including the trailing newline.
    pub fn encode(&self) -> String {
        match self {
            Message::Welcome => "WELCOME\n".to_string(),
            Message::Hello => "HELLO\n".to_string(),
            Message::Seed(n) => format!("SEED|{}\n", n),
            Message::User(name) => format!("USER|{}\n", name),
            Message::Level(level) => format!("LEVEL|{}\n", level),
            Message::Anim { name, queue, flag } => {
                let mut line = format!("ANIM|{}", name);
                if let Some(queue) = queue {
                    line.push_str(&format!("|{}", queue));
                }
                if let Some(flag) = flag {
                    line.push_str(if *flag { "|1" } else { "|0" });
                }
                line.push('\n');
                line
            }
            Message::Position { x, y } => format!("{}|{}\n", x, y),
            Message::Kick => "KICK\n".to_string(),
        }
    }

    /// Parse one line (with or without its terminator).
    ///
    /// Returns `Ok(None)` for blank lines and unknown tags (both are
    /// skipped), `Err` for a known tag with a malformed payload. The caller
    /// logs and drops malformed lines without ending the receive loop.
    pub fn parse(line: &str) -> Result<Option<Message>> {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            return Ok(None);
        }

        let mut fields = line.split('|');
        let tag = fields.next().unwrap_or_default();

        match tag {
            "WELCOME" => Ok(Some(Message::Welcome)),
            "HELLO" => Ok(Some(Message::Hello)),
            "KICK" => Ok(Some(Message::Kick)),
            "SEED" => {
                let n = required(fields.next(), "SEED", line)?
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| malformed("SEED", line))?;
                Ok(Some(Message::Seed(n)))
            }
            "USER" => {
                let name = required(fields.next(), "USER", line)?;
                Ok(Some(Message::User(name.to_string())))
            }
            "LEVEL" => {
                let level = required(fields.next(), "LEVEL", line)?;
                Ok(Some(Message::Level(level.to_string())))
            }
            "ANIM" => {
                let name = required(fields.next(), "ANIM", line)?.to_string();
                let queue = match fields.next() {
                    Some(raw) => Some(
                        raw.trim()
                            .parse::<i64>()
                            .map_err(|_| malformed("ANIM", line))?,
                    ),
                    None => None,
                };
                let flag = match fields.next() {
                    Some(raw) => Some(parse_flag(raw).ok_or_else(|| malformed("ANIM", line))?),
                    None => None,
                };
                Ok(Some(Message::Anim { name, queue, flag }))
            }
            _ => Ok(parse_position(line)),
        }
    }
}

fn required<'a>(field: Option<&'a str>, tag: &str, line: &str) -> Result<&'a str> {
    field.ok_or_else(|| malformed(tag, line))
}

fn malformed(tag: &str, line: &str) -> Error {
    Error::Protocol(format!("malformed {} payload: {:?}", tag, line))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

/// A tagless `x|y` float pair is a position update. Anything else without a
/// known tag is an unknown message and is skipped.
fn parse_position(line: &str) -> Option<Message> {
    let (x, y) = line.split_once('|')?;
    let x = x.trim().parse::<f32>().ok()?;
    let y = y.trim().parse::<f32>().ok()?;
    Some(Message::Position { x, y })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seed() {
        assert_eq!(Message::parse("SEED|42\n").unwrap(), Some(Message::Seed(42)));
        assert_eq!(Message::parse("SEED|-7").unwrap(), Some(Message::Seed(-7)));
    }

    #[test]
    fn test_malformed_seed_is_an_error() {
        assert!(Message::parse("SEED|abc").is_err());
        assert!(Message::parse("SEED").is_err());
    }

    #[test]
    fn test_unknown_tag_is_skipped() {
        assert_eq!(Message::parse("FOO|bar").unwrap(), None);
        assert_eq!(Message::parse("PING").unwrap(), None);
    }

    #[test]
    fn test_blank_line_is_skipped() {
        assert_eq!(Message::parse("").unwrap(), None);
        assert_eq!(Message::parse("\r\n").unwrap(), None);
    }

    #[test]
    fn test_parse_position() {
        assert_eq!(
            Message::parse("12.5|-3.25\n").unwrap(),
            Some(Message::Position { x: 12.5, y: -3.25 })
        );
        // Not a float pair, no known tag: skipped, not an error.
        assert_eq!(Message::parse("12.5|up").unwrap(), None);
    }

    #[test]
    fn test_parse_anim_optional_fields() {
        assert_eq!(
            Message::parse("ANIM|Jump").unwrap(),
            Some(Message::Anim {
                name: "Jump".into(),
                queue: None,
                flag: None
            })
        );
        assert_eq!(
            Message::parse("ANIM|Fall|3|1").unwrap(),
            Some(Message::Anim {
                name: "Fall".into(),
                queue: Some(3),
                flag: Some(true)
            })
        );
        assert!(Message::parse("ANIM|Fall|soon").is_err());
    }

    #[test]
    fn test_encode_parse_agree() {
        for msg in [
            Message::Welcome,
            Message::Hello,
            Message::Kick,
            Message::Seed(999_999),
            Message::User("alice".into()),
            Message::Level("mines-2".into()),
            Message::Anim {
                name: "Run".into(),
                queue: Some(1),
                flag: Some(false),
            },
            Message::Position { x: -1.5, y: 0.0 },
        ] {
            let line = msg.encode();
            assert!(line.ends_with('\n'));
            assert_eq!(Message::parse(&line).unwrap(), Some(msg));
        }
    }
}
