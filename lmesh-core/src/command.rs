//! Textual controller commands
//!
//! The controller answers node reports with ASCII, space separated commands:
//!
//! ```text
//! <address> invite <assigned address> <identity>
//! <address> trace <counter>...
//! <address> update <routing byte>...
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CommandError;

/// A parsed controller command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Accept the node with `identity` under address `assigned`
    Invite { target: u8, assigned: u8, identity: u64 },
    /// Ask `target`'s path to resend the listed counters
    Trace { target: u8, counters: Vec<u8> },
    /// Routing registry delta for `target`
    Update { target: u8, keys: Vec<u8> },
}

impl Command {
    /// Address of the node the command is for
    pub fn target(&self) -> u8 {
        match self {
            Command::Invite { target, .. } | Command::Trace { target, .. } | Command::Update { target, .. } => *target,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Command::Invite { .. } => "invite",
            Command::Trace { .. } => "trace",
            Command::Update { .. } => "update",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.target(), self.verb())?;
        match self {
            Command::Invite { assigned, identity, .. } => write!(f, " {} {}", assigned, identity),
            Command::Trace { counters: bytes, .. } | Command::Update { keys: bytes, .. } => {
                bytes.iter().try_for_each(|byte| write!(f, " {}", byte))
            }
        }
    }
}

fn argument<T: FromStr>(verb: &'static str, raw: &str) -> Result<T, CommandError> {
    raw.parse().map_err(|_| CommandError::InvalidArgument {
        verb,
        argument: raw.to_string(),
    })
}

fn byte_list(verb: &'static str, args: &[&str]) -> Result<Vec<u8>, CommandError> {
    args.iter().map(|raw| argument(verb, raw)).collect()
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let target = words.next().ok_or(CommandError::Empty)?;
        let target: u8 = target
            .parse()
            .map_err(|_| CommandError::InvalidTarget(target.to_string()))?;
        let verb = words
            .next()
            .ok_or_else(|| CommandError::MissingVerb(line.to_string()))?;
        let args: Vec<&str> = words.collect();

        match verb {
            "invite" => {
                let [assigned, identity] = args.as_slice() else {
                    return Err(CommandError::InvalidArgument {
                        verb: "invite",
                        argument: args.join(" "),
                    });
                };
                Ok(Command::Invite {
                    target,
                    assigned: argument("invite", assigned)?,
                    identity: argument("invite", identity)?,
                })
            }
            "trace" => Ok(Command::Trace {
                target,
                counters: byte_list("trace", &args)?,
            }),
            "update" => Ok(Command::Update {
                target,
                keys: byte_list("update", &args)?,
            }),
            other => Err(CommandError::UnknownVerb(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format() {
        let lines = [
            "3 invite 7 18446744073709551615",
            "5 trace 1 2 31",
            "1 update 7 135 71",
            "4 update",
        ];
        for line in lines {
            let command: Command = line.parse().unwrap();
            assert_eq!(command.to_string(), line);
        }
    }

    #[test]
    fn test_parse_fields() {
        let command: Command = "9 invite 12 42".parse().unwrap();
        assert_eq!(
            command,
            Command::Invite {
                target: 9,
                assigned: 12,
                identity: 42
            }
        );
        assert_eq!(command.target(), 9);
    }

    #[test]
    fn test_rejects_unknown_verb() {
        assert_eq!(
            "3 reboot".parse::<Command>(),
            Err(CommandError::UnknownVerb("reboot".into()))
        );
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert!(matches!("x trace 1".parse::<Command>(), Err(CommandError::InvalidTarget(_))));
        assert!(matches!("3".parse::<Command>(), Err(CommandError::MissingVerb(_))));
        assert!(matches!(
            "3 update 300".parse::<Command>(),
            Err(CommandError::InvalidArgument { verb: "update", .. })
        ));
        assert!(matches!(
            "3 invite 4".parse::<Command>(),
            Err(CommandError::InvalidArgument { verb: "invite", .. })
        ));
    }
}
