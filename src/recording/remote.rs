//! remote.rs
//! Remote-control vocabulary carried over the event channel.
//!
//! Every payload starting with `$` is a command. Commands are consumed by the
//! recorder and never written to the data file; everything else is data.

use crate::acquisition::types::ForceChannel;

pub const COMMAND_PREFIX: &[u8] = b"$";

// connection handshake (handled inside the UDP connection)
pub const CONNECT: &[u8] = b"$connect";
pub const UNCONNECT: &[u8] = b"$unconnect";
pub const REPLY_OK: &[u8] = b"$ok";
pub const PING: &[u8] = b"$ping";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    Start,
    Pause,
    Quit,
    Ping,
    /// `$gFX1`, `$gTZ2`, ...: latest value of one channel of sensor 1 or 2.
    GetValue { channel: ForceChannel, sensor: u8 },
    GetThresholdLevel { sensor: u8 },
    GetVersion,
    SetFilename(String),
    SetThresholds(String),
    SetLevelChangeDetection { sensor: u8 },
    SetResponseMinMaxDetection { sensor: u8 },
    Feedback(String),
    Value(String),
    Connect,
    Unconnect,
    Ok,
    Unknown(String),
}

/// Tags with an argument tail; `$gTL2` is checked before `$gTL`.
fn parse_tagged(text: &str) -> Option<RemoteCommand> {
    if text == "$gTL2" {
        Some(RemoteCommand::GetThresholdLevel { sensor: 2 })
    } else if text == "$gTL" {
        Some(RemoteCommand::GetThresholdLevel { sensor: 1 })
    } else if let Some(a) = text.strip_prefix("$sFN") {
        Some(RemoteCommand::SetFilename(a.to_string()))
    } else if let Some(a) = text.strip_prefix("$sTH") {
        Some(RemoteCommand::SetThresholds(a.to_string()))
    } else if let Some(a) = text.strip_prefix("$sCD") {
        sensor_digit(a).map(|sensor| RemoteCommand::SetLevelChangeDetection { sensor })
    } else if let Some(a) = text.strip_prefix("$sMD") {
        sensor_digit(a).map(|sensor| RemoteCommand::SetResponseMinMaxDetection { sensor })
    } else if let Some(a) = text.strip_prefix("$xFB") {
        Some(RemoteCommand::Feedback(a.to_string()))
    } else if let Some(a) = text.strip_prefix("$xVL") {
        Some(RemoteCommand::Value(a.to_string()))
    } else {
        text.strip_prefix("$g").and_then(parse_getter)
    }
}

fn sensor_digit(s: &str) -> Option<u8> {
    match s {
        "1" => Some(1),
        "2" => Some(2),
        _ => None,
    }
}

fn parse_getter(tail: &str) -> Option<RemoteCommand> {
    if tail == "VR" {
        return Some(RemoteCommand::GetVersion);
    }
    let (name, sensor) = tail.split_at_checked(2)?;
    let channel = ForceChannel::ALL
        .into_iter()
        .find(|c| c.name().eq_ignore_ascii_case(name))?;
    Some(RemoteCommand::GetValue {
        channel,
        sensor: sensor_digit(sensor)?,
    })
}

impl RemoteCommand {
    /// `None` if `payload` is not a command at all.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if !payload.starts_with(COMMAND_PREFIX) {
            return None;
        }
        let text = String::from_utf8_lossy(payload);
        let text = text.trim_end();

        let cmd = match text {
            "$SRT" => RemoteCommand::Start,
            "$PSE" => RemoteCommand::Pause,
            "$QUT" => RemoteCommand::Quit,
            "$PNG" | "$ping" => RemoteCommand::Ping,
            "$connect" => RemoteCommand::Connect,
            "$unconnect" => RemoteCommand::Unconnect,
            "$ok" => RemoteCommand::Ok,
            _ => parse_tagged(text).unwrap_or_else(|| RemoteCommand::Unknown(text.to_string())),
        };
        Some(cmd)
    }

    pub fn encode(&self) -> Vec<u8> {
        let s = match self {
            RemoteCommand::Start => "$SRT".to_string(),
            RemoteCommand::Pause => "$PSE".to_string(),
            RemoteCommand::Quit => "$QUT".to_string(),
            RemoteCommand::Ping => "$PNG".to_string(),
            RemoteCommand::GetValue { channel, sensor } => {
                format!("$g{}{}", channel.name().to_ascii_uppercase(), sensor)
            }
            RemoteCommand::GetThresholdLevel { sensor: 1 } => "$gTL".to_string(),
            RemoteCommand::GetThresholdLevel { sensor } => format!("$gTL{}", sensor),
            RemoteCommand::GetVersion => "$gVR".to_string(),
            RemoteCommand::SetFilename(name) => format!("$sFN{}", name),
            RemoteCommand::SetThresholds(t) => format!("$sTH{}", t),
            RemoteCommand::SetLevelChangeDetection { sensor } => format!("$sCD{}", sensor),
            RemoteCommand::SetResponseMinMaxDetection { sensor } => format!("$sMD{}", sensor),
            RemoteCommand::Feedback(msg) => format!("$xFB{}", msg),
            RemoteCommand::Value(v) => format!("$xVL{}", v),
            RemoteCommand::Connect => "$connect".to_string(),
            RemoteCommand::Unconnect => "$unconnect".to_string(),
            RemoteCommand::Ok => "$ok".to_string(),
            RemoteCommand::Unknown(raw) => raw.clone(),
        };
        s.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_is_not_a_command() {
        assert_eq!(RemoteCommand::parse(b"trial 12 onset"), None);
        assert_eq!(RemoteCommand::parse(b""), None);
    }

    #[test]
    fn parses_basic_and_tagged_commands() {
        assert_eq!(RemoteCommand::parse(b"$SRT"), Some(RemoteCommand::Start));
        assert_eq!(RemoteCommand::parse(b"$QUT\n"), Some(RemoteCommand::Quit));
        assert_eq!(
            RemoteCommand::parse(b"$gFZ2"),
            Some(RemoteCommand::GetValue { channel: ForceChannel::Fz, sensor: 2 })
        );
        assert_eq!(
            RemoteCommand::parse(b"$gTL2"),
            Some(RemoteCommand::GetThresholdLevel { sensor: 2 })
        );
        assert_eq!(RemoteCommand::parse(b"$gVR"), Some(RemoteCommand::GetVersion));
        assert_eq!(
            RemoteCommand::parse(b"$sFNsubject_07"),
            Some(RemoteCommand::SetFilename("subject_07".into()))
        );
        assert_eq!(
            RemoteCommand::parse(b"$sCD1"),
            Some(RemoteCommand::SetLevelChangeDetection { sensor: 1 })
        );
        assert_eq!(RemoteCommand::parse(b"$zzz"), Some(RemoteCommand::Unknown("$zzz".into())));
    }

    #[test]
    fn encode_parses_back() {
        let cmds = [
            RemoteCommand::Pause,
            RemoteCommand::GetValue { channel: ForceChannel::Tx, sensor: 1 },
            RemoteCommand::GetThresholdLevel { sensor: 1 },
            RemoteCommand::Feedback("started".into()),
        ];
        for cmd in cmds {
            assert_eq!(RemoteCommand::parse(&cmd.encode()), Some(cmd));
        }
    }
}
