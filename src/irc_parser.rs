use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub(crate) const CRLF: &str = "\r\n";

/// Decoded IRCv3 message tags.
///
/// `all` keeps every tag name/value pair verbatim (values undecoded); the
/// remaining fields are the decoded forms of the tags the library knows
/// about. Malformed values decode to the field's default.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Tags {
    pub badges: HashSet<String>,
    /// Display-name color as a 24-bit RRGGBB value, 0 when absent or malformed.
    pub color: u32,
    pub display_name: String,
    /// Emote id mapped to the [begin, end] character spans where it occurs.
    pub emotes: HashMap<u64, Vec<(u32, u32)>>,
    /// Seconds past the UNIX epoch when the message was sent (`tmi-sent-ts`).
    pub timestamp: u64,
    /// Milliseconds past `timestamp`, in 0..=999.
    pub time_milliseconds: u32,
    pub channel_id: u64,
    pub user_id: u64,
    pub id: String,
    pub all: HashMap<String, String>,
}

impl Tags {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.all.get(name).map(String::as_str)
    }

    fn parse(unparsed: &str) -> Self {
        let mut tags = Tags::default();
        if unparsed.is_empty() {
            return tags;
        }
        for entry in unparsed.split(';') {
            let (name, value) = split_name_value(entry);
            tags.all.insert(name.to_string(), value.to_string());
            match name {
                "badges" => {
                    for badge in value.split(',').filter(|badge| !badge.is_empty()) {
                        tags.badges.insert(badge.to_string());
                    }
                }
                "color" => tags.color = parse_color(value),
                "display-name" => tags.display_name = value.to_string(),
                "emotes" => tags.emotes = parse_emotes(value),
                "tmi-sent-ts" => {
                    let milliseconds: u64 = value.parse().unwrap_or(0);
                    tags.timestamp = milliseconds / 1000;
                    tags.time_milliseconds = (milliseconds % 1000) as u32;
                }
                "room-id" => tags.channel_id = value.parse().unwrap_or(0),
                "user-id" | "target-user-id" => tags.user_id = value.parse().unwrap_or(0),
                "id" => tags.id = value.to_string(),
                _ => {}
            }
        }
        tags
    }
}

/// Splits a tag entry at the first unescaped `=` (an `=` preceded by an odd
/// number of backslashes is escaped and not a separator).
fn split_name_value(entry: &str) -> (&str, &str) {
    let mut escape = false;
    for (index, byte) in entry.bytes().enumerate() {
        if escape {
            escape = false;
        } else if byte == b'\\' {
            escape = true;
        } else if byte == b'=' {
            return (&entry[..index], &entry[index + 1..]);
        }
    }
    (entry, "")
}

fn parse_color(value: &str) -> u32 {
    value
        .strip_prefix('#')
        .and_then(|hex| u32::from_str_radix(hex, 16).ok())
        .unwrap_or(0)
}

fn parse_emotes(value: &str) -> HashMap<u64, Vec<(u32, u32)>> {
    let mut emotes: HashMap<u64, Vec<(u32, u32)>> = HashMap::new();
    for entry in value.split('/') {
        let Some((id, instances)) = entry.split_once(':') else {
            continue;
        };
        let Ok(id) = id.parse::<u64>() else {
            continue;
        };
        let spans = emotes.entry(id).or_default();
        for range in instances.split(',') {
            let Some((begin, end)) = range.split_once('-') else {
                continue;
            };
            if let (Ok(begin), Ok(end)) = (begin.parse(), end.parse()) {
                spans.push((begin, end));
            }
        }
    }
    emotes
}

/// Replaces IRCv3 tag escape sequences: `\s` becomes space, `\n` newline,
/// `\:` semicolon, `\\` backslash. Any other escaped character loses the
/// backslash; a trailing lone backslash is dropped.
pub fn unescape_tag_value(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut escape = false;
    for character in value.chars() {
        if escape {
            match character {
                's' => output.push(' '),
                'n' => output.push('\n'),
                ':' => output.push(';'),
                '\\' => output.push('\\'),
                other => output.push(other),
            }
            escape = false;
        } else if character == '\\' {
            escape = true;
        } else {
            output.push(character);
        }
    }
    output
}

/// One parsed line of Twitch chat traffic.
///
/// An empty `command` after [`Message::parse`] marks the line as malformed;
/// callers drop such messages.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub tags: Tags,
    pub prefix: String,
    pub command: String,
    pub parameters: Vec<String>,
}

enum State {
    LineFirstCharacter,
    Tags,
    PrefixOrCommandFirstCharacter,
    Prefix,
    CommandFirstCharacter,
    CommandNotFirstCharacter,
    ParameterFirstCharacter,
    ParameterNotFirstCharacter,
    Trailer,
}

impl Message {
    /// Removes the next CRLF-terminated line from `buffer` and returns it
    /// without the terminator, advancing the buffer past the CRLF. Returns
    /// `None` when no complete line is buffered yet.
    pub fn next_line(buffer: &mut String) -> Option<String> {
        let line_end = buffer.find(CRLF)?;
        let line = buffer[..line_end].to_string();
        buffer.drain(..line_end + CRLF.len());
        Some(line)
    }

    pub fn parse(line: &str) -> Message {
        let mut message = Message::default();
        let mut unparsed_tags = String::new();
        let mut state = State::LineFirstCharacter;
        for character in line.chars() {
            state = match state {
                State::LineFirstCharacter => match character {
                    '@' => State::Tags,
                    ':' => State::Prefix,
                    _ => {
                        message.command.push(character);
                        State::CommandNotFirstCharacter
                    }
                },
                State::Tags => {
                    if character == ' ' {
                        State::PrefixOrCommandFirstCharacter
                    } else {
                        unparsed_tags.push(character);
                        State::Tags
                    }
                }
                State::PrefixOrCommandFirstCharacter => {
                    if character == ':' {
                        State::Prefix
                    } else {
                        message.command.push(character);
                        State::CommandNotFirstCharacter
                    }
                }
                State::Prefix => {
                    if character == ' ' {
                        State::CommandFirstCharacter
                    } else {
                        message.prefix.push(character);
                        State::Prefix
                    }
                }
                State::CommandFirstCharacter => {
                    if character == ' ' {
                        State::CommandFirstCharacter
                    } else {
                        message.command.push(character);
                        State::CommandNotFirstCharacter
                    }
                }
                State::CommandNotFirstCharacter => {
                    if character == ' ' {
                        State::ParameterFirstCharacter
                    } else {
                        message.command.push(character);
                        State::CommandNotFirstCharacter
                    }
                }
                State::ParameterFirstCharacter => match character {
                    ':' => {
                        message.parameters.push(String::new());
                        State::Trailer
                    }
                    ' ' => State::ParameterFirstCharacter,
                    _ => {
                        message.parameters.push(character.to_string());
                        State::ParameterNotFirstCharacter
                    }
                },
                State::ParameterNotFirstCharacter => {
                    if character == ' ' {
                        State::ParameterFirstCharacter
                    } else {
                        if let Some(parameter) = message.parameters.last_mut() {
                            parameter.push(character);
                        }
                        State::ParameterNotFirstCharacter
                    }
                }
                State::Trailer => {
                    if let Some(parameter) = message.parameters.last_mut() {
                        parameter.push(character);
                    }
                    State::Trailer
                }
            };
        }
        // Ending before any command character was consumed makes the line
        // malformed; the empty command tells the caller to drop it.
        if matches!(
            state,
            State::LineFirstCharacter
                | State::Tags
                | State::PrefixOrCommandFirstCharacter
                | State::Prefix
                | State::CommandFirstCharacter
        ) {
            message.command.clear();
        }
        message.tags = Tags::parse(&unparsed_tags);
        message
    }

    /// The nickname portion of the prefix (`nick!user@host`), if any.
    pub fn nickname(&self) -> Option<&str> {
        let (nickname, _) = self.prefix.split_once('!')?;
        Some(nickname)
    }
}
