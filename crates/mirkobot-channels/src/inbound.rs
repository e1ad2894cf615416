//! Routing of inbound chat lines onto the bus.
//!
//! | line            | topics                                              | args                     |
//! |-----------------|-----------------------------------------------------|--------------------------|
//! | `hello`         | `channel::<c>::message::text\|self`                 | `[body, data]`           |
//! | `/me waves`     | `channel::<c>::action::text\|self`                  | `[body, data]`           |
//! | `!memo a b`     | message topic, then `channel::<c>::command::memo`   | `[command, [args], data]`|
//!
//! Commands from privileged senders are also raised on
//! `channel::<c>::command::privileged`.

use chrono::{DateTime, Utc};
use mirkobot_core::{Bus, DELIMITER, topics};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

const ACTION_PREFIX: &str = "/me";
const COMMAND_PREFIX: char = '!';

/// A chat line as delivered by the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundMessage {
    pub user: String,
    pub body: String,
    /// `privileged`, `voiced` or empty.
    pub permission: String,
    pub date: Option<DateTime<Utc>>,
    /// Whispered to the bot rather than said in the channel.
    pub private: bool,
}

/// Context handed to subscribers as the last argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    pub channel: String,
    pub user: String,
    pub permission: String,
    pub body: String,
    pub date: DateTime<Utc>,
    /// Written by the bot's own login.
    pub mine: bool,
    /// `message` or `action`.
    #[serde(rename = "type")]
    pub kind: String,
    pub private: bool,
}

/// Topics and arguments one inbound line fans out to, in emit order.
pub fn routes(channel: &str, login: &str, msg: &InboundMessage) -> Vec<(String, Vec<Value>)> {
    let mine = !login.is_empty() && msg.user.eq_ignore_ascii_case(login);
    let kind = if mine { topics::KIND_SELF } else { topics::KIND_TEXT };

    let action_body = msg
        .body
        .strip_prefix(ACTION_PREFIX)
        .filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
        .map(str::trim);

    let (body, data_kind) = match action_body {
        Some(rest) => (rest.to_string(), "action"),
        None => (msg.body.clone(), "message"),
    };

    let data = MessageData {
        channel: channel.to_string(),
        user: msg.user.clone(),
        permission: msg.permission.clone(),
        body: body.clone(),
        date: msg.date.unwrap_or_else(Utc::now),
        mine,
        kind: data_kind.to_string(),
        private: msg.private,
    };
    let data = serde_json::to_value(&data).unwrap_or(Value::Null);

    let mut out = Vec::new();
    if action_body.is_some() {
        out.push((
            topics::channel_action(channel, kind),
            vec![json!(body), data],
        ));
        return out;
    }

    out.push((
        topics::channel_message(channel, kind),
        vec![json!(body), data.clone()],
    ));

    if let Some((command, args)) = parse_command(&body) {
        let payload = vec![json!(command), json!(args), data];
        if msg.permission == topics::PRIVILEGED && command != topics::PRIVILEGED {
            out.push((
                topics::channel_command(channel, topics::PRIVILEGED),
                payload.clone(),
            ));
        }
        out.push((topics::channel_command(channel, &command), payload));
    }
    out
}

/// Emit every route for `msg`. Returns the number of handlers reached.
pub fn publish(bus: &Bus, channel: &str, login: &str, msg: &InboundMessage) -> usize {
    routes(channel, login, msg)
        .into_iter()
        .map(|(topic, args)| bus.emit(&topic, args))
        .sum()
}

/// `!memo-add name some text` → (`memo-add`, [`name`, `some`, `text`]).
pub fn parse_command(body: &str) -> Option<(String, Vec<String>)> {
    let rest = body.trim().strip_prefix(COMMAND_PREFIX)?;
    let mut tokens = rest.split_whitespace();
    let command = tokens.next()?;
    if command.contains(DELIMITER) {
        return None;
    }
    Some((command.to_string(), tokens.map(str::to_string).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(user: &str, body: &str) -> InboundMessage {
        InboundMessage {
            user: user.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    #[test]
    fn plain_message_from_someone_else() {
        let r = routes("hydepark", "bot", &line("alice", "hello"));
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].0, "channel::hydepark::message::text");
        assert_eq!(r[0].1[0], "hello");
        assert_eq!(r[0].1[1]["user"], "alice");
        assert_eq!(r[0].1[1]["mine"], false);
        assert_eq!(r[0].1[1]["type"], "message");
    }

    #[test]
    fn own_message_is_self() {
        let r = routes("hydepark", "Bot", &line("bot", "hi"));
        assert_eq!(r[0].0, "channel::hydepark::message::self");
        assert_eq!(r[0].1[1]["mine"], true);
    }

    #[test]
    fn me_line_is_an_action() {
        let r = routes("hydepark", "bot", &line("alice", "/me waves"));
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].0, "channel::hydepark::action::text");
        assert_eq!(r[0].1[0], "waves");
        assert_eq!(r[0].1[1]["type"], "action");

        let r = routes("hydepark", "bot", &line("alice", "/method"));
        assert_eq!(r[0].0, "channel::hydepark::message::text");
    }

    #[test]
    fn command_fans_out() {
        let mut msg = line("alice", "!memo-add name some text");
        let r = routes("hydepark", "bot", &msg);
        assert_eq!(r.len(), 2);
        assert_eq!(r[1].0, "channel::hydepark::command::memo-add");
        assert_eq!(r[1].1[0], "memo-add");
        assert_eq!(r[1].1[1], json!(["name", "some", "text"]));

        msg.permission = "privileged".into();
        let r = routes("hydepark", "bot", &msg);
        assert_eq!(r.len(), 3);
        assert_eq!(r[1].0, "channel::hydepark::command::privileged");
        assert_eq!(r[2].0, "channel::hydepark::command::memo-add");
    }

    #[test]
    fn command_parsing_edge_cases() {
        assert_eq!(parse_command("!"), None);
        assert_eq!(parse_command("hello !memo"), None);
        assert_eq!(parse_command("!a::b"), None);
        assert_eq!(parse_command("  !ping  "), Some(("ping".into(), vec![])));
    }
}
