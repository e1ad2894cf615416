//! Topic vocabulary shared by the kernel, the connection layer and modules.

/// Emitted once per successful module load; payload is the module descriptor.
pub const MODULE_REGISTER: &str = "core::modules::register";

/// Broadcast a message to every joined channel.
pub const BROADCAST_SEND: &str = "mirkoczat::send";
/// Broadcast an expedited message to every joined channel.
pub const BROADCAST_SEND_PRIORITY: &str = "mirkoczat::send::priority";
/// Invoke a remote action on every joined channel.
pub const BROADCAST_EXECUTE: &str = "mirkoczat::execute";
/// Ask the connection supervisor to join a channel.
pub const JOIN: &str = "mirkoczat::join";
/// Ask the connection supervisor to leave a channel.
pub const LEAVE: &str = "mirkoczat::leave";

/// Subtype used for messages written by somebody else.
pub const KIND_TEXT: &str = "text";
/// Subtype used for messages written by the bot's own login.
pub const KIND_SELF: &str = "self";
/// Command subtype additionally emitted for privileged senders.
pub const PRIVILEGED: &str = "privileged";

/// A channel name must fit in one topic segment: non-empty, no
/// whitespace, no `::`, and not the wildcard.
pub fn is_valid_channel_name(name: &str) -> bool {
    !name.is_empty()
        && name != crate::WILDCARD
        && !name.contains(crate::DELIMITER)
        && !name.chars().any(char::is_whitespace)
}

pub fn channel_send(channel: &str) -> String {
    format!("channel::{channel}::send")
}

pub fn channel_send_priority(channel: &str) -> String {
    format!("channel::{channel}::send::priority")
}

pub fn channel_execute(channel: &str) -> String {
    format!("channel::{channel}::execute")
}

pub fn channel_message(channel: &str, kind: &str) -> String {
    format!("channel::{channel}::message::{kind}")
}

pub fn channel_action(channel: &str, kind: &str) -> String {
    format!("channel::{channel}::action::{kind}")
}

pub fn channel_command(channel: &str, command: &str) -> String {
    format!("channel::{channel}::command::{command}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TopicPattern;

    #[test]
    fn channel_names_fit_one_segment() {
        assert!(is_valid_channel_name("hydepark"));
        assert!(is_valid_channel_name("muzyka-2"));
        assert!(!is_valid_channel_name(""));
        assert!(!is_valid_channel_name("*"));
        assert!(!is_valid_channel_name("a::b"));
        assert!(!is_valid_channel_name("two words"));
    }

    #[test]
    fn builders_match_wildcard_vocabulary() {
        let messages = TopicPattern::parse("channel::*::message::*").unwrap();
        let commands = TopicPattern::parse("channel::*::command::*").unwrap();
        assert!(messages.matches(&channel_message("hydepark", KIND_TEXT)));
        assert!(!messages.matches(&channel_action("hydepark", KIND_TEXT)));
        assert!(commands.matches(&channel_command("hydepark", PRIVILEGED)));
        assert!(commands.matches(&channel_command("hydepark", "memo")));
    }

    #[test]
    fn priority_topic_extends_send_topic() {
        assert_eq!(channel_send("a"), "channel::a::send");
        assert_eq!(channel_send_priority("a"), "channel::a::send::priority");
        assert_eq!(channel_execute("a"), "channel::a::execute");
    }
}
