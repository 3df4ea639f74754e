//! `{{cmd:NAME}}` expansion from stored commands.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::warn;

use conduit_store::CommandRepo;

static COMMAND_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{cmd:([a-zA-Z0-9_-]+)\}\}").unwrap());

/// Replace each `{{cmd:NAME}}` with `lookup(NAME)`. Names the lookup does
/// not know are left as written.
pub fn expand_command_placeholders<F>(message: &str, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    COMMAND_PLACEHOLDER
        .replace_all(message, |caps: &Captures<'_>| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Expand against the command table.
pub fn expand_from_store(message: &str, commands: &CommandRepo) -> String {
    expand_command_placeholders(message, |name| match commands.get_by_name(name) {
        Ok(row) => row.map(|c| c.content),
        Err(e) => {
            warn!(command = name, error = %e, "command lookup failed");
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_store::Database;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "review" => Some("Review this diff carefully.".into()),
            "short-1" => Some("tl;dr".into()),
            _ => None,
        }
    }

    #[test]
    fn known_commands_are_replaced() {
        assert_eq!(
            expand_command_placeholders("{{cmd:review}} then {{cmd:short-1}}", lookup),
            "Review this diff carefully. then tl;dr"
        );
    }

    #[test]
    fn unknown_and_malformed_are_left_alone() {
        let msg = "{{cmd:missing}} {{cmd:bad name}} {cmd:review}";
        assert_eq!(expand_command_placeholders(msg, lookup), msg);
    }

    #[test]
    fn plain_messages_pass_through() {
        assert_eq!(expand_command_placeholders("hello", lookup), "hello");
    }

    #[test]
    fn expands_from_command_table() {
        let db = Database::in_memory().unwrap();
        let commands = CommandRepo::new(db);
        commands.create("fix", "Fix the failing test.").unwrap();
        assert_eq!(
            expand_from_store("{{cmd:fix}} {{cmd:nope}}", &commands),
            "Fix the failing test. {{cmd:nope}}"
        );
    }
}
