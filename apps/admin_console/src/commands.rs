use anyhow::{bail, Result};
use shared::domain::{AdminId, BranchId, ConversationId, MessageId};

pub const HELP: &str = "\
/branches               list active branches with open chats and unread counts
/branch <id> [name]     work in a branch
/list                   show the branch's conversations
/open <chatId>          open a conversation
/leave                  close the conversation view
/close                  close the open conversation for good
/assign <adminId>       hand the open conversation to another admin
/delete <messageId>     delete one of your messages
/resend <tempId>        retry a message that is still pending
/typing                 show the customer that you are composing a reply
/refresh                reload the conversation list
/stats                  chat statistics for the current branch
/back                   return to the branch list
/quit                   exit
anything else is sent to the open conversation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Branches,
    Branch { id: BranchId, name: String },
    List,
    Open(ConversationId),
    Leave,
    Close,
    Assign(AdminId),
    Delete(MessageId),
    Resend(MessageId),
    Typing,
    Refresh,
    Stats,
    Back,
    Help,
    Quit,
    Send(String),
}

/// `Ok(None)` for blank input.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(ConsoleCommand::Send(line.to_string())));
    };

    let (verb, args) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(verb, args)| (verb, args.trim()));
    let command = match verb {
        "branches" => ConsoleCommand::Branches,
        "branch" => {
            let (id, name) = args
                .split_once(char::is_whitespace)
                .map_or((args, ""), |(id, name)| (id, name.trim()));
            ConsoleCommand::Branch {
                id: BranchId::new(required(id, "/branch <id> [name]")?),
                name: name.to_string(),
            }
        }
        "list" => ConsoleCommand::List,
        "open" => ConsoleCommand::Open(ConversationId::new(required(args, "/open <chatId>")?)),
        "leave" => ConsoleCommand::Leave,
        "close" => ConsoleCommand::Close,
        "assign" => ConsoleCommand::Assign(AdminId::new(required(args, "/assign <adminId>")?)),
        "delete" => ConsoleCommand::Delete(MessageId::new(required(args, "/delete <messageId>")?)),
        "resend" => ConsoleCommand::Resend(MessageId::new(required(args, "/resend <tempId>")?)),
        "typing" => ConsoleCommand::Typing,
        "refresh" => ConsoleCommand::Refresh,
        "stats" => ConsoleCommand::Stats,
        "back" => ConsoleCommand::Back,
        "help" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => bail!("unknown command /{other}, try /help"),
    };
    Ok(Some(command))
}

fn required<'a>(value: &'a str, usage: &str) -> Result<&'a str> {
    if value.is_empty() {
        bail!("usage: {usage}");
    }
    Ok(value)
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
