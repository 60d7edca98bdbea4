// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text form of node assignments as used by export files.
//!
//! A node is written as the arguments of the command setting it, for example
//! `permission set essentials.fly true server=hub` or `parent addtemp mod 1767225600`. Arguments
//! containing whitespace or quotes are double-quoted, with `\"` and `\\` escapes.
use std::borrow::Cow;

use gatekeeper_core::{ContextError, ContextSet, Node, NodeError, Timestamp};
use thiserror::Error;

/// Renders the arguments of the command setting this node.
pub fn render(node: &Node) -> String {
    let mut args: Vec<String> = Vec::new();
    let expiry = node.expiry().map(|expiry| expiry.as_secs().to_string());

    if let (true, Some(group)) = (node.value(), node.as_inheritance()) {
        args.push("parent".into());
        args.push(if expiry.is_some() { "addtemp" } else { "add" }.into());
        args.push(group.to_string());
    } else if let (true, Some((kind, chat_meta))) = (
        node.value(),
        node.as_prefix()
            .map(|chat_meta| ("prefix", chat_meta))
            .or_else(|| node.as_suffix().map(|chat_meta| ("suffix", chat_meta))),
    ) {
        args.push("meta".into());
        let temp = if expiry.is_some() { "temp" } else { "" };
        args.push(format!("add{temp}{kind}"));
        args.push(chat_meta.priority.to_string());
        args.push(chat_meta.text.clone());
    } else if let (true, Some((key, value))) = (node.value(), node.as_meta()) {
        args.push("meta".into());
        args.push(if expiry.is_some() { "settemp" } else { "set" }.into());
        args.push(key.to_string());
        args.push(value.to_string());
    } else {
        args.push("permission".into());
        args.push(if expiry.is_some() { "settemp" } else { "set" }.into());
        args.push(node.permission().to_string());
        args.push(node.value().to_string());
    }

    args.extend(expiry);
    args.extend(
        node.context()
            .iter()
            .map(|(key, value)| format!("{key}={value}")),
    );

    args.iter()
        .map(|arg| quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses the arguments of a node setting command back into a node.
pub fn parse(args: &[String]) -> Result<Node, CommandError> {
    let mut args = Args::new(args);
    let family = args.next("command")?;
    let action = args.next("action")?;

    let (builder, temporary) = match (family, action) {
        ("permission", "set" | "settemp") => {
            let permission = args.next("permission")?;
            let value = parse_bool(args.next("value")?)?;
            (Node::builder(permission).value(value), action == "settemp")
        }
        ("parent", "add" | "addtemp") => {
            let group = args.next("group")?;
            (Node::inheritance(group), action == "addtemp")
        }
        ("meta", "set" | "settemp") => {
            let key = args.next("key")?;
            let value = args.next("value")?;
            (Node::meta(key, value), action == "settemp")
        }
        ("meta", "addprefix" | "addtempprefix" | "addsuffix" | "addtempsuffix") => {
            let priority = args.next("priority")?;
            let priority = priority
                .parse::<i32>()
                .map_err(|_| CommandError::InvalidNumber(priority.to_string()))?;
            let text = args.next("text")?;
            let builder = if action.ends_with("prefix") {
                Node::prefix(priority, text)
            } else {
                Node::suffix(priority, text)
            };
            (builder, action.contains("temp"))
        }
        _ => return Err(CommandError::UnknownCommand(format!("{family} {action}"))),
    };

    let expiry = if temporary {
        let expiry = args.next("expiry")?;
        let secs = expiry
            .parse::<u64>()
            .map_err(|_| CommandError::InvalidNumber(expiry.to_string()))?;
        Some(Timestamp::new(secs))
    } else {
        None
    };

    let mut context = ContextSet::empty();
    for pair in args.rest() {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ContextError::MalformedPair(pair.to_string()))?;
        context = context.add(key, value)?;
    }

    Ok(builder.maybe_expiry(expiry).context(context).build()?)
}

/// Quotes an argument if it would otherwise not survive [`tokenize`].
pub fn quote(arg: &str) -> Cow<'_, str> {
    let needs_quotes =
        arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\');
    if !needs_quotes {
        return Cow::Borrowed(arg);
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    Cow::Owned(quoted)
}

/// Splits a command line into arguments, honouring double quotes.
pub fn tokenize(line: &str) -> Result<Vec<String>, CommandError> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };

        let mut arg = String::new();
        if first == '"' {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some(escaped) => arg.push(escaped),
                        None => return Err(CommandError::UnterminatedQuote),
                    },
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => arg.push(c),
                }
            }
            if !closed {
                return Err(CommandError::UnterminatedQuote);
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                arg.push(c);
            }
        }
        args.push(arg);
    }

    Ok(args)
}

fn parse_bool(value: &str) -> Result<bool, CommandError> {
    match value.to_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(CommandError::InvalidBool(value.to_string())),
    }
}

struct Args<'a> {
    args: &'a [String],
    position: usize,
}

impl<'a> Args<'a> {
    fn new(args: &'a [String]) -> Self {
        Self { args, position: 0 }
    }

    fn next(&mut self, name: &'static str) -> Result<&'a str, CommandError> {
        let arg = self
            .args
            .get(self.position)
            .ok_or(CommandError::MissingArgument(name))?;
        self.position += 1;
        Ok(arg.as_str())
    }

    fn rest(&self) -> &'a [String] {
        &self.args[self.position.min(self.args.len())..]
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("missing argument <{0}>")]
    MissingArgument(&'static str),

    #[error("'{0}' is not a number")]
    InvalidNumber(String),

    #[error("'{0}' is neither true nor false")]
    InvalidBool(String),

    #[error("unterminated quote")]
    UnterminatedQuote,

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Context(#[from] ContextError),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use gatekeeper_core::{ContextSet, Node, Timestamp};

    use super::{CommandError, parse, render, tokenize};

    fn reparse(node: &Node) -> Node {
        parse(&tokenize(&render(node)).unwrap()).unwrap()
    }

    #[test]
    fn renders_commands() {
        let hub = ContextSet::empty().add("server", "hub").unwrap();

        let node = Node::builder("essentials.fly")
            .value(false)
            .context(hub.clone())
            .build()
            .unwrap();
        assert_eq!(render(&node), "permission set essentials.fly false server=hub");

        let node = Node::inheritance("mod")
            .expiry(Timestamp::new(1700000000))
            .build()
            .unwrap();
        assert_eq!(render(&node), "parent addtemp mod 1700000000");

        let node = Node::prefix(100, "[Team Admin]").build().unwrap();
        assert_eq!(render(&node), "meta addprefix 100 \"[Team Admin]\"");

        let node = Node::meta("colour", "red").build().unwrap();
        assert_eq!(render(&node), "meta set colour red");

        // Negated edges can not be expressed as parent commands.
        let node = Node::inheritance("mod").value(false).build().unwrap();
        assert_eq!(render(&node), "permission set group.mod false");
    }

    #[test]
    fn parses_what_it_renders() {
        let context = ContextSet::empty()
            .add("server", "hub")
            .unwrap()
            .add("world", "the nether")
            .unwrap();
        let nodes = [
            Node::suffix(5, "say \"hi\" \\o/")
                .expiry(Timestamp::new(42))
                .context(context.clone())
                .build()
                .unwrap(),
            Node::meta("rank", "gold")
                .expiry(Timestamp::new(7))
                .build()
                .unwrap(),
            Node::builder("weight.10").build().unwrap(),
        ];
        for node in nodes {
            assert_eq!(reparse(&node), node);
        }
    }

    #[test]
    fn tokenizer_errors() {
        assert_eq!(tokenize("  a  \"b c\" \"\"").unwrap(), vec!["a", "b c", ""]);
        assert_matches!(tokenize("a \"b"), Err(CommandError::UnterminatedQuote));

        let args = tokenize("permission set fly maybe").unwrap();
        assert_matches!(parse(&args), Err(CommandError::InvalidBool(_)));
        let args = tokenize("parent addtemp mod").unwrap();
        assert_matches!(parse(&args), Err(CommandError::MissingArgument("expiry")));
        let args = tokenize("parent move mod").unwrap();
        assert_matches!(parse(&args), Err(CommandError::UnknownCommand(_)));
    }
}
