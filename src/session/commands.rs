//! Console command parsing.

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Help,
    /// Whitespace separated terms; `*` matches everything.
    Search(Vec<&'a str>),
    Use(&'a str),
    Options,
    Set { name: &'a str, value: &'a str },
    Run { background: bool },
    Stop(Option<&'a str>),
    Show(Option<&'a str>),
    Save(&'a str),
    Jobs,
    Back,
    Exit,
    Unknown(String),
}

/// Rows of the core part of `help`.
pub const CORE_HELP: &[[&str; 2]] = &[
    ["Core Commands", ""],
    ["=============", ""],
    ["  Command", "Description"],
    ["  -------", "-----------"],
    ["  help", "Help Menu"],
    ["  jobs", "Lists modules running in the background"],
    ["  exit", "Stops background runs and leaves the console"],
    ["", ""],
    ["Module Commands", ""],
    ["===============", ""],
    ["  Command", "Description"],
    ["  -------", "-----------"],
    ["  search [term]", "Searches module names, descriptions and authors"],
    ["  use <module>", "Selects a module to use"],
    ["  options", "Displays available options for the selected module"],
    ["  set <option> <value>", "Sets a value for a module option"],
    ["  run [&]", "Executes the selected module, '&' runs it in the background"],
    ["  stop [module]", "Stops a module running in the background"],
    ["  show [module]", "Shows the last results of a module"],
    ["  save <filename>", "Saves the module output to the specified file"],
    ["  back", "Returns to core (exit module)"],
];

/// Split off the first whitespace-delimited word.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

fn optional(arg: &str) -> Option<&str> {
    let (word, _) = split_word(arg);
    (!word.is_empty()).then_some(word)
}

/// Parse a console line. `None` for blank input, `Err` carries a usage line.
pub fn parse(line: &str) -> Option<Result<Command<'_>, &'static str>> {
    let (name, rest) = split_word(line.trim());
    if name.is_empty() {
        return None;
    }
    let rest = rest.trim_end();

    let command = match name.to_ascii_lowercase().as_str() {
        "help" | "?" => Ok(Command::Help),
        "search" => Ok(Command::Search(rest.split_whitespace().collect())),
        "use" => match split_word(rest) {
            (module, "") if !module.is_empty() => Ok(Command::Use(module)),
            _ => Err("Usage: use <module>"),
        },
        "options" => Ok(Command::Options),
        "set" => match split_word(rest) {
            (name, value) if !name.is_empty() && !value.is_empty() => Ok(Command::Set { name, value }),
            _ => Err("Usage: set <option> <value>"),
        },
        "run" => match rest {
            "" => Ok(Command::Run { background: false }),
            "&" => Ok(Command::Run { background: true }),
            _ => Err("Usage: run [&]"),
        },
        "stop" => Ok(Command::Stop(optional(rest))),
        "show" => Ok(Command::Show(optional(rest))),
        "save" => match split_word(rest) {
            (file, "") if !file.is_empty() => Ok(Command::Save(file)),
            _ => Err("Usage: save <filename>"),
        },
        "jobs" => Ok(Command::Jobs),
        "back" => Ok(Command::Back),
        "exit" | "quit" => Ok(Command::Exit),
        other => Ok(Command::Unknown(other.to_string())),
    };
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(line: &str) -> Command<'_> {
        parse(line).unwrap().unwrap()
    }

    #[test]
    fn set_keeps_the_rest_of_the_line() {
        assert_eq!(
            ok("set  USER_AGENT   Mozilla/5.0 (X11; Linux)  "),
            Command::Set {
                name: "USER_AGENT",
                value: "Mozilla/5.0 (X11; Linux)"
            }
        );
        assert_eq!(parse("set DOMAIN"), Some(Err("Usage: set <option> <value>")));
    }

    #[test]
    fn run_background_marker() {
        assert_eq!(ok("run"), Command::Run { background: false });
        assert_eq!(ok("RUN &"), Command::Run { background: true });
        assert!(parse("run now").unwrap().is_err());
    }

    #[test]
    fn optional_arguments_and_aliases() {
        assert_eq!(ok("stop"), Command::Stop(None));
        assert_eq!(ok("show dnsbrute"), Command::Show(Some("dnsbrute")));
        assert_eq!(ok("quit"), Command::Exit);
        assert_eq!(ok("search dns  web"), Command::Search(vec!["dns", "web"]));
    }

    #[test]
    fn blank_and_unknown_lines() {
        assert!(parse("   ").is_none());
        assert_eq!(ok("Frobnicate x"), Command::Unknown("frobnicate".into()));
        assert_eq!(parse("use"), Some(Err("Usage: use <module>")));
    }
}
