//! strftime-style date formatting for templates.
//!
//! Only the specifiers listed in [`chrono_spec`] are substituted; anything
//! else, including a trailing lone `%`, is copied through unchanged.

use chrono::{DateTime, FixedOffset};

pub fn format(date: &DateTime<FixedOffset>, pattern: &str) -> String {
    let mut output = String::with_capacity(pattern.len() + 16);
    let mut characters = pattern.chars();

    while let Some(character) = characters.next() {
        if character != '%' {
            output.push(character);
            continue;
        }

        match characters.next() {
            Some('%') => output.push('%'),
            Some('n') => output.push('\n'),
            Some('t') => output.push('\t'),
            Some(specifier) => match chrono_spec(specifier) {
                Some(spec) => output.push_str(&date.format(spec).to_string()),
                None => {
                    output.push('%');
                    output.push(specifier);
                }
            },
            None => output.push('%'),
        }
    }

    output
}

fn chrono_spec(specifier: char) -> Option<&'static str> {
    let spec = match specifier {
        'a' => "%a",
        'A' => "%A",
        'b' | 'h' => "%b",
        'B' => "%B",
        'c' => "%Y-%m-%dT%H:%M:%S%:z",
        'C' => "%C",
        'd' => "%d",
        'D' => "%m/%d/%y",
        'e' => "%e",
        'F' => "%Y-%m-%d",
        'H' => "%H",
        'I' => "%I",
        'j' => "%j",
        'k' => "%k",
        'l' => "%l",
        'm' => "%m",
        'M' => "%M",
        'p' => "%p",
        'P' => "%P",
        'r' => "%I:%M:%S %p",
        'R' => "%H:%M",
        's' => "%s",
        'S' => "%S",
        'T' => "%H:%M:%S",
        'u' => "%u",
        'w' => "%w",
        'y' => "%y",
        'Y' => "%Y",
        'z' => "%z",
        'Z' => "%:z",
        _ => return None,
    };
    Some(spec)
}
