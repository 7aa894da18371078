//! Tokenizing helpers shared by the response grammars.

/// One comma-separated parameter of an AT response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Param {
    /// Text with surrounding quotes and whitespace removed.
    pub text: String,
    /// Whether the parameter was a quoted string.
    pub quoted: bool,
}

impl Param {
    /// Parse an unquoted numeric parameter.
    pub(crate) fn int<T: std::str::FromStr>(&self) -> Option<T> {
        if self.quoted {
            return None;
        }
        self.text
            .parse()
            .ok()
    }

    /// Parse as a number regardless of quoting.
    pub(crate) fn number<T: std::str::FromStr>(&self) -> Option<T> {
        self.text
            .parse()
            .ok()
    }
}

/// Text after `prefix` (e.g. `"+CSQ:"`) on a line that starts with it.
pub(crate) fn payload<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)
        .map(str::trim)
}

/// First line carrying `prefix`, reduced to its payload.
pub(crate) fn first_payload<'a>(lines: &[&'a str], prefix: &str) -> Option<&'a str> {
    lines
        .iter()
        .find_map(|line| payload(line, prefix))
}

/// Split on commas that are outside double quotes.
pub(crate) fn split_params(text: &str) -> Vec<Param> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quoted = false;

    for c in text.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            },
            ',' if !in_quotes => {
                params.push(Param {
                    text: current
                        .trim()
                        .to_string(),
                    quoted,
                });
                current.clear();
                quoted = false;
            },
            _ => current.push(c),
        }
    }
    if !text.is_empty() {
        params.push(Param {
            text: current
                .trim()
                .to_string(),
            quoted,
        });
    }
    params
}

/// Contents of each top-level `( ... )` group, ignoring parentheses in quotes.
pub(crate) fn paren_groups(text: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut in_quotes = false;
    let mut start = None;

    for (idx, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes && start.is_none() => start = Some(idx + 1),
            ')' if !in_quotes => {
                if let Some(begin) = start.take() {
                    groups.push(&text[begin..idx]);
                }
            },
            _ => {},
        }
    }
    groups
}

/// Keep only ASCII digits.
pub(crate) fn digits_only(text: &str) -> String {
    text.chars()
        .filter(char::is_ascii_digit)
        .collect()
}
