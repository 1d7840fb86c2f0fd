/// Markers that may open a string spanning several commands.
const PAIRED_MARKERS: [&str; 3] = ["\"", "'", "EOF"];

/// Split script-like text into atomic shell commands.
///
/// Comment and blank lines are dropped, backslash continuations are joined,
/// commands with an unterminated quote or heredoc are merged with the ones
/// that follow until the marker closes, and `&&`/`||` chains are split into
/// their parts. `echo` commands are discarded.
pub fn extract_commands(text: &str) -> Vec<String> {
    extract_commands_from_lines(text.lines())
}

pub fn extract_commands_from_lines<'a, I>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let groups = join_continuations(lines);
    let logical = QuoteBalancer::default().process(groups);
    logical.iter().flat_map(|c| split_chains(c)).collect()
}

/// Join lines ending in `\` with their successors.
pub fn join_continuations<'a, I>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut groups = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match line.strip_suffix('\\') {
            Some(head) => {
                let head = head.trim();
                if !head.is_empty() {
                    current.push(head);
                }
            }
            None => {
                current.push(line);
                groups.push(current.join(" "));
                current.clear();
            }
        }
    }

    if !current.is_empty() {
        groups.push(current.join(" "));
    }
    groups
}

/// Merges consecutive commands while a quote or heredoc marker is open.
#[derive(Debug, Default)]
pub struct QuoteBalancer {
    output: Vec<String>,
    open_command: Vec<String>,
    current: Option<&'static str>,
}

impl QuoteBalancer {
    pub fn process<I>(mut self, commands: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        for command in commands {
            self.push(command);
        }
        // Unterminated at end of input: flush what we have.
        if self.current.is_some() {
            self.close();
        }
        self.output
    }

    fn push(&mut self, command: String) {
        let unclosed = self.unclosed_marker(&command);
        let mut opened_now = false;

        if self.current.is_none() {
            match unclosed {
                Some(marker) => {
                    self.current = Some(marker);
                    opened_now = true;
                }
                None => {
                    self.output.push(command);
                    return;
                }
            }
        }

        self.open_command.push(command);
        if !opened_now && unclosed == self.current {
            self.close();
        }
    }

    fn close(&mut self) {
        self.output.push(self.open_command.join(" "));
        self.open_command.clear();
        self.current = None;
    }

    fn unclosed_marker(&self, command: &str) -> Option<&'static str> {
        let mut stripped = command.to_string();
        for marker in PAIRED_MARKERS {
            stripped = stripped.replace(&format!("\\{}", marker), "");
        }

        match self.current {
            Some(current) => {
                (stripped.matches(current).count() % 2 == 1).then_some(current)
            }
            None => PAIRED_MARKERS
                .into_iter()
                .find(|marker| stripped.matches(marker).count() % 2 == 1),
        }
    }
}

/// Split a logical command on `&&` and `||`, dropping `echo` parts.
///
/// Text from the first heredoc redirect onwards stays attached to the
/// command that introduced it.
pub fn split_chains(command: &str) -> Vec<String> {
    let (head, heredoc) = match heredoc_start(command) {
        Some(idx) => command.split_at(idx),
        None => (command, ""),
    };

    let mut parts: Vec<String> = head
        .replace("||", "&&")
        .split(" && ")
        .map(str::to_string)
        .collect();
    if let Some(last) = parts.last_mut() {
        last.push_str(heredoc);
    }

    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty() && !is_echo(p))
        .collect()
}

/// Byte offset of the first `<<WORD` or `<<-WORD` redirect. Here-strings
/// (`<<<`) and arithmetic shifts such as `$((1 << 2))` are not heredocs.
fn heredoc_start(command: &str) -> Option<usize> {
    let bytes = command.as_bytes();
    let mut from = 0;
    while let Some(offset) = command[from..].find("<<") {
        let idx = from + offset;
        from = idx + 2;

        if idx > 0 && bytes[idx - 1] == b'<' {
            continue;
        }
        let rest = command[idx + 2..].strip_prefix('-').unwrap_or(&command[idx + 2..]);
        if rest.starts_with('<') {
            from = idx + 3;
            continue;
        }
        let rest = rest.trim_start();
        let rest = rest
            .strip_prefix('"')
            .or_else(|| rest.strip_prefix('\''))
            .unwrap_or(rest);
        if rest.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
            return Some(idx);
        }
    }
    None
}

fn is_echo(command: &str) -> bool {
    command.split_whitespace().next() == Some("echo")
}
