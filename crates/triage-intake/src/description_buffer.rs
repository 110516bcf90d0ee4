//! Append-only description transcript for one intake session.

/// One attributed chunk of description text. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionEntry {
    pub author_tag: String,
    pub text: String,
}

/// Ordered collection of description entries with author-aware rendering.
#[derive(Debug, Default, Clone)]
pub struct DescriptionBuffer {
    entries: Vec<DescriptionEntry>,
}

impl DescriptionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Appends free-form text after repairing inline code-fence boundaries.
    pub fn append(&mut self, author_tag: &str, text: &str) {
        self.entries.push(DescriptionEntry {
            author_tag: author_tag.to_string(),
            text: normalize_code_fences(text),
        });
    }

    /// Appends an attachment as a markdown link. Always a distinct entry, so
    /// it never text-merges into adjacent prose from the same author.
    pub fn append_attachment(&mut self, author_tag: &str, name: Option<&str>, url: &str) {
        let label = name
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("attachment");
        self.entries.push(DescriptionEntry {
            author_tag: author_tag.to_string(),
            text: format!("[{label}]({url})"),
        });
    }

    /// Flattens the transcript. An author header precedes an entry only when
    /// the previous entry was written by someone else.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let new_speaker = index == 0
                    || self.entries[index - 1].author_tag != entry.author_tag;
                if new_speaker {
                    format!("{} says:\n{}", entry.author_tag, entry.text)
                } else {
                    entry.text.clone()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Repairs fences that users open or close inline with prose: text stuck to
/// the front of a ``` gets a break inserted before it, and trailing content
/// after a fence moves to the next line. A bare alphanumeric language tag on
/// an opening fence stays attached.
pub fn normalize_code_fences(text: &str) -> String {
    let mut lines = Vec::new();
    for line in text.split('\n') {
        split_fence_line(line, &mut lines);
    }
    lines.join("\n")
}

fn split_fence_line(line: &str, out: &mut Vec<String>) {
    let Some(fence_start) = line.find("```") else {
        out.push(line.to_string());
        return;
    };

    let before = &line[..fence_start];
    let after = &line[fence_start + 3..];
    if !before.trim().is_empty() {
        out.push(before.trim_end().to_string());
    }

    if after.is_empty() || is_language_tag(after) {
        out.push(format!("```{after}"));
        return;
    }
    out.push("```".to_string());
    split_fence_line(after.trim_start(), out);
}

fn is_language_tag(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 16
        && value
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || character == '+' || character == '#')
}
