// INI reader for container files
//
// Rules followed by every .cfg file the codecs read:
// - `[section]` headers; keys before the first header are an error
// - `key = value` or `key: value`, keys lowercased and trimmed
// - whole-line comments start with `#` or `;` (no inline comments)
// - an indented line continues the previous value on a new line; blank and
//   comment lines between continuation lines stay in the value as empty
//   lines, trailing ones are dropped
// - duplicate sections and duplicate keys within a section are errors

use crate::error::FormatError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    pub name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Entries in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IniFile {
    sections: Vec<Section>,
}

impl IniFile {
    pub fn parse(text: &str) -> Result<Self, FormatError> {
        let mut file = IniFile::default();
        // Value continuation is only legal after a key line
        let mut continuing = false;
        let mut pending_blank = 0;

        for (index, raw_line) in text.lines().enumerate() {
            let line_no = index + 1;
            let trimmed = raw_line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                if continuing {
                    pending_blank += 1;
                }
                continue;
            }

            let indented = raw_line.starts_with(|c: char| c.is_whitespace());
            if indented && continuing {
                if let Some((_, value)) = file.sections.last_mut().and_then(|s| s.entries.last_mut()) {
                    if !value.is_empty() {
                        value.push('\n');
                    }
                    for _ in 0..pending_blank {
                        value.push('\n');
                    }
                    value.push_str(trimmed);
                }
                pending_blank = 0;
                continue;
            }
            pending_blank = 0;

            if let Some(header) = trimmed.strip_prefix('[') {
                let name = header
                    .strip_suffix(']')
                    .ok_or_else(|| ini_error(line_no, "unterminated section header"))?
                    .trim();
                if file.section(name).is_some() {
                    return Err(ini_error(line_no, format!("duplicate section [{}]", name)));
                }
                file.sections.push(Section {
                    name: name.to_string(),
                    entries: Vec::new(),
                });
                continuing = false;
                continue;
            }

            let split = trimmed
                .find(['=', ':'])
                .ok_or_else(|| ini_error(line_no, "expected 'key = value'"))?;
            let key = trimmed[..split].trim().to_lowercase();
            let value = trimmed[split + 1..].trim().to_string();
            if key.is_empty() {
                return Err(ini_error(line_no, "empty key"));
            }

            let section = file
                .sections
                .last_mut()
                .ok_or_else(|| ini_error(line_no, "key outside of a section"))?;
            if section.get(&key).is_some() {
                return Err(ini_error(
                    line_no,
                    format!("duplicate key '{}' in [{}]", key, section.name),
                ));
            }
            section.entries.push((key, value));
            continuing = true;
        }

        Ok(file)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section).and_then(|s| s.get(key))
    }

    /// A value that must be present and non-empty.
    pub fn require(&self, section: &str, key: &str) -> Result<&str, FormatError> {
        self.get(section, key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| FormatError::missing(&format!("{}.{}", section, key)))
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> + '_ {
        self.sections.iter()
    }
}

fn ini_error(line: usize, reason: impl Into<String>) -> FormatError {
    FormatError::Ini {
        line,
        reason: reason.into(),
    }
}
